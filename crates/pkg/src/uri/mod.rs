//! # OCI References
//!
//! Parsing of the registry references used by OCI dependencies.
//!
//! ## Format
//!
//! ```text
//! [oci://]registry[:port]/repository[:tag][@sha256:<hex>]
//! ```
//!
//! - **registry** - Host (and optional port) serving the distribution API
//! - **repository** - One or more lowercase path components (e.g. `kcl-lang/k8s`)
//! - **tag** - Optional mutable tag (e.g. `1.28`)
//! - **digest** - Optional immutable manifest digest; when present it wins over the tag
//!
//! ```rust
//! use pkg::uri::OciReference;
//!
//! let r: OciReference = "oci://ghcr.io/kcl-lang/helloworld:0.1.0".parse().unwrap();
//! assert_eq!(r.registry, "ghcr.io");
//! assert_eq!(r.repository, "kcl-lang/helloworld");
//! assert_eq!(r.tag.as_deref(), Some("0.1.0"));
//! ```

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use nom::IResult;
use nom::bytes::complete::{tag, take_while_m_n, take_while1};
use nom::combinator::{all_consuming, opt, recognize};
use nom::sequence::{preceded, tuple};
use serde::{Deserialize, Serialize};

const SCHEME: &str = "oci://";
const SHA256: &str = "sha256:";
const TAG_MAX: usize = 128;

//================================================================================================
// Types
//================================================================================================

/// A parsed OCI artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OciReference {
    /// Registry host, including any port.
    pub registry: String,
    /// Repository path below the registry.
    pub repository: String,
    /// Mutable tag, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Immutable manifest digest (`sha256:<hex>`), if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A string that is not a valid OCI reference.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum UriError {
    /// The reference does not follow the grammar.
    #[error("invalid OCI reference: '{0}'")]
    Invalid(String),
    /// Neither a tag nor a digest was supplied.
    #[error("OCI reference '{0}' needs a tag or digest")]
    Unpinned(String),
}

//================================================================================================
// Impls
//================================================================================================

impl OciReference {
    /// Build the reference a version-only dependency resolves to in the default registry.
    pub fn in_registry(host: &str, namespace: &str, name: &str, tag: &str) -> Self {
        let namespace = namespace.trim_matches('/');
        let repository = if namespace.is_empty() {
            name.to_owned()
        } else {
            format!("{namespace}/{name}")
        };
        OciReference {
            registry: host.to_owned(),
            repository,
            tag: Some(tag.to_owned()),
            digest: None,
        }
    }

    /// The tag or digest to request a manifest by; the digest wins when both are set.
    pub fn reference(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// Fill in the tag from a separate manifest field when the reference itself has none.
    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        if self.tag.is_none() {
            self.tag = tag;
        }
        self
    }

    /// Check that the reference names something fetchable.
    pub fn pinned(self) -> Result<Self, UriError> {
        if self.reference().is_none() {
            return Err(UriError::Unpinned(self.to_string()));
        }
        Ok(self)
    }

    /// `registry/repository`, the unit the fetch cache is keyed by.
    pub fn location(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for OciReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for OciReference {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UriError::Invalid(s.to_owned());
        let (_, (registry, repository, tag, digest)) = parse(s).map_err(|_| invalid())?;

        if repository.starts_with('/') || repository.ends_with('/') || repository.contains("//") {
            return Err(invalid());
        }

        Ok(OciReference {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag: tag.map(ToOwned::to_owned),
            digest: digest.map(ToOwned::to_owned),
        })
    }
}

//================================================================================================
// Functions
//================================================================================================

type Parts<'a> = (&'a str, &'a str, Option<&'a str>, Option<&'a str>);

fn parse(input: &str) -> IResult<&str, Parts<'_>> {
    all_consuming(preceded(
        opt(tag(SCHEME)),
        tuple((
            host,
            preceded(tag("/"), repository),
            opt(preceded(tag(":"), oci_tag)),
            opt(preceded(tag("@"), digest)),
        )),
    ))(input)
}

fn host(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != '/' && c != '@' && !c.is_whitespace())(input)
}

fn repository(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
    })(input)
}

fn oci_tag(input: &str) -> IResult<&str, &str> {
    take_while_m_n(1, TAG_MAX, |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
    })(input)
}

fn digest(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        tag(SHA256),
        take_while_m_n(64, 64, |c: char| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
    )))(input)
}

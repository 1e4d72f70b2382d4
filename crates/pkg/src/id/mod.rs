//! # Package Names
//!
//! Every package and every dependency declaration is addressed by a [`Name`]. Names are
//! validated once on construction, so the rest of the crate can use them as file names
//! (vendor directories, cache keys) and as import identifiers without re-checking.
//!
//! ## Validation Rules
//!
//! Names must:
//! - Not be empty and not exceed 128 bytes (measured in UTF-8 bytes)
//! - Be in Unicode Normalization Form C, so visually identical names compare equal
//! - Start with a character carrying the Unicode `XID_Start` property, or an underscore
//! - Contain only `XID_Continue` characters and hyphens (`-`) after the first character
//!
//! A hyphen is not valid in a language identifier, so packages are imported under their
//! [`Name::import_name`], with hyphens replaced by underscores. Two names with the same
//! import name would shadow each other and are treated as duplicates by the manifest.
#[cfg(test)]
mod tests;

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAME_MAX: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// A vetted String suitable for a package or dependency name.
pub struct Name(String);

/// Reasons a string is rejected as a [`Name`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The name is longer than the limit.
    #[error("a package name cannot be more than {} bytes", NAME_MAX)]
    TooLong,
    /// The name is empty.
    #[error("a package name cannot be empty")]
    Empty,
    /// The first character cannot start an identifier.
    #[error("a package name cannot start with: '{0}'")]
    InvalidStart(char),
    /// Some characters are not allowed at all.
    #[error("the package name contains invalid characters: '{0}'")]
    InvalidCharacters(String),
    /// The name is not NFC normalized.
    #[error("a package name must be in unicode normalization form C")]
    NotNormalized,
}

impl Name {
    /// The identifier the package is imported by, with `-` mapped to `_`.
    pub fn import_name(&self) -> String {
        self.0.replace('-', "_")
    }

    fn validate(s: &str) -> Result<(), Error> {
        if s.is_empty() {
            return Err(Error::Empty);
        }
        if s.len() > NAME_MAX {
            return Err(Error::TooLong);
        }
        if !unicode_normalization::is_nfc(s) {
            return Err(Error::NotNormalized);
        }

        let mut chars = s.chars();
        if let Some(c) = chars.next()
            && !(c == '_' || unicode_ident::is_xid_start(c))
        {
            return Err(Error::InvalidStart(c));
        }

        let invalid: String = chars
            .filter(|&c| !(c == '-' || unicode_ident::is_xid_continue(c)))
            .collect();
        if !invalid.is_empty() {
            return Err(Error::InvalidCharacters(invalid));
        }
        Ok(())
    }
}

impl TryFrom<String> for Name {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Name::validate(&s)?;
        Ok(Name(s))
    }
}

impl TryFrom<&str> for Name {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Name::try_from(s.to_owned())
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::try_from(s)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for Name {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

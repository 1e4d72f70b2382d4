//! OCI registry sources, speaking the distribution API directly.
//!
//! A reference is resolved by requesting its image manifest; the manifest digest is the
//! immutable identity recorded in the lock file. Every layer blob is verified against its
//! descriptor digest before it is extracted, and an artifact whose digest is already in
//! the cache is served without contacting the registry.
//!
//! Anonymous and authenticated pulls both go through the standard challenge flow: a `401`
//! carrying a `Bearer` challenge is answered by requesting a token from the advertised
//! realm (with the configured credentials, if any) and repeating the request.

use std::collections::HashMap;
use std::path::Path;

use nom::IResult;
use nom::bytes::complete::{take_till, take_while1};
use nom::character::complete::{alpha1, char, multispace0, multispace1};
use nom::multi::separated_list0;
use nom::sequence::{delimited, separated_pair, tuple};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::cache::{FetchCache, package_root};
use super::{Fetch, Fetched, Fetcher};
use crate::archive;
use crate::lock::Pinned;
use crate::manifest::OciDep;
use crate::uri::OciReference;

const MANIFEST_TYPES: &str = "application/vnd.oci.image.manifest.v1+json, \
                              application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "docker-content-digest";

//================================================================================================
// Types
//================================================================================================

/// Failures of the OCI fetcher.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The registry refused the credentials, or offered no way to obtain any.
    #[error("authentication with '{registry}' failed ({status})")]
    Auth {
        /// The registry host.
        registry: String,
        /// The final response status.
        status: StatusCode,
    },
    /// The tag or digest does not exist.
    #[error("'{reference}' not found")]
    NotFound {
        /// The full reference requested.
        reference: String,
    },
    /// Content does not hash to the digest it was requested by.
    #[error("digest mismatch for '{what}': expected {expected}, found {found}")]
    DigestMismatch {
        /// The manifest or blob being verified.
        what: String,
        /// The digest that was asked for.
        expected: String,
        /// The digest of the received bytes.
        found: String,
    },
    /// The registry answered with an unexpected status.
    #[error("registry returned {status} for '{url}'")]
    Status {
        /// The request url.
        url: String,
        /// The response status.
        status: StatusCode,
    },
    /// The manifest carries no extractable layer.
    #[error("'{0}' has no tar layers")]
    NoLayers(String),
    /// A `WWW-Authenticate` challenge could not be understood.
    #[error("unsupported registry challenge: {0}")]
    Challenge(String),
    /// The manifest document is malformed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The transfer itself failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageManifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
}

#[derive(Deserialize, Debug)]
struct Token {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
enum Auth {
    Anonymous,
    Basic,
    Bearer(String),
}

/// A conversation with one registry about one repository.
struct Session<'a> {
    fetcher: &'a Fetcher,
    reference: &'a OciReference,
    auth: Auth,
}

//================================================================================================
// Impls
//================================================================================================

impl Error {
    pub(super) fn is_transient(&self) -> bool {
        match self {
            Error::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            },
            Error::Http(e) => super::is_transient_http(e),
            _ => false,
        }
    }
}

impl Fetch for OciDep {
    async fn fetch(&self, fetcher: &Fetcher, _: &Path) -> Result<Fetched, super::Error> {
        let reference = &self.reference;
        let cache = fetcher.cache();

        if let Some(digest) = &reference.digest {
            let dir = cache.oci_dir(&reference.location(), digest);
            if dir.is_dir() {
                tracing::debug!(%reference, "oci cache hit");
                return Ok(fetched(reference, &dir, digest));
            }
        }

        let mut session = Session {
            fetcher,
            reference,
            auth: Auth::Anonymous,
        };
        let (digest, manifest) = session.manifest().await?;

        let dir = cache.oci_dir(&reference.location(), &digest);
        let _guard = cache.lock(&dir).await;
        if !dir.is_dir() {
            let layers: Vec<_> = manifest
                .layers
                .iter()
                .filter(|l| l.media_type.contains("tar"))
                .collect();
            if layers.is_empty() {
                return Err(Error::NoLayers(reference.to_string()).into());
            }

            let span = tracing::info_span!("pull", %reference);
            crate::log::set_bar(&span, "pulling layers", layers.len() as u64);
            let mut blobs = Vec::with_capacity(layers.len());
            for layer in layers {
                blobs.push(session.blob(&layer.digest).await?);
                span.pb_inc(1);
            }

            let dest = dir.clone();
            tokio::task::spawn_blocking(move || {
                FetchCache::materialize(&dest, |tmp| {
                    for blob in &blobs {
                        archive::extract_bytes(blob, tmp)?;
                    }
                    Ok::<_, super::Error>(())
                })
            })
            .await??;
        }

        tracing::info!(%reference, %digest, "resolved oci dependency");
        Ok(fetched(reference, &dir, &digest))
    }
}

impl Session<'_> {
    fn base(&self) -> String {
        let scheme = if self.fetcher.registry().plain_http {
            "http"
        } else {
            "https"
        };
        format!(
            "{scheme}://{}/v2/{}",
            self.reference.registry, self.reference.repository
        )
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        let config = self.fetcher.registry();
        if config.host != self.reference.registry {
            return None;
        }
        config.username.as_deref().zip(config.password.as_deref())
    }

    /// Fetch the manifest the reference points at, returning its digest.
    async fn manifest(&mut self) -> Result<(String, ImageManifest), Error> {
        let Some(wanted) = self.reference.reference() else {
            return Err(Error::NotFound {
                reference: self.reference.to_string(),
            });
        };
        let url = format!("{}/manifests/{wanted}", self.base());
        let res = self.get(&url, Some(MANIFEST_TYPES)).await?;
        let advertised = res
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = res.bytes().await?;

        let digest = sha256(&body);
        if let Some(expected) = &self.reference.digest
            && expected != &digest
        {
            return Err(Error::DigestMismatch {
                what: self.reference.to_string(),
                expected: expected.clone(),
                found: digest,
            });
        }
        if let Some(advertised) = advertised
            && advertised.starts_with("sha256:")
            && advertised != digest
        {
            tracing::warn!(%advertised, computed = %digest, "registry advertised a different manifest digest");
        }

        Ok((digest, serde_json::from_slice(&body)?))
    }

    async fn blob(&mut self, digest: &str) -> Result<Vec<u8>, Error> {
        let url = format!("{}/blobs/{digest}", self.base());
        let body = self.get(&url, None).await?.bytes().await?;
        let found = sha256(&body);
        if found != digest {
            return Err(Error::DigestMismatch {
                what: url,
                expected: digest.to_owned(),
                found,
            });
        }
        Ok(body.to_vec())
    }

    async fn get(&mut self, url: &str, accept: Option<&str>) -> Result<reqwest::Response, Error> {
        let mut challenged = false;
        loop {
            let mut req = self.fetcher.client().get(url);
            if let Some(accept) = accept {
                req = req.header(ACCEPT, accept);
            }
            req = match (&self.auth, self.credentials()) {
                (Auth::Bearer(token), _) => req.bearer_auth(token),
                (Auth::Basic, Some((user, pass))) => req.basic_auth(user, Some(pass)),
                _ => req,
            };

            let res = req.send().await?;
            match res.status() {
                StatusCode::UNAUTHORIZED if !challenged => {
                    challenged = true;
                    let challenge = res
                        .headers()
                        .get(WWW_AUTHENTICATE)
                        .and_then(|v| v.to_str().ok())
                        .map(ToOwned::to_owned)
                        .ok_or_else(|| self.denied(StatusCode::UNAUTHORIZED))?;
                    self.auth = self.answer(&challenge).await?;
                },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(self.denied(res.status()));
                },
                StatusCode::NOT_FOUND => {
                    return Err(Error::NotFound {
                        reference: self.reference.to_string(),
                    });
                },
                s if s.is_success() => return Ok(res),
                status => {
                    return Err(Error::Status {
                        url: url.to_owned(),
                        status,
                    });
                },
            }
        }
    }

    async fn answer(&self, challenge: &str) -> Result<Auth, Error> {
        let (scheme, params) = parse_challenge(challenge)
            .map(|(_, c)| c)
            .map_err(|_| Error::Challenge(challenge.to_owned()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "basic" if self.credentials().is_some() => Ok(Auth::Basic),
            "basic" => Err(self.denied(StatusCode::UNAUTHORIZED)),
            "bearer" => {
                let realm = params
                    .get("realm")
                    .ok_or_else(|| Error::Challenge(challenge.to_owned()))?;
                let scope = params.get("scope").map(ToString::to_string).unwrap_or_else(|| {
                    format!("repository:{}:pull", self.reference.repository)
                });
                let mut query = vec![("scope", scope)];
                if let Some(service) = params.get("service") {
                    query.push(("service", service.to_string()));
                }
                let url = url::Url::parse_with_params(realm, &query)
                    .map_err(|_| Error::Challenge(challenge.to_owned()))?;

                let mut req = self.fetcher.client().get(url);
                if let Some((user, pass)) = self.credentials() {
                    req = req.basic_auth(user, Some(pass));
                }
                let res = req.send().await?;
                if !res.status().is_success() {
                    return Err(self.denied(res.status()));
                }
                let token: Token = res.json().await?;
                token
                    .token
                    .or(token.access_token)
                    .map(Auth::Bearer)
                    .ok_or_else(|| self.denied(StatusCode::UNAUTHORIZED))
            },
            _ => Err(Error::Challenge(challenge.to_owned())),
        }
    }

    fn denied(&self, status: StatusCode) -> Error {
        Error::Auth {
            registry: self.reference.registry.clone(),
            status,
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

fn fetched(reference: &OciReference, dir: &Path, digest: &str) -> Fetched {
    Fetched {
        dir: package_root(dir),
        pinned: Pinned::Oci {
            registry: reference.registry.clone(),
            repository: reference.repository.clone(),
            digest: digest.to_owned(),
            tag: reference.tag.clone(),
        },
    }
}

fn sha256(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// `Bearer realm="https://auth",service="registry",scope="repository:a:pull"`
fn parse_challenge(input: &str) -> IResult<&str, (&str, HashMap<&str, &str>)> {
    let param = separated_pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        char('='),
        delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
    );
    let separator = tuple((multispace0, char(','), multispace0));
    let (rest, (scheme, params)) = separated_pair(
        alpha1,
        multispace1,
        separated_list0(separator, param),
    )(input.trim())?;
    Ok((rest, (scheme, params.into_iter().collect())))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bearer_challenges_parse() -> anyhow::Result<()> {
        let (_, (scheme, params)) = parse_challenge(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:kcl-lang/k8s:pull,push""#,
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(scheme, "Bearer");
        assert_eq!(params["realm"], "https://ghcr.io/token");
        assert_eq!(params["service"], "ghcr.io");
        assert_eq!(params["scope"], "repository:kcl-lang/k8s:pull,push");
        Ok(())
    }

    #[test]
    fn basic_challenge_without_params() -> anyhow::Result<()> {
        let (_, (scheme, params)) =
            parse_challenge(r#"Basic realm="registry""#).map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(scheme, "Basic");
        assert_eq!(params.len(), 1);
        Ok(())
    }

    #[test]
    fn digests_are_prefixed_sha256() {
        assert_eq!(
            sha256(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

//! Image reference parsing and normalization.
//!
//! `alpine`            => docker.io/library/alpine:latest
//! `ghcr.io/org/app:1` => ghcr.io/org/app:1
//! `alpine@sha256:...` => docker.io/library/alpine@sha256:...

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sha256:[0-9a-f]{64}$").expect("digest pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::compile("empty image reference"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(Error::compile(format!(
                        "invalid digest in image reference {:?}: expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' only starts a tag when it comes after the last '/',
        // otherwise it is a registry port.
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(pos) => {
                let split = last_segment_start + pos;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if name.is_empty() || tag.as_deref() == Some("") {
            return Err(Error::compile(format!(
                "invalid image reference {:?}",
                reference
            )));
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(Error::compile(format!(
                "invalid image reference {:?}: repository name must be lowercase",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name);

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Fully qualified name without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same reference pinned to `digest`, keeping the tag.
    pub fn with_digest(&self, digest: &str) -> Self {
        ImageReference {
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }

    pub fn has_valid_digest(&self) -> bool {
        self.digest.as_deref().is_some_and(is_valid_digest)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

pub fn is_valid_digest(digest: &str) -> bool {
    DIGEST_RE.is_match(digest)
}

fn split_registry_repository(name: &str) -> (String, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), rest.to_string());
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    (DEFAULT_REGISTRY.to_string(), repository)
}

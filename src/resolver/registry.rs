//! Registry-backed metadata resolver.
//!
//! Pulls the manifest (choosing the entry for the requested platform when the
//! reference names an index) and the config blob through `oci-distribution`.
//! Blocks the caller: each resolution runs on a private current-thread runtime.

use crate::error::{Error, ResolveError, Result};
use crate::llb::Platform;
use crate::resolver::{ImageMetaResolver, ImageReference, ResolvedImage};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};

#[derive(Debug, Clone, Default)]
pub struct RegistryResolver {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryResolver {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, anonymous otherwise.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();
        if username.is_some() && password.is_some() {
            RegistryResolver { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn auth(&self) -> RegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => RegistryAuth::Basic(u.clone(), p.clone()),
            _ => RegistryAuth::Anonymous,
        }
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        platform: &Platform,
    ) -> std::result::Result<(String, Vec<u8>), ResolveError> {
        let oci_ref: Reference = reference
            .to_string()
            .parse()
            .map_err(|e| ResolveError::NotFound(format!("invalid reference: {}", e)))?;

        let wanted = platform.clone();
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(move |entries: &[ImageIndexEntry]| {
                select_platform(entries, &wanted)
            })),
            ..Default::default()
        };
        let client = Client::new(config);
        let auth = self.auth();

        let (manifest, manifest_digest) = client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| classify(&e.to_string()))?;

        tracing::debug!(
            reference = %reference,
            digest = %manifest_digest,
            config = %manifest.config.digest,
            "pulled manifest"
        );

        let mut config_data: Vec<u8> = Vec::new();
        client
            .pull_blob(&oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| classify(&e.to_string()))?;

        Ok((manifest_digest, config_data))
    }
}

impl ImageMetaResolver for RegistryResolver {
    fn resolve(&self, reference: &str, platform: &Platform) -> Result<ResolvedImage> {
        let to_error = |source: ResolveError| Error::Resolution {
            reference: reference.to_string(),
            source,
        };

        let parsed = ImageReference::parse(reference)?;
        tracing::info!(reference = %parsed, platform = %platform, "resolving image from registry");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| to_error(ResolveError::Network(e.to_string())))?;
        let (manifest_digest, config) = runtime
            .block_on(self.fetch(&parsed, platform))
            .map_err(to_error)?;

        // A pinned reference keeps its own digest.
        let digest = match &parsed.digest {
            Some(d) if parsed.has_valid_digest() => d.clone(),
            _ => manifest_digest,
        };

        Ok(ResolvedImage {
            reference: reference.to_string(),
            digest,
            config,
        })
    }
}

/// Pick the index entry matching `platform`; variant is compared only when requested.
fn select_platform(entries: &[ImageIndexEntry], platform: &Platform) -> Option<String> {
    entries
        .iter()
        .find(|entry| {
            entry.platform.as_ref().is_some_and(|p| {
                p.os == platform.os
                    && p.architecture == platform.architecture
                    && (platform.variant.is_empty()
                        || p.variant.as_deref() == Some(platform.variant.as_str()))
            })
        })
        .map(|entry| entry.digest.clone())
}

/// Map a client error message onto the resolver's failure kinds.
fn classify(message: &str) -> ResolveError {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("denied")
    {
        ResolveError::Auth(message.to_string())
    } else if lower.contains("not found") || lower.contains("unknown") {
        ResolveError::NotFound(message.to_string())
    } else {
        ResolveError::Network(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_auth_by_default() {
        assert!(matches!(
            RegistryResolver::anonymous().auth(),
            RegistryAuth::Anonymous
        ));
    }

    #[test]
    fn basic_auth_when_both_credentials_set() {
        let r = RegistryResolver {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert!(matches!(r.auth(), RegistryAuth::Basic(_, _)));
    }

    #[test]
    fn classifies_client_errors() {
        assert!(matches!(
            classify("Not authorized: Unauthorized"),
            ResolveError::Auth(_)
        ));
        assert!(matches!(
            classify("Image manifest not found: manifest unknown"),
            ResolveError::NotFound(_)
        ));
        assert!(matches!(
            classify("error sending request: connection refused"),
            ResolveError::Network(_)
        ));
    }

    #[test]
    fn invalid_reference_fails_before_any_request() {
        let err = RegistryResolver::anonymous()
            .resolve("Not/A:Valid@Ref", &Platform::default())
            .unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }
}

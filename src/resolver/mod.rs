//! Base-image metadata resolution.
//!
//! The compiler asks a resolver for every base image it meets. Two variants:
//! - `OfflineResolver`: synthesizes deterministic metadata without any I/O
//! - `RegistryResolver`: queries the image's registry

pub mod offline;
pub mod reference;
pub mod registry;

pub use offline::{EMPTY_ROOTFS_DIGEST, OfflineResolver};
pub use reference::ImageReference;
pub use registry::RegistryResolver;

use crate::error::Result;
use crate::llb::Platform;

/// Metadata for one base image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// The reference as it was asked for.
    pub reference: String,
    /// `sha256:<hex>` content digest.
    pub digest: String,
    /// Raw image configuration JSON.
    pub config: Vec<u8>,
}

pub trait ImageMetaResolver {
    /// Resolve `reference` for `platform`. Calls are independent of each other
    /// and may arrive in any order.
    fn resolve(&self, reference: &str, platform: &Platform) -> Result<ResolvedImage>;
}

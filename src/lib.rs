//! Compile a Dockerfile into the JSON list of build-graph operations.
//!
//! Pipeline: build args (`args`) -> instruction compiler (`frontend`, `llb`)
//! with base-image metadata from a resolver (`resolver`) -> decoded nodes
//! (`compile`) -> JSON artifact (`output`).

pub mod args;
pub mod compile;
pub mod error;
pub mod frontend;
pub mod image;
pub mod llb;
pub mod output;
pub mod resolver;

pub use args::{BuildArgOverrides, BuildArgs, parse_build_arg};
pub use compile::{CompileOptions, compile, verify_acyclic};
pub use error::{Error, ResolveError, Result};
pub use llb::{OperationNode, Platform};
pub use output::{to_json, write_artifact};
pub use resolver::{ImageMetaResolver, OfflineResolver, RegistryResolver, ResolvedImage};

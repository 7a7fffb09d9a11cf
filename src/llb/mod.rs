//! Low-level build graph model.
//!
//! - `ops`: serialized record schema (what ends up in the artifact)
//! - `state`: immutable build state and marshaling into records

pub mod ops;
pub mod state;

pub use ops::{Input, Op, OpKind, OperationNode, Platform, digest_of};
pub use state::{CopyInfo, Definition, State};

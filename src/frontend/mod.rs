//! Dockerfile frontend: parsing, word expansion and conversion to build state.

pub mod convert;
pub mod parser;
pub mod shell;

pub use convert::{ConvertOpt, Converted, dockerfile_to_state};
pub use parser::{Dockerfile, Instruction};

//! Error kinds for the compilation pipeline.
//!
//! Every error is fatal: the binary prints it and exits non-zero.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed build argument {0:?}: expected key=value")]
    MalformedArgument(String),

    #[error("failed to resolve image {reference}: {source}")]
    Resolution {
        reference: String,
        #[source]
        source: ResolveError,
    },

    #[error("{}", compile_message(.line, .message))]
    Compile {
        line: Option<usize>,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a registry-backed resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),
}

impl Error {
    pub fn compile(message: impl Into<String>) -> Self {
        Error::Compile {
            line: None,
            message: message.into(),
        }
    }

    pub fn compile_at(line: usize, message: impl Into<String>) -> Self {
        Error::Compile {
            line: Some(line),
            message: message.into(),
        }
    }

    /// Attach `line` to a compile error that has none yet.
    pub fn with_line(self, line: usize) -> Self {
        match self {
            Error::Compile {
                line: None,
                message,
            } => Error::Compile {
                line: Some(line),
                message,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

fn compile_message(line: &Option<usize>, message: &str) -> String {
    match line {
        Some(line) => format!("dockerfile line {}: {}", line, message),
        None => format!("dockerfile: {}", message),
    }
}

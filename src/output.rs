//! Artifact serialization and delivery.

use crate::error::Result;
use crate::llb::OperationNode;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// JSON array of `nodes` in order. Pretty output uses two-space indentation.
pub fn to_json(nodes: &[OperationNode], pretty: bool) -> Result<Vec<u8>> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(nodes)?
    } else {
        serde_json::to_vec(nodes)?
    };
    Ok(bytes)
}

/// Write `bytes` to `path`, or to stdout followed by a single newline.
/// A new file is created with mode 0644 (before umask); an existing file is
/// truncated and keeps its permissions.
pub fn write_artifact(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            let mut options = OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o644);
            }
            let mut file = options.open(path)?;
            file.write_all(bytes)?;
            file.flush()?;
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes)?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
    }
    Ok(())
}

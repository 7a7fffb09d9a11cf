//! Compile instruction text into the ordered operation list.

use crate::args::BuildArgOverrides;
use crate::error::{Error, Result};
use crate::frontend::{ConvertOpt, dockerfile_to_state};
use crate::llb::{Op, OperationNode, Platform, digest_of};
use crate::resolver::ImageMetaResolver;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Stage to build; the last stage when `None`.
    pub target: Option<String>,
    pub platform: Platform,
}

/// Compile `instructions` into operation nodes in emission order: every node
/// appears after the nodes it references, and the last node is the terminal
/// node pointing at the target's result.
pub fn compile(
    instructions: &[u8],
    overrides: &BuildArgOverrides,
    resolver: &dyn ImageMetaResolver,
    opts: &CompileOptions,
) -> Result<Vec<OperationNode>> {
    // 1) Instructions -> build state
    let converted = dockerfile_to_state(
        instructions,
        &ConvertOpt {
            build_args: overrides,
            resolver,
            target: opts.target.as_deref(),
            platform: opts.platform.clone(),
        },
    )?;

    // 2) Build state -> serialized records
    let definition = converted.state.marshal()?;

    // 3) Decode every record; its digest is taken over the exact record bytes
    let mut nodes = Vec::with_capacity(definition.def.len());
    for (i, bytes) in definition.def.iter().enumerate() {
        let op: Op = serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("record {}: {}", i, e)))?;
        nodes.push(OperationNode {
            digest: digest_of(bytes),
            op,
        });
    }

    tracing::debug!(nodes = nodes.len(), "compiled build graph");
    Ok(nodes)
}

/// Check that every input names a node emitted earlier in the list.
pub fn verify_acyclic(nodes: &[OperationNode]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        for input in &node.op.inputs {
            if !seen.contains(input.digest.as_str()) {
                return Err(Error::compile(format!(
                    "node {} references {} which is not emitted before it",
                    i, input.digest
                )));
            }
        }
        seen.insert(node.digest.as_str());
    }
    Ok(())
}

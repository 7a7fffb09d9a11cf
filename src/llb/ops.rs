//! Serialized operation records.
//!
//! JSON shape of one record (field names follow the solver's wire schema):
//! {
//!   "inputs": [{"digest": "sha256:...", "index": 0}],
//!   "Op": {"exec": {...}} | {"source": {...}} | {"file": {...}} | {"build": {...}},
//!   "platform": {"Architecture": "amd64", "OS": "linux"},
//!   "constraints": {}
//! }
//!
//! The terminal record of a definition carries only `inputs`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
    #[serde(rename = "Op", default, skip_serializing_if = "Option::is_none")]
    pub op: Option<OpKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<WorkerConstraints>,
}

/// Reference to output `index` of the record identified by `digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub digest: String,
    pub index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Exec(ExecOp),
    Source(SourceOp),
    File(FileOp),
    Build(BuildOp),
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Exec(_) => "exec",
            OpKind::Source(_) => "source",
            OpKind::File(_) => "file",
            OpKind::Build(_) => "build",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOp {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecOp {
    pub meta: Meta,
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    /// Position in the owning record's `inputs`, -1 for an empty mount.
    pub input: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    pub dest: String,
    /// Output slot produced by this mount, -1 if the mount is not captured.
    pub output: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOp {
    pub actions: Vec<FileAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAction {
    pub input: i64,
    #[serde(rename = "secondaryInput")]
    pub secondary_input: i64,
    pub output: i64,
    #[serde(rename = "Action")]
    pub action: FileActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileActionKind {
    Copy(FileActionCopy),
    Mkdir(FileActionMkdir),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileActionCopy {
    pub src: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ChownOpt>,
    pub mode: i32,
    pub follow_symlink: bool,
    pub dir_copy_contents: bool,
    pub create_dest_path: bool,
    pub allow_wildcard: bool,
    pub allow_empty_wildcard: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChownOpt {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileActionMkdir {
    pub path: String,
    pub mode: i32,
    pub make_parents: bool,
    pub timestamp: i64,
}

/// Nested build of another definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOp {
    pub builder: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    #[serde(rename = "Architecture")]
    pub architecture: String,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "Variant", default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
}

impl Platform {
    pub fn linux_amd64() -> Self {
        Platform {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            variant: String::new(),
        }
    }

    /// Parse `os/arch[/variant]`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Platform {
                architecture: arch.to_string(),
                os: os.to_string(),
                variant: String::new(),
            }),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() => Ok(Platform {
                architecture: arch.to_string(),
                os: os.to_string(),
                variant: variant.to_string(),
            }),
            _ => Err(Error::compile(format!(
                "invalid platform {:?}: expected os/arch[/variant]",
                s
            ))),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::linux_amd64()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if !self.variant.is_empty() {
            write!(f, "/{}", self.variant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConstraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
}

/// One node of the emitted build graph: a decoded record plus its content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationNode {
    pub digest: String,
    #[serde(flatten)]
    pub op: Op,
}

/// `sha256:<hex>` of a serialized record.
pub fn digest_of(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn is_false(b: &bool) -> bool {
    !*b
}

//! Immutable build state and its marshaling into serialized records.
//!
//! A `State` points at one output of a vertex. Vertices are shared through
//! `Rc` and never mutated, so deriving a new state (run, copy, mkdir) leaves
//! every earlier state valid.

use crate::error::Result;
use crate::llb::ops::{
    ChownOpt, ExecOp, FileAction, FileActionCopy, FileActionKind, FileActionMkdir, FileOp, Input,
    Meta, Mount, Op, OpKind, Platform, SourceOp, WorkerConstraints, digest_of,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug)]
struct Vertex {
    kind: OpKind,
    inputs: Vec<Output>,
    platform: Option<Platform>,
}

#[derive(Debug, Clone)]
struct Output {
    vertex: Rc<Vertex>,
    index: i64,
}

#[derive(Debug, Clone)]
pub struct State {
    output: Option<Output>,
    platform: Platform,
}

/// Options for a copy between two states.
#[derive(Debug, Clone, Default)]
pub struct CopyInfo {
    pub owner: Option<ChownOpt>,
    pub mode: Option<i32>,
}

/// Ordered serialized records; the last one is the terminal record.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub def: Vec<Vec<u8>>,
}

impl State {
    pub fn scratch(platform: &Platform) -> Self {
        State {
            output: None,
            platform: platform.clone(),
        }
    }

    pub fn source(
        identifier: impl Into<String>,
        attrs: BTreeMap<String, String>,
        platform: &Platform,
    ) -> Self {
        let vertex = Vertex {
            kind: OpKind::Source(SourceOp {
                identifier: identifier.into(),
                attrs,
            }),
            inputs: Vec::new(),
            platform: Some(platform.clone()),
        };
        State::from_vertex(vertex, platform)
    }

    /// `docker-image://` source for an already normalized (and usually pinned) reference.
    pub fn image(reference: &str, platform: &Platform) -> Self {
        State::source(format!("docker-image://{}", reference), BTreeMap::new(), platform)
    }

    /// Client-side directory named `name` (e.g. the build context).
    pub fn local(name: &str, platform: &Platform) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("local.sharedkeyhint".to_string(), name.to_string());
        State::source(format!("local://{}", name), attrs, platform)
    }

    pub fn http(url: &str, filename: Option<&str>, platform: &Platform) -> Self {
        let mut attrs = BTreeMap::new();
        if let Some(name) = filename {
            attrs.insert("http.filename".to_string(), name.to_string());
        }
        State::source(url.to_string(), attrs, platform)
    }

    pub fn is_scratch(&self) -> bool {
        self.output.is_none()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Run a command with this state mounted read-write at `/`.
    pub fn run(&self, meta: Meta) -> State {
        let mut inputs = Vec::new();
        let root_input = push_input(&mut inputs, &self.output);
        let vertex = Vertex {
            kind: OpKind::Exec(ExecOp {
                meta,
                mounts: vec![Mount {
                    input: root_input,
                    selector: String::new(),
                    dest: "/".to_string(),
                    output: 0,
                    readonly: false,
                }],
            }),
            inputs,
            platform: Some(self.platform.clone()),
        };
        State::from_vertex(vertex, &self.platform)
    }

    /// Copy `src_path` out of `src` into `dest` of this state.
    pub fn copy(&self, src: &State, src_path: &str, dest: &str, info: &CopyInfo) -> State {
        self.copy_all(&[(src, src_path)], dest, info)
    }

    /// Copy several sources into `dest` as one file op. Actions are chained:
    /// each one works on the previous action's result and only the last
    /// produces an output.
    pub fn copy_all(&self, sources: &[(&State, &str)], dest: &str, info: &CopyInfo) -> State {
        let mut inputs = Vec::new();
        let primary = push_input(&mut inputs, &self.output);
        let secondaries: Vec<i64> = sources
            .iter()
            .map(|(src, _)| shared_input(&mut inputs, &src.output))
            .collect();

        let n_inputs = inputs.len() as i64;
        let last = sources.len().saturating_sub(1);
        let actions = sources
            .iter()
            .zip(secondaries)
            .enumerate()
            .map(|(i, ((_, src_path), secondary_input))| FileAction {
                input: if i == 0 { primary } else { n_inputs + i as i64 - 1 },
                secondary_input,
                output: if i == last { 0 } else { -1 },
                action: FileActionKind::Copy(FileActionCopy {
                    src: src_path.to_string(),
                    dest: dest.to_string(),
                    owner: info.owner.clone(),
                    mode: info.mode.unwrap_or(-1),
                    follow_symlink: true,
                    dir_copy_contents: true,
                    create_dest_path: true,
                    allow_wildcard: true,
                    allow_empty_wildcard: true,
                    timestamp: -1,
                }),
            })
            .collect();
        self.file(actions, inputs)
    }

    pub fn mkdir(&self, path: &str, mode: i32) -> State {
        let mut inputs = Vec::new();
        let input = push_input(&mut inputs, &self.output);
        let action = FileAction {
            input,
            secondary_input: -1,
            output: 0,
            action: FileActionKind::Mkdir(FileActionMkdir {
                path: path.to_string(),
                mode,
                make_parents: true,
                timestamp: -1,
            }),
        };
        self.file(vec![action], inputs)
    }

    fn file(&self, actions: Vec<FileAction>, inputs: Vec<Output>) -> State {
        let vertex = Vertex {
            kind: OpKind::File(FileOp { actions }),
            inputs,
            platform: Some(self.platform.clone()),
        };
        State::from_vertex(vertex, &self.platform)
    }

    fn from_vertex(vertex: Vertex, platform: &Platform) -> Self {
        State {
            output: Some(Output {
                vertex: Rc::new(vertex),
                index: 0,
            }),
            platform: platform.clone(),
        }
    }

    /// Serialize every record reachable from this state, inputs first,
    /// followed by a terminal record pointing at this state's output.
    pub fn marshal(&self) -> Result<Definition> {
        let mut m = Marshaler::default();
        let mut terminal_inputs = Vec::new();
        if let Some(out) = &self.output {
            let digest = m.visit(&out.vertex)?;
            terminal_inputs.push(Input {
                digest,
                index: out.index,
            });
        }

        let terminal = Op {
            inputs: terminal_inputs,
            op: None,
            platform: None,
            constraints: None,
        };
        m.def.push(serde_json::to_vec(&terminal)?);

        tracing::debug!(records = m.def.len(), "marshaled build state");
        Ok(Definition { def: m.def })
    }
}

fn push_input(inputs: &mut Vec<Output>, output: &Option<Output>) -> i64 {
    match output {
        Some(out) => {
            inputs.push(out.clone());
            (inputs.len() - 1) as i64
        }
        None => -1,
    }
}

/// Like `push_input`, but reuses an existing slot for the same output.
fn shared_input(inputs: &mut Vec<Output>, output: &Option<Output>) -> i64 {
    let Some(out) = output else {
        return -1;
    };
    let existing = inputs
        .iter()
        .position(|o| Rc::ptr_eq(&o.vertex, &out.vertex) && o.index == out.index);
    match existing {
        Some(pos) => pos as i64,
        None => push_input(inputs, output),
    }
}

#[derive(Default)]
struct Marshaler {
    digests: HashMap<*const Vertex, String>,
    emitted: HashSet<String>,
    def: Vec<Vec<u8>>,
}

impl Marshaler {
    fn visit(&mut self, vertex: &Rc<Vertex>) -> Result<String> {
        let key = Rc::as_ptr(vertex);
        if let Some(digest) = self.digests.get(&key) {
            return Ok(digest.clone());
        }

        let mut inputs = Vec::with_capacity(vertex.inputs.len());
        for input in &vertex.inputs {
            inputs.push(Input {
                digest: self.visit(&input.vertex)?,
                index: input.index,
            });
        }

        let op = Op {
            inputs,
            op: Some(vertex.kind.clone()),
            platform: vertex.platform.clone(),
            constraints: Some(WorkerConstraints::default()),
        };
        let bytes = serde_json::to_vec(&op)?;
        let digest = digest_of(&bytes);

        // Content-identical vertices built separately collapse to one record.
        if self.emitted.insert(digest.clone()) {
            tracing::trace!(digest = %digest, kind = vertex.kind.name(), "emit record");
            self.def.push(bytes);
        }
        self.digests.insert(key, digest.clone());
        Ok(digest)
    }
}

//! Dockerfile to build-state conversion.
//!
//! Stages are converted lazily starting from the target, so stages the target
//! does not depend on never reach the resolver. Each distinct base image
//! reference is resolved once per platform.

use crate::args::BuildArgOverrides;
use crate::error::{Error, Result};
use crate::frontend::parser::{Command, CopyArgs, Dockerfile, HealthCheck, Instruction, Line};
use crate::frontend::shell::{Vars, process_word, process_words};
use crate::image::{DEFAULT_PATH_ENV, HealthConfig, ImageConfig};
use crate::llb::ops::{ChownOpt, Meta};
use crate::llb::{CopyInfo, Platform, State};
use crate::resolver::{ImageMetaResolver, ImageReference};
use std::collections::{BTreeSet, HashMap};

/// Name of the client-side source holding the build context.
pub const CONTEXT_NAME: &str = "context";

const DEFAULT_SHELL: [&str; 2] = ["/bin/sh", "-c"];

pub struct ConvertOpt<'a> {
    pub build_args: &'a BuildArgOverrides,
    pub resolver: &'a dyn ImageMetaResolver,
    /// Stage name to build; the last stage when `None`.
    pub target: Option<&'a str>,
    pub platform: Platform,
}

/// The target stage's final state and image configuration.
#[derive(Debug, Clone)]
pub struct Converted {
    pub state: State,
    pub image: ImageConfig,
}

struct StageDef {
    name: Option<String>,
    line: usize,
    base: String,
    platform: Option<String>,
    body: Vec<Line>,
}

pub fn dockerfile_to_state(source: &[u8], opt: &ConvertOpt<'_>) -> Result<Converted> {
    let text = std::str::from_utf8(source)
        .map_err(|e| Error::compile(format!("input is not valid UTF-8: {}", e)))?;
    let dockerfile = Dockerfile::parse(text)?;

    // 1) Split into global ARGs and stages
    let mut globals = Vec::new();
    let mut stages: Vec<StageDef> = Vec::new();
    for line in dockerfile.lines {
        if let Instruction::From {
            image,
            alias,
            platform,
        } = &line.instruction
        {
            if let Some(name) = alias {
                if stages.iter().any(|s| s.name.as_ref() == Some(name)) {
                    return Err(Error::compile_at(
                        line.number,
                        format!("duplicate stage name {:?}", name),
                    ));
                }
            }
            stages.push(StageDef {
                name: alias.clone(),
                line: line.number,
                base: image.clone(),
                platform: platform.clone(),
                body: Vec::new(),
            });
            continue;
        }
        match stages.last_mut() {
            Some(stage) => stage.body.push(line),
            None => globals.push(line),
        }
    }
    if stages.is_empty() {
        return Err(Error::compile("no FROM instruction"));
    }

    // 2) Global scope: automatic platform args, then global ARGs
    let mut conv = Converter {
        done: vec![None; stages.len()],
        stages,
        globals: automatic_args(&opt.platform, &Platform::default()),
        overrides: opt.build_args,
        resolver: opt.resolver,
        platform: opt.platform.clone(),
        used: BTreeSet::new(),
        images: HashMap::new(),
    };
    for line in &globals {
        let Instruction::Arg { args } = &line.instruction else {
            continue;
        };
        for (name, default) in args {
            let fallback = conv.globals.get(name).cloned();
            let vars = conv.globals.clone();
            let value = conv
                .arg_value(name, default.as_deref(), &vars, fallback)
                .map_err(|e| e.with_line(line.number))?;
            if let Some(value) = value {
                conv.globals.insert(name.clone(), value);
            }
        }
    }

    // 3) Target stage
    let target = match opt.target {
        Some(name) => {
            let wanted = name.to_lowercase();
            conv.stages
                .iter()
                .position(|s| s.name.as_deref() == Some(wanted.as_str()))
                .ok_or_else(|| Error::compile(format!("target stage {:?} not found", name)))?
        }
        None => conv.stages.len() - 1,
    };
    let converted = conv.convert_stage(target)?;

    // 4) Report overrides that no ARG consumed
    for key in opt.build_args.keys() {
        if !conv.used.contains(key) {
            tracing::warn!(arg = %key, "build argument was not consumed by any ARG");
        }
    }

    Ok(converted)
}

struct Converter<'a> {
    stages: Vec<StageDef>,
    done: Vec<Option<Converted>>,
    globals: Vars,
    overrides: &'a BuildArgOverrides,
    resolver: &'a dyn ImageMetaResolver,
    platform: Platform,
    used: BTreeSet<String>,
    images: HashMap<(String, Platform), (String, ImageConfig)>,
}

/// Per-stage conversion state.
struct Stage {
    state: State,
    image: ImageConfig,
    platform: Platform,
    args: Vars,
    shell: Vec<String>,
    cmd_set: bool,
}

impl Stage {
    fn new(state: State, image: ImageConfig, platform: Platform) -> Self {
        let shell = image
            .config
            .shell
            .clone()
            .unwrap_or_else(|| DEFAULT_SHELL.iter().map(|s| s.to_string()).collect());
        Stage {
            state,
            image,
            platform,
            args: Vars::new(),
            shell,
            cmd_set: false,
        }
    }

    /// Expansion scope: declared args overlaid by the environment.
    fn vars(&self) -> Vars {
        let mut vars = self.args.clone();
        vars.extend(self.image.env_pairs());
        vars
    }

    fn cwd(&self) -> String {
        self.image
            .config
            .working_dir
            .clone()
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Image environment followed by declared args the environment does not shadow.
    fn run_env(&self) -> Vec<String> {
        let env = self.image.env_pairs();
        let mut out: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        for (key, value) in &self.args {
            if !env.iter().any(|(k, _)| k == key) {
                out.push(format!("{}={}", key, value));
            }
        }
        out
    }

    fn command(&self, command: &Command) -> Vec<String> {
        match command {
            Command::Shell(line) => {
                let mut args = self.shell.clone();
                args.push(line.clone());
                args
            }
            Command::Exec(args) => args.clone(),
        }
    }
}

impl Converter<'_> {
    fn convert_stage(&mut self, idx: usize) -> Result<Converted> {
        if let Some(done) = &self.done[idx] {
            return Ok(done.clone());
        }

        let def = &self.stages[idx];
        let (line, name) = (def.line, def.name.clone());
        let raw_base = def.base.clone();
        let raw_platform = def.platform.clone();
        let body = def.body.clone();

        let base = process_word(&raw_base, &self.globals).map_err(|e| e.with_line(line))?;
        if base.is_empty() {
            return Err(Error::compile_at(line, "FROM expands to an empty image name"));
        }
        let platform = match raw_platform {
            Some(raw) => process_word(&raw, &self.globals)
                .and_then(|p| Platform::parse(&p))
                .map_err(|e| e.with_line(line))?,
            None => self.platform.clone(),
        };

        tracing::debug!(
            stage = idx,
            name = name.as_deref().unwrap_or(""),
            base = %base,
            platform = %platform,
            "converting stage"
        );

        let (state, image) = self
            .base_state(idx, &base, &platform)
            .map_err(|e| e.with_line(line))?;
        let mut stage = Stage::new(state, image, platform);
        for line in &body {
            self.apply(idx, &mut stage, line)
                .map_err(|e| e.with_line(line.number))?;
        }

        let converted = Converted {
            state: stage.state,
            image: stage.image,
        };
        self.done[idx] = Some(converted.clone());
        Ok(converted)
    }

    fn earlier_stage(&self, idx: usize, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.stages[..idx]
            .iter()
            .position(|s| s.name.as_deref() == Some(name.as_str()))
    }

    fn base_state(
        &mut self,
        idx: usize,
        base: &str,
        platform: &Platform,
    ) -> Result<(State, ImageConfig)> {
        if base.eq_ignore_ascii_case("scratch") {
            return Ok((State::scratch(platform), scratch_image(platform)));
        }
        if let Some(dep) = self.earlier_stage(idx, base) {
            let converted = self.convert_stage(dep)?;
            return Ok((converted.state, converted.image));
        }
        let (pinned, image) = self.resolve_image(base, platform)?;
        Ok((State::image(&pinned, platform), image))
    }

    /// Resolve `reference` once per platform. Returns the pinned reference and its config.
    fn resolve_image(
        &mut self,
        reference: &str,
        platform: &Platform,
    ) -> Result<(String, ImageConfig)> {
        let parsed = ImageReference::parse(reference)?;
        let key = (parsed.to_string(), platform.clone());
        if let Some(hit) = self.images.get(&key) {
            return Ok(hit.clone());
        }

        let resolved = self.resolver.resolve(&key.0, platform)?;
        let image: ImageConfig = serde_json::from_slice(&resolved.config).map_err(|e| {
            Error::Serialization(format!("image config for {}: {}", key.0, e))
        })?;
        let pinned = parsed.with_digest(&resolved.digest).to_string();
        tracing::info!(reference = %key.0, digest = %resolved.digest, "resolved base image");

        self.images.insert(key, (pinned.clone(), image.clone()));
        Ok((pinned, image))
    }

    /// Value of an `ARG`: override, then expanded default, then `fallback`.
    fn arg_value(
        &mut self,
        name: &str,
        default: Option<&str>,
        vars: &Vars,
        fallback: Option<String>,
    ) -> Result<Option<String>> {
        if let Some(value) = self.overrides.get(name) {
            self.used.insert(name.to_string());
            return Ok(Some(value.clone()));
        }
        match default {
            Some(default) => Ok(Some(process_word(default, vars)?)),
            None => Ok(fallback),
        }
    }

    fn apply(&mut self, idx: usize, stage: &mut Stage, line: &Line) -> Result<()> {
        match &line.instruction {
            Instruction::From { .. } => {
                return Err(Error::compile("FROM inside a stage body"));
            }
            Instruction::Arg { args } => {
                for (name, default) in args {
                    let fallback = self.globals.get(name).cloned();
                    let value = self.arg_value(name, default.as_deref(), &stage.vars(), fallback)?;
                    if let Some(value) = value {
                        stage.args.insert(name.clone(), value);
                    }
                }
            }
            Instruction::Run { command } => {
                let meta = Meta {
                    args: stage.command(command),
                    env: stage.run_env(),
                    cwd: stage.cwd(),
                    user: stage.image.config.user.clone().unwrap_or_default(),
                };
                tracing::trace!(line = line.number, args = ?meta.args, "RUN");
                stage.state = stage.state.run(meta);
            }
            Instruction::Copy(copy) => self.copy(idx, stage, copy, false)?,
            Instruction::Add(copy) => self.copy(idx, stage, copy, true)?,
            Instruction::Env { pairs } => {
                let vars = stage.vars();
                for (key, value) in pairs {
                    let value = process_word(value, &vars)?;
                    stage.image.set_env(key, &value);
                }
            }
            Instruction::Label { pairs } => {
                let vars = stage.vars();
                for (key, value) in pairs {
                    let key = process_word(key, &vars)?;
                    let value = process_word(value, &vars)?;
                    stage.image.add_label(&key, &value);
                }
            }
            Instruction::Workdir { path } => {
                let path = process_word(path, &stage.vars())?;
                let path = resolve_path(&stage.cwd(), &path);
                stage.state = stage.state.mkdir(&path, 0o755);
                stage.image.config.working_dir = Some(path);
            }
            Instruction::User { user } => {
                stage.image.config.user = Some(process_word(user, &stage.vars())?);
            }
            Instruction::Expose { ports } => {
                let vars = stage.vars();
                for port in ports {
                    for port in process_words(port, &vars)? {
                        stage.image.add_exposed_port(&port);
                    }
                }
            }
            Instruction::Cmd { command } => {
                stage.image.config.cmd = Some(stage.command(command));
                stage.cmd_set = true;
            }
            Instruction::Entrypoint { command } => {
                stage.image.config.entrypoint = Some(stage.command(command));
                // An inherited CMD does not survive a new ENTRYPOINT.
                if !stage.cmd_set {
                    stage.image.config.cmd = None;
                }
            }
            Instruction::Shell { shell } => {
                stage.shell = shell.clone();
                stage.image.config.shell = Some(shell.clone());
            }
            Instruction::Volume { paths } => {
                let vars = stage.vars();
                for path in paths {
                    stage.image.add_volume(&process_word(path, &vars)?);
                }
            }
            Instruction::StopSignal { signal } => {
                stage.image.config.stop_signal = Some(process_word(signal, &stage.vars())?);
            }
            Instruction::Healthcheck { check } => {
                stage.image.config.healthcheck = Some(health_config(check.as_ref())?);
            }
            Instruction::Maintainer { name } => {
                stage.image.author = Some(name.clone());
            }
        }
        Ok(())
    }

    fn copy(&mut self, idx: usize, stage: &mut Stage, args: &CopyArgs, is_add: bool) -> Result<()> {
        let vars = stage.vars();
        let dest = process_word(&args.dest, &vars)?;
        let mut sources = Vec::with_capacity(args.sources.len());
        for src in &args.sources {
            sources.push(process_word(src, &vars)?);
        }
        // `.` and an empty destination name the working directory itself.
        let dest = if dest.is_empty() {
            "./".to_string()
        } else if dest == "." || dest.ends_with("/.") {
            format!("{}/", dest)
        } else {
            dest
        };
        if sources.len() > 1 && !dest.ends_with('/') {
            return Err(Error::compile(
                "with more than one source the destination must be a directory ending in /",
            ));
        }

        let mut dest_path = resolve_path(&stage.cwd(), &dest);
        if dest.ends_with('/') && !dest_path.ends_with('/') {
            dest_path.push('/');
        }

        let owner = match &args.chown {
            Some(raw) => Some(chown(&process_word(raw, &vars)?)),
            None => None,
        };
        let mode = args.chmod.as_deref().map(parse_mode).transpose()?;
        let info = CopyInfo { owner, mode };

        let from = match &args.from {
            Some(raw) => Some(self.copy_source(idx, &process_word(raw, &vars)?, &stage.platform)?),
            None => None,
        };
        let context = State::local(CONTEXT_NAME, &stage.platform);

        let mut srcs: Vec<(State, String)> = Vec::with_capacity(sources.len());
        for src in &sources {
            if is_add && is_url(src) {
                let filename = url_filename(src);
                let st = State::http(src, filename.as_deref(), &stage.platform);
                srcs.push((st, format!("/{}", filename.unwrap_or_default())));
            } else {
                let st = from.clone().unwrap_or_else(|| context.clone());
                srcs.push((st, resolve_path("/", src)));
            }
        }

        let refs: Vec<(&State, &str)> = srcs.iter().map(|(s, p)| (s, p.as_str())).collect();
        stage.state = stage.state.copy_all(&refs, &dest_path, &info);
        Ok(())
    }

    /// `--from` target: stage index, earlier stage name, or an image reference.
    fn copy_source(&mut self, idx: usize, from: &str, platform: &Platform) -> Result<State> {
        if let Ok(n) = from.parse::<usize>() {
            if n >= idx {
                return Err(Error::compile(format!(
                    "--from={} does not name an earlier stage",
                    n
                )));
            }
            return Ok(self.convert_stage(n)?.state);
        }
        if let Some(dep) = self.earlier_stage(idx, from) {
            return Ok(self.convert_stage(dep)?.state);
        }
        let (pinned, _) = self.resolve_image(from, platform)?;
        Ok(State::image(&pinned, platform))
    }
}

fn automatic_args(target: &Platform, build: &Platform) -> Vars {
    let mut vars = Vars::new();
    vars.insert("TARGETPLATFORM".to_string(), target.to_string());
    vars.insert("TARGETOS".to_string(), target.os.clone());
    vars.insert("TARGETARCH".to_string(), target.architecture.clone());
    vars.insert("TARGETVARIANT".to_string(), target.variant.clone());
    vars.insert("BUILDPLATFORM".to_string(), build.to_string());
    vars.insert("BUILDOS".to_string(), build.os.clone());
    vars.insert("BUILDARCH".to_string(), build.architecture.clone());
    vars.insert("BUILDVARIANT".to_string(), build.variant.clone());
    vars
}

fn scratch_image(platform: &Platform) -> ImageConfig {
    let mut image = ImageConfig {
        architecture: platform.architecture.clone(),
        os: platform.os.clone(),
        variant: Some(platform.variant.clone()).filter(|v| !v.is_empty()),
        ..ImageConfig::default()
    };
    image.config.env = Some(vec![DEFAULT_PATH_ENV.to_string()]);
    image
}

fn health_config(check: Option<&HealthCheck>) -> Result<HealthConfig> {
    let Some(check) = check else {
        return Ok(HealthConfig {
            test: vec!["NONE".to_string()],
            ..HealthConfig::default()
        });
    };

    let test = match &check.command {
        Command::Shell(line) => vec!["CMD-SHELL".to_string(), line.clone()],
        Command::Exec(args) => std::iter::once("CMD".to_string())
            .chain(args.iter().cloned())
            .collect(),
    };
    let retries = check
        .options
        .get("retries")
        .map(|r| {
            r.parse::<u32>()
                .map_err(|_| Error::compile(format!("invalid HEALTHCHECK --retries {:?}", r)))
        })
        .transpose()?;

    let duration = |name: &str| {
        check
            .options
            .get(name)
            .map(|raw| {
                parse_duration(raw).map_err(|e| {
                    Error::compile(format!("invalid HEALTHCHECK --{} {:?}: {}", name, raw, e))
                })
            })
            .transpose()
    };

    Ok(HealthConfig {
        test,
        interval: duration("interval")?,
        timeout: duration("timeout")?,
        start_period: duration("start-period")?,
        retries,
    })
}

/// Parse a duration such as `30s`, `1m30s` or `1.5h` into nanoseconds.
fn parse_duration(raw: &str) -> std::result::Result<i64, &'static str> {
    if raw == "0" {
        return Ok(0);
    }
    let mut rest = raw;
    let mut total: f64 = 0.0;
    if rest.is_empty() {
        return Err("empty duration");
    }
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or("missing unit")?;
        let value: f64 = rest[..num_len].parse().map_err(|_| "bad number")?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err("unknown unit"),
        };
        total += value * scale;
        rest = &rest[unit_len..];
    }
    if total > i64::MAX as f64 {
        return Err("duration out of range");
    }
    Ok(total.round() as i64)
}

/// Join `path` onto `cwd` and normalize `.` and `..` components.
fn resolve_path(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn chown(raw: &str) -> ChownOpt {
    match raw.split_once(':') {
        Some((user, group)) => ChownOpt {
            user: user.to_string(),
            group: Some(group.to_string()),
        },
        None => ChownOpt {
            user: raw.to_string(),
            group: None,
        },
    }
}

fn parse_mode(raw: &str) -> Result<i32> {
    i32::from_str_radix(raw, 8)
        .map_err(|_| Error::compile(format!("invalid --chmod {:?}: expected an octal mode", raw)))
}

fn is_url(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

fn url_filename(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = rest.split(['?', '#']).next().unwrap_or_default();
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llb::ops::{FileActionKind, Op, OpKind};
    use crate::resolver::{EMPTY_ROOTFS_DIGEST, OfflineResolver, ResolvedImage};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recording {
        calls: RefCell<Vec<String>>,
    }

    impl ImageMetaResolver for Recording {
        fn resolve(&self, reference: &str, platform: &Platform) -> Result<ResolvedImage> {
            self.calls.borrow_mut().push(reference.to_string());
            OfflineResolver.resolve(reference, platform)
        }
    }

    fn convert_with(src: &str, overrides: &[(&str, &str)], target: Option<&str>) -> Result<Converted> {
        let build_args: BuildArgOverrides = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let resolver = OfflineResolver::new();
        dockerfile_to_state(
            src.as_bytes(),
            &ConvertOpt {
                build_args: &build_args,
                resolver: &resolver,
                target,
                platform: Platform::default(),
            },
        )
    }

    fn convert(src: &str) -> Converted {
        convert_with(src, &[], None).unwrap()
    }

    fn ops(c: &Converted) -> Vec<Op> {
        c.state
            .marshal()
            .unwrap()
            .def
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect()
    }

    fn sources(c: &Converted) -> Vec<String> {
        ops(c)
            .into_iter()
            .filter_map(|o| match o.op {
                Some(OpKind::Source(s)) => Some(s.identifier),
                _ => None,
            })
            .collect()
    }

    fn last_exec_env(c: &Converted) -> Vec<String> {
        ops(c)
            .into_iter()
            .filter_map(|o| match o.op {
                Some(OpKind::Exec(e)) => Some(e.meta.env),
                _ => None,
            })
            .last()
            .expect("exec op")
    }

    #[test]
    fn base_image_is_pinned() {
        let c = convert("FROM alpine\nRUN echo hi\n");
        assert_eq!(
            sources(&c),
            vec![format!(
                "docker-image://docker.io/library/alpine:latest@{}",
                EMPTY_ROOTFS_DIGEST
            )]
        );
        let exec = ops(&c)
            .into_iter()
            .find_map(|o| match o.op {
                Some(OpKind::Exec(e)) => Some(e),
                _ => None,
            })
            .unwrap();
        assert_eq!(exec.meta.args, vec!["/bin/sh", "-c", "echo hi"]);
        assert_eq!(exec.meta.cwd, "/");
    }

    #[test]
    fn global_arg_override_reaches_from() {
        let src = "ARG TAG=3.18\nFROM alpine:${TAG}\n";
        let c = convert_with(src, &[("TAG", "3.19")], None).unwrap();
        assert!(sources(&c)[0].contains("alpine:3.19@"));
        let c = convert(src);
        assert!(sources(&c)[0].contains("alpine:3.18@"));
    }

    #[test]
    fn stage_arg_reaches_run_env() {
        let src = "FROM alpine\nARG V=1\nRUN echo $V\n";
        let env = last_exec_env(&convert_with(src, &[("V", "2")], None).unwrap());
        assert!(env.contains(&"V=2".to_string()));
        let env = last_exec_env(&convert(src));
        assert!(env.contains(&"V=1".to_string()));
    }

    #[test]
    fn global_arg_needs_redeclaration() {
        let env = last_exec_env(&convert("ARG X=1\nFROM alpine\nRUN true\n"));
        assert!(!env.iter().any(|e| e.starts_with("X=")));
        let env = last_exec_env(&convert("ARG X=1\nFROM alpine\nARG X\nRUN true\n"));
        assert!(env.contains(&"X=1".to_string()));
    }

    #[test]
    fn env_shadows_arg_in_run_env() {
        let env = last_exec_env(&convert("FROM alpine\nARG A=arg\nENV A=env\nRUN true\n"));
        assert_eq!(env.iter().filter(|e| e.starts_with("A=")).count(), 1);
        assert!(env.contains(&"A=env".to_string()));
    }

    #[test]
    fn automatic_platform_args() {
        let env = last_exec_env(&convert("FROM alpine\nARG TARGETARCH\nRUN true\n"));
        assert!(env.contains(&"TARGETARCH=amd64".to_string()));
    }

    #[test]
    fn copy_from_stage_references_both_stages() {
        let src = "FROM golang AS build\nRUN go build -o /out/app\n\
                   FROM alpine\nCOPY --from=build /out/app /usr/bin/app\n";
        let c = convert(src);
        let all = ops(&c);
        let copy = all
            .iter()
            .find(|o| matches!(o.op, Some(OpKind::File(_))))
            .unwrap();
        assert_eq!(copy.inputs.len(), 2);
        assert_eq!(sources(&c).len(), 2);
        let Some(OpKind::File(file)) = &copy.op else {
            unreachable!()
        };
        let FileActionKind::Copy(action) = &file.actions[0].action else {
            panic!("expected copy action");
        };
        assert_eq!(action.src, "/out/app");
        assert_eq!(action.dest, "/usr/bin/app");
    }

    #[test]
    fn copy_from_index_and_unknown_index() {
        let src = "FROM alpine\nRUN true\nFROM alpine\nCOPY --from=0 /a /b\n";
        assert_eq!(sources(&convert(src)).len(), 1);
        let err = convert_with("FROM alpine\nCOPY --from=3 /a /b\n", &[], None).unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
    }

    #[test]
    fn copy_from_context_uses_local_source() {
        let c = convert("FROM alpine\nWORKDIR /app\nCOPY . .\nCOPY a.txt b.txt sub/\n");
        assert!(sources(&c).contains(&"local://context".to_string()));
        let dests: Vec<String> = ops(&c)
            .into_iter()
            .filter_map(|o| match o.op {
                Some(OpKind::File(f)) => Some(f.actions),
                _ => None,
            })
            .flatten()
            .filter_map(|a| match a.action {
                FileActionKind::Copy(c) => Some(c.dest),
                _ => None,
            })
            .collect();
        assert_eq!(dests, vec!["/app/", "/app/sub/", "/app/sub/"]);
    }

    #[test]
    fn dot_destination_is_a_directory() {
        let c = convert("FROM node\nWORKDIR /app\nCOPY package.json package-lock.json .\n");
        let dests: Vec<String> = ops(&c)
            .into_iter()
            .filter_map(|o| match o.op {
                Some(OpKind::File(f)) => Some(f.actions),
                _ => None,
            })
            .flatten()
            .filter_map(|a| match a.action {
                FileActionKind::Copy(c) => Some(c.dest),
                _ => None,
            })
            .collect();
        assert_eq!(dests, vec!["/app/", "/app/"]);
    }

    #[test]
    fn multi_source_copy_needs_directory_dest() {
        let err = convert_with("FROM alpine\nCOPY a b /dst\n", &[], None).unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
    }

    #[test]
    fn add_url_uses_http_source() {
        let c = convert("FROM alpine\nADD https://example.com/files/tool.tgz?x=1 /opt/\n");
        assert!(
            sources(&c).contains(&"https://example.com/files/tool.tgz?x=1".to_string())
        );
    }

    #[test]
    fn chown_and_chmod() {
        let c = convert("FROM alpine\nCOPY --chown=app:staff --chmod=640 f /f\n");
        let action = ops(&c)
            .into_iter()
            .find_map(|o| match o.op {
                Some(OpKind::File(f)) => Some(f.actions[0].action.clone()),
                _ => None,
            })
            .unwrap();
        let FileActionKind::Copy(copy) = action else {
            panic!("expected copy");
        };
        assert_eq!(copy.mode, 0o640);
        assert_eq!(
            copy.owner,
            Some(ChownOpt {
                user: "app".to_string(),
                group: Some("staff".to_string()),
            })
        );
        let err = convert_with("FROM alpine\nCOPY --chmod=9z f /f\n", &[], None).unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
    }

    #[test]
    fn workdir_is_relative_to_previous() {
        let c = convert("FROM alpine\nWORKDIR /srv\nWORKDIR app/../web\nRUN pwd\n");
        assert_eq!(c.image.config.working_dir.as_deref(), Some("/srv/web"));
        let cwd = ops(&c)
            .into_iter()
            .find_map(|o| match o.op {
                Some(OpKind::Exec(e)) => Some(e.meta.cwd),
                _ => None,
            })
            .unwrap();
        assert_eq!(cwd, "/srv/web");
    }

    #[test]
    fn target_selects_stage() {
        let src = "FROM alpine AS one\nRUN echo one\nFROM busybox AS two\nRUN echo two\n";
        let c = convert_with(src, &[], Some("one")).unwrap();
        assert!(sources(&c)[0].contains("alpine"));
        let err = convert_with(src, &[], Some("three")).unwrap_err();
        assert!(err.to_string().contains("three"));
    }

    #[test]
    fn unneeded_stages_are_not_resolved() {
        let resolver = Recording::default();
        let build_args = BuildArgOverrides::new();
        let src = "FROM alpine AS unused\nFROM busybox AS a\nFROM busybox\nCOPY --from=a / /\n";
        dockerfile_to_state(
            src.as_bytes(),
            &ConvertOpt {
                build_args: &build_args,
                resolver: &resolver,
                target: None,
                platform: Platform::default(),
            },
        )
        .unwrap();
        assert_eq!(
            resolver.calls.into_inner(),
            vec!["docker.io/library/busybox:latest".to_string()]
        );
    }

    #[test]
    fn scratch_stage_has_default_path() {
        let c = convert("FROM scratch\nCOPY app /app\n");
        assert!(sources(&c).iter().all(|s| !s.starts_with("docker-image://")));
        assert_eq!(c.image.env_pairs()[0].0, "PATH");
    }

    #[test]
    fn image_config_instructions() {
        let c = convert(concat!(
            "FROM alpine\n",
            "LABEL version=\"1.0\" team=infra\n",
            "EXPOSE 80 53/udp\n",
            "ENV GREETING=\"hello world\"\n",
            "USER app\n",
            "VOLUME /data\n",
            "STOPSIGNAL SIGTERM\n",
            "HEALTHCHECK --retries=2 CMD wget -q localhost\n",
            "ENTRYPOINT [\"/bin/app\"]\n",
            "MAINTAINER ops@example.com\n",
        ));
        let cfg = &c.image.config;
        assert_eq!(cfg.labels.as_ref().unwrap()["version"], "1.0");
        assert_eq!(cfg.exposed_ports.as_ref().unwrap().len(), 2);
        assert!(c.image.env_pairs().contains(&("GREETING".to_string(), "hello world".to_string())));
        assert_eq!(cfg.user.as_deref(), Some("app"));
        assert_eq!(cfg.stop_signal.as_deref(), Some("SIGTERM"));
        let health = cfg.healthcheck.as_ref().unwrap();
        assert_eq!(health.test, vec!["CMD-SHELL", "wget -q localhost"]);
        assert_eq!(health.retries, Some(2));
        assert_eq!(health.interval, None);
        assert_eq!(cfg.entrypoint, Some(vec!["/bin/app".to_string()]));
        // Inherited CMD is dropped by ENTRYPOINT.
        assert_eq!(cfg.cmd, None);
        assert_eq!(c.image.author.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn healthcheck_durations_are_nanoseconds() {
        let c = convert(
            "FROM alpine\nHEALTHCHECK --interval=1m30s --timeout=500ms --start-period=2s CMD true\n",
        );
        let health = c.image.config.healthcheck.unwrap();
        assert_eq!(health.interval, Some(90_000_000_000));
        assert_eq!(health.timeout, Some(500_000_000));
        assert_eq!(health.start_period, Some(2_000_000_000));
        let err = convert_with("FROM alpine\nHEALTHCHECK --interval=soon CMD true\n", &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s"), Ok(30_000_000_000));
        assert_eq!(parse_duration("1.5h"), Ok(5_400_000_000_000));
        assert_eq!(parse_duration("250us"), Ok(250_000));
        assert_eq!(parse_duration("0"), Ok(0));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn shell_instruction_changes_run_prefix() {
        let c = convert("FROM alpine\nSHELL [\"/bin/bash\", \"-ec\"]\nRUN echo hi\n");
        let args = ops(&c)
            .into_iter()
            .find_map(|o| match o.op {
                Some(OpKind::Exec(e)) => Some(e.meta.args),
                _ => None,
            })
            .unwrap();
        assert_eq!(args, vec!["/bin/bash", "-ec", "echo hi"]);
    }

    #[test]
    fn duplicate_stage_names_fail() {
        let err = convert_with("FROM alpine AS a\nFROM alpine AS a\n", &[], None).unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
    }

    #[test]
    fn resolve_path_normalizes() {
        assert_eq!(resolve_path("/", "."), "/");
        assert_eq!(resolve_path("/app", "./src/../lib"), "/app/lib");
        assert_eq!(resolve_path("/app", "/abs"), "/abs");
        assert_eq!(resolve_path("/", "*.txt"), "/*.txt");
    }

    #[test]
    fn url_filename_from_path() {
        assert_eq!(url_filename("https://h/a/b.tgz?x"), Some("b.tgz".to_string()));
        assert_eq!(url_filename("https://h/"), None);
        assert_eq!(url_filename("https://h"), None);
    }
}

//! Dockerfile parser.
//!
//! Splits the source into logical lines (joining `\` continuations, skipping
//! comments and blank lines) and parses each into an `Instruction`. Arguments
//! that are subject to variable expansion are kept raw, quotes included; the
//! converter expands them with the variables in scope at that point.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern is valid")
});

/// Shell form (run through the stage's shell) or exec form (JSON array).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyArgs {
    pub sources: Vec<String>,
    pub dest: String,
    pub from: Option<String>,
    pub chown: Option<String>,
    pub chmod: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub command: Command,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    From {
        image: String,
        alias: Option<String>,
        platform: Option<String>,
    },
    Arg {
        args: Vec<(String, Option<String>)>,
    },
    Run {
        command: Command,
    },
    Copy(CopyArgs),
    Add(CopyArgs),
    Env {
        pairs: Vec<(String, String)>,
    },
    Label {
        pairs: Vec<(String, String)>,
    },
    Workdir {
        path: String,
    },
    User {
        user: String,
    },
    Expose {
        ports: Vec<String>,
    },
    Cmd {
        command: Command,
    },
    Entrypoint {
        command: Command,
    },
    Shell {
        shell: Vec<String>,
    },
    Volume {
        paths: Vec<String>,
    },
    StopSignal {
        signal: String,
    },
    /// `None` for `HEALTHCHECK NONE`.
    Healthcheck {
        check: Option<HealthCheck>,
    },
    Maintainer {
        name: String,
    },
}

/// An instruction with the (1-based) source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub number: usize,
    pub instruction: Instruction,
}

#[derive(Debug, Clone)]
pub struct Dockerfile {
    pub lines: Vec<Line>,
}

impl Dockerfile {
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for (number, text) in logical_lines(content) {
            let instruction = parse_instruction(&text, number)?;
            lines.push(Line {
                number,
                instruction,
            });
        }

        if lines.is_empty() {
            return Err(Error::compile("file contains no instructions"));
        }

        let first = lines
            .iter()
            .find(|l| !matches!(l.instruction, Instruction::Arg { .. }));
        match first {
            Some(Line {
                instruction: Instruction::From { .. },
                ..
            }) => {}
            Some(l) => {
                return Err(Error::compile_at(
                    l.number,
                    "first instruction must be FROM (optionally preceded by ARG)",
                ));
            }
            None => return Err(Error::compile("no FROM instruction")),
        }

        tracing::debug!(instructions = lines.len(), "parsed dockerfile");
        Ok(Dockerfile { lines })
    }
}

/// Join `\` continuations. Comment and blank lines inside a continuation are
/// dropped. Returns `(start_line, text)` pairs.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && current.is_empty()) {
            continue;
        }
        if current.is_empty() {
            start = idx + 1;
        }
        if trimmed.is_empty() {
            continue;
        }

        let line = raw.trim_end();
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
            }
            None => {
                current.push_str(line);
                out.push((start, std::mem::take(&mut current).trim().to_string()));
            }
        }
    }

    if !current.trim().is_empty() {
        out.push((start, current.trim().to_string()));
    }
    out
}

fn parse_instruction(line: &str, n: usize) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let keyword = keyword.to_uppercase();

    match keyword.as_str() {
        "FROM" => parse_from(rest, n),
        "ARG" => parse_arg(rest, n),
        "RUN" => Ok(Instruction::Run {
            command: parse_command(rest, "RUN", n)?,
        }),
        "COPY" => Ok(Instruction::Copy(parse_copy(rest, "COPY", n)?)),
        "ADD" => Ok(Instruction::Add(parse_copy(rest, "ADD", n)?)),
        "ENV" => Ok(Instruction::Env {
            pairs: parse_pairs(rest, "ENV", n)?,
        }),
        "LABEL" => Ok(Instruction::Label {
            pairs: parse_pairs(rest, "LABEL", n)?,
        }),
        "WORKDIR" => Ok(Instruction::Workdir {
            path: required(rest, "WORKDIR", n)?.to_string(),
        }),
        "USER" => Ok(Instruction::User {
            user: required(rest, "USER", n)?.to_string(),
        }),
        "EXPOSE" => Ok(Instruction::Expose {
            ports: split_words(required(rest, "EXPOSE", n)?),
        }),
        "CMD" => Ok(Instruction::Cmd {
            command: parse_command(rest, "CMD", n)?,
        }),
        "ENTRYPOINT" => Ok(Instruction::Entrypoint {
            command: parse_command(rest, "ENTRYPOINT", n)?,
        }),
        "SHELL" => match parse_json_array(required(rest, "SHELL", n)?) {
            Some(shell) if !shell.is_empty() => Ok(Instruction::Shell { shell }),
            _ => Err(Error::compile_at(n, "SHELL requires a non-empty JSON array")),
        },
        "VOLUME" => {
            let rest = required(rest, "VOLUME", n)?;
            let paths = parse_json_array(rest).unwrap_or_else(|| split_words(rest));
            Ok(Instruction::Volume { paths })
        }
        "STOPSIGNAL" => Ok(Instruction::StopSignal {
            signal: required(rest, "STOPSIGNAL", n)?.to_string(),
        }),
        "HEALTHCHECK" => parse_healthcheck(rest, n),
        "MAINTAINER" => Ok(Instruction::Maintainer {
            name: required(rest, "MAINTAINER", n)?.to_string(),
        }),
        "ONBUILD" => Err(Error::compile_at(n, "ONBUILD is not supported")),
        _ => Err(Error::compile_at(
            n,
            format!("unknown instruction: {}", keyword),
        )),
    }
}

fn parse_from(rest: &str, n: usize) -> Result<Instruction> {
    let (flags, rest) = take_flags(rest, n)?;
    let mut platform = None;
    for (name, value) in flags {
        match name.as_str() {
            "platform" => platform = Some(value),
            _ => return Err(Error::compile_at(n, format!("unknown flag for FROM: --{}", name))),
        }
    }

    let words = split_words(rest);
    let (image, alias) = match words.as_slice() {
        [image] => (image.clone(), None),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => {
            if !NAME_RE.is_match(alias) && !is_stage_name(alias) {
                return Err(Error::compile_at(n, format!("invalid stage name {:?}", alias)));
            }
            (image.clone(), Some(alias.to_lowercase()))
        }
        _ => {
            return Err(Error::compile_at(
                n,
                "FROM requires exactly one image, optionally followed by AS <name>",
            ));
        }
    };

    Ok(Instruction::From {
        image,
        alias,
        platform,
    })
}

fn parse_arg(rest: &str, n: usize) -> Result<Instruction> {
    let words = split_words(required(rest, "ARG", n)?);
    let mut args = Vec::with_capacity(words.len());
    for word in words {
        let (name, default) = match word.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (word, None),
        };
        if !NAME_RE.is_match(&name) {
            return Err(Error::compile_at(n, format!("invalid ARG name {:?}", name)));
        }
        args.push((name, default));
    }
    Ok(Instruction::Arg { args })
}

fn parse_copy(rest: &str, keyword: &str, n: usize) -> Result<CopyArgs> {
    let (flags, rest) = take_flags(rest, n)?;
    let mut copy = CopyArgs {
        sources: Vec::new(),
        dest: String::new(),
        from: None,
        chown: None,
        chmod: None,
    };
    for (name, value) in flags {
        match name.as_str() {
            "from" if keyword == "COPY" => copy.from = Some(value),
            "chown" => copy.chown = Some(value),
            "chmod" => copy.chmod = Some(value),
            // Accepted and ignored: they do not change the graph shape.
            "link" | "checksum" | "keep-git-dir" | "parents" | "exclude" => {
                tracing::debug!(line = n, flag = %name, "ignoring {} flag", keyword);
            }
            _ => {
                return Err(Error::compile_at(
                    n,
                    format!("unknown flag for {}: --{}", keyword, name),
                ));
            }
        }
    }

    let rest = required(rest, keyword, n)?;
    let mut words: Vec<String> = match parse_json_array(rest) {
        // JSON strings are already unquoted; re-quote so the converter's
        // word processing leaves spaces intact.
        Some(parts) => parts.into_iter().map(|p| quote(&p)).collect(),
        None => split_words(rest),
    };
    if words.len() < 2 {
        return Err(Error::compile_at(
            n,
            format!("{} requires at least one source and a destination", keyword),
        ));
    }
    copy.dest = words.pop().unwrap_or_default();
    copy.sources = words;
    Ok(copy)
}

/// `ENV`/`LABEL` arguments: `k=v k2="v 2"` or the legacy `k value with spaces`.
fn parse_pairs(rest: &str, keyword: &str, n: usize) -> Result<Vec<(String, String)>> {
    let rest = required(rest, keyword, n)?;
    let words = split_words(rest);
    let first_has_eq = words.first().is_some_and(|w| w.contains('='));

    if !first_has_eq {
        let (key, value) = split_first_word(rest);
        if value.is_empty() {
            return Err(Error::compile_at(n, format!("{} {} is missing a value", keyword, key)));
        }
        return Ok(vec![(unquote_key(key), value.to_string())]);
    }

    let mut pairs = Vec::with_capacity(words.len());
    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            return Err(Error::compile_at(
                n,
                format!("{} expects key=value pairs, got {:?}", keyword, word),
            ));
        };
        let key = unquote_key(key);
        if key.is_empty() {
            return Err(Error::compile_at(n, format!("{} has an empty key", keyword)));
        }
        pairs.push((key, value.to_string()));
    }
    Ok(pairs)
}

fn parse_command(rest: &str, keyword: &str, n: usize) -> Result<Command> {
    let rest = required(rest, keyword, n)?;
    Ok(match parse_json_array(rest) {
        Some(parts) => Command::Exec(parts),
        None => Command::Shell(rest.to_string()),
    })
}

fn parse_healthcheck(rest: &str, n: usize) -> Result<Instruction> {
    let (flags, rest) = take_flags(rest, n)?;
    let (kind, cmd) = split_first_word(required(rest, "HEALTHCHECK", n)?);
    match kind.to_uppercase().as_str() {
        "NONE" => Ok(Instruction::Healthcheck { check: None }),
        "CMD" => {
            let mut options = BTreeMap::new();
            for (name, value) in flags {
                match name.as_str() {
                    "interval" | "timeout" | "start-period" | "start-interval" | "retries" => {
                        options.insert(name, value);
                    }
                    _ => {
                        return Err(Error::compile_at(
                            n,
                            format!("unknown flag for HEALTHCHECK: --{}", name),
                        ));
                    }
                }
            }
            Ok(Instruction::Healthcheck {
                check: Some(HealthCheck {
                    command: parse_command(cmd, "HEALTHCHECK CMD", n)?,
                    options,
                }),
            })
        }
        other => Err(Error::compile_at(
            n,
            format!("HEALTHCHECK expects CMD or NONE, got {:?}", other),
        )),
    }
}

// --- Helpers ---

fn required<'a>(rest: &'a str, keyword: &str, n: usize) -> Result<&'a str> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(Error::compile_at(n, format!("{} requires an argument", keyword)));
    }
    Ok(rest)
}

/// Leading `--name=value` flags. Returns the flags and the remaining text.
fn take_flags(mut rest: &str, n: usize) -> Result<(Vec<(String, String)>, &str)> {
    let mut flags = Vec::new();
    loop {
        rest = rest.trim_start();
        if !rest.starts_with("--") {
            return Ok((flags, rest));
        }
        let (flag, after) = split_first_word(rest);
        let body = &flag[2..];
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, value),
            // Boolean flags such as `--link`.
            None => (body, "true"),
        };
        if name.is_empty() {
            return Err(Error::compile_at(n, format!("malformed flag {:?}", flag)));
        }
        flags.push((name.to_lowercase(), value.to_string()));
        rest = after;
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Split on whitespace outside quotes. Quotes and escapes are kept verbatim.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (None, c) if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                word.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                word.push(c);
            }
            (q, '\\') if q != Some('\'') => {
                word.push(c);
                if let Some(next) = chars.next() {
                    word.push(next);
                }
            }
            _ => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

fn parse_json_array(s: &str) -> Option<Vec<String>> {
    if !s.trim_start().starts_with('[') {
        return None;
    }
    serde_json::from_str(s).ok()
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn unquote_key(key: &str) -> String {
    let key = key.trim();
    if key.len() >= 2
        && ((key.starts_with('"') && key.ends_with('"'))
            || (key.starts_with('\'') && key.ends_with('\'')))
    {
        key[1..key.len() - 1].to_string()
    } else {
        key.to_string()
    }
}

fn is_stage_name(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_one(line: &str) -> Instruction {
        parse_instruction(line, 1).unwrap()
    }

    #[test]
    fn continuation_lines_keep_start_line() {
        let src = "FROM alpine\n\nRUN apk add \\\n  # comment inside\n  curl \\\n  git\nUSER nobody\n";
        let lines = logical_lines(src);
        assert_eq!(
            lines,
            vec![
                (1, "FROM alpine".to_string()),
                (3, "RUN apk add   curl   git".to_string()),
                (7, "USER nobody".to_string()),
            ]
        );
    }

    #[test]
    fn from_with_alias_and_platform() {
        assert_eq!(
            parse_one("from --platform=$BUILDPLATFORM golang:1.22 AS Builder"),
            Instruction::From {
                image: "golang:1.22".to_string(),
                alias: Some("builder".to_string()),
                platform: Some("$BUILDPLATFORM".to_string()),
            }
        );
    }

    #[test]
    fn from_rejects_extra_words() {
        assert!(parse_instruction("FROM a b", 4).is_err());
        assert!(parse_instruction("FROM", 4).is_err());
    }

    #[test]
    fn arg_with_and_without_default() {
        assert_eq!(
            parse_one("ARG A B=2 C=\"x y\""),
            Instruction::Arg {
                args: vec![
                    ("A".to_string(), None),
                    ("B".to_string(), Some("2".to_string())),
                    ("C".to_string(), Some("\"x y\"".to_string())),
                ],
            }
        );
        assert!(parse_instruction("ARG 1BAD", 1).is_err());
    }

    #[test]
    fn run_shell_and_exec_forms() {
        assert_eq!(
            parse_one("RUN echo $HOME"),
            Instruction::Run {
                command: Command::Shell("echo $HOME".to_string()),
            }
        );
        assert_eq!(
            parse_one(r#"RUN ["echo", "hi there"]"#),
            Instruction::Run {
                command: Command::Exec(vec!["echo".to_string(), "hi there".to_string()]),
            }
        );
        // Invalid JSON falls back to shell form.
        assert_eq!(
            parse_one("RUN [ -f /etc/os-release ]"),
            Instruction::Run {
                command: Command::Shell("[ -f /etc/os-release ]".to_string()),
            }
        );
    }

    #[test]
    fn copy_flags_and_sources() {
        assert_eq!(
            parse_one("COPY --from=build --chown=app:app /out/bin /out/lib /usr/local/"),
            Instruction::Copy(CopyArgs {
                sources: vec!["/out/bin".to_string(), "/out/lib".to_string()],
                dest: "/usr/local/".to_string(),
                from: Some("build".to_string()),
                chown: Some("app:app".to_string()),
                chmod: None,
            })
        );
        assert!(parse_instruction("COPY onlyone", 1).is_err());
        assert!(parse_instruction("ADD --from=x a b", 1).is_err());
        assert!(parse_instruction("COPY --bogus=1 a b", 1).is_err());
    }

    #[test]
    fn copy_json_form_is_requoted() {
        let Instruction::Copy(copy) = parse_one(r#"COPY ["my file", "/dst dir/"]"#) else {
            panic!("expected COPY");
        };
        assert_eq!(copy.sources, vec!["'my file'".to_string()]);
        assert_eq!(copy.dest, "'/dst dir/'");
    }

    #[test]
    fn env_forms() {
        assert_eq!(
            parse_one(r#"ENV A=1 B="two words""#),
            Instruction::Env {
                pairs: vec![
                    ("A".to_string(), "1".to_string()),
                    ("B".to_string(), "\"two words\"".to_string()),
                ],
            }
        );
        assert_eq!(
            parse_one("ENV GREETING hello world"),
            Instruction::Env {
                pairs: vec![("GREETING".to_string(), "hello world".to_string())],
            }
        );
        assert!(parse_instruction("ENV ONLYKEY", 1).is_err());
        assert!(parse_instruction("ENV A=1 B", 1).is_err());
    }

    #[test]
    fn label_with_quoted_key() {
        assert_eq!(
            parse_one(r#"LABEL "org.opencontainers.image.title"="demo""#),
            Instruction::Label {
                pairs: vec![(
                    "org.opencontainers.image.title".to_string(),
                    "\"demo\"".to_string()
                )],
            }
        );
    }

    #[test]
    fn shell_requires_json() {
        assert_eq!(
            parse_one(r#"SHELL ["/bin/bash", "-c"]"#),
            Instruction::Shell {
                shell: vec!["/bin/bash".to_string(), "-c".to_string()],
            }
        );
        assert!(parse_instruction("SHELL /bin/bash -c", 1).is_err());
    }

    #[test]
    fn healthcheck_forms() {
        assert_eq!(
            parse_one("HEALTHCHECK NONE"),
            Instruction::Healthcheck { check: None }
        );
        let Instruction::Healthcheck { check: Some(check) } =
            parse_one("HEALTHCHECK --interval=30s --retries=3 CMD curl -f http://localhost/")
        else {
            panic!("expected HEALTHCHECK CMD");
        };
        assert_eq!(
            check.command,
            Command::Shell("curl -f http://localhost/".to_string())
        );
        assert_eq!(check.options["interval"], "30s");
        assert_eq!(check.options["retries"], "3");
    }

    #[test]
    fn volume_json_and_words() {
        assert_eq!(
            parse_one(r#"VOLUME ["/data", "/logs"]"#),
            Instruction::Volume {
                paths: vec!["/data".to_string(), "/logs".to_string()],
            }
        );
        assert_eq!(
            parse_one("VOLUME /data /logs"),
            Instruction::Volume {
                paths: vec!["/data".to_string(), "/logs".to_string()],
            }
        );
    }

    #[test]
    fn unknown_and_unsupported_instructions() {
        let err = parse_instruction("FETCH thing", 9).unwrap_err();
        assert_eq!(err.to_string(), "dockerfile line 9: unknown instruction: FETCH");
        assert!(parse_instruction("ONBUILD RUN echo", 1).is_err());
    }

    #[test]
    fn file_must_start_with_from() {
        assert!(Dockerfile::parse("").is_err());
        assert!(Dockerfile::parse("# only a comment\n").is_err());
        let err = Dockerfile::parse("ARG X\nRUN echo\n").unwrap_err();
        assert!(matches!(err, Error::Compile { line: Some(2), .. }));
        let ok = Dockerfile::parse("ARG BASE=alpine\nFROM $BASE\nRUN true\n").unwrap();
        assert_eq!(ok.lines.len(), 3);
        assert_eq!(ok.lines[2].number, 3);
    }

    #[test]
    fn split_words_respects_quotes() {
        assert_eq!(
            split_words(r#"a "b c" 'd e' f\ g"#),
            vec!["a", "\"b c\"", "'d e'", "f\\ g"]
        );
    }
}

//! Word processing for instruction arguments: quote removal and variable
//! expansion (`$VAR`, `${VAR}`, `${VAR:-word}`, `${VAR-word}`, `${VAR:+word}`,
//! `${VAR+word}`). Single quotes suppress expansion, `\` escapes the next
//! character. Unset variables expand to the empty string.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Variables visible to an instruction (build args overlaid by ENV).
pub type Vars = BTreeMap<String, String>;

/// Process `input` as a single word; whitespace is kept.
pub fn process_word(input: &str, vars: &Vars) -> Result<String> {
    let mut words = lex(input, vars, false)?;
    Ok(words.pop().unwrap_or_default())
}

/// Process `input` and split it into words on unquoted whitespace.
pub fn process_words(input: &str, vars: &Vars) -> Result<Vec<String>> {
    lex(input, vars, true)
}

fn lex(input: &str, vars: &Vars, split: bool) -> Result<Vec<String>> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if split && c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
                i += 1;
            }
            '\'' => {
                in_word = true;
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(unterminated(input, '\'')),
                    }
                    i += 1;
                }
                i += 1;
            }
            '"' => {
                in_word = true;
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        Some('"') => break,
                        Some('\\') if matches!(chars.get(i + 1).copied(), Some('"' | '\\' | '$')) => {
                            word.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        Some('$') => {
                            i = expand(&chars, i, vars, &mut word)?;
                            continue;
                        }
                        Some(ch) => word.push(ch),
                        None => return Err(unterminated(input, '"')),
                    }
                    i += 1;
                }
                i += 1;
            }
            '\\' => {
                in_word = true;
                match chars.get(i + 1) {
                    Some(next) => word.push(*next),
                    None => word.push('\\'),
                }
                i += 2;
            }
            '$' => {
                in_word = true;
                i = expand(&chars, i, vars, &mut word)?;
            }
            _ => {
                in_word = true;
                word.push(c);
                i += 1;
            }
        }
    }

    if in_word || !split {
        words.push(word);
    }
    Ok(words)
}

fn unterminated(input: &str, quote: char) -> Error {
    Error::compile(format!("unterminated {} quote in {:?}", quote, input))
}

/// Expand the variable reference starting at `chars[start] == '$'`.
/// Returns the index just past the reference.
fn expand(chars: &[char], start: usize, vars: &Vars, out: &mut String) -> Result<usize> {
    let mut i = start + 1;
    match chars.get(i).copied() {
        Some('{') => {
            i += 1;
            let name_start = i;
            while chars.get(i).is_some_and(|c| is_name_char(*c)) {
                i += 1;
            }
            let name: String = chars[name_start..i].iter().collect();
            if name.is_empty() {
                return Err(Error::compile("bad substitution: empty variable name"));
            }

            // Collect the modifier (if any) up to the matching '}'.
            let mut depth = 1;
            let body_start = i;
            while let Some(c) = chars.get(i) {
                match *c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            if depth != 0 {
                return Err(Error::compile(format!(
                    "missing '}}' in substitution of {}",
                    name
                )));
            }
            let body: String = chars[body_start..i].iter().collect();
            let value = vars.get(&name);
            out.push_str(&apply_modifier(&name, value, &body, vars)?);
            Ok(i + 1)
        }
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            let name_start = i;
            while chars.get(i).is_some_and(|c| is_name_char(*c)) {
                i += 1;
            }
            let name: String = chars[name_start..i].iter().collect();
            if let Some(v) = vars.get(&name) {
                out.push_str(v);
            }
            Ok(i)
        }
        _ => {
            out.push('$');
            Ok(i)
        }
    }
}

fn apply_modifier(name: &str, value: Option<&String>, body: &str, vars: &Vars) -> Result<String> {
    let set = value.is_some();
    let non_empty = value.is_some_and(|v| !v.is_empty());
    let current = value.cloned().unwrap_or_default();

    if body.is_empty() {
        return Ok(current);
    }
    let (use_alt, word) = if let Some(word) = body.strip_prefix(":-") {
        (!non_empty, word)
    } else if let Some(word) = body.strip_prefix('-') {
        (!set, word)
    } else if let Some(word) = body.strip_prefix(":+") {
        return if non_empty {
            process_word(word, vars)
        } else {
            Ok(String::new())
        };
    } else if let Some(word) = body.strip_prefix('+') {
        return if set {
            process_word(word, vars)
        } else {
            Ok(String::new())
        };
    } else {
        return Err(Error::compile(format!(
            "unsupported modifier {:?} in substitution of {}",
            body, name
        )));
    };

    if use_alt {
        process_word(word, vars)
    } else {
        Ok(current)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

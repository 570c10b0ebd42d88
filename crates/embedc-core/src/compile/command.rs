//! Compiler command templates.
//!
//! A template is a whitespace-separated word list; double quotes group words
//! containing spaces. `{src}` and `{out}` are replaced by the materialized
//! source and the artifact path. A template without `{out}` gets `-o <out>`
//! appended, and one without `{src}` gets the source as its last argument.

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

pub const SRC_PLACEHOLDER: &str = "{src}";
pub const OUT_PLACEHOLDER: &str = "{out}";

/// A parsed compiler command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandTemplate {
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let args = split_words(text)?;
        if args.is_empty() {
            return Err(Error::Toolchain("empty compiler command".to_string()));
        }
        Ok(Self { args })
    }

    pub(crate) fn from_args(args: Vec<String>) -> Self {
        Self { args }
    }

    /// The executable (first word).
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// Full argument vector for one build, program first.
    pub fn expand(&self, src: &Path, out: &Path) -> Vec<String> {
        let src = src.display().to_string();
        let out = out.display().to_string();
        let mut has_src = false;
        let mut has_out = false;

        let mut argv: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                has_src |= arg.contains(SRC_PLACEHOLDER);
                has_out |= arg.contains(OUT_PLACEHOLDER);
                arg.replace(SRC_PLACEHOLDER, &src).replace(OUT_PLACEHOLDER, &out)
            })
            .collect();

        if !has_out {
            argv.push("-o".to_string());
            argv.push(out);
        }
        if !has_src {
            argv.push(src);
        }
        argv
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, "\"{}\"", arg)?;
            } else {
                f.write_str(arg)?;
            }
        }
        Ok(())
    }
}

fn split_words(text: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_quotes {
        return Err(Error::Toolchain(format!(
            "unterminated quote in compiler command `{}`",
            text
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

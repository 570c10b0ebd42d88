//! Locating literal snippet blocks in host source files.
//!
//! A precompiled call site is identified by a file and the line holding the
//! block's closing marker. The block's text is everything between the
//! nearest opening marker above that line and the closing marker, so edits
//! elsewhere in the file never change which block a call site refers to.

use std::fs;
use std::path::{Path, PathBuf};

use embedc_core::{Error, Result, SourceOrigin};

/// Opening and closing markers around a snippet block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("\"\"\"", "\"\"\"")
    }
}

/// One block found in a host file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSnippet {
    pub text: String,
    /// Host position of the block's first line.
    pub origin: SourceOrigin,
    /// Line holding the closing marker.
    pub call_line: usize,
}

/// Extract the block that closes on `call_line` (1-based) of `path`.
pub fn extract_snippet(
    path: &Path,
    call_line: usize,
    delimiters: &Delimiters,
) -> Result<ExtractedSnippet> {
    let contents = fs::read_to_string(path)?;
    extract_from_str(&contents, path, call_line, delimiters)
}

/// Like [`extract_snippet`], over already-read file contents.
pub fn extract_from_str(
    contents: &str,
    path: &Path,
    call_line: usize,
    delimiters: &Delimiters,
) -> Result<ExtractedSnippet> {
    let fail = |reason: String| Error::Extraction {
        path: path.to_path_buf(),
        line: call_line,
        reason,
    };

    let lines: Vec<&str> = contents.lines().collect();
    if call_line == 0 || call_line > lines.len() {
        return Err(fail(format!("file has {} lines", lines.len())));
    }

    let closing = lines[call_line - 1];
    let close_at = closing
        .rfind(&delimiters.close)
        .ok_or_else(|| fail(format!("no closing `{}` on the call line", delimiters.close)))?;

    // A block opened and closed on the call line.
    let head = &closing[..close_at];
    if let Some(open_at) = head.find(&delimiters.open) {
        return Ok(ExtractedSnippet {
            text: head[open_at + delimiters.open.len()..].to_string(),
            origin: SourceOrigin::new(path, call_line),
            call_line,
        });
    }

    let open_index = (0..call_line - 1)
        .rev()
        .find(|&i| lines[i].contains(&delimiters.open))
        .ok_or_else(|| fail(format!("no opening `{}` above the call line", delimiters.open)))?;

    let body = &lines[open_index + 1..call_line - 1];
    let mut text = body.join("\n");
    if !body.is_empty() {
        text.push('\n');
    }

    Ok(ExtractedSnippet {
        text,
        // Snippet line 1 is the line after the opening marker.
        origin: SourceOrigin::new(path, open_index + 2),
        call_line,
    })
}

/// Every delimited block in `path`, in file order.
///
/// Lines outside a block whose first non-blank characters are `#` or `//`
/// are comments and cannot open a block.
pub fn scan_snippets(path: &Path, delimiters: &Delimiters) -> Result<Vec<ExtractedSnippet>> {
    let contents = fs::read_to_string(path)?;
    scan_str(&contents, path, delimiters)
}

fn scan_str(contents: &str, path: &Path, delimiters: &Delimiters) -> Result<Vec<ExtractedSnippet>> {
    let mut found = Vec::new();
    let mut open: Option<(usize, Vec<&str>)> = None;

    for (index, line) in contents.lines().enumerate() {
        let number = index + 1;
        match open.take() {
            Some((start, mut body)) => {
                if line.contains(&delimiters.close) {
                    let mut text = body.join("\n");
                    if !body.is_empty() {
                        text.push('\n');
                    }
                    found.push(ExtractedSnippet {
                        text,
                        origin: SourceOrigin::new(path, start + 1),
                        call_line: number,
                    });
                } else {
                    body.push(line);
                    open = Some((start, body));
                }
            }
            None => {
                let trimmed = line.trim_start();
                if trimmed.starts_with('#') || trimmed.starts_with("//") {
                    continue;
                }
                let Some(open_at) = line.find(&delimiters.open) else {
                    continue;
                };
                let rest = &line[open_at + delimiters.open.len()..];
                match rest.find(&delimiters.close) {
                    Some(close_at) => found.push(ExtractedSnippet {
                        text: rest[..close_at].to_string(),
                        origin: SourceOrigin::new(path, number),
                        call_line: number,
                    }),
                    None => open = Some((number, Vec::new())),
                }
            }
        }
    }

    if let Some((start, _)) = open {
        return Err(Error::Extraction {
            path: PathBuf::from(path),
            line: start,
            reason: format!("block is never closed with `{}`", delimiters.close),
        });
    }
    Ok(found)
}

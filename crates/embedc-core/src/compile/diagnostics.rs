//! Compiler diagnostic parsing.
//!
//! gcc and clang print `file:line:col: level: message`. The generated units
//! carry `#line` markers, so these locations already refer to the host file
//! (or to `<snippet>` lines). The raw output is always kept alongside.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
}

/// One structured compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerDiagnostic {
    pub file: String,
    pub line: usize,
    pub column: Option<usize>,
    pub level: DiagnosticLevel,
    pub message: String,
}

impl fmt::Display for CompilerDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Note => "note",
        };
        match self.column {
            Some(col) => write!(
                f,
                "{}:{}:{}: {}: {}",
                self.file, self.line, col, level, self.message
            ),
            None => write!(f, "{}:{}: {}: {}", self.file, self.line, level, self.message),
        }
    }
}

/// Parse compiler output into diagnostics. Unrecognized lines are skipped.
pub fn parse_compiler_output(output: &str) -> Vec<CompilerDiagnostic> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<CompilerDiagnostic> {
    let (level, marker) = [
        (DiagnosticLevel::Error, ": error: "),
        (DiagnosticLevel::Error, ": fatal error: "),
        (DiagnosticLevel::Warning, ": warning: "),
        (DiagnosticLevel::Note, ": note: "),
    ]
    .into_iter()
    .find(|(_, marker)| line.contains(marker))?;

    let pos = line.find(marker)?;
    let location = &line[..pos];
    let message = line[pos + marker.len()..].trim().to_string();

    // Split from the right: file names may contain ':' (e.g. `C:\src`).
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next();
    let rest = parts.next();

    let (file, line_no, column) = match (rest, middle) {
        (Some(file), Some(line_no)) if line_no.parse::<usize>().is_ok() => {
            (file, line_no.parse().ok()?, last.parse().ok())
        }
        (_, Some(file)) => (file, last.parse().ok()?, None),
        _ => return None,
    };

    Some(CompilerDiagnostic {
        file: file.to_string(),
        line: line_no,
        column,
        level,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gcc_error() {
        let output = "/app/main.py:12:5: error: 'y' undeclared (first use in this function)\n\
                      \x20  12 |     y = 2;\n      |     ^";
        let diags = parse_compiler_output(output);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "/app/main.py");
        assert_eq!(diags[0].line, 12);
        assert_eq!(diags[0].column, Some(5));
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
        assert!(diags[0].message.starts_with("'y' undeclared"));
    }

    #[test]
    fn test_parse_mixed_levels() {
        let output = "<snippet>:3:1: warning: unused variable 'z'\n\
                      <snippet>:4: note: declared here\n\
                      cc: fatal error: no input files";
        let diags = parse_compiler_output(output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].level, DiagnosticLevel::Warning);
        assert_eq!(diags[1].line, 4);
        assert_eq!(diags[1].column, None);
    }

    #[test]
    fn test_windows_paths() {
        let diags = parse_compiler_output("C:\\src\\x.c:7:2: error: boom");
        assert_eq!(diags[0].file, "C:\\src\\x.c");
        assert_eq!(diags[0].line, 7);
    }

    #[test]
    fn test_display() {
        let diag = CompilerDiagnostic {
            file: "<snippet>".to_string(),
            line: 2,
            column: Some(3),
            level: DiagnosticLevel::Error,
            message: "expected ';'".to_string(),
        };
        assert_eq!(diag.to_string(), "<snippet>:2:3: error: expected ';'");
    }
}

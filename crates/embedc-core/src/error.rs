//! Error types for embedc-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::compile::CompilerDiagnostic;

/// Result type for embedc-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in embedc-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unknown directive line.
    #[error("directive error on snippet line {line}: {source}")]
    Directive {
        line: usize,
        #[source]
        source: DirectiveError,
    },

    /// Unsupported or mismatched type in an IMPORT, DEF or RETURN.
    #[error("cannot resolve type `{ty}` for `{name}`: {reason}")]
    TypeResolution {
        name: String,
        ty: String,
        reason: String,
    },

    /// A DEF declares a callback returning something other than a scalar.
    #[error(
        "callback `{function}` cannot return `{ty}`: only scalar callback results are supported"
    )]
    UnsupportedCallbackReturn { function: String, ty: String },

    /// The external compiler failed or produced no artifact.
    #[error("compilation failed for unit {fingerprint}{}: {output}", exit_suffix(.status))]
    Compilation {
        fingerprint: String,
        command: Vec<String>,
        status: Option<i32>,
        output: String,
        diagnostics: Vec<CompilerDiagnostic>,
    },

    /// The wrapper symbol was not found in the compiled module.
    #[error("symbol `{symbol}` not found in {}: {reason}", path.display())]
    SymbolResolution {
        symbol: String,
        path: PathBuf,
        reason: String,
    },

    /// Host values could not be converted across the call boundary.
    #[error("marshaling error: {0}")]
    Marshaling(#[from] MarshalError),

    /// No usable C/C++ compiler.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// A precompiled snippet could not be located in its source file.
    #[error("cannot extract snippet from {}:{line}: {reason}", path.display())]
    Extraction {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Failed to load dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Cache metadata could not be read or written.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_suffix(status: &Option<i32>) -> String {
    status
        .map(|s| format!(" (exit status {})", s))
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn directive(line: usize, source: DirectiveError) -> Self {
        Self::Directive { line, source }
    }

    pub(crate) fn type_resolution(
        name: impl Into<String>,
        ty: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TypeResolution {
            name: name.into(),
            ty: ty.into(),
            reason: reason.into(),
        }
    }
}

/// Why a directive line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    /// An upper-case keyword at line start that is not a known directive.
    #[error("unknown directive `{keyword}`")]
    Unknown { keyword: String },

    /// A known directive with bad arguments.
    #[error("malformed {directive}: {reason}")]
    Malformed {
        directive: &'static str,
        reason: String,
    },
}

/// Failures converting between host values and native arguments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("no variable named `{name}` is visible at the call site")]
    MissingVariable { name: String },

    #[error("no function named `{name}` is visible at the call site")]
    MissingFunction { name: String },

    #[error("`{name}` is declared `{expected}` but the host value is {found}")]
    KindMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("`{name}`: value {value} does not fit in `{ty}`")]
    OutOfRange {
        name: String,
        value: String,
        ty: String,
    },

    #[error("`{name}`: string contains an interior NUL byte")]
    InteriorNul { name: String },

    #[error("`{name}` is bound by reference but the host value is immutable")]
    ImmutableTarget { name: String },

    #[error("writing `{name}` back to the host failed: {reason}")]
    WriteBack { name: String, reason: String },

    #[error("host callback `{function}` failed: {reason}")]
    Callback { function: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_error_display() {
        let err = Error::directive(
            3,
            DirectiveError::Unknown {
                keyword: "FOO".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "directive error on snippet line 3: unknown directive `FOO`"
        );
    }

    #[test]
    fn test_compilation_error_display_includes_status() {
        let err = Error::Compilation {
            fingerprint: "abc".to_string(),
            command: vec!["cc".to_string()],
            status: Some(1),
            output: "boom".to_string(),
            diagnostics: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "compilation failed for unit abc (exit status 1): boom"
        );
    }

    #[test]
    fn test_marshal_error_converts() {
        let err: Error = MarshalError::MissingVariable {
            name: "x".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            Error::Marshaling(MarshalError::MissingVariable { .. })
        ));
    }
}

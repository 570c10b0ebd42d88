//! embedc: run C/C++ snippets inline, bound to host variables and functions.
//!
//! A snippet is native code plus a few directive lines:
//!
//! ```text
//! IMPORT int[] values
//! IMPORT int64_t &total
//! DEF int square int
//! RETURN int count
//! int count = 0;
//! for (size_t i = 0; i < values_len; i++) { total += square(values[i]); count++; }
//! ```
//!
//! The [`Embedder`] turns it into a translation unit, compiles it once per
//! content fingerprint, calls it with values read from a [`HostFrame`] and
//! writes by-reference bindings back.
//!
//! # Calling modes
//!
//! - [`Embedder::inline`]: without IMPORT lines every supported variable in
//!   the frame is bound; with them, only the listed ones.
//! - [`Embedder::prepare`] / [`Embedder::precompiled`]: compile once, then
//!   call repeatedly with no parsing or compilation.
//! - [`Embedder::embed`]: compile plain C functions into a module and
//!   resolve them by name.
//!
//! ```rust,ignore
//! use embedc::{Embedder, Scope};
//!
//! let embedder = Embedder::from_env()?;
//! let mut scope = Scope::new();
//! scope.set("x", 41);
//! embedder.inline("IMPORT int &x\nx += 1;", &mut scope)?;
//! assert_eq!(scope.get("x"), Some(&42.into()));
//! ```

mod embedder;
pub mod extract;

pub use embedder::{Embedder, PreparedSnippet};
pub use extract::{Delimiters, ExtractedSnippet, extract_snippet, scan_snippets};

pub use embedc_core::{
    ArtifactCache, CacheDirs, CacheStats, CompilerConfig, CompilerDiagnostic, DirectiveError,
    EntryPoint, Error, HostFrame, HostFunction, HostValue, Language, LoadedModule, MarshalError,
    Result, Scope, SourceOrigin, ToolchainManager,
};

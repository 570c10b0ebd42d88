//! Compilation pipeline for generated units.
//!
//! This module provides:
//! - Toolchain management (C/C++ compiler detection)
//! - Compiler command templates (`{src}`, `{out}`)
//! - Diagnostic parsing (gcc/clang output → structured messages)
//! - The artifact cache (fingerprint → compiled, loaded module)
//!
//! # Architecture
//!
//! ```text
//! GeneratedUnit
//!     │
//!     └── ArtifactCache ──► memory hit ──────────────────────────┐
//!              │                                                 │
//!              ├── disk hit (meta + mtime check) ──► dlopen ─────┤
//!              │                                                 ▼
//!              └── cc -shared ... ──► libembedc_<fp>.so ──► EntryPoint
//! ```

mod cache;
mod command;
mod diagnostics;
mod module;
mod toolchain;
mod types;

pub use cache::{ArtifactCache, CacheStats};
pub use command::{CommandTemplate, OUT_PLACEHOLDER, SRC_PLACEHOLDER};
pub use diagnostics::{CompilerDiagnostic, DiagnosticLevel, parse_compiler_output};
pub use module::{EntryPoint, LoadedModule};
pub use toolchain::ToolchainManager;
pub use types::{
    CompilationResult, CompiledUnit, CompilerConfig, ENV_CACHE_DIR, ENV_COMPILER, Language,
    dylib_extension, dylib_prefix,
};

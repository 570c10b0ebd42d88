//! Core engine for embedding C/C++ snippets in a host program.
//!
//! This crate provides:
//! - Directive parsing (IMPORT, DEF, GLOBAL, RETURN, POST, CC)
//! - Translation unit generation with a single exit path
//! - Compilation, fingerprint-keyed artifact caching and dynamic loading
//! - Marshaling of host values across the call boundary, with write-back
//! - Native-callable proxies for host functions

pub mod codegen;
pub mod compile;
pub mod directive;
pub mod error;
pub mod host;
pub mod marshal;
pub mod paths;
mod proxy;
pub mod types;

pub use codegen::{CodeGenerator, Fingerprint, GeneratedUnit, UnitKind};
pub use compile::{
    ArtifactCache, CacheStats, CompilerConfig, CompilerDiagnostic, EntryPoint, Language,
    LoadedModule, ToolchainManager,
};
pub use directive::{
    BindingMode, FunctionBinding, ImportMode, Manifest, ReturnSpec, Snippet, SourceOrigin,
    VariableBinding,
};
pub use error::{DirectiveError, Error, MarshalError, Result};
pub use host::{HostFrame, HostFunction, Scope};
pub use marshal::{HostValue, MarshalOptions, call_entry, resolve_manifest};
pub use paths::CacheDirs;
pub use types::{NativeType, ScalarType};

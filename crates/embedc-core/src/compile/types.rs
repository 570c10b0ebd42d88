//! Common types for the compilation pipeline.

use std::path::PathBuf;

use crate::paths::CacheDirs;

/// Environment variable overriding the default compiler command.
pub const ENV_COMPILER: &str = "EMBEDC_CC";

/// Environment variable overriding the cache root.
pub const ENV_CACHE_DIR: &str = "EMBEDC_CACHE_DIR";

/// Source language of generated units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    C,
    Cpp,
}

impl Language {
    /// Extension of materialized sources.
    pub fn source_extension(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    /// Compilers tried, in order, when none is configured.
    pub fn compiler_candidates(self) -> &'static [&'static str] {
        match self {
            Language::C => &["cc", "gcc", "clang"],
            Language::Cpp => &["c++", "g++", "clang++"],
        }
    }
}

/// Configuration for the compiler.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Directory for materialized sources.
    pub build_dir: PathBuf,

    /// Directory for compiled modules and their metadata.
    pub cache_dir: PathBuf,

    pub language: Language,

    /// Default command template; `None` detects a compiler on `PATH`.
    pub compiler: Option<String>,

    /// Emit debug info
    pub debug_info: bool,

    /// Optimization level (0-3)
    pub opt_level: u8,

    /// Additional compiler flags
    pub extra_flags: Vec<String>,

    /// Minimum buffer size for `&string` imports.
    pub string_capacity: usize,

    /// Keep generated sources after a successful build.
    pub keep_sources: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        let dirs = CacheDirs::default_location();
        Self {
            build_dir: dirs.build_dir,
            cache_dir: dirs.cache_dir,
            language: Language::C,
            compiler: None,
            debug_info: false,
            opt_level: 2,
            extra_flags: Vec::new(),
            string_capacity: 256,
            keep_sources: true,
        }
    }
}

impl CompilerConfig {
    /// Create config for fast development builds.
    pub fn development() -> Self {
        Self {
            debug_info: true,
            opt_level: 0,
            ..Default::default()
        }
    }

    /// Create config for optimized builds.
    pub fn production() -> Self {
        Self {
            debug_info: false,
            opt_level: 3,
            keep_sources: false,
            ..Default::default()
        }
    }

    /// Create a config with paths from [`CacheDirs`].
    pub fn with_dirs(dirs: &CacheDirs) -> Self {
        Self {
            build_dir: dirs.build_dir.clone(),
            cache_dir: dirs.cache_dir.clone(),
            ..Self::default()
        }
    }

    /// Default config with `EMBEDC_CC` and `EMBEDC_CACHE_DIR` applied.
    pub fn from_env() -> Self {
        Self::default().apply_env(
            std::env::var(ENV_COMPILER).ok(),
            std::env::var(ENV_CACHE_DIR).ok(),
        )
    }

    fn apply_env(mut self, compiler: Option<String>, cache_root: Option<String>) -> Self {
        if let Some(cc) = compiler.filter(|c| !c.trim().is_empty()) {
            self.compiler = Some(cc);
        }
        if let Some(root) = cache_root.filter(|r| !r.trim().is_empty()) {
            let dirs = CacheDirs::at(PathBuf::from(root));
            self.build_dir = dirs.build_dir;
            self.cache_dir = dirs.cache_dir;
        }
        self
    }

    /// Compile C++ instead of C.
    pub fn cpp(mut self) -> Self {
        self.language = Language::Cpp;
        self
    }
}

/// A compiled module on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Fingerprint of the generated unit
    pub fingerprint: String,

    /// Path to the compiled dynamic library
    pub dylib_path: PathBuf,

    /// Wrapper symbol, if the unit has one
    pub entry_symbol: Option<String>,

    /// Compilation time in milliseconds (0 when reused from disk)
    pub compile_time_ms: u64,
}

/// Result of asking the cache for a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilationResult {
    /// The compiler ran.
    Compiled(CompiledUnit),

    /// An existing artifact was reused.
    Cached(CompiledUnit),
}

impl CompilationResult {
    pub fn unit(&self) -> &CompiledUnit {
        match self {
            Self::Compiled(unit) | Self::Cached(unit) => unit,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}

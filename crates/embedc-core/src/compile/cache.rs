//! Artifact cache.
//!
//! Maps unit fingerprints to loaded modules. Compilation is serialized per
//! fingerprint: in-process by a `Mutex` slot per fingerprint, across
//! processes by an advisory lock file next to the artifact. Different
//! fingerprints never wait on each other.
//!
//! ```text
//! <build_dir>/embedc_<fp>.c          materialized source
//! <cache_dir>/libembedc_<fp>.so      compiled module
//! <cache_dir>/embedc_<fp>.json       metadata checked before reuse
//! <cache_dir>/embedc_<fp>.lock       cross-process lock
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codegen::{CodeGenerator, Fingerprint, GeneratedUnit};
use crate::error::{Error, Result};

use super::command::CommandTemplate;
use super::diagnostics::parse_compiler_output;
use super::module::{EntryPoint, LoadedModule};
use super::toolchain::ToolchainManager;
use super::types::{CompilationResult, CompiledUnit, CompilerConfig, dylib_extension, dylib_prefix};

type Slot = Arc<Mutex<Option<Arc<LoadedModule>>>>;

/// Counters describing how units were obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Times the external compiler ran.
    pub compilations: u64,
    /// Units served from an already loaded module.
    pub memory_hits: u64,
    /// Units served from an artifact compiled earlier.
    pub disk_hits: u64,
}

/// Metadata stored next to each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheMeta {
    fingerprint: String,
    symbol: Option<String>,
    command: Vec<String>,
    toolchain: String,
    created_at: u64,
}

/// Process-wide cache of compiled units.
pub struct ArtifactCache {
    config: CompilerConfig,
    toolchain: ToolchainManager,
    slots: Mutex<FxHashMap<Fingerprint, Slot>>,
    compilations: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
}

impl ArtifactCache {
    /// Create a cache, creating its directories.
    pub fn new(config: CompilerConfig, toolchain: ToolchainManager) -> Result<Self> {
        fs::create_dir_all(&config.build_dir)?;
        fs::create_dir_all(&config.cache_dir)?;
        Ok(Self {
            config,
            toolchain,
            slots: Mutex::new(FxHashMap::default()),
            compilations: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
        })
    }

    /// Detect the toolchain and create a cache.
    pub fn from_config(config: CompilerConfig) -> Result<Self> {
        let toolchain = ToolchainManager::new(&config)?;
        Self::new(config, toolchain)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &ToolchainManager {
        &self.toolchain
    }

    /// A generator whose provenance matches this cache's toolchain.
    pub fn generator(&self) -> CodeGenerator {
        CodeGenerator::new(
            format!(
                "{} [{}]",
                self.toolchain.template(),
                self.config.language.source_extension()
            ),
            self.toolchain.version(),
        )
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            compilations: self.compilations.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
        }
    }

    /// Resolve the wrapper entry point of a unit, compiling it if needed.
    pub fn entry_point(&self, unit: &GeneratedUnit) -> Result<EntryPoint> {
        let module = self.load(unit)?;
        match &unit.symbol {
            Some(symbol) => EntryPoint::resolve(module, symbol),
            None => Err(Error::SymbolResolution {
                symbol: String::new(),
                path: module.path().to_path_buf(),
                reason: "library units have no wrapper function".to_string(),
            }),
        }
    }

    /// Get the loaded module of a unit, compiling it if needed.
    pub fn load(&self, unit: &GeneratedUnit) -> Result<Arc<LoadedModule>> {
        let slot = self.slot(&unit.fingerprint);
        let mut loaded = lock(&slot);

        if let Some(module) = loaded.as_ref() {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Unit {} already loaded", unit.fingerprint.short());
            return Ok(Arc::clone(module));
        }

        let result = self.ensure_compiled(unit)?;
        let compiled = result.unit();
        let module = Arc::new(LoadedModule::load(&compiled.dylib_path, unit.fingerprint.as_str())?);

        // A wrapper that does not resolve means the generator and the loaded
        // artifact disagree; fail before caching it.
        if let Some(symbol) = &unit.symbol {
            module.symbol_address(symbol)?;
        }

        *loaded = Some(Arc::clone(&module));
        Ok(module)
    }

    /// Make sure an artifact for `unit` exists on disk.
    pub fn ensure_compiled(&self, unit: &GeneratedUnit) -> Result<CompilationResult> {
        let _lock = self.lock_file(&unit.fingerprint)?;

        if let Some(cached) = self.check_cache(unit) {
            self.disk_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Reusing artifact {}", cached.dylib_path.display());
            return Ok(CompilationResult::Cached(cached));
        }

        let compiled = self.compile(unit)?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        Ok(CompilationResult::Compiled(compiled))
    }

    /// Path of the compiled module for a fingerprint.
    pub fn artifact_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config.cache_dir.join(format!(
            "{}embedc_{}.{}",
            dylib_prefix(),
            fingerprint.short(),
            dylib_extension()
        ))
    }

    /// Path of the materialized source for a fingerprint.
    pub fn source_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config.build_dir.join(format!(
            "embedc_{}.{}",
            fingerprint.short(),
            self.config.language.source_extension()
        ))
    }

    fn meta_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("embedc_{}.json", fingerprint.short()))
    }

    fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("embedc_{}.lock", fingerprint.short()))
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(fingerprint.clone()).or_default())
    }

    fn lock_file(&self, fingerprint: &Fingerprint) -> Result<FileLock> {
        fs::create_dir_all(&self.config.cache_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(fingerprint))?;
        file.lock_exclusive()?;
        Ok(FileLock(file))
    }

    /// Check if a usable artifact exists.
    fn check_cache(&self, unit: &GeneratedUnit) -> Option<CompiledUnit> {
        let artifact = self.artifact_path(&unit.fingerprint);
        if !artifact.exists() {
            return None;
        }

        let meta_text = fs::read_to_string(self.meta_path(&unit.fingerprint)).ok()?;
        let meta: CacheMeta = match serde_json::from_str(&meta_text) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache metadata: {}", e);
                return None;
            }
        };
        if meta.fingerprint != unit.fingerprint.as_str() || meta.symbol != unit.symbol {
            return None;
        }

        let source = self.source_path(&unit.fingerprint);
        if source.exists() && is_older(&artifact, &source) {
            tracing::debug!("Artifact {} is stale", artifact.display());
            return None;
        }

        Some(CompiledUnit {
            fingerprint: meta.fingerprint,
            dylib_path: artifact,
            entry_symbol: meta.symbol,
            compile_time_ms: 0,
        })
    }

    /// Compile a unit to its artifact path.
    fn compile(&self, unit: &GeneratedUnit) -> Result<CompiledUnit> {
        fs::create_dir_all(&self.config.build_dir)?;

        let source = self.source_path(&unit.fingerprint);
        fs::write(&source, &unit.source)?;
        tracing::debug!("Wrote unit source {}", source.display());

        let artifact = self.artifact_path(&unit.fingerprint);
        let temp = self.config.cache_dir.join(format!(
            ".{}embedc_{}-{}.{}",
            dylib_prefix(),
            unit.fingerprint.short(),
            Uuid::new_v4().simple(),
            dylib_extension()
        ));

        let template = match &unit.compiler_override {
            Some(text) => CommandTemplate::parse(text)?,
            None => self.toolchain.template().clone(),
        };
        let argv = template.expand(&source, &temp);

        tracing::info!("Compiling unit {}: {}", unit.fingerprint.short(), argv.join(" "));
        let start = Instant::now();
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|e| Error::Toolchain(format!("failed to run `{}`: {}", argv[0], e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() || !temp.exists() {
            let _ = fs::remove_file(&temp);
            let output_text = if output.status.success() {
                format!("compiler produced no artifact at {}\n{}", temp.display(), text)
            } else {
                text
            };
            return Err(Error::Compilation {
                fingerprint: unit.fingerprint.to_string(),
                command: argv,
                status: output.status.code(),
                diagnostics: parse_compiler_output(&output_text),
                output: output_text,
            });
        }

        fs::rename(&temp, &artifact)?;
        let compile_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!("Compiled unit {} in {}ms", unit.fingerprint.short(), compile_time_ms);

        if !self.config.keep_sources
            && let Err(e) = fs::remove_file(&source)
        {
            tracing::warn!("Failed to remove unit source: {}", e);
        }

        self.save_meta(unit, argv);

        Ok(CompiledUnit {
            fingerprint: unit.fingerprint.to_string(),
            dylib_path: artifact,
            entry_symbol: unit.symbol.clone(),
            compile_time_ms,
        })
    }

    /// Save metadata. Failure only costs a recompilation later.
    fn save_meta(&self, unit: &GeneratedUnit, command: Vec<String>) {
        let meta = CacheMeta {
            fingerprint: unit.fingerprint.to_string(),
            symbol: unit.symbol.clone(),
            command,
            toolchain: self.toolchain.version().to_string(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let result = serde_json::to_string_pretty(&meta)
            .map_err(|e| Error::Serialization(e.to_string()))
            .and_then(|json| {
                fs::write(self.meta_path(&unit.fingerprint), json).map_err(Error::from)
            });
        if let Err(e) = result {
            tracing::warn!("Failed to save cache metadata: {}", e);
        }
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive lock on a cache lock file, released on drop.
struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_older(artifact: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(artifact), modified(source)) {
        (Some(a), Some(s)) => a < s,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::UnitKind;
    use tempfile::TempDir;

    fn test_cache(temp: &TempDir) -> ArtifactCache {
        let dirs = crate::paths::CacheDirs::at(temp.path().join("embedc"));
        let config = CompilerConfig::with_dirs(&dirs);
        let toolchain = ToolchainManager::from_parts(
            PathBuf::from("embedc-no-such-compiler"),
            CommandTemplate::parse("embedc-no-such-compiler -shared").unwrap(),
            "test 0.0",
        );
        ArtifactCache::new(config, toolchain).unwrap()
    }

    fn unit(source: &str) -> GeneratedUnit {
        GeneratedUnit {
            source: source.to_string(),
            fingerprint: Fingerprint::of(source),
            symbol: Some("embedc_entry_test".to_string()),
            kind: UnitKind::Wrapper,
            compiler_override: None,
        }
    }

    #[test]
    fn test_paths_embed_fingerprint() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp);
        let fp = Fingerprint::of("x");
        let artifact = cache.artifact_path(&fp);
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(fp.short()));
        assert!(name.ends_with(dylib_extension()));
        assert!(cache.source_path(&fp).to_string_lossy().ends_with(".c"));
    }

    #[test]
    fn test_missing_compiler_leaves_cache_untouched() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp);
        let unit = unit("int x;");
        let err = cache.load(&unit).unwrap_err();
        assert!(matches!(err, Error::Toolchain(_)));
        assert!(!cache.artifact_path(&unit.fingerprint).exists());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_metadata_gates_reuse() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp);
        let unit = unit("int y;");

        fs::write(cache.artifact_path(&unit.fingerprint), b"not really a module").unwrap();
        assert!(cache.check_cache(&unit).is_none(), "no metadata yet");

        cache.save_meta(&unit, vec!["cc".to_string()]);
        let cached = cache.check_cache(&unit).expect("metadata matches");
        assert_eq!(cached.entry_symbol.as_deref(), Some("embedc_entry_test"));

        let mut other = unit.clone();
        other.symbol = Some("embedc_entry_other".to_string());
        assert!(cache.check_cache(&other).is_none());
    }

    #[test]
    fn test_failed_compilation_reports_output() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp);
        // `false` exits non-zero without producing anything.
        if which::which("false").is_err() {
            return;
        }
        let mut unit = unit("int z;");
        unit.compiler_override = Some("false".to_string());
        let err = cache.load(&unit).unwrap_err();
        match err {
            Error::Compilation { status, command, .. } => {
                assert_eq!(status, Some(1));
                assert_eq!(command[0], "false");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!cache.artifact_path(&unit.fingerprint).exists());
        assert_eq!(cache.stats().compilations, 0);
    }
}

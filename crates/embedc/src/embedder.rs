//! The embedding session: calling modes on top of one artifact cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use embedc_core::{
    ArtifactCache, CodeGenerator, CompilerConfig, EntryPoint, HostFrame, HostValue, LoadedModule,
    Manifest, MarshalOptions, Result, Snippet, SourceOrigin, call_entry, resolve_manifest,
};
use rustc_hash::FxHashMap;

use crate::extract::{Delimiters, extract_snippet, scan_snippets};

/// Key of a precompiled call site: canonical file path and closing line.
type SiteKey = (PathBuf, usize);

/// Compiles and runs snippets against host frames.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Embedder {
    cache: Arc<ArtifactCache>,
    generator: CodeGenerator,
    options: MarshalOptions,
    delimiters: Delimiters,
    precompiled: Mutex<FxHashMap<SiteKey, Arc<PreparedSnippet>>>,
}

impl Embedder {
    /// Detect a compiler and open the cache described by `config`.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        Ok(Self::with_cache(Arc::new(ArtifactCache::from_config(config)?)))
    }

    /// [`Embedder::new`] with `EMBEDC_CC` and `EMBEDC_CACHE_DIR` applied.
    pub fn from_env() -> Result<Self> {
        Self::new(CompilerConfig::from_env())
    }

    /// Share an existing cache.
    pub fn with_cache(cache: Arc<ArtifactCache>) -> Self {
        let generator = cache.generator();
        let options = MarshalOptions {
            string_capacity: cache.config().string_capacity,
        };
        Self {
            cache,
            generator,
            options,
            delimiters: Delimiters::default(),
            precompiled: Mutex::new(FxHashMap::default()),
        }
    }

    /// Use other markers for precompiled blocks.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    /// Compile (or reuse) and run `source` against `frame`.
    ///
    /// Without IMPORT lines every supported variable in `frame` is bound.
    pub fn inline(&self, source: &str, frame: &mut dyn HostFrame) -> Result<HostValue> {
        self.inline_at(source, SourceOrigin::default(), frame)
    }

    /// [`Embedder::inline`] for a snippet that sits at `origin` in a host file.
    pub fn inline_at(
        &self,
        source: &str,
        origin: SourceOrigin,
        frame: &mut dyn HostFrame,
    ) -> Result<HostValue> {
        let snippet = Snippet::parse_with_origin(source, origin)?;
        let manifest = resolve_manifest(&snippet.manifest, &*frame);
        let unit = self.generator.generate(&snippet, &manifest)?;
        let entry = self.cache.entry_point(&unit)?;
        call_entry(&entry, &manifest, frame, &self.options)
    }

    /// Compile `source` once for repeated calls.
    ///
    /// Only IMPORT lines are bound; the frame is never consulted for
    /// automatic import.
    pub fn prepare(&self, source: &str, origin: SourceOrigin) -> Result<PreparedSnippet> {
        let snippet = Snippet::parse_with_origin(source, origin)?;
        let manifest = snippet.manifest.clone();
        let unit = self.generator.generate(&snippet, &manifest)?;
        let entry = self.cache.entry_point(&unit)?;
        tracing::debug!("Prepared {} as {}", snippet.origin.display_name(), entry.symbol());
        Ok(PreparedSnippet {
            manifest,
            entry,
            options: self.options,
        })
    }

    /// Run the block that closes on `line` of `path`, compiling it on first use.
    pub fn precompiled(
        &self,
        path: &Path,
        line: usize,
        frame: &mut dyn HostFrame,
    ) -> Result<HostValue> {
        let key = site_key(path, line);
        let existing = self.registry().get(&key).cloned();
        let prepared = match existing {
            Some(prepared) => prepared,
            None => {
                let found = extract_snippet(path, line, &self.delimiters)?;
                let prepared = Arc::new(self.prepare(&found.text, found.origin)?);
                Arc::clone(self.registry().entry(key).or_insert(prepared))
            }
        };
        prepared.call(frame)
    }

    /// Compile every block in `path` so later [`Embedder::precompiled`] calls
    /// skip parsing and compilation. Returns the number of blocks.
    pub fn precompile_file(&self, path: &Path) -> Result<usize> {
        let blocks = scan_snippets(path, &self.delimiters)?;
        for block in &blocks {
            let key = site_key(path, block.call_line);
            if self.registry().contains_key(&key) {
                continue;
            }
            let prepared = Arc::new(self.prepare(&block.text, block.origin.clone())?);
            self.registry().entry(key).or_insert(prepared);
        }
        tracing::info!("Precompiled {} block(s) from {}", blocks.len(), path.display());
        Ok(blocks.len())
    }

    /// Compile plain top-level C functions and load them as a module.
    pub fn embed(&self, source: &str) -> Result<Arc<LoadedModule>> {
        self.embed_at(source, SourceOrigin::default())
    }

    pub fn embed_at(&self, source: &str, origin: SourceOrigin) -> Result<Arc<LoadedModule>> {
        let snippet = Snippet::parse_with_origin(source, origin)?;
        let unit = self.generator.generate_library(&snippet)?;
        self.cache.load(&unit)
    }

    /// Library mode for the block that closes on `line` of `path`.
    pub fn embed_precompiled(&self, path: &Path, line: usize) -> Result<Arc<LoadedModule>> {
        let found = extract_snippet(path, line, &self.delimiters)?;
        self.embed_at(&found.text, found.origin)
    }

    /// Number of call sites compiled through the precompiled registry.
    pub fn precompiled_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, FxHashMap<SiteKey, Arc<PreparedSnippet>>> {
        self.precompiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("cache", &self.cache)
            .field("delimiters", &self.delimiters)
            .field("precompiled", &self.precompiled_count())
            .finish()
    }
}

fn site_key(path: &Path, line: usize) -> SiteKey {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    (path, line)
}

/// A compiled snippet with a resolved entry point.
#[derive(Debug)]
pub struct PreparedSnippet {
    manifest: Manifest,
    entry: EntryPoint,
    options: MarshalOptions,
}

impl PreparedSnippet {
    /// Run against `frame` without parsing or compiling.
    pub fn call(&self, frame: &mut dyn HostFrame) -> Result<HostValue> {
        call_entry(&self.entry, &self.manifest, frame, &self.options)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn symbol(&self) -> &str {
        self.entry.symbol()
    }
}

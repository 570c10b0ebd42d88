//! Loaded native modules and their entry points.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::error::{Error, Result};

/// A compiled module mapped into the process.
///
/// Modules are never unloaded while anything refers to them; the artifact
/// cache keeps one `Arc` per fingerprint for its whole lifetime.
pub struct LoadedModule {
    library: Library,
    path: PathBuf,
    fingerprint: String,
}

impl LoadedModule {
    /// Load a dynamic library.
    pub fn load(path: &Path, fingerprint: impl Into<String>) -> Result<Self> {
        // SAFETY: the library was produced by our own compiler invocation;
        // its initializers are whatever the snippet's globals define.
        let library = unsafe { Library::new(path)? };
        tracing::info!("Loaded module {}", path.display());
        Ok(Self {
            library,
            path: path.to_path_buf(),
            fingerprint: fingerprint.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Address of an exported symbol.
    pub fn symbol_address(&self, name: &str) -> Result<*const c_void> {
        // SAFETY: the symbol is only read as an address here; callers decide
        // how to call it.
        let symbol: Symbol<'_, unsafe extern "C" fn()> =
            unsafe { self.library.get(name.as_bytes()) }.map_err(|e| Error::SymbolResolution {
                symbol: name.to_string(),
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(*symbol as *const c_void)
    }

    /// Typed access to an exported symbol.
    ///
    /// # Safety
    /// `T` must match the symbol's actual type.
    pub unsafe fn get<T>(&self, name: &str) -> Result<Symbol<'_, T>> {
        unsafe { self.library.get(name.as_bytes()) }.map_err(|e| Error::SymbolResolution {
            symbol: name.to_string(),
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// A resolved wrapper function, kept alive together with its module.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    module: Arc<LoadedModule>,
    symbol: String,
    address: *const c_void,
}

// SAFETY: the address points into a module that stays loaded as long as
// `module` is alive, and code addresses are valid from any thread.
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    /// Resolve `symbol` in `module`.
    pub fn resolve(module: Arc<LoadedModule>, symbol: &str) -> Result<Self> {
        let address = module.symbol_address(symbol)?;
        Ok(Self {
            module,
            symbol: symbol.to_string(),
            address,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    pub fn address(&self) -> *const c_void {
        self.address
    }
}

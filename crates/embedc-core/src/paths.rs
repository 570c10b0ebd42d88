//! Cache directory management.
//!
//! Every embedding session uses the same layout so artifacts compiled by one
//! process are reused by the next:
//!
//! ```text
//! <root>/
//! ├── build/   # Materialized translation units
//! └── cache/   # Compiled modules, metadata and lock files
//! ```

use std::fs;
use std::path::PathBuf;

use crate::error::Result;

/// Directory structure of an embedc cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    /// The root directory itself.
    pub root: PathBuf,

    /// Build directory for generated sources.
    pub build_dir: PathBuf,

    /// Cache directory for compiled modules.
    pub cache_dir: PathBuf,
}

impl CacheDirs {
    /// Layout under `root`. Nothing is created until [`CacheDirs::create`].
    pub fn at(root: PathBuf) -> Self {
        Self {
            build_dir: root.join("build"),
            cache_dir: root.join("cache"),
            root,
        }
    }

    /// The per-user cache (`~/.cache/embedc` on Linux), or the system temp
    /// directory when the platform has none.
    pub fn default_location() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::at(base.join("embedc"))
    }

    /// Create all directories if they don't exist.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.build_dir)?;
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }

    /// Remove every artifact and recreate the empty layout.
    ///
    /// Modules already loaded by a running process stay mapped.
    pub fn clean(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        self.create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let dirs = CacheDirs::at(PathBuf::from("/var/tmp/x"));
        assert_eq!(dirs.build_dir, PathBuf::from("/var/tmp/x/build"));
        assert_eq!(dirs.cache_dir, PathBuf::from("/var/tmp/x/cache"));
        assert!(CacheDirs::default_location().root.ends_with("embedc"));
    }

    #[test]
    fn test_clean() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = CacheDirs::at(temp.path().join("embedc"));
        dirs.create().expect("Failed to create dirs");

        let artifact = dirs.cache_dir.join("libembedc_test.so");
        fs::write(&artifact, "test").expect("Failed to write test file");
        assert!(artifact.exists());

        dirs.clean().expect("Failed to clean");
        assert!(!artifact.exists());
        assert!(dirs.build_dir.exists());
        assert!(dirs.cache_dir.exists());
    }
}

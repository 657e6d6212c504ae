//! Temporary directories for storage tests.

// Test utilities are expected to panic on failure
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// File name used by [`TestDir::database_path`].
const DATABASE_FILE: &str = "checkpoints.redb";

/// A temporary directory removed on drop.
///
/// # Example
///
/// ```
/// use blockvol_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let db_path = dir.database_path();
/// assert!(db_path.starts_with(dir.path()));
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: TempDir::new().expect("failed to create temp directory") }
    }

    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path onto the directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Conventional location of a checkpoint database inside the directory.
    ///
    /// Reopening the same path simulates a volume restart.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.join(DATABASE_FILE)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

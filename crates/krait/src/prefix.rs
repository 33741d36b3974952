//! The target environment on disk: its `conda-meta` directory, the installed
//! package records, the history log and the transaction lock.

use std::path::{Path, PathBuf};

use krait_conda_types::{history::HistoryEntry, PrefixRecord};

/// The name of the lock file inside `conda-meta` that serializes
/// transactions against the same prefix.
const LOCKFILE_NAME: &str = "krait.lock";

/// A prefix: the filesystem root of an environment.
#[derive(Debug, Clone)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    /// Creates a handle for the given root directory, creating the
    /// `conda-meta` directory when it is missing.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        fs_err::create_dir_all(root.join("conda-meta"))?;
        Ok(Self { root })
    }

    /// The root directory of the prefix.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The `conda-meta` directory of the prefix.
    pub fn conda_meta_path(&self) -> PathBuf {
        self.root.join("conda-meta")
    }

    /// Reads the records of all installed packages.
    pub fn installed_packages(&self) -> Result<Vec<PrefixRecord>, std::io::Error> {
        PrefixRecord::collect_from_prefix(&self.root)
    }

    /// Writes the record of a freshly linked package.
    pub fn write_record(&self, record: &PrefixRecord) -> Result<(), std::io::Error> {
        record.write_to_path(self.conda_meta_path().join(record.file_name()))
    }

    /// Removes the record of a package, making it uninstalled.
    pub fn remove_record(&self, record: &PrefixRecord) -> Result<(), std::io::Error> {
        match fs_err::remove_file(self.conda_meta_path().join(record.file_name())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Appends an entry to the history log.
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<(), std::io::Error> {
        entry
            .append_to_file(self.conda_meta_path().join("history"))
            .map_err(std::io::Error::other)
    }

    /// Takes the prefix lock, blocking until it is available. The lock is
    /// held for the duration of any transaction mutating the prefix;
    /// dropping the guard releases it.
    pub fn lock(&self) -> Result<PrefixGuard, std::io::Error> {
        let mut lock = fslock::LockFile::open(&self.conda_meta_path().join(LOCKFILE_NAME))
            .map_err(std::io::Error::other)?;
        lock.lock().map_err(std::io::Error::other)?;
        Ok(PrefixGuard { _lock: lock })
    }
}

/// Holds the prefix lock for the duration of a transaction.
pub struct PrefixGuard {
    _lock: fslock::LockFile,
}

#[cfg(test)]
mod test {
    use super::Prefix;

    #[test]
    fn create_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = Prefix::create(dir.path().join("env")).unwrap();
        assert!(prefix.conda_meta_path().is_dir());
        assert!(prefix.installed_packages().unwrap().is_empty());

        let _guard = prefix.lock().unwrap();
    }
}

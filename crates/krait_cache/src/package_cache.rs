//! Cache layers and their composition.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use krait_conda_types::{package::ArchiveIdentifier, RepoDataRecord};
use krait_digest::{compute_file_digest, Md5, Sha256};

use crate::validation::validate_package_directory;

/// Whether a cache layer can be written to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Writability {
    /// The directory exists and a sentinel file could be created in it.
    Writable,

    /// The directory exists but cannot be written.
    NotWritable,

    /// The directory does not exist (it may be creatable).
    Missing,
}

/// How to treat artifacts for which the index provides no checksum at all.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum VerificationPolicy {
    /// Reject artifacts that cannot be verified.
    #[default]
    Strict,

    /// Accept them, but log a warning.
    Warn,

    /// Accept them silently.
    Disabled,
}

#[derive(Debug, Default, Clone, Copy)]
struct ValidityMemo {
    tarball: Option<bool>,
    extracted_dir: Option<bool>,
}

/// One directory acting as a package cache.
///
/// Validity checks are memoized: a tarball or extracted directory that was
/// found valid once is not re-hashed for the rest of the process lifetime,
/// until [`PackageCacheLayer::invalidate`] is called for it. The memo map is
/// internally synchronized, queries may run from multiple threads.
#[derive(Debug)]
pub struct PackageCacheLayer {
    path: PathBuf,
    policy: VerificationPolicy,
    memo: DashMap<String, ValidityMemo>,
}

impl PackageCacheLayer {
    /// Creates a layer rooted at the given directory.
    pub fn new(path: PathBuf, policy: VerificationPolicy) -> Self {
        Self {
            path,
            policy,
            memo: DashMap::new(),
        }
    }

    /// The root directory of the layer.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probes whether the layer can be written to by creating the `urls.txt`
    /// sentinel file.
    pub fn writability(&self) -> Writability {
        if !self.path.is_dir() {
            return Writability::Missing;
        }
        let sentinel = self.path.join("urls.txt");
        match fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sentinel)
        {
            Ok(_) => Writability::Writable,
            Err(_) => Writability::NotWritable,
        }
    }

    /// The path a tarball for the given record would live at.
    pub fn tarball_path(&self, record: &RepoDataRecord) -> PathBuf {
        self.path.join(&record.file_name)
    }

    /// The path the extracted directory for the given record would live at.
    pub fn extracted_dir_path(&self, record: &RepoDataRecord) -> Option<PathBuf> {
        let identifier = ArchiveIdentifier::try_from_filename(&record.file_name)?;
        Some(self.path.join(identifier.to_directory_name()))
    }

    /// Returns true if the layer holds a tarball for the record whose size
    /// and checksums match the record. The result is memoized.
    pub fn has_valid_tarball(&self, record: &RepoDataRecord) -> bool {
        if let Some(memo) = self.memo.get(&record.file_name) {
            if let Some(valid) = memo.tarball {
                return valid;
            }
        }
        let valid = self.validate_tarball(record);
        self.memo
            .entry(record.file_name.clone())
            .or_default()
            .tarball = Some(valid);
        valid
    }

    /// Returns true if the layer holds a valid extracted directory for the
    /// record: its `info/repodata_record.json` pins the identity of the
    /// archive, and the payload validates against `info/paths.json`. The
    /// result is memoized.
    pub fn has_valid_extracted_dir(&self, record: &RepoDataRecord) -> bool {
        if let Some(memo) = self.memo.get(&record.file_name) {
            if let Some(valid) = memo.extracted_dir {
                return valid;
            }
        }
        let valid = self.validate_extracted_dir(record);
        self.memo
            .entry(record.file_name.clone())
            .or_default()
            .extracted_dir = Some(valid);
        valid
    }

    /// Drops the memoized validity of the record, forcing revalidation on
    /// the next query.
    pub fn invalidate(&self, record: &RepoDataRecord) {
        self.memo.remove(&record.file_name);
    }

    fn validate_tarball(&self, record: &RepoDataRecord) -> bool {
        let path = self.tarball_path(record);
        let Ok(metadata) = fs_err::metadata(&path) else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }

        let package = &record.package_record;
        if let Some(size) = package.size {
            if metadata.len() != size {
                tracing::warn!(
                    "cached tarball {} has wrong size, ignoring it",
                    path.display()
                );
                return false;
            }
        }

        if let Some(expected) = &package.sha256 {
            return compute_file_digest::<Sha256>(&path)
                .map(|actual| &actual == expected)
                .unwrap_or(false);
        }
        if let Some(expected) = &package.md5 {
            return compute_file_digest::<Md5>(&path)
                .map(|actual| &actual == expected)
                .unwrap_or(false);
        }

        // No checksum to verify against; the policy decides.
        self.accept_unverifiable(&record.file_name)
    }

    fn validate_extracted_dir(&self, record: &RepoDataRecord) -> bool {
        let Some(dir) = self.extracted_dir_path(record) else {
            return false;
        };
        if !dir.is_dir() {
            return false;
        }

        // The pinned identity must match the record, by checksum preference
        // order: sha256, then md5, then size.
        let pin_path = dir.join("info/repodata_record.json");
        let pinned: RepoDataRecord = match fs_err::read_to_string(&pin_path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            Some(pinned) => pinned,
            None => return false,
        };

        let package = &record.package_record;
        let pinned = &pinned.package_record;
        let identity_matches = match (&package.sha256, &package.md5, package.size) {
            (Some(expected), _, _) => pinned.sha256.as_ref() == Some(expected),
            (None, Some(expected), _) => pinned.md5.as_ref() == Some(expected),
            (None, None, Some(expected)) => pinned.size == Some(expected),
            (None, None, None) => self.accept_unverifiable(&record.file_name),
        };
        if !identity_matches {
            return false;
        }

        match validate_package_directory(&dir) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("extracted directory {} is corrupt: {e}", dir.display());
                false
            }
        }
    }

    fn accept_unverifiable(&self, file_name: &str) -> bool {
        match self.policy {
            VerificationPolicy::Strict => false,
            VerificationPolicy::Warn => {
                tracing::warn!("no checksum known for {file_name}, accepting it unverified");
                true
            }
            VerificationPolicy::Disabled => true,
        }
    }
}

/// An ordered stack of cache layers. Lookups return the first layer with a
/// valid artifact; writes go to the first writable layer.
#[derive(Debug)]
pub struct MultiPackageCache {
    layers: Vec<PackageCacheLayer>,
}

impl MultiPackageCache {
    /// Creates a cache from the given layer directories.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>, policy: VerificationPolicy) -> Self {
        Self {
            layers: paths
                .into_iter()
                .map(|path| PackageCacheLayer::new(path, policy))
                .collect(),
        }
    }

    /// The layers of the cache, in priority order.
    pub fn layers(&self) -> &[PackageCacheLayer] {
        &self.layers
    }

    /// Returns the first layer holding a valid tarball for the record.
    pub fn find_valid_tarball(&self, record: &RepoDataRecord) -> Option<PathBuf> {
        self.layers
            .iter()
            .find(|layer| layer.has_valid_tarball(record))
            .map(|layer| layer.tarball_path(record))
    }

    /// Returns the first layer holding a valid extracted directory for the
    /// record.
    pub fn find_valid_extracted_dir(&self, record: &RepoDataRecord) -> Option<PathBuf> {
        self.layers
            .iter()
            .find(|layer| layer.has_valid_extracted_dir(record))
            .and_then(|layer| layer.extracted_dir_path(record))
    }

    /// Drops the memoized validity of the record in every layer.
    pub fn invalidate(&self, record: &RepoDataRecord) {
        for layer in &self.layers {
            layer.invalidate(record);
        }
    }

    /// Returns the first writable layer. When the first missing layer comes
    /// before any writable one it is created, making it writable.
    pub fn first_writable(&self) -> Option<&PackageCacheLayer> {
        for layer in &self.layers {
            match layer.writability() {
                Writability::Writable => return Some(layer),
                Writability::Missing => {
                    if fs_err::create_dir_all(layer.path()).is_ok() {
                        return Some(layer);
                    }
                }
                Writability::NotWritable => {}
            }
        }
        None
    }
}

//! Linking and unlinking of packages, and the transaction model tying the
//! operations together.

pub mod link;
pub mod link_script;
pub mod python;
pub mod transaction;
pub mod unlink;

use std::path::{Path, PathBuf};

use krait_conda_types::{
    package::{PackageFile, PathType, PathsJson},
    Link, LinkType, PathsEntry, Platform, PrefixPathType, PrefixRecord, RepoDataRecord,
};

use link::{link_file, LinkFileError, LinkMethod};
use python::PythonInfo;

/// Options for linking a package into a prefix.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Whether symbolic links may be created. Defaults to true everywhere
    /// but windows.
    pub allow_symbolic_links: bool,

    /// Whether hard links into the package cache may be created.
    pub allow_hard_links: bool,

    /// The platform of the prefix.
    pub platform: Platform,

    /// The python of the prefix, required to link noarch python packages.
    pub python_info: Option<PythonInfo>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        let platform = Platform::current();
        Self {
            allow_symbolic_links: !platform.is_windows(),
            allow_hard_links: true,
            platform,
            python_info: None,
        }
    }
}

/// An error while linking a package.
#[derive(Debug, thiserror::Error)]
pub enum LinkPackageError {
    /// The `info/paths.json` of the extracted package is unreadable.
    #[error("failed to read paths.json of the extracted package")]
    ReadPathsJson(#[source] std::io::Error),

    /// A file could not be linked.
    #[error("failed to link {0}")]
    LinkFile(String, #[source] LinkFileError),
}

/// Links every file of an extracted package into the prefix and returns the
/// [`PrefixRecord`] describing the installation. The record is *not* written
/// to `conda-meta` here; that is the caller's final, committing step.
pub fn link_package(
    record: &RepoDataRecord,
    package_dir: &Path,
    prefix_root: &Path,
    options: &InstallOptions,
) -> Result<PrefixRecord, LinkPackageError> {
    let paths_json =
        PathsJson::from_package_directory(package_dir).map_err(LinkPackageError::ReadPathsJson)?;

    let target_prefix = prefix_root.to_string_lossy();
    let noarch_type = record.package_record.noarch;

    let mut files = Vec::with_capacity(paths_json.paths.len());
    let mut paths = Vec::with_capacity(paths_json.paths.len());
    let mut dominant_method: Option<LinkMethod> = None;

    for entry in &paths_json.paths {
        if entry.no_link {
            continue;
        }
        if entry.path_type == PathType::Directory {
            // Directories materialize implicitly through their contents.
            continue;
        }

        let linked = link_file(
            noarch_type,
            entry,
            package_dir,
            prefix_root,
            &target_prefix,
            options.allow_symbolic_links,
            options.allow_hard_links,
            options.platform,
            options.python_info.as_ref(),
        )
        .map_err(|e| {
            LinkPackageError::LinkFile(entry.relative_path.display().to_string(), e)
        })?;

        if linked.clobbered {
            tracing::warn!(
                "{} clobbered an existing file in the prefix",
                linked.relative_path.display()
            );
        }

        dominant_method.get_or_insert(linked.method);
        files.push(linked.relative_path.clone());
        paths.push(PathsEntry {
            relative_path: linked.relative_path,
            path_type: match linked.method {
                LinkMethod::Hardlink | LinkMethod::Copy => PrefixPathType::HardLink,
                LinkMethod::Softlink => PrefixPathType::SoftLink,
                LinkMethod::Patched(_) => PrefixPathType::Patched,
            },
            no_link: false,
            sha256: entry.sha256,
            sha256_in_prefix: Some(linked.sha256),
            size_in_bytes: Some(linked.file_size),
            file_mode: entry.prefix_placeholder.as_ref().map(|p| p.file_mode),
            prefix_placeholder: entry
                .prefix_placeholder
                .as_ref()
                .map(|p| p.placeholder.clone()),
        });
    }

    let mut prefix_record = PrefixRecord::from_repodata_record(record.clone());
    prefix_record.extracted_package_dir = Some(package_dir.to_path_buf());
    prefix_record.files = files;
    prefix_record.paths_data = paths.into();
    prefix_record.link = Some(Link {
        source: package_dir.to_path_buf(),
        link_type: Some(match dominant_method {
            Some(LinkMethod::Hardlink) => LinkType::HardLink,
            Some(LinkMethod::Softlink) => LinkType::SoftLink,
            _ => LinkType::Copy,
        }),
    });
    Ok(prefix_record)
}

/// Computes the path of the extracted directory a record would occupy inside
/// a cache directory.
pub fn extracted_dir_name(record: &RepoDataRecord) -> Option<PathBuf> {
    krait_conda_types::package::ArchiveIdentifier::try_from_filename(&record.file_name)
        .map(|id| PathBuf::from(id.to_directory_name()))
}

pub use transaction::{Transaction, TransactionError, TransactionOperation};

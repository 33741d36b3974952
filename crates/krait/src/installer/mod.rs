//! The download/extract pipeline and the transaction executor.
//!
//! [`Installer::execute`] takes a planned [`Transaction`] and drives it to
//! completion: it first populates the package cache for everything that must
//! be installed (bounded-parallel downloads, semaphore-gated extraction with
//! checksum enforcement), then takes the prefix lock and applies the
//! operations, unlinks first, links in dependency order. Every mutation of
//! the prefix is recorded on an undo stack; if anything fails mid-commit the
//! stack is unwound so the prefix never stays in a half-written state.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::StreamExt;
use krait_cache::MultiPackageCache;
use krait_conda_types::{
    history::HistoryEntry, sort_topologically, MatchSpec, Platform, PrefixRecord, RepoDataRecord,
};
use krait_networking::{retry_policies::default_retry_policy, InterruptFlag, Interrupted};
use krait_package_streaming::{download::download_package, ExtractError};
use tokio::sync::Semaphore;

use crate::{
    install::{
        link_package, link_script::run_post_link_script, link_script::LinkScriptError,
        transaction::Transaction, transaction::TransactionOperation, unlink::unlink_package,
        unlink::UnlinkError, InstallOptions, LinkPackageError,
    },
    prefix::Prefix,
};

/// Errors of the installer.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// A required piece of configuration was never provided.
    #[error("the installer is missing its {0}")]
    MissingConfiguration(&'static str),

    /// No cache layer can be written to.
    #[error("no writable package cache layer")]
    NoWritableCacheLayer,

    /// Downloading or extracting an archive failed.
    #[error("failed to fetch {0}")]
    FetchFailed(String, #[source] ExtractError),

    /// The extracted archive did not match the checksum of the index.
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// A package failed to link; the transaction was rolled back.
    #[error("failed to link {0}, the transaction was rolled back")]
    LinkFailed(String, #[source] LinkPackageError),

    /// A package failed to unlink; the transaction was rolled back.
    #[error("failed to unlink {0}, the transaction was rolled back")]
    UnlinkFailed(String, #[source] UnlinkError),

    /// A post-link script failed; the transaction was rolled back.
    #[error("a post-link script failed, the transaction was rolled back")]
    LinkScriptFailed(#[from] LinkScriptError),

    /// An io error while mutating the prefix.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The operation was interrupted; partially applied work was rolled
    /// back.
    #[error(transparent)]
    Cancelled(#[from] Interrupted),
}

impl InstallerError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> crate::error::ExitCode {
        crate::error::ExitCode(match self {
            InstallerError::FetchFailed(..)
            | InstallerError::ChecksumMismatch(_)
            | InstallerError::NoWritableCacheLayer => 5,
            _ => 1,
        })
    }
}

/// Installs transactions into a prefix.
pub struct Installer {
    client: Option<reqwest_middleware::ClientWithMiddleware>,
    package_cache: Option<MultiPackageCache>,
    max_parallel_downloads: usize,
    extract_threads: usize,
    fail_fast: bool,
    interrupt: InterruptFlag,
    execute_link_scripts: bool,
    requested_specs: Vec<MatchSpec>,
    command: Option<String>,
}

impl Default for Installer {
    fn default() -> Self {
        Self {
            client: None,
            package_cache: None,
            max_parallel_downloads: 5,
            extract_threads: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
            fail_fast: true,
            interrupt: InterruptFlag::new(),
            execute_link_scripts: false,
            requested_specs: Vec::new(),
            command: None,
        }
    }
}

impl Installer {
    /// Creates an installer with default settings. A download client and a
    /// package cache must be provided before [`Installer::execute`] runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the http client downloads go through.
    #[must_use]
    pub fn with_download_client(
        self,
        client: reqwest_middleware::ClientWithMiddleware,
    ) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Sets the package cache to populate and link from.
    #[must_use]
    pub fn with_package_cache(self, package_cache: MultiPackageCache) -> Self {
        Self {
            package_cache: Some(package_cache),
            ..self
        }
    }

    /// Limits the number of concurrent downloads.
    #[must_use]
    pub fn with_max_parallel_downloads(self, max_parallel_downloads: usize) -> Self {
        Self {
            max_parallel_downloads: max_parallel_downloads.max(1),
            ..self
        }
    }

    /// Limits the number of concurrent extractions.
    #[must_use]
    pub fn with_extract_threads(self, extract_threads: usize) -> Self {
        Self {
            extract_threads: extract_threads.max(1),
            ..self
        }
    }

    /// Sets the interrupt flag polled at the pipeline's suspension points.
    #[must_use]
    pub fn with_interrupt_flag(self, interrupt: InterruptFlag) -> Self {
        Self { interrupt, ..self }
    }

    /// Selects between fail-fast (the default: the first failure aborts all
    /// targets still in flight) and collecting every outcome before
    /// reporting the first failure.
    #[must_use]
    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        Self { fail_fast, ..self }
    }

    /// Enables execution of post-link scripts. Disabled by default, link
    /// scripts run arbitrary code.
    #[must_use]
    pub fn with_execute_link_scripts(self, execute: bool) -> Self {
        Self {
            execute_link_scripts: execute,
            ..self
        }
    }

    /// Records which specs the user explicitly asked for. They end up in
    /// the prefix records and in the history entry of the transaction.
    #[must_use]
    pub fn with_requested_specs(self, specs: Vec<MatchSpec>) -> Self {
        Self {
            requested_specs: specs,
            ..self
        }
    }

    /// Sets the command line recorded in the history entry.
    #[must_use]
    pub fn with_command(self, command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..self
        }
    }

    /// Executes the transaction against the prefix: populates the cache,
    /// locks the prefix, applies every operation and writes the metadata.
    pub async fn execute(
        &self,
        prefix: &Prefix,
        transaction: Transaction<PrefixRecord, RepoDataRecord>,
    ) -> Result<(), InstallerError> {
        if transaction.is_empty() {
            return Ok(());
        }

        let cache = self
            .package_cache
            .as_ref()
            .ok_or(InstallerError::MissingConfiguration("package cache"))?;

        // Phase one: make sure every package that will be linked has a
        // validated extracted directory in the cache.
        let to_install: Vec<RepoDataRecord> = transaction
            .operations
            .iter()
            .filter_map(TransactionOperation::record_to_install)
            .cloned()
            .collect();
        let extracted_dirs = self.populate_cache(cache, &to_install).await?;

        // Phase two: apply the operations. Linking is synchronous file io,
        // so the whole phase runs on a blocking thread while holding the
        // prefix lock.
        let history_entry = transaction.history_entry(
            self.command.clone(),
            self.requested_specs.iter().map(|s| s.to_string()).collect(),
        );

        let removals: Vec<PrefixRecord> = transaction
            .operations
            .iter()
            .filter_map(TransactionOperation::record_to_remove)
            .cloned()
            .collect();

        let options = InstallOptions {
            python_info: transaction.python_info.clone(),
            platform: transaction.platform,
            ..InstallOptions::default()
        };

        let prefix = prefix.clone();
        let requested_specs = self.requested_specs.clone();
        let execute_link_scripts = self.execute_link_scripts;
        let interrupt = self.interrupt.clone();
        let platform = transaction.platform;

        tokio::task::spawn_blocking(move || {
            apply_operations(
                &prefix,
                removals,
                to_install,
                extracted_dirs,
                options,
                platform,
                &requested_specs,
                execute_link_scripts,
                &interrupt,
                history_entry,
            )
        })
        .await
        .map_err(|join_error| match join_error.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => InstallerError::Cancelled(Interrupted),
        })?
    }

    /// Ensures every record has a valid extracted directory in the cache:
    /// skips what is already there, downloads what is missing, extracts with
    /// bounded concurrency, and validates checksums along the way. Fails
    /// fast: the first failure aborts the remaining targets.
    async fn populate_cache(
        &self,
        cache: &MultiPackageCache,
        records: &[RepoDataRecord],
    ) -> Result<HashMap<String, PathBuf>, InstallerError> {
        let cache_dir = cache
            .first_writable()
            .ok_or(InstallerError::NoWritableCacheLayer)?
            .path()
            .to_path_buf();

        let client = self
            .client
            .as_ref()
            .ok_or(InstallerError::MissingConfiguration("download client"))?;

        let extract_semaphore = Arc::new(Semaphore::new(self.extract_threads));
        let retry_policy = default_retry_policy();

        let tasks = records.iter().map(|record| {
            let cache_dir = cache_dir.clone();
            let extract_semaphore = Arc::clone(&extract_semaphore);
            let interrupt = self.interrupt.clone();
            let retry_policy = &retry_policy;
            async move {
                interrupt.checkpoint()?;

                // Fast path: a validated extracted directory already exists.
                if let Some(dir) = cache.find_valid_extracted_dir(record) {
                    return Ok::<_, InstallerError>((record.file_name.clone(), dir));
                }

                // Obtain a tarball, downloading unless a valid one is cached.
                let tarball = match cache.find_valid_tarball(record) {
                    Some(path) => path,
                    None => {
                        let downloaded = download_package(
                            client,
                            record.url.clone(),
                            &cache_dir,
                            &record.file_name,
                            record.package_record.sha256,
                            retry_policy,
                            &interrupt,
                        )
                        .await
                        .map_err(|e| fetch_error(record, e))?;

                        // The download validated sha256 when known; md5 and
                        // size are checked here for records that only carry
                        // those.
                        if let Some(expected) = &record.package_record.md5 {
                            if &downloaded.digests.md5 != expected {
                                let _ = fs_err::remove_file(&downloaded.path);
                                return Err(InstallerError::ChecksumMismatch(
                                    record.file_name.clone(),
                                ));
                            }
                        }
                        if let Some(size) = record.package_record.size {
                            if downloaded.size != size {
                                let _ = fs_err::remove_file(&downloaded.path);
                                return Err(InstallerError::ChecksumMismatch(
                                    record.file_name.clone(),
                                ));
                            }
                        }
                        downloaded.path
                    }
                };

                // Extraction is gated by a global semaphore so a wide
                // download fan-out cannot oversubscribe the machine.
                let permit = extract_semaphore
                    .acquire()
                    .await
                    .map_err(|_| InstallerError::Cancelled(Interrupted))?;
                interrupt.checkpoint()?;

                let final_dir = cache_dir.join(
                    crate::install::extracted_dir_name(record).ok_or_else(|| {
                        InstallerError::FetchFailed(
                            record.file_name.clone(),
                            ExtractError::UnsupportedArchiveType,
                        )
                    })?,
                );
                let record_for_task = record.clone();
                let tarball_for_task = tarball.clone();
                let final_dir_for_task = final_dir.clone();
                let extract_result = tokio::task::spawn_blocking(move || {
                    extract_into_cache(&tarball_for_task, &final_dir_for_task, &record_for_task)
                })
                .await
                .map_err(|join_error| match join_error.try_into_panic() {
                    Ok(panic) => std::panic::resume_unwind(panic),
                    Err(_) => InstallerError::Cancelled(Interrupted),
                })?;
                drop(permit);
                extract_result?;

                // A cancellation that raced the extraction must not leave
                // artifacts behind.
                if interrupt.is_interrupted() {
                    let _ = fs_err::remove_dir_all(&final_dir);
                    return Err(InstallerError::Cancelled(Interrupted));
                }

                cache.invalidate(record);
                Ok((record.file_name.clone(), final_dir))
            }
        });

        let mut stream =
            futures::stream::iter(tasks).buffer_unordered(self.max_parallel_downloads);
        let mut extracted_dirs = HashMap::new();
        let mut first_failure = None;
        while let Some(result) = stream.next().await {
            match result {
                Ok((file_name, dir)) => {
                    extracted_dirs.insert(file_name, dir);
                }
                // In fail-fast mode dropping the stream aborts everything
                // still in flight; otherwise the remaining targets run to
                // their own conclusion first.
                Err(error) if self.fail_fast => return Err(error),
                Err(error) => {
                    tracing::warn!("pipeline target failed: {error}");
                    first_failure.get_or_insert(error);
                }
            }
        }
        match first_failure {
            Some(error) => Err(error),
            None => Ok(extracted_dirs),
        }
    }
}

fn fetch_error(record: &RepoDataRecord, error: ExtractError) -> InstallerError {
    match error {
        ExtractError::Cancelled(interrupted) => InstallerError::Cancelled(interrupted),
        ExtractError::Sha256Mismatch { .. } => {
            InstallerError::ChecksumMismatch(record.file_name.clone())
        }
        other => InstallerError::FetchFailed(record.file_name.clone(), other),
    }
}

/// Extracts a tarball into the cache: extract to a temporary sibling
/// directory, validate the archive digest, write `repodata_record.json`, and
/// atomically rename into the final location. On a checksum mismatch both
/// the tarball and the partial directory are deleted.
fn extract_into_cache(
    tarball: &Path,
    final_dir: &Path,
    record: &RepoDataRecord,
) -> Result<(), InstallerError> {
    let parent = final_dir
        .parent()
        .expect("the extraction target lives inside the cache");
    let temp_dir = tempfile::tempdir_in(parent)?;

    let digests = krait_package_streaming::fs::extract(tarball, temp_dir.path())
        .map_err(|e| fetch_error(record, e))?;

    let checksum_ok = match (&record.package_record.sha256, &record.package_record.md5) {
        (Some(expected), _) => &digests.sha256 == expected,
        (None, Some(expected)) => &digests.md5 == expected,
        (None, None) => true,
    };
    if !checksum_ok {
        // Never retry a checksum failure automatically; drop everything so
        // the corrupt artifact cannot resurface.
        let _ = fs_err::remove_file(tarball);
        return Err(InstallerError::ChecksumMismatch(record.file_name.clone()));
    }

    // Pin the identity of the archive inside the extracted tree before it
    // becomes visible under its final name.
    let info_dir = temp_dir.path().join("info");
    fs_err::create_dir_all(&info_dir)?;
    let mut record_on_disk = record.clone();
    if record_on_disk.package_record.sha256.is_none() {
        record_on_disk.package_record.sha256 = Some(digests.sha256);
    }
    if record_on_disk.package_record.md5.is_none() {
        record_on_disk.package_record.md5 = Some(digests.md5);
    }
    let file = fs_err::File::create(info_dir.join("repodata_record.json"))?;
    serde_json::to_writer_pretty(file, &record_on_disk).map_err(std::io::Error::other)?;

    let temp_path = temp_dir.into_path();
    if final_dir.exists() {
        fs_err::remove_dir_all(final_dir)?;
    }
    fs_err::rename(temp_path, final_dir)?;
    Ok(())
}

/// One entry of the undo stack.
enum UndoAction {
    /// A package was linked; undo removes it again.
    UnlinkInstalled(Box<PrefixRecord>),

    /// A package was unlinked; undo relinks it from its extracted directory.
    RelinkRemoved(Box<PrefixRecord>),
}

/// Applies the operations while holding the prefix lock, unwinding on any
/// failure.
#[allow(clippy::too_many_arguments)]
fn apply_operations(
    prefix: &Prefix,
    removals: Vec<PrefixRecord>,
    installs: Vec<RepoDataRecord>,
    extracted_dirs: HashMap<String, PathBuf>,
    options: InstallOptions,
    platform: Platform,
    requested_specs: &[MatchSpec],
    execute_link_scripts: bool,
    interrupt: &InterruptFlag,
    history_entry: HistoryEntry,
) -> Result<(), InstallerError> {
    let _guard = prefix.lock()?;
    let mut undo_stack: Vec<UndoAction> = Vec::new();

    let result = (|| -> Result<(), InstallerError> {
        // Unlink removed packages first, dependents before their
        // dependencies (reverse dependency order).
        let mut ordered_removals = sort_topologically(removals);
        ordered_removals.reverse();
        for old in ordered_removals {
            interrupt.checkpoint()?;
            unlink_package(prefix.path(), &old).map_err(|e| {
                InstallerError::UnlinkFailed(old.repodata_record.file_name.clone(), e)
            })?;
            prefix.remove_record(&old)?;
            undo_stack.push(UndoAction::RelinkRemoved(Box::new(old)));
        }

        // Link new packages, dependencies before their dependents.
        let ordered_installs = sort_topologically(installs);
        for record in ordered_installs {
            interrupt.checkpoint()?;
            let package_dir = extracted_dirs
                .get(&record.file_name)
                .expect("every install target was populated into the cache");

            let mut prefix_record = link_package(&record, package_dir, prefix.path(), &options)
                .map_err(|e| InstallerError::LinkFailed(record.file_name.clone(), e))?;

            prefix_record.requested_spec = requested_specs
                .iter()
                .find(|spec| spec.matches(&record.package_record))
                .map(ToString::to_string);

            prefix.write_record(&prefix_record)?;
            undo_stack.push(UndoAction::UnlinkInstalled(Box::new(prefix_record)));

            if execute_link_scripts {
                run_post_link_script(prefix.path(), &record.package_record, platform)?;
            }
        }

        Ok(())
    })();

    match result {
        Ok(()) => {
            prefix.append_history(&history_entry)?;
            Ok(())
        }
        Err(error) => {
            tracing::warn!("transaction failed ({error}), rolling back");
            rollback(prefix, undo_stack, &options);
            Err(error)
        }
    }
}

/// Unwinds the undo stack in reverse order. Rollback is best effort: it
/// keeps going past individual failures so as much of the original state as
/// possible is restored.
fn rollback(prefix: &Prefix, undo_stack: Vec<UndoAction>, options: &InstallOptions) {
    for action in undo_stack.into_iter().rev() {
        match action {
            UndoAction::UnlinkInstalled(record) => {
                if let Err(e) = unlink_package(prefix.path(), &record) {
                    tracing::warn!("rollback: failed to unlink {}: {e}", record.file_name());
                }
                if let Err(e) = prefix.remove_record(&record) {
                    tracing::warn!("rollback: failed to remove record {}: {e}", record.file_name());
                }
            }
            UndoAction::RelinkRemoved(record) => {
                let Some(package_dir) = record.extracted_package_dir.clone() else {
                    tracing::warn!(
                        "rollback: no extracted package available to restore {}",
                        record.file_name()
                    );
                    continue;
                };
                match link_package(
                    &record.repodata_record,
                    &package_dir,
                    prefix.path(),
                    options,
                ) {
                    Ok(restored) => {
                        if let Err(e) = prefix.write_record(&restored) {
                            tracing::warn!(
                                "rollback: failed to restore record {}: {e}",
                                restored.file_name()
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!("rollback: failed to relink {}: {e}", record.file_name());
                    }
                }
            }
        }
    }
}

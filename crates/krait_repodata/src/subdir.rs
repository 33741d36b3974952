//! The per (channel, platform) index: coordinates the fetcher, the on-disk
//! cache and parsing into a snapshot of records.

use std::{collections::BTreeMap, path::PathBuf};

use krait_conda_types::{Channel, Platform, RepoData, RepoDataRecord};
use krait_networking::InterruptFlag;
use krait_trust::{Signature, TrustChain, TrustError};

use crate::fetch::{
    fetch_repo_data, CacheResult, FetchRepoDataError, FetchRepoDataOptions,
};

/// The parsed contents of one subdirectory index, plus how the cache
/// participated in obtaining it.
#[derive(Debug)]
pub struct RepoSnapshot {
    /// The channel the snapshot came from.
    pub channel: Channel,

    /// The platform of the subdirectory.
    pub platform: Platform,

    /// The package records of the subdirectory, with provenance attached.
    pub records: Vec<RepoDataRecord>,

    /// How the cache participated in the fetch.
    pub cache_result: CacheResult,
}

impl RepoSnapshot {
    /// Verifies the content trust signatures of every record in the snapshot
    /// against the package manager role of the given chain. Records without
    /// signatures fail verification.
    pub fn verify_signatures(&self, chain: &TrustChain) -> Result<(), TrustError> {
        for record in &self.records {
            let package = &record.package_record;
            let Some(signatures) = &package.signatures else {
                return Err(TrustError::RoleMetadata(format!(
                    "package {} carries no signatures",
                    record.file_name
                )));
            };

            // The signable is the record as it appears in repodata, minus
            // its own signatures field.
            let mut signable = serde_json::to_value(package)
                .map_err(TrustError::Json)?;
            if let Some(map) = signable.as_object_mut() {
                map.remove("signatures");
            }

            let signatures: BTreeMap<String, Signature> = signatures
                .iter()
                .map(|(keyid, signature)| {
                    (
                        keyid.clone(),
                        Signature {
                            signature: signature.signature.clone(),
                            other_headers: signature.other_headers.clone(),
                        },
                    )
                })
                .collect();

            chain.verify_package(&signable, &signatures)?;
        }
        Ok(())
    }
}

/// The index of one (channel, platform) pair.
#[derive(Debug, Clone)]
pub struct SubdirIndex {
    channel: Channel,
    platform: Platform,
    client: reqwest_middleware::ClientWithMiddleware,
    cache_dir: PathBuf,
    options: FetchRepoDataOptions,
}

impl SubdirIndex {
    /// Creates an index for the given channel and platform.
    pub fn new(
        channel: Channel,
        platform: Platform,
        client: reqwest_middleware::ClientWithMiddleware,
        cache_dir: PathBuf,
        options: FetchRepoDataOptions,
    ) -> Self {
        Self {
            channel,
            platform,
            client,
            cache_dir,
            options,
        }
    }

    /// Loads the snapshot: fetches (or revalidates) the repodata and parses
    /// it. Parsing happens on a blocking thread because repodata files can
    /// be large.
    pub async fn load(&self, interrupt: &InterruptFlag) -> Result<RepoSnapshot, FetchRepoDataError> {
        let subdir_url = self.channel.platform_url(self.platform);
        let cached = fetch_repo_data(
            subdir_url,
            self.client.clone(),
            self.cache_dir.clone(),
            self.options.clone(),
            interrupt,
        )
        .await?;

        let channel = self.channel.clone();
        let path = cached.repo_data_json_path.clone();
        let records = tokio::task::spawn_blocking(move || -> Result<_, FetchRepoDataError> {
            let repo_data = RepoData::from_path(&path).map_err(|e| match e {
                krait_conda_types::ReadRepoDataError::Io(e) => FetchRepoDataError::IoError(e),
                krait_conda_types::ReadRepoDataError::Json(e) => {
                    FetchRepoDataError::IoError(std::io::Error::other(e))
                }
            })?;
            Ok(repo_data.into_repo_data_records(&channel))
        })
        .await
        .map_err(|join_error| match join_error.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => FetchRepoDataError::Cancelled(krait_networking::Interrupted),
        })??;

        Ok(RepoSnapshot {
            channel: self.channel.clone(),
            platform: self.platform,
            records,
            cache_result: cached.cache_result,
        })
    }
}

/// Loads the snapshots of several channels for a platform (plus `noarch`,
/// unless the channel restricts its platforms). Failures are collected per
/// subdir so one broken channel does not poison the rest of the run.
pub async fn load_channels(
    channels: &[Channel],
    platform: Platform,
    client: &reqwest_middleware::ClientWithMiddleware,
    cache_dir: &std::path::Path,
    options: &FetchRepoDataOptions,
    interrupt: &InterruptFlag,
) -> (
    Vec<RepoSnapshot>,
    Vec<(Channel, Platform, FetchRepoDataError)>,
) {
    let mut indices = Vec::new();
    for channel in channels {
        for subdir_platform in channel.platforms_or_default(platform) {
            indices.push(SubdirIndex::new(
                channel.clone(),
                subdir_platform,
                client.clone(),
                cache_dir.to_path_buf(),
                options.clone(),
            ));
        }
    }

    let results = futures::future::join_all(
        indices
            .iter()
            .map(|index| async move { (index, index.load(interrupt).await) }),
    )
    .await;

    let mut snapshots = Vec::new();
    let mut failures = Vec::new();
    for (index, result) in results {
        match result {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(error) => {
                tracing::warn!(
                    "failed to load {}/{}: {error}",
                    index.channel.canonical_name(),
                    index.platform
                );
                failures.push((index.channel.clone(), index.platform, error));
            }
        }
    }
    (snapshots, failures)
}

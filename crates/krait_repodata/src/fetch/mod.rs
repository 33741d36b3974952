//! Conditional download and on-disk caching of `repodata.json`.
//!
//! The fetch path implements the cache state machine: a cached index that is
//! still within its `max-age` is used without touching the network; an
//! expired one is revalidated with a conditional GET (`If-None-Match` /
//! `If-Modified-Since`) where a 304 refreshes the cache without a download;
//! everything else streams the body to a temporary file that is atomically
//! renamed into place. Compressed variants (`.zst`, `.bz2`) are probed with
//! HEAD requests and preferred when available; decompression happens while
//! streaming.

pub mod cache;

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use cache::{CacheHeaders, Expiring, RepoDataState};
use krait_networking::{InterruptFlag, Interrupted};
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::instrument;
use url::Url;

/// How long a HEAD probe for a compressed variant stays valid.
fn variant_check_lifetime() -> chrono::Duration {
    chrono::Duration::days(14)
}

/// Errors that can occur while fetching repodata.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum FetchRepoDataError {
    #[error("failed to acquire a lock on the repodata cache")]
    FailedToAcquireLock(#[source] std::io::Error),

    #[error(transparent)]
    HttpError(reqwest_middleware::Error),

    #[error("repodata not found at {0}")]
    NotFound(Url),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("failed to persist temporary repodata file")]
    FailedToPersistTemporaryFile(#[from] tempfile::PathPersistError),

    #[error("failed to write cache state")]
    FailedToWriteCacheState(#[source] std::io::Error),

    #[error("there is no cache available")]
    NoCacheAvailable,

    #[error(transparent)]
    Cancelled(#[from] Interrupted),
}

impl From<reqwest_middleware::Error> for FetchRepoDataError {
    fn from(err: reqwest_middleware::Error) -> Self {
        Self::HttpError(err)
    }
}

impl From<reqwest::Error> for FetchRepoDataError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpError(err.into())
    }
}

/// Defines how to use the repodata cache.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Use the cache when it is up to date, fetch otherwise.
    #[default]
    CacheOrFetch,

    /// Only use the cache; error out when there is none.
    UseCacheOnly,

    /// Do not use the cache even when it is up to date.
    NoCache,
}

/// Options for [`fetch_repo_data`].
#[derive(Debug, Clone)]
pub struct FetchRepoDataOptions {
    /// How the cache participates in the fetch.
    pub cache_action: CacheAction,

    /// Whether to probe for and prefer the `.zst` variant.
    pub zst_enabled: bool,

    /// Whether to probe for and prefer the `.bz2` variant.
    pub bz2_enabled: bool,
}

impl Default for FetchRepoDataOptions {
    fn default() -> Self {
        Self {
            cache_action: CacheAction::default(),
            zst_enabled: true,
            bz2_enabled: true,
        }
    }
}

/// How the cache participated in a fetch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheResult {
    /// The cache was fresh, the network was not touched.
    CacheHit,

    /// The server confirmed the cache is still valid (304).
    CacheHitAfterFetch,

    /// The cache existed but was replaced by newly downloaded data.
    CacheOutdated,

    /// There was no usable cache.
    CacheNotPresent,
}

/// The result of a successful [`fetch_repo_data`].
#[derive(Debug)]
pub struct CachedRepoData {
    /// The path of the cached (decompressed) `repodata.json`.
    pub repo_data_json_path: PathBuf,

    /// The state sidecar as it is now on disk.
    pub cache_state: RepoDataState,

    /// How the cache participated.
    pub cache_result: CacheResult,
}

/// The compressed variants a subdir may offer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Encoding {
    Passthrough,
    Zst,
    Bz2,
}

impl Encoding {
    fn file_name(self) -> &'static str {
        match self {
            Encoding::Passthrough => "repodata.json",
            Encoding::Zst => "repodata.json.zst",
            Encoding::Bz2 => "repodata.json.bz2",
        }
    }
}

/// Fetches the `repodata.json` of one subdirectory into the cache directory,
/// using the cache state machine described in the module documentation.
#[instrument(err, skip_all, fields(subdir_url = %subdir_url, cache_path = %cache_path.display()))]
pub async fn fetch_repo_data(
    subdir_url: Url,
    client: reqwest_middleware::ClientWithMiddleware,
    cache_path: PathBuf,
    options: FetchRepoDataOptions,
    interrupt: &InterruptFlag,
) -> Result<CachedRepoData, FetchRepoDataError> {
    let subdir_url = normalize_subdir_url(subdir_url);
    fs_err::create_dir_all(&cache_path)?;

    // One lock file per subdir serializes concurrent fetches of the same
    // index across processes.
    let cache_key = cache_key_for_url(&subdir_url);
    let mut lock = fslock::LockFile::open(&cache_path.join(format!("{cache_key}.lock")))
        .map_err(|e| FetchRepoDataError::FailedToAcquireLock(std::io::Error::other(e)))?;
    lock.lock()
        .map_err(|e| FetchRepoDataError::FailedToAcquireLock(std::io::Error::other(e)))?;

    let repo_data_path = cache_path.join(format!("{cache_key}.json"));
    let state_path = cache_path.join(format!("{cache_key}.state.json"));

    // Load the state sidecar; a missing or unreadable sidecar simply means a
    // full refetch. `NoCache` pretends there is none.
    let state = match RepoDataState::from_path(&state_path) {
        Ok(state) => validate_cached_state(state, &repo_data_path),
        Err(e) => {
            tracing::debug!("no usable cache state: {e}");
            None
        }
    };
    let state = if options.cache_action == CacheAction::NoCache {
        None
    } else {
        state
    };

    if options.cache_action == CacheAction::UseCacheOnly {
        return match state {
            Some(state) => Ok(CachedRepoData {
                repo_data_json_path: repo_data_path,
                cache_state: state,
                cache_result: CacheResult::CacheHit,
            }),
            None => Err(FetchRepoDataError::NoCacheAvailable),
        };
    }

    // A cache within its max-age is used without touching the network.
    if options.cache_action == CacheAction::CacheOrFetch {
        if let Some(state) = &state {
            if cache_is_fresh(state) {
                tracing::debug!("repodata cache is fresh");
                return Ok(CachedRepoData {
                    repo_data_json_path: repo_data_path,
                    cache_state: state.clone(),
                    cache_result: CacheResult::CacheHit,
                });
            }
        }
    }

    interrupt.checkpoint()?;

    // Determine the best variant offered by the server, using remembered
    // probe results when they are recent enough.
    let (encoding, has_zst, has_bz2) =
        select_encoding(&client, &subdir_url, &options, state.as_ref()).await;
    let download_url = subdir_url
        .join(encoding.file_name())
        .expect("variant file names are valid url segments");

    // Build the conditional request from the stored validators.
    let mut request = client.get(download_url.clone());
    if let Some(state) = &state {
        if let Some(etag) = &state.cache_headers.etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = &state.cache_headers.last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified.clone());
        }
    }

    let response = request.send().await?;

    if response.status() == StatusCode::NOT_MODIFIED {
        tracing::debug!("server confirmed the cached repodata is still valid");
        // A 304 without stored validators means the server is misbehaving;
        // there is nothing usable on disk then.
        let Some(mut state) = state else {
            return Err(FetchRepoDataError::NoCacheAvailable);
        };
        // Refresh header derived fields, but leave the cached file (and with
        // it size and mtime) untouched.
        let headers = CacheHeaders::from(&response);
        if headers.cache_control.is_some() {
            state.cache_headers.cache_control = headers.cache_control;
        }
        state.has_zst = has_zst;
        state.has_bz2 = has_bz2;
        state
            .to_path(&state_path)
            .map_err(FetchRepoDataError::FailedToWriteCacheState)?;
        return Ok(CachedRepoData {
            repo_data_json_path: repo_data_path,
            cache_state: state,
            cache_result: CacheResult::CacheHitAfterFetch,
        });
    }

    if response.status() == StatusCode::NOT_FOUND {
        return Err(FetchRepoDataError::NotFound(download_url));
    }
    let response = response.error_for_status().map_err(FetchRepoDataError::from)?;

    let cache_headers = CacheHeaders::from(&response);
    let had_cache = state.is_some();

    // Stream the (possibly compressed) body into a temporary file next to
    // the final location, decompressing on the fly.
    let temp = tempfile::NamedTempFile::new_in(&cache_path)?;
    let (temp_file, temp_path) = temp.into_parts();
    let stream = futures::StreamExt::boxed(futures::TryStreamExt::map_err(
        response.bytes_stream(),
        std::io::Error::other,
    ));
    let body = StreamReader::new(stream);
    let copy_result = match encoding {
        Encoding::Passthrough => {
            copy_with_interrupt(body, tokio::fs::File::from_std(temp_file), interrupt).await
        }
        Encoding::Zst => {
            let decoder = async_compression::tokio::bufread::ZstdDecoder::new(body);
            copy_with_interrupt(decoder, tokio::fs::File::from_std(temp_file), interrupt).await
        }
        Encoding::Bz2 => {
            let decoder = async_compression::tokio::bufread::BzDecoder::new(body);
            copy_with_interrupt(decoder, tokio::fs::File::from_std(temp_file), interrupt).await
        }
    };
    if let Err(e) = copy_result {
        drop(temp_path);
        return Err(e);
    }

    temp_path.persist(&repo_data_path)?;

    let metadata = fs_err::metadata(&repo_data_path)?;
    let new_state = RepoDataState {
        url: download_url,
        cache_headers,
        cache_last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        cache_size: metadata.len(),
        has_zst,
        has_bz2,
    };
    new_state
        .to_path(&state_path)
        .map_err(FetchRepoDataError::FailedToWriteCacheState)?;

    Ok(CachedRepoData {
        repo_data_json_path: repo_data_path,
        cache_state: new_state,
        cache_result: if had_cache {
            CacheResult::CacheOutdated
        } else {
            CacheResult::CacheNotPresent
        },
    })
}

/// Appends a trailing slash to the subdir url so joining file names works.
pub fn normalize_subdir_url(url: Url) -> Url {
    if url.path().ends_with('/') {
        url
    } else {
        let mut url = url;
        url.set_path(&format!("{}/", url.path()));
        url
    }
}

/// Derives the cache file stem for a subdir url.
pub fn cache_key_for_url(url: &Url) -> String {
    let digest = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(url.as_str());
    format!("{:x}", digest)[..16].to_owned()
}

/// Returns the stored state if the cached file still matches it byte-for-byte
/// as far as size and mtime can tell.
fn validate_cached_state(state: RepoDataState, repo_data_path: &Path) -> Option<RepoDataState> {
    let metadata = fs_err::metadata(repo_data_path).ok()?;
    if metadata.len() != state.cache_size {
        tracing::debug!("cached repodata size changed, ignoring cache");
        return None;
    }
    if metadata.modified().ok()? != state.cache_last_modified {
        tracing::debug!("cached repodata mtime changed, ignoring cache");
        return None;
    }
    Some(state)
}

/// Returns true if the cache is still within the `max-age` the server gave.
fn cache_is_fresh(state: &RepoDataState) -> bool {
    let Some(cache_control) = &state.cache_headers.cache_control else {
        return false;
    };
    let Some(max_age) = cache_control::CacheControl::from_value(cache_control)
        .and_then(|cc| cc.max_age)
    else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(state.cache_last_modified)
        .unwrap_or_default();
    age <= max_age
}

/// Decides which variant to download, probing with HEAD requests when the
/// remembered answers have expired. Probe failures simply fall back to the
/// plain json file.
async fn select_encoding(
    client: &reqwest_middleware::ClientWithMiddleware,
    subdir_url: &Url,
    options: &FetchRepoDataOptions,
    state: Option<&RepoDataState>,
) -> (Encoding, Option<Expiring<bool>>, Option<Expiring<bool>>) {
    let has_zst = if options.zst_enabled {
        Some(probe_variant(client, subdir_url, Encoding::Zst, state.and_then(|s| s.has_zst.clone())).await)
    } else {
        None
    };
    let has_bz2 = if options.bz2_enabled {
        Some(probe_variant(client, subdir_url, Encoding::Bz2, state.and_then(|s| s.has_bz2.clone())).await)
    } else {
        None
    };

    let encoding = if has_zst.as_ref().is_some_and(|probe| probe.value) {
        Encoding::Zst
    } else if has_bz2.as_ref().is_some_and(|probe| probe.value) {
        Encoding::Bz2
    } else {
        Encoding::Passthrough
    };
    (encoding, has_zst, has_bz2)
}

async fn probe_variant(
    client: &reqwest_middleware::ClientWithMiddleware,
    subdir_url: &Url,
    encoding: Encoding,
    remembered: Option<Expiring<bool>>,
) -> Expiring<bool> {
    if let Some(remembered) = remembered {
        if remembered.value(variant_check_lifetime()).is_some() {
            return remembered;
        }
    }

    let url = subdir_url
        .join(encoding.file_name())
        .expect("variant file names are valid url segments");
    let available = match client.head(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("HEAD probe for {} failed: {e}", encoding.file_name());
            false
        }
    };
    Expiring::now(available)
}


/// Copies a reader into a writer in chunks, polling the interrupt flag
/// between chunks. On interruption the partially written data is the
/// caller's to discard.
async fn copy_with_interrupt(
    mut reader: impl AsyncRead + Unpin,
    mut writer: tokio::fs::File,
    interrupt: &InterruptFlag,
) -> Result<(), FetchRepoDataError> {
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        interrupt.checkpoint()?;
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).await?;
    }
    writer.flush().await?;
    Ok(())
}

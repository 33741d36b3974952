//! Downloading of package archives with retry, streamed digesting and
//! cooperative cancellation.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use krait_digest::{Digest, Md5, Sha256, Sha256Hash};
use krait_networking::{
    retry_policies::{RetryDecision, RetryPolicy},
    InterruptFlag,
};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{ExtractError, ExtractResult};

/// The outcome of a successful download: the path of the downloaded archive
/// and the digests computed while streaming it.
#[derive(Debug)]
pub struct DownloadedArchive {
    /// Where the archive was written. The file lives inside the destination
    /// directory under its final name.
    pub path: PathBuf,

    /// The digests of the downloaded bytes.
    pub digests: ExtractResult,

    /// The number of bytes written.
    pub size: u64,
}

/// Downloads a package archive into `destination_dir/{file_name}`.
///
/// The body is streamed into a temporary sibling file which is atomically
/// renamed into place once the full body has been received; digests are
/// computed on the fly. When an expected SHA256 digest is provided a mismatch
/// fails the download, the partial artifact is removed, and no retry is
/// attempted. Transient network failures are retried per the given policy.
/// The interrupt flag is polled between chunks; on interruption the partial
/// file is removed and [`ExtractError::Cancelled`] is returned.
pub async fn download_package(
    client: &reqwest_middleware::ClientWithMiddleware,
    url: Url,
    destination_dir: &Path,
    file_name: &str,
    expected_sha256: Option<Sha256Hash>,
    retry_policy: &dyn RetryPolicy,
    interrupt: &InterruptFlag,
) -> Result<DownloadedArchive, ExtractError> {
    tokio::fs::create_dir_all(destination_dir)
        .await
        .map_err(ExtractError::CouldNotCreateDestination)?;

    let request_start = std::time::SystemTime::now();
    let mut retries = 0u32;
    loop {
        interrupt.checkpoint()?;
        match download_once(client, url.clone(), destination_dir, file_name, interrupt).await {
            Ok(archive) => {
                if let Some(expected) = expected_sha256 {
                    if archive.digests.sha256 != expected {
                        // Integrity failures are never retried; get rid of
                        // the artifact so nothing can pick it up later.
                        let _ = tokio::fs::remove_file(&archive.path).await;
                        return Err(ExtractError::Sha256Mismatch {
                            expected: format!("{expected:x}"),
                            actual: format!("{:x}", archive.digests.sha256),
                        });
                    }
                }
                return Ok(archive);
            }
            Err(err) if err_is_transient(&err) => {
                match retry_policy.should_retry(request_start, retries) {
                    RetryDecision::Retry { execute_after } => {
                        let mut wait = execute_after
                            .duration_since(std::time::SystemTime::now())
                            .unwrap_or_default();
                        // A server that sent Retry-After knows better than
                        // the local backoff curve.
                        if let ExtractError::HttpStatus {
                            retry_after: Some(retry_after),
                            ..
                        } = &err
                        {
                            wait = wait.max(*retry_after);
                        }
                        tracing::warn!(
                            "transient failure downloading {url}: {err}; retrying in {wait:?}"
                        );
                        retries += 1;
                        tokio::time::sleep(wait).await;
                    }
                    RetryDecision::DoNotRetry => {
                        tracing::warn!("giving up on {url} after {retries} retries");
                        return Err(ExtractError::RetryLimitReached(url));
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn err_is_transient(err: &ExtractError) -> bool {
    match err {
        ExtractError::HttpStatus { status, .. } => {
            status.is_server_error()
                || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
        }
        // Connection level failures (resets, timeouts) carry no status.
        ExtractError::DownloadFailed(_, source) => {
            !source.is_builder() && !source.is_redirect()
        }
        _ => false,
    }
}

async fn download_once(
    client: &reqwest_middleware::ClientWithMiddleware,
    url: Url,
    destination_dir: &Path,
    file_name: &str,
    interrupt: &InterruptFlag,
) -> Result<DownloadedArchive, ExtractError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| middleware_error(url.clone(), e))?;
    if !response.status().is_success() {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return Err(ExtractError::HttpStatus {
            url,
            status: response.status(),
            retry_after,
        });
    }

    // Stream the body into a temporary file next to the final location.
    let temp = tempfile::NamedTempFile::new_in(destination_dir)?;
    let (temp_file, temp_path) = temp.into_parts();
    let mut writer = tokio::fs::File::from_std(temp_file);

    let mut sha256 = Sha256::new();
    let mut md5 = Md5::new();
    let mut size = 0u64;

    let mut stream = response.bytes_stream().boxed();
    let result: Result<(), ExtractError> = loop {
        if let Err(interrupted) = interrupt.checkpoint() {
            break Err(interrupted.into());
        }
        match stream.next().await {
            None => break Ok(()),
            Some(Ok(chunk)) => {
                sha256.update(&chunk);
                md5.update(&chunk);
                size += chunk.len() as u64;
                if let Err(e) = writer.write_all(&chunk).await {
                    break Err(e.into());
                }
            }
            Some(Err(e)) => break Err(ExtractError::DownloadFailed(url.clone(), e)),
        }
    };

    match result {
        Ok(()) => {
            writer.flush().await?;
            drop(writer);
            let final_path = destination_dir.join(file_name);
            temp_path.persist(&final_path).map_err(|e| e.error)?;
            Ok(DownloadedArchive {
                path: final_path,
                digests: ExtractResult {
                    sha256: sha256.finalize(),
                    md5: md5.finalize(),
                },
                size,
            })
        }
        Err(err) => {
            // The temp file is unlinked when `temp_path` drops.
            drop(writer);
            drop(temp_path);
            Err(err)
        }
    }
}

fn middleware_error(url: Url, err: reqwest_middleware::Error) -> ExtractError {
    match err {
        reqwest_middleware::Error::Reqwest(e) => ExtractError::DownloadFailed(url, e),
        reqwest_middleware::Error::Middleware(e) => {
            ExtractError::IoError(std::io::Error::other(e))
        }
    }
}

#[cfg(test)]
mod test {
    use std::{future::IntoFuture, net::SocketAddr};

    use krait_networking::{retry_policies::default_retry_policy, InterruptFlag};
    use tower_http::services::ServeDir;

    use crate::test_utils::build_tar_bz2;

    use super::download_package;

    async fn serve(dir: &std::path::Path) -> url::Url {
        let service = axum::routing::get_service(ServeDir::new(dir));
        let app = axum::Router::new().fallback_service(service);
        let listener =
            tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
                .await
                .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        url::Url::parse(&format!("http://127.0.0.1:{}/", addr.port())).unwrap()
    }

    #[tokio::test]
    async fn downloads_and_validates() {
        let server_dir = tempfile::tempdir().unwrap();
        let archive = build_tar_bz2(&[("info/index.json", b"{}")]);
        std::fs::write(server_dir.path().join("pkga-1.0-0.tar.bz2"), &archive).unwrap();
        let base = serve(server_dir.path()).await;

        let dest = tempfile::tempdir().unwrap();
        let client = krait_networking::default_client();
        let expected = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(&archive);

        let downloaded = download_package(
            &client,
            base.join("pkga-1.0-0.tar.bz2").unwrap(),
            dest.path(),
            "pkga-1.0-0.tar.bz2",
            Some(expected),
            &default_retry_policy(),
            &InterruptFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(downloaded.size, archive.len() as u64);
        assert_eq!(std::fs::read(downloaded.path).unwrap(), archive);
    }

    #[tokio::test]
    async fn checksum_mismatch_removes_the_artifact() {
        let server_dir = tempfile::tempdir().unwrap();
        let archive = build_tar_bz2(&[("info/index.json", b"{}")]);
        std::fs::write(server_dir.path().join("pkga-1.0-0.tar.bz2"), &archive).unwrap();
        let base = serve(server_dir.path()).await;

        let dest = tempfile::tempdir().unwrap();
        let client = krait_networking::default_client();
        let wrong = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(b"other");

        let result = download_package(
            &client,
            base.join("pkga-1.0-0.tar.bz2").unwrap(),
            dest.path(),
            "pkga-1.0-0.tar.bz2",
            Some(wrong),
            &default_retry_policy(),
            &InterruptFlag::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(crate::ExtractError::Sha256Mismatch { .. })
        ));
        assert!(!dest.path().join("pkga-1.0-0.tar.bz2").exists());
    }

    #[tokio::test]
    async fn interrupted_downloads_are_cancelled() {
        let server_dir = tempfile::tempdir().unwrap();
        std::fs::write(server_dir.path().join("pkga-1.0-0.tar.bz2"), b"data").unwrap();
        let base = serve(server_dir.path()).await;

        let dest = tempfile::tempdir().unwrap();
        let client = krait_networking::default_client();
        let interrupt = InterruptFlag::new();
        interrupt.interrupt();

        let result = download_package(
            &client,
            base.join("pkga-1.0-0.tar.bz2").unwrap(),
            dest.path(),
            "pkga-1.0-0.tar.bz2",
            None,
            &default_retry_policy(),
            &interrupt,
        )
        .await;

        assert!(matches!(result, Err(crate::ExtractError::Cancelled(_))));
        assert!(!dest.path().join("pkga-1.0-0.tar.bz2").exists());
    }
}

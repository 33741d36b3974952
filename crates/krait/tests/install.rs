//! End to end flows: a local http channel, a real solve, and a real install
//! into a temporary prefix.

use std::{
    future::IntoFuture,
    io::Write,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use krait::{install::Transaction, Installer, Prefix};
use krait_cache::{MultiPackageCache, VerificationPolicy};
use krait_conda_types::{Channel, MatchSpec, Platform, PrefixRecord, RepoDataRecord};
use krait_networking::InterruptFlag;
use krait_repodata::{fetch::FetchRepoDataOptions, load_channels};
use krait_solve::{resolve, RepoSource, SolverTask};
use tower_http::services::ServeDir;

/// One file of a test package.
struct PackageFileSpec {
    path: &'static str,
    content: Vec<u8>,
    executable: bool,
}

fn file(path: &'static str, content: &str) -> PackageFileSpec {
    PackageFileSpec {
        path,
        content: content.as_bytes().to_vec(),
        executable: false,
    }
}

fn script(path: &'static str, content: &str) -> PackageFileSpec {
    PackageFileSpec {
        path,
        content: content.as_bytes().to_vec(),
        executable: true,
    }
}

/// Builds a `.tar.bz2` conda package and returns (archive bytes, sha256 hex,
/// size).
fn build_package(
    name: &str,
    version: &str,
    depends: &[&str],
    files: &[PackageFileSpec],
) -> (Vec<u8>, String, u64) {
    let mut entries: Vec<(String, Vec<u8>, u32)> = Vec::new();

    let index_json = format!(
        r#"{{"name": "{name}", "version": "{version}", "build": "0", "build_number": 0,
            "subdir": "noarch", "depends": [{depends}]}}"#,
        depends = depends
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    entries.push(("info/index.json".to_owned(), index_json.into_bytes(), 0o644));

    let paths: Vec<String> = files
        .iter()
        .map(|f| {
            let digest =
                krait_digest::compute_bytes_digest::<krait_digest::Sha256>(&f.content);
            format!(
                r#"{{"_path": "{}", "path_type": "hardlink", "sha256": "{digest:x}", "size_in_bytes": {}}}"#,
                f.path,
                f.content.len()
            )
        })
        .collect();
    let paths_json = format!(
        r#"{{"paths_version": 1, "paths": [{}]}}"#,
        paths.join(", ")
    );
    entries.push(("info/paths.json".to_owned(), paths_json.into_bytes(), 0o644));

    for f in files {
        entries.push((
            f.path.to_owned(),
            f.content.clone(),
            if f.executable { 0o755 } else { 0o644 },
        ));
    }

    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        for (path, content, mode) in &entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_slice())
                .unwrap();
        }
        builder.finish().unwrap();
    }
    encoder.flush().unwrap();
    let bytes = encoder.finish().unwrap();

    let sha = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(&bytes);
    let size = bytes.len() as u64;
    (bytes, format!("{sha:x}"), size)
}

struct TestChannel {
    root: tempfile::TempDir,
    records: Vec<String>,
}

impl TestChannel {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(root.path().join("noarch")).unwrap();
        Self {
            root,
            records: Vec::new(),
        }
    }

    fn add_package(
        &mut self,
        name: &str,
        version: &str,
        depends: &[&str],
        files: &[PackageFileSpec],
    ) {
        self.add_package_with_sha(name, version, depends, files, None);
    }

    /// Adds a package, optionally lying about its sha256.
    fn add_package_with_sha(
        &mut self,
        name: &str,
        version: &str,
        depends: &[&str],
        files: &[PackageFileSpec],
        sha_override: Option<&str>,
    ) {
        let (bytes, sha, size) = build_package(name, version, depends, files);
        let file_name = format!("{name}-{version}-0.tar.bz2");
        fs_err::write(self.root.path().join("noarch").join(&file_name), bytes).unwrap();

        let depends_json = depends
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let sha = sha_override.unwrap_or(&sha);
        self.records.push(format!(
            r#""{file_name}": {{"build": "0", "build_number": 0, "depends": [{depends_json}],
               "name": "{name}", "sha256": "{sha}", "size": {size}, "subdir": "noarch",
               "version": "{version}"}}"#
        ));
    }

    fn write_repodata(&self) {
        let repodata = format!(
            r#"{{"info": {{"subdir": "noarch"}}, "packages": {{{}}}}}"#,
            self.records.join(", ")
        );
        fs_err::write(self.root.path().join("noarch/repodata.json"), repodata).unwrap();
    }

    async fn serve(&self) -> url::Url {
        let service = axum::routing::get_service(ServeDir::new(self.root.path().to_path_buf()));
        let app = axum::Router::new().fallback_service(service);
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        url::Url::parse(&format!("http://127.0.0.1:{}/", addr.port())).unwrap()
    }
}

/// Loads the channel, solves the given specs against the prefix contents and
/// returns the transaction plus the records of the desired state.
async fn plan(
    channel_url: url::Url,
    cache_dir: &Path,
    prefix: &Prefix,
    specs: &[&str],
) -> Transaction<PrefixRecord, RepoDataRecord> {
    let channel = Channel::from_url(channel_url);
    let (snapshots, failures) = load_channels(
        &[channel],
        Platform::Linux64,
        &krait_networking::default_client(),
        cache_dir,
        &FetchRepoDataOptions::default(),
        &InterruptFlag::new(),
    )
    .await;
    assert!(failures.len() <= 1, "only the missing linux-64 subdir may fail");

    let installed = prefix.installed_packages().unwrap();
    let installed_records: Vec<RepoDataRecord> = installed
        .iter()
        .map(|r| r.repodata_record.clone())
        .collect();

    let mut task = SolverTask::new(
        snapshots
            .iter()
            .map(|s| RepoSource {
                records: &s.records,
                channel_priority: 0,
            })
            .collect(),
        &installed_records,
    );
    task.specs = specs.iter().map(|s| s.parse().unwrap()).collect();
    let desired: Vec<RepoDataRecord> = resolve(task).unwrap().into_iter().cloned().collect();

    Transaction::from_current_and_desired(installed, desired, Platform::Linux64).unwrap()
}

fn installer(cache_dir: &Path) -> Installer {
    Installer::new()
        .with_download_client(krait_networking::default_client())
        .with_package_cache(MultiPackageCache::new(
            vec![cache_dir.join("pkgs")],
            VerificationPolicy::Strict,
        ))
}

/// Collects every file in a directory tree, relative to the root.
fn tree(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, acc: &mut Vec<PathBuf>) {
        for entry in fs_err::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, acc);
            } else {
                acc.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut acc = Vec::new();
    walk(root, root, &mut acc);
    acc.sort();
    acc
}

#[tokio::test]
async fn single_install_fresh_cache() {
    let mut channel = TestChannel::new();
    channel.add_package(
        "pkgb",
        "2.1",
        &[],
        &[file("lib/pkgb/data.txt", "pkgb payload")],
    );
    channel.add_package(
        "pkga",
        "1.0",
        &["pkgb 2.*"],
        &[file("lib/pkga/data.txt", "pkga payload")],
    );
    channel.write_repodata();
    let url = channel.serve().await;

    let workspace = tempfile::tempdir().unwrap();
    let prefix = Prefix::create(workspace.path().join("env")).unwrap();

    let transaction = plan(url, workspace.path(), &prefix, &["pkga"]).await;
    assert_eq!(transaction.operations.len(), 2);

    installer(workspace.path())
        .with_requested_specs(vec![MatchSpec::from_str("pkga").unwrap()])
        .with_command("install pkga")
        .execute(&prefix, transaction)
        .await
        .unwrap();

    // Both packages are installed: two conda-meta records and the payloads.
    let installed = prefix.installed_packages().unwrap();
    assert_eq!(installed.len(), 2);
    assert!(prefix.path().join("lib/pkga/data.txt").is_file());
    assert!(prefix.path().join("lib/pkgb/data.txt").is_file());

    // The explicitly requested spec is recorded on its package.
    let pkga = installed
        .iter()
        .find(|r| r.repodata_record.package_record.name.as_normalized() == "pkga")
        .unwrap();
    assert_eq!(pkga.requested_spec.as_deref(), Some("pkga"));

    // The pipeline downloaded exactly the two archives.
    let cache = workspace.path().join("pkgs");
    assert!(cache.join("pkga-1.0-0.tar.bz2").is_file());
    assert!(cache.join("pkgb-2.1-0.tar.bz2").is_file());

    // The history log recorded the transaction.
    let history = fs_err::read_to_string(prefix.conda_meta_path().join("history")).unwrap();
    assert!(history.contains("+pkga-1.0-0"));
    assert!(history.contains("+pkgb-2.1-0"));
    assert!(history.contains("# cmd: install pkga"));
}

#[tokio::test]
async fn transaction_and_inverse_restore_the_prefix() {
    let mut channel = TestChannel::new();
    channel.add_package("pkgb", "2.1", &[], &[file("lib/pkgb/data.txt", "b")]);
    channel.add_package("pkga", "1.0", &["pkgb 2.*"], &[file("lib/pkga/data.txt", "a")]);
    channel.write_repodata();
    let url = channel.serve().await;

    let workspace = tempfile::tempdir().unwrap();
    let prefix = Prefix::create(workspace.path().join("env")).unwrap();
    let initial_tree = tree(prefix.path());

    // Forward: install.
    let transaction = plan(url.clone(), workspace.path(), &prefix, &["pkga"]).await;
    installer(workspace.path())
        .execute(&prefix, transaction)
        .await
        .unwrap();
    assert_eq!(prefix.installed_packages().unwrap().len(), 2);

    // Inverse: remove everything that was installed.
    let installed = prefix.installed_packages().unwrap();
    let inverse =
        Transaction::from_current_and_desired(installed, Vec::<RepoDataRecord>::new(), Platform::Linux64)
            .unwrap();
    installer(workspace.path())
        .execute(&prefix, inverse)
        .await
        .unwrap();

    assert!(prefix.installed_packages().unwrap().is_empty());
    // Modulo the history log the prefix is back to its initial file set.
    let final_tree: Vec<PathBuf> = tree(prefix.path())
        .into_iter()
        .filter(|p| {
            p != Path::new("conda-meta/history") && p != Path::new("conda-meta/krait.lock")
        })
        .collect();
    assert_eq!(final_tree, initial_tree);
}

#[tokio::test]
async fn checksum_mismatch_fails_without_touching_the_prefix() {
    let mut channel = TestChannel::new();
    channel.add_package_with_sha(
        "pkga",
        "1.0",
        &[],
        &[file("lib/pkga/data.txt", "payload")],
        Some("0000000000000000000000000000000000000000000000000000000000000000"),
    );
    channel.write_repodata();
    let url = channel.serve().await;

    let workspace = tempfile::tempdir().unwrap();
    let prefix = Prefix::create(workspace.path().join("env")).unwrap();

    let transaction = plan(url, workspace.path(), &prefix, &["pkga"]).await;
    let error = installer(workspace.path())
        .execute(&prefix, transaction)
        .await
        .unwrap_err();

    // Download/extract failures map to exit code 5 and the prefix stays
    // untouched.
    assert_eq!(error.exit_code().0, 5);
    assert!(prefix.installed_packages().unwrap().is_empty());
    assert!(!prefix.path().join("lib").exists());
    // The corrupt artifact was deleted from the cache.
    assert!(!workspace.path().join("pkgs/pkga-1.0-0.tar.bz2").exists());
}

#[tokio::test]
async fn failing_post_link_script_rolls_back() {
    let mut channel = TestChannel::new();
    channel.add_package(
        "badpkg",
        "1.0",
        &[],
        &[
            file("lib/badpkg/data.txt", "payload"),
            script("bin/.badpkg-post-link.sh", "#!/bin/sh\nexit 1\n"),
        ],
    );
    channel.write_repodata();
    let url = channel.serve().await;

    let workspace = tempfile::tempdir().unwrap();
    let prefix = Prefix::create(workspace.path().join("env")).unwrap();

    let transaction = plan(url, workspace.path(), &prefix, &["badpkg"]).await;
    let error = installer(workspace.path())
        .with_execute_link_scripts(true)
        .execute(&prefix, transaction)
        .await
        .unwrap_err();
    assert_eq!(error.exit_code().0, 1);

    // The rollback removed everything the transaction had already linked.
    assert!(prefix.installed_packages().unwrap().is_empty());
    assert!(!prefix.path().join("lib").exists());
    assert!(!prefix.path().join("bin").exists());
}

#[tokio::test]
async fn reinstalling_from_a_warm_cache_downloads_nothing() {
    let mut channel = TestChannel::new();
    channel.add_package("pkga", "1.0", &[], &[file("lib/pkga/data.txt", "payload")]);
    channel.write_repodata();
    let url = channel.serve().await;

    let workspace = tempfile::tempdir().unwrap();
    let prefix_a = Prefix::create(workspace.path().join("env-a")).unwrap();
    let prefix_b = Prefix::create(workspace.path().join("env-b")).unwrap();

    let transaction = plan(url.clone(), workspace.path(), &prefix_a, &["pkga"]).await;
    installer(workspace.path())
        .execute(&prefix_a, transaction)
        .await
        .unwrap();

    // Poison the served archive; a second install must come from the cache.
    fs_err::write(
        channel.root.path().join("noarch/pkga-1.0-0.tar.bz2"),
        "garbage",
    )
    .unwrap();

    let transaction = plan(url, workspace.path(), &prefix_b, &["pkga"]).await;
    installer(workspace.path())
        .execute(&prefix_b, transaction)
        .await
        .unwrap();
    assert!(prefix_b.path().join("lib/pkga/data.txt").is_file());
}

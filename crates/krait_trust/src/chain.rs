//! The trust chain: root rotation and role derivation.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::{
    error::TrustError,
    model::{RoleType, SignedFile, SpecVersion},
    signature::{verify_signature, Signature},
};

/// One key entitled to sign for a role.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RoleKey {
    /// The identifier signatures refer to the key by.
    pub keyid: String,

    /// The hex encoded Ed25519 public key.
    pub public_key: String,
}

/// The key set and threshold a role delegates to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RoleKeys {
    /// The keys entitled to sign.
    pub keys: Vec<RoleKey>,

    /// How many distinct keyids must have produced a valid signature.
    pub threshold: u32,
}

/// The verified signing hierarchy of one channel.
///
/// Construction starts from a root file that is trusted out of band and read
/// from local disk. [`TrustChain::update_from_directory`] and
/// [`TrustChain::update_from_channel`] then walk forward through successor
/// root files (`2.root.json`, `3.root.json`, …) until no further version
/// exists, verifying each step with the keys of its predecessor. Delegated
/// roles are verified against whatever root is current at that point.
#[derive(Debug)]
pub struct TrustChain {
    root: SignedFile,
    root_version: u32,
    key_mgr: Option<SignedFile>,
    pkg_mgr: Option<SignedFile>,
}

impl TrustChain {
    /// Loads the initial trusted root from local disk. The file name must
    /// follow the `N.root.json` pattern and agree with the version recorded
    /// inside; the file must carry enough valid self signatures to meet its
    /// own root threshold.
    pub fn from_trusted_root_file(path: impl AsRef<Path>) -> Result<Self, TrustError> {
        let path = path.as_ref();
        let file_version = root_file_version(path)?;
        let content = fs_err::read_to_string(path)?;
        let root = SignedFile::from_json_str(&content)?;

        if root.role_type_str()? != RoleType::Root.as_str() {
            return Err(TrustError::RoleMetadata(format!(
                "expected a root role, found '{}'",
                root.role_type_str()?
            )));
        }
        let version = root.version()?;
        if version != file_version {
            return Err(TrustError::RoleFile(format!(
                "file name version {file_version} does not match signed version {version}"
            )));
        }

        // The initial root must at least be internally consistent.
        let keys = root.delegation(RoleType::Root)?;
        verify_threshold(
            &root.canonical_bytes()?,
            &root.signatures,
            &keys,
            RoleType::Root.as_str(),
        )?;

        Ok(Self {
            root,
            root_version: version,
            key_mgr: None,
            pkg_mgr: None,
        })
    }

    /// The version of the currently trusted root.
    pub fn root_version(&self) -> u32 {
        self.root_version
    }

    /// The metadata spec version of the currently trusted root.
    pub fn spec_version(&self) -> SpecVersion {
        self.root.spec_version
    }

    /// Advances the chain by one root file. The successor must be signed by
    /// threshold-many keys of the *current* root, carry exactly the next
    /// version number, and be unexpired.
    pub fn advance_root(&mut self, content: &str) -> Result<(), TrustError> {
        let successor = SignedFile::from_json_str(content)?;
        let expected = self.root_version + 1;

        if successor.role_type_str()? != RoleType::Root.as_str() {
            return Err(TrustError::RoleMetadata(format!(
                "expected a root role, found '{}'",
                successor.role_type_str()?
            )));
        }

        let found = successor.version()?;
        if found != expected {
            return Err(TrustError::Rollback { expected, found });
        }

        // Spec versions may only move forward along the chain.
        if successor.spec_version < self.root.spec_version {
            return Err(TrustError::SpecVersion(format!(
                "root {found} downgrades the metadata spec"
            )));
        }

        let expiration = successor.expiration()?;
        if expiration <= Utc::now() {
            return Err(TrustError::Freeze {
                role: RoleType::Root.as_str().to_owned(),
                expiration,
            });
        }

        let predecessor_keys = self.root.delegation(RoleType::Root)?;
        verify_threshold(
            &successor.canonical_bytes()?,
            &successor.signatures,
            &predecessor_keys,
            RoleType::Root.as_str(),
        )?;

        tracing::debug!(version = found, "advanced trusted root");
        self.root = successor;
        self.root_version = expected;

        // Derived roles must be re-verified against the new root.
        self.key_mgr = None;
        self.pkg_mgr = None;
        Ok(())
    }

    /// Walks forward through `N.root.json` files in a local directory until
    /// no further version exists.
    pub fn update_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<(), TrustError> {
        loop {
            let candidate = dir
                .as_ref()
                .join(format!("{}.root.json", self.root_version + 1));
            if !candidate.is_file() {
                return Ok(());
            }
            let content = fs_err::read_to_string(&candidate)?;
            self.advance_root(&content)?;
        }
    }

    /// Walks forward through `N.root.json` files published at the given base
    /// url until the next version does not exist.
    pub async fn update_from_channel(
        &mut self,
        client: &reqwest::Client,
        base_url: &Url,
    ) -> Result<(), TrustError> {
        loop {
            let name = format!("{}.root.json", self.root_version + 1);
            let url = base_url
                .join(&name)
                .map_err(|e| TrustError::RoleFile(format!("invalid role url '{name}': {e}")))?;
            let response = client.get(url).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(());
            }
            let content = response.error_for_status()?.text().await?;
            self.advance_root(&content)?;
        }
    }

    /// Verifies a `key_mgr.json` file against the current root and stores it.
    pub fn verify_key_mgr(&mut self, content: &str) -> Result<(), TrustError> {
        let file = self.verify_delegated_role(content, RoleType::KeyMgr, &self.root)?;
        self.key_mgr = Some(file);
        self.pkg_mgr = None;
        Ok(())
    }

    /// Verifies a `pkg_mgr.json` file against the current key manager and
    /// stores it.
    pub fn verify_pkg_mgr(&mut self, content: &str) -> Result<(), TrustError> {
        let key_mgr = self.key_mgr.as_ref().ok_or_else(|| {
            TrustError::RoleMetadata("key_mgr must be verified before pkg_mgr".to_owned())
        })?;
        let file = self.verify_delegated_role(content, RoleType::PkgMgr, key_mgr)?;
        self.pkg_mgr = Some(file);
        Ok(())
    }

    /// Verifies the signatures over one package record. The signable is the
    /// record as it appears in repodata (without its `signatures` field); the
    /// signatures map keyids to signatures. Verification uses the package
    /// manager keys delegated by the current key manager; a verified
    /// `pkg_mgr.json` must be in place first.
    pub fn verify_package(
        &self,
        signable: &Value,
        signatures: &BTreeMap<String, Signature>,
    ) -> Result<(), TrustError> {
        let key_mgr = self.key_mgr.as_ref().ok_or_else(|| {
            TrustError::RoleMetadata("key_mgr must be verified before packages".to_owned())
        })?;
        if self.pkg_mgr.is_none() {
            return Err(TrustError::RoleMetadata(
                "pkg_mgr must be verified before packages".to_owned(),
            ));
        }
        let keys = key_mgr.delegation(RoleType::PkgMgr)?;
        let canonical = self.spec_version().canonical_bytes(signable)?;
        verify_threshold(&canonical, signatures, &keys, RoleType::PkgMgr.as_str())
    }

    fn verify_delegated_role(
        &self,
        content: &str,
        role: RoleType,
        verifier: &SignedFile,
    ) -> Result<SignedFile, TrustError> {
        let file = SignedFile::from_json_str(content)?;
        if file.role_type_str()? != role.as_str() {
            return Err(TrustError::RoleMetadata(format!(
                "expected a {} role, found '{}'",
                role.as_str(),
                file.role_type_str()?
            )));
        }

        let expiration = file.expiration()?;
        if expiration <= Utc::now() {
            return Err(TrustError::Freeze {
                role: role.as_str().to_owned(),
                expiration,
            });
        }

        let keys = verifier.delegation(role)?;
        verify_threshold(&file.canonical_bytes()?, &file.signatures, &keys, role.as_str())?;
        Ok(file)
    }
}

/// Counts distinct valid signatures from the role's key set and compares
/// against the threshold.
fn verify_threshold(
    canonical: &[u8],
    signatures: &BTreeMap<String, Signature>,
    keys: &RoleKeys,
    role: &str,
) -> Result<(), TrustError> {
    let mut valid = 0u32;
    for key in &keys.keys {
        if let Some(signature) = signatures.get(&key.keyid) {
            if verify_signature(&key.public_key, canonical, signature) {
                valid += 1;
            }
        }
    }
    if valid < keys.threshold {
        return Err(TrustError::Role {
            role: role.to_owned(),
            threshold: keys.threshold,
            valid,
        });
    }
    Ok(())
}

/// Extracts `N` from a `N.root.json` file name.
fn root_file_version(path: &Path) -> Result<u32, TrustError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    name.strip_suffix(".root.json")
        .and_then(|version| version.parse().ok())
        .ok_or_else(|| {
            TrustError::RoleFile(format!(
                "'{name}' does not follow the N.root.json naming pattern"
            ))
        })
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::{json, Value};

    use super::TrustChain;
    use crate::{error::TrustError, model::SpecVersion, signature::Signature};

    struct Key {
        signing: SigningKey,
        public: String,
    }

    fn key() -> Key {
        let signing = SigningKey::generate(&mut OsRng);
        let public = hex::encode(signing.verifying_key().to_bytes());
        Key { signing, public }
    }

    fn sign_v06(signed: &Value, keys: &[&Key]) -> Value {
        let canonical = SpecVersion::V06.canonical_bytes(signed).unwrap();
        let signatures: serde_json::Map<String, Value> = keys
            .iter()
            .map(|key| {
                (
                    key.public.clone(),
                    json!({"signature": hex::encode(key.signing.sign(&canonical).to_bytes())}),
                )
            })
            .collect();
        json!({"signed": signed, "signatures": signatures})
    }

    fn root_payload(version: u32, root_keys: &[&Key], key_mgr_keys: &[&Key]) -> Value {
        json!({
            "delegations": {
                "root": {
                    "pubkeys": root_keys.iter().map(|k| k.public.clone()).collect::<Vec<_>>(),
                    "threshold": 1
                },
                "key_mgr": {
                    "pubkeys": key_mgr_keys.iter().map(|k| k.public.clone()).collect::<Vec<_>>(),
                    "threshold": 1
                }
            },
            "expiration": "2031-01-01T00:00:00Z",
            "metadata_spec_version": "0.6.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "type": "root",
            "version": version
        })
    }

    fn write_root(dir: &std::path::Path, version: u32, file: &Value) -> std::path::PathBuf {
        let path = dir.join(format!("{version}.root.json"));
        fs_err::write(&path, serde_json::to_string_pretty(file).unwrap()).unwrap();
        path
    }

    #[test]
    fn root_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let root1_key = key();
        let key_mgr1_key = key();
        let root2_key = key();
        let key_mgr2_key = key();

        // 1.root.json is self signed; 2.root.json introduces a new root key
        // and a new key manager, signed by the version 1 key.
        let payload1 = root_payload(1, &[&root1_key], &[&key_mgr1_key]);
        let path1 = write_root(dir.path(), 1, &sign_v06(&payload1, &[&root1_key]));

        let payload2 = root_payload(2, &[&root2_key], &[&key_mgr2_key]);
        write_root(dir.path(), 2, &sign_v06(&payload2, &[&root1_key]));

        let mut chain = TrustChain::from_trusted_root_file(&path1).unwrap();
        assert_eq!(chain.root_version(), 1);

        chain.update_from_directory(dir.path()).unwrap();
        assert_eq!(chain.root_version(), 2);

        // The key manager must now verify against the *new* root keys.
        let key_mgr_payload = json!({
            "delegations": {
                "pkg_mgr": {"pubkeys": [key().public], "threshold": 1}
            },
            "expiration": "2031-01-01T00:00:00Z",
            "metadata_spec_version": "0.6.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "type": "key_mgr",
            "version": 1
        });
        let signed_by_old = sign_v06(&key_mgr_payload, &[&key_mgr1_key]);
        assert_matches!(
            chain.verify_key_mgr(&serde_json::to_string(&signed_by_old).unwrap()),
            Err(TrustError::Role { .. })
        );

        let signed_by_new = sign_v06(&key_mgr_payload, &[&key_mgr2_key]);
        chain
            .verify_key_mgr(&serde_json::to_string(&signed_by_new).unwrap())
            .unwrap();
    }

    #[test]
    fn version_skips_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root_key = key();
        let payload1 = root_payload(1, &[&root_key], &[&root_key]);
        let path1 = write_root(dir.path(), 1, &sign_v06(&payload1, &[&root_key]));

        let mut chain = TrustChain::from_trusted_root_file(&path1).unwrap();

        let payload3 = root_payload(3, &[&root_key], &[&root_key]);
        let file3 = sign_v06(&payload3, &[&root_key]);
        assert_matches!(
            chain.advance_root(&serde_json::to_string(&file3).unwrap()),
            Err(TrustError::Rollback {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn expired_successors_freeze() {
        let dir = tempfile::tempdir().unwrap();
        let root_key = key();
        let payload1 = root_payload(1, &[&root_key], &[&root_key]);
        let path1 = write_root(dir.path(), 1, &sign_v06(&payload1, &[&root_key]));
        let mut chain = TrustChain::from_trusted_root_file(&path1).unwrap();

        let mut payload2 = root_payload(2, &[&root_key], &[&root_key]);
        payload2["expiration"] = json!("2020-01-01T00:00:00Z");
        let file2 = sign_v06(&payload2, &[&root_key]);
        assert_matches!(
            chain.advance_root(&serde_json::to_string(&file2).unwrap()),
            Err(TrustError::Freeze { .. })
        );
    }

    #[test]
    fn tampered_roots_miss_the_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let root_key = key();
        let attacker_key = key();
        let payload1 = root_payload(1, &[&root_key], &[&root_key]);
        let path1 = write_root(dir.path(), 1, &sign_v06(&payload1, &[&root_key]));
        let mut chain = TrustChain::from_trusted_root_file(&path1).unwrap();

        // Signed by a key the current root never delegated to.
        let payload2 = root_payload(2, &[&attacker_key], &[&attacker_key]);
        let file2 = sign_v06(&payload2, &[&attacker_key]);
        assert_matches!(
            chain.advance_root(&serde_json::to_string(&file2).unwrap()),
            Err(TrustError::Role { .. })
        );
    }

    #[test]
    fn file_name_version_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let root_key = key();
        // Contents say version 2, file name says 1.
        let payload = root_payload(2, &[&root_key], &[&root_key]);
        let path = write_root(dir.path(), 1, &sign_v06(&payload, &[&root_key]));
        assert_matches!(
            TrustChain::from_trusted_root_file(&path),
            Err(TrustError::RoleFile(_))
        );

        let badly_named = dir.path().join("root.json");
        fs_err::write(&badly_named, "{}").unwrap();
        assert_matches!(
            TrustChain::from_trusted_root_file(&badly_named),
            Err(TrustError::RoleFile(_))
        );
    }

    #[test]
    fn package_signatures_verify_against_pkg_mgr_keys() {
        let dir = tempfile::tempdir().unwrap();
        let root_key = key();
        let key_mgr_key = key();
        let pkg_key = key();

        let payload1 = root_payload(1, &[&root_key], &[&key_mgr_key]);
        let path1 = write_root(dir.path(), 1, &sign_v06(&payload1, &[&root_key]));
        let mut chain = TrustChain::from_trusted_root_file(&path1).unwrap();

        let key_mgr_payload = json!({
            "delegations": {
                "pkg_mgr": {"pubkeys": [pkg_key.public.clone()], "threshold": 1}
            },
            "expiration": "2031-01-01T00:00:00Z",
            "metadata_spec_version": "0.6.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "type": "key_mgr",
            "version": 1
        });
        let key_mgr_file = sign_v06(&key_mgr_payload, &[&key_mgr_key]);
        chain
            .verify_key_mgr(&serde_json::to_string(&key_mgr_file).unwrap())
            .unwrap();

        let pkg_mgr_payload = json!({
            "delegations": {},
            "expiration": "2031-01-01T00:00:00Z",
            "metadata_spec_version": "0.6.0",
            "timestamp": "2024-01-01T00:00:00Z",
            "type": "pkg_mgr",
            "version": 1
        });
        let pkg_mgr_file = sign_v06(&pkg_mgr_payload, &[&pkg_key]);
        chain
            .verify_pkg_mgr(&serde_json::to_string(&pkg_mgr_file).unwrap())
            .unwrap();

        let signable = json!({"name": "pkga", "version": "1.0", "build": "py_0"});
        let canonical = SpecVersion::V06.canonical_bytes(&signable).unwrap();
        let mut signatures = BTreeMap::new();
        signatures.insert(
            pkg_key.public.clone(),
            Signature {
                signature: hex::encode(pkg_key.signing.sign(&canonical).to_bytes()),
                other_headers: None,
            },
        );
        chain.verify_package(&signable, &signatures).unwrap();

        // A bad signature does not meet the threshold.
        signatures.get_mut(&pkg_key.public).unwrap().signature =
            hex::encode([0u8; 64]);
        assert_matches!(
            chain.verify_package(&signable, &signatures),
            Err(TrustError::Role { .. })
        );
    }
}

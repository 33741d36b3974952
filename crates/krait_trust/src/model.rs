//! The on-disk shapes of role metadata files.
//!
//! Two metadata spec versions exist in the wild. Spec v0.6 keeps the key
//! material inline in a `delegations` map and canonicalizes the signed block
//! as 2-space indented pretty JSON; spec v1 follows the TUF layout with
//! separate `keys` and `roles` maps and compact RFC 8259 canonical JSON. In
//! both cases keys of JSON objects are sorted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::TrustError, signature::Signature};

/// The metadata spec versions this implementation understands.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum SpecVersion {
    /// Spec 0.6: pretty printed canonical JSON, inline delegations.
    V06,

    /// Spec 1: compact canonical JSON, TUF style keys/roles split.
    V1,
}

impl SpecVersion {
    /// Serializes a signed block into its canonical byte form.
    pub fn canonical_bytes(self, signed: &Value) -> Result<Vec<u8>, TrustError> {
        // serde_json maps are ordered, which yields sorted keys for
        // everything that went through a `Value`.
        Ok(match self {
            SpecVersion::V06 => serde_json::to_vec_pretty(signed)?,
            SpecVersion::V1 => serde_json::to_vec(signed)?,
        })
    }

    /// Determines the spec version a signed block declares.
    pub fn detect(signed: &Value) -> Result<Self, TrustError> {
        if let Some(version) = signed.get("metadata_spec_version").and_then(Value::as_str) {
            if version.starts_with("0.6") {
                return Ok(SpecVersion::V06);
            }
            return Err(TrustError::SpecVersion(version.to_owned()));
        }
        if let Some(version) = signed.get("spec_version").and_then(Value::as_str) {
            if version.starts_with('1') {
                return Ok(SpecVersion::V1);
            }
            return Err(TrustError::SpecVersion(version.to_owned()));
        }
        Err(TrustError::RoleMetadata(
            "missing metadata_spec_version/spec_version".to_owned(),
        ))
    }
}

/// The three roles of the signing hierarchy.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RoleType {
    /// The root of trust; can rotate itself.
    Root,

    /// The key manager, verified by root.
    KeyMgr,

    /// The package manager, verified by the key manager; its keys sign
    /// package records.
    PkgMgr,
}

impl RoleType {
    /// The name of the role as it appears in metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            RoleType::Root => "root",
            RoleType::KeyMgr => "key_mgr",
            RoleType::PkgMgr => "pkg_mgr",
        }
    }
}

/// A role file as read from disk or the network: the raw signed block (kept
/// verbatim for canonicalization), its typed common fields, and the
/// signatures over it.
#[derive(Debug, Clone)]
pub struct SignedFile {
    /// The raw `signed` block.
    pub signed: Value,

    /// The signatures over the canonical form of `signed`, keyed by keyid.
    pub signatures: BTreeMap<String, Signature>,

    /// The spec version the signed block declares.
    pub spec_version: SpecVersion,
}

impl SignedFile {
    /// Parses a role file from its JSON text.
    pub fn from_json_str(content: &str) -> Result<Self, TrustError> {
        let value: Value = serde_json::from_str(content)?;
        let signed = value
            .get("signed")
            .cloned()
            .ok_or_else(|| TrustError::RoleMetadata("missing 'signed' block".to_owned()))?;
        let spec_version = SpecVersion::detect(&signed)?;
        let signatures = parse_signatures(&value, spec_version)?;
        Ok(Self {
            signed,
            signatures,
            spec_version,
        })
    }

    /// The canonical bytes signatures are verified over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TrustError> {
        self.spec_version.canonical_bytes(&self.signed)
    }

    /// The `type`/`_type` field of the signed block.
    pub fn role_type_str(&self) -> Result<&str, TrustError> {
        self.signed
            .get("type")
            .or_else(|| self.signed.get("_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| TrustError::RoleMetadata("missing role type".to_owned()))
    }

    /// The version counter of the signed block.
    pub fn version(&self) -> Result<u32, TrustError> {
        self.signed
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| TrustError::RoleMetadata("missing or invalid version".to_owned()))
    }

    /// The expiration timestamp of the signed block (`expiration` in v0.6,
    /// `expires` in v1).
    pub fn expiration(&self) -> Result<DateTime<Utc>, TrustError> {
        let raw = self
            .signed
            .get("expiration")
            .or_else(|| self.signed.get("expires"))
            .and_then(Value::as_str)
            .ok_or_else(|| TrustError::RoleMetadata("missing expiration".to_owned()))?;
        parse_timestamp(raw)
    }

    /// Extracts the keys and threshold this file delegates to the given role.
    pub fn delegation(&self, role: RoleType) -> Result<crate::chain::RoleKeys, TrustError> {
        match self.spec_version {
            SpecVersion::V06 => {
                let delegation = self
                    .signed
                    .get("delegations")
                    .and_then(|d| d.get(role.as_str()))
                    .ok_or_else(|| {
                        TrustError::RoleMetadata(format!(
                            "missing delegation for role '{}'",
                            role.as_str()
                        ))
                    })?;
                let delegation: DelegationV06 = serde_json::from_value(delegation.clone())?;
                Ok(crate::chain::RoleKeys {
                    // In spec v0.6 the keyid is the hex public key itself.
                    keys: delegation
                        .pubkeys
                        .into_iter()
                        .map(|public| crate::chain::RoleKey {
                            keyid: public.clone(),
                            public_key: public,
                        })
                        .collect(),
                    threshold: delegation.threshold,
                })
            }
            SpecVersion::V1 => {
                let role_entry = self
                    .signed
                    .get("roles")
                    .and_then(|roles| roles.get(role.as_str()))
                    .ok_or_else(|| {
                        TrustError::RoleMetadata(format!(
                            "missing role entry for '{}'",
                            role.as_str()
                        ))
                    })?;
                let role_entry: RoleEntryV1 = serde_json::from_value(role_entry.clone())?;
                let keys = self
                    .signed
                    .get("keys")
                    .and_then(Value::as_object)
                    .ok_or_else(|| TrustError::RoleMetadata("missing 'keys' map".to_owned()))?;
                let mut role_keys = Vec::new();
                for keyid in &role_entry.keyids {
                    let public = keys
                        .get(keyid)
                        .and_then(|key| key.get("keyval"))
                        .and_then(|keyval| keyval.get("public"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            TrustError::RoleMetadata(format!("unknown keyid '{keyid}'"))
                        })?;
                    role_keys.push(crate::chain::RoleKey {
                        keyid: keyid.clone(),
                        public_key: public.to_owned(),
                    });
                }
                Ok(crate::chain::RoleKeys {
                    keys: role_keys,
                    threshold: role_entry.threshold,
                })
            }
        }
    }
}

/// Parses the signature section. v0.6 stores a map keyed by keyid, v1 stores
/// a list of `{keyid, sig}` objects.
fn parse_signatures(
    value: &Value,
    spec_version: SpecVersion,
) -> Result<BTreeMap<String, Signature>, TrustError> {
    let signatures = value
        .get("signatures")
        .ok_or_else(|| TrustError::RoleMetadata("missing 'signatures'".to_owned()))?;
    match spec_version {
        SpecVersion::V06 => {
            let map: BTreeMap<String, Signature> = serde_json::from_value(signatures.clone())?;
            Ok(map)
        }
        SpecVersion::V1 => {
            #[derive(Deserialize)]
            struct RawSignature {
                keyid: String,
                sig: String,
                #[serde(default)]
                other_headers: Option<String>,
            }
            let list: Vec<RawSignature> = serde_json::from_value(signatures.clone())?;
            Ok(list
                .into_iter()
                .map(|raw| {
                    (
                        raw.keyid,
                        Signature {
                            signature: raw.sig,
                            other_headers: raw.other_headers,
                        },
                    )
                })
                .collect())
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrustError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            // Some writers drop the timezone suffix.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .map(|t| t.and_utc())
                .map_err(|_| TrustError::RoleMetadata(format!("invalid timestamp '{raw}'")))
        })
}

/// A delegation entry of a v0.6 role.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DelegationV06 {
    /// The hex encoded public keys entitled to sign for the role.
    pubkeys: Vec<String>,

    /// How many distinct keys must have signed.
    threshold: u32,
}

/// A role entry of a v1 root.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleEntryV1 {
    keyids: Vec<String>,
    threshold: u32,
}

/// The typed payload of a v0.6 role, used when *writing* metadata (tests,
/// tooling). Field order is alphabetical so that struct serialization agrees
/// with the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadV06 {
    /// The delegations of this role.
    pub delegations: BTreeMap<String, DelegationsV06>,

    /// The expiration timestamp.
    pub expiration: String,

    /// The metadata spec version, `0.6.x`.
    pub metadata_spec_version: String,

    /// The creation timestamp.
    pub timestamp: String,

    /// The role type.
    #[serde(rename = "type")]
    pub role_type: String,

    /// The version counter.
    pub version: u32,
}

/// A delegation block inside [`PayloadV06`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationsV06 {
    /// The hex encoded public keys entitled to sign for the role.
    pub pubkeys: Vec<String>,

    /// How many distinct keys must have signed.
    pub threshold: u32,
}

#[cfg(test)]
mod test {
    use super::{SignedFile, SpecVersion};

    #[test]
    fn detects_spec_versions() {
        let v06 = r#"{
            "signed": {"type": "root", "version": 1, "metadata_spec_version": "0.6.0",
                       "timestamp": "2024-01-01T00:00:00Z", "expiration": "2030-01-01T00:00:00Z",
                       "delegations": {}},
            "signatures": {}
        }"#;
        let file = SignedFile::from_json_str(v06).unwrap();
        assert_eq!(file.spec_version, SpecVersion::V06);
        assert_eq!(file.version().unwrap(), 1);
        assert_eq!(file.role_type_str().unwrap(), "root");

        let v1 = r#"{
            "signed": {"_type": "root", "version": 3, "spec_version": "1.0.0",
                       "expires": "2030-01-01T00:00:00Z", "keys": {}, "roles": {}},
            "signatures": []
        }"#;
        let file = SignedFile::from_json_str(v1).unwrap();
        assert_eq!(file.spec_version, SpecVersion::V1);
        assert_eq!(file.version().unwrap(), 3);
    }

    #[test]
    fn canonical_form_differs_by_spec() {
        let signed: serde_json::Value =
            serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let pretty = SpecVersion::V06.canonical_bytes(&signed).unwrap();
        let compact = SpecVersion::V1.canonical_bytes(&signed).unwrap();
        // Keys are sorted in both forms.
        assert_eq!(
            String::from_utf8(compact).unwrap(),
            r#"{"a":{"x":3,"y":2},"b":1}"#
        );
        let pretty = String::from_utf8(pretty).unwrap();
        assert!(pretty.starts_with("{\n  \"a\""));
    }

    #[test]
    fn v1_delegation_resolves_keyids() {
        let v1 = r#"{
            "signed": {"_type": "root", "version": 1, "spec_version": "1.0.0",
                       "expires": "2030-01-01T00:00:00Z",
                       "keys": {"kid1": {"keytype": "ed25519", "scheme": "ed25519", "keyval": {"public": "aabb"}}},
                       "roles": {"root": {"keyids": ["kid1"], "threshold": 1}}},
            "signatures": []
        }"#;
        let file = SignedFile::from_json_str(v1).unwrap();
        let keys = file.delegation(super::RoleType::Root).unwrap();
        assert_eq!(keys.keys.len(), 1);
        assert_eq!(keys.keys[0].keyid, "kid1");
        assert_eq!(keys.keys[0].public_key, "aabb");
        assert_eq!(keys.threshold, 1);
    }
}

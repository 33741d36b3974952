//! Serde support for serializing digests as lowercase hex strings, usable
//! through `serde_with`'s `serde_as` attribute.

use std::marker::PhantomData;

use digest::{Digest, Output};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

use super::parse_digest_from_hex;

/// Serializes a digest output as a lowercase hex string and back.
pub struct SerializableHash<D: Digest>(PhantomData<D>);

impl<D: Digest> SerializeAs<Output<D>> for SerializableHash<D>
where
    Output<D>: std::fmt::LowerHex,
{
    fn serialize_as<S: Serializer>(source: &Output<D>, serializer: S) -> Result<S::Ok, S::Error> {
        format!("{source:x}").serialize(serializer)
    }
}

impl<'de, D: Digest> DeserializeAs<'de, Output<D>> for SerializableHash<D> {
    fn deserialize_as<De: Deserializer<'de>>(deserializer: De) -> Result<Output<D>, De::Error> {
        let str = String::deserialize(deserializer)?;
        parse_digest_from_hex::<D>(&str)
            .ok_or_else(|| serde::de::Error::custom("failed to parse hex digest"))
    }
}

#[cfg(test)]
mod test {
    use serde_with::serde_as;

    #[serde_as]
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Record {
        #[serde_as(as = "Option<super::SerializableHash<sha2::Sha256>>")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<crate::Sha256Hash>,
    }

    #[test]
    fn roundtrip() {
        let json = r#"{"sha256":"315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&record).unwrap(), json);
    }
}

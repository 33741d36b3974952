//! Ed25519 signature verification, including the OpenPGP compatible variant
//! used by signing tools that wrap their payloads in a PGP trailer.

use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single detached signature over the canonical form of a role payload.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// The hex encoded Ed25519 signature.
    pub signature: String,

    /// When present, the hex encoded OpenPGP trailer that participates in the
    /// hashed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_headers: Option<String>,
}

/// A hex encoded Ed25519 public key.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    /// Verifies the signature over the given canonical bytes. Returns false
    /// for malformed keys or signatures as well as for honest mismatches.
    pub fn verify(&self, canonical: &[u8], signature: &Signature) -> bool {
        verify_signature(&self.0, canonical, signature)
    }
}

/// Verifies an Ed25519 signature over canonical bytes.
///
/// Plain signatures cover the canonical bytes directly. Signatures carrying a
/// PGP trailer (`other_headers`) instead cover the SHA256 digest of
/// `canonical ‖ trailer ‖ 0x04ff ‖ u32_be(len(trailer))`, which is the OpenPGP
/// v4 hashing convention for the signed data plus the hashed subpackets.
pub fn verify_signature(public_key_hex: &str, canonical: &[u8], signature: &Signature) -> bool {
    let Ok(public_key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(public_key_bytes) = <[u8; 32]>::try_from(public_key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key_bytes) else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(&signature.signature) else {
        return false;
    };
    let Ok(ed_signature) = Ed25519Signature::try_from(signature_bytes.as_slice()) else {
        return false;
    };

    match &signature.other_headers {
        None => verifying_key.verify(canonical, &ed_signature).is_ok(),
        Some(other_headers) => {
            let Ok(trailer) = hex::decode(other_headers) else {
                return false;
            };
            let mut hasher = Sha256::new();
            hasher.update(canonical);
            hasher.update(&trailer);
            hasher.update(b"\x04\xff");
            hasher.update((trailer.len() as u32).to_be_bytes());
            let digest = hasher.finalize();
            verifying_key.verify(&digest, &ed_signature).is_ok()
        }
    }
}

#[cfg(test)]
mod test {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use sha2::{Digest, Sha256};

    use super::{verify_signature, Signature};

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::generate(&mut OsRng);
        let public = hex::encode(key.verifying_key().to_bytes());
        (key, public)
    }

    #[test]
    fn plain_signature() {
        let (key, public) = keypair();
        let message = b"canonical bytes";
        let signature = Signature {
            signature: hex::encode(key.sign(message).to_bytes()),
            other_headers: None,
        };
        assert!(verify_signature(&public, message, &signature));
        assert!(!verify_signature(&public, b"other bytes", &signature));
    }

    #[test]
    fn pgp_trailer_signature() {
        let (key, public) = keypair();
        let message = b"canonical bytes";
        let trailer = b"\x04\x00\x01\x02";

        let mut hasher = Sha256::new();
        hasher.update(message);
        hasher.update(trailer);
        hasher.update(b"\x04\xff");
        hasher.update((trailer.len() as u32).to_be_bytes());
        let digest = hasher.finalize();

        let signature = Signature {
            signature: hex::encode(key.sign(&digest).to_bytes()),
            other_headers: Some(hex::encode(trailer)),
        };
        assert!(verify_signature(&public, message, &signature));

        let stripped = Signature {
            other_headers: None,
            ..signature
        };
        assert!(!verify_signature(&public, message, &stripped));
    }

    #[test]
    fn malformed_input_is_not_a_panic() {
        let signature = Signature {
            signature: "zz".to_owned(),
            other_headers: None,
        };
        assert!(!verify_signature("not-hex", b"x", &signature));
    }
}

pub mod jsonl;
pub mod locks;
pub mod score;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use locks::{KeyedLocks, LockTimeout};
pub use score::{Score, ScoreError};

pub type HashBytes = [u8; 32];

/// Sentinel used as `prev_*_hash` for the first record of any chain.
pub const ROOT_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub HashBytes);

impl Hash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

pub fn hash_bytes(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Hash(bytes)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hash_bytes(data).to_hex()
}

/// Hash an ordered list of fields. Each field is length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Serialize to JSON with object keys in sorted order.
///
/// Going through `serde_json::Value` sorts every nested map, so two values
/// that are equal field-for-field always produce identical bytes.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_json(value)?))
}

/// Opaque random identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifier derived from its inputs; the same inputs always give the same id.
pub fn derive_id(prefix: &str, fields: &[&str]) -> String {
    let digest = hash_fields(fields);
    format!("{prefix}-{}", &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_bytes_is_deterministic() {
        let data = b"hello-world-vigil";
        let h1 = hash_bytes(data);
        let h2 = hash_bytes(data);
        assert_eq!(h1, h2);
        assert_eq!(h1.to_hex().len(), 64);
    }

    #[test]
    fn hash_fields_is_boundary_sensitive() {
        assert_ne!(hash_fields(&["ab", "c"]), hash_fields(&["a", "bc"]));
        assert_eq!(hash_fields(&["a", "b"]), hash_fields(&["a", "b"]));
    }

    #[test]
    fn canonical_json_ignores_key_order() {
        let a = json!({"zebra": 1, "apple": {"z": 1, "a": 2}});
        let b = json!({"apple": {"a": 2, "z": 1}, "zebra": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(
            String::from_utf8(canonical_json(&a).unwrap()).unwrap(),
            r#"{"apple":{"a":2,"z":1},"zebra":1}"#
        );
    }

    #[test]
    fn derive_id_is_stable_and_prefixed() {
        let a = derive_id("dec", &["inc-1", "3", "bundle-a"]);
        let b = derive_id("dec", &["inc-1", "3", "bundle-a"]);
        assert_eq!(a, b);
        assert!(a.starts_with("dec-"));
        assert_ne!(a, derive_id("dec", &["inc-1", "4", "bundle-a"]));
    }

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn root_hash_is_64_zeros() {
        assert_eq!(ROOT_HASH.len(), 64);
        assert!(ROOT_HASH.chars().all(|c| c == '0'));
    }
}

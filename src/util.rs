//! Shared helpers for ledger-facing values.
//!
//! Task ids, contract addresses and hashes travel through the node as hex
//! strings, sometimes `0x`-prefixed and sometimes not, depending on which
//! collaborator produced them. Everything here normalizes to lowercase hex
//! without the prefix before hashing or comparing.

use sha2::{Digest, Sha256};

/// Hex value of a 32-byte zero hash. The ledger records this as the state
/// delta hash of a receipt that carries no delta.
pub const EMPTY_STATE_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Strip a leading `0x`/`0X` prefix and lowercase the rest.
pub fn strip_0x(s: &str) -> String {
    let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    trimmed.to_ascii_lowercase()
}

/// Compare two hex values ignoring case and `0x` prefixes.
pub fn hex_eq(a: &str, b: &str) -> bool {
    strip_0x(a) == strip_0x(b)
}

/// Whether `s` is a well-formed worker address: 20 bytes of hex, with or
/// without the `0x` prefix.
pub fn is_valid_address(s: &str) -> bool {
    let stripped = strip_0x(s);
    stripped.len() == 40 && stripped.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Whether `s` is a well-formed 32-byte identifier (task id / contract
/// address of a secret contract).
pub fn is_valid_id(s: &str) -> bool {
    let stripped = strip_0x(s);
    stripped.len() == 64 && stripped.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode a hex value into bytes. Values that are not valid hex (e.g. opaque
/// encrypted blobs handed over as plain strings) fall back to their raw UTF-8
/// bytes, so hashing is total.
pub fn hex_or_raw_bytes(s: &str) -> Vec<u8> {
    let stripped = strip_0x(s);
    hex::decode(&stripped).unwrap_or_else(|_| s.as_bytes().to_vec())
}

/// Ledger hash of a single value, hex-encoded.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Ledger hash of a hex value (see [`hex_or_raw_bytes`] for decoding rules).
pub fn hash_hex(s: &str) -> String {
    hash_bytes(&hex_or_raw_bytes(s))
}

/// Ledger hash over a sequence of values, each length-prefixed with its byte
/// count as a big-endian u64 so that part boundaries are unambiguous. This is
/// the binding used for the on-chain inputs hash.
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = hex_or_raw_bytes(part);
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}

/// Left-pad a value to 32 bytes, big-endian. Values longer than 32 bytes are
/// truncated from the left, matching how the ledger packs words.
pub fn to_word(bytes: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    if bytes.len() >= 32 {
        word.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        word[32 - bytes.len()..].copy_from_slice(bytes);
    }
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_0x("0xAbCd"), "abcd");
        assert_eq!(strip_0x("0XAbCd"), "abcd");
        assert_eq!(strip_0x("abcd"), "abcd");
    }

    #[test]
    fn test_hex_eq_ignores_prefix_and_case() {
        assert!(hex_eq("0xDEAD", "dead"));
        assert!(!hex_eq("dead", "beef"));
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("0xce16109f8b49da5324ce97771b81247db6e17868"));
        assert!(is_valid_address("ce16109f8b49da5324ce97771b81247db6e17868"));
        // 22 bytes
        assert!(!is_valid_address("0xce16109f8b49da5324ce97771b81247db6e178681111"));
        assert!(!is_valid_address("not-an-address"));
    }

    #[test]
    fn test_hash_parts_is_order_sensitive() {
        let a = hash_parts(&["aa", "bb"]);
        let b = hash_parts(&["bb", "aa"]);
        assert_ne!(a, b);
        assert_eq!(a, hash_parts(&["aa", "bb"]));
    }

    #[test]
    fn test_hash_parts_length_prefix_disambiguates() {
        // "aabb" + "" must not collide with "aa" + "bb"
        assert_ne!(hash_parts(&["aabb", ""]), hash_parts(&["aa", "bb"]));
    }

    #[test]
    fn test_to_word_pads_left() {
        let word = to_word(&[0xab, 0xcd]);
        assert_eq!(word[30], 0xab);
        assert_eq!(word[31], 0xcd);
        assert!(word[..30].iter().all(|&b| b == 0));
    }
}

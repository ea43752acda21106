//! Identity markers and placement seeds.
//!
//! The visible marker is derived from the identity id alone, so the same
//! requester always carries the same token. The placement seed is a keyed PRF
//! over `(asset_id, identity_id)`: reproducible for a given pair, unrelated
//! across identities, and independent of wall-clock time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::constants::{MARKER_DIGEST_HEX_LEN, MAX_MARKER_ID_CHARS};

type HmacSha256 = Hmac<Sha256>;

/// Characters the built-in glyph set can draw.
pub const MARKER_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.:@";

/// Visible token burned into a composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMarker {
    /// Text rendered onto the image (`<ID>:<digest>`).
    pub text: String,
    /// Keyed digest of the identity id, used for leak tracing.
    pub digest: String,
}

impl IdentityMarker {
    /// Derive the marker for an identity under the engine secret.
    pub fn derive(identity_id: &str, secret: &[u8]) -> Self {
        let digest_bytes = keyed_digest(secret, &[identity_id.as_bytes()]);
        let digest = hex::encode_upper(&digest_bytes[..MARKER_DIGEST_HEX_LEN / 2]);

        let visible: String = identity_id
            .chars()
            .take(MAX_MARKER_ID_CHARS)
            .map(|c| {
                let upper = c.to_ascii_uppercase();
                if MARKER_ALPHABET.contains(upper) {
                    upper
                } else {
                    '?'
                }
            })
            .collect();

        Self {
            text: format!("{}:{}", visible, digest),
            digest,
        }
    }
}

/// Pseudo-random placement material for one (asset, identity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementSeed([u8; 32]);

impl PlacementSeed {
    /// Compute the seed as `HMAC-SHA256(secret, asset_id || 0x00 || identity_id)`.
    ///
    /// The separator keeps `("ab", "c")` and `("a", "bc")` apart.
    pub fn derive(asset_id: &str, identity_id: &str, secret: &[u8]) -> Self {
        Self(keyed_digest(
            secret,
            &[asset_id.as_bytes(), &[0u8], identity_id.as_bytes()],
        ))
    }

    /// Read the `index`-th 32-bit word of the seed (wraps after 8 words).
    pub fn word(&self, index: usize) -> u32 {
        let start = (index % 8) * 4;
        u32::from_be_bytes([
            self.0[start],
            self.0[start + 1],
            self.0[start + 2],
            self.0[start + 3],
        ])
    }

    /// Map the `index`-th word into `0..bound` (returns 0 when `bound` is 0).
    pub fn pick(&self, index: usize, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.word(index) % bound
        }
    }
}

fn keyed_digest(secret: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length, including empty.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_contains_identity_and_digest() {
        let marker = IdentityMarker::derive("alice", b"secret");
        assert!(marker.text.starts_with("ALICE:"));
        assert_eq!(marker.digest.len(), MARKER_DIGEST_HEX_LEN);
        assert!(marker.text.ends_with(&marker.digest));
    }

    #[test]
    fn test_marker_is_stable_per_identity() {
        let a1 = IdentityMarker::derive("A", b"secret");
        let a2 = IdentityMarker::derive("A", b"secret");
        let b = IdentityMarker::derive("B", b"secret");
        assert_eq!(a1, a2);
        assert_ne!(a1.digest, b.digest);
    }

    #[test]
    fn test_marker_digest_depends_on_secret() {
        let one = IdentityMarker::derive("A", b"one");
        let two = IdentityMarker::derive("A", b"two");
        assert_ne!(one.digest, two.digest);
    }

    #[test]
    fn test_marker_replaces_unsupported_characters() {
        let marker = IdentityMarker::derive("dü/x", b"k");
        assert!(marker.text.starts_with("D??X:"));
    }

    #[test]
    fn test_marker_truncates_long_ids() {
        let long_id = "x".repeat(100);
        let marker = IdentityMarker::derive(&long_id, b"k");
        let visible = marker.text.split(':').next().unwrap();
        assert_eq!(visible.len(), MAX_MARKER_ID_CHARS);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let s1 = PlacementSeed::derive("asset-1", "alice", b"k");
        let s2 = PlacementSeed::derive("asset-1", "alice", b"k");
        assert_eq!(s1, s2);
        assert_eq!(s1.word(0), s2.word(0));
    }

    #[test]
    fn test_seed_differs_per_identity_and_asset() {
        let base = PlacementSeed::derive("asset-1", "alice", b"k");
        assert_ne!(base, PlacementSeed::derive("asset-1", "bob", b"k"));
        assert_ne!(base, PlacementSeed::derive("asset-2", "alice", b"k"));
    }

    #[test]
    fn test_seed_separator_prevents_concatenation_collisions() {
        let left = PlacementSeed::derive("ab", "c", b"k");
        let right = PlacementSeed::derive("a", "bc", b"k");
        assert_ne!(left, right);
    }

    #[test]
    fn test_pick_stays_in_bounds() {
        let seed = PlacementSeed::derive("asset", "id", b"k");
        for i in 0..16 {
            assert!(seed.pick(i, 7) < 7);
        }
        assert_eq!(seed.pick(0, 0), 0);
    }
}

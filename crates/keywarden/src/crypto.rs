//! Secret generation and keyed digests.
//!
//! The store never keeps plaintext secrets. Each secret is reduced to a
//! keyed BLAKE3 digest under a per-store [`DigestKey`], and validation
//! compares digests in constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::SecretValue;

/// Size of the digest key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    /// Fills `buf` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`] if the source is unavailable.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// Entropy drawn from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        rand::rngs::OsRng
            .try_fill_bytes(buf)
            .map_err(|e| Error::Entropy {
                reason: e.to_string(),
            })
    }
}

/// Key for computing secret digests.
///
/// The key is securely zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DigestKey {
    bytes: [u8; KEY_SIZE],
}

impl DigestKey {
    /// Draws a new random key from the given source.
    ///
    /// # Errors
    ///
    /// Returns an error if the entropy source fails.
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        entropy.fill(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Computes the keyed digest of a secret.
    #[must_use]
    pub fn digest(&self, secret: &[u8]) -> SecretDigest {
        SecretDigest(*blake3::keyed_hash(&self.bytes, secret).as_bytes())
    }
}

impl std::fmt::Debug for DigestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Keyed digest of a secret value.
#[derive(Clone, Copy)]
pub struct SecretDigest([u8; 32]);

impl SecretDigest {
    /// Constant-time comparison against another digest.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.ct_eq(&other.0).into()
    }

    /// Shard index derived from the first digest byte.
    #[must_use]
    pub(crate) fn shard(&self, shards: usize) -> usize {
        usize::from(self.0[0]) % shards
    }
}

impl PartialEq for SecretDigest {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for SecretDigest {}

impl std::hash::Hash for SecretDigest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Debug for SecretDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDigest")
            .field("hash", &"[REDACTED]")
            .finish()
    }
}

/// Produces fresh secret values of a fixed length.
pub struct SecretGenerator {
    entropy: Box<dyn EntropySource>,
    length_bytes: usize,
    prefix: String,
}

impl SecretGenerator {
    /// Creates a generator drawing `length_bytes` random bytes per secret.
    #[must_use]
    pub fn new(entropy: Box<dyn EntropySource>, length_bytes: usize, prefix: impl Into<String>) -> Self {
        Self {
            entropy,
            length_bytes,
            prefix: prefix.into(),
        }
    }

    /// Returns the entropy source backing this generator.
    #[must_use]
    pub fn entropy(&self) -> &dyn EntropySource {
        self.entropy.as_ref()
    }

    /// Draws one candidate secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the entropy source fails.
    pub fn draw(&self) -> Result<SecretValue> {
        let mut bytes = vec![0u8; self.length_bytes];
        self.entropy.fill(&mut bytes)?;
        let encoded = URL_SAFE_NO_PAD.encode(&bytes);
        bytes.zeroize();
        Ok(SecretValue::new(format!("{}{encoded}", self.prefix)))
    }
}

impl std::fmt::Debug for SecretGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretGenerator")
            .field("length_bytes", &self.length_bytes)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{BrokenEntropy, ConstantEntropy};
    use super::*;

    #[test]
    fn os_entropy_fills_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsEntropy.fill(&mut a).expect("fill a");
        OsEntropy.fill(&mut b).expect("fill b");
        assert_ne!(a, b);
    }

    #[test]
    fn generator_uses_prefix_and_length() {
        let generator = SecretGenerator::new(Box::new(OsEntropy), 32, "kw_");
        let secret = generator.draw().expect("draw");
        assert!(secret.expose().starts_with("kw_"));
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(secret.len(), 3 + 43);
    }

    #[test]
    fn generator_draws_distinct_values() {
        let generator = SecretGenerator::new(Box::new(OsEntropy), 32, "");
        let a = generator.draw().expect("draw a");
        let b = generator.draw().expect("draw b");
        assert_ne!(a, b);
    }

    #[test]
    fn generator_propagates_entropy_failure() {
        let generator = SecretGenerator::new(Box::new(BrokenEntropy), 32, "");
        let err = generator.draw().expect_err("should fail");
        assert!(matches!(err, Error::Entropy { .. }));
    }

    #[test]
    fn digest_is_keyed() {
        let k1 = DigestKey::generate(&OsEntropy).expect("key 1");
        let k2 = DigestKey::generate(&OsEntropy).expect("key 2");
        let secret = b"kw_value";

        assert_eq!(k1.digest(secret), k1.digest(secret));
        assert_ne!(k1.digest(secret), k2.digest(secret));
        assert_ne!(k1.digest(secret), k1.digest(b"kw_other"));
    }

    #[test]
    fn constant_entropy_repeats() {
        let generator = SecretGenerator::new(Box::new(ConstantEntropy), 16, "");
        assert_eq!(
            generator.draw().expect("draw"),
            generator.draw().expect("draw")
        );
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = DigestKey::generate(&OsEntropy).expect("key");
        assert!(format!("{key:?}").contains("[REDACTED]"));
        assert!(format!("{:?}", key.digest(b"x")).contains("[REDACTED]"));
    }
}

//! One-way token digests used as cache keys.

use std::fmt;

use sha2::{Digest, Sha256};

/// Number of hex characters shown when a digest is logged.
const DISPLAY_PREFIX_LEN: usize = 8;

/// Hex-encoded SHA-256 digest of a raw bearer token.
///
/// The raw token cannot be recovered from this value. `Debug` and `Display`
/// only ever print a short prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenDigest(String);

impl TokenDigest {
    /// Compute the digest of a raw token.
    #[must_use]
    pub fn of(raw_token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw_token.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Bounded prefix suitable for log output.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.0[..DISPLAY_PREFIX_LEN.min(self.0.len())]
    }

    /// Full hex digest.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...", self.prefix())
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenDigest").field(&self.prefix()).finish()
    }
}

//! Domain-separated BLAKE3 hashing.
//!
//! Every digest in the engine is computed as `blake3(domain || ":" ||
//! payload)`. Mixing the domain tag into the hashed bytes (rather than,
//! say, keeping a separate field alongside the digest) means a request
//! digest, a result digest, and a CAS digest can never collide even if
//! two different domains happen to hash the same payload bytes.

use std::fmt;

/// A BLAKE3 output, fixed at 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Render as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// Raw 32-byte digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a digest from a lowercase hex string.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Domain tags mixed into every hash to prevent cross-domain collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Request digests.
    Req,
    /// Result digests.
    Res,
    /// CAS object keys.
    Cas,
}

impl Domain {
    fn tag(self) -> &'static str {
        match self {
            Self::Req => "req",
            Self::Res => "res",
            Self::Cas => "cas",
        }
    }
}

/// Compute `blake3(domain || ":" || payload)`.
#[must_use]
pub fn blake3_domain(domain: Domain, payload: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.tag().as_bytes());
    hasher.update(b":");
    hasher.update(payload);
    Digest(*hasher.finalize().as_bytes())
}

use stash_types::{Clid, SgKey};

/// Hash function from a (name, clid) pair to a key.
///
/// Implementations must be deterministic for the lifetime of the process.
pub trait KeyHasher: Send + Sync {
    /// Hash the pair. Only the low [`SgKey::BITS`] bits of the result are used.
    fn hash(&self, name: &str, clid: Clid) -> u32;
}

/// Domain-separated BLAKE3 key hasher.
///
/// The domain tag is prepended to every hash computation so that keys from
/// differently configured pools never agree by accident.
#[derive(Clone, Debug)]
pub struct Blake3KeyHasher {
    domain: &'static str,
}

impl Blake3KeyHasher {
    /// Hasher used by default stores.
    pub const DEFAULT: Self = Self {
        domain: "stash-sgkey-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

impl Default for Blake3KeyHasher {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl KeyHasher for Blake3KeyHasher {
    fn hash(&self, name: &str, clid: Clid) -> u32 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(&clid.get().to_le_bytes());
        hasher.update(b":");
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();

        // The null key is reserved; take the first non-null 30-bit window.
        digest
            .as_bytes()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .find(|h| !SgKey::from_hash(*h).is_null())
            .unwrap_or(1)
    }
}

//! bcrypt hashing for passwords and one-time verification codes.
//!
//! bcrypt keeps stored hashes interchangeable with the `$2a$`/`$2b$` hashes
//! already present in existing user tables. Hashing is CPU-bound; async
//! callers run it on a blocking thread.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordHasher {
    /// Cost is clamped into bcrypt's supported range.
    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost: cost.clamp(4, 31),
        }
    }

    /// Cheapest setting, for tests.
    pub fn fast() -> Self {
        Self::with_cost(4)
    }

    pub fn hash(&self, secret: &str) -> Result<String, PasswordError> {
        Ok(bcrypt::hash(secret, self.cost)?)
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        match bcrypt::verify(secret, hash) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(error = %e, "stored hash could not be verified");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = PasswordHasher::fast();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("correct horse", &hash));
        assert!(!hasher.verify("wrong horse", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!PasswordHasher::fast().verify("x", "not-a-bcrypt-hash"));
    }
}

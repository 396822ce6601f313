/// Failure while producing or checking a secret digest.
#[derive(Debug, thiserror::Error)]
#[error("secret hashing failed: {0}")]
pub struct HashError(#[from] bcrypt::BcryptError);

/// Produces and checks stored secret digests.
pub trait SecretHasher: Send + Sync {
    fn digest(&self, secret: &str) -> Result<String, HashError>;

    /// `Ok(false)` for a wrong secret; `Err` only when `stored` is not a usable digest.
    fn verify(&self, secret: &str, stored: &str) -> Result<bool, HashError>;
}

/// Salted bcrypt digests. The cost is stored inside each digest, so changing it
/// only affects secrets hashed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

pub const DEFAULT_HASH_COST: u32 = 10;
pub const MIN_HASH_COST: u32 = 4;
pub const MAX_HASH_COST: u32 = 31;

impl BcryptHasher {
    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_HASH_COST, MAX_HASH_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::with_cost(DEFAULT_HASH_COST)
    }
}

impl SecretHasher for BcryptHasher {
    fn digest(&self, secret: &str) -> Result<String, HashError> {
        Ok(bcrypt::hash(secret, self.cost)?)
    }

    fn verify(&self, secret: &str, stored: &str) -> Result<bool, HashError> {
        Ok(bcrypt::verify(secret, stored)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_are_salted_per_call() {
        let hasher = BcryptHasher::with_cost(4);
        let first = hasher.digest("Secret1").expect("digest");
        let second = hasher.digest("Secret1").expect("digest");
        assert_ne!(first, second);
        assert!(first.starts_with("$2"));
        assert!(hasher.verify("Secret1", &second).expect("verify"));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let hasher = BcryptHasher::with_cost(4);
        let stored = hasher.digest("Secret1").expect("digest");
        assert!(!hasher.verify("secret1", &stored).expect("verify"));
    }

    #[test]
    fn malformed_digest_is_an_error() {
        let hasher = BcryptHasher::with_cost(4);
        assert!(hasher.verify("Secret1", "not-a-digest").is_err());
    }

    #[test]
    fn cost_is_clamped_to_bcrypt_bounds() {
        assert_eq!(BcryptHasher::with_cost(1).cost(), MIN_HASH_COST);
        assert_eq!(BcryptHasher::default().cost(), DEFAULT_HASH_COST);
    }
}

//! Password hashing with Argon2id.

use crate::errors::{SecurityError, SecurityResult};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

pub struct PasswordService {
    argon2: Argon2<'static>,
    /// Verified against when the account does not exist, so unknown and known
    /// accounts take the same time to reject.
    dummy_hash: String,
}

impl PasswordService {
    pub fn new() -> SecurityResult<Self> {
        let argon2 = Argon2::default();
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"placeholder-password", &salt)
            .map_err(|e| SecurityError::PasswordHashing(e.to_string()))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }

    /// Hash a password into a PHC string
    pub fn hash(&self, password: &str) -> SecurityResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SecurityError::PasswordHashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Parse a PHC string without verifying anything against it
    pub fn check_hash(hash: &str) -> SecurityResult<()> {
        parse_hash(hash).map(|_| ())
    }

    /// Verify a password against a PHC string
    pub fn verify(&self, password: &str, hash: &str) -> SecurityResult<bool> {
        let parsed = parse_hash(hash)?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Spend one verification on a throwaway hash. Always `false`.
    pub fn verify_absent(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy_hash);
        false
    }
}

fn parse_hash(hash: &str) -> SecurityResult<PasswordHash<'_>> {
    PasswordHash::new(hash).map_err(|e| SecurityError::PasswordHashing(e.to_string()))
}

impl std::fmt::Debug for PasswordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let service = PasswordService::new().unwrap();
        let hash = service.hash("correct horse battery staple").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(service.verify("correct horse battery staple", &hash).unwrap());
        assert!(!service.verify("Tr0ub4dor&3", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        let service = PasswordService::new().unwrap();
        assert!(matches!(
            service.verify("password", "not-a-phc-string"),
            Err(SecurityError::PasswordHashing(_))
        ));
        assert!(!service.verify_absent("password"));
    }

    #[test]
    fn test_check_hash() {
        let service = PasswordService::new().unwrap();
        let hash = service.hash("Tr0ub4dor&3").unwrap();

        assert!(PasswordService::check_hash(&hash).is_ok());
        assert!(PasswordService::check_hash("$argon2id$broken").is_err());
    }
}

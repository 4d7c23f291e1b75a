//! Password hashing.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("password doesn't match")]
    Mismatch,
}

/// Argon2id hashing and verification of account passwords.
#[derive(Clone, Debug)]
pub struct PasswordManager {
    params: Params,
    /// Verified when the account is unknown, so both paths cost the same.
    dummy_hash: Arc<str>,
    #[cfg(test)]
    pub(crate) verifications: Arc<AtomicUsize>,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut manager = Self {
            params,
            dummy_hash: Arc::from(""),
            #[cfg(test)]
            verifications: Arc::default(),
        };
        manager.dummy_hash = manager.hash_password("shiori-auth")?.into();

        Ok(manager)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// Parameters embedded in the PHC string take precedence over ours, so
    /// hashes made with older settings keep working.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> Result<()> {
        #[cfg(test)]
        self.verifications.fetch_add(1, Ordering::Relaxed);

        let parsed = PasswordHash::new(phc_hash)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .map_err(|_| CryptoError::Mismatch)
    }

    /// Run a verification that always fails against a hash made with our
    /// parameters.
    pub fn verify_dummy(&self, password: impl AsRef<[u8]>) -> Result<()> {
        self.verify_password(password, &self.dummy_hash)
    }
}

#[cfg(test)]
pub(crate) fn test_manager() -> PasswordManager {
    PasswordManager::new(Some(ArgonConfig {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argon2() {
        let pwd = test_manager();
        let hash = pwd.hash_password("gopher").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("gopher", &hash).is_ok());
        assert!(matches!(
            pwd.verify_password("gophers", &hash),
            Err(CryptoError::Mismatch)
        ));
    }

    #[test]
    fn test_dummy_hash() {
        let pwd = test_manager();
        assert!(pwd.dummy_hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));
        assert!(matches!(
            pwd.verify_dummy("gopher"),
            Err(CryptoError::Mismatch)
        ));
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            test_manager().verify_password("gopher", "plaintext"),
            Err(CryptoError::Argon2(_))
        ));
    }

    #[test]
    fn test_invalid_params() {
        let config = ArgonConfig {
            memory_cost: 1,
            ..Default::default()
        };
        assert!(PasswordManager::new(Some(config)).is_err());
    }
}

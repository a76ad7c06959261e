//! Password strength, hashing, and verification.
//!
//! The engine only talks to [`CredentialPolicy`]; [`ScryptCredentials`] is
//! the default implementation.

use rand::rngs::OsRng;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::{Params, Scrypt};
use std::collections::HashMap;
use thiserror::Error;

/// Shortest accepted password, in characters.
pub const MIN_PASSWORD_CHARS: usize = 8;
/// Longest accepted password, in characters.
pub const MAX_PASSWORD_CHARS: usize = 64;
/// Most times any single character may appear in a password.
pub const MAX_REPEATED_CHAR: usize = 3;

/// Hashing failed; the password was not stored.
#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct CredentialError(String);

/// Decides which passwords are acceptable and how they are stored.
pub trait CredentialPolicy: Send + Sync {
    /// Returns a human-readable reason when `password` is not acceptable.
    fn check_strength(&self, password: &str) -> Result<(), String>;

    /// Produces the stored form of `password`.
    fn hash(&self, password: &str) -> Result<String, CredentialError>;

    /// Checks `password` against a value produced by [`hash`](Self::hash).
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// scrypt with `N = 2^log_n`, `r = 8`, `p = 1`, stored as a PHC string
/// (`$scrypt$ln=14,r=8,p=1$<salt>$<hash>`).
#[derive(Debug, Clone, Copy)]
pub struct ScryptCredentials {
    log_n: u8,
}

impl ScryptCredentials {
    /// `N = 16384`.
    pub const DEFAULT_LOG_N: u8 = 14;
    /// Stored hashes asking for more work than this are refused.
    pub const MAX_LOG_N: u8 = 20;

    const R: u32 = 8;
    const P: u32 = 1;

    pub fn new(log_n: u8) -> Self {
        Self {
            log_n: log_n.clamp(1, Self::MAX_LOG_N),
        }
    }

    fn params(&self) -> Result<Params, CredentialError> {
        Params::new(self.log_n, Self::R, Self::P, Params::RECOMMENDED_LEN)
            .map_err(|err| CredentialError(err.to_string()))
    }
}

impl Default for ScryptCredentials {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOG_N)
    }
}

impl CredentialPolicy for ScryptCredentials {
    fn check_strength(&self, password: &str) -> Result<(), String> {
        let length = password.chars().count();
        if length < MIN_PASSWORD_CHARS {
            return Err(format!("must be at least {MIN_PASSWORD_CHARS} characters"));
        }
        if length > MAX_PASSWORD_CHARS {
            return Err(format!("must be at most {MAX_PASSWORD_CHARS} characters"));
        }
        if !password.chars().any(char::is_uppercase) {
            return Err("must contain an uppercase letter".to_string());
        }
        if !password.chars().any(char::is_lowercase) {
            return Err("must contain a lowercase letter".to_string());
        }
        if !password
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == ' '))
        {
            return Err("must contain a symbol".to_string());
        }

        let mut counts: HashMap<char, usize> = HashMap::new();
        for c in password.chars() {
            *counts.entry(c).or_default() += 1;
        }
        if counts.values().any(|&n| n > MAX_REPEATED_CHAR) {
            return Err(format!(
                "no character may appear more than {MAX_REPEATED_CHAR} times"
            ));
        }
        Ok(())
    }

    fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Scrypt
            .hash_password_customized(password.as_bytes(), None, None, self.params()?, &salt)
            .map_err(|err| CredentialError(err.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        match Params::try_from(&parsed) {
            Ok(params) if params.log_n() <= Self::MAX_LOG_N => {}
            _ => return false,
        }
        Scrypt.verify_password(password.as_bytes(), &parsed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> ScryptCredentials {
        ScryptCredentials::new(4)
    }

    #[test]
    fn hash_verifies_only_the_same_password() {
        let policy = fast();
        let stored = policy.hash("Correct-Horse1").unwrap();

        assert!(stored.starts_with("$scrypt$ln=4,r=8,p=1$"));
        assert!(policy.verify("Correct-Horse1", &stored));
        assert!(!policy.verify("Correct-Horse2", &stored));
    }

    #[test]
    fn hashes_are_salted() {
        let policy = fast();
        assert_ne!(
            policy.hash("Same-Pass1").unwrap(),
            policy.hash("Same-Pass1").unwrap()
        );
    }

    #[test]
    fn verify_uses_the_stored_cost() {
        let stored = ScryptCredentials::new(5).hash("Cost-Pass1").unwrap();
        assert!(ScryptCredentials::new(4).verify("Cost-Pass1", &stored));
    }

    #[test]
    fn excessive_stored_cost_is_refused() {
        let policy = fast();
        let stored = policy.hash("Cost-Pass1").unwrap().replace("ln=4,", "ln=40,");
        assert!(!policy.verify("Cost-Pass1", &stored));
    }

    #[test]
    fn malformed_stored_values_never_verify() {
        let policy = fast();
        for stored in ["", "$scrypt$", "sha256$1$AAAA$AAAA", "$argon2id$v=19$m=8,t=1,p=1$AAAAAAAA$AAAA"] {
            assert!(!policy.verify("anything", stored), "{stored:?}");
        }
    }

    #[test]
    fn log_n_is_clamped() {
        assert_eq!(ScryptCredentials::new(0).log_n, 1);
        assert_eq!(ScryptCredentials::new(99).log_n, ScryptCredentials::MAX_LOG_N);
    }

    #[test]
    fn strength_rules() {
        let policy = fast();
        assert!(policy.check_strength("Good-Pass1").is_ok());
        assert!(policy.check_strength("Sh-1").is_err());
        assert!(policy.check_strength(&format!("Aa-{}", "xyz".repeat(30))).is_err());
        assert!(policy.check_strength("no-upper-case").is_err());
        assert!(policy.check_strength("NO-LOWER-CASE").is_err());
        assert!(policy.check_strength("NoSymbolHere").is_err());
        assert!(policy.check_strength("Aaaaa-Bcdef").is_err());
    }
}

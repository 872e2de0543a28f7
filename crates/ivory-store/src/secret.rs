//! Password generation for database users.

use rand::Rng;
use rand::distributions::Alphanumeric;

pub const PASSWORD_LENGTH: usize = 24;

/// A password and the verifier stored in the database for it.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedSecret {
    pub password: String,
    pub verifier: String,
}

impl std::fmt::Debug for GeneratedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSecret").finish_non_exhaustive()
    }
}

pub trait SecretGenerator: Send + Sync {
    fn generate(&self) -> GeneratedSecret;
}

/// Random alphanumeric passwords.
///
/// The verifier is the plaintext; the server hashes it according to
/// `password_encryption` when the role is altered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSecretGenerator;

impl SecretGenerator for RandomSecretGenerator {
    fn generate(&self) -> GeneratedSecret {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect();
        GeneratedSecret {
            verifier: password.clone(),
            password,
        }
    }
}

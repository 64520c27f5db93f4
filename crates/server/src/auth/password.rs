// Password hashing with Argon2id.

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| anyhow!("failed to hash password: {error}"))
}

/// Returns `Ok(false)` on a mismatch and an error only for unparseable hashes.
pub fn verify_password(password: &str, encoded_hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(encoded_hash)
        .map_err(|error| anyhow!("stored password hash is malformed: {error}"))?;

    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

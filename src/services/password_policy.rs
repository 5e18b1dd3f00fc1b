//! Password strength rules, Argon2 hashing, and reuse-history checks.

use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::Serialize;
use tokio::task;

use crate::config::SecurityConfig;

/// Symbols accepted in passwords alongside ASCII alphanumerics.
pub const ALLOWED_SYMBOLS: &str = r#"~!?@#$%^&*_-+()[]{}<>/\|"'.,;:"#;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Previous hashes kept per user; the oldest entry is evicted on overflow.
pub const HISTORY_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CharClass {
    Uppercase,
    Lowercase,
    Digit,
}

impl CharClass {
    const fn describe(self) -> &'static str {
        match self {
            Self::Uppercase => "an uppercase letter",
            Self::Lowercase => "a lowercase letter",
            Self::Digit => "a digit",
        }
    }
}

/// A single failed password rule. Validation reports every violation at once
/// so callers can show the full list instead of one error per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "detail")]
#[serde(rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort,
    TooLong,
    MissingClass(CharClass),
    IllegalCharacter(char),
    ContainsSpace,
}

impl std::fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => {
                write!(f, "Must be at least {MIN_PASSWORD_LENGTH} characters")
            }
            Self::TooLong => {
                write!(f, "Must be at most {MAX_PASSWORD_LENGTH} characters")
            }
            Self::MissingClass(class) => write!(f, "Must contain {}", class.describe()),
            Self::IllegalCharacter(c) => write!(f, "Character {c:?} is not allowed"),
            Self::ContainsSpace => write!(f, "Must not contain spaces"),
        }
    }
}

/// Checks a candidate password against every rule and returns all violations.
/// An empty result means the password is acceptable.
#[must_use]
pub fn validate(candidate: &str) -> Vec<PasswordViolation> {
    let mut violations = Vec::new();

    let length = candidate.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        violations.push(PasswordViolation::TooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        violations.push(PasswordViolation::TooLong);
    }

    if !candidate.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push(PasswordViolation::MissingClass(CharClass::Uppercase));
    }
    if !candidate.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push(PasswordViolation::MissingClass(CharClass::Lowercase));
    }
    if !candidate.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordViolation::MissingClass(CharClass::Digit));
    }

    if candidate.chars().any(char::is_whitespace) {
        violations.push(PasswordViolation::ContainsSpace);
    }

    // Whitespace is reported above; everything else outside the allowed
    // alphabet is flagged once per distinct character.
    for c in candidate.chars() {
        if c.is_whitespace() || c.is_ascii_alphanumeric() || ALLOWED_SYMBOLS.contains(c) {
            continue;
        }
        let violation = PasswordViolation::IllegalCharacter(c);
        if !violations.contains(&violation) {
            violations.push(violation);
        }
    }

    violations
}

/// Parse the stored history column (JSON array of hash strings).
#[must_use]
pub fn parse_history(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Push a retired hash onto the history, evicting the oldest past the limit.
pub fn push_history(history: &mut Vec<String>, old_hash: String) {
    history.push(old_hash);
    while history.len() > HISTORY_LIMIT {
        history.remove(0);
    }
}

/// Password hashing/verification with server-wide Argon2 parameters.
#[derive(Clone)]
pub struct PasswordPolicy {
    security: SecurityConfig,
}

impl PasswordPolicy {
    #[must_use]
    pub const fn new(security: SecurityConfig) -> Self {
        Self { security }
    }

    /// Hash a password with a fresh random salt.
    /// Note: This uses `spawn_blocking` because Argon2 hashing is CPU-intensive
    /// and would block the async runtime if run directly.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        let config = self.security.clone();

        task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")?
    }

    /// Verify a password against a stored hash.
    pub async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();

        task::spawn_blocking(move || verify_hash(&password, &stored_hash))
            .await
            .context("Password verification task panicked")?
    }

    /// True when the candidate matches any retired hash. Hashes are salted
    /// per entry, so this is necessarily re-hash-and-compare.
    pub async fn is_reused(&self, password: &str, history: &[String]) -> Result<bool> {
        if history.is_empty() {
            return Ok(false);
        }

        let password = password.to_string();
        let history = history.to_vec();

        task::spawn_blocking(move || {
            for old_hash in &history {
                if verify_hash(&password, old_hash)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
        .context("Password history check task panicked")?
    }
}

/// Hash a password using Argon2id with the configured cost parameters.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None, // output length (use default)
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

fn verify_hash(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

    let argon2 = Argon2::default();
    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 8,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    #[test]
    fn test_validate_accepts_strong_password() {
        assert!(validate("Correct-Horse7").is_empty());
        assert!(validate(r#"Tr1cky~!?@#$%^&*_-+()[]{}<>/\|"'.,;:"#).is_empty());
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let violations = validate("short");
        assert!(violations.contains(&PasswordViolation::TooShort));
        assert!(violations.contains(&PasswordViolation::MissingClass(CharClass::Uppercase)));
        assert!(violations.contains(&PasswordViolation::MissingClass(CharClass::Digit)));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_validate_length_boundaries() {
        assert!(validate("Abcdef1!").is_empty());
        assert!(validate("Abcdef1").contains(&PasswordViolation::TooShort));

        let long = format!("Aa1{}", "x".repeat(125));
        assert_eq!(long.chars().count(), 128);
        assert!(validate(&long).is_empty());

        let too_long = format!("Aa1{}", "x".repeat(126));
        assert!(validate(&too_long).contains(&PasswordViolation::TooLong));
    }

    #[test]
    fn test_validate_rejects_spaces_and_illegal_characters() {
        let violations = validate("Pass word12");
        assert!(violations.contains(&PasswordViolation::ContainsSpace));
        assert!(!violations
            .iter()
            .any(|v| matches!(v, PasswordViolation::IllegalCharacter(_))));

        let violations = validate("Pässwörd12");
        assert!(violations.contains(&PasswordViolation::IllegalCharacter('ä')));
        assert!(violations.contains(&PasswordViolation::IllegalCharacter('ö')));
    }

    #[test]
    fn test_history_parse_roundtrip() {
        assert!(parse_history("[]").is_empty());
        assert!(parse_history("not json").is_empty());
        assert_eq!(parse_history(r#"["a","b"]"#), vec!["a", "b"]);
    }

    #[test]
    fn test_history_evicts_oldest_past_limit() {
        let mut history: Vec<String> = (0..HISTORY_LIMIT).map(|i| format!("hash-{i}")).collect();
        push_history(&mut history, "hash-new".to_string());

        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.first().unwrap(), "hash-1");
        assert_eq!(history.last().unwrap(), "hash-new");
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let policy = PasswordPolicy::new(fast_config());

        let hash = policy.hash("Sup3rSecret").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(policy.verify("Sup3rSecret", &hash).await.unwrap());
        assert!(!policy.verify("Sup3rSecre7", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_reuse_detected_across_salts() {
        let policy = PasswordPolicy::new(fast_config());

        let old_a = policy.hash("Old-Passw0rd").await.unwrap();
        let old_b = policy.hash("Other-Passw0rd").await.unwrap();
        assert_ne!(old_a, old_b);

        let history = vec![old_a, old_b];
        assert!(policy.is_reused("Old-Passw0rd", &history).await.unwrap());
        assert!(!policy.is_reused("Fresh-Passw0rd", &history).await.unwrap());
    }
}

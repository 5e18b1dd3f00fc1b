//! `SeaORM` implementation of the `TwoFactorService` trait.
//!
//! Pending enrollment secrets live only in memory, keyed by user id. Nothing
//! touches the database until the user proves they captured the secret by
//! confirming with a valid code.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, broadcast};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};

use crate::db::Store;
use crate::events::SecurityEvent;
use crate::services::password_policy::PasswordPolicy;
use crate::services::two_factor_service::{
    ConfirmOutcome, EnrollmentStart, TwoFactorError, TwoFactorService, VerifyOutcome,
};

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 8;
const BACKUP_CODE_GROUP_SIZE: usize = 4;

/// Unambiguous alphabet: no I, L, O, 0, or 1.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;

/// Accepted clock drift, in time steps, on either side of "now".
const TOTP_SKEW_STEPS: u8 = 1;

struct PendingEnrollment {
    secret_base32: String,
}

pub struct SeaOrmTwoFactorService {
    store: Store,
    policy: PasswordPolicy,
    event_bus: broadcast::Sender<SecurityEvent>,
    issuer: String,
    pending: RwLock<HashMap<i64, PendingEnrollment>>,
}

impl SeaOrmTwoFactorService {
    #[must_use]
    pub fn new(
        store: Store,
        policy: PasswordPolicy,
        event_bus: broadcast::Sender<SecurityEvent>,
        issuer: String,
    ) -> Self {
        Self {
            store,
            policy,
            event_bus,
            issuer,
            pending: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TwoFactorService for SeaOrmTwoFactorService {
    async fn begin_enrollment(&self, user_id: i64) -> Result<EnrollmentStart, TwoFactorError> {
        let user = self
            .store
            .get_user_model(user_id)
            .await?
            .ok_or(TwoFactorError::UserNotFound)?;

        if user.two_fa_enabled {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| TwoFactorError::Internal(format!("Secret generation error: {e}")))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            user_id.to_string(),
        )
        .map_err(|e| TwoFactorError::Internal(format!("TOTP init error: {e}")))?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| TwoFactorError::Internal(format!("QR generation error: {e}")))?;
        let qr_data_url = format!("data:image/png;base64,{qr}");
        let secret_base32 = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();

        // A second begin before confirming replaces the earlier secret.
        self.pending.write().await.insert(
            user_id,
            PendingEnrollment {
                secret_base32: secret_base32.clone(),
            },
        );

        info!("Started 2FA enrollment for user {user_id}");

        Ok(EnrollmentStart {
            secret_base32,
            provisioning_uri,
            qr_data_url,
        })
    }

    async fn confirm_enrollment(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<ConfirmOutcome, TwoFactorError> {
        // Taken out up front: a failed confirmation discards the secret.
        let pending = self
            .pending
            .write()
            .await
            .remove(&user_id)
            .ok_or(TwoFactorError::NoPendingEnrollment)?;

        let valid = check_totp(&pending.secret_base32, &self.issuer, code, now_unix())?;

        if !valid {
            warn!("2FA enrollment confirmation failed for user {user_id}, secret discarded");
            let _ = self
                .event_bus
                .send(SecurityEvent::EnrollmentAborted { user_id });
            metrics::counter!("chime_enrollment_failures_total").increment(1);

            return Ok(ConfirmOutcome {
                confirmed: false,
                backup_codes: vec![],
            });
        }

        let batch = BackupCodeBatch::generate();
        self.store
            .enable_two_factor(user_id, pending.secret_base32, batch.code_hashes)
            .await?;

        info!("2FA enabled for user {user_id} with {BACKUP_CODE_COUNT} backup codes");

        Ok(ConfirmOutcome {
            confirmed: true,
            backup_codes: batch.codes,
        })
    }

    async fn verify(
        &self,
        user_id: i64,
        code_or_backup: &str,
    ) -> Result<VerifyOutcome, TwoFactorError> {
        let user = self
            .store
            .get_user_model(user_id)
            .await?
            .ok_or(TwoFactorError::UserNotFound)?;

        if !user.two_fa_enabled {
            return Err(TwoFactorError::NotEnabled);
        }

        let secret = user.two_fa_secret.ok_or_else(|| {
            TwoFactorError::Internal(format!("User {user_id} enabled without a secret"))
        })?;

        if check_totp(&secret, &self.issuer, code_or_backup, now_unix())? {
            return Ok(VerifyOutcome::TotpOk);
        }

        if let Some(normalized) = normalize_backup_code(code_or_backup) {
            let code_hash = sha256_hex(&normalized);

            // Conditional delete: of two concurrent attempts with the same
            // code, exactly one sees the row and wins.
            if self.store.consume_backup_code(user_id, &code_hash).await? {
                let remaining = self.store.remaining_backup_codes(user_id).await?;
                info!("Backup code consumed for user {user_id} ({remaining} remaining)");

                if remaining == 0 {
                    warn!("User {user_id} has used their last backup code");
                    let _ = self
                        .event_bus
                        .send(SecurityEvent::BackupCodesExhausted { user_id });
                }

                return Ok(VerifyOutcome::BackupConsumed);
            }
        }

        Ok(VerifyOutcome::Fail)
    }

    async fn disable(
        &self,
        user_id: i64,
        password: &str,
        code_or_backup: &str,
    ) -> Result<bool, TwoFactorError> {
        let user = self
            .store
            .get_user_model(user_id)
            .await?
            .ok_or(TwoFactorError::UserNotFound)?;

        if !user.two_fa_enabled {
            return Err(TwoFactorError::NotEnabled);
        }

        let password_ok = match &user.hashed_password {
            Some(stored_hash) => self.policy.verify(password, stored_hash).await?,
            None => false,
        };

        if !password_ok {
            warn!("2FA disable rejected for user {user_id}: password check failed");
            let _ = self
                .event_bus
                .send(SecurityEvent::DisableRejected { user_id });
            return Ok(false);
        }

        if !self.verify(user_id, code_or_backup).await?.is_pass() {
            warn!("2FA disable rejected for user {user_id}: second factor check failed");
            let _ = self
                .event_bus
                .send(SecurityEvent::DisableRejected { user_id });
            return Ok(false);
        }

        self.store.disable_two_factor(user_id).await?;
        info!("2FA disabled for user {user_id}");

        Ok(true)
    }
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().unsigned_abs()
}

/// Check a TOTP code against a stored base32 secret at an explicit time.
/// The skew constant widens acceptance to one step either side.
fn check_totp(
    secret_base32: &str,
    issuer: &str,
    code: &str,
    timestamp: u64,
) -> Result<bool, TwoFactorError> {
    let code = code.trim();
    if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }

    let totp = totp_from_secret(secret_base32, issuer)?;
    Ok(totp.check(code, timestamp))
}

fn totp_from_secret(secret_base32: &str, issuer: &str) -> Result<TOTP, TwoFactorError> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| TwoFactorError::Internal(format!("Stored secret is malformed: {e}")))?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW_STEPS,
        TOTP_STEP_SECONDS,
        secret_bytes,
        Some(issuer.to_string()),
        String::new(),
    )
    .map_err(|e| TwoFactorError::Internal(format!("TOTP init error: {e}")))
}

/// A freshly generated backup-code batch (plaintext + hashes).
struct BackupCodeBatch {
    codes: Vec<String>,
    code_hashes: Vec<String>,
}

impl BackupCodeBatch {
    fn generate() -> Self {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);

        for _ in 0..BACKUP_CODE_COUNT {
            let normalized = generate_backup_code();
            code_hashes.push(sha256_hex(&normalized));
            codes.push(format_backup_code(&normalized));
        }

        Self { codes, code_hashes }
    }
}

fn generate_backup_code() -> String {
    let mut rng = rand::rng();

    (0..BACKUP_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..BACKUP_CODE_ALPHABET.len());
            BACKUP_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Strip separators and case from user input. Returns `None` when the result
/// cannot be a backup code, so TOTP-shaped input never hits the database.
fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return None;
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|b| BACKUP_CODE_ALPHABET.contains(b))
    {
        return None;
    }

    Some(normalized)
}

fn format_backup_code(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());

    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> String {
        let secret_bytes = Secret::generate_secret().to_bytes().unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some("chime".to_string()),
            "42".to_string(),
        )
        .unwrap();
        totp.get_secret_base32()
    }

    fn code_at(secret: &str, timestamp: u64) -> String {
        totp_from_secret(secret, "chime").unwrap().generate(timestamp)
    }

    #[test]
    fn test_totp_accepts_adjacent_steps_only() {
        let secret = test_secret();
        // Step-aligned so offsets land in well-defined steps.
        let t = 1_755_000_000 / TOTP_STEP_SECONDS * TOTP_STEP_SECONDS;
        let code = code_at(&secret, t);

        assert!(check_totp(&secret, "chime", &code, t).unwrap());
        assert!(check_totp(&secret, "chime", &code, t + TOTP_STEP_SECONDS).unwrap());
        assert!(check_totp(&secret, "chime", &code, t - TOTP_STEP_SECONDS).unwrap());

        assert!(!check_totp(&secret, "chime", &code, t + 2 * TOTP_STEP_SECONDS).unwrap());
        assert!(!check_totp(&secret, "chime", &code, t - 2 * TOTP_STEP_SECONDS).unwrap());
    }

    #[test]
    fn test_totp_rejects_malformed_codes() {
        let secret = test_secret();
        let t = now_unix();

        assert!(!check_totp(&secret, "chime", "12345", t).unwrap());
        assert!(!check_totp(&secret, "chime", "1234567", t).unwrap());
        assert!(!check_totp(&secret, "chime", "12a456", t).unwrap());
        assert!(!check_totp(&secret, "chime", "", t).unwrap());
    }

    #[test]
    fn test_totp_tolerates_surrounding_whitespace() {
        let secret = test_secret();
        let t = 1_755_000_000 / TOTP_STEP_SECONDS * TOTP_STEP_SECONDS;
        let code = code_at(&secret, t);

        assert!(check_totp(&secret, "chime", &format!("  {code}  "), t).unwrap());
    }

    #[test]
    fn test_backup_code_batch_shape() {
        let batch = BackupCodeBatch::generate();

        assert_eq!(batch.codes.len(), BACKUP_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), BACKUP_CODE_COUNT);

        for code in &batch.codes {
            assert_eq!(code.len(), BACKUP_CODE_LEN + 1);
            assert_eq!(code.as_bytes()[BACKUP_CODE_GROUP_SIZE], b'-');
        }

        for hash in &batch.code_hashes {
            assert_eq!(hash.len(), 64);
        }
    }

    #[test]
    fn test_normalize_backup_code() {
        assert_eq!(
            normalize_backup_code("abcd-efgh").as_deref(),
            Some("ABCDEFGH")
        );
        assert_eq!(
            normalize_backup_code(" AB CD EF GH ").as_deref(),
            Some("ABCDEFGH")
        );

        // Wrong length, TOTP-shaped, and out-of-alphabet input all bounce.
        assert_eq!(normalize_backup_code("ABCDEFG"), None);
        assert_eq!(normalize_backup_code("123456"), None);
        assert_eq!(normalize_backup_code("ABCD-EFG0"), None);
    }

    #[test]
    fn test_normalized_batch_hash_matches_displayed_code() {
        let batch = BackupCodeBatch::generate();
        let displayed = &batch.codes[0];
        let normalized = normalize_backup_code(displayed).unwrap();

        assert_eq!(sha256_hex(&normalized), batch.code_hashes[0]);
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("ABCDEFGH"),
            "9ac2197d9258257b1ae8463e4214e4cd0a578bc1517f2415928b91be4283fc48"
        );
    }
}

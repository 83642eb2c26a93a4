use crate::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const MAX_FAILED_ATTEMPTS: u32 = 5;
pub const LOCKOUT_MINUTES: i64 = 15;

/// A salted hash of an owner's transaction PIN.
///
/// The cleartext PIN never lives in this struct; `Debug` prints the hash only.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionPin {
    pub owner_id: Uuid,
    pub pin_hash: String,
    pub salt: String,
    pub set_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TransactionPin {
    pub fn new(owner_id: Uuid, pin: &str) -> Result<Self, PaymentError> {
        validate_format(pin)?;
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(Self {
            owner_id,
            pin_hash: hash_pin(&salt, pin),
            salt: hex::encode(salt),
            set_at: Utc::now(),
            failed_attempts: 0,
            locked_until: None,
        })
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Compares `candidate` against the stored hash in constant time.
    pub fn matches(&self, candidate: &str) -> bool {
        let Ok(salt) = hex::decode(&self.salt) else {
            return false;
        };
        let computed = hash_pin(&salt, candidate);
        computed.as_bytes().ct_eq(self.pin_hash.as_bytes()).into()
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
            self.locked_until = Some(now + Duration::minutes(LOCKOUT_MINUTES));
            self.failed_attempts = 0;
        }
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }
}

fn validate_format(pin: &str) -> Result<(), PaymentError> {
    if !(4..=6).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PaymentError::InvalidPinFormat(
            "PIN must be 4 to 6 digits".to_string(),
        ));
    }
    Ok(())
}

fn hash_pin(salt: &[u8], pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_is_never_stored_in_cleartext() {
        let pin = TransactionPin::new(Uuid::new_v4(), "4821").unwrap();
        assert_ne!(pin.pin_hash, "4821");
        assert!(!format!("{pin:?}").contains("4821"));
        assert!(pin.matches("4821"));
        assert!(!pin.matches("4822"));
    }

    #[test]
    fn test_same_pin_different_salt() {
        let owner = Uuid::new_v4();
        let a = TransactionPin::new(owner, "123456").unwrap();
        let b = TransactionPin::new(owner, "123456").unwrap();
        assert_ne!(a.pin_hash, b.pin_hash);
    }

    #[test]
    fn test_format_rules() {
        let owner = Uuid::new_v4();
        assert!(TransactionPin::new(owner, "123").is_err());
        assert!(TransactionPin::new(owner, "1234567").is_err());
        assert!(TransactionPin::new(owner, "12a4").is_err());
    }

    #[test]
    fn test_lockout_after_repeated_failures() {
        let mut pin = TransactionPin::new(Uuid::new_v4(), "0000").unwrap();
        let now = Utc::now();
        for _ in 0..MAX_FAILED_ATTEMPTS - 1 {
            pin.record_failure(now);
            assert!(!pin.is_locked(now));
        }
        pin.record_failure(now);
        assert!(pin.is_locked(now));
        assert!(!pin.is_locked(now + Duration::minutes(LOCKOUT_MINUTES + 1)));
    }
}

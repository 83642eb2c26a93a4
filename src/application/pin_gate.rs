//! Transaction-PIN checks in front of outbound transfers.

use crate::domain::pin::TransactionPin;
use crate::domain::ports::Stores;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Proof that the owner's PIN was verified for the current request.
///
/// Only [`PinGate::verify_pin`] can mint one, so an adapter handed a
/// `PayoutAuthorization::Pin(..)` knows the check really happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinVerified {
    _private: (),
}

impl PinVerified {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

pub struct PinGate {
    stores: Arc<Stores>,
}

impl PinGate {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    /// Sets or replaces the owner's PIN. The cleartext is wiped on drop.
    pub async fn set_pin(&self, owner_id: Uuid, pin: Zeroizing<String>) -> Result<()> {
        let row = TransactionPin::new(owner_id, &pin)?;
        self.stores.pins.put(row).await?;
        info!(%owner_id, "transaction PIN set");
        Ok(())
    }

    /// Checks `candidate` against the stored PIN.
    ///
    /// # Errors
    ///
    /// `PinNotConfigured` when the owner never set one, `PinLocked` during a
    /// lockout (including the attempt that triggers it), `PinMismatch`
    /// otherwise.
    pub async fn verify_pin(&self, owner_id: Uuid, candidate: &str) -> Result<PinVerified> {
        let mut row = self
            .stores
            .pins
            .get(owner_id)
            .await?
            .ok_or(PaymentError::PinNotConfigured)?;
        let now = Utc::now();
        if row.is_locked(now) {
            return Err(PaymentError::PinLocked);
        }

        if row.matches(candidate) {
            if row.failed_attempts > 0 || row.locked_until.is_some() {
                row.record_success();
                self.stores.pins.put(row).await?;
            }
            return Ok(PinVerified::new());
        }

        row.record_failure(now);
        let locked = row.is_locked(now);
        self.stores.pins.put(row).await?;
        if locked {
            warn!(%owner_id, "transaction PIN locked after repeated failures");
            Err(PaymentError::PinLocked)
        } else {
            Err(PaymentError::PinMismatch)
        }
    }
}

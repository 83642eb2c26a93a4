use super::money::{Amount, Balance, Currency};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Inactive,
    ActivationPending,
    Active,
    Frozen,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::ActivationPending => "activation_pending",
            Self::Active => "active",
            Self::Frozen => "frozen",
        };
        f.write_str(s)
    }
}

/// One owner's wallet on one rail.
///
/// `balance` is the settled total; `available_balance` is what may still be
/// committed to new outbound transfers. The gap between them is the sum of
/// in-flight payout reservations, so `available_balance <= balance` holds
/// after every operation below.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub currency: Currency,
    pub balance: Balance,
    pub available_balance: Balance,
    pub status: WalletStatus,
    pub provider_account_ref: Option<String>,
    /// Status to restore when an operator lifts a freeze.
    pub status_before_freeze: Option<WalletStatus>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: Uuid, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            currency,
            balance: Balance::ZERO,
            available_balance: Balance::ZERO,
            status: WalletStatus::Inactive,
            provider_account_ref: None,
            status_before_freeze: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == WalletStatus::Frozen
    }

    /// Outbound operations need an active, unfrozen wallet.
    pub fn ensure_can_send(&self) -> Result<(), PaymentError> {
        match self.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Frozen => Err(PaymentError::WalletFrozen(self.id)),
            _ => Err(PaymentError::WalletNotActive(self.id)),
        }
    }

    /// Credits a confirmed deposit.
    pub fn credit(&mut self, amount: Amount) {
        let amount = Balance::from(amount);
        self.balance += amount;
        self.available_balance += amount;
    }

    /// Reserves funds for an outbound transfer that is not yet confirmed.
    pub fn reserve(&mut self, amount: Amount) -> Result<(), PaymentError> {
        let amount = Balance::from(amount);
        if self.available_balance >= amount {
            self.available_balance -= amount;
            Ok(())
        } else {
            Err(PaymentError::InsufficientFunds {
                available: self.available_balance.value(),
                requested: amount.value(),
            })
        }
    }

    /// Returns a reservation to the available balance after a failed payout.
    pub fn release(&mut self, amount: Amount) -> Result<(), PaymentError> {
        let amount = Balance::from(amount);
        if self.available_balance + amount <= self.balance {
            self.available_balance += amount;
            Ok(())
        } else {
            Err(PaymentError::InvalidTransition(
                "Release exceeds reserved funds".to_string(),
            ))
        }
    }

    /// Finalizes a reserved payout.
    pub fn settle_reserved(&mut self, amount: Amount) -> Result<(), PaymentError> {
        let amount = Balance::from(amount);
        if self.balance - amount >= self.available_balance {
            self.balance -= amount;
            Ok(())
        } else {
            Err(PaymentError::InvalidTransition(
                "Settlement exceeds reserved funds".to_string(),
            ))
        }
    }

    /// Immediate debit of both balances, used for internal exchanges.
    pub fn debit(&mut self, amount: Amount) -> Result<(), PaymentError> {
        self.reserve(amount)?;
        self.balance -= Balance::from(amount);
        Ok(())
    }

    pub fn freeze(&mut self) -> Result<(), PaymentError> {
        if self.is_frozen() {
            return Err(PaymentError::InvalidTransition(format!(
                "wallet {} is already frozen",
                self.id
            )));
        }
        self.status_before_freeze = Some(self.status);
        self.status = WalletStatus::Frozen;
        Ok(())
    }

    pub fn unfreeze(&mut self) -> Result<(), PaymentError> {
        if !self.is_frozen() {
            return Err(PaymentError::InvalidTransition(format!(
                "wallet {} is not frozen",
                self.id
            )));
        }
        self.status = self
            .status_before_freeze
            .take()
            .unwrap_or(WalletStatus::Inactive);
        Ok(())
    }
}

use super::money::{Amount, Currency};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Active,
    Executed,
    Expired,
    Cancelled,
}

/// A short-lived, single-use offer to convert between two of an owner's wallets.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ExchangeQuote {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub from_amount: Amount,
    pub rate: Decimal,
    pub fee: Decimal,
    pub to_amount: Amount,
    pub status: QuoteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl ExchangeQuote {
    /// Checks the quote can be executed at `now` and marks it executed.
    ///
    /// An active quote past `expires_at` is flipped to `Expired` and the
    /// error is returned; the caller persists whichever status results.
    pub fn execute(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        match self.status {
            QuoteStatus::Active if now >= self.expires_at => {
                self.status = QuoteStatus::Expired;
                Err(PaymentError::QuoteExpired(self.id))
            }
            QuoteStatus::Active => {
                self.status = QuoteStatus::Executed;
                Ok(())
            }
            QuoteStatus::Expired => Err(PaymentError::QuoteExpired(self.id)),
            QuoteStatus::Executed | QuoteStatus::Cancelled => {
                Err(PaymentError::QuoteNotActive(self.id))
            }
        }
    }

    pub fn cancel(&mut self) -> Result<(), PaymentError> {
        if self.status != QuoteStatus::Active {
            return Err(PaymentError::QuoteNotActive(self.id));
        }
        self.status = QuoteStatus::Cancelled;
        Ok(())
    }
}

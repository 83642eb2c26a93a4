use super::money::{Amount, Currency};
use crate::providers::Provider;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Exchange,
}

impl TransactionType {
    /// Payouts reserve funds at initiation and settle on confirmation.
    pub fn is_payout(self) -> bool {
        matches!(self, Self::Withdrawal | Self::Transfer)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub wallet_id: Uuid,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    pub currency: Currency,
    pub amount: Amount,
    /// Globally unique idempotency key.
    pub reference: String,
    pub provider: Option<Provider>,
    pub provider_ref: Option<String>,
    /// Set while the only provider answer so far was a simulated one.
    pub simulated: bool,
    pub failure_reason: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn pending(
        wallet: &super::wallet::Wallet,
        r#type: TransactionType,
        amount: Amount,
        reference: String,
        provider: Option<Provider>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: wallet.owner_id,
            wallet_id: wallet.id,
            r#type,
            status: TransactionStatus::Pending,
            currency: wallet.currency,
            amount,
            reference,
            provider,
            provider_ref: None,
            simulated: false,
            failure_reason: None,
            version: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Builds a reference of the form `<provider>_<operation>_<unix-millis>_<random>`.
///
/// The reference is generated once by the initiating side and persisted
/// before any external call carries it.
pub fn new_reference(provider: &str, operation: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "{}_{}_{}_{}",
        provider,
        operation,
        Utc::now().timestamp_millis(),
        suffix.to_ascii_lowercase()
    )
}

/// The provisioning idempotency key for a wallet at a provider. Every
/// attempt for the same pair carries the same key.
pub fn provisioning_reference(provider: &str, wallet_id: Uuid) -> String {
    format!("{provider}_provision_{}", wallet_id.simple())
}

//! External payment networks behind one adapter contract.
//!
//! Each rail lives in its own module and implements [`PaymentAdapter`]. Adapter
//! calls never fail with an error for provider-side problems: everything the
//! network (or its absence) can do is folded into an [`Outcome`] so callers
//! pattern-match instead of guessing which failures are safe to retry.

pub mod card_bank;
pub mod chain;
pub mod http;
pub mod mobile_money;
pub mod ngn_gateway;
pub mod xaf_gateway;

use crate::application::pin_gate::PinVerified;
use crate::domain::money::{Amount, Currency};
use crate::domain::transaction::TransactionStatus;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The three-value status every provider vocabulary is mapped onto.
pub type NormalizedStatus = TransactionStatus;

/// Prefix marking external references that no real network issued.
pub const SIMULATED_PREFIX: &str = "sim_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    NgnGateway,
    XafGateway,
    MobileMoney,
    CardBank,
    Chain,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Self::NgnGateway,
        Self::XafGateway,
        Self::MobileMoney,
        Self::CardBank,
        Self::Chain,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Self::NgnGateway => "ngn_gateway",
            Self::XafGateway => "xaf_gateway",
            Self::MobileMoney => "mobile_money",
            Self::CardBank => "card_bank",
            Self::Chain => "chain",
        }
    }

    /// Header the provider puts its webhook signature in.
    pub fn signature_header(self) -> &'static str {
        match self {
            Self::NgnGateway => "x-ngn-signature",
            Self::XafGateway => "x-xaf-signature",
            Self::MobileMoney => "x-momo-signature",
            Self::CardBank => "x-card-signature",
            Self::Chain => "x-chain-signature",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Provider {
    type Err = PaymentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.slug() == s)
            .ok_or_else(|| PaymentError::MalformedPayload(format!("unknown provider {s}")))
    }
}

/// What a provider said about one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub external_ref: String,
    pub status: NormalizedStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The network answered and accepted (or already settled) the operation.
    Success(Receipt),
    /// No real call was made; status is always pending.
    Simulated(Receipt),
    /// The network actively declined.
    Rejected {
        reason: String,
        raw: serde_json::Value,
    },
    /// The network could not be reached or answered unintelligibly.
    Unavailable { reason: String },
}

impl Outcome {
    pub fn simulated(reference: &str, provider: Provider) -> Self {
        Self::Simulated(Receipt {
            external_ref: format!("{SIMULATED_PREFIX}{reference}"),
            status: NormalizedStatus::Pending,
            raw: serde_json::json!({ "simulated": true, "provider": provider.slug() }),
        })
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Simulated(_))
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }

    pub fn normalized_status(&self) -> NormalizedStatus {
        match self {
            Self::Success(receipt) => receipt.status,
            Self::Simulated(_) | Self::Unavailable { .. } => NormalizedStatus::Pending,
            Self::Rejected { .. } => NormalizedStatus::Failed,
        }
    }

    pub fn external_ref(&self) -> Option<&str> {
        match self {
            Self::Success(receipt) | Self::Simulated(receipt) => Some(&receipt.external_ref),
            _ => None,
        }
    }
}

/// Who is paying or being provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub owner_id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
    pub customer: Customer,
    /// Normalized national number, set by the router for mobile rails.
    pub phone: Option<String>,
}

/// Where a payout goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Counterpart {
    Bank {
        bank_code: String,
        account_number: String,
        account_name: Option<String>,
    },
    Mobile {
        phone: String,
    },
    Chain {
        network: String,
        address: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
    pub counterpart: Counterpart,
}

/// Proof handed to `create_payout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutAuthorization {
    NotRequired,
    Pin(PinVerified),
}

/// A payout target a provider supports (bank, operator or network).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub code: String,
    pub name: String,
}

/// A verified webhook payload, reduced to what the ledger needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub reference: String,
    pub provider_ref: Option<String>,
    pub status: NormalizedStatus,
}

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Smallest amount this rail accepts.
    fn minimum_amount(&self) -> rust_decimal::Decimal;

    /// Whether payouts need a verified transaction PIN.
    fn requires_payout_pin(&self) -> bool {
        false
    }

    fn is_simulated(&self) -> bool;

    async fn create_payment(&self, request: &PaymentRequest) -> Outcome;

    async fn verify_payment(&self, reference: &str) -> Outcome;

    async fn create_payout(&self, request: &PayoutRequest, auth: PayoutAuthorization) -> Outcome;

    async fn verify_payout(&self, reference: &str) -> Outcome;

    async fn list_destinations(&self) -> Vec<Destination>;

    /// Creates the provider-side customer, virtual account or address for a
    /// newly approved wallet. `reference` doubles as the idempotency key.
    async fn provision_account(&self, reference: &str, customer: &Customer) -> Outcome {
        let _ = (reference, customer);
        Outcome::Rejected {
            reason: format!("{} does not provision accounts", self.provider()),
            raw: serde_json::Value::Null,
        }
    }

    /// Checks a webhook signature against the raw body.
    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool;

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent>;
}

/// Refuses a payout on a PIN-gated rail that arrived without a verified PIN.
pub(crate) fn pin_missing(provider: Provider) -> Outcome {
    Outcome::Rejected {
        reason: format!("{provider} payouts require a verified transaction PIN"),
        raw: serde_json::Value::Null,
    }
}

use super::money::Currency;
use crate::providers::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// An identity-verification submission gating activation of one wallet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct KycRequest {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub wallet_currency: Currency,
    pub status: KycStatus,
    pub submitted_fields: BTreeMap<String, String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub version: u64,
}

impl KycRequest {
    pub fn new(
        owner_id: Uuid,
        wallet_currency: Currency,
        submitted_fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            wallet_currency,
            status: KycStatus::Pending,
            submitted_fields,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            submitted_at: Utc::now(),
            version: 0,
        }
    }

    /// A field from the submission, trimmed, if present and non-empty.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.submitted_fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// The provider-side customer or virtual account created after approval.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProviderAccount {
    pub wallet_id: Uuid,
    pub provider: Provider,
    pub external_ref: String,
    pub created_at: DateTime<Utc>,
}

impl ProviderAccount {
    pub fn new(wallet_id: Uuid, provider: Provider, external_ref: String) -> Self {
        Self {
            wallet_id,
            provider,
            external_ref,
            created_at: Utc::now(),
        }
    }
}

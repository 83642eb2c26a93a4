//! Stablecoin custody API (USDT on TRC20, ERC20 and BEP20).

use super::http::{self, Transport};
use super::{
    Counterpart, Customer, Destination, NormalizedStatus, Outcome, PaymentAdapter,
    PaymentRequest, PayoutAuthorization, PayoutRequest, Provider, Receipt, WebhookEvent,
};
use crate::config::{Credentials, ProviderConfig};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

const PROVIDER: Provider = Provider::Chain;

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Trc20,
    Erc20,
    Bep20,
}

impl Network {
    pub const ALL: [Network; 3] = [Self::Trc20, Self::Erc20, Self::Bep20];

    pub fn code(self) -> &'static str {
        match self {
            Self::Trc20 => "TRC20",
            Self::Erc20 => "ERC20",
            Self::Bep20 => "BEP20",
        }
    }

    /// Checks the address shape for this network. Checksums are left to the
    /// custody API.
    pub fn validate_address(self, address: &str) -> Result<()> {
        let valid = match self {
            Self::Trc20 => {
                address.len() == 34
                    && address.starts_with('T')
                    && address.chars().all(|c| BASE58.contains(c))
            }
            Self::Erc20 | Self::Bep20 => address
                .strip_prefix("0x")
                .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())),
        };
        if valid {
            Ok(())
        } else {
            Err(PaymentError::MissingCounterpart(format!(
                "invalid {} address: {address}",
                self.code()
            )))
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Network {
    type Err = PaymentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|n| n.code() == upper)
            .ok_or_else(|| PaymentError::MissingCounterpart(format!("unsupported network {s}")))
    }
}

pub struct ChainAdapter {
    transport: Option<Transport>,
    webhook_secret: Option<Zeroizing<String>>,
    minimum_amount: Decimal,
}

impl ChainAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            transport: http::live_transport(PROVIDER, config, |c| {
                matches!(c, Credentials::ApiKey(key) if key.len() >= 16)
            }),
            webhook_secret: config.webhook_secret.clone(),
            minimum_amount: config.minimum_amount,
        }
    }

    async fn lookup(&self, path: String, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        match transport.get(&path).await {
            Ok(response) => receipt(response, reference),
            Err(failure) => failure.into(),
        }
    }
}

pub fn normalize_status(status: &str) -> NormalizedStatus {
    match status.to_ascii_lowercase().as_str() {
        "confirmed" | "completed" => NormalizedStatus::Completed,
        "failed" | "dropped" | "rejected" => NormalizedStatus::Failed,
        _ => NormalizedStatus::Pending,
    }
}

fn receipt(body: Value, fallback_ref: &str) -> Outcome {
    let Some(status) = body["status"].as_str() else {
        return Outcome::Unavailable {
            reason: "response carried no status".to_string(),
        };
    };
    let external_ref = body["tx_hash"]
        .as_str()
        .or_else(|| body["id"].as_str())
        .unwrap_or(fallback_ref)
        .to_string();
    Outcome::Success(Receipt {
        external_ref,
        status: normalize_status(status),
        raw: body,
    })
}

#[async_trait]
impl PaymentAdapter for ChainAdapter {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    fn minimum_amount(&self) -> Decimal {
        self.minimum_amount
    }

    fn is_simulated(&self) -> bool {
        self.transport.is_none()
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        let body = json!({
            "reference": request.reference,
            "asset": "USDT",
            "amount": request.amount.value().to_string(),
        });
        match transport.post("/v1/deposit-intents", &body).await {
            Ok(response) => receipt(response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        self.lookup(format!("/v1/deposit-intents/{reference}"), reference)
            .await
    }

    async fn create_payout(&self, request: &PayoutRequest, _auth: PayoutAuthorization) -> Outcome {
        let Counterpart::Chain { network, address } = &request.counterpart else {
            return Outcome::Rejected {
                reason: "chain payouts go to on-chain addresses only".to_string(),
                raw: Value::Null,
            };
        };
        let network = match network
            .parse::<Network>()
            .and_then(|n| n.validate_address(address).map(|()| n))
        {
            Ok(network) => network,
            Err(e) => {
                return Outcome::Rejected {
                    reason: e.to_string(),
                    raw: Value::Null,
                };
            }
        };
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        let body = json!({
            "reference": request.reference,
            "asset": "USDT",
            "network": network.code(),
            "address": address,
            "amount": request.amount.value().to_string(),
        });
        match transport.post("/v1/withdrawals", &body).await {
            Ok(response) => receipt(response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        self.lookup(format!("/v1/withdrawals/{reference}"), reference)
            .await
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        Network::ALL
            .into_iter()
            .map(|n| Destination {
                code: n.code().to_string(),
                name: format!("USDT on {n}"),
            })
            .collect()
    }

    async fn provision_account(&self, reference: &str, customer: &Customer) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        let body = json!({
            "reference": reference,
            "label": customer.owner_id,
            "network": Network::Trc20.code(),
        });
        match transport.post("/v1/addresses", &body).await {
            Ok(response) => match response["address"].as_str() {
                Some(address) => Outcome::Success(Receipt {
                    external_ref: address.to_string(),
                    status: NormalizedStatus::Completed,
                    raw: response.clone(),
                }),
                None => Outcome::Unavailable {
                    reason: "missing address".to_string(),
                },
            },
            Err(failure) => failure.into(),
        }
    }

    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool {
        self.webhook_secret
            .as_ref()
            .is_some_and(|secret| http::verify_sha256_hex(secret.as_bytes(), body, signature))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        let reference = payload["reference"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing reference".to_string()))?;
        let status = payload["status"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing status".to_string()))?;
        Ok(WebhookEvent {
            reference: reference.to_string(),
            provider_ref: payload["tx_hash"].as_str().map(str::to_string),
            status: normalize_status(status),
        })
    }
}

//! Card acquiring bank (naira card checkouts and bank payouts).
//!
//! Webhook signatures carry a timestamp: the header reads
//! `t=<unix seconds>,v1=<hex HMAC-SHA256 of "<t>.<body>">`, and signatures
//! older than [`SIGNATURE_TOLERANCE_SECS`] are refused.

use super::http::{self, Transport};
use super::{
    Counterpart, Destination, NormalizedStatus, Outcome, PaymentAdapter, PaymentRequest,
    PayoutAuthorization, PayoutRequest, Provider, Receipt, WebhookEvent,
};
use crate::config::{Credentials, ProviderConfig};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use zeroize::Zeroizing;

const PROVIDER: Provider = Provider::CardBank;

pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct CardBankAdapter {
    transport: Option<Transport>,
    webhook_secret: Option<Zeroizing<String>>,
    minimum_amount: Decimal,
}

impl CardBankAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            transport: http::live_transport(PROVIDER, config, |c| {
                matches!(c, Credentials::Bearer(key)
                    if key.starts_with("ck_live_") || key.starts_with("ck_test_"))
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

pub fn normalize_status(state: &str) -> NormalizedStatus {
    match state.to_ascii_lowercase().as_str() {
        "approved" | "paid" => NormalizedStatus::Completed,
        "declined" | "canceled" | "cancelled" | "failed" => NormalizedStatus::Failed,
        _ => NormalizedStatus::Pending,
    }
}

fn receipt(body: Value, fallback_ref: &str) -> Outcome {
    let Some(state) = body["state"].as_str() else {
        return Outcome::Unavailable {
            reason: "response carried no state".to_string(),
        };
    };
    Outcome::Success(Receipt {
        external_ref: body["id"].as_str().unwrap_or(fallback_ref).to_string(),
        status: normalize_status(state),
        raw: body,
    })
}

/// Splits `t=..,v1=..` into its timestamp and signature.
fn parse_signature_header(header: &str) -> Option<(i64, &str)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    Some((timestamp?, signature?))
}

/// Builds a signature header for `body` at `timestamp`.
pub fn sign(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut payload = format!("{timestamp}.").into_bytes();
    payload.extend_from_slice(body);
    format!("t={timestamp},v1={}", hex::encode(http::hmac_sha256(secret, &payload)))
}

#[async_trait]
impl PaymentAdapter for CardBankAdapter {
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
            "amount": request.amount.value().to_string(),
            "currency": request.currency.code(),
            "customer_email": request.customer.email,
        });
        match transport.post("/v2/checkouts", &body).await {
            Ok(response) => receipt(response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        self.lookup(format!("/v2/checkouts/ref/{reference}"), reference)
            .await
    }

    async fn create_payout(&self, request: &PayoutRequest, _auth: PayoutAuthorization) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        let Counterpart::Bank {
            bank_code,
            account_number,
            account_name,
        } = &request.counterpart
        else {
            return Outcome::Rejected {
                reason: "card bank payouts go to bank accounts only".to_string(),
                raw: Value::Null,
            };
        };
        let body = json!({
            "reference": request.reference,
            "amount": request.amount.value().to_string(),
            "currency": request.currency.code(),
            "destination": {
                "bank_code": bank_code,
                "account_number": account_number,
                "holder_name": account_name,
            },
        });
        match transport.post("/v2/payouts", &body).await {
            Ok(response) => receipt(response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        self.lookup(format!("/v2/payouts/ref/{reference}"), reference)
            .await
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        let Some(transport) = &self.transport else {
            return vec![Destination {
                code: "058".to_string(),
                name: "Guaranty Trust Bank".to_string(),
            }];
        };
        match transport.get("/v2/banks").await {
            Ok(body) => body["items"]
                .as_array()
                .map(|banks| {
                    banks
                        .iter()
                        .filter_map(|b| {
                            Some(Destination {
                                code: b["code"].as_str()?.to_string(),
                                name: b["name"].as_str()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool {
        let Some(secret) = &self.webhook_secret else {
            return false;
        };
        let Some((timestamp, v1)) = parse_signature_header(signature) else {
            return false;
        };
        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return false;
        }
        let mut payload = format!("{timestamp}.").into_bytes();
        payload.extend_from_slice(body);
        http::verify_sha256_hex(secret.as_bytes(), &payload, v1)
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        let object = &payload["object"];
        let reference = object["reference"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing object.reference".into()))?;
        let state = object["state"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing object.state".into()))?;
        Ok(WebhookEvent {
            reference: reference.to_string(),
            provider_ref: object["id"].as_str().map(str::to_string),
            status: normalize_status(state),
        })
    }
}

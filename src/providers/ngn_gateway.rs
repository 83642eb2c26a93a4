//! Naira deposit/payout gateway.
//!
//! Bearer-key authentication (`sk_live_` / `sk_test_` keys). Amounts travel
//! in kobo. Deposits are bank-transfer checkouts, payouts are NUBAN
//! transfers, and provisioning creates a dedicated virtual account. Webhooks
//! carry a hex HMAC-SHA512 of the raw body.

use super::http::{self, CallFailure, Transport};
use super::{
    Customer, Destination, NormalizedStatus, Outcome, PaymentAdapter, PaymentRequest,
    PayoutAuthorization, PayoutRequest, Provider, Receipt, WebhookEvent, Counterpart,
};
use crate::config::{Credentials, ProviderConfig};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use tracing::info;
use zeroize::Zeroizing;

const PROVIDER: Provider = Provider::NgnGateway;

pub struct NgnGatewayAdapter {
    transport: Option<Transport>,
    webhook_secret: Option<Zeroizing<String>>,
    minimum_amount: Decimal,
}

impl NgnGatewayAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            transport: http::live_transport(PROVIDER, config, well_formed),
            webhook_secret: config.webhook_secret.clone(),
            minimum_amount: config.minimum_amount,
        }
    }

    fn receipt(&self, body: &Value, fallback_ref: &str) -> Outcome {
        let data = &body["data"];
        let Some(status) = data["status"].as_str() else {
            // Initialization answers carry no status: the checkout is open.
            if body["status"].as_bool() == Some(true) {
                return Outcome::Success(Receipt {
                    external_ref: data["reference"]
                        .as_str()
                        .unwrap_or(fallback_ref)
                        .to_string(),
                    status: NormalizedStatus::Pending,
                    raw: body.clone(),
                });
            }
            return Outcome::Unavailable {
                reason: "response carried no status".to_string(),
            };
        };
        let external_ref = data["transfer_code"]
            .as_str()
            .or_else(|| data["reference"].as_str())
            .unwrap_or(fallback_ref)
            .to_string();
        Outcome::Success(Receipt {
            external_ref,
            status: normalize_status(status),
            raw: body.clone(),
        })
    }
}

/// Maps the gateway's vocabulary onto the internal three states.
pub fn normalize_status(status: &str) -> NormalizedStatus {
    match status.to_ascii_lowercase().as_str() {
        "successful" | "success" => NormalizedStatus::Completed,
        "failed" | "abandoned" | "reversed" => NormalizedStatus::Failed,
        _ => NormalizedStatus::Pending,
    }
}

fn well_formed(credentials: &Credentials) -> bool {
    match credentials {
        Credentials::Bearer(key) => {
            (key.starts_with("sk_live_") || key.starts_with("sk_test_")) && key.len() > 8
        }
        _ => false,
    }
}

/// Whole kobo, or `None` when the amount is out of range or finer than a kobo.
fn to_kobo(amount: Decimal) -> Option<i64> {
    let kobo = amount * Decimal::ONE_HUNDRED;
    if !kobo.fract().is_zero() {
        return None;
    }
    kobo.to_i64()
}

#[async_trait]
impl PaymentAdapter for NgnGatewayAdapter {
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
        let Some(amount) = to_kobo(request.amount.value()) else {
            return Outcome::Rejected {
                reason: "amount is not a whole number of kobo".to_string(),
                raw: Value::Null,
            };
        };
        let body = json!({
            "email": request.customer.email,
            "amount": amount,
            "currency": request.currency.code(),
            "reference": request.reference,
            "channels": ["bank_transfer", "ussd"],
        });
        match transport.post("/transaction/initialize", &body).await {
            Ok(response) => self.receipt(&response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        match transport
            .get(&format!("/transaction/verify/{reference}"))
            .await
        {
            Ok(response) => self.receipt(&response, reference),
            Err(failure) => failure.into(),
        }
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
                reason: "naira payouts go to bank accounts only".to_string(),
                raw: Value::Null,
            };
        };
        let Some(amount) = to_kobo(request.amount.value()) else {
            return Outcome::Rejected {
                reason: "amount is not a whole number of kobo".to_string(),
                raw: Value::Null,
            };
        };
        let body = json!({
            "source": "balance",
            "amount": amount,
            "currency": request.currency.code(),
            "reference": request.reference,
            "recipient": {
                "type": "nuban",
                "bank_code": bank_code,
                "account_number": account_number,
                "name": account_name,
            },
        });
        match transport.post("/transfer", &body).await {
            Ok(response) => self.receipt(&response, &request.reference),
            Err(failure) => failure.into(),
        }
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        match transport.get(&format!("/transfer/verify/{reference}")).await {
            Ok(response) => self.receipt(&response, reference),
            Err(failure) => failure.into(),
        }
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        let Some(transport) = &self.transport else {
            return simulated_banks();
        };
        match transport.get("/bank?currency=NGN").await {
            Ok(body) => body["data"]
                .as_array()
                .map(|banks| banks.iter().filter_map(destination).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn provision_account(&self, reference: &str, customer: &Customer) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        let body = json!({
            "reference": reference,
            "customer": {
                "email": customer.email,
                "name": customer.name,
                "phone": customer.phone,
                "external_id": customer.owner_id,
            },
            "preferred_bank": "default",
        });
        match transport.post("/dedicated_account", &body).await {
            Ok(response) => match response["data"]["account_number"].as_str() {
                Some(account) => {
                    info!(provider = %PROVIDER, %reference, "dedicated account created");
                    Outcome::Success(Receipt {
                        external_ref: account.to_string(),
                        status: NormalizedStatus::Completed,
                        raw: response.clone(),
                    })
                }
                None => CallFailure::Unavailable("missing account_number".to_string()).into(),
            },
            Err(failure) => failure.into(),
        }
    }

    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool {
        self.webhook_secret
            .as_ref()
            .is_some_and(|secret| http::verify_sha512_hex(secret.as_bytes(), body, signature))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        let data = &payload["data"];
        let reference = data["reference"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing data.reference".into()))?;
        let status = data["status"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing data.status".into()))?;
        Ok(WebhookEvent {
            reference: reference.to_string(),
            provider_ref: data["id"]
                .as_i64()
                .map(|id| id.to_string())
                .or_else(|| data["transfer_code"].as_str().map(str::to_string)),
            status: normalize_status(status),
        })
    }
}

fn destination(bank: &Value) -> Option<Destination> {
    Some(Destination {
        code: bank["code"].as_str()?.to_string(),
        name: bank["name"].as_str()?.to_string(),
    })
}

fn simulated_banks() -> Vec<Destination> {
    [("044", "Access Bank"), ("058", "Guaranty Trust Bank"), ("057", "Zenith Bank")]
        .into_iter()
        .map(|(code, name)| Destination {
            code: code.to_string(),
            name: name.to_string(),
        })
        .collect()
}

//! CFA franc bank gateway.
//!
//! Authenticates with a client id/secret pair. Payouts are PIN-gated and
//! provisioning registers the wallet owner as a gateway customer.

use super::http::{self, CallFailure, Transport};
use super::{
    Counterpart, Customer, Destination, NormalizedStatus, Outcome, PaymentAdapter,
    PaymentRequest, PayoutAuthorization, PayoutRequest, Provider, Receipt, WebhookEvent,
    pin_missing,
};
use crate::config::{Credentials, ProviderConfig};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use zeroize::Zeroizing;

const PROVIDER: Provider = Provider::XafGateway;

pub struct XafGatewayAdapter {
    transport: Option<Transport>,
    webhook_secret: Option<Zeroizing<String>>,
    minimum_amount: Decimal,
}

impl XafGatewayAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            transport: http::live_transport(PROVIDER, config, |c| {
                matches!(c, Credentials::ClientPair { client_id, client_secret }
                    if !client_id.trim().is_empty() && !client_secret.trim().is_empty())
            }),
            webhook_secret: config.webhook_secret.clone(),
            minimum_amount: config.minimum_amount,
        }
    }

    async fn call(
        &self,
        transport: &Transport,
        path: &str,
        body: Option<Value>,
        fallback_ref: &str,
    ) -> Outcome {
        let response = match body {
            Some(body) => transport.post(path, &body).await,
            None => transport.get(path).await,
        };
        match response {
            Ok(body) => receipt(body, fallback_ref),
            Err(failure) => failure.into(),
        }
    }
}

pub fn normalize_status(status: &str) -> NormalizedStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESSFUL" | "SUCCESS" | "COMPLETED" => NormalizedStatus::Completed,
        "FAILED" | "EXPIRED" | "CANCELLED" | "REJECTED" => NormalizedStatus::Failed,
        _ => NormalizedStatus::Pending,
    }
}

fn receipt(body: Value, fallback_ref: &str) -> Outcome {
    let Some(status) = body["status"].as_str() else {
        return CallFailure::Unavailable("response carried no status".to_string()).into();
    };
    let status = normalize_status(status);
    let external_ref = body["reference"]
        .as_str()
        .unwrap_or(fallback_ref)
        .to_string();
    Outcome::Success(Receipt {
        external_ref,
        status,
        raw: body,
    })
}

#[async_trait]
impl PaymentAdapter for XafGatewayAdapter {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    fn minimum_amount(&self) -> Decimal {
        self.minimum_amount
    }

    fn requires_payout_pin(&self) -> bool {
        true
    }

    fn is_simulated(&self) -> bool {
        self.transport.is_none()
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        let body = json!({
            "external_reference": request.reference,
            "amount": request.amount.value().to_string(),
            "currency": request.currency.code(),
            "customer": {
                "email": request.customer.email,
                "name": request.customer.name,
            },
        });
        self.call(transport, "/v1/collections", Some(body), &request.reference)
            .await
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        self.call(transport, &format!("/v1/collections/{reference}"), None, reference)
            .await
    }

    async fn create_payout(&self, request: &PayoutRequest, auth: PayoutAuthorization) -> Outcome {
        if !matches!(auth, PayoutAuthorization::Pin(_)) {
            return pin_missing(PROVIDER);
        }
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
                reason: "gateway payouts go to bank accounts only".to_string(),
                raw: Value::Null,
            };
        };
        let body = json!({
            "external_reference": request.reference,
            "amount": request.amount.value().to_string(),
            "currency": request.currency.code(),
            "beneficiary": {
                "bank_code": bank_code,
                "account_number": account_number,
                "account_name": account_name,
            },
        });
        self.call(transport, "/v1/disbursements", Some(body), &request.reference)
            .await
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        self.call(transport, &format!("/v1/disbursements/{reference}"), None, reference)
            .await
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        let Some(transport) = &self.transport else {
            return [("10005", "Afriland First Bank"), ("10029", "Societe Generale Cameroun")]
                .into_iter()
                .map(|(code, name)| Destination {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect();
        };
        match transport.get("/v1/banks").await {
            Ok(body) => body["banks"]
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

    async fn provision_account(&self, reference: &str, customer: &Customer) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        let body = json!({
            "external_reference": reference,
            "email": customer.email,
            "name": customer.name,
            "phone": customer.phone,
        });
        match transport.post("/v1/customers", &body).await {
            Ok(response) => match response["customer_id"].as_str() {
                Some(id) => Outcome::Success(Receipt {
                    external_ref: id.to_string(),
                    status: NormalizedStatus::Completed,
                    raw: response.clone(),
                }),
                None => CallFailure::Unavailable("missing customer_id".to_string()).into(),
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
        let reference = payload["external_reference"].as_str().ok_or_else(|| {
            PaymentError::MalformedPayload("missing external_reference".to_string())
        })?;
        let status = payload["status"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing status".to_string()))?;
        Ok(WebhookEvent {
            reference: reference.to_string(),
            provider_ref: payload["reference"].as_str().map(str::to_string),
            status: normalize_status(status),
        })
    }
}

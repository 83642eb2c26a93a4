//! Mobile-money operator aggregator (CFA franc).
//!
//! Collections debit the payer's handset and withdrawals credit it, so both
//! need a normalized phone number. Payouts are PIN-gated. Webhooks are signed
//! with a base64 HMAC-SHA256. The aggregator has no notion of a customer
//! account, so provisioning is not supported.

use super::http::{self, Transport};
use super::{
    Counterpart, Destination, NormalizedStatus, Outcome, PaymentAdapter, PaymentRequest,
    PayoutAuthorization, PayoutRequest, Provider, Receipt, WebhookEvent, pin_missing,
};
use crate::config::{Credentials, ProviderConfig};
use crate::domain::phone::CAMEROON;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::debug;
use zeroize::Zeroizing;

const PROVIDER: Provider = Provider::MobileMoney;

pub struct MobileMoneyAdapter {
    transport: Option<Transport>,
    webhook_secret: Option<Zeroizing<String>>,
    minimum_amount: Decimal,
}

impl MobileMoneyAdapter {
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

    async fn transfer(
        &self,
        transport: &Transport,
        path: &str,
        reference: &str,
        amount: Decimal,
        phone: &str,
        direction: &str,
    ) -> Outcome {
        let msisdn = match CAMEROON.to_international(phone) {
            Ok(msisdn) => msisdn,
            Err(e) => {
                return Outcome::Rejected {
                    reason: e.to_string(),
                    raw: Value::Null,
                };
            }
        };
        let body = json!({
            "amount": amount.to_string(),
            "currency": "XAF",
            direction: msisdn,
            "external_reference": reference,
        });
        match transport.post(path, &body).await {
            Ok(response) => receipt(response, reference),
            Err(failure) => failure.into(),
        }
    }

    async fn lookup(&self, reference: &str) -> Outcome {
        let Some(transport) = &self.transport else {
            return Outcome::simulated(reference, PROVIDER);
        };
        match transport.get(&format!("/transaction/{reference}")).await {
            Ok(response) => receipt(response, reference),
            Err(failure) => failure.into(),
        }
    }
}

pub fn normalize_status(status: &str) -> NormalizedStatus {
    match status.to_ascii_lowercase().as_str() {
        "approved" | "successful" => NormalizedStatus::Completed,
        "declined" | "canceled" | "cancelled" | "failed" => NormalizedStatus::Failed,
        _ => NormalizedStatus::Pending,
    }
}

fn receipt(body: Value, fallback_ref: &str) -> Outcome {
    let Some(status) = body["status"].as_str() else {
        return Outcome::Unavailable {
            reason: "response carried no status".to_string(),
        };
    };
    let status = normalize_status(status);
    let external_ref = body["transaction_id"]
        .as_str()
        .unwrap_or(fallback_ref)
        .to_string();
    debug!(provider = %PROVIDER, %external_ref, %status, "operator answered");
    Outcome::Success(Receipt {
        external_ref,
        status,
        raw: body,
    })
}

#[async_trait]
impl PaymentAdapter for MobileMoneyAdapter {
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
        let Some(phone) = request.phone.as_deref() else {
            return Outcome::Rejected {
                reason: "mobile money collections need a phone number".to_string(),
                raw: Value::Null,
            };
        };
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        self.transfer(
            transport,
            "/collect",
            &request.reference,
            request.amount.value(),
            phone,
            "from",
        )
        .await
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        self.lookup(reference).await
    }

    async fn create_payout(&self, request: &PayoutRequest, auth: PayoutAuthorization) -> Outcome {
        if !matches!(auth, PayoutAuthorization::Pin(_)) {
            return pin_missing(PROVIDER);
        }
        let Counterpart::Mobile { phone } = &request.counterpart else {
            return Outcome::Rejected {
                reason: "mobile money payouts go to phone numbers only".to_string(),
                raw: Value::Null,
            };
        };
        let Some(transport) = &self.transport else {
            return Outcome::simulated(&request.reference, PROVIDER);
        };
        self.transfer(
            transport,
            "/withdraw",
            &request.reference,
            request.amount.value(),
            phone,
            "to",
        )
        .await
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        self.lookup(reference).await
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        let Some(transport) = &self.transport else {
            return [("MTN", "MTN Mobile Money"), ("ORANGE", "Orange Money")]
                .into_iter()
                .map(|(code, name)| Destination {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect();
        };
        match transport.get("/operators").await {
            Ok(body) => body
                .as_array()
                .map(|ops| {
                    ops.iter()
                        .filter_map(|op| {
                            Some(Destination {
                                code: op["code"].as_str()?.to_string(),
                                name: op["name"].as_str()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool {
        self.webhook_secret.as_ref().is_some_and(|secret| {
            http::verify_sha256_base64(secret.as_bytes(), body, signature)
        })
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
            provider_ref: payload["transaction_id"].as_str().map(str::to_string),
            status: normalize_status(status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pin_gate::PinVerified;
    use crate::domain::money::{Amount, Currency};
    use crate::providers::Customer;
    use base64::prelude::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn adapter() -> MobileMoneyAdapter {
        let mut config = ProviderConfig::defaults(PROVIDER);
        config.webhook_secret = Some(Zeroizing::new("momo".to_string()));
        MobileMoneyAdapter::new(&config)
    }

    #[test]
    fn test_maps_operator_statuses() {
        assert_eq!(normalize_status("approved"), NormalizedStatus::Completed);
        assert_eq!(normalize_status("declined"), NormalizedStatus::Failed);
        assert_eq!(normalize_status("canceled"), NormalizedStatus::Failed);
        assert_eq!(normalize_status("pending"), NormalizedStatus::Pending);
    }

    #[tokio::test]
    async fn test_collection_without_phone_is_rejected() {
        let request = PaymentRequest {
            reference: "mobile_money_deposit_1_abcdefgh".to_string(),
            amount: Amount::new(dec!(1000)).unwrap(),
            currency: Currency::Xaf,
            customer: Customer {
                owner_id: Uuid::new_v4(),
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                phone: None,
            },
            phone: None,
        };
        let outcome = adapter().create_payment(&request).await;
        assert!(matches!(outcome, Outcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_payout_with_pin_is_simulated_without_credentials() {
        let request = PayoutRequest {
            reference: "mobile_money_payout_1_abcdefgh".to_string(),
            amount: Amount::new(dec!(1000)).unwrap(),
            currency: Currency::Xaf,
            counterpart: Counterpart::Mobile {
                phone: "677123456".to_string(),
            },
        };
        let adapter = adapter();
        let refused = adapter
            .create_payout(&request, PayoutAuthorization::NotRequired)
            .await;
        assert!(matches!(refused, Outcome::Rejected { .. }));

        let outcome = adapter
            .create_payout(&request, PayoutAuthorization::Pin(PinVerified::new()))
            .await;
        assert!(outcome.is_simulated());
    }

    #[tokio::test]
    async fn test_does_not_provision_accounts() {
        let customer = Customer {
            owner_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            phone: None,
        };
        let outcome = adapter().provision_account("ref", &customer).await;
        assert!(matches!(outcome, Outcome::Rejected { .. }));
    }

    #[test]
    fn test_webhook_uses_base64_signature() {
        let adapter = adapter();
        let body = br#"{"external_reference":"R2","transaction_id":"MM-7","status":"approved"}"#;
        let sig = BASE64_STANDARD.encode(http::hmac_sha256(b"momo", body));
        assert!(adapter.verify_webhook(&sig, body));
        assert!(!adapter.verify_webhook(&hex::encode(http::hmac_sha256(b"momo", body)), body));
        let event = adapter.parse_webhook(body).unwrap();
        assert_eq!(event.status, NormalizedStatus::Completed);
        assert_eq!(event.provider_ref.as_deref(), Some("MM-7"));
    }
}

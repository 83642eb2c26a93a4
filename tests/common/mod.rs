#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use walletrail::application::activation::Activation;
use walletrail::application::ledger::Ledger;
use walletrail::application::payments::PaymentService;
use walletrail::application::router::PaymentRouter;
use walletrail::application::webhooks::WebhookListener;
use walletrail::domain::money::{Amount, Currency};
use walletrail::domain::transaction::TransactionStatus;
use walletrail::domain::wallet::{Wallet, WalletStatus};
use walletrail::error::{PaymentError, Result};
use walletrail::infrastructure::in_memory;
use walletrail::providers::http::{hmac_sha256, verify_sha256_hex};
use walletrail::providers::{
    Customer, Destination, Outcome, PaymentAdapter, PaymentRequest, PayoutAuthorization,
    PayoutRequest, Provider, Receipt, WebhookEvent,
};

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Adapter calls the fake saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePayment(String),
    VerifyPayment(String),
    CreatePayout { reference: String, pin_verified: bool },
    VerifyPayout(String),
    Provision(String),
}

/// Records every call and answers from a script.
///
/// Create calls answer `Success` with status `pending` and external ref
/// `ext_<reference>`. Payouts and provisioning pop scripted outcomes first;
/// provisioning falls back to `Success`. Webhooks are HMAC-SHA256 hex over the body with
/// [`WEBHOOK_SECRET`], carrying `{"reference", "status"}`.
pub struct FakeAdapter {
    provider: Provider,
    minimum: Decimal,
    pin_gated: bool,
    calls: Mutex<Vec<Call>>,
    provisioning: Mutex<VecDeque<Outcome>>,
    payouts: Mutex<VecDeque<Outcome>>,
}

impl FakeAdapter {
    pub fn new(provider: Provider, minimum: Decimal) -> Self {
        Self {
            provider,
            minimum,
            pin_gated: matches!(provider, Provider::XafGateway | Provider::MobileMoney),
            calls: Mutex::new(Vec::new()),
            provisioning: Mutex::new(VecDeque::new()),
            payouts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn script_provisioning(&self, outcome: Outcome) {
        self.provisioning.lock().unwrap().push_back(outcome);
    }

    pub fn script_payout(&self, outcome: Outcome) {
        self.payouts.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn pending(reference: &str) -> Outcome {
    Outcome::Success(Receipt {
        external_ref: format!("ext_{reference}"),
        status: TransactionStatus::Pending,
        raw: serde_json::Value::Null,
    })
}

#[async_trait]
impl PaymentAdapter for FakeAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn minimum_amount(&self) -> Decimal {
        self.minimum
    }

    fn requires_payout_pin(&self) -> bool {
        self.pin_gated
    }

    fn is_simulated(&self) -> bool {
        false
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Outcome {
        self.record(Call::CreatePayment(request.reference.clone()));
        pending(&request.reference)
    }

    async fn verify_payment(&self, reference: &str) -> Outcome {
        self.record(Call::VerifyPayment(reference.to_string()));
        pending(reference)
    }

    async fn create_payout(&self, request: &PayoutRequest, auth: PayoutAuthorization) -> Outcome {
        self.record(Call::CreatePayout {
            reference: request.reference.clone(),
            pin_verified: matches!(auth, PayoutAuthorization::Pin(_)),
        });
        let scripted = self.payouts.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| pending(&request.reference))
    }

    async fn verify_payout(&self, reference: &str) -> Outcome {
        self.record(Call::VerifyPayout(reference.to_string()));
        pending(reference)
    }

    async fn list_destinations(&self) -> Vec<Destination> {
        Vec::new()
    }

    async fn provision_account(&self, reference: &str, _customer: &Customer) -> Outcome {
        self.record(Call::Provision(reference.to_string()));
        tokio::task::yield_now().await;
        let scripted = self.provisioning.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Outcome::Success(Receipt {
                external_ref: format!("acct_{reference}"),
                status: TransactionStatus::Completed,
                raw: serde_json::Value::Null,
            })
        })
    }

    fn verify_webhook(&self, signature: &str, body: &[u8]) -> bool {
        verify_sha256_hex(WEBHOOK_SECRET.as_bytes(), body, signature)
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        let reference = payload["reference"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedPayload("missing reference".into()))?;
        let status = match payload["status"].as_str() {
            Some("completed") => TransactionStatus::Completed,
            Some("failed") => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };
        Ok(WebhookEvent {
            reference: reference.to_string(),
            provider_ref: payload["id"].as_str().map(str::to_string),
            status,
        })
    }
}

/// The whole application wired over in-memory stores and fake adapters.
pub struct Harness {
    pub ledger: Arc<Ledger>,
    pub activation: Arc<Activation>,
    pub service: PaymentService,
    pub webhooks: WebhookListener,
    pub adapters: BTreeMap<Provider, Arc<FakeAdapter>>,
}

impl Harness {
    /// One fake per provider, each with the given minimum amount.
    pub fn new(minimums: &[(Provider, Decimal)]) -> Self {
        let adapters: BTreeMap<Provider, Arc<FakeAdapter>> = Provider::ALL
            .into_iter()
            .map(|p| {
                let minimum = minimums
                    .iter()
                    .find(|(q, _)| *q == p)
                    .map(|(_, m)| *m)
                    .unwrap_or(Decimal::ONE);
                (p, Arc::new(FakeAdapter::new(p, minimum)))
            })
            .collect();
        let router = Arc::new(PaymentRouter::new(
            adapters
                .values()
                .map(|a| a.clone() as Arc<dyn PaymentAdapter>)
                .collect(),
        ));
        let ledger = Arc::new(Ledger::new(Arc::new(in_memory::stores())));
        let activation = Arc::new(Activation::new(ledger.clone(), router.clone()));
        Self {
            service: PaymentService::new(ledger.clone(), router.clone(), activation.clone()),
            webhooks: WebhookListener::new(ledger.clone(), router),
            ledger,
            activation,
            adapters,
        }
    }

    pub fn adapter(&self, provider: Provider) -> &FakeAdapter {
        &self.adapters[&provider]
    }

    /// Opens a wallet and forces it active, bypassing KYC.
    pub async fn active_wallet(&self, currency: Currency) -> Wallet {
        let wallet = self
            .ledger
            .open_wallet(Uuid::new_v4(), currency)
            .await
            .unwrap();
        self.ledger
            .update_wallet(wallet.id, |w| {
                w.status = WalletStatus::Active;
                Ok(())
            })
            .await
            .unwrap()
    }

    pub async fn fund(&self, wallet: &Wallet, amount: Decimal) -> Wallet {
        let amount = Amount::new(amount).unwrap();
        self.ledger
            .update_wallet(wallet.id, |w| {
                w.credit(amount);
                Ok(())
            })
            .await
            .unwrap()
    }
}

pub fn customer(owner_id: Uuid) -> Customer {
    Customer {
        owner_id,
        email: "payer@example.com".to_string(),
        name: "Test Payer".to_string(),
        phone: None,
    }
}

/// A signed webhook body for the fake adapters.
pub fn webhook(reference: &str, status: &str) -> (String, Vec<u8>) {
    let body = serde_json::json!({ "reference": reference, "status": status, "id": "evt_1" })
        .to_string()
        .into_bytes();
    (hex::encode(hmac_sha256(WEBHOOK_SECRET.as_bytes(), &body)), body)
}

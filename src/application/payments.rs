//! Client-facing operations.
//!
//! Each call validates synchronously (errors are returned as
//! [`PaymentError`]s for the presentation layer to render) and otherwise
//! answers with a [`ClientResponse`] describing where the request stands.

use super::activation::Activation;
use super::ledger::{Ledger, SettleSource};
use super::pin_gate::PinGate;
use super::poller::{self, StatusPoller};
use super::router::{Operation, PaymentRouter};
use crate::domain::money::Currency;
use crate::domain::transaction::{Transaction, TransactionStatus, new_reference};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use crate::providers::{
    Counterpart, Customer, Outcome, PaymentRequest, PayoutAuthorization, PayoutRequest,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientResponse {
    pub success: bool,
    pub status: String,
    pub reference: Option<String>,
    pub message: String,
}

impl ClientResponse {
    fn from_transaction(tx: &Transaction, outcome: Option<&Outcome>) -> Self {
        let message = match (outcome, tx.provider, tx.failure_reason.as_deref()) {
            (Some(Outcome::Rejected { reason, .. }), Some(provider), _) => {
                PaymentError::ProviderRejected(provider, reason.clone()).to_string()
            }
            (Some(Outcome::Unavailable { reason }), Some(provider), _) => format!(
                "{}; status will be checked again",
                PaymentError::ProviderUnavailable(provider, reason.clone())
            ),
            (_, _, Some(reason)) => reason.to_string(),
            (Some(Outcome::Simulated(_)), _, _) => {
                "simulated: no real network call was made".to_string()
            }
            _ if tx.simulated => "simulated: awaiting manual reconciliation".to_string(),
            _ => format!("transaction {}", tx.status),
        };
        Self {
            success: tx.status != TransactionStatus::Failed,
            status: tx.status.to_string(),
            reference: Some(tx.reference.clone()),
            message,
        }
    }
}

pub struct DepositRequest {
    pub owner_id: Uuid,
    pub currency: Currency,
    pub operation: Operation,
    pub amount: Decimal,
    pub customer: Customer,
    /// Payer handset, for mobile collections.
    pub phone: Option<String>,
}

pub struct TransferRequest {
    pub owner_id: Uuid,
    pub currency: Currency,
    pub operation: Operation,
    pub amount: Decimal,
    pub counterpart: Counterpart,
    pub pin: Option<Zeroizing<String>>,
}

pub struct PaymentService {
    ledger: Arc<Ledger>,
    router: Arc<PaymentRouter>,
    pins: PinGate,
    activation: Arc<Activation>,
    poller: Option<Arc<StatusPoller>>,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<Ledger>,
        router: Arc<PaymentRouter>,
        activation: Arc<Activation>,
    ) -> Self {
        Self {
            pins: PinGate::new(ledger.stores_handle()),
            ledger,
            router,
            activation,
            poller: None,
        }
    }

    /// Live (non-simulated) pending transactions get a background poller.
    pub fn with_poller(mut self, poller: Arc<StatusPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn pins(&self) -> &PinGate {
        &self.pins
    }

    pub async fn open_wallet(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
        self.ledger.open_wallet(owner_id, currency).await
    }

    async fn sending_wallet(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
        let wallet = self
            .ledger
            .stores()
            .wallets
            .find(owner_id, currency)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(format!("{owner_id}/{currency}")))?;
        wallet.ensure_can_send()?;
        Ok(wallet)
    }

    pub async fn initiate_deposit(&self, request: DepositRequest) -> Result<ClientResponse> {
        let wallet = self.sending_wallet(request.owner_id, request.currency).await?;
        let prepared = self.router.prepare_deposit(
            request.currency,
            request.operation,
            request.amount,
            request.phone.as_deref(),
        )?;
        let provider = prepared.adapter.provider();
        let reference = new_reference(provider.slug(), request.operation.reference_tag());
        self.ledger
            .record_deposit(&wallet, prepared.amount, reference.clone(), provider)
            .await?;
        info!(%reference, %provider, amount = %prepared.amount, "deposit initiated");

        let outcome = prepared
            .adapter
            .create_payment(&PaymentRequest {
                reference: reference.clone(),
                amount: prepared.amount,
                currency: request.currency,
                customer: request.customer,
                phone: prepared.phone,
            })
            .await;
        let tx = self.ledger.record_response(&reference, &outcome).await?;
        self.watch_if_live(&tx);
        Ok(ClientResponse::from_transaction(&tx, Some(&outcome)))
    }

    pub async fn verify_deposit(&self, reference: &str) -> Result<ClientResponse> {
        let tx =
            poller::refresh(&self.ledger, &self.router, reference, SettleSource::Verify).await?;
        Ok(ClientResponse::from_transaction(&tx, None))
    }

    /// Sends money out. On PIN-gated rails the PIN is verified before the
    /// request is validated or any reference is generated.
    pub async fn initiate_transfer(&self, request: TransferRequest) -> Result<ClientResponse> {
        let wallet = self.sending_wallet(request.owner_id, request.currency).await?;
        let adapter = self.router.route(request.currency, request.operation)?;
        let auth = if adapter.requires_payout_pin() {
            let candidate = request.pin.as_deref().map(String::as_str).unwrap_or_default();
            PayoutAuthorization::Pin(self.pins.verify_pin(request.owner_id, candidate).await?)
        } else {
            PayoutAuthorization::NotRequired
        };

        let prepared = self.router.prepare_payout(
            request.currency,
            request.operation,
            request.amount,
            &request.counterpart,
        )?;
        let provider = prepared.adapter.provider();
        let reference = new_reference(provider.slug(), request.operation.reference_tag());
        self.ledger
            .reserve_payout(wallet.id, prepared.amount, reference.clone(), provider)
            .await?;
        info!(%reference, %provider, amount = %prepared.amount, "payout initiated");

        let outcome = prepared
            .adapter
            .create_payout(
                &PayoutRequest {
                    reference: reference.clone(),
                    amount: prepared.amount,
                    currency: request.currency,
                    counterpart: prepared.counterpart,
                },
                auth,
            )
            .await;
        let tx = self.ledger.record_response(&reference, &outcome).await?;
        self.watch_if_live(&tx);
        Ok(ClientResponse::from_transaction(&tx, Some(&outcome)))
    }

    pub async fn verify_transfer(&self, reference: &str) -> Result<ClientResponse> {
        self.verify_deposit(reference).await
    }

    pub async fn submit_kyc(
        &self,
        owner_id: Uuid,
        currency: Currency,
        fields: BTreeMap<String, String>,
    ) -> Result<ClientResponse> {
        let request = self.activation.submit_kyc(owner_id, currency, fields).await?;
        Ok(ClientResponse {
            success: true,
            status: request.status.to_string(),
            reference: Some(request.id.to_string()),
            message: "KYC submitted for review".to_string(),
        })
    }

    pub async fn check_kyc_status(
        &self,
        owner_id: Uuid,
        currency: Currency,
    ) -> Result<ClientResponse> {
        let request = self.activation.check_kyc_status(owner_id, currency).await?;
        let message = match request.rejection_reason.as_deref() {
            Some(reason) => format!("KYC rejected: {reason}"),
            None => format!("KYC {}", request.status),
        };
        Ok(ClientResponse {
            success: true,
            status: request.status.to_string(),
            reference: Some(request.id.to_string()),
            message,
        })
    }

    pub async fn get_wallet_status(
        &self,
        owner_id: Uuid,
        currency: Currency,
    ) -> Result<ClientResponse> {
        let wallet = self.activation.get_wallet_status(owner_id, currency).await?;
        Ok(ClientResponse {
            success: true,
            status: wallet.status.to_string(),
            reference: wallet.provider_account_ref.clone(),
            message: format!(
                "balance {} {currency}, available {}",
                wallet.balance, wallet.available_balance
            ),
        })
    }

    fn watch_if_live(&self, tx: &Transaction) {
        if let Some(poller) = &self.poller
            && !tx.status.is_terminal()
            && !tx.simulated
        {
            poller.watch(&tx.reference);
        }
    }
}

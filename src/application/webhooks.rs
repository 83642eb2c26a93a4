//! Signed status notifications pushed by providers.

use super::ledger::{Ledger, SettleSource, Settlement};
use super::router::PaymentRouter;
use crate::error::{PaymentError, Result};
use crate::providers::Provider;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct WebhookListener {
    ledger: Arc<Ledger>,
    router: Arc<PaymentRouter>,
}

impl WebhookListener {
    pub fn new(ledger: Arc<Ledger>, router: Arc<PaymentRouter>) -> Self {
        Self { ledger, router }
    }

    /// Authenticates and applies one delivery.
    ///
    /// The signature is checked against the raw bytes before anything in
    /// the body is looked at. Redeliveries of an already applied event come
    /// back as [`Settlement::Duplicate`] and change nothing.
    ///
    /// # Errors
    ///
    /// * `InvalidSignature` when the header is absent or does not verify.
    /// * `MalformedPayload` when the body does not parse.
    /// * `UnknownReference` when no transaction with that reference was
    ///   initiated through `provider`.
    pub async fn handle(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Settlement> {
        let adapter = self
            .router
            .adapter(provider)
            .ok_or_else(|| PaymentError::Config(format!("no adapter registered for {provider}")))?;
        let Some(signature) = signature else {
            warn!(%provider, "webhook without signature");
            return Err(PaymentError::InvalidSignature);
        };
        if !adapter.verify_webhook(signature, body) {
            warn!(%provider, "webhook signature rejected");
            return Err(PaymentError::InvalidSignature);
        }

        let event = adapter.parse_webhook(body)?;
        let tx = self.ledger.transaction(&event.reference).await?;
        if tx.provider != Some(provider) {
            warn!(
                reference = %event.reference,
                %provider,
                "webhook from a provider that does not own the reference"
            );
            return Err(PaymentError::UnknownReference(event.reference));
        }

        let settlement = self
            .ledger
            .settle(
                &event.reference,
                event.status,
                event.provider_ref,
                SettleSource::Webhook,
            )
            .await?;
        match &settlement {
            Settlement::Applied(tx) => {
                info!(reference = %tx.reference, %provider, status = %tx.status, "webhook applied");
            }
            Settlement::UnknownReference => {
                return Err(PaymentError::UnknownReference(event.reference));
            }
            other => {
                debug!(
                    reference = %event.reference,
                    outcome = other.label(),
                    "webhook acknowledged"
                );
            }
        }
        Ok(settlement)
    }
}

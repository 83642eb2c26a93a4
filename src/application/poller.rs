//! Bounded background verification of pending transactions.
//!
//! One task per reference asks the provider for the status every
//! `interval` until the transaction is terminal or `timeout` elapses. A
//! poll that times out leaves the transaction pending for manual
//! reconciliation; it is never failed on the provider's behalf.

use super::ledger::{Ledger, SettleSource};
use super::router::PaymentRouter;
use crate::config::PollConfig;
use crate::domain::transaction::Transaction;
use crate::error::{PaymentError, Result};
use crate::providers::Outcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Asks the transaction's provider for its status once and settles on a
/// definitive answer.
pub async fn refresh(
    ledger: &Ledger,
    router: &PaymentRouter,
    reference: &str,
    source: SettleSource,
) -> Result<Transaction> {
    let tx = ledger.transaction(reference).await?;
    if tx.status.is_terminal() {
        return Ok(tx);
    }
    let Some(provider) = tx.provider else {
        return Ok(tx);
    };
    let adapter = router
        .adapter(provider)
        .ok_or_else(|| PaymentError::Config(format!("no adapter registered for {provider}")))?;

    let outcome = if tx.r#type.is_payout() {
        adapter.verify_payout(reference).await
    } else {
        adapter.verify_payment(reference).await
    };
    match outcome {
        Outcome::Success(receipt) => {
            ledger
                .settle(reference, receipt.status, Some(receipt.external_ref), source)
                .await?;
        }
        Outcome::Rejected { reason, .. } => {
            // A lookup the provider refuses says nothing about the payment.
            warn!(%reference, %provider, %reason, "status lookup rejected");
        }
        Outcome::Unavailable { reason } => {
            debug!(%reference, %provider, %reason, "status lookup unavailable");
        }
        Outcome::Simulated(_) => {}
    }
    ledger.transaction(reference).await
}

struct Watch {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    ledger: Arc<Ledger>,
    router: Arc<PaymentRouter>,
    config: PollConfig,
    tasks: Mutex<HashMap<String, Watch>>,
    next_id: AtomicU64,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Watch>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, reference: &str) {
        let polling = async {
            loop {
                tokio::time::sleep(self.config.interval).await;
                match refresh(&self.ledger, &self.router, reference, SettleSource::Poll).await {
                    Ok(tx) if tx.status.is_terminal() => {
                        info!(%reference, status = %tx.status, "poll reached a final status");
                        return;
                    }
                    Ok(_) => {}
                    Err(PaymentError::UnknownReference(_)) => {
                        warn!(%reference, "stopped polling an unknown reference");
                        return;
                    }
                    Err(e) => warn!(%reference, error = %e, "poll attempt failed"),
                }
            }
        };
        if tokio::time::timeout(self.config.timeout, polling)
            .await
            .is_err()
        {
            info!(%reference, "polling timed out, transaction left pending");
        }
    }

    fn finish(&self, reference: &str, id: u64) {
        let mut tasks = self.tasks();
        if tasks.get(reference).is_some_and(|w| w.id == id) {
            tasks.remove(reference);
        }
    }
}

/// Registry of polling tasks keyed by reference.
pub struct StatusPoller {
    inner: Arc<Inner>,
}

impl StatusPoller {
    pub fn new(ledger: Arc<Ledger>, router: Arc<PaymentRouter>, config: PollConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                router,
                config,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Starts polling `reference`. Returns `false` if it is already watched.
    pub fn watch(&self, reference: &str) -> bool {
        let mut tasks = self.inner.tasks();
        if tasks.contains_key(reference) {
            return false;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let owned = reference.to_string();
        let handle = tokio::spawn(async move {
            inner.run(&owned).await;
            inner.finish(&owned, id);
        });
        tasks.insert(reference.to_string(), Watch { id, handle });
        debug!(%reference, "polling started");
        true
    }

    /// Stops polling `reference`. Returns `false` if it was not watched.
    pub fn cancel(&self, reference: &str) -> bool {
        match self.inner.tasks().remove(reference) {
            Some(watch) => {
                watch.handle.abort();
                debug!(%reference, "polling cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, reference: &str) -> bool {
        self.inner.tasks().contains_key(reference)
    }

    pub fn active(&self) -> usize {
        self.inner.tasks().len()
    }

    /// Cancels every task.
    pub fn shutdown(&self) {
        for (_, watch) in self.inner.tasks().drain() {
            watch.handle.abort();
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Reference discipline and the single write path for wallet rows.
//!
//! Every balance or status change goes through [`Ledger::update_wallet`] (or
//! its lock-held twin for callers that already hold the wallet lock), which
//! serializes writers per wallet with an in-process async mutex and retries
//! the store's compare-and-set a bounded number of times.
//!
//! Settlement claims the transaction first (`pending -> terminal` as a
//! versioned update) and only the caller that wins the claim touches the
//! wallet, so replayed or concurrent confirmations change balances at most
//! once. A claim whose wallet write fails is reopened so a later report can
//! settle it.

use crate::domain::money::{Amount, Currency};
use crate::domain::ports::Stores;
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use crate::providers::{Outcome, Provider};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Versioned writes are retried this many times before giving up.
pub const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Who is reporting a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleSource {
    Webhook,
    Poll,
    Verify,
    Operator,
    ProviderResponse,
}

impl SettleSource {
    /// Sources allowed to settle a transaction whose only provider answer
    /// so far was simulated.
    fn settles_simulated(self) -> bool {
        matches!(self, Self::Webhook | Self::Operator)
    }
}

impl fmt::Display for SettleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::Poll => "poll",
            Self::Verify => "verify",
            Self::Operator => "operator",
            Self::ProviderResponse => "provider_response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// This call moved the transaction to a terminal state.
    Applied(Transaction),
    /// Already terminal; nothing changed.
    Duplicate(Transaction),
    /// The reported status was pending, or the source may not settle it.
    StillPending(Transaction),
    UnknownReference,
}

impl Settlement {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Duplicate(_) => "duplicate",
            Self::StillPending(_) => "pending",
            Self::UnknownReference => "unknown_reference",
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Self::Applied(tx) | Self::Duplicate(tx) | Self::StillPending(tx) => Some(tx),
            Self::UnknownReference => None,
        }
    }
}

/// One async mutex per wallet id, created on first use.
#[derive(Default)]
struct WalletLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl WalletLocks {
    fn handle(&self, wallet_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(wallet_id).or_default().clone()
    }

    async fn lock(&self, wallet_id: Uuid) -> OwnedMutexGuard<()> {
        self.handle(wallet_id).lock_owned().await
    }
}

pub(crate) struct PairGuard {
    _first: OwnedMutexGuard<()>,
    _second: Option<OwnedMutexGuard<()>>,
}

enum Claim {
    Won(Transaction),
    Lost(Transaction),
}

pub struct Ledger {
    stores: Arc<Stores>,
    locks: WalletLocks,
}

impl Ledger {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self {
            stores,
            locks: WalletLocks::default(),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn stores_handle(&self) -> Arc<Stores> {
        self.stores.clone()
    }

    /// Creates the owner's `inactive` wallet for `currency`.
    pub async fn open_wallet(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
        let wallet = self.stores.wallets.insert(Wallet::new(owner_id, currency)).await?;
        info!(wallet_id = %wallet.id, %owner_id, %currency, "wallet opened");
        Ok(wallet)
    }

    pub async fn wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.stores
            .wallets
            .get(wallet_id)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(wallet_id.to_string()))
    }

    pub async fn transaction(&self, reference: &str) -> Result<Transaction> {
        self.stores
            .transactions
            .get(reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))
    }

    /// Transactions still waiting on a provider, for manual reconciliation.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Transaction>> {
        self.stores.transactions.pending(limit).await
    }

    /// Applies `change` to the wallet under its lock.
    pub async fn update_wallet<F>(&self, wallet_id: Uuid, change: F) -> Result<Wallet>
    where
        F: FnMut(&mut Wallet) -> Result<()> + Send,
    {
        let _guard = self.locks.lock(wallet_id).await;
        self.apply(wallet_id, change).await
    }

    /// The versioned read-modify-write loop. Callers hold the wallet lock.
    pub(crate) async fn apply<F>(&self, wallet_id: Uuid, mut change: F) -> Result<Wallet>
    where
        F: FnMut(&mut Wallet) -> Result<()> + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut wallet = self.wallet(wallet_id).await?;
            change(&mut wallet)?;
            wallet.updated_at = Utc::now();
            match self.stores.wallets.update(wallet).await {
                Ok(updated) => return Ok(updated),
                Err(PaymentError::VersionConflict(_)) => {
                    debug!(%wallet_id, attempt, "wallet version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(PaymentError::VersionConflict(format!(
            "wallet {wallet_id} still contended after {MAX_UPDATE_ATTEMPTS} attempts"
        )))
    }

    /// Holds the wallet's lock. Writes made while it is held go through
    /// [`Ledger::apply`].
    pub(crate) async fn lock_wallet(&self, wallet_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(wallet_id).await
    }

    /// Locks two wallets in id order.
    pub(crate) async fn lock_pair(&self, a: Uuid, b: Uuid) -> PairGuard {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first_guard = self.locks.lock(first).await;
        let second_guard = if first == second {
            None
        } else {
            Some(self.locks.lock(second).await)
        };
        PairGuard {
            _first: first_guard,
            _second: second_guard,
        }
    }

    /// Persists a `pending` deposit before the provider is called.
    pub async fn record_deposit(
        &self,
        wallet: &Wallet,
        amount: Amount,
        reference: String,
        provider: Provider,
    ) -> Result<Transaction> {
        let tx = Transaction::pending(
            wallet,
            TransactionType::Deposit,
            amount,
            reference,
            Some(provider),
        );
        self.stores.transactions.insert(tx).await
    }

    /// Reserves `amount` and persists a `pending` payout.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` when the available balance is short; nothing is
    /// recorded in that case.
    pub async fn reserve_payout(
        &self,
        wallet_id: Uuid,
        amount: Amount,
        reference: String,
        provider: Provider,
    ) -> Result<Transaction> {
        let _guard = self.locks.lock(wallet_id).await;
        let wallet = self
            .apply(wallet_id, |w| {
                w.ensure_can_send()?;
                w.reserve(amount)
            })
            .await?;
        let tx = Transaction::pending(
            &wallet,
            TransactionType::Transfer,
            amount,
            reference,
            Some(provider),
        );
        match self.stores.transactions.insert(tx).await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                self.apply(wallet_id, |w| w.release(amount)).await?;
                Err(e)
            }
        }
    }

    /// Folds the provider's answer to a create call into the transaction.
    pub async fn record_response(&self, reference: &str, outcome: &Outcome) -> Result<Transaction> {
        match outcome {
            Outcome::Success(receipt) if receipt.status.is_terminal() => {
                self.settle(
                    reference,
                    receipt.status,
                    Some(receipt.external_ref.clone()),
                    SettleSource::ProviderResponse,
                )
                .await?;
            }
            Outcome::Success(receipt) => {
                let external_ref = receipt.external_ref.clone();
                self.annotate(reference, |tx| tx.provider_ref = Some(external_ref.clone()))
                    .await?;
            }
            Outcome::Simulated(receipt) => {
                let external_ref = receipt.external_ref.clone();
                self.annotate(reference, |tx| {
                    tx.simulated = true;
                    tx.provider_ref = Some(external_ref.clone());
                })
                .await?;
            }
            Outcome::Rejected { reason, .. } => {
                self.settle_inner(
                    reference,
                    TransactionStatus::Failed,
                    None,
                    SettleSource::ProviderResponse,
                    Some(reason.clone()),
                )
                .await?;
            }
            Outcome::Unavailable { reason } => {
                warn!(%reference, %reason, "provider unavailable, transaction left pending");
            }
        }
        self.transaction(reference).await
    }

    /// Applies a reported status to the transaction named by `reference`.
    pub async fn settle(
        &self,
        reference: &str,
        status: TransactionStatus,
        provider_ref: Option<String>,
        source: SettleSource,
    ) -> Result<Settlement> {
        self.settle_inner(reference, status, provider_ref, source, None)
            .await
    }

    /// Manual resolution of a transaction left pending, optionally naming the
    /// provider's own reference from a settlement report.
    pub async fn operator_resolve(
        &self,
        reference: &str,
        status: TransactionStatus,
        provider_ref: Option<String>,
    ) -> Result<Settlement> {
        if !status.is_terminal() {
            return Err(PaymentError::InvalidTransition(
                "operators resolve to completed or failed".to_string(),
            ));
        }
        self.settle(reference, status, provider_ref, SettleSource::Operator)
            .await
    }

    async fn settle_inner(
        &self,
        reference: &str,
        status: TransactionStatus,
        provider_ref: Option<String>,
        source: SettleSource,
        failure_reason: Option<String>,
    ) -> Result<Settlement> {
        let Some(tx) = self.stores.transactions.get(reference).await? else {
            warn!(%reference, %source, "settlement for unknown reference");
            return Ok(Settlement::UnknownReference);
        };
        if tx.status.is_terminal() {
            debug!(%reference, %source, "transaction already settled");
            return Ok(Settlement::Duplicate(tx));
        }
        if !status.is_terminal() || (tx.simulated && !source.settles_simulated()) {
            return Ok(Settlement::StillPending(tx));
        }

        let _guard = self.locks.lock(tx.wallet_id).await;
        let claimed = match self
            .claim(reference, status, provider_ref, failure_reason)
            .await?
        {
            Claim::Won(tx) => tx,
            Claim::Lost(tx) => return Ok(Settlement::Duplicate(tx)),
        };

        let amount = claimed.amount;
        let effect = match (claimed.r#type, status) {
            (TransactionType::Deposit, TransactionStatus::Completed) => {
                Some(
                    self.apply(claimed.wallet_id, |w| {
                        w.credit(amount);
                        Ok(())
                    })
                    .await,
                )
            }
            (kind, TransactionStatus::Completed) if kind.is_payout() => {
                Some(self.apply(claimed.wallet_id, |w| w.settle_reserved(amount)).await)
            }
            (kind, TransactionStatus::Failed) if kind.is_payout() => {
                Some(self.apply(claimed.wallet_id, |w| w.release(amount)).await)
            }
            _ => None,
        };
        if let Some(Err(e)) = effect {
            error!(%reference, error = %e, "wallet update failed, reopening transaction");
            if let Err(revert) = self.unclaim(claimed).await {
                error!(
                    %reference,
                    error = %revert,
                    "transaction left terminal without its wallet effect"
                );
            }
            return Err(e);
        }

        info!(%reference, %status, %source, "transaction settled");
        Ok(Settlement::Applied(claimed))
    }

    /// Flips the transaction to `status` unless someone else already did.
    async fn claim(
        &self,
        reference: &str,
        status: TransactionStatus,
        provider_ref: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<Claim> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut tx = self.transaction(reference).await?;
            if tx.status.is_terminal() {
                return Ok(Claim::Lost(tx));
            }
            tx.status = status;
            tx.completed_at = Some(Utc::now());
            if provider_ref.is_some() {
                tx.provider_ref.clone_from(&provider_ref);
                tx.simulated = false;
            }
            if status == TransactionStatus::Failed {
                tx.failure_reason.clone_from(&failure_reason);
            }
            match self.stores.transactions.update(tx).await {
                Ok(tx) => return Ok(Claim::Won(tx)),
                Err(PaymentError::VersionConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PaymentError::VersionConflict(format!(
            "transaction {reference} still contended after {MAX_UPDATE_ATTEMPTS} attempts"
        )))
    }

    /// Undoes a won claim so the next report settles the transaction again.
    async fn unclaim(&self, mut tx: Transaction) -> Result<Transaction> {
        tx.status = TransactionStatus::Pending;
        tx.completed_at = None;
        tx.failure_reason = None;
        self.stores.transactions.update(tx).await
    }

    /// Records provider metadata on a transaction that is still pending.
    async fn annotate<F>(&self, reference: &str, mut change: F) -> Result<()>
    where
        F: FnMut(&mut Transaction) + Send,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let mut tx = self.transaction(reference).await?;
            if tx.status.is_terminal() {
                return Ok(());
            }
            change(&mut tx);
            match self.stores.transactions.update(tx).await {
                Ok(_) => return Ok(()),
                Err(PaymentError::VersionConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(PaymentError::VersionConflict(format!(
            "transaction {reference} still contended after {MAX_UPDATE_ATTEMPTS} attempts"
        )))
    }
}

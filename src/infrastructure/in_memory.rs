use crate::domain::kyc::{KycRequest, ProviderAccount};
use crate::domain::money::Currency;
use crate::domain::pin::TransactionPin;
use crate::domain::ports::{
    KycStore, PinStore, ProviderAccountStore, QuoteStore, Stores, TransactionStore, WalletStore,
};
use crate::domain::quote::ExchangeQuote;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use crate::providers::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Every store backed by process memory. Nothing survives a restart.
pub fn stores() -> Stores {
    Stores {
        wallets: Box::new(InMemoryWalletStore::new()),
        transactions: Box::new(InMemoryTransactionStore::new()),
        kyc: Box::new(InMemoryKycStore::new()),
        provider_accounts: Box::new(InMemoryProviderAccountStore::new()),
        pins: Box::new(InMemoryPinStore::new()),
        quotes: Box::new(InMemoryQuoteStore::new()),
    }
}

/// Compare-and-set on a versioned row: `stored` must still be at `expected`.
fn check_version(kind: &str, key: &str, stored: Option<u64>, expected: u64) -> Result<()> {
    match stored {
        Some(v) if v == expected => Ok(()),
        Some(v) => Err(PaymentError::VersionConflict(format!(
            "{kind} {key} is at version {v}, write expected {expected}"
        ))),
        None => Err(PaymentError::Storage(format!("{kind} {key} does not exist"))),
    }
}

/// Wallets keyed by id.
///
/// Uses `Arc<RwLock<HashMap<Uuid, Wallet>>>`; the owner/currency uniqueness
/// check and the insert happen under one write lock.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<Uuid, Wallet>>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn insert(&self, wallet: Wallet) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        if wallets
            .values()
            .any(|w| w.owner_id == wallet.owner_id && w.currency == wallet.currency)
        {
            return Err(PaymentError::WalletExists {
                owner_id: wallet.owner_id,
                currency: wallet.currency,
            });
        }
        wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.wallets.read().await.get(&id).cloned())
    }

    async fn find(&self, owner_id: Uuid, currency: Currency) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets
            .values()
            .find(|w| w.owner_id == owner_id && w.currency == currency)
            .cloned())
    }

    async fn update(&self, mut wallet: Wallet) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let stored = wallets.get(&wallet.id).map(|w| w.version);
        check_version("wallet", &wallet.id.to_string(), stored, wallet.version)?;
        wallet.version += 1;
        wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        Ok(self.wallets.read().await.values().cloned().collect())
    }
}

/// Transactions keyed by their reference.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.reference) {
            return Err(PaymentError::DuplicateReference(tx.reference));
        }
        transactions.insert(tx.reference.clone(), tx.clone());
        Ok(tx)
    }

    async fn get(&self, reference: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(reference).cloned())
    }

    async fn update(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        let stored = transactions.get(&tx.reference).map(|t| t.version);
        check_version("transaction", &tx.reference, stored, tx.version)?;
        tx.version += 1;
        transactions.insert(tx.reference.clone(), tx.clone());
        Ok(tx)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut pending: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryKycStore {
    requests: Arc<RwLock<HashMap<Uuid, KycRequest>>>,
}

impl InMemoryKycStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KycStore for InMemoryKycStore {
    async fn insert(&self, request: KycRequest) -> Result<KycRequest> {
        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: Uuid) -> Result<Option<KycRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn latest(&self, owner_id: Uuid, currency: Currency) -> Result<Option<KycRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|r| r.owner_id == owner_id && r.wallet_currency == currency)
            .max_by_key(|r| r.submitted_at)
            .cloned())
    }

    async fn update(&self, mut request: KycRequest) -> Result<KycRequest> {
        let mut requests = self.requests.write().await;
        let stored = requests.get(&request.id).map(|r| r.version);
        check_version("kyc request", &request.id.to_string(), stored, request.version)?;
        request.version += 1;
        requests.insert(request.id, request.clone());
        Ok(request)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryProviderAccountStore {
    accounts: Arc<RwLock<HashMap<(Uuid, Provider), ProviderAccount>>>,
}

impl InMemoryProviderAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderAccountStore for InMemoryProviderAccountStore {
    async fn insert_if_absent(&self, account: ProviderAccount) -> Result<ProviderAccount> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts
            .entry((account.wallet_id, account.provider))
            .or_insert(account)
            .clone())
    }

    async fn find(&self, wallet_id: Uuid, provider: Provider) -> Result<Option<ProviderAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&(wallet_id, provider))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPinStore {
    pins: Arc<RwLock<HashMap<Uuid, TransactionPin>>>,
}

impl InMemoryPinStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PinStore for InMemoryPinStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<TransactionPin>> {
        Ok(self.pins.read().await.get(&owner_id).cloned())
    }

    async fn put(&self, pin: TransactionPin) -> Result<()> {
        self.pins.write().await.insert(pin.owner_id, pin);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryQuoteStore {
    quotes: Arc<RwLock<HashMap<Uuid, ExchangeQuote>>>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn insert(&self, quote: ExchangeQuote) -> Result<ExchangeQuote> {
        self.quotes.write().await.insert(quote.id, quote.clone());
        Ok(quote)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExchangeQuote>> {
        Ok(self.quotes.read().await.get(&id).cloned())
    }

    async fn update(&self, mut quote: ExchangeQuote) -> Result<ExchangeQuote> {
        let mut quotes = self.quotes.write().await;
        let stored = quotes.get(&quote.id).map(|q| q.version);
        check_version("quote", &quote.id.to_string(), stored, quote.version)?;
        quote.version += 1;
        quotes.insert(quote.id, quote.clone());
        Ok(quote)
    }
}

/// A wallet store that refuses updates to one chosen wallet, for exercising
/// recovery from failed writes.
#[cfg(test)]
pub(crate) mod faults {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    pub(crate) struct WalletFault(Arc<Mutex<Option<Uuid>>>);

    impl WalletFault {
        pub(crate) fn break_wallet(&self, wallet_id: Uuid) {
            *self.0.lock().unwrap() = Some(wallet_id);
        }

        pub(crate) fn heal(&self) {
            *self.0.lock().unwrap() = None;
        }

        fn hits(&self, wallet_id: Uuid) -> bool {
            *self.0.lock().unwrap() == Some(wallet_id)
        }
    }

    struct FaultyWalletStore {
        inner: InMemoryWalletStore,
        fault: WalletFault,
    }

    #[async_trait]
    impl WalletStore for FaultyWalletStore {
        async fn insert(&self, wallet: Wallet) -> Result<Wallet> {
            self.inner.insert(wallet).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Wallet>> {
            self.inner.get(id).await
        }

        async fn find(&self, owner_id: Uuid, currency: Currency) -> Result<Option<Wallet>> {
            self.inner.find(owner_id, currency).await
        }

        async fn update(&self, wallet: Wallet) -> Result<Wallet> {
            if self.fault.hits(wallet.id) {
                return Err(PaymentError::Storage(format!("wallet {} is unwritable", wallet.id)));
            }
            self.inner.update(wallet).await
        }

        async fn all(&self) -> Result<Vec<Wallet>> {
            self.inner.all().await
        }
    }

    /// In-memory stores whose wallet writes fail while the fault is set.
    pub(crate) fn stores_with_wallet_fault() -> (Stores, WalletFault) {
        let fault = WalletFault::default();
        let mut stores = stores();
        stores.wallets = Box::new(FaultyWalletStore {
            inner: InMemoryWalletStore::new(),
            fault: fault.clone(),
        });
        (stores, fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::transaction::TransactionType;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_wallet_uniqueness_per_owner_and_currency() {
        let store = InMemoryWalletStore::new();
        let owner = Uuid::new_v4();
        store.insert(Wallet::new(owner, Currency::Ngn)).await.unwrap();
        store.insert(Wallet::new(owner, Currency::Xaf)).await.unwrap();
        assert!(matches!(
            store.insert(Wallet::new(owner, Currency::Ngn)).await,
            Err(PaymentError::WalletExists { .. })
        ));
        assert_eq!(store.all().await.unwrap().len(), 2);
        assert!(store.find(owner, Currency::Usdt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wallet_update_is_compare_and_set() {
        let store = InMemoryWalletStore::new();
        let wallet = store
            .insert(Wallet::new(Uuid::new_v4(), Currency::Ngn))
            .await
            .unwrap();
        let stale = wallet.clone();

        let updated = store.update(wallet).await.unwrap();
        assert_eq!(updated.version, 1);
        assert!(matches!(
            store.update(stale).await,
            Err(PaymentError::VersionConflict(_))
        ));
        assert_eq!(store.get(updated.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_transaction_reference_is_unique() {
        let store = InMemoryTransactionStore::new();
        let wallet = Wallet::new(Uuid::new_v4(), Currency::Ngn);
        let amount = Amount::new(dec!(100)).unwrap();
        let tx = Transaction::pending(&wallet, TransactionType::Deposit, amount, "R1".into(), None);
        store.insert(tx.clone()).await.unwrap();
        assert!(matches!(
            store.insert(tx).await,
            Err(PaymentError::DuplicateReference(r)) if r == "R1"
        ));
    }

    #[tokio::test]
    async fn test_pending_lists_oldest_first_up_to_limit() {
        let store = InMemoryTransactionStore::new();
        let wallet = Wallet::new(Uuid::new_v4(), Currency::Ngn);
        let amount = Amount::new(dec!(100)).unwrap();
        for reference in ["A", "B", "C"] {
            let tx = Transaction::pending(
                &wallet,
                TransactionType::Deposit,
                amount,
                reference.into(),
                None,
            );
            store.insert(tx).await.unwrap();
        }
        let mut done = store.get("B").await.unwrap().unwrap();
        done.status = TransactionStatus::Completed;
        store.update(done).await.unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|t| t.reference != "B"));
        assert_eq!(store.pending(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_kyc_latest_and_provider_account_idempotence() {
        let kyc = InMemoryKycStore::new();
        let owner = Uuid::new_v4();
        let first = kyc
            .insert(KycRequest::new(owner, Currency::Xaf, BTreeMap::new()))
            .await
            .unwrap();
        let mut second = KycRequest::new(owner, Currency::Xaf, BTreeMap::new());
        second.submitted_at = first.submitted_at + chrono::Duration::seconds(1);
        let second = kyc.insert(second).await.unwrap();
        assert_eq!(
            kyc.latest(owner, Currency::Xaf).await.unwrap().unwrap().id,
            second.id
        );

        let accounts = InMemoryProviderAccountStore::new();
        let wallet_id = Uuid::new_v4();
        let account = |external_ref: &str| ProviderAccount {
            wallet_id,
            provider: Provider::XafGateway,
            external_ref: external_ref.to_string(),
            created_at: chrono::Utc::now(),
        };
        accounts.insert_if_absent(account("cus_1")).await.unwrap();
        let kept = accounts.insert_if_absent(account("cus_2")).await.unwrap();
        assert_eq!(kept.external_ref, "cus_1");
    }
}

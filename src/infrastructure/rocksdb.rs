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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const CF_WALLETS: &str = "wallets";
/// `owner_id ++ currency code` -> wallet id.
pub const CF_WALLET_OWNERS: &str = "wallet_owners";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_KYC: &str = "kyc";
/// `owner_id ++ currency code` -> id of the most recent KYC request.
pub const CF_KYC_LATEST: &str = "kyc_latest";
pub const CF_PROVIDER_ACCOUNTS: &str = "provider_accounts";
pub const CF_PINS: &str = "pins";
pub const CF_QUOTES: &str = "quotes";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_WALLETS,
    CF_WALLET_OWNERS,
    CF_TRANSACTIONS,
    CF_KYC,
    CF_KYC_LATEST,
    CF_PROVIDER_ACCOUNTS,
    CF_PINS,
    CF_QUOTES,
];

/// A persistent store for every entity, one column family each.
///
/// Rows are JSON-encoded. Read-check-write sequences (uniqueness checks and
/// version compare-and-set) run under a single process-wide write lock;
/// plain reads go straight to RocksDB.
///
/// `Clone` shares the underlying `Arc<DB>` and the write lock.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    /// Hands out the same database behind every port.
    pub fn stores(&self) -> Stores {
        Stores {
            wallets: Box::new(self.clone()),
            transactions: Box::new(self.clone()),
            kyc: Box::new(self.clone()),
            provider_accounts: Box::new(self.clone()),
            pins: Box::new(self.clone()),
            quotes: Box::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("column family {name} not found")))
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Version check for an update; the caller holds the write lock.
    fn check_version(
        &self,
        kind: &str,
        key: &str,
        stored: Option<u64>,
        expected: u64,
    ) -> Result<()> {
        match stored {
            Some(v) if v == expected => Ok(()),
            Some(v) => Err(PaymentError::VersionConflict(format!(
                "{kind} {key} is at version {v}, write expected {expected}"
            ))),
            None => Err(PaymentError::Storage(format!("{kind} {key} does not exist"))),
        }
    }
}

fn owner_key(owner_id: Uuid, currency: Currency) -> Vec<u8> {
    let mut key = owner_id.as_bytes().to_vec();
    key.extend_from_slice(currency.code().as_bytes());
    key
}

fn account_key(wallet_id: Uuid, provider: Provider) -> Vec<u8> {
    let mut key = wallet_id.as_bytes().to_vec();
    key.extend_from_slice(provider.slug().as_bytes());
    key
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn insert(&self, wallet: Wallet) -> Result<Wallet> {
        let _lock = self.write_lock();
        let index = owner_key(wallet.owner_id, wallet.currency);
        if self.db.get_pinned_cf(self.cf(CF_WALLET_OWNERS)?, &index)?.is_some() {
            return Err(PaymentError::WalletExists {
                owner_id: wallet.owner_id,
                currency: wallet.currency,
            });
        }
        self.write(CF_WALLETS, wallet.id.as_bytes(), &wallet)?;
        self.db
            .put_cf(self.cf(CF_WALLET_OWNERS)?, &index, wallet.id.as_bytes())?;
        Ok(wallet)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, id.as_bytes())
    }

    async fn find(&self, owner_id: Uuid, currency: Currency) -> Result<Option<Wallet>> {
        let index = owner_key(owner_id, currency);
        let Some(id) = self.db.get_cf(self.cf(CF_WALLET_OWNERS)?, &index)? else {
            return Ok(None);
        };
        self.read(CF_WALLETS, &id)
    }

    async fn update(&self, mut wallet: Wallet) -> Result<Wallet> {
        let _lock = self.write_lock();
        let stored: Option<Wallet> = self.read(CF_WALLETS, wallet.id.as_bytes())?;
        self.check_version(
            "wallet",
            &wallet.id.to_string(),
            stored.map(|w| w.version),
            wallet.version,
        )?;
        wallet.version += 1;
        self.write(CF_WALLETS, wallet.id.as_bytes(), &wallet)?;
        Ok(wallet)
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        self.scan(CF_WALLETS)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<Transaction> {
        let _lock = self.write_lock();
        let key = tx.reference.as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_TRANSACTIONS)?, key)?.is_some() {
            return Err(PaymentError::DuplicateReference(tx.reference));
        }
        self.write(CF_TRANSACTIONS, key, &tx)?;
        Ok(tx)
    }

    async fn get(&self, reference: &str) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, reference.as_bytes())
    }

    async fn update(&self, mut tx: Transaction) -> Result<Transaction> {
        let _lock = self.write_lock();
        let stored: Option<Transaction> = self.read(CF_TRANSACTIONS, tx.reference.as_bytes())?;
        self.check_version(
            "transaction",
            &tx.reference,
            stored.map(|t| t.version),
            tx.version,
        )?;
        tx.version += 1;
        self.write(CF_TRANSACTIONS, tx.reference.as_bytes(), &tx)?;
        Ok(tx)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Transaction>> {
        let mut pending: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|t| t.status == TransactionStatus::Pending)
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl KycStore for RocksDBStore {
    async fn insert(&self, request: KycRequest) -> Result<KycRequest> {
        let _lock = self.write_lock();
        self.write(CF_KYC, request.id.as_bytes(), &request)?;
        let index = owner_key(request.owner_id, request.wallet_currency);
        let newer_exists = match self.db.get_cf(self.cf(CF_KYC_LATEST)?, &index)? {
            Some(id) => self
                .read::<KycRequest>(CF_KYC, &id)?
                .is_some_and(|current| current.submitted_at > request.submitted_at),
            None => false,
        };
        if !newer_exists {
            self.db
                .put_cf(self.cf(CF_KYC_LATEST)?, &index, request.id.as_bytes())?;
        }
        Ok(request)
    }

    async fn get(&self, id: Uuid) -> Result<Option<KycRequest>> {
        self.read(CF_KYC, id.as_bytes())
    }

    async fn latest(&self, owner_id: Uuid, currency: Currency) -> Result<Option<KycRequest>> {
        let index = owner_key(owner_id, currency);
        let Some(id) = self.db.get_cf(self.cf(CF_KYC_LATEST)?, &index)? else {
            return Ok(None);
        };
        self.read(CF_KYC, &id)
    }

    async fn update(&self, mut request: KycRequest) -> Result<KycRequest> {
        let _lock = self.write_lock();
        let stored: Option<KycRequest> = self.read(CF_KYC, request.id.as_bytes())?;
        self.check_version(
            "kyc request",
            &request.id.to_string(),
            stored.map(|r| r.version),
            request.version,
        )?;
        request.version += 1;
        self.write(CF_KYC, request.id.as_bytes(), &request)?;
        Ok(request)
    }
}

#[async_trait]
impl ProviderAccountStore for RocksDBStore {
    async fn insert_if_absent(&self, account: ProviderAccount) -> Result<ProviderAccount> {
        let _lock = self.write_lock();
        let key = account_key(account.wallet_id, account.provider);
        if let Some(existing) = self.read(CF_PROVIDER_ACCOUNTS, &key)? {
            return Ok(existing);
        }
        self.write(CF_PROVIDER_ACCOUNTS, &key, &account)?;
        Ok(account)
    }

    async fn find(&self, wallet_id: Uuid, provider: Provider) -> Result<Option<ProviderAccount>> {
        self.read(CF_PROVIDER_ACCOUNTS, &account_key(wallet_id, provider))
    }
}

#[async_trait]
impl PinStore for RocksDBStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<TransactionPin>> {
        self.read(CF_PINS, owner_id.as_bytes())
    }

    async fn put(&self, pin: TransactionPin) -> Result<()> {
        self.write(CF_PINS, pin.owner_id.as_bytes(), &pin)
    }
}

#[async_trait]
impl QuoteStore for RocksDBStore {
    async fn insert(&self, quote: ExchangeQuote) -> Result<ExchangeQuote> {
        self.write(CF_QUOTES, quote.id.as_bytes(), &quote)?;
        Ok(quote)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExchangeQuote>> {
        self.read(CF_QUOTES, id.as_bytes())
    }

    async fn update(&self, mut quote: ExchangeQuote) -> Result<ExchangeQuote> {
        let _lock = self.write_lock();
        let stored: Option<ExchangeQuote> = self.read(CF_QUOTES, quote.id.as_bytes())?;
        self.check_version(
            "quote",
            &quote.id.to_string(),
            stored.map(|q| q.version),
            quote.version,
        )?;
        quote.version += 1;
        self.write(CF_QUOTES, quote.id.as_bytes(), &quote)?;
        Ok(quote)
    }
}

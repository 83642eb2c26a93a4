//! Datastore ports.
//!
//! Every `update` is a compare-and-set on the row's `version`: the caller
//! passes the row as it read it, the store rejects the write with
//! [`PaymentError::VersionConflict`](crate::error::PaymentError::VersionConflict)
//! if the stored version moved on, and otherwise persists the row with the
//! version bumped and returns it.

use super::kyc::{KycRequest, ProviderAccount};
use super::money::Currency;
use super::pin::TransactionPin;
use super::quote::ExchangeQuote;
use super::transaction::Transaction;
use super::wallet::Wallet;
use crate::error::Result;
use crate::providers::Provider;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Fails with `WalletExists` when the owner already has a wallet in that currency.
    async fn insert(&self, wallet: Wallet) -> Result<Wallet>;
    async fn get(&self, id: Uuid) -> Result<Option<Wallet>>;
    async fn find(&self, owner_id: Uuid, currency: Currency) -> Result<Option<Wallet>>;
    async fn update(&self, wallet: Wallet) -> Result<Wallet>;
    async fn all(&self) -> Result<Vec<Wallet>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `DuplicateReference` when the reference is already recorded.
    async fn insert(&self, tx: Transaction) -> Result<Transaction>;
    async fn get(&self, reference: &str) -> Result<Option<Transaction>>;
    async fn update(&self, tx: Transaction) -> Result<Transaction>;
    async fn pending(&self, limit: usize) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait KycStore: Send + Sync {
    async fn insert(&self, request: KycRequest) -> Result<KycRequest>;
    async fn get(&self, id: Uuid) -> Result<Option<KycRequest>>;
    /// The most recent submission for the owner and currency.
    async fn latest(&self, owner_id: Uuid, currency: Currency) -> Result<Option<KycRequest>>;
    async fn update(&self, request: KycRequest) -> Result<KycRequest>;
}

#[async_trait]
pub trait ProviderAccountStore: Send + Sync {
    /// Inserts unless an account already exists for the wallet and provider,
    /// in which case the existing row is returned unchanged.
    async fn insert_if_absent(&self, account: ProviderAccount) -> Result<ProviderAccount>;
    async fn find(&self, wallet_id: Uuid, provider: Provider) -> Result<Option<ProviderAccount>>;
}

#[async_trait]
pub trait PinStore: Send + Sync {
    async fn get(&self, owner_id: Uuid) -> Result<Option<TransactionPin>>;
    async fn put(&self, pin: TransactionPin) -> Result<()>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn insert(&self, quote: ExchangeQuote) -> Result<ExchangeQuote>;
    async fn get(&self, id: Uuid) -> Result<Option<ExchangeQuote>>;
    async fn update(&self, quote: ExchangeQuote) -> Result<ExchangeQuote>;
}

pub type WalletStoreBox = Box<dyn WalletStore>;
pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type KycStoreBox = Box<dyn KycStore>;
pub type ProviderAccountStoreBox = Box<dyn ProviderAccountStore>;
pub type PinStoreBox = Box<dyn PinStore>;
pub type QuoteStoreBox = Box<dyn QuoteStore>;

/// The full set of stores the application layer works against.
pub struct Stores {
    pub wallets: WalletStoreBox,
    pub transactions: TransactionStoreBox,
    pub kyc: KycStoreBox,
    pub provider_accounts: ProviderAccountStoreBox,
    pub pins: PinStoreBox,
    pub quotes: QuoteStoreBox,
}

use crate::domain::money::Currency;
use crate::providers::Provider;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Missing or invalid counterpart: {0}")]
    MissingCounterpart(String),
    #[error("Transaction PIN is not configured")]
    PinNotConfigured,
    #[error("Transaction PIN does not match")]
    PinMismatch,
    #[error("Transaction PIN is locked after repeated failures")]
    PinLocked,
    #[error("Invalid PIN format: {0}")]
    InvalidPinFormat(String),
    #[error("Provider {0} is unavailable: {1}")]
    ProviderUnavailable(Provider, String),
    #[error("Provider {0} rejected the request: {1}")]
    ProviderRejected(Provider, String),
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),
    #[error("Provisioning failed for wallet {wallet_id}: {reason}")]
    ProvisioningFailed { wallet_id: Uuid, reason: String },
    #[error("No provider routes {operation} for {currency}")]
    UnsupportedRoute { currency: Currency, operation: String },
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),
    #[error("Wallet already exists for owner {owner_id} in {currency}")]
    WalletExists { owner_id: Uuid, currency: Currency },
    #[error("Wallet {0} is not active")]
    WalletNotActive(Uuid),
    #[error("Wallet {0} is frozen")]
    WalletFrozen(Uuid),
    #[error("KYC request not found: {0}")]
    KycNotFound(String),
    #[error("A KYC request is already pending for {0}")]
    KycAlreadyPending(Currency),
    #[error("KYC is already approved for {0}")]
    KycAlreadyApproved(Currency),
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("Unknown reference: {0}")]
    UnknownReference(String),
    #[error("Exchange quote not found: {0}")]
    QuoteNotFound(Uuid),
    #[error("Exchange quote {0} has expired")]
    QuoteExpired(Uuid),
    #[error("Exchange quote {0} is no longer active")]
    QuoteNotActive(Uuid),
    #[error("Row was modified concurrently: {0}")]
    VersionConflict(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

//! KYC-gated wallet activation.
//!
//! ```text
//! inactive --approve_kyc--> activation_pending --provisioned--> active
//! ```
//!
//! Any status can be frozen; unfreezing restores the one it had before.
//!
//! Approval is recorded before provisioning and is never rolled back: when
//! the provider cannot create the account the wallet waits in
//! `activation_pending` until [`Activation::retry_provisioning`] succeeds.

use super::ledger::Ledger;
use super::router::{Operation, PaymentRouter};
use crate::domain::kyc::{KycRequest, KycStatus, ProviderAccount};
use crate::domain::money::Currency;
use crate::domain::transaction::{TransactionStatus, provisioning_reference};
use crate::domain::wallet::{Wallet, WalletStatus};
use crate::error::{PaymentError, Result};
use crate::providers::{Customer, Outcome};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What `approve_kyc` did.
#[derive(Debug)]
pub struct ActivationReport {
    pub request: KycRequest,
    pub wallet: Wallet,
    /// Set when approval was recorded but the provider account could not be
    /// created (always a `ProvisioningFailed`).
    pub provisioning_error: Option<PaymentError>,
}

impl ActivationReport {
    pub fn activated(&self) -> bool {
        self.wallet.status == WalletStatus::Active
    }
}

pub struct Activation {
    ledger: Arc<Ledger>,
    router: Arc<PaymentRouter>,
}

impl Activation {
    pub fn new(ledger: Arc<Ledger>, router: Arc<PaymentRouter>) -> Self {
        Self { ledger, router }
    }

    async fn wallet_for(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
        self.ledger
            .stores()
            .wallets
            .find(owner_id, currency)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(format!("{owner_id}/{currency}")))
    }

    async fn request(&self, request_id: Uuid) -> Result<KycRequest> {
        self.ledger
            .stores()
            .kyc
            .get(request_id)
            .await?
            .ok_or_else(|| PaymentError::KycNotFound(request_id.to_string()))
    }

    /// Records a KYC submission for the owner's wallet in `currency`.
    pub async fn submit_kyc(
        &self,
        owner_id: Uuid,
        currency: Currency,
        fields: BTreeMap<String, String>,
    ) -> Result<KycRequest> {
        self.wallet_for(owner_id, currency).await?;
        match self.ledger.stores().kyc.latest(owner_id, currency).await? {
            Some(r) if r.status == KycStatus::Pending => {
                return Err(PaymentError::KycAlreadyPending(currency));
            }
            Some(r) if r.status == KycStatus::Approved => {
                return Err(PaymentError::KycAlreadyApproved(currency));
            }
            _ => {}
        }
        let request = self
            .ledger
            .stores()
            .kyc
            .insert(KycRequest::new(owner_id, currency, fields))
            .await?;
        info!(request_id = %request.id, %owner_id, %currency, "KYC submitted");
        Ok(request)
    }

    /// Approves a pending request, then moves the wallet on and provisions it.
    pub async fn approve_kyc(&self, request_id: Uuid, approver: &str) -> Result<ActivationReport> {
        let mut request = self.request(request_id).await?;
        if request.status != KycStatus::Pending {
            return Err(PaymentError::InvalidTransition(format!(
                "KYC request {request_id} is {}",
                request.status
            )));
        }
        request.status = KycStatus::Approved;
        request.approved_by = Some(approver.to_string());
        request.approved_at = Some(Utc::now());
        let request = match self.ledger.stores().kyc.update(request).await {
            Ok(r) => r,
            Err(PaymentError::VersionConflict(_)) => {
                return Err(PaymentError::InvalidTransition(format!(
                    "KYC request {request_id} was decided concurrently"
                )));
            }
            Err(e) => return Err(e),
        };
        info!(%request_id, %approver, "KYC approved");

        let wallet = self
            .wallet_for(request.owner_id, request.wallet_currency)
            .await?;
        if wallet.is_frozen() {
            warn!(wallet_id = %wallet.id, "wallet frozen, activation deferred until unfrozen");
            return Ok(ActivationReport {
                request,
                wallet,
                provisioning_error: None,
            });
        }

        let wallet = self
            .ledger
            .update_wallet(wallet.id, |w| {
                if w.status == WalletStatus::Inactive {
                    w.status = WalletStatus::ActivationPending;
                }
                Ok(())
            })
            .await?;

        let (wallet, provisioning_error) = match self.provision(&wallet, &request).await {
            Ok(wallet) => (wallet, None),
            Err(e @ PaymentError::ProvisioningFailed { .. }) => {
                let wallet = self.ledger.wallet(wallet.id).await?;
                (wallet, Some(e))
            }
            Err(e) => return Err(e),
        };
        Ok(ActivationReport {
            request,
            wallet,
            provisioning_error,
        })
    }

    pub async fn reject_kyc(&self, request_id: Uuid, reason: &str) -> Result<KycRequest> {
        let mut request = self.request(request_id).await?;
        if request.status != KycStatus::Pending {
            return Err(PaymentError::InvalidTransition(format!(
                "KYC request {request_id} is {}",
                request.status
            )));
        }
        request.status = KycStatus::Rejected;
        request.rejection_reason = Some(reason.to_string());
        let request = self.ledger.stores().kyc.update(request).await?;
        info!(%request_id, "KYC rejected");
        Ok(request)
    }

    /// Re-runs provisioning for a wallet stuck in `activation_pending`.
    pub async fn retry_provisioning(&self, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self.ledger.wallet(wallet_id).await?;
        match wallet.status {
            WalletStatus::Active => return Ok(wallet),
            WalletStatus::Frozen => return Err(PaymentError::WalletFrozen(wallet_id)),
            WalletStatus::Inactive => {
                return Err(PaymentError::InvalidTransition(format!(
                    "wallet {wallet_id} has no approved KYC"
                )));
            }
            WalletStatus::ActivationPending => {}
        }
        let request = self.approved_request(&wallet).await?.ok_or_else(|| {
            PaymentError::InvalidTransition(format!("wallet {wallet_id} has no approved KYC"))
        })?;
        self.provision(&wallet, &request).await
    }

    pub async fn freeze(&self, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self.ledger.update_wallet(wallet_id, Wallet::freeze).await?;
        info!(%wallet_id, "wallet frozen");
        Ok(wallet)
    }

    /// Restores the pre-freeze status. An approval recorded while frozen is
    /// acted on now.
    pub async fn unfreeze(&self, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self.ledger.update_wallet(wallet_id, Wallet::unfreeze).await?;
        info!(%wallet_id, status = %wallet.status, "wallet unfrozen");
        if wallet.status != WalletStatus::Inactive {
            return Ok(wallet);
        }
        let Some(request) = self.approved_request(&wallet).await? else {
            return Ok(wallet);
        };
        let wallet = self
            .ledger
            .update_wallet(wallet_id, |w| {
                if w.status == WalletStatus::Inactive {
                    w.status = WalletStatus::ActivationPending;
                }
                Ok(())
            })
            .await?;
        match self.provision(&wallet, &request).await {
            Ok(wallet) => Ok(wallet),
            Err(e @ PaymentError::ProvisioningFailed { .. }) => {
                warn!(%wallet_id, error = %e, "provisioning after unfreeze failed");
                self.ledger.wallet(wallet_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// The owner's latest KYC decision for `currency`.
    pub async fn check_kyc_status(&self, owner_id: Uuid, currency: Currency) -> Result<KycRequest> {
        self.ledger
            .stores()
            .kyc
            .latest(owner_id, currency)
            .await?
            .ok_or_else(|| PaymentError::KycNotFound(format!("{owner_id}/{currency}")))
    }

    pub async fn get_wallet_status(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
        self.wallet_for(owner_id, currency).await
    }

    async fn approved_request(&self, wallet: &Wallet) -> Result<Option<KycRequest>> {
        Ok(self
            .ledger
            .stores()
            .kyc
            .latest(wallet.owner_id, wallet.currency)
            .await?
            .filter(|r| r.status == KycStatus::Approved))
    }

    /// Creates (or reuses) the provider account and activates the wallet.
    ///
    /// Runs under the wallet lock, so concurrent approvals and retries reach
    /// the provider one at a time and later ones find the account recorded.
    async fn provision(&self, wallet: &Wallet, request: &KycRequest) -> Result<Wallet> {
        let _guard = self.ledger.lock_wallet(wallet.id).await;
        let wallet = self.ledger.wallet(wallet.id).await?;
        if wallet.status == WalletStatus::Active {
            return Ok(wallet);
        }
        let adapter = self.router.route(wallet.currency, Operation::Provision)?;
        let provider = adapter.provider();
        let accounts = &self.ledger.stores().provider_accounts;

        let account = match accounts.find(wallet.id, provider).await? {
            Some(existing) => existing,
            None => {
                let reference = provisioning_reference(provider.slug(), wallet.id);
                let outcome = adapter
                    .provision_account(&reference, &customer(request))
                    .await;
                let external_ref = match outcome {
                    Outcome::Success(receipt) if receipt.status != TransactionStatus::Failed => {
                        receipt.external_ref
                    }
                    other => {
                        let reason = failure_reason(&other);
                        warn!(wallet_id = %wallet.id, %provider, %reason, "provisioning failed");
                        return Err(PaymentError::ProvisioningFailed {
                            wallet_id: wallet.id,
                            reason,
                        });
                    }
                };
                accounts
                    .insert_if_absent(ProviderAccount::new(wallet.id, provider, external_ref))
                    .await?
            }
        };

        let external_ref = account.external_ref.clone();
        let wallet = self
            .ledger
            .apply(wallet.id, |w| match w.status {
                WalletStatus::ActivationPending => {
                    w.status = WalletStatus::Active;
                    w.provider_account_ref = Some(external_ref.clone());
                    Ok(())
                }
                WalletStatus::Active => Ok(()),
                other => Err(PaymentError::InvalidTransition(format!(
                    "wallet {} is {other}, not activation_pending",
                    w.id
                ))),
            })
            .await?;
        info!(wallet_id = %wallet.id, %provider, "wallet activated");
        Ok(wallet)
    }
}

fn customer(request: &KycRequest) -> Customer {
    Customer {
        owner_id: request.owner_id,
        email: request.field("email").unwrap_or_default().to_string(),
        name: request
            .field("full_name")
            .or_else(|| request.field("name"))
            .unwrap_or_default()
            .to_string(),
        phone: request.field("phone").map(str::to_string),
    }
}

fn failure_reason(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Rejected { reason, .. } => format!("rejected: {reason}"),
        Outcome::Unavailable { reason } => format!("unavailable: {reason}"),
        Outcome::Simulated(_) => "provider is running in simulated mode".to_string(),
        Outcome::Success(_) => "provider reported failure".to_string(),
    }
}

//! Currency conversion between two of an owner's wallets.

use super::ledger::Ledger;
use crate::config::ExchangeConfig;
use crate::domain::money::{Amount, Currency};
use crate::domain::quote::{ExchangeQuote, QuoteStatus};
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType, new_reference};
use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The two ledger entries an executed quote produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeReceipt {
    pub quote: ExchangeQuote,
    pub debit: Transaction,
    pub credit: Transaction,
}

pub struct ExchangeDesk {
    ledger: Arc<Ledger>,
    config: ExchangeConfig,
}

impl ExchangeDesk {
    pub fn new(ledger: Arc<Ledger>, config: ExchangeConfig) -> Self {
        Self { ledger, config }
    }

    async fn active_wallet(&self, owner_id: Uuid, currency: Currency) -> Result<Wallet> {
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

    /// Prices a conversion of `from_amount` and stores the offer.
    pub async fn quote(
        &self,
        owner_id: Uuid,
        from: Currency,
        to: Currency,
        from_amount: Decimal,
    ) -> Result<ExchangeQuote> {
        let unsupported = || PaymentError::UnsupportedRoute {
            currency: from,
            operation: format!("exchange to {to}"),
        };
        if from == to {
            return Err(unsupported());
        }
        let from_amount = Amount::in_currency(from_amount, from)?;
        let rate = *self.config.rates.get(&(from, to)).ok_or_else(unsupported)?;
        self.active_wallet(owner_id, from).await?;
        self.active_wallet(owner_id, to).await?;

        let fee = (from_amount.value() * self.config.fee_rate).round_dp(from.scale());
        let converted = ((from_amount.value() - fee) * rate).round_dp(to.scale());
        let to_amount = Amount::new(converted).map_err(|_| {
            PaymentError::InvalidAmount(format!("{from_amount} {from} converts to nothing"))
        })?;

        let now = Utc::now();
        let quote = ExchangeQuote {
            id: Uuid::new_v4(),
            owner_id,
            from_currency: from,
            to_currency: to,
            from_amount,
            rate,
            fee,
            to_amount,
            status: QuoteStatus::Active,
            expires_at: now + self.config.quote_ttl,
            created_at: now,
            version: 0,
        };
        let quote = self.ledger.stores().quotes.insert(quote).await?;
        info!(quote_id = %quote.id, %from, %to, %rate, "exchange quoted");
        Ok(quote)
    }

    /// Executes an active quote: debits the source wallet, credits the
    /// destination and records one exchange transaction per side.
    pub async fn execute(&self, quote_id: Uuid) -> Result<ExchangeReceipt> {
        let stores = self.ledger.stores();
        let quote = self.load(quote_id).await?;
        let source = self.active_wallet(quote.owner_id, quote.from_currency).await?;
        let target = self.active_wallet(quote.owner_id, quote.to_currency).await?;

        let _guard = self.ledger.lock_pair(source.id, target.id).await;

        // Re-read under the locks; the funds check must precede the claim.
        let mut quote = self.load(quote_id).await?;
        if let Err(e) = quote.execute(Utc::now()) {
            if quote.status == QuoteStatus::Expired
                && let Err(update) = stores.quotes.update(quote).await
            {
                warn!(%quote_id, error = %update, "could not mark quote expired");
            }
            return Err(e);
        }
        let source = self.ledger.wallet(source.id).await?;
        source.ensure_can_send()?;
        if source.available_balance.value() < quote.from_amount.value() {
            return Err(PaymentError::InsufficientFunds {
                available: source.available_balance.value(),
                requested: quote.from_amount.value(),
            });
        }
        let quote = match stores.quotes.update(quote).await {
            Ok(q) => q,
            Err(PaymentError::VersionConflict(_)) => {
                return Err(PaymentError::QuoteNotActive(quote_id));
            }
            Err(e) => return Err(e),
        };

        let (from_amount, to_amount) = (quote.from_amount, quote.to_amount);
        let source = match self.ledger.apply(source.id, |w| w.debit(from_amount)).await {
            Ok(wallet) => wallet,
            Err(e) => {
                self.reopen(quote).await;
                return Err(e);
            }
        };
        let credited = self
            .ledger
            .apply(target.id, |w| {
                w.credit(to_amount);
                Ok(())
            })
            .await;
        let target = match credited {
            Ok(wallet) => wallet,
            Err(e) => {
                let refund = self
                    .ledger
                    .apply(source.id, |w| {
                        w.credit(from_amount);
                        Ok(())
                    })
                    .await;
                if let Err(refund) = refund {
                    error!(%quote_id, error = %refund, "exchange debit could not be refunded");
                }
                self.reopen(quote).await;
                return Err(e);
            }
        };

        let pair = format!(
            "{}{}",
            quote.from_currency.code().to_ascii_lowercase(),
            quote.to_currency.code().to_ascii_lowercase()
        );
        let reference = new_reference("exchange", &pair);
        let debit = stores
            .transactions
            .insert(completed(&source, from_amount, reference.clone()))
            .await?;
        let credit = stores
            .transactions
            .insert(completed(&target, to_amount, format!("{reference}-credit")))
            .await?;
        info!(%quote_id, %reference, "exchange executed");
        Ok(ExchangeReceipt {
            quote,
            debit,
            credit,
        })
    }

    pub async fn cancel(&self, quote_id: Uuid) -> Result<ExchangeQuote> {
        let mut quote = self.load(quote_id).await?;
        quote.cancel()?;
        match self.ledger.stores().quotes.update(quote).await {
            Ok(q) => Ok(q),
            Err(PaymentError::VersionConflict(_)) => Err(PaymentError::QuoteNotActive(quote_id)),
            Err(e) => Err(e),
        }
    }

    /// Returns a claimed quote to `active` after its funds movement failed.
    async fn reopen(&self, mut quote: ExchangeQuote) {
        let quote_id = quote.id;
        quote.status = QuoteStatus::Active;
        if let Err(e) = self.ledger.stores().quotes.update(quote).await {
            error!(%quote_id, error = %e, "executed quote could not be reopened");
        }
    }

    async fn load(&self, quote_id: Uuid) -> Result<ExchangeQuote> {
        self.ledger
            .stores()
            .quotes
            .get(quote_id)
            .await?
            .ok_or(PaymentError::QuoteNotFound(quote_id))
    }
}

fn completed(wallet: &Wallet, amount: Amount, reference: String) -> Transaction {
    let mut tx = Transaction::pending(wallet, TransactionType::Exchange, amount, reference, None);
    tx.status = TransactionStatus::Completed;
    tx.completed_at = Some(tx.created_at);
    tx
}

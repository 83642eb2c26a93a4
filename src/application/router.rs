//! Picks the provider for a currency/operation pair and validates requests
//! before they are handed to it.
//!
//! The router is a lookup table plus input checks. It never retries and
//! never falls back to another provider.

use crate::config::AppConfig;
use crate::domain::money::{Amount, Currency};
use crate::domain::phone::{CAMEROON, DialPlan, NIGERIA};
use crate::error::{PaymentError, Result};
use crate::providers::card_bank::CardBankAdapter;
use crate::providers::chain::{ChainAdapter, Network};
use crate::providers::mobile_money::MobileMoneyAdapter;
use crate::providers::ngn_gateway::NgnGatewayAdapter;
use crate::providers::xaf_gateway::XafGatewayAdapter;
use crate::providers::{Counterpart, PaymentAdapter, Provider};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BankDeposit,
    CardDeposit,
    MobileDeposit,
    ChainDeposit,
    BankPayout,
    MobilePayout,
    ChainPayout,
    Provision,
}

impl Operation {
    pub fn is_deposit(self) -> bool {
        matches!(
            self,
            Self::BankDeposit | Self::CardDeposit | Self::MobileDeposit | Self::ChainDeposit
        )
    }

    pub fn is_payout(self) -> bool {
        matches!(self, Self::BankPayout | Self::MobilePayout | Self::ChainPayout)
    }

    /// The operation segment of generated references.
    pub fn reference_tag(self) -> &'static str {
        if self.is_deposit() {
            "deposit"
        } else if self.is_payout() {
            "payout"
        } else {
            "provision"
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BankDeposit => "bank_deposit",
            Self::CardDeposit => "card_deposit",
            Self::MobileDeposit => "mobile_deposit",
            Self::ChainDeposit => "chain_deposit",
            Self::BankPayout => "bank_payout",
            Self::MobilePayout => "mobile_payout",
            Self::ChainPayout => "chain_payout",
            Self::Provision => "provision",
        };
        f.write_str(s)
    }
}

/// The default routing table.
pub fn default_routes() -> BTreeMap<(Currency, Operation), Provider> {
    use Currency::*;
    use Operation::*;
    BTreeMap::from([
        ((Ngn, BankDeposit), Provider::NgnGateway),
        ((Ngn, BankPayout), Provider::NgnGateway),
        ((Ngn, Provision), Provider::NgnGateway),
        ((Ngn, CardDeposit), Provider::CardBank),
        ((Xaf, BankDeposit), Provider::XafGateway),
        ((Xaf, BankPayout), Provider::XafGateway),
        ((Xaf, Provision), Provider::XafGateway),
        ((Xaf, MobileDeposit), Provider::MobileMoney),
        ((Xaf, MobilePayout), Provider::MobileMoney),
        ((Usdt, ChainDeposit), Provider::Chain),
        ((Usdt, ChainPayout), Provider::Chain),
        ((Usdt, Provision), Provider::Chain),
    ])
}

/// A deposit that passed validation.
pub struct PreparedDeposit {
    pub adapter: Arc<dyn PaymentAdapter>,
    pub amount: Amount,
    /// National significant number, for mobile collections.
    pub phone: Option<String>,
}

/// A payout that passed validation.
pub struct PreparedPayout {
    pub adapter: Arc<dyn PaymentAdapter>,
    pub amount: Amount,
    /// The counterpart with its phone number or address normalized.
    pub counterpart: Counterpart,
}

pub struct PaymentRouter {
    adapters: HashMap<Provider, Arc<dyn PaymentAdapter>>,
    routes: BTreeMap<(Currency, Operation), Provider>,
}

impl PaymentRouter {
    /// Builds a router over `adapters` with the default routing table.
    pub fn new(adapters: Vec<Arc<dyn PaymentAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.provider(), a)).collect(),
            routes: default_routes(),
        }
    }

    /// Builds the five network adapters from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let adapters: Vec<Arc<dyn PaymentAdapter>> = vec![
            Arc::new(NgnGatewayAdapter::new(&config.provider(Provider::NgnGateway))),
            Arc::new(XafGatewayAdapter::new(&config.provider(Provider::XafGateway))),
            Arc::new(MobileMoneyAdapter::new(&config.provider(Provider::MobileMoney))),
            Arc::new(CardBankAdapter::new(&config.provider(Provider::CardBank))),
            Arc::new(ChainAdapter::new(&config.provider(Provider::Chain))),
        ];
        Self::new(adapters)
    }

    /// Looks up the adapter for `operation` in `currency`.
    pub fn route(
        &self,
        currency: Currency,
        operation: Operation,
    ) -> Result<Arc<dyn PaymentAdapter>> {
        self.routes
            .get(&(currency, operation))
            .and_then(|provider| self.adapters.get(provider))
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedRoute {
                currency,
                operation: operation.to_string(),
            })
    }

    pub fn adapter(&self, provider: Provider) -> Option<Arc<dyn PaymentAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Validates a deposit request and picks its adapter.
    pub fn prepare_deposit(
        &self,
        currency: Currency,
        operation: Operation,
        amount: Decimal,
        phone: Option<&str>,
    ) -> Result<PreparedDeposit> {
        if !operation.is_deposit() {
            return Err(unsupported(currency, operation));
        }
        let adapter = self.route(currency, operation)?;
        let amount = check_amount(adapter.as_ref(), currency, amount)?;
        let phone = match operation {
            Operation::MobileDeposit => {
                let raw = phone.ok_or_else(|| {
                    PaymentError::MissingCounterpart("phone number is required".to_string())
                })?;
                Some(dial_plan(currency)?.normalize(raw)?)
            }
            _ => None,
        };
        Ok(PreparedDeposit {
            adapter,
            amount,
            phone,
        })
    }

    /// Validates a payout request and picks its adapter. Funds are not
    /// checked here; the ledger's reservation does that.
    pub fn prepare_payout(
        &self,
        currency: Currency,
        operation: Operation,
        amount: Decimal,
        counterpart: &Counterpart,
    ) -> Result<PreparedPayout> {
        if !operation.is_payout() {
            return Err(unsupported(currency, operation));
        }
        let adapter = self.route(currency, operation)?;
        let amount = check_amount(adapter.as_ref(), currency, amount)?;
        let counterpart = check_counterpart(currency, operation, counterpart)?;
        Ok(PreparedPayout {
            adapter,
            amount,
            counterpart,
        })
    }
}

fn unsupported(currency: Currency, operation: Operation) -> PaymentError {
    PaymentError::UnsupportedRoute {
        currency,
        operation: operation.to_string(),
    }
}

fn check_amount(
    adapter: &dyn PaymentAdapter,
    currency: Currency,
    amount: Decimal,
) -> Result<Amount> {
    let amount = Amount::in_currency(amount, currency)?;
    let minimum = adapter.minimum_amount();
    if amount.value() < minimum {
        return Err(PaymentError::InvalidAmount(format!(
            "{amount} is below the {} minimum of {minimum}",
            adapter.provider()
        )));
    }
    Ok(amount)
}

fn dial_plan(currency: Currency) -> Result<DialPlan> {
    match currency {
        Currency::Xaf => Ok(CAMEROON),
        Currency::Ngn => Ok(NIGERIA),
        Currency::Usdt => Err(PaymentError::MissingCounterpart(
            "no mobile numbering plan for USDT".to_string(),
        )),
    }
}

fn check_counterpart(
    currency: Currency,
    operation: Operation,
    counterpart: &Counterpart,
) -> Result<Counterpart> {
    match (operation, counterpart) {
        (Operation::MobilePayout, Counterpart::Mobile { phone }) => Ok(Counterpart::Mobile {
            phone: dial_plan(currency)?.normalize(phone)?,
        }),
        (
            Operation::BankPayout,
            Counterpart::Bank {
                bank_code,
                account_number,
                account_name,
            },
        ) => {
            let bank_code = bank_code.trim();
            if bank_code.is_empty() {
                return Err(PaymentError::MissingCounterpart(
                    "bank code is required".to_string(),
                ));
            }
            let account_number = account_number.trim();
            let valid = match currency {
                Currency::Ngn => {
                    account_number.len() == 10
                        && account_number.bytes().all(|b| b.is_ascii_digit())
                }
                _ => {
                    (5..=23).contains(&account_number.len())
                        && account_number.bytes().all(|b| b.is_ascii_alphanumeric())
                }
            };
            if !valid {
                return Err(PaymentError::MissingCounterpart(format!(
                    "invalid {currency} account number: {account_number}"
                )));
            }
            Ok(Counterpart::Bank {
                bank_code: bank_code.to_string(),
                account_number: account_number.to_string(),
                account_name: account_name.clone(),
            })
        }
        (Operation::ChainPayout, Counterpart::Chain { network, address }) => {
            let network: Network = network.parse()?;
            let address = address.trim();
            network.validate_address(address)?;
            Ok(Counterpart::Chain {
                network: network.code().to_string(),
                address: address.to_string(),
            })
        }
        _ => Err(PaymentError::MissingCounterpart(format!(
            "{operation} needs a different kind of counterpart"
        ))),
    }
}

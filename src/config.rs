//! Application configuration loaded from environment variables.
//!
//! The environment is read exactly once, in [`fetch_config`]. Everything
//! downstream (adapters, router, poller, exchange desk) receives its slice of
//! [`AppConfig`] through its constructor.
//!
//! Per provider, with `<P>` one of `NGN_GATEWAY`, `XAF_GATEWAY`,
//! `MOBILE_MONEY`, `CARD_BANK`, `CHAIN`:
//! - `WALLETRAIL_<P>_BASE_URL` overrides the default endpoint
//! - `WALLETRAIL_<P>_SECRET_KEY` (bearer rails), `WALLETRAIL_<P>_CLIENT_ID` +
//!   `WALLETRAIL_<P>_CLIENT_SECRET` (client-id rails) or `WALLETRAIL_<P>_API_KEY`
//! - `WALLETRAIL_<P>_WEBHOOK_SECRET`
//! - `WALLETRAIL_<P>_MIN_AMOUNT`
//! - `WALLETRAIL_<P>_SIMULATED=true` forces simulated mode
//!
//! Missing credentials are not an error: the adapter runs simulated.

use crate::domain::money::Currency;
use crate::error::{PaymentError, Result};
use crate::providers::Provider;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

const PREFIX: &str = "WALLETRAIL";

/// How an adapter authenticates against its network.
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    /// `Authorization: Bearer <key>`.
    Bearer(Zeroizing<String>),
    /// A public client id plus a secret.
    ClientPair {
        client_id: String,
        client_secret: Zeroizing<String>,
    },
    /// `X-Api-Key: <key>`.
    ApiKey(Zeroizing<String>),
}

impl Credentials {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::ClientPair { client_id, .. } => f
                .debug_struct("ClientPair")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub webhook_secret: Option<Zeroizing<String>>,
    pub minimum_amount: Decimal,
    /// Forces simulated outcomes even when credentials are present.
    pub simulated: bool,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Defaults for `provider` with no credentials (simulated mode).
    pub fn defaults(provider: Provider) -> Self {
        Self {
            base_url: default_base_url(provider).to_string(),
            credentials: Credentials::None,
            webhook_secret: None,
            minimum_amount: default_minimum(provider),
            simulated: false,
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("minimum_amount", &self.minimum_amount)
            .field("simulated", &self.simulated)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Bounds for background status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Hard upper bound after which a poller gives up and leaves the
    /// transaction pending for manual reconciliation.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    pub quote_ttl: chrono::Duration,
    /// Fraction of the source amount kept as fee.
    pub fee_rate: Decimal,
    pub rates: BTreeMap<(Currency, Currency), Decimal>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        let rates = BTreeMap::from([
            ((Currency::Ngn, Currency::Usdt), dec!(0.00065)),
            ((Currency::Usdt, Currency::Ngn), dec!(1500)),
            ((Currency::Xaf, Currency::Usdt), dec!(0.0016)),
            ((Currency::Usdt, Currency::Xaf), dec!(600)),
            ((Currency::Ngn, Currency::Xaf), dec!(0.39)),
            ((Currency::Xaf, Currency::Ngn), dec!(2.5)),
        ]);
        Self {
            quote_ttl: chrono::Duration::seconds(60),
            fee_rate: dec!(0.01),
            rates,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: BTreeMap<Provider, ProviderConfig>,
    pub poll: PollConfig,
    pub exchange: ExchangeConfig,
}

impl AppConfig {
    /// All providers on defaults: simulated, no webhook secrets.
    pub fn simulated() -> Self {
        Self {
            providers: Provider::ALL
                .into_iter()
                .map(|p| (p, ProviderConfig::defaults(p)))
                .collect(),
            poll: PollConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }

    pub fn provider(&self, provider: Provider) -> ProviderConfig {
        self.providers
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderConfig::defaults(provider))
    }
}

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::NgnGateway => "https://api.ngn-gateway.example",
        Provider::XafGateway => "https://api.xaf-gateway.example",
        Provider::MobileMoney => "https://api.mobile-money.example",
        Provider::CardBank => "https://api.card-bank.example",
        Provider::Chain => "https://api.chain-custody.example",
    }
}

fn default_minimum(provider: Provider) -> Decimal {
    match provider {
        Provider::NgnGateway => dec!(100),
        Provider::XafGateway => dec!(100),
        Provider::MobileMoney => dec!(100),
        Provider::CardBank => dec!(500),
        Provider::Chain => dec!(10),
    }
}

/// Loads the configuration from the process environment.
///
/// # Errors
///
/// Returns [`PaymentError::Config`] when a numeric or boolean variable does
/// not parse, or when only one half of a client id/secret pair is set.
pub fn fetch_config() -> Result<AppConfig> {
    from_lookup(non_empty_var)
}

/// Builds the configuration from any variable source. Empty values count as absent.
pub fn from_lookup<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{PREFIX}_{name}")).filter(|v| !v.trim().is_empty());

    let timeout = match var("HTTP_TIMEOUT_SECS") {
        Some(v) => Duration::from_secs(parse(&v, "HTTP_TIMEOUT_SECS")?),
        None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
    };

    let mut providers = BTreeMap::new();
    for provider in Provider::ALL {
        let key = |suffix: &str| format!("{}_{suffix}", provider.slug().to_ascii_uppercase());
        let mut cfg = ProviderConfig::defaults(provider);
        cfg.timeout = timeout;
        if let Some(url) = var(&key("BASE_URL")) {
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        cfg.credentials = match provider {
            Provider::NgnGateway | Provider::CardBank => var(&key("SECRET_KEY"))
                .map(|k| Credentials::Bearer(Zeroizing::new(k)))
                .unwrap_or_default(),
            Provider::XafGateway | Provider::MobileMoney => {
                match (var(&key("CLIENT_ID")), var(&key("CLIENT_SECRET"))) {
                    (Some(client_id), Some(secret)) => Credentials::ClientPair {
                        client_id,
                        client_secret: Zeroizing::new(secret),
                    },
                    (None, None) => Credentials::None,
                    (Some(_), None) => {
                        return Err(PaymentError::Config(format!(
                            "{PREFIX}_{} is set but {PREFIX}_{} is missing",
                            key("CLIENT_ID"),
                            key("CLIENT_SECRET")
                        )));
                    }
                    (None, Some(_)) => {
                        return Err(PaymentError::Config(format!(
                            "{PREFIX}_{} is set but {PREFIX}_{} is missing",
                            key("CLIENT_SECRET"),
                            key("CLIENT_ID")
                        )));
                    }
                }
            }
            Provider::Chain => var(&key("API_KEY"))
                .map(|k| Credentials::ApiKey(Zeroizing::new(k)))
                .unwrap_or_default(),
        };
        cfg.webhook_secret = var(&key("WEBHOOK_SECRET")).map(Zeroizing::new);
        if let Some(v) = var(&key("MIN_AMOUNT")) {
            cfg.minimum_amount = parse(&v, &key("MIN_AMOUNT"))?;
        }
        if let Some(v) = var(&key("SIMULATED")) {
            cfg.simulated = parse(&v, &key("SIMULATED"))?;
        }
        providers.insert(provider, cfg);
    }

    let mut poll = PollConfig::default();
    if let Some(v) = var("POLL_INTERVAL_SECS") {
        poll.interval = Duration::from_secs(parse(&v, "POLL_INTERVAL_SECS")?);
    }
    if let Some(v) = var("POLL_TIMEOUT_SECS") {
        poll.timeout = Duration::from_secs(parse(&v, "POLL_TIMEOUT_SECS")?);
    }

    let mut exchange = ExchangeConfig::default();
    if let Some(v) = var("QUOTE_TTL_SECS") {
        exchange.quote_ttl = chrono::Duration::seconds(parse(&v, "QUOTE_TTL_SECS")?);
    }
    if let Some(v) = var("EXCHANGE_FEE_RATE") {
        exchange.fee_rate = parse(&v, "EXCHANGE_FEE_RATE")?;
    }
    for from in Currency::ALL {
        for to in Currency::ALL {
            let name = format!("RATE_{}_{}", from.code(), to.code());
            if from != to
                && let Some(v) = var(&name)
            {
                exchange.rates.insert((from, to), parse(&v, &name)?);
            }
        }
    }

    Ok(AppConfig {
        providers,
        poll,
        exchange,
    })
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PaymentError::Config(format!("{PREFIX}_{name} has an invalid value")))
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_env_vars() {
        let config = load(&[]).unwrap();
        assert_eq!(config.providers.len(), 5);
        let ngn = config.provider(Provider::NgnGateway);
        assert!(ngn.credentials.is_none());
        assert!(ngn.webhook_secret.is_none());
        assert_eq!(ngn.minimum_amount, dec!(100));
        assert_eq!(config.poll, PollConfig::default());
    }

    #[test]
    fn test_loads_credentials_per_scheme() {
        let config = load(&[
            ("WALLETRAIL_NGN_GATEWAY_SECRET_KEY", "sk_test_abc"),
            ("WALLETRAIL_XAF_GATEWAY_CLIENT_ID", "client-1"),
            ("WALLETRAIL_XAF_GATEWAY_CLIENT_SECRET", "shh"),
            ("WALLETRAIL_CHAIN_API_KEY", "chain-key"),
            ("WALLETRAIL_CHAIN_WEBHOOK_SECRET", "whsec"),
        ])
        .unwrap();
        assert!(matches!(
            config.provider(Provider::NgnGateway).credentials,
            Credentials::Bearer(ref k) if k.as_str() == "sk_test_abc"
        ));
        assert!(matches!(
            config.provider(Provider::XafGateway).credentials,
            Credentials::ClientPair { ref client_id, .. } if client_id == "client-1"
        ));
        assert!(matches!(
            config.provider(Provider::Chain).credentials,
            Credentials::ApiKey(_)
        ));
        assert_eq!(
            config
                .provider(Provider::Chain)
                .webhook_secret
                .as_deref()
                .map(String::as_str),
            Some("whsec")
        );
    }

    #[test]
    fn test_rejects_client_id_without_secret() {
        let err = load(&[("WALLETRAIL_MOBILE_MONEY_CLIENT_ID", "id-only")]).unwrap_err();
        assert!(err.to_string().contains("MOBILE_MONEY_CLIENT_SECRET is missing"));
    }

    #[test]
    fn test_rejects_secret_without_client_id() {
        let err = load(&[("WALLETRAIL_XAF_GATEWAY_CLIENT_SECRET", "secret-only")]).unwrap_err();
        assert!(err.to_string().contains("XAF_GATEWAY_CLIENT_ID is missing"));
    }

    #[test]
    fn test_empty_values_treated_as_absent() {
        let config = load(&[
            ("WALLETRAIL_NGN_GATEWAY_SECRET_KEY", ""),
            ("WALLETRAIL_NGN_GATEWAY_BASE_URL", "  "),
        ])
        .unwrap();
        let ngn = config.provider(Provider::NgnGateway);
        assert!(ngn.credentials.is_none());
        assert_eq!(ngn.base_url, "https://api.ngn-gateway.example");
    }

    #[test]
    fn test_overrides_numbers_and_rates() {
        let config = load(&[
            ("WALLETRAIL_CARD_BANK_MIN_AMOUNT", "750"),
            ("WALLETRAIL_CHAIN_SIMULATED", "true"),
            ("WALLETRAIL_POLL_TIMEOUT_SECS", "30"),
            ("WALLETRAIL_RATE_NGN_USDT", "0.0007"),
            ("WALLETRAIL_QUOTE_TTL_SECS", "15"),
        ])
        .unwrap();
        assert_eq!(config.provider(Provider::CardBank).minimum_amount, dec!(750));
        assert!(config.provider(Provider::Chain).simulated);
        assert_eq!(config.poll.timeout, Duration::from_secs(30));
        assert_eq!(
            config.exchange.rates[&(Currency::Ngn, Currency::Usdt)],
            dec!(0.0007)
        );
        assert_eq!(config.exchange.quote_ttl, chrono::Duration::seconds(15));
    }

    #[test]
    fn test_rejects_unparseable_numbers() {
        let err = load(&[("WALLETRAIL_POLL_INTERVAL_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, PaymentError::Config(_)));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = load(&[("WALLETRAIL_CARD_BANK_SECRET_KEY", "ck_live_topsecret")]).unwrap();
        let printed = format!("{:?}", config.provider(Provider::CardBank));
        assert!(!printed.contains("topsecret"));
        assert!(printed.contains("<redacted>"));
    }
}

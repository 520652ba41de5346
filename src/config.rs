use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

use crate::domain::{Currency, Ledger, DEFAULT_LOCK_TIMEOUT};
use crate::rates::{
    ExchangeRateApi, RateCache, SystemClock, DEFAULT_API_URL, DEFAULT_CAPACITY, DEFAULT_TIMEOUT,
    DEFAULT_TTL_SECS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub webhook_secret: Option<String>,
    pub rate_api_url: String,
    pub rate_api_key: String,
    pub rate_api_timeout: Duration,
    pub rate_cache_ttl: Duration,
    pub rate_cache_capacity: usize,
    pub settlement_currency: Currency,
    pub wallet_lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            webhook_secret: None,
            rate_api_url: DEFAULT_API_URL.to_string(),
            rate_api_key: String::new(),
            rate_api_timeout: DEFAULT_TIMEOUT,
            rate_cache_ttl: Duration::from_secs(DEFAULT_TTL_SECS as u64),
            rate_cache_capacity: DEFAULT_CAPACITY,
            settlement_currency: Currency::default(),
            wallet_lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key/value source. Unset keys keep their defaults,
    /// set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        Ok(Config {
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            rate_api_url: lookup("RATE_API_URL").unwrap_or(defaults.rate_api_url),
            rate_api_key: lookup("RATE_API_KEY").unwrap_or(defaults.rate_api_key),
            rate_api_timeout: parsed(&lookup, "RATE_API_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_api_timeout),
            rate_cache_ttl: parsed(&lookup, "RATE_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_cache_ttl),
            rate_cache_capacity: parsed(&lookup, "RATE_CACHE_CAPACITY")?
                .unwrap_or(defaults.rate_cache_capacity),
            settlement_currency: parsed(&lookup, "SETTLEMENT_CURRENCY")?
                .unwrap_or(defaults.settlement_currency),
            wallet_lock_timeout: parsed(&lookup, "WALLET_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.wallet_lock_timeout),
        })
    }

    pub fn webhook_secret(&self) -> Result<&str> {
        self.webhook_secret
            .as_deref()
            .ok_or(anyhow!("WEBHOOK_SECRET is required to verify deposit notifications"))
    }

    pub fn build_ledger(&self) -> Ledger {
        Ledger::with_settings(self.settlement_currency, self.wallet_lock_timeout)
    }

    pub fn build_rate_cache(&self) -> Result<RateCache> {
        let ttl = chrono::Duration::from_std(self.rate_cache_ttl)
            .context("RATE_CACHE_TTL_SECS is out of range")?;
        let provider = ExchangeRateApi::new(
            self.rate_api_url.clone(),
            self.rate_api_key.clone(),
            self.rate_api_timeout,
        )
        .context("Can't build the rate source client")?;
        Ok(RateCache::with_settings(
            Arc::new(provider),
            Arc::new(SystemClock),
            ttl,
            self.rate_cache_capacity,
        ))
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {key}: `{value}`"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_unset_keys_use_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.rate_cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.rate_cache_capacity, 100);
        assert_eq!(config.settlement_currency, Currency::Ghs);
        assert!(config.webhook_secret().is_err());
    }

    #[test]
    fn test_values_are_read_and_trimmed() {
        let config = Config::from_lookup(lookup_from(&[
            ("WEBHOOK_SECRET", "sk_live"),
            ("RATE_API_KEY", "key"),
            ("RATE_API_TIMEOUT_SECS", " 2 "),
            ("RATE_CACHE_TTL_SECS", "60"),
            ("RATE_CACHE_CAPACITY", "10"),
            ("SETTLEMENT_CURRENCY", "usd"),
            ("WALLET_LOCK_TIMEOUT_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.webhook_secret().unwrap(), "sk_live");
        assert_eq!(config.rate_api_key, "key");
        assert_eq!(config.rate_api_timeout, Duration::from_secs(2));
        assert_eq!(config.rate_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.rate_cache_capacity, 10);
        assert_eq!(config.settlement_currency, Currency::Usd);
        assert_eq!(config.wallet_lock_timeout, Duration::from_secs(1));
        assert_eq!(config.build_ledger().settlement_currency(), Currency::Usd);
    }

    #[test]
    fn test_rate_cache_is_built_from_settings() {
        let config = Config::from_lookup(lookup_from(&[("RATE_CACHE_CAPACITY", "3")])).unwrap();

        let cache = config.build_rate_cache().unwrap();

        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        for (key, value) in [
            ("RATE_CACHE_CAPACITY", "many"),
            ("SETTLEMENT_CURRENCY", "NGN"),
            ("WALLET_LOCK_TIMEOUT_MS", "-1"),
        ] {
            let error = Config::from_lookup(lookup_from(&[(key, value)])).unwrap_err();
            assert!(error.to_string().contains(key), "{error}");
        }
    }
}

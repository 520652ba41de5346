use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::{Currency, Decimal};

pub const DEFAULT_API_URL: &str = "https://v6.exchangerate-api.com/v6/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum RateError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Rate source answered with status {0}")]
    Status(u16),
    #[error("Rate source has no {from}/{to} rate")]
    MissingPair { from: Currency, to: Currency },
    #[error("Rate source returned unusable rate {0}")]
    InvalidRate(Decimal),
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// How many units of `to` one unit of `from` buys.
    async fn fetch_rate(&self, from: Currency, to: Currency) -> Result<Decimal, RateError>;
}

/// Body of `GET {base}{key}/latest/{FROM}`.
#[derive(serde::Deserialize, Debug)]
struct LatestRates {
    #[serde(alias = "conversion_rates")]
    rates: HashMap<String, Decimal>,
}

/// HTTP client for an exchangerate-api compatible source.
#[derive(Clone, Debug)]
pub struct ExchangeRateApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ExchangeRateApi {
    /// `timeout` bounds every request, connection included.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RateError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(ExchangeRateApi {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn latest_url(&self, from: Currency) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.api_key.is_empty() {
            format!("{base}/latest/{from}")
        } else {
            format!("{base}/{}/latest/{from}", self.api_key)
        }
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApi {
    async fn fetch_rate(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        let url = self.latest_url(from);
        debug!(%from, %to, "Fetching exchange rate");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RateError::Status(response.status().as_u16()));
        }

        let latest = response.json::<LatestRates>().await?;
        let rate = latest
            .rates
            .get(to.code())
            .copied()
            .ok_or(RateError::MissingPair { from, to })?;
        if rate <= Decimal::ZERO {
            return Err(RateError::InvalidRate(rate));
        }
        Ok(rate)
    }
}

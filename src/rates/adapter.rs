use std::sync::Arc;

use tracing::warn;

use super::RateProvider;
use crate::domain::{Currency, Decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    Provider,
    Fallback,
}

/// Approximate market rates used when the rate source can't answer.
/// Reciprocal pairs are deliberately not exact inverses of each other.
pub fn fallback_rate(from: Currency, to: Currency) -> Decimal {
    use Currency::*;

    match (from, to) {
        (Ghs, Usd) => Decimal::new(12, 2),
        (Ghs, Eur) => Decimal::new(11, 2),
        (Ghs, Gbp) => Decimal::new(95, 3),
        (Usd, Ghs) => Decimal::new(833, 2),
        (Eur, Ghs) => Decimal::new(909, 2),
        (Gbp, Ghs) => Decimal::new(1053, 2),
        (Usd, Eur) => Decimal::new(92, 2),
        (Usd, Gbp) => Decimal::new(79, 2),
        (Eur, Usd) => Decimal::new(109, 2),
        (Eur, Gbp) => Decimal::new(86, 2),
        (Gbp, Usd) => Decimal::new(127, 2),
        (Gbp, Eur) => Decimal::new(116, 2),
        _ => Decimal::ONE,
    }
}

/// Wraps a [`RateProvider`] so that every lookup yields a rate.
#[derive(Clone)]
pub struct RateAdapter {
    provider: Arc<dyn RateProvider>,
}

impl RateAdapter {
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        Self { provider }
    }

    pub async fn rate(&self, from: Currency, to: Currency) -> (Decimal, RateSource) {
        if from == to {
            return (Decimal::ONE, RateSource::Provider);
        }
        match self.provider.fetch_rate(from, to).await {
            Ok(rate) => (rate, RateSource::Provider),
            Err(e) => {
                let rate = fallback_rate(from, to);
                warn!(%from, %to, %rate, "Rate source unavailable, using fallback: {e}");
                (rate, RateSource::Fallback)
            }
        }
    }
}

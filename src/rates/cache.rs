use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::{RateAdapter, RateProvider, RateSource};
use crate::domain::{Currency, Decimal};

pub const DEFAULT_TTL_SECS: i64 = 30 * 60;
pub const DEFAULT_CAPACITY: usize = 100;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(serde::Serialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Slot {
    rate: ExchangeRate,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Entries {
    slots: HashMap<(Currency, Currency), Slot>,
    tick: u64,
    stats: CacheStats,
}

impl Entries {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Memoizes [`RateAdapter`] answers for a fixed time-to-live.
///
/// Holds at most `capacity` pairs; expired pairs go first, then the least recently used.
/// The entry lock is never held across the provider call, so two callers missing the
/// same pair may both fetch it.
pub struct RateCache {
    adapter: RateAdapter,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<Entries>,
}

impl RateCache {
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        RateCache::with_settings(
            provider,
            Arc::new(SystemClock),
            Duration::seconds(DEFAULT_TTL_SECS),
            DEFAULT_CAPACITY,
        )
    }

    pub fn with_settings(
        provider: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        RateCache {
            adapter: RateAdapter::new(provider),
            clock,
            ttl,
            capacity,
            entries: Mutex::default(),
        }
    }

    /// Always answers: same-currency pairs are exactly 1, anything the source can't
    /// provide comes from the fallback table.
    pub async fn get_rate(&self, from: Currency, to: Currency) -> Decimal {
        if from == to {
            return Decimal::ONE;
        }
        if let Some(rate) = self.cached(from, to) {
            return rate;
        }

        let (rate, source) = self.adapter.rate(from, to).await;
        self.store(from, to, rate, source);
        rate
    }

    /// Converts `amount` of `from` into `to`.
    pub async fn convert(&self, amount: Decimal, from: Currency, to: Currency) -> Decimal {
        amount * self.get_rate(from, to).await
    }

    /// The live entry for a pair, if any. Doesn't count as a use.
    pub fn peek(&self, from: Currency, to: Currency) -> Option<ExchangeRate> {
        let now = self.clock.now();
        self.entries
            .lock()
            .slots
            .get(&(from, to))
            .map(|slot| slot.rate.clone())
            .filter(|rate| !rate.is_expired(now))
    }

    pub fn clear(&self) {
        self.entries.lock().slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.slots.len(),
            ..entries.stats
        }
    }

    fn cached(&self, from: Currency, to: Currency) -> Option<Decimal> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let tick = entries.touch();
        let hit = match entries.slots.get_mut(&(from, to)) {
            Some(slot) if !slot.rate.is_expired(now) => {
                slot.last_used = tick;
                Some(slot.rate.rate)
            }
            _ => None,
        };
        match hit {
            Some(_) => entries.stats.hits += 1,
            None => entries.stats.misses += 1,
        }
        hit
    }

    fn store(&self, from: Currency, to: Currency, rate: Decimal, source: RateSource) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if source == RateSource::Fallback {
            entries.stats.fallbacks += 1;
        }
        if self.capacity == 0 {
            return;
        }

        let key = (from, to);
        if !entries.slots.contains_key(&key) && entries.slots.len() >= self.capacity {
            entries.slots.retain(|_, slot| !slot.rate.is_expired(now));
        }
        if !entries.slots.contains_key(&key) && entries.slots.len() >= self.capacity {
            let oldest = entries
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| *key);
            if let Some(oldest) = oldest {
                debug!(from = %oldest.0, to = %oldest.1, "Evicting exchange rate");
                entries.slots.remove(&oldest);
            }
        }

        let last_used = entries.touch();
        entries.slots.insert(
            key,
            Slot {
                rate: ExchangeRate {
                    from,
                    to,
                    rate,
                    fetched_at: now,
                    expires_at: now + self.ttl,
                },
                last_used,
            },
        );
    }
}

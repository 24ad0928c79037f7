//! Numbering service: strict or range-cached allocation over a
//! [`CounterStore`].
//!
//! The cached strategy keeps every reserved range in one map behind one
//! async mutex, held across the reservation round trip so two callers never
//! reserve for the same key at once. Ranges are lost on restart, so cached
//! numbering may leave gaps; strict numbering never does.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tenantgrid_core::config::NumberingConfig;
use tokio::sync::Mutex;

use crate::error::{NumberingError, NumberingResult};
use crate::sequence::{SequenceConfig, SequenceKey};
use crate::store::CounterStore;

const DEFAULT_RANGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One durable increment per number. Gap-free.
    Strict,
    /// Reserve `range_size` numbers per durable increment.
    Cached { range_size: u64 },
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Cached {
            range_size: DEFAULT_RANGE_SIZE,
        }
    }
}

impl Strategy {
    /// Build from the `[numbering]` section.
    pub fn from_config(config: &NumberingConfig) -> NumberingResult<Self> {
        let strategy = match config.strategy.as_deref().map(str::trim) {
            None | Some("cached") => Strategy::Cached {
                range_size: config.range_size.unwrap_or(DEFAULT_RANGE_SIZE),
            },
            Some("strict") => Strategy::Strict,
            Some(other) => {
                return Err(NumberingError::InvalidConfig(format!(
                    "unknown numbering strategy '{other}'"
                )));
            }
        };
        if strategy == (Strategy::Cached { range_size: 0 }) {
            return Err(NumberingError::InvalidConfig(
                "range_size must be at least 1".to_string(),
            ));
        }
        Ok(strategy)
    }
}

/// Numbers reserved in storage but not yet handed out.
#[derive(Debug, Clone, Copy)]
struct Range {
    next: u64,
    remaining: u64,
}

impl Range {
    fn take(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.next;
        self.next = self.next.saturating_add(1);
        self.remaining -= 1;
        Some(value)
    }
}

pub struct NumberingService {
    store: Arc<dyn CounterStore>,
    strategy: Strategy,
    ranges: Mutex<HashMap<String, Range>>,
}

impl NumberingService {
    pub fn new(store: Arc<dyn CounterStore>, strategy: Strategy) -> NumberingResult<Self> {
        if strategy == (Strategy::Cached { range_size: 0 }) {
            return Err(NumberingError::InvalidConfig(
                "range_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            strategy,
            ranges: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(store: Arc<dyn CounterStore>, config: &NumberingConfig) -> NumberingResult<Self> {
        Self::new(store, Strategy::from_config(config)?)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Allocate the next number and format it, e.g. `INV-2024-00001`.
    pub async fn next_number(
        &self,
        tenant_id: &str,
        config: &SequenceConfig,
        date: NaiveDate,
    ) -> NumberingResult<String> {
        let key = SequenceKey::new(tenant_id, config, date)?;
        let value = self.allocate(&key).await?;
        Ok(config.format(key.period.as_deref(), value))
    }

    /// [`next_number`](Self::next_number) for today's UTC date.
    pub async fn next_number_today(
        &self,
        tenant_id: &str,
        config: &SequenceConfig,
    ) -> NumberingResult<String> {
        self.next_number(tenant_id, config, Utc::now().date_naive())
            .await
    }

    /// Allocate the next raw counter value.
    pub async fn next_value(
        &self,
        tenant_id: &str,
        config: &SequenceConfig,
        date: NaiveDate,
    ) -> NumberingResult<u64> {
        let key = SequenceKey::new(tenant_id, config, date)?;
        self.allocate(&key).await
    }

    /// Administrative override: set the durable counter to `value`, so the
    /// next number issued is greater than `value`. Drops any cached range
    /// for the key.
    pub async fn set_next_number(
        &self,
        tenant_id: &str,
        config: &SequenceConfig,
        date: NaiveDate,
        value: u64,
    ) -> NumberingResult<()> {
        let key = SequenceKey::new(tenant_id, config, date)?;
        let mut ranges = self.ranges.lock().await;
        self.store.set(&key, value).await?;
        ranges.remove(&key.cache_key());
        tracing::info!(tenant_id, sequence = %key, value, "sequence counter overridden");
        Ok(())
    }

    /// Durable counter value. Under the cached strategy this is the top of
    /// the last reserved range, not the last number handed out.
    pub async fn peek_current(
        &self,
        tenant_id: &str,
        config: &SequenceConfig,
        date: NaiveDate,
    ) -> NumberingResult<u64> {
        let key = SequenceKey::new(tenant_id, config, date)?;
        self.store.current(&key).await
    }

    /// Drop every cached range of a tenant. Returns the number dropped.
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        let scope = SequenceKey::tenant_scope(tenant_id);
        let mut ranges = self.ranges.lock().await;
        let before = ranges.len();
        ranges.retain(|key, _| !key.starts_with(&scope));
        let dropped = before - ranges.len();
        if dropped > 0 {
            tracing::debug!(tenant_id, dropped, "cached sequence ranges invalidated");
        }
        dropped
    }

    async fn allocate(&self, key: &SequenceKey) -> NumberingResult<u64> {
        match self.strategy {
            Strategy::Strict => self.store.increment(key, 1).await,
            Strategy::Cached { range_size } => self.allocate_cached(key, range_size).await,
        }
    }

    async fn allocate_cached(&self, key: &SequenceKey, range_size: u64) -> NumberingResult<u64> {
        let cache_key = key.cache_key();
        let mut ranges = self.ranges.lock().await;
        if let Some(value) = ranges.get_mut(&cache_key).and_then(Range::take) {
            return Ok(value);
        }

        let ceiling = self.store.increment(key, range_size).await?;
        let mut range = Range {
            next: ceiling.saturating_sub(range_size) + 1,
            remaining: range_size,
        };
        tracing::debug!(sequence = %key, first = range.next, last = ceiling, "reserved sequence range");

        let value = range
            .take()
            .ok_or_else(|| NumberingError::Overflow(key.to_string()))?;
        // Only the newest period of a series stays cached; an older one
        // reserves a fresh range if it is ever asked for again.
        let series = key.series_scope();
        ranges.retain(|k, _| !k.starts_with(&series));
        ranges.insert(cache_key, range);
        Ok(value)
    }
}

impl fmt::Debug for NumberingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberingService")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

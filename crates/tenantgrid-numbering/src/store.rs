//! Durable counters behind the numbering service.

use std::future::Future;
use std::pin::Pin;

use tenantgrid_state::StateStore;

use crate::error::NumberingResult;
use crate::sequence::SequenceKey;

pub type CounterFuture<'a, T> = Pin<Box<dyn Future<Output = NumberingResult<T>> + Send + 'a>>;

/// Atomic counter storage. `increment` must be atomic at the storage layer:
/// concurrent callers never observe the same result.
pub trait CounterStore: Send + Sync {
    /// Add `by` to the counter (creating it at 0 first) and return the new
    /// value.
    fn increment<'a>(&'a self, key: &'a SequenceKey, by: u64) -> CounterFuture<'a, u64>;

    /// Overwrite the counter.
    fn set<'a>(&'a self, key: &'a SequenceKey, value: u64) -> CounterFuture<'a, ()>;

    /// Current value; 0 for a counter that was never touched.
    fn current<'a>(&'a self, key: &'a SequenceKey) -> CounterFuture<'a, u64>;
}

impl CounterStore for StateStore {
    fn increment<'a>(&'a self, key: &'a SequenceKey, by: u64) -> CounterFuture<'a, u64> {
        Box::pin(async move { Ok(self.increment_sequence(&key.table_key(), by)?) })
    }

    fn set<'a>(&'a self, key: &'a SequenceKey, value: u64) -> CounterFuture<'a, ()> {
        Box::pin(async move { Ok(self.set_sequence(&key.table_key(), value)?) })
    }

    fn current<'a>(&'a self, key: &'a SequenceKey) -> CounterFuture<'a, u64> {
        Box::pin(async move { Ok(self.get_sequence(&key.table_key())?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{ResetPeriod, SequenceConfig};
    use chrono::NaiveDate;

    fn key(tenant: &str) -> SequenceKey {
        let cfg = SequenceConfig::new("INV", ResetPeriod::Yearly);
        SequenceKey::new(tenant, &cfg, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn state_store_counters() {
        let store = StateStore::open_in_memory().unwrap();
        let k = key("t1");
        assert_eq!(store.current(&k).await.unwrap(), 0);
        assert_eq!(store.increment(&k, 1).await.unwrap(), 1);
        assert_eq!(store.increment(&k, 10).await.unwrap(), 11);

        store.set(&k, 100).await.unwrap();
        assert_eq!(store.current(&k).await.unwrap(), 100);
        assert_eq!(store.current(&key("t2")).await.unwrap(), 0);
    }
}

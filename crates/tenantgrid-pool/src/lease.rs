use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::backend::PhysicalPool;
use crate::managed::ManagedPool;

/// Holds one active reference on a tenant pool for the duration of a unit of
/// work. The reference is released on drop; while any lease is alive the
/// pool is never evicted for idleness or ill health.
pub struct PoolLease<P: PhysicalPool> {
    managed: Arc<ManagedPool<P>>,
}

impl<P: PhysicalPool> PoolLease<P> {
    /// Wrap a pool whose reference has already been acquired.
    pub(crate) fn new(managed: Arc<ManagedPool<P>>) -> Self {
        Self { managed }
    }

    pub fn managed(&self) -> &Arc<ManagedPool<P>> {
        &self.managed
    }
}

impl<P: PhysicalPool> Deref for PoolLease<P> {
    type Target = ManagedPool<P>;

    fn deref(&self) -> &Self::Target {
        &self.managed
    }
}

impl<P: PhysicalPool> Drop for PoolLease<P> {
    fn drop(&mut self) {
        self.managed.release_ref();
    }
}

impl<P: PhysicalPool> fmt::Debug for PoolLease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolLease").field(&self.managed).finish()
    }
}

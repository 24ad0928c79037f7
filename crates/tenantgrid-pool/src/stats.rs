use serde::Serialize;

use crate::backend::ConnectionStats;

/// Point-in-time view of one tenant pool.
#[derive(Debug, Clone, Serialize)]
pub struct TenantPoolStats {
    pub tenant_id: String,
    pub slug: String,
    pub connections: ConnectionStats,
    pub active_refs: usize,
    pub idle_ms: u64,
    pub healthy: bool,
}

/// Aggregate view across every tenant pool, sorted by tenant id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    pub total_pools: usize,
    pub total_connections: u64,
    pub idle_connections: u64,
    pub acquired_connections: u64,
    pub tenants: Vec<TenantPoolStats>,
}

impl ManagerStats {
    pub(crate) fn from_tenants(mut tenants: Vec<TenantPoolStats>) -> Self {
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        let mut stats = ManagerStats {
            total_pools: tenants.len(),
            ..Default::default()
        };
        for t in &tenants {
            stats.total_connections += u64::from(t.connections.total);
            stats.idle_connections += u64::from(t.connections.idle);
            stats.acquired_connections += u64::from(t.connections.acquired);
        }
        stats.tenants = tenants;
        stats
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantPoolStats> {
        self.tenants.iter().find(|t| t.tenant_id == tenant_id)
    }

    pub fn unhealthy_pools(&self) -> usize {
        self.tenants.iter().filter(|t| !t.healthy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str, total: u32, acquired: u32, healthy: bool) -> TenantPoolStats {
        TenantPoolStats {
            tenant_id: id.to_string(),
            slug: id.to_string(),
            connections: ConnectionStats {
                total,
                idle: total - acquired,
                acquired,
            },
            active_refs: 0,
            idle_ms: 0,
            healthy,
        }
    }

    #[test]
    fn aggregates_and_sorts() {
        let stats = ManagerStats::from_tenants(vec![
            tenant("b", 4, 1, true),
            tenant("a", 2, 0, false),
        ]);
        assert_eq!(stats.total_pools, 2);
        assert_eq!(stats.total_connections, 6);
        assert_eq!(stats.idle_connections, 5);
        assert_eq!(stats.acquired_connections, 1);
        assert_eq!(stats.tenants[0].tenant_id, "a");
        assert_eq!(stats.unhealthy_pools(), 1);
        assert!(stats.tenant("b").unwrap().healthy);
    }

    #[test]
    fn serializes_to_json() {
        let stats = ManagerStats::from_tenants(vec![tenant("a", 2, 0, true)]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_pools"], 1);
        assert_eq!(json["tenants"][0]["connections"]["idle"], 2);
    }
}

use std::fmt;

use tenantgrid_core::TenantStatus;
use tenantgrid_state::StateError;
use thiserror::Error;

/// Step of pool creation that failed with an infrastructure error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ParseDsn,
    Open,
    Ping,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ParseDsn => "parse dsn",
            Stage::Open => "open pool",
            Stage::Ping => "ping",
        })
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant {tenant_id} is not active (status: {status})")]
    TenantNotActive {
        tenant_id: String,
        status: TenantStatus,
    },

    #[error("max pool limit reached ({limit})")]
    MaxPoolLimit { limit: usize },

    #[error("tenant directory lookup failed for {tenant_id}: {source}")]
    Directory {
        tenant_id: String,
        #[source]
        source: StateError,
    },

    #[error("tenant directory listing failed: {0}")]
    DirectoryList(#[source] StateError),

    #[error("{stage} failed for tenant {tenant_id}: {message}")]
    Infrastructure {
        tenant_id: String,
        stage: Stage,
        message: String,
    },

    #[error("invalid pool manager configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("pool manager is shut down")]
    Closed,
}

impl PoolError {
    pub(crate) fn infrastructure(tenant_id: &str, stage: Stage, message: impl Into<String>) -> Self {
        PoolError::Infrastructure {
            tenant_id: tenant_id.to_string(),
            stage,
            message: message.into(),
        }
    }

    /// Map a directory lookup failure, keeping the not-found classification.
    pub(crate) fn from_lookup(tenant_id: &str, source: StateError) -> Self {
        if source.is_not_found() {
            PoolError::TenantNotFound(tenant_id.to_string())
        } else {
            PoolError::Directory {
                tenant_id: tenant_id.to_string(),
                source,
            }
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

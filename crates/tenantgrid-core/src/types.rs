//! Shared types used across TenantGrid crates.
//!
//! A [`Tenant`] describes one customer: its identity, the physical database
//! it lives in, its lifecycle status and its plan. Records are created by the
//! tenant directory and treated as immutable snapshots everywhere else.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque tenant identifier assigned by the directory.
pub type TenantId = String;

/// Returned when a status or plan string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle status of a tenant. Only `Active` tenants may acquire a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TenantStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            _ => Err(UnknownVariant {
                kind: "tenant status",
                value: s.to_string(),
            }),
        }
    }
}

// ── Plan ───────────────────────────────────────────────────────────

/// Commercial plan. Informational only; the pool manager does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    #[default]
    Standard,
    Premium,
    Enterprise,
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Standard => "standard",
            TenantPlan::Premium => "premium",
            TenantPlan::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for TenantPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantPlan {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(TenantPlan::Standard),
            "premium" => Ok(TenantPlan::Premium),
            "enterprise" => Ok(TenantPlan::Enterprise),
            _ => Err(UnknownVariant {
                kind: "tenant plan",
                value: s.to_string(),
            }),
        }
    }
}

// ── Tenant ─────────────────────────────────────────────────────────

/// One tenant and the location of its isolated database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    /// Assigned by the directory on creation; empty before that.
    pub id: TenantId,
    /// URL-safe unique identifier (e.g. `acme-corp`).
    pub slug: String,
    pub display_name: String,
    pub db_name: String,
    pub db_host: String,
    pub db_port: u16,
    pub status: TenantStatus,
    pub plan: TenantPlan,
    /// Free-form settings, opaque to the core.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    /// Unix timestamp (seconds) when the tenant was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl Tenant {
    /// Build a not-yet-persisted tenant. The directory assigns `id` and the
    /// timestamps on create.
    pub fn new(slug: &str, display_name: &str, db_host: &str, db_port: u16, db_name: &str) -> Self {
        Self {
            id: String::new(),
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            db_name: db_name.to_string(),
            db_host: db_host.to_string(),
            db_port,
            status: TenantStatus::Active,
            plan: TenantPlan::Standard,
            settings: HashMap::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_plan(self, plan: TenantPlan) -> Self {
        Self { plan, ..self }
    }

    pub fn with_status(self, status: TenantStatus) -> Self {
        Self { status, ..self }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Check that a slug is URL-safe: lowercase ASCII letters, digits and `-`,
/// not starting or ending with `-`.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("slug must not be empty".to_string());
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(format!("slug '{slug}' must not start or end with '-'"));
    }
    if let Some(c) = slug
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(format!("slug '{slug}' contains invalid character '{c}'"));
    }
    Ok(())
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

//! Sequence configuration, keys and number formatting.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{NumberingError, NumberingResult};

/// When a sequence starts over from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    #[default]
    Never,
    Yearly,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Never => "never",
            ResetPeriod::Yearly => "yearly",
            ResetPeriod::Monthly => "monthly",
        }
    }

    /// Period segment for `date`: none, `YYYY` or `YYYY-MM`.
    pub fn period(&self, date: NaiveDate) -> Option<String> {
        match self {
            ResetPeriod::Never => None,
            ResetPeriod::Yearly => Some(format!("{:04}", date.year())),
            ResetPeriod::Monthly => Some(format!("{:04}-{:02}", date.year(), date.month())),
        }
    }
}

impl fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetPeriod {
    type Err = NumberingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(ResetPeriod::Never),
            "yearly" => Ok(ResetPeriod::Yearly),
            "monthly" => Ok(ResetPeriod::Monthly),
            other => Err(NumberingError::InvalidConfig(format!(
                "unknown reset period '{other}'"
            ))),
        }
    }
}

fn default_padding() -> usize {
    5
}

/// One numbered document type, e.g. invoices with prefix `INV`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub prefix: String,
    #[serde(default)]
    pub reset: ResetPeriod,
    /// Minimum counter width; longer values are printed in full.
    #[serde(default = "default_padding")]
    pub padding: usize,
}

impl SequenceConfig {
    pub fn new(prefix: impl Into<String>, reset: ResetPeriod) -> Self {
        Self {
            prefix: prefix.into(),
            reset,
            padding: default_padding(),
        }
    }

    pub fn with_padding(self, padding: usize) -> Self {
        Self { padding, ..self }
    }

    pub fn validate(&self) -> NumberingResult<()> {
        if self.prefix.is_empty() {
            return Err(NumberingError::InvalidConfig(
                "prefix must not be empty".to_string(),
            ));
        }
        if self.prefix.contains('/') {
            return Err(NumberingError::InvalidConfig(format!(
                "prefix '{}' must not contain '/'",
                self.prefix
            )));
        }
        Ok(())
    }

    pub fn format(&self, period: Option<&str>, value: u64) -> String {
        format_number(&self.prefix, period, value, self.padding)
    }
}

/// `PREFIX[-PERIOD]-NNNNN`.
pub fn format_number(prefix: &str, period: Option<&str>, value: u64, padding: usize) -> String {
    match period {
        Some(period) => format!("{prefix}-{period}-{value:0padding$}"),
        None => format!("{prefix}-{value:0padding$}"),
    }
}

/// Identity of one durable counter. Always scoped by tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub tenant_id: String,
    pub prefix: String,
    pub period: Option<String>,
}

impl SequenceKey {
    pub fn new(tenant_id: &str, config: &SequenceConfig, date: NaiveDate) -> NumberingResult<Self> {
        config.validate()?;
        if tenant_id.is_empty() || tenant_id.contains('/') {
            return Err(NumberingError::InvalidKey(format!(
                "tenant id '{tenant_id}' must be non-empty and free of '/'"
            )));
        }
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            prefix: config.prefix.clone(),
            period: config.reset.period(date),
        })
    }

    /// Key of the in-memory range cache.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.tenant_id,
            self.prefix,
            self.period.as_deref().unwrap_or("-")
        )
    }

    /// Key of the durable counter row.
    pub fn table_key(&self) -> String {
        self.cache_key()
    }

    /// Prefix shared by every period of this tenant's sequence.
    pub(crate) fn series_scope(&self) -> String {
        format!("{}/{}/", self.tenant_id, self.prefix)
    }

    /// Prefix shared by every cache key of `tenant_id`.
    pub(crate) fn tenant_scope(tenant_id: &str) -> String {
        format!("{tenant_id}/")
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

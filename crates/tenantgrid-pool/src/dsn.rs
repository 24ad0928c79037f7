//! Connection-string construction.
//!
//! Tenants differ only in host, port and database; user and password are
//! shared. User, password and database name are percent-encoded.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tenantgrid_core::Tenant;

pub const DSN_SCHEME: &str = "postgres";

/// Escapes everything but RFC 3986 unreserved characters, which is safe in
/// both userinfo and a path segment.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// libpq `sslmode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(format!("unknown ssl mode '{other}'")),
        }
    }
}

/// Build a DSN with `sslmode=disable`.
pub fn build_dsn(tenant: &Tenant, user: &str, password: &str) -> String {
    build_dsn_with_ssl(tenant, user, password, SslMode::Disable)
}

pub fn build_dsn_with_ssl(tenant: &Tenant, user: &str, password: &str, ssl_mode: SslMode) -> String {
    // Bare IPv6 literals need brackets to be told apart from the port.
    let host = if tenant.db_host.contains(':') && !tenant.db_host.starts_with('[') {
        format!("[{}]", tenant.db_host)
    } else {
        tenant.db_host.clone()
    };
    format!(
        "{DSN_SCHEME}://{}:{}@{}:{}/{}?sslmode={}",
        utf8_percent_encode(user, COMPONENT),
        utf8_percent_encode(password, COMPONENT),
        host,
        tenant.db_port,
        utf8_percent_encode(&tenant.db_name, COMPONENT),
        ssl_mode,
    )
}

/// Replace the password in a DSN with `***` so it can be logged.
pub fn redact_dsn(dsn: &str) -> String {
    let Some(scheme_end) = dsn.find("://") else {
        return dsn.to_string();
    };
    let rest_start = scheme_end + 3;
    let rest = &dsn[rest_start..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return dsn.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &dsn[..rest_start],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => dsn.to_string(),
    }
}

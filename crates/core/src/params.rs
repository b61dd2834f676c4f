//! Connection parameters
//!
//! A [`ConnectionParameters`] value is the immutable snapshot a session keeps
//! so it can rebuild an equivalent connection (clone or reconnect). Discrete
//! fields and a raw connection string may both be present; the connection
//! string takes precedence when the driver builds its configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named connection fields plus arbitrary extra driver options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Database name (driver keyword `dbname`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Role to connect as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Host name, address, or socket directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Raw connection string (key/value or URL form)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    /// Extra driver options (`application_name`, `sslmode`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ConnectionParameters {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters wrapping a raw connection string.
    pub fn from_dsn(dsn: impl Into<String>) -> Self {
        Self {
            dsn: Some(dsn.into()),
            ..Self::default()
        }
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add an extra driver option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Overlay `incoming` on top of this snapshot.
    ///
    /// Only non-empty incoming values win. When `incoming` carries a
    /// connection string, its other discrete fields and options are ignored
    /// and an incoming password is folded into the connection string.
    pub fn merge(&self, incoming: &ConnectionParameters) -> ConnectionParameters {
        let incoming = match non_empty(&incoming.dsn) {
            Some(dsn) => {
                let dsn = match non_empty(&incoming.password) {
                    Some(password) => dsn_with_password(dsn, password),
                    None => dsn.to_string(),
                };
                ConnectionParameters::from_dsn(dsn)
            }
            None => incoming.clone(),
        };

        let mut merged = self.clone();
        overlay(&mut merged.database, &incoming.database);
        overlay(&mut merged.user, &incoming.user);
        overlay(&mut merged.password, &incoming.password);
        overlay(&mut merged.host, &incoming.host);
        overlay(&mut merged.dsn, &incoming.dsn);
        if incoming.port.is_some() {
            merged.port = incoming.port;
        }
        for (key, value) in &incoming.extra {
            if !value.is_empty() {
                merged.extra.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Render as a driver connection string.
    ///
    /// A stored connection string is returned as-is; otherwise the discrete
    /// fields and options are rendered as quoted `key=value` pairs.
    pub fn to_conninfo(&self) -> String {
        if let Some(dsn) = non_empty(&self.dsn) {
            return dsn.to_string();
        }

        let mut pairs = Vec::new();
        let fields = [
            ("dbname", &self.database),
            ("user", &self.user),
            ("password", &self.password),
            ("host", &self.host),
        ];
        for (key, value) in fields {
            if let Some(value) = non_empty(value) {
                pairs.push(format!("{}={}", key, quote_conninfo_value(value)));
            }
        }
        if let Some(port) = self.port {
            pairs.push(format!("port={}", port));
        }
        for (key, value) in &self.extra {
            pairs.push(format!("{}={}", key, quote_conninfo_value(value)));
        }
        pairs.join(" ")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn overlay(target: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = non_empty(incoming) {
        *target = Some(value.to_string());
    }
}

/// Quote a conninfo value: wrap in single quotes, escaping `\` and `'`.
fn quote_conninfo_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Fold a password into a connection string.
///
/// URL strings get a percent-encoded `password` query parameter; key/value
/// strings get a trailing `password=` pair, which overrides any earlier one.
fn dsn_with_password(dsn: &str, password: &str) -> String {
    let is_url = dsn.starts_with("postgres://") || dsn.starts_with("postgresql://");
    if is_url {
        let sep = if dsn.contains('?') { '&' } else { '?' };
        format!("{}{}password={}", dsn, sep, percent_encode(password))
    } else {
        format!("{} password={}", dsn.trim_end(), quote_conninfo_value(password))
    }
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

//! Connection manager.
//!
//! A [`Session`] owns exactly one physical connection and the facts
//! discovered about it at connect time: resolved database, user, host and
//! port, the server settings, the superuser flag and whether the server is
//! a reduced-capability implementation of the wire protocol.
//!
//! # Usage
//!
//! ```ignore
//! use sqlrun_executor::{ConnectionParameters, ExecutorConfig, Session};
//!
//! let params = ConnectionParameters::from_dsn("postgres://localhost:6875/materialize");
//! let mut session = Session::open(params, ExecutorConfig::default())?;
//!
//! for record in session.run("select 1; select 2", None, None, false) {
//!     let record = record?;
//!     println!("{:?}", record.status);
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use sqlrun_core::{
    ConnectionParameters, Connection, Connector, Error, ResultRecord, ResultSet, Result,
    TransactionStatus,
};
use sqlrun_driver::PgConnector;

use crate::config::{CatalogDialect, ExecutorConfig};
use crate::cursor::ProtocolSafeCursor;
use crate::special::{Dispatch, SpecialCommands, SpecialOutput};
use crate::typecast::{self, Caster, TypeCasters};

const SOCKET_DIRECTORY_QUERY: &str =
    "SELECT setting FROM pg_settings WHERE name = 'unix_socket_directories'";

/// What happened when a fragment was offered to the special-command
/// dispatcher.
pub(crate) enum SpecialAttempt {
    /// Handled; normalize and yield these.
    Handled(Vec<SpecialOutput>),
    /// Handled, but the cursor recorded a protocol violation.
    ProtocolError(String),
    /// Not a special command.
    NotRecognized,
}

/// Everything learned about one physical connection at connect time.
struct ConnectionFacts {
    casters: TypeCasters,
    dbname: Option<String>,
    user: Option<String>,
    host: Option<String>,
    port: Option<String>,
    password: Option<String>,
    extra_args: BTreeMap<String, String>,
    reduced_capability: bool,
    catalog: CatalogDialect,
    server_settings: BTreeMap<String, String>,
    superuser: bool,
    pid: i32,
}

impl ConnectionFacts {
    /// Query `conn` for its facts. Nothing outside `conn` is touched, so a
    /// failure here leaves any session that would own `conn` unchanged.
    fn discover(
        conn: &mut dyn Connection,
        config: &ExecutorConfig,
        merged: &ConnectionParameters,
        incoming: &ConnectionParameters,
    ) -> Result<Self> {
        if conn.is_closed() {
            return Err(Error::interface("connection already closed"));
        }
        conn.set_client_encoding("utf8")?;
        conn.set_autocommit(true)?;
        let empty = TypeCasters::new();

        let reduced_capability = detect_reduced_capability(conn, &empty)?;

        let (dbname, user, mut host, port) = match conn.conninfo() {
            Some(info) => (info.dbname, info.user, info.host, info.port),
            None => (
                merged.database.clone(),
                merged.user.clone(),
                merged.host.clone(),
                merged.port.map(|p| p.to_string()),
            ),
        };
        if host.as_deref().map_or(true, str::is_empty) {
            host = Some(if reduced_capability {
                config.proxy_hostname.clone()
            } else {
                socket_directory(conn, &empty)?
            });
        }

        let server_settings = fetch_server_settings(conn, &empty)?;
        let superuser = matches!(
            server_settings.get("is_superuser").map(String::as_str),
            Some("on") | Some("1") | Some("true")
        );

        let mut casters = TypeCasters::new();
        if !reduced_capability {
            typecast::register_date_typecasters(conn, &mut casters)?;
            typecast::register_hstore_typecaster(conn, &mut casters);
        }

        Ok(Self {
            casters,
            dbname,
            user,
            host,
            port,
            password: incoming.password.clone(),
            extra_args: incoming.extra.clone(),
            reduced_capability,
            catalog: config.catalog.resolve(reduced_capability),
            server_settings,
            superuser,
            pid: 1,
        })
    }
}

/// One authoritative session on one physical connection.
pub struct Session {
    connector: Arc<dyn Connector>,
    config: ExecutorConfig,
    params: ConnectionParameters,
    conn: Box<dyn Connection>,
    facts: ConnectionFacts,
    generation: u64,
    pub(crate) pending_expanded_reset: bool,
}

impl Session {
    /// Connect through `connector`.
    ///
    /// Fails with [`Error::Connection`] if the physical connection cannot be
    /// established. No retry is attempted.
    pub fn connect(
        connector: Arc<dyn Connector>,
        params: ConnectionParameters,
        config: ExecutorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let merged = ConnectionParameters::default().merge(&params);
        let (conn, facts) = establish(connector.as_ref(), &config, &merged, &params)?;

        let session = Self {
            connector,
            config,
            params: merged,
            conn,
            facts,
            generation: 0,
            pending_expanded_reset: false,
        };
        session.announce();
        Ok(session)
    }

    /// Connect with the `tokio-postgres` driver.
    pub fn open(params: ConnectionParameters, config: ExecutorConfig) -> Result<Self> {
        let connector = PgConnector::new(config.wait_interval());
        Self::connect(Arc::new(connector), params, config)
    }

    /// Replace the physical connection.
    ///
    /// `params` is merged over the stored snapshot; non-empty values win.
    /// The replacement is established and fully discovered before the old
    /// connection is closed, so a failure leaves the session as it was.
    pub fn reconnect(&mut self, params: &ConnectionParameters) -> Result<()> {
        let merged = self.params.merge(params);
        let (conn, facts) = establish(self.connector.as_ref(), &self.config, &merged, params)?;

        let mut old = std::mem::replace(&mut self.conn, conn);
        old.close();
        self.facts = facts;
        self.params = merged;
        self.generation += 1;
        tracing::debug!(target: "sqlrun::executor", generation = self.generation, "Replaced connection");
        self.announce();
        Ok(())
    }

    /// A new session on a new physical connection with the same parameters.
    pub fn copy(&self) -> Result<Session> {
        Session::connect(
            Arc::clone(&self.connector),
            self.params.clone(),
            self.config.clone(),
        )
    }

    /// Process-wide setup that follows a committed connection.
    fn announce(&self) {
        let reduced = self.facts.reduced_capability;
        self.connector.install_interrupt_hook(reduced);
        tracing::info!(
            target: "sqlrun::executor",
            dbname = ?self.facts.dbname,
            user = ?self.facts.user,
            host = ?self.facts.host,
            reduced_capability = reduced,
            catalog = ?self.facts.catalog,
            "Session ready"
        );
    }

    /// Consume an operator interrupt that arrived between statements.
    pub(crate) fn take_held_interrupt(&self) -> bool {
        self.connector.take_held_interrupt()
    }

    // =========================================================================
    // Capability detection
    // =========================================================================

    /// Whether the server cannot answer `SELECT 1` without a protocol
    /// violation. Probed once per physical connection, at connect time.
    pub fn is_reduced_capability(&self) -> bool {
        self.facts.reduced_capability
    }

    // =========================================================================
    // Cursors and statements
    // =========================================================================

    /// A fresh cursor on the live connection.
    ///
    /// Fails with [`Error::Interface`] if the connection is closed.
    pub fn cursor(&mut self) -> Result<ProtocolSafeCursor<'_>> {
        if self.conn.is_closed() {
            return Err(Error::interface("connection already closed"));
        }
        Ok(ProtocolSafeCursor::new(&mut *self.conn, &self.facts.casters))
    }

    /// Whether the physical connection is closed.
    pub fn is_connection_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Run one statement as ordinary SQL.
    ///
    /// Notices raised while it ran become the title, oldest first.
    pub fn execute_normal_sql(&mut self, sql: &str) -> Result<ResultRecord> {
        tracing::debug!(target: "sqlrun::executor", sql, "Regular sql statement");
        let mut cursor = ProtocolSafeCursor::new(&mut *self.conn, &self.facts.casters);
        cursor.execute(sql, &[])?;

        let title = cursor.take_notices().concat();
        let title = (!title.is_empty()).then_some(title);

        let (result, status) = if let Some(columns) = cursor.description() {
            let headers: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
            let status = cursor.status_message().map(str::to_owned);
            (Some(ResultSet::new(headers, cursor.into_rows())), status)
        } else if cursor.protocol_error() {
            tracing::debug!(target: "sqlrun::executor", sql, "Protocol error, unsupported command");
            (None, Some(cursor.protocol_message().to_string()))
        } else {
            (None, cursor.status_message().map(str::to_owned))
        };

        Ok(ResultRecord {
            title,
            result,
            status,
            fragment: sql.to_string(),
            succeeded: true,
            is_special: false,
        })
    }

    /// Offer `sql` to the dispatcher with a fresh cursor, or none when the
    /// connection is closed.
    pub(crate) fn dispatch_special(
        &mut self,
        special: &mut dyn SpecialCommands,
        sql: &str,
    ) -> Result<SpecialAttempt> {
        tracing::debug!(target: "sqlrun::executor", sql, "Trying a special command");
        let mut cursor = if self.conn.is_closed() {
            None
        } else {
            Some(ProtocolSafeCursor::new(&mut *self.conn, &self.facts.casters))
        };

        let dispatch = special.execute(cursor.as_mut(), sql)?;
        let outputs = match dispatch {
            Dispatch::NotRecognized => return Ok(SpecialAttempt::NotRecognized),
            Dispatch::Recognized(outputs) => outputs,
        };
        match cursor {
            Some(cursor) if cursor.protocol_error() => Ok(SpecialAttempt::ProtocolError(
                cursor.protocol_message().to_string(),
            )),
            _ => Ok(SpecialAttempt::Handled(outputs)),
        }
    }

    // =========================================================================
    // Transaction state
    // =========================================================================

    /// Whether the current transaction has failed and awaits rollback.
    pub fn is_failed_transaction(&self) -> bool {
        self.conn.transaction_status() == TransactionStatus::InError
    }

    /// Whether a statement or an explicit transaction is in progress.
    pub fn is_open_transaction(&self) -> bool {
        matches!(
            self.conn.transaction_status(),
            TransactionStatus::Active | TransactionStatus::InTransaction
        )
    }

    // =========================================================================
    // Type coercion
    // =========================================================================

    /// Decode `json`/`jsonb` values with `decode`; returns which of the two
    /// were registered.
    pub fn register_json_typecasters(&mut self, decode: Caster) -> BTreeSet<&'static str> {
        typecast::register_json_typecasters(&mut *self.conn, &mut self.facts.casters, decode)
    }

    /// Registered type casters.
    pub fn typecasters(&self) -> &TypeCasters {
        &self.facts.casters
    }

    // =========================================================================
    // Session facts
    // =========================================================================

    /// Resolved database name.
    pub fn dbname(&self) -> Option<&str> {
        self.facts.dbname.as_deref()
    }

    /// Resolved user.
    pub fn user(&self) -> Option<&str> {
        self.facts.user.as_deref()
    }

    /// Resolved host, or the fallback chosen at connect time.
    pub fn host(&self) -> Option<&str> {
        self.facts.host.as_deref()
    }

    /// Resolved port.
    pub fn port(&self) -> Option<&str> {
        self.facts.port.as_deref()
    }

    /// Password passed to the latest connect call.
    pub fn password(&self) -> Option<&str> {
        self.facts.password.as_deref()
    }

    /// Extra driver options passed to the latest connect call.
    pub fn extra_args(&self) -> &BTreeMap<String, String> {
        &self.facts.extra_args
    }

    /// Stored parameter snapshot used by [`Session::copy`] and reconnects.
    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// All server settings captured at connect time.
    pub fn server_settings(&self) -> &BTreeMap<String, String> {
        &self.facts.server_settings
    }

    /// Whether the session user is a superuser.
    pub fn is_superuser(&self) -> bool {
        self.facts.superuser
    }

    /// Backend process id; always `1`.
    pub fn pid(&self) -> i32 {
        self.facts.pid
    }

    /// Server version; always `"1"`.
    pub fn server_version(&self) -> &str {
        "1"
    }

    /// Number of times the physical connection has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First component of the host, before any `,` and the first `.`.
    pub fn short_host(&self) -> &str {
        short_host(self.facts.host.as_deref().unwrap_or_default())
    }

    pub(crate) fn catalog_dialect(&self) -> CatalogDialect {
        self.facts.catalog
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.conn.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dbname", &self.facts.dbname)
            .field("user", &self.facts.user)
            .field("host", &self.facts.host)
            .field("port", &self.facts.port)
            .field("reduced_capability", &self.facts.reduced_capability)
            .field("superuser", &self.facts.superuser)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Open a connection and discover its facts; on any failure the new
/// connection is closed and nothing else has changed.
fn establish(
    connector: &dyn Connector,
    config: &ExecutorConfig,
    merged: &ConnectionParameters,
    incoming: &ConnectionParameters,
) -> Result<(Box<dyn Connection>, ConnectionFacts)> {
    let mut conn = connector.connect(merged)?;
    match ConnectionFacts::discover(&mut *conn, config, merged, incoming) {
        Ok(facts) => Ok((conn, facts)),
        Err(err) => {
            tracing::warn!(target: "sqlrun::executor", error = %err, "Connection setup failed");
            conn.close();
            Err(err)
        }
    }
}

fn detect_reduced_capability(conn: &mut dyn Connection, casters: &TypeCasters) -> Result<bool> {
    let mut cursor = ProtocolSafeCursor::new(conn, casters);
    tracing::debug!(target: "sqlrun::executor", sql = "SELECT 1", "Capability probe");
    cursor.execute("SELECT 1", &[])?;
    Ok(cursor.protocol_error())
}

fn socket_directory(conn: &mut dyn Connection, casters: &TypeCasters) -> Result<String> {
    let mut cursor = ProtocolSafeCursor::new(conn, casters);
    tracing::debug!(target: "sqlrun::executor", sql = SOCKET_DIRECTORY_QUERY, "Socket directory query");
    cursor.execute(SOCKET_DIRECTORY_QUERY, &[])?;
    Ok(cursor
        .fetch_one()
        .and_then(|row| row.into_iter().next().flatten())
        .unwrap_or_default())
}

fn fetch_server_settings(
    conn: &mut dyn Connection,
    casters: &TypeCasters,
) -> Result<BTreeMap<String, String>> {
    let mut cursor = ProtocolSafeCursor::new(conn, casters);
    cursor.execute("SHOW ALL", &[])?;
    Ok(cursor
        .fetch_all()
        .into_iter()
        .filter_map(|row| {
            let mut values = row.into_iter();
            match (values.next(), values.next()) {
                (Some(name), Some(value)) => {
                    Some((name.unwrap_or_default(), value.unwrap_or_default()))
                }
                _ => None,
            }
        })
        .collect())
}

/// First component of `host`, before any `,` and the first `.`.
pub fn short_host(host: &str) -> &str {
    let host = host.split(',').next().unwrap_or_default();
    host.split('.').next().unwrap_or_default()
}

//! `tokio-postgres` behind the blocking [`Connection`] seam.
//!
//! Each physical connection owns a current-thread runtime. The
//! connection's background task (which also collects notices) only makes
//! progress while a statement is being driven through `block_on`, which is
//! the only time the executor talks to the server anyway.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio_postgres::config::Host;
use tokio_postgres::types::ToSql;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, SimpleQueryMessage};

use sqlrun_core::{
    Column, ConnInfo, Connection, ConnectionParameters, Connector, DatabaseFault, Error,
    QueryOutput, Result, Row, TransactionStatus,
};

use crate::interrupt;
use crate::status::{command_tag, next_transaction_status};

/// Bounded wait of the cancellable poll loop.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

const SETTLE_YIELDS: usize = 4;

/// Builds [`PgConnection`]s.
#[derive(Debug, Clone)]
pub struct PgConnector {
    wait_interval: Duration,
}

impl PgConnector {
    /// A connector whose statements wake every `wait_interval` to look for
    /// an operator interrupt.
    pub fn new(wait_interval: Duration) -> Self {
        Self { wait_interval }
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_INTERVAL)
    }
}

impl Connector for PgConnector {
    fn connect(&self, params: &ConnectionParameters) -> Result<Box<dyn Connection>> {
        let conn = PgConnection::connect(params, self.wait_interval)?;
        Ok(Box::new(conn))
    }

    fn install_interrupt_hook(&self, reduced_capability: bool) {
        interrupt::install_cancel_on_interrupt(reduced_capability);
    }

    fn take_held_interrupt(&self) -> bool {
        interrupt::take_held_interrupt()
    }
}

/// One physical connection.
pub struct PgConnection {
    runtime: Runtime,
    client: Option<Client>,
    config: Config,
    notices: Arc<Mutex<Vec<String>>>,
    txn_status: TransactionStatus,
    wait_interval: Duration,
}

impl PgConnection {
    /// Establish a connection from a parameter snapshot.
    pub fn connect(params: &ConnectionParameters, wait_interval: Duration) -> Result<Self> {
        let conninfo = params.to_conninfo();
        let config: Config = conninfo
            .parse()
            .map_err(|e: tokio_postgres::Error| Error::connection(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::connection(format!("failed to start runtime: {}", e)))?;

        let (client, mut connection) = runtime
            .block_on(config.connect(NoTls))
            .map_err(|e| Error::connection(e.to_string()))?;

        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        runtime.spawn(async move {
            let mut messages = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notice(notice)) => {
                        sink.lock()
                            .push(format!("{}:  {}\n", notice.severity(), notice.message()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(target: "sqlrun::driver", error = %e, "Connection terminated");
                        break;
                    }
                }
            }
        });

        tracing::debug!(target: "sqlrun::driver", "Connected");
        Ok(Self {
            runtime,
            client: Some(client),
            config,
            notices,
            txn_status: TransactionStatus::Idle,
            wait_interval,
        })
    }

    fn client(&self) -> Result<&Client> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            _ => Err(Error::Database(DatabaseFault::operational(
                "connection already closed",
            ))),
        }
    }

    fn run_simple(&self, sql: &str) -> Result<QueryOutput> {
        let client = self.client()?;
        let messages = self.block_on_statement(client, client.simple_query(sql))?;

        let mut columns: Option<Vec<Column>> = None;
        let mut rows: Vec<Row> = Vec::new();
        let mut affected = 0;
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(cols) => {
                    columns = Some(cols.iter().map(|c| Column::untyped(c.name())).collect());
                }
                SimpleQueryMessage::Row(row) => {
                    if columns.is_none() {
                        columns = Some(
                            row.columns()
                                .iter()
                                .map(|c| Column::untyped(c.name()))
                                .collect(),
                        );
                    }
                    rows.push((0..row.len()).map(|i| row.get(i).map(str::to_owned)).collect());
                }
                SimpleQueryMessage::CommandComplete(n) => affected = n,
                _ => {}
            }
        }

        Ok(match columns {
            Some(columns) => QueryOutput::rows(columns, rows, format!("SELECT {}", affected)),
            None => QueryOutput::status(command_tag(sql, affected)),
        })
    }

    fn run_extended(&self, sql: &str, params: &[Option<String>]) -> Result<QueryOutput> {
        let client = self.client()?;
        let args: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let (columns, pg_rows) = self.block_on_statement(client, async {
            let statement = client.prepare(sql).await?;
            let rows = client.query(&statement, &args).await?;
            let columns: Vec<Column> = statement
                .columns()
                .iter()
                .map(|c| Column::new(c.name(), c.type_().oid()))
                .collect();
            Ok::<_, tokio_postgres::Error>((columns, rows))
        })?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut row = Row::with_capacity(pg_row.len());
            for i in 0..pg_row.len() {
                let value: Option<String> = pg_row
                    .try_get(i)
                    .map_err(|e| Error::internal(format!("column {} is not text: {}", i, e)))?;
                row.push(value);
            }
            rows.push(row);
        }

        if columns.is_empty() {
            return Ok(QueryOutput::status(command_tag(sql, rows.len() as u64)));
        }
        let status = format!("SELECT {}", rows.len());
        Ok(QueryOutput::rows(columns, rows, status))
    }

    /// Drive one statement to completion, through the cancellable poll loop
    /// when the interrupt hook is installed.
    fn block_on_statement<F, T>(&self, client: &Client, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        let in_flight = interrupt::begin_statement();
        let res = if interrupt::is_installed() {
            let token = client.cancel_token();
            self.runtime.block_on(interrupt::wait_cancellable(
                fut,
                self.wait_interval,
                interrupt::take_pending_interrupt,
                move || async move { token.cancel_query(NoTls).await },
            ))
        } else {
            self.runtime.block_on(fut)
        };
        drop(in_flight);

        if res.is_err() {
            self.settle();
        }
        res.map_err(map_error)
    }

    /// Give the connection task a chance to see a close that arrived with
    /// a fault, so `is_closed` reflects it before the caller asks.
    fn settle(&self) {
        let client = self.client.as_ref();
        self.runtime.block_on(async {
            for _ in 0..SETTLE_YIELDS {
                if client.map_or(true, Client::is_closed) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
    }
}

impl Connection for PgConnection {
    fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<QueryOutput> {
        let res = if params.is_empty() {
            self.run_simple(sql)
        } else {
            self.run_extended(sql, params)
        };
        self.txn_status = next_transaction_status(self.txn_status, sql, res.is_ok());
        res
    }

    fn describe(&mut self, sql: &str) -> Result<Vec<Column>> {
        let client = self.client()?;
        let statement = self.block_on_statement(client, client.prepare(sql))?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.type_().oid()))
            .collect())
    }

    fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.notices.lock())
    }

    fn transaction_status(&self) -> TransactionStatus {
        if self.is_closed() {
            TransactionStatus::Unknown
        } else {
            self.txn_status
        }
    }

    fn conninfo(&self) -> Option<ConnInfo> {
        let hosts: Vec<String> = self
            .config
            .get_hosts()
            .iter()
            .map(|host| match host {
                Host::Tcp(name) => name.clone(),
                #[cfg(unix)]
                Host::Unix(path) => path.display().to_string(),
            })
            .collect();
        let ports: Vec<String> = self.config.get_ports().iter().map(u16::to_string).collect();

        Some(ConnInfo {
            dbname: self.config.get_dbname().map(str::to_owned),
            user: self.config.get_user().map(str::to_owned),
            host: (!hosts.is_empty()).then(|| hosts.join(",")),
            port: (!ports.is_empty()).then(|| ports.join(",")),
        })
    }

    fn set_client_encoding(&mut self, encoding: &str) -> Result<()> {
        // The driver negotiates UTF8 at startup and cannot decode anything else.
        let normalized = encoding.replace('-', "").to_ascii_uppercase();
        if normalized == "UTF8" {
            Ok(())
        } else {
            Err(Error::interface(format!("unsupported client encoding: {}", encoding)))
        }
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            Ok(())
        } else {
            Err(Error::interface("implicit transactions are not supported"))
        }
    }

    fn is_closed(&self) -> bool {
        self.client.as_ref().map_or(true, Client::is_closed)
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!(target: "sqlrun::driver", "Closed connection");
        }
    }
}

fn map_error(e: tokio_postgres::Error) -> Error {
    if let Some(db) = e.as_db_error() {
        return Error::Database(DatabaseFault {
            code: Some(db.code().code().to_string()),
            severity: Some(db.severity().to_string()),
            message: db.message().to_string(),
            detail: db.detail().map(str::to_owned),
            hint: db.hint().map(str::to_owned),
        });
    }
    if e.is_closed() {
        return Error::Database(DatabaseFault::operational(
            "server closed the connection unexpectedly",
        ));
    }
    Error::Database(DatabaseFault::operational(e.to_string()))
}

//! The seam between the executor and a wire-protocol driver.
//!
//! A [`Connector`] builds physical connections from a
//! [`ConnectionParameters`] snapshot; a [`Connection`] runs one statement at
//! a time. The executor never talks to the network directly.

use crate::error::Result;
use crate::params::ConnectionParameters;
use crate::record::{Column, QueryOutput};

/// Transaction status of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block
    #[default]
    Idle,
    /// A command is in progress
    Active,
    /// Inside an explicit transaction block
    InTransaction,
    /// Inside a failed transaction block
    InError,
    /// The connection is bad
    Unknown,
}

/// Authoritative facts about an established connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnInfo {
    /// Database name
    pub dbname: Option<String>,
    /// User
    pub user: Option<String>,
    /// Host (comma-separated when several were configured)
    pub host: Option<String>,
    /// Port
    pub port: Option<String>,
}

/// One live physical connection.
///
/// Exactly one statement is in flight at a time; every method blocks the
/// calling thread until the server has answered.
pub trait Connection: Send {
    /// Run one statement. With `params` empty the simple query protocol is
    /// used; otherwise the statement is prepared and bound with text
    /// parameters.
    fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<QueryOutput>;

    /// Describe the columns a statement would return without running it.
    fn describe(&mut self, sql: &str) -> Result<Vec<Column>>;

    /// Drain pending server notices, oldest first.
    fn take_notices(&mut self) -> Vec<String>;

    /// Current transaction status.
    fn transaction_status(&self) -> TransactionStatus;

    /// Connection facts as negotiated, if the driver can report them.
    fn conninfo(&self) -> Option<ConnInfo>;

    /// Force the client text encoding.
    fn set_client_encoding(&mut self, encoding: &str) -> Result<()>;

    /// Toggle autocommit.
    fn set_autocommit(&mut self, enabled: bool) -> Result<()>;

    /// Whether the connection has been closed, by either side.
    fn is_closed(&self) -> bool;

    /// Close the connection. Idempotent.
    fn close(&mut self);
}

/// Builds physical connections.
pub trait Connector: Send + Sync {
    /// Establish a new physical connection.
    fn connect(&self, params: &ConnectionParameters) -> Result<Box<dyn Connection>>;

    /// Install the interrupt-to-cancel hook for statements run by this
    /// connector's connections. Called after every connect with the
    /// server's capability; implementations decide once per process.
    fn install_interrupt_hook(&self, _reduced_capability: bool) {}

    /// Consume an operator interrupt that arrived while no statement was
    /// in flight.
    fn take_held_interrupt(&self) -> bool {
        false
    }
}

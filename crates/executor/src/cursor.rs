//! Protocol-safe cursor.
//!
//! A [`ProtocolSafeCursor`] runs statements on a borrowed connection and
//! turns wire-level protocol violations into data: the violation is
//! recorded on the cursor and a synthesized single-column row carrying the
//! server message is returned by the fetch methods. Every other fault
//! propagates unchanged.
//!
//! The cursor borrows the session's connection, so it cannot outlive a
//! reconnect.

use std::collections::VecDeque;

use sqlrun_core::{Column, Connection, QueryOutput, Result, Row, Rows};

use crate::typecast::TypeCasters;

/// Per-statement execution handle.
///
/// A cursor taken before a reconnect cannot be used after it:
///
/// ```compile_fail
/// # fn demo(session: &mut sqlrun_executor::Session) -> sqlrun_executor::Result<()> {
/// let mut cursor = session.cursor()?;
/// session.reconnect(&Default::default())?;
/// cursor.execute("select 1", &[])?;
/// # Ok(())
/// # }
/// ```
pub struct ProtocolSafeCursor<'c> {
    conn: &'c mut dyn Connection,
    casters: &'c TypeCasters,
    protocol_error: bool,
    protocol_message: String,
    columns: Option<Vec<Column>>,
    rows: VecDeque<Row>,
    status: Option<String>,
}

impl<'c> ProtocolSafeCursor<'c> {
    pub(crate) fn new(conn: &'c mut dyn Connection, casters: &'c TypeCasters) -> Self {
        Self {
            conn,
            casters,
            protocol_error: false,
            protocol_message: String::new(),
            columns: None,
            rows: VecDeque::new(),
            status: None,
        }
    }

    /// Run a statement.
    ///
    /// A protocol violation is recorded instead of returned; any other
    /// fault is returned. Either way the previous statement's state is
    /// discarded first.
    pub fn execute(&mut self, sql: &str, params: &[Option<String>]) -> Result<()> {
        self.protocol_error = false;
        self.protocol_message.clear();
        self.columns = None;
        self.rows.clear();
        self.status = None;

        match self.conn.execute(sql, params) {
            Ok(output) => {
                self.load(output);
                Ok(())
            }
            Err(err) => match err.as_protocol_violation() {
                Some(fault) => {
                    tracing::debug!(target: "sqlrun::executor", sql, error = %fault, "Protocol violation");
                    self.protocol_error = true;
                    self.protocol_message = fault.server_message();
                    Ok(())
                }
                None => Err(err),
            },
        }
    }

    fn load(&mut self, output: QueryOutput) {
        let QueryOutput {
            columns,
            rows,
            status,
        } = output;
        self.rows = rows.into();
        self.columns = columns;
        self.status = status;
    }

    /// Whether the last `execute` hit a protocol violation.
    pub fn protocol_error(&self) -> bool {
        self.protocol_error
    }

    /// Server message of the last protocol violation, empty otherwise.
    pub fn protocol_message(&self) -> &str {
        &self.protocol_message
    }

    /// Row description of the last statement, if it described rows.
    pub fn description(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Command status of the last statement.
    pub fn status_message(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Drain server notices, oldest first.
    pub fn take_notices(&mut self) -> Vec<String> {
        self.conn.take_notices()
    }

    fn synthesized_row(&self) -> Row {
        vec![Some(self.protocol_message.clone())]
    }

    fn cast(&self, row: Row) -> Row {
        match &self.columns {
            Some(columns) => self.casters.apply(columns, row),
            None => row,
        }
    }

    /// Next row. After a protocol violation this is always the synthesized
    /// message row.
    pub fn fetch_one(&mut self) -> Option<Row> {
        if self.protocol_error {
            return Some(self.synthesized_row());
        }
        let row = self.rows.pop_front()?;
        Some(self.cast(row))
    }

    /// All remaining rows. After a protocol violation this is exactly the
    /// synthesized message row.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        if self.protocol_error {
            return vec![self.synthesized_row()];
        }
        let rows: Vec<Row> = self.rows.drain(..).collect();
        rows.into_iter().map(|row| self.cast(row)).collect()
    }

    /// Hand the remaining rows over as a lazy sequence detached from the
    /// connection. Empty after a protocol violation.
    pub fn into_rows(self) -> Rows {
        if self.protocol_error {
            return Rows::empty();
        }
        let casters = self.casters.clone();
        let columns = self.columns.unwrap_or_default();
        Rows::new(self.rows.into_iter().map(move |row| casters.apply(&columns, row)))
    }
}

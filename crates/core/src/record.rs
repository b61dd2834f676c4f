//! Result records
//!
//! The execution pipeline yields exactly one kind of value per statement, a
//! [`ResultRecord`]. Row data is carried in a [`ResultSet`] so headers and
//! rows are either both present or both absent.

use std::fmt;

/// One row of text values; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// A column of a row description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Type OID when the driver reports it
    pub type_oid: Option<u32>,
}

impl Column {
    /// A column with a known type OID.
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid: Some(type_oid),
        }
    }

    /// A column whose type the driver did not report.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_oid: None,
        }
    }
}

/// What a driver returns for one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    /// Row description; `None` when the statement produced no rows
    pub columns: Option<Vec<Column>>,
    /// Fetched rows
    pub rows: Vec<Row>,
    /// Command status, e.g. `SELECT 2` or `CREATE TABLE`
    pub status: Option<String>,
}

impl QueryOutput {
    /// A row-producing result.
    pub fn rows(columns: Vec<Column>, rows: Vec<Row>, status: impl Into<String>) -> Self {
        Self {
            columns: Some(columns),
            rows,
            status: Some(status.into()),
        }
    }

    /// A status-only result (DDL, DML without RETURNING, SET, ...).
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            columns: None,
            rows: Vec::new(),
            status: Some(status.into()),
        }
    }
}

/// A one-pass, lazily consumed sequence of rows.
///
/// Restarting requires re-executing the statement.
pub struct Rows {
    inner: Box<dyn Iterator<Item = Row> + Send>,
}

impl Rows {
    /// Wrap any row iterator.
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(rows.into_iter()),
        }
    }

    /// An empty sequence.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.inner.next()
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}

/// Headers and the rows they describe.
#[derive(Debug)]
pub struct ResultSet {
    /// Ordered column names
    pub headers: Vec<String>,
    /// Row data
    pub rows: Rows,
}

impl ResultSet {
    /// Build a result set.
    pub fn new(headers: Vec<String>, rows: Rows) -> Self {
        Self { headers, rows }
    }
}

/// The unit yielded by the execution pipeline, one or more per fragment.
#[derive(Debug)]
pub struct ResultRecord {
    /// Server notices raised while running the statement
    pub title: Option<String>,
    /// Row data, when the statement described rows
    pub result: Option<ResultSet>,
    /// Command status or formatted error message
    pub status: Option<String>,
    /// The statement text this record belongs to
    pub fragment: String,
    /// Whether the statement succeeded
    pub succeeded: bool,
    /// Whether a special-command dispatcher produced the record
    pub is_special: bool,
}

impl ResultRecord {
    /// The no-op record yielded for input containing no statements.
    pub fn empty(fragment: impl Into<String>) -> Self {
        Self {
            title: None,
            result: None,
            status: None,
            fragment: fragment.into(),
            succeeded: false,
            is_special: false,
        }
    }

    /// A failure record carrying only a status message.
    pub fn failure(status: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            title: None,
            result: None,
            status: Some(status.into()),
            fragment: fragment.into(),
            succeeded: false,
            is_special: false,
        }
    }

    /// Column names, if the record carries rows.
    pub fn headers(&self) -> Option<&[String]> {
        self.result.as_ref().map(|r| r.headers.as_slice())
    }

    /// Take the row sequence out of the record.
    pub fn take_rows(&mut self) -> Option<Rows> {
        self.result.as_mut().map(|r| std::mem::replace(&mut r.rows, Rows::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_rows_are_one_pass() {
        let mut rows = Rows::new(vec![row(&["1"]), row(&["2"])]);
        assert_eq!(rows.next(), Some(row(&["1"])));
        assert_eq!(rows.next(), Some(row(&["2"])));
        assert_eq!(rows.next(), None);
        assert_eq!(rows.next(), None);
    }

    #[test]
    fn test_empty_record_has_no_descriptive_fields() {
        let record = ResultRecord::empty("");
        assert!(record.title.is_none());
        assert!(record.result.is_none());
        assert!(record.headers().is_none());
        assert!(record.status.is_none());
        assert!(!record.succeeded);
        assert!(!record.is_special);
    }

    #[test]
    fn test_take_rows_leaves_headers() {
        let mut record = ResultRecord {
            title: Some(String::new()),
            result: Some(ResultSet::new(vec!["a".into()], Rows::new(vec![row(&["x"])]))),
            status: Some("SELECT 1".into()),
            fragment: "select 'x' as a".into(),
            succeeded: true,
            is_special: false,
        };
        let rows: Vec<Row> = record.take_rows().unwrap().collect();
        assert_eq!(rows, vec![row(&["x"])]);
        assert_eq!(record.headers(), Some(&["a".to_string()][..]));
        assert_eq!(record.take_rows().unwrap().count(), 0);
    }
}

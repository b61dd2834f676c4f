//! Error types for sqlrun
//!
//! This module defines all error types used throughout the execution core.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Categories
//!
//! | Category | Variant | Recoverable by the pipeline |
//! |----------|---------|-----------------------------|
//! | Connection | `Connection` | never |
//! | Server fault | `Database` | only while the connection is open and a formatter is supplied |
//! | Protocol violation | `Database` with SQLSTATE `08P01` | absorbed by the cursor |
//! | Closed handle | `Interface` | never |
//! | Lookup | `NotFound` | surfaced to the caller of the lookup |
//! | Operator | `Interrupted` | never; ends the batch |
//! | Setup | `Config`, `Internal` | never |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias for sqlrun operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE reported by the server when it rejects the framing or
/// semantics of a message it was sent.
pub const PROTOCOL_VIOLATION: &str = "08P01";

/// Error types for the execution core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The physical connection could not be established or re-established
    #[error("connection failed: {reason}")]
    Connection {
        /// Driver-supplied reason
        reason: String,
    },

    /// A server-reported failure while running a statement
    #[error("{0}")]
    Database(DatabaseFault),

    /// A handle was used after its connection was closed
    #[error("interface error: {reason}")]
    Interface {
        /// What was attempted
        reason: String,
    },

    /// A catalog lookup did not resolve to an existing object
    #[error("{kind} {name} does not exist.")]
    NotFound {
        /// Kind of object looked up
        kind: ObjectKind,
        /// Name as given by the caller
        name: String,
    },

    /// An operator interrupt arrived between statements
    #[error("interrupted")]
    Interrupted,

    /// Invalid configuration
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },

    /// Internal error (bug or invariant violation)
    #[error("internal error: {reason}")]
    Internal {
        /// Description
        reason: String,
    },
}

impl Error {
    /// Build a `Connection` error.
    pub fn connection(reason: impl Into<String>) -> Self {
        Error::Connection {
            reason: reason.into(),
        }
    }

    /// Build an `Interface` error.
    pub fn interface(reason: impl Into<String>) -> Self {
        Error::Interface {
            reason: reason.into(),
        }
    }

    /// Build an `Internal` error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// True for server-reported statement failures, the only class the
    /// execution pipeline may recover from.
    pub fn is_database_fault(&self) -> bool {
        matches!(self, Error::Database(_))
    }

    /// The fault, if this is a wire-level protocol violation.
    pub fn as_protocol_violation(&self) -> Option<&DatabaseFault> {
        match self {
            Error::Database(fault) if fault.is_protocol_violation() => Some(fault),
            _ => None,
        }
    }
}

impl From<DatabaseFault> for Error {
    fn from(fault: DatabaseFault) -> Self {
        Error::Database(fault)
    }
}

/// Kind of catalog object a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A view or materialized view
    View,
    /// A function
    Function,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::View => f.write_str("View"),
            ObjectKind::Function => f.write_str("Function"),
        }
    }
}

/// A server-reported failure.
///
/// `code` is the five-character SQLSTATE when the server sent one; faults
/// raised because the transport failed mid-statement carry no code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFault {
    /// SQLSTATE
    pub code: Option<String>,
    /// Severity (`ERROR`, `FATAL`, ...)
    pub severity: Option<String>,
    /// Primary message
    pub message: String,
    /// Optional detail line
    pub detail: Option<String>,
    /// Optional hint line
    pub hint: Option<String>,
}

impl DatabaseFault {
    /// A fault reported by the server with the given SQLSTATE.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            severity: Some("ERROR".to_string()),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// A transport-level fault with no SQLSTATE.
    pub fn operational(message: impl Into<String>) -> Self {
        Self {
            code: None,
            severity: None,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Whether the server rejected the statement at the wire level.
    pub fn is_protocol_violation(&self) -> bool {
        self.code.as_deref() == Some(PROTOCOL_VIOLATION)
    }

    /// The server message as the server renders it, e.g.
    /// `ERROR:  unsupported\n`.
    pub fn server_message(&self) -> String {
        match &self.severity {
            Some(severity) => format!("{}:  {}\n", severity, self.message),
            None => format!("{}\n", self.message),
        }
    }
}

impl fmt::Display for DatabaseFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.severity {
            Some(severity) => write!(f, "{}:  {}", severity, self.message)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL:  {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT:  {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_detected_by_sqlstate() {
        let fault = DatabaseFault::new(PROTOCOL_VIOLATION, "unsupported message");
        assert!(fault.is_protocol_violation());

        let err = Error::from(fault.clone());
        assert_eq!(err.as_protocol_violation(), Some(&fault));
        assert!(err.is_database_fault());
    }

    #[test]
    fn test_ordinary_fault_is_not_protocol_violation() {
        let err = Error::Database(DatabaseFault::new("42601", "syntax error"));
        assert!(err.is_database_fault());
        assert!(err.as_protocol_violation().is_none());
    }

    #[test]
    fn test_non_database_errors_are_not_faults() {
        assert!(!Error::connection("refused").is_database_fault());
        assert!(!Error::interface("connection already closed").is_database_fault());
        assert!(!Error::internal("bug").is_database_fault());
        assert!(!Error::Interrupted.is_database_fault());
    }

    #[test]
    fn test_fault_display_includes_detail_and_hint() {
        let mut fault = DatabaseFault::new("42P01", "relation \"t\" does not exist");
        fault.detail = Some("some detail".into());
        fault.hint = Some("some hint".into());
        let msg = Error::Database(fault).to_string();
        assert!(msg.starts_with("ERROR:  relation \"t\" does not exist"));
        assert!(msg.contains("DETAIL:  some detail"));
        assert!(msg.contains("HINT:  some hint"));
    }

    #[test]
    fn test_server_message_format() {
        let fault = DatabaseFault::new(PROTOCOL_VIOLATION, "nope");
        assert_eq!(fault.server_message(), "ERROR:  nope\n");
        assert_eq!(DatabaseFault::operational("gone").server_message(), "gone\n");
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound {
            kind: ObjectKind::View,
            name: "public.missing".into(),
        };
        assert_eq!(err.to_string(), "View public.missing does not exist.");
    }

    #[test]
    fn test_fault_serializes() {
        let fault = DatabaseFault::new("57014", "canceling statement due to user request");
        let json = serde_json::to_string(&fault).unwrap();
        let back: DatabaseFault = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fault);
    }
}

//! # sqlrun executor
//!
//! The statement-execution core of an interactive database client.
//!
//! - [`Session`]: owns one physical connection, discovers session facts and
//!   detects reduced-capability servers
//! - [`ProtocolSafeCursor`]: runs one statement and turns wire-level
//!   protocol violations into data
//! - [`Session::run`]: splits raw input and yields one [`ResultRecord`] per
//!   statement through a lazy [`Run`]
//!
//! ## Quick Start
//!
//! ```text
//! use sqlrun_executor::{ConnectionParameters, ExecutorConfig, Session};
//!
//! let params = ConnectionParameters::new().host("localhost").port(6875).user("materialize");
//! let mut session = Session::open(params, ExecutorConfig::default())?;
//!
//! let format = |e: &sqlrun_executor::Error| e.to_string();
//! for record in session.run("create table t (a int); select * from t", None, Some(&format), true) {
//!     let mut record = record?;
//!     if let Some(rows) = record.take_rows() {
//!         for row in rows { println!("{:?}", row); }
//!     }
//!     println!("{}", record.status.unwrap_or_default());
//! }
//! ```
//!
//! ## Error policy
//!
//! | Fault | Outcome |
//! |-------|---------|
//! | protocol violation | absorbed by the cursor; forces a reconnect during special dispatch |
//! | database fault, connection open, formatter supplied | failure record |
//! | database fault otherwise | `Err`, ends the run |
//! | connection, interface, internal | `Err`, ends the run |

#![warn(missing_docs)]

mod catalog;
pub mod config;
mod cursor;
mod pipeline;
mod session;
mod special;
pub mod split;
mod typecast;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API
// =============================================================================

pub use catalog::{ColumnInfo, Relation};
pub use config::{CatalogDialect, ExecutorConfig, CONFIG_FILE_NAME};
pub use cursor::ProtocolSafeCursor;
pub use pipeline::Run;
pub use session::{short_host, Session};
pub use special::{Dispatch, ErrorFormatter, SpecialCommands, SpecialOutput};
pub use split::{Fragment, EXPANDED_SUFFIX};
pub use typecast::{
    register_date_typecasters, register_hstore_typecaster, register_json_typecasters, Caster,
    TypeCasters,
};

// Re-export core types so users don't need sqlrun-core directly
pub use sqlrun_core::{
    Column, ConnInfo, Connection, ConnectionParameters, Connector, DatabaseFault, Error,
    ObjectKind, QueryOutput, ResultRecord, ResultSet, Row, Rows, TransactionStatus,
};

// Re-export the driver so users don't need sqlrun-driver directly
pub use sqlrun_driver::{interrupt, PgConnection, PgConnector};

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, Error>;

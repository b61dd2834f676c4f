//! Core types and traits for sqlrun
//!
//! This crate defines the foundational types shared by the driver and the
//! executor:
//! - ConnectionParameters: connection snapshot retained by a session
//! - ResultRecord / ResultSet / Rows: the uniform unit yielded per statement
//! - QueryOutput / Column: what a driver returns for one statement
//! - Error / DatabaseFault: error hierarchy
//! - Connection / Connector: the seam between the executor and a wire driver

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod params;
pub mod record;

pub use connection::{ConnInfo, Connection, Connector, TransactionStatus};
pub use error::{DatabaseFault, Error, ObjectKind, Result, PROTOCOL_VIOLATION};
pub use params::ConnectionParameters;
pub use record::{Column, QueryOutput, ResultRecord, ResultSet, Row, Rows};

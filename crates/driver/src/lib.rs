//! # sqlrun driver
//!
//! The live wire-protocol driver behind the execution core:
//!
//! - [`PgConnector`] / [`PgConnection`]: `tokio-postgres` wrapped in a
//!   blocking [`Connection`](sqlrun_core::Connection), one current-thread
//!   runtime per physical connection
//! - [`interrupt`]: the install-once operator-interrupt to cancel-request
//!   wiring and the bounded poll loop that observes it
//! - [`status`]: command-tag synthesis and client-side transaction tracking

pub mod interrupt;
mod pg;
pub mod status;

pub use pg::{PgConnection, PgConnector, DEFAULT_WAIT_INTERVAL};

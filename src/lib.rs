//! sqlrun - statement-execution core of an interactive database client
//!
//! sqlrun takes raw, possibly multi-statement input, splits it into
//! statements, offers each one to a special-command dispatcher, runs the rest
//! against a live server connection and yields one uniform result record per
//! statement. Servers that speak the wire protocol but reject some messages
//! with protocol violations are detected and tolerated.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlrun::{ConnectionParameters, ExecutorConfig, Session};
//!
//! let params = ConnectionParameters::from_dsn("postgres://materialize@localhost:6875/materialize");
//! let mut session = Session::open(params, ExecutorConfig::default())?;
//!
//! let format = |e: &sqlrun::Error| e.to_string();
//! for record in session.run("select 1; bad sql; select 2", None, Some(&format), true) {
//!     let record = record?;
//!     println!("{} -> {:?}", record.fragment, record.status);
//! }
//! ```
//!
//! # Architecture
//!
//! The driver (`tokio-postgres` behind a blocking seam) and the shared types
//! live in their own crates; only the executor API is re-exported here.

// Re-export the public API from sqlrun-executor
pub use sqlrun_executor::*;

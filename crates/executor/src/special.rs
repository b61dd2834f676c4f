//! Special-command seam.
//!
//! Client-side directives (backslash commands and the like) are handled by
//! an external dispatcher. The pipeline offers every fragment to it first;
//! the dispatcher answers with a tagged [`Dispatch`] rather than signalling
//! "not mine" through an error.

use sqlrun_core::{ResultRecord, ResultSet, Result};

use crate::cursor::ProtocolSafeCursor;

/// Outcome of offering a fragment to the dispatcher.
#[derive(Debug)]
pub enum Dispatch {
    /// The fragment was a special command; these are its results.
    Recognized(Vec<SpecialOutput>),
    /// Not a special command; run it as ordinary SQL.
    NotRecognized,
}

/// One result produced by a special command.
#[derive(Debug)]
pub enum SpecialOutput {
    /// Display fields only; the pipeline fills in the fragment and marks
    /// the record successful and special.
    Partial {
        /// Title line
        title: Option<String>,
        /// Row data
        result: Option<ResultSet>,
        /// Status line
        status: Option<String>,
    },
    /// A fully formed record, yielded as-is.
    Complete(ResultRecord),
}

impl SpecialOutput {
    /// Normalize into a record for `fragment`.
    pub fn into_record(self, fragment: &str) -> ResultRecord {
        match self {
            SpecialOutput::Partial {
                title,
                result,
                status,
            } => ResultRecord {
                title,
                result,
                status,
                fragment: fragment.to_string(),
                succeeded: true,
                is_special: true,
            },
            SpecialOutput::Complete(record) => record,
        }
    }
}

/// External special-command dispatcher.
///
/// The dispatcher also owns the expanded-output display flag, which the
/// pipeline toggles for statements carrying the expanded-display suffix.
pub trait SpecialCommands {
    /// Try to run `sql` as a special command.
    ///
    /// `cursor` is `None` when the session's connection is closed.
    fn execute(&mut self, cursor: Option<&mut ProtocolSafeCursor<'_>>, sql: &str)
        -> Result<Dispatch>;

    /// Whether expanded output is on.
    fn expanded_output(&self) -> bool;

    /// Switch expanded output.
    fn set_expanded_output(&mut self, on: bool);
}

/// Formats a recovered database fault for display.
pub type ErrorFormatter<'f> = &'f dyn Fn(&sqlrun_core::Error) -> String;

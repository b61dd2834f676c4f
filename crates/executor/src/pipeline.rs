//! Execution pipeline.
//!
//! [`Session::run`] splits raw input into fragments and returns a lazy
//! [`Run`] that executes one fragment per pull, in input order, yielding
//! one or more [`ResultRecord`]s for each.
//!
//! For every fragment the special-command dispatcher (if any) is tried
//! first; fragments it does not recognize run as ordinary SQL. Database
//! faults become failure records when the connection is still open and an
//! error formatter was supplied; anything else ends the run with `Err`.
//!
//! An operator interrupt that arrived while no statement was running ends
//! the run with [`Error::Interrupted`] before the next fragment starts.
//!
//! Work that must follow a fragment's records (a forced reconnect after a
//! protocol violation during special dispatch, then the expanded-output
//! reset) runs when the consumer pulls the next item, or when the `Run` is
//! dropped.

use std::collections::VecDeque;
use std::vec;

use sqlrun_core::{ConnectionParameters, Error, ResultRecord, Result};

use crate::session::{Session, SpecialAttempt};
use crate::special::{ErrorFormatter, SpecialCommands};
use crate::split::{split_statements, Fragment};

impl Session {
    /// Execute `raw` one fragment at a time.
    ///
    /// * `special` is offered every fragment first and owns the
    ///   expanded-output flag.
    /// * `formatter` turns recoverable database faults into failure
    ///   records; without it every fault ends the run.
    /// * `continue_on_error` keeps going after a recovered fault.
    ///
    /// Input without statements yields a single record with no title,
    /// rows, headers or status.
    pub fn run<'s>(
        &'s mut self,
        raw: &str,
        special: Option<&'s mut dyn SpecialCommands>,
        formatter: Option<ErrorFormatter<'s>>,
        continue_on_error: bool,
    ) -> Run<'s> {
        let fragments = split_statements(raw);
        let mut queue = VecDeque::new();
        if fragments.is_empty() {
            queue.push_back(Ok(ResultRecord::empty(raw)));
        }
        Run {
            session: self,
            special,
            formatter,
            continue_on_error,
            raw: raw.to_string(),
            fragments: fragments.into_iter(),
            queue,
            pending_reconnect: false,
            done: false,
        }
    }
}

/// Lazy sequence of result records for one call to [`Session::run`].
pub struct Run<'s> {
    session: &'s mut Session,
    special: Option<&'s mut dyn SpecialCommands>,
    formatter: Option<ErrorFormatter<'s>>,
    continue_on_error: bool,
    raw: String,
    fragments: vec::IntoIter<Fragment>,
    queue: VecDeque<Result<ResultRecord>>,
    pending_reconnect: bool,
    done: bool,
}

impl<'s> Run<'s> {
    fn process(&mut self, fragment: Fragment) {
        let Fragment { sql, expanded } = fragment;

        if let Some(special) = self.special.as_deref_mut() {
            if expanded && !special.expanded_output() {
                special.set_expanded_output(true);
                self.session.pending_expanded_reset = true;
            }

            match self.session.dispatch_special(special, &sql) {
                Ok(SpecialAttempt::NotRecognized) => {}
                Ok(SpecialAttempt::Handled(outputs)) => {
                    self.queue
                        .extend(outputs.into_iter().map(|o| Ok(o.into_record(&sql))));
                    return;
                }
                Ok(SpecialAttempt::ProtocolError(message)) => {
                    tracing::debug!(target: "sqlrun::executor", sql = %sql, "Protocol error in special command, reconnecting");
                    self.queue
                        .push_back(Ok(ResultRecord::failure(message, self.raw.clone())));
                    self.pending_reconnect = true;
                    return;
                }
                Err(err) => {
                    self.recover(err, &sql);
                    return;
                }
            }
        }

        match self.session.execute_normal_sql(&sql) {
            Ok(record) => self.queue.push_back(Ok(record)),
            Err(err) => self.recover(err, &sql),
        }
    }

    /// Turn a fault into a failure record, or end the run with it.
    fn recover(&mut self, err: Error, sql: &str) {
        if !err.is_database_fault() {
            self.fail(err);
            return;
        }
        tracing::error!(target: "sqlrun::executor", sql, error = %err, "Statement failed");

        let formatter = match self.formatter {
            Some(formatter) if !self.session.is_connection_closed() => formatter,
            _ => {
                self.fail(err);
                return;
            }
        };
        self.queue
            .push_back(Ok(ResultRecord::failure(formatter(&err), sql)));
        if !self.continue_on_error {
            self.done = true;
        }
    }

    fn fail(&mut self, err: Error) {
        self.queue.push_back(Err(err));
        self.done = true;
    }

    /// Deferred work for the fragment whose records were just consumed:
    /// reconnect first, then revert expanded output. The reset runs even
    /// when the reconnect fails.
    fn finish_fragment(&mut self) -> Result<()> {
        let reconnected = if std::mem::take(&mut self.pending_reconnect) {
            self.session.reconnect(&ConnectionParameters::default())
        } else {
            Ok(())
        };

        if std::mem::take(&mut self.session.pending_expanded_reset) {
            if let Some(special) = self.special.as_deref_mut() {
                special.set_expanded_output(false);
            }
        }
        reconnected
    }
}

impl Iterator for Run<'_> {
    type Item = Result<ResultRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(item);
            }
            if let Err(err) = self.finish_fragment() {
                self.done = true;
                return Some(Err(err));
            }
            if self.done {
                return None;
            }
            match self.fragments.next() {
                Some(_) if self.session.take_held_interrupt() => {
                    tracing::info!(target: "sqlrun::executor", "Interrupted, remaining statements skipped");
                    self.fail(Error::Interrupted);
                }
                Some(fragment) => self.process(fragment),
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl Drop for Run<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish_fragment() {
            tracing::warn!(target: "sqlrun::executor", error = %err, "Reconnect after protocol error failed");
        }
    }
}

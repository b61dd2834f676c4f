//! Operator interrupt to server-side cancel.
//!
//! While a statement is in flight the driver waits in a poll loop with a
//! bounded interval. When an interrupt has been requested, the loop sends a
//! cancel request to the server once and keeps waiting; the cancelled
//! statement then fails with an ordinary database fault.
//!
//! An interrupt that arrives while no statement is in flight is held, not
//! dropped. [`take_held_interrupt`] hands it over; the executor checks it
//! before starting each statement of a batch and ends the batch. The same
//! happens to an interrupt the poll loop never got to observe because the
//! statement finished first.
//!
//! The Ctrl-C listener is process-wide and decided by the first call to
//! [`install_cancel_on_interrupt`]. Once installed it replaces the default
//! SIGINT action for the rest of the process, so an idle Ctrl-C reaches the
//! application only as a held interrupt. Reduced-capability servers cannot
//! cancel mid-query reliably, so a first call for such a server leaves the
//! hook uninstalled and SIGINT untouched.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use once_cell::sync::OnceCell;

static INSTALLED: OnceCell<bool> = OnceCell::new();
static STATE: InterruptState = InterruptState::new();

/// Where an interrupt goes depends on whether a statement is running.
pub(crate) struct InterruptState {
    in_flight: AtomicBool,
    pending: AtomicBool,
    held: AtomicBool,
}

impl InterruptState {
    pub(crate) const fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            held: AtomicBool::new(false),
        }
    }

    fn request(&self) {
        if self.in_flight.load(Ordering::SeqCst) {
            self.pending.store(true, Ordering::SeqCst);
        } else {
            self.held.store(true, Ordering::SeqCst);
        }
    }

    /// Mark a statement as running until the guard is dropped.
    pub(crate) fn begin(&self) -> InFlight<'_> {
        self.in_flight.store(true, Ordering::SeqCst);
        InFlight(self)
    }

    fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    fn take_held(&self) -> bool {
        self.held.swap(false, Ordering::SeqCst)
    }
}

/// A statement in flight. Dropping it turns an interrupt the poll loop did
/// not consume into a held one.
pub(crate) struct InFlight<'a>(&'a InterruptState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
        if self.0.take_pending() {
            self.0.held.store(true, Ordering::SeqCst);
        }
    }
}

/// Install the interrupt hook, once per process.
///
/// Returns whether the hook is installed. Later calls are no-ops that
/// report the first decision.
pub fn install_cancel_on_interrupt(reduced_capability: bool) -> bool {
    *INSTALLED.get_or_init(|| {
        if reduced_capability {
            tracing::debug!(target: "sqlrun::driver", "Reduced-capability server, interrupt hook not installed");
            return false;
        }
        match spawn_signal_listener() {
            Ok(()) => {
                tracing::debug!(target: "sqlrun::driver", "Installed interrupt-to-cancel hook");
                true
            }
            Err(e) => {
                tracing::warn!(target: "sqlrun::driver", error = %e, "Failed to install interrupt hook");
                false
            }
        }
    })
}

/// Whether statements wait in the cancellable poll loop.
pub fn is_installed() -> bool {
    INSTALLED.get().copied().unwrap_or(false)
}

/// Request an interrupt.
///
/// Cancels the in-flight statement, or is held for [`take_held_interrupt`]
/// when nothing is running. Embedding applications that handle Ctrl-C
/// themselves forward it here.
pub fn request_interrupt() {
    STATE.request();
}

/// Consume an interrupt that arrived while no statement was in flight.
///
/// Applications returning to a prompt call this to discard one.
pub fn take_held_interrupt() -> bool {
    STATE.take_held()
}

pub(crate) fn begin_statement() -> InFlight<'static> {
    STATE.begin()
}

pub(crate) fn take_pending_interrupt() -> bool {
    STATE.take_pending()
}

fn spawn_signal_listener() -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("sqlrun-interrupt".into())
        .spawn(|| {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!(target: "sqlrun::driver", error = %e, "Interrupt listener runtime failed");
                    return;
                }
            };
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    request_interrupt();
                }
            });
        })?;
    Ok(())
}

/// Wait for `fut`, waking every `interval` to check `interrupted`.
///
/// The first observed interrupt runs `cancel`; the loop then keeps waiting
/// for the server to answer the statement.
pub(crate) async fn wait_cancellable<F, I, C, CF, E>(
    fut: F,
    interval: Duration,
    mut interrupted: I,
    cancel: C,
) -> F::Output
where
    F: Future,
    I: FnMut() -> bool,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    tokio::pin!(fut);
    let mut cancel = Some(cancel);
    loop {
        tokio::select! {
            res = &mut fut => return res,
            _ = tokio::time::sleep(interval) => {
                if cancel.is_none() || !interrupted() {
                    continue;
                }
                if let Some(cancel) = cancel.take() {
                    tracing::info!(target: "sqlrun::driver", "Interrupt received, cancelling statement");
                    if let Err(e) = cancel().await {
                        tracing::warn!(target: "sqlrun::driver", error = %e, "Cancel request failed");
                    }
                }
            }
        }
    }
}

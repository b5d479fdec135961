//! Cooperative shutdown signalling
//!
//! One `Shutdown` handle is created at startup and cloned into every
//! background task. Tasks wait on it inside their select loops; the
//! Ctrl-C handler requests shutdown once, and a second Ctrl-C exits the
//! process immediately for the case where a task refuses to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared shutdown flag with async wakeup
#[derive(Clone, Default)]
pub struct Shutdown {
    notify: Arc<Notify>,
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown, waking every waiting task
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    ///
    /// The flag is checked after registering for notification, so a
    /// request landing between the two is never missed.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

/// Wire Ctrl-C to the shutdown handle
///
/// First signal requests a clean stop; the second one force-exits.
pub fn install_ctrlc_handler(shutdown: &Shutdown) -> Result<(), ctrlc::Error> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown.is_requested() {
            eprintln!("Forced exit");
            std::process::exit(130);
        }
        shutdown.request();
    })
}

//! Synchronization engine: the periodic [`SyncTask`] scheduler, the [`polling`] updaters, the
//! [`streaming`] update workers, and the [`SyncManager`] that switches between both transports.
use tokio::sync::mpsc;

use crate::Error;

pub mod polling;
pub mod streaming;
pub mod sync_manager;
pub mod sync_task;

pub use sync_manager::SyncManager;
pub use sync_task::{SyncTask, UpdateOutcome, Updater};

/// Destination of unexpected errors (anything that is not a declared synchronization failure).
///
/// Such errors are never retried or swallowed: they are logged at `error` level and forwarded to
/// the channel, outside of the updater that hit them. The updater itself still resolves with
/// [`UpdateOutcome::Failure`].
#[derive(Debug, Clone, Default)]
pub struct UncaughtErrorSink {
    sender: Option<mpsc::UnboundedSender<Error>>,
}

impl UncaughtErrorSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel() -> (UncaughtErrorSink, mpsc::UnboundedReceiver<Error>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            UncaughtErrorSink {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub(crate) fn report(&self, err: Error) {
        log::error!(target: "splitio", "unexpected error during synchronization: {}", err);
        if let Some(sender) = &self.sender {
            // Error means the receiver was dropped, nobody is interested anymore.
            let _ = sender.send(err);
        }
    }
}

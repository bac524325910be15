pub mod backfill;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use backfill::BackfillEngine;
pub use scheduler::SyncScheduler;

use tokio::sync::watch;

/// Cooperative stop signal. Checked between installations and between
/// windows, never mid-call; in-flight requests are allowed to complete.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (watch::Sender<bool>, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (tx, Shutdown { rx })
    }

    pub fn requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

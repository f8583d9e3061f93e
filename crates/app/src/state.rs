//! Copy-on-write publication of the hub snapshot.
//!
//! Readers get an `Arc<Snapshot>` without waiting on any device; writers
//! (workers, `load`, structural changes) clone-modify-publish through a
//! [`watch`] channel, so observers can also await changes.

use std::sync::Arc;

use tokio::sync::watch;

use apparatus_domain::snapshot::Snapshot;

/// Shared handle on the last committed snapshot.
#[derive(Debug, Clone)]
pub struct StateCell {
    sender: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl StateCell {
    /// Publish `initial` as the first snapshot.
    #[must_use]
    pub fn new(initial: Snapshot) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// The last committed snapshot.
    #[must_use]
    pub fn read(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.sender.borrow())
    }

    /// Apply `change` to a private copy and publish it.
    ///
    /// Commits are serialized by the channel; the closure must not block.
    pub fn commit(&self, change: impl FnOnce(&mut Snapshot)) {
        self.sender.send_modify(|current| change(Arc::make_mut(current)));
    }

    /// Receiver notified on every commit.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.sender.subscribe()
    }
}

//! Change notifications for UI layers.
//!
//! Writers publish a [`ChangeEvent`] after every mutation so that hosts can
//! refresh their views without the storage core knowing about any UI
//! framework. Publishing never blocks and never fails; events are dropped
//! when nobody subscribes.

use tokio::sync::broadcast;

/// A mutation that happened in the storage core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Records were written to a store.
    StoreWritten {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
        /// Number of records written.
        rows: usize,
    },
    /// A store was emptied.
    StoreCleared {
        /// Database name.
        db: String,
        /// Store name.
        store: String,
    },
    /// A database moved to a new schema version.
    SchemaChanged {
        /// Database name.
        db: String,
        /// The new version.
        version: u32,
    },
    /// A database was deleted.
    DatabaseDeleted {
        /// Database name.
        db: String,
    },
}

impl ChangeEvent {
    /// The database the event belongs to.
    pub fn db(&self) -> &str {
        match self {
            Self::StoreWritten { db, .. }
            | Self::StoreCleared { db, .. }
            | Self::SchemaChanged { db, .. }
            | Self::DatabaseDeleted { db } => db,
        }
    }
}

/// Fan-out channel for [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    /// Creates a notifier that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::trace!(?event, "change event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Active document publisher
//!
//! Holds the document every decoder reads from. Replacing it is a single swap of an
//! `Arc`, so readers that already hold a snapshot keep a consistent view until they
//! fetch again. Subscribers receive each new snapshot over a channel, in
//! generation order.
//!
//! Writers are serialized by a separate lock, so an edit that reads the current
//! document and publishes its result cannot interleave with another writer.

use crate::signals::database::DbcDocument;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One published version of the document
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Increases by one on every publish; the initial empty document is 0
    pub generation: u64,
    pub document: Arc<DbcDocument>,
}

/// Store for the active document
pub struct DocumentStore {
    current: RwLock<Snapshot>,
    writer: Mutex<()>,
    subscribers: Mutex<Vec<Sender<Snapshot>>>,
}

impl DocumentStore {
    /// Create a store holding an empty document
    pub fn new() -> Self {
        Self::with_document(DbcDocument::new())
    }

    pub fn with_document(document: DbcDocument) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                generation: 0,
                document: Arc::new(document),
            }),
            writer: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current snapshot (polling accessor)
    pub fn snapshot(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current document
    pub fn document(&self) -> Arc<DbcDocument> {
        self.snapshot().document
    }

    /// Replace the active document and notify subscribers
    pub fn publish(&self, document: DbcDocument) -> Snapshot {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.install(document)
    }

    /// Derive the next document from the current one and publish it
    ///
    /// No other publish can happen between reading the current document and
    /// installing the result. Returning `None` keeps the current document.
    pub fn update<T, F>(&self, edit: F) -> (Option<Snapshot>, T)
    where
        F: FnOnce(&DbcDocument) -> (Option<DbcDocument>, T),
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.document();
        let (next, value) = edit(&current);
        (next.map(|document| self.install(document)), value)
    }

    /// Caller holds `writer`
    fn install(&self, document: DbcDocument) -> Snapshot {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.generation + 1;
        *current = Snapshot {
            generation,
            document: Arc::new(document),
        };
        let snapshot = current.clone();

        log::info!(
            "Published DBC document generation {} ({} messages)",
            snapshot.generation,
            snapshot.document.messages.len()
        );

        // Sent before the write lock is released so subscribers see generations in order
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());

        snapshot
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Number of live subscribers (as of the last publish)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

use log::{debug, info};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};
use tokio::sync::watch;

use crate::{Document, Query};

/// A live query. Every push carries the full current result set.
///
/// Pushes that arrive before the previous one was read replace it, so a reader that falls
/// behind only ever sees the latest result set.
///
/// Dropping the subscription or calling [`Subscription::unsubscribe`] stops delivery;
/// unsubscribing more than once is a no-op.
pub struct Subscription {
    receiver: watch::Receiver<Vec<Document>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(receiver: watch::Receiver<Vec<Document>>, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Waits for the next push. `None` once unsubscribed or once the store is gone.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        if !self.is_active() {
            return None;
        }
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Returns an unread push without waiting.
    pub fn try_next(&mut self) -> Option<Vec<Document>> {
        if !self.is_active() {
            return None;
        }
        match self.receiver.has_changed() {
            Ok(true) => Some(self.receiver.borrow_and_update().clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Subscriber {
    query: Query,
    sender: watch::Sender<Vec<Document>>,
}

/// Live queries registered against one store.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl Registry {
    pub fn insert(&self, query: Query, sender: watch::Sender<Vec<Document>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "subscription {} opened on {}",
            id,
            query.collection_name()
        );
        self.lock().insert(id, Subscriber { query, sender });
        id
    }

    pub fn remove(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            info!("subscription {} closed", id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Pushes fresh results to every live query on `collection`.
    pub fn publish(&self, collection: &str, documents: &[Document]) {
        let mut subscribers = self.lock();
        let mut gone = Vec::new();
        for (id, subscriber) in subscribers.iter() {
            if subscriber.query.collection_name() != collection {
                continue;
            }
            let result = subscriber.query.run(documents.to_vec());
            debug!("pushing {} documents to subscription {}", result.len(), id);
            if subscriber.sender.send(result).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            subscribers.remove(&id);
        }
    }

    pub fn watches(&self, collection: &str) -> bool {
        self.lock()
            .values()
            .any(|subscriber| subscriber.query.collection_name() == collection)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

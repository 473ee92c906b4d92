//! Store and push doubles for the crate's tests.

use argon2::Params;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use puzzle_auth::{AuthProvider, LocalAuth, Session};
use puzzle_db::{DocumentStore, Error as DbError, Query, SqliteStore, Subscription, Update};
use puzzle_msg::{Post, PostContent, PostId};
use puzzle_push::{Error as PushError, PushDispatcher, PushMessage};
use puzzle_ref::{Email, PushToken, Tag, UserId};
use serde_json::{Map, Value};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::{account, AppContext, FeedConfig};

pub const PASSWORD: &str = "puzzle123";

/// A post by `userA` created `secs` seconds after the epoch.
pub fn post(id: &str, secs: i64) -> Post {
    let email = Email::from_string("a@example.com".to_string()).unwrap();
    let author = UserId::from_string("userA".to_string()).unwrap();
    let created_at = Utc.timestamp_opt(secs, 0).unwrap();
    Post {
        id: PostId::from_string(id.to_string()).unwrap(),
        content: PostContent::new(&email, author, &format!("post {}", id), Tag::Win, created_at)
            .unwrap(),
    }
}

/// Wraps a [`SqliteStore`], counting reads and failing chosen calls.
pub struct TestStore {
    inner: SqliteStore,
    gets: AtomicUsize,
    failing_writes: Mutex<HashSet<(String, String)>>,
    failing_reads: AtomicBool,
}

impl TestStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            gets: AtomicUsize::new(0),
            failing_writes: Mutex::new(HashSet::new()),
            failing_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_writes_to(&self, collection: &str, id: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failing_writes.lock().unwrap().clear();
        self.failing_reads.store(false, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reset_counts(&self) {
        self.gets.store(0, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscription_count()
    }

    fn check_write(&self, collection: &str, id: &str) -> Result<(), DbError> {
        let failing = self
            .failing_writes
            .lock()
            .unwrap()
            .contains(&(collection.to_string(), id.to_string()));
        if failing {
            Err(DbError::Unavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for TestStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Map<String, Value>,
    ) -> Result<String, DbError> {
        if let Some(id) = id {
            self.check_write(collection, id)?;
        }
        self.inner.create(collection, id, fields).await
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), DbError> {
        self.check_write(collection, id)?;
        self.inner.set(collection, id, fields).await
    }

    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<(), DbError> {
        self.check_write(collection, id)?;
        self.inner.update(collection, id, update).await
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<puzzle_db::Document>, DbError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("injected read failure".to_string()));
        }
        self.inner.get(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<puzzle_db::Document>, DbError> {
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, DbError> {
        self.inner.subscribe(query).await
    }
}

/// Records every message it is asked to send.
pub struct RecordingPush {
    sender: mpsc::UnboundedSender<PushMessage>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<PushMessage>>,
}

impl RecordingPush {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
        }
    }

    /// Waits for the next sent message.
    pub async fn next(&self) -> PushMessage {
        self.receiver.lock().await.recv().await.unwrap()
    }
}

#[async_trait]
impl PushDispatcher for RecordingPush {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        self.sender.send(message.clone()).unwrap();
        Ok(())
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub store: Arc<TestStore>,
    pub auth: Arc<LocalAuth>,
    pub pushes: Arc<RecordingPush>,
}

impl Harness {
    pub async fn new(config: FeedConfig) -> Self {
        let store = Arc::new(TestStore::new().await);
        let cheap = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
        let auth = Arc::new(LocalAuth::in_memory().await.unwrap().with_params(cheap));
        let pushes = Arc::new(RecordingPush::new());
        let ctx = AppContext::new(store.clone(), auth.clone(), pushes.clone(), config);
        Self {
            ctx,
            store,
            auth,
            pushes,
        }
    }

    /// Registers `email` and leaves it signed in.
    pub async fn register(&self, email: &str) -> Session {
        self.auth.sign_out().await;
        account::register(&self.ctx, email, PASSWORD, None)
            .await
            .unwrap()
    }

    pub async fn register_with_token(&self, email: &str, token: &str) -> Session {
        self.auth.sign_out().await;
        let token = PushToken::from_string(token.to_string()).unwrap();
        account::register(&self.ctx, email, PASSWORD, Some(&token))
            .await
            .unwrap()
    }
}

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use sqlx::{Connection, SqliteConnection};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

mod ops;
mod query;
pub mod sql;
mod subscription;
pub use ops::{FieldOp, FieldPath, Update};
pub use query::{Direction, Query};
pub use subscription::Subscription;
use sql::*;
use subscription::Registry;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Sql error, cause: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("Json error, cause: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("Document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },
    #[error("Stored document {collection}/{id} is not a JSON object")]
    NotAnObject { collection: String, id: String },
    #[error("Invalid field path: {0}")]
    InvalidPath(String),
    #[error("Database schema version {found} does not match expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },
    #[error("Store unavailable, cause: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// The remote document store the app is a client of.
///
/// Each call is atomic for the one document it touches and nothing wider.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document, generating an id when none is given.
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Map<String, Value>,
    ) -> Result<String, Error>;

    /// Writes the whole document, replacing whatever was there.
    async fn set(&self, collection: &str, id: &str, fields: Map<String, Value>)
        -> Result<(), Error>;

    /// Applies field operations to an existing document.
    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<(), Error>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, Error>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, Error>;

    /// Opens a live query. The current result set is delivered immediately.
    async fn subscribe(&self, query: Query) -> Result<Subscription, Error>;
}

/// [`DocumentStore`] kept in a single SQLite database.
pub struct SqliteStore {
    sql: Mutex<SqliteConnection>,
    subscribers: Arc<Registry>,
}

impl SqliteStore {
    pub async fn new(sql_path: &str) -> Result<Self, Error> {
        let mut sql = create_connection(sql_path).await?;

        match get_db_version(&mut sql).await? {
            None => {
                info!("setting up new document database at {}", sql_path);
                setup_new_db(&mut sql).await?;
            }
            Some(MIGRATION_VERSION_NUMBER) => {}
            Some(found) => {
                return Err(Error::SchemaVersion {
                    found,
                    expected: MIGRATION_VERSION_NUMBER,
                })
            }
        }
        setup_db(&mut sql).await?;

        Ok(Self {
            sql: Mutex::new(sql),
            subscribers: Arc::new(Registry::default()),
        })
    }

    pub async fn in_memory() -> Result<Self, Error> {
        Self::new("sqlite::memory:").await
    }

    pub async fn check_integrity(&self) -> Result<bool, Error> {
        let mut sql = self.sql.lock().await;
        Ok(check_db_integrity(&mut sql).await?)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    async fn load_collection(
        sql: &mut SqliteConnection,
        collection: &str,
    ) -> Result<Vec<Document>, Error> {
        let rows = select_collection(sql, collection).await?;
        let mut documents = Vec::with_capacity(rows.len());
        for (id, raw) in rows {
            let fields = parse_fields(collection, &id, &raw)?;
            documents.push(Document { id, fields });
        }
        Ok(documents)
    }

    // Runs while the write lock is still held so pushes leave in commit order.
    async fn publish(&self, sql: &mut SqliteConnection, collection: &str) {
        if !self.subscribers.watches(collection) {
            return;
        }
        match Self::load_collection(sql, collection).await {
            Ok(documents) => self.subscribers.publish(collection, &documents),
            Err(err) => warn!("failed to refresh live queries on {}: {}", collection, err),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Map<String, Value>,
    ) -> Result<String, Error> {
        let id = match id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let raw = serde_json::to_string(&fields)?;

        let mut sql = self.sql.lock().await;
        if !insert_document(&mut sql, collection, &id, &raw).await? {
            return Err(Error::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }
        debug!("created {}/{}", collection, id);
        self.publish(&mut sql, collection).await;

        Ok(id)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), Error> {
        let raw = serde_json::to_string(&fields)?;

        let mut sql = self.sql.lock().await;
        upsert_document(&mut sql, collection, id, &raw).await?;
        debug!("set {}/{}", collection, id);
        self.publish(&mut sql, collection).await;

        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<(), Error> {
        let mut sql = self.sql.lock().await;

        let mut tx = sql.begin().await?;
        let raw = select_document(&mut *tx, collection, id)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let mut fields = parse_fields(collection, id, &raw)?;
        update.apply(&mut fields)?;
        update_document(&mut *tx, collection, id, &serde_json::to_string(&fields)?).await?;
        tx.commit().await?;

        debug!("updated {}/{} with {} ops", collection, id, update.ops().len());
        self.publish(&mut sql, collection).await;

        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, Error> {
        let mut sql = self.sql.lock().await;
        let raw = select_document(&mut sql, collection, id).await?;

        raw.map(|raw| {
            Ok(Document {
                id: id.to_string(),
                fields: parse_fields(collection, id, &raw)?,
            })
        })
        .transpose()
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, Error> {
        let mut sql = self.sql.lock().await;
        let documents = Self::load_collection(&mut sql, query.collection_name()).await?;
        Ok(query.run(documents))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, Error> {
        let mut sql = self.sql.lock().await;
        let documents = Self::load_collection(&mut sql, query.collection_name()).await?;

        let (sender, receiver) = watch::channel(Vec::new());
        sender.send_replace(query.run(documents));
        let id = self.subscribers.insert(query, sender);

        let registry = Arc::downgrade(&self.subscribers);
        Ok(Subscription::new(receiver, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        }))
    }
}

fn parse_fields(collection: &str, id: &str, raw: &str) -> Result<Map<String, Value>, Error> {
    match serde_json::from_str(raw)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(Error::NotAnObject {
            collection: collection.to_string(),
            id: id.to_string(),
        }),
    }
}

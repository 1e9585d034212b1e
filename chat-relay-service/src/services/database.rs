//! MongoDB-backed chat store.
//!
//! Sessions live in `chatsessions`; conversation turns live in `chatdetails`
//! and reference their session through `sessionId`.

use crate::models::{ChatDetail, SessionKey};
use crate::services::store::ChatStore;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    options::{FindOneOptions, FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

const SESSIONS_COLLECTION: &str = "chatsessions";
const DETAILS_COLLECTION: &str = "chatdetails";

#[derive(Clone)]
pub struct ChatDb {
    client: MongoClient,
    db: Database,
}

impl ChatDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for chat-relay-service");

        // History reads filter by session and sort by time
        let history_index = IndexModel::builder()
            .keys(doc! { "sessionId": 1, "timestamp": 1, "_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("session_history_idx".to_string())
                    .build(),
            )
            .build();

        self.details()
            .create_index(history_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create session_history index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    // Collection accessors

    pub fn sessions(&self) -> Collection<Document> {
        self.db.collection(SESSIONS_COLLECTION)
    }

    pub fn details(&self) -> Collection<ChatDetail> {
        self.db.collection(DETAILS_COLLECTION)
    }
}

#[async_trait]
impl ChatStore for ChatDb {
    async fn session_exists(&self, session_id: &SessionKey) -> Result<bool, AppError> {
        let options = FindOneOptions::builder()
            .projection(doc! { "_id": 1 })
            .build();

        let session = self
            .sessions()
            .find_one(doc! { "_id": session_id.to_bson() }, options)
            .await
            .map_err(|e| {
                tracing::error!(session_id = %session_id, "Failed to find chat session: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        Ok(session.is_some())
    }

    async fn load_history(
        &self,
        session_id: &SessionKey,
        limit: i64,
    ) -> Result<Vec<ChatDetail>, AppError> {
        // Newest turns first so the cap drops the oldest ones
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(limit)
            .build();

        let cursor = self
            .details()
            .find(doc! { "sessionId": session_id.to_bson() }, options)
            .await
            .map_err(|e| {
                tracing::error!(session_id = %session_id, "Failed to query chat details: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        let mut history: Vec<ChatDetail> = cursor.try_collect().await.map_err(|e| {
            tracing::error!(session_id = %session_id, "Failed to collect chat details: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        history.reverse();
        Ok(history)
    }

    async fn append_detail(&self, detail: &ChatDetail) -> Result<(), AppError> {
        self.details().insert_one(detail, None).await.map_err(|e| {
            tracing::error!(session_id = %detail.session_id, "Failed to insert chat detail: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }
}

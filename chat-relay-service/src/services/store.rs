//! Session store abstraction and the session history reader.

use crate::error::QueryError;
use crate::models::{ChatDetail, CompletionMessage, SessionKey};
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Persistent storage for chat sessions and their turns.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Whether a session with this id exists.
    async fn session_exists(&self, session_id: &SessionKey) -> Result<bool, AppError>;

    /// The newest `limit` turns of a session, oldest first.
    async fn load_history(
        &self,
        session_id: &SessionKey,
        limit: i64,
    ) -> Result<Vec<ChatDetail>, AppError>;

    /// Append one turn.
    async fn append_detail(&self, detail: &ChatDetail) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// A session's history, ready to hand to a completion provider.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    pub session_id: SessionKey,
    pub messages: Vec<CompletionMessage>,
}

/// Parse a caller-supplied session id.
pub fn parse_session_id(raw: &str) -> Result<SessionKey, QueryError> {
    SessionKey::parse(raw)
        .ok_or_else(|| QueryError::InvalidArgument(format!("Invalid session id: {:?}", raw)))
}

/// Load the ordered history of the session named by `raw_session_id`.
pub async fn read_session(
    store: &dyn ChatStore,
    raw_session_id: &str,
    limit: i64,
) -> Result<SessionHistory, QueryError> {
    let session_id = parse_session_id(raw_session_id)?;

    if !store.session_exists(&session_id).await? {
        return Err(QueryError::NotFound);
    }

    let details = store.load_history(&session_id, limit).await?;

    Ok(SessionHistory {
        session_id,
        messages: details.iter().map(CompletionMessage::from).collect(),
    })
}

/// In-process store for tests and local runs.
#[derive(Default)]
pub struct InMemoryChatStore {
    sessions: RwLock<HashSet<SessionKey>>,
    details: RwLock<Vec<ChatDetail>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with a fresh `ObjectId` and return its key.
    pub async fn create_session(&self) -> SessionKey {
        let key = SessionKey::ObjectId(ObjectId::new());
        self.add_session(key.clone()).await;
        key
    }

    /// Register a session under a given key.
    pub async fn add_session(&self, key: SessionKey) {
        self.sessions.write().await.insert(key);
    }

    /// Insert a turn as-is, bypassing failure injection.
    pub async fn insert_detail(&self, detail: ChatDetail) {
        let mut detail = detail;
        detail.id.get_or_insert_with(ObjectId::new);
        self.details.write().await.push(detail);
    }

    /// Every stored turn of `session_id`, in insertion order.
    pub async fn details_for(&self, session_id: &SessionKey) -> Vec<ChatDetail> {
        self.details
            .read()
            .await
            .iter()
            .filter(|d| &d.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!("store unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn session_exists(&self, session_id: &SessionKey) -> Result<bool, AppError> {
        self.check_reads()?;
        Ok(self.sessions.read().await.contains(session_id))
    }

    async fn load_history(
        &self,
        session_id: &SessionKey,
        limit: i64,
    ) -> Result<Vec<ChatDetail>, AppError> {
        self.check_reads()?;
        let mut history = self.details_for(session_id).await;
        // Stable sort keeps insertion order for equal timestamps
        history.sort_by_key(|d| d.timestamp);
        let keep = usize::try_from(limit).unwrap_or(0);
        let skip = history.len().saturating_sub(keep);
        Ok(history.split_off(skip))
    }

    async fn append_detail(&self, detail: &ChatDetail) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!("write rejected")));
        }
        self.insert_detail(detail.clone()).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.check_reads()
    }
}

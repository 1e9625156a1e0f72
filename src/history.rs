//! Per-user tool history

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::HistoryEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// No entry with this id for the user
    NotFound(String),
    /// Backing store could not complete the operation
    Backend(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::NotFound(id) => write!(f, "history entry {} not found", id),
            HistoryError::Backend(msg) => write!(f, "history store error: {}", msg),
        }
    }
}

impl std::error::Error for HistoryError {}

/// Storage for tool invocations, keyed by user id
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append an entry to the user's history.
    async fn append(&self, user_id: &str, entry: HistoryEntry) -> Result<(), HistoryError>;

    /// All entries for the user, oldest first.
    async fn list(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// Remove one entry and return what is left.
    async fn delete(&self, user_id: &str, entry_id: &str)
        -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// Process-local history, bounded per user
pub struct InMemoryHistoryStore {
    entries: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
    limit: usize,
}

impl InMemoryHistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, user_id: &str, entry: HistoryEntry) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;
        let list = entries.entry(user_id.to_string()).or_default();
        list.push_back(entry);
        while list.len() > self.limit {
            list.pop_front();
        }
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(user_id)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(
        &self,
        user_id: &str,
        entry_id: &str,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = self.entries.write().await;
        let list = entries
            .get_mut(user_id)
            .ok_or_else(|| HistoryError::NotFound(entry_id.to_string()))?;
        let before = list.len();
        list.retain(|entry| entry.id != entry_id);
        if list.len() == before {
            return Err(HistoryError::NotFound(entry_id.to_string()));
        }
        Ok(list.iter().cloned().collect())
    }
}

/// Write an entry without making the caller wait. Failures are logged only.
pub fn record_in_background(store: Arc<dyn HistoryStore>, user_id: String, entry: HistoryEntry) {
    tokio::spawn(async move {
        let tool = entry.tool_name.clone();
        match store.append(&user_id, entry).await {
            Ok(()) => debug!(user = %user_id, tool = %tool, "Recorded history entry"),
            Err(e) => warn!(user = %user_id, tool = %tool, error = %e, "Failed to record history"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list_per_user() {
        let store = InMemoryHistoryStore::new(10);
        store
            .append("alice", HistoryEntry::new("JWT Decoder", json!({"token": "t"})))
            .await
            .unwrap();
        store
            .append("bob", HistoryEntry::new("URL Encoder", json!("a b")))
            .await
            .unwrap();

        let alice = store.list("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].tool_name, "JWT Decoder");
        assert!(store.list("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_drops_oldest() {
        let store = InMemoryHistoryStore::new(2);
        for i in 0..3 {
            store
                .append("alice", HistoryEntry::new("Regex Tester", json!(i)))
                .await
                .unwrap();
        }
        let list = store.list("alice").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].input, json!(1));
        assert_eq!(list[1].input, json!(2));
    }

    #[tokio::test]
    async fn test_delete_returns_remaining() {
        let store = InMemoryHistoryStore::new(10);
        let keep = HistoryEntry::new("JSON to CSV", json!({}));
        let removed = HistoryEntry::new("API Tester", json!({}));
        let removed_id = removed.id.clone();
        store.append("alice", keep.clone()).await.unwrap();
        store.append("alice", removed).await.unwrap();

        let remaining = store.delete("alice", &removed_id).await.unwrap();
        assert_eq!(remaining, vec![keep]);
        assert_eq!(
            store.delete("alice", &removed_id).await,
            Err(HistoryError::NotFound(removed_id))
        );
    }

    #[tokio::test]
    async fn test_delete_for_unknown_user() {
        let store = InMemoryHistoryStore::new(10);
        assert!(matches!(
            store.delete("nobody", "x").await,
            Err(HistoryError::NotFound(_))
        ));
    }

    struct FailingStore;

    #[async_trait]
    impl HistoryStore for FailingStore {
        async fn append(&self, _: &str, _: HistoryEntry) -> Result<(), HistoryError> {
            Err(HistoryError::Backend("down".into()))
        }
        async fn list(&self, _: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
            Err(HistoryError::Backend("down".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
            Err(HistoryError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_background_write_failure_is_contained() {
        record_in_background(
            Arc::new(FailingStore),
            "alice".into(),
            HistoryEntry::new("API Tester", json!({})),
        );
        tokio::task::yield_now().await;
    }
}

use crate::store::{
    matches_all, Document, DocumentStore, Predicate, Row, StoreError, StoreEvent, Subscription,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

type DocKey = (String, String);

struct DocWatcher {
    key: DocKey,
    tx: mpsc::UnboundedSender<StoreEvent<Option<Document>>>,
}

struct QueryWatcher {
    collection: String,
    predicates: Vec<Predicate>,
    tx: mpsc::UnboundedSender<StoreEvent<Vec<Row>>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    doc_watchers: HashMap<u64, DocWatcher>,
    query_watchers: HashMap<u64, QueryWatcher>,
    next_watch_id: u64,
    offline: bool,
}

impl Inner {
    fn rows(&self, collection: &str, predicates: &[Predicate]) -> Vec<Row> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| matches_all(predicates, doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        Ok(())
    }

    fn allocate_watch_id(&mut self) -> u64 {
        self.next_watch_id += 1;
        self.next_watch_id
    }

    /// Pushes the current state of `collection/id` to every interested watcher.
    fn publish(&mut self, collection: &str, id: &str) {
        let current = self.document(collection, id);
        self.doc_watchers.retain(|_, w| {
            if w.key.0 != collection || w.key.1 != id {
                return true;
            }
            w.tx.send(StoreEvent::Changed(current.clone())).is_ok()
        });

        let mut results: Vec<(u64, Vec<Row>)> = Vec::new();
        for (watch_id, w) in &self.query_watchers {
            if w.collection == collection {
                results.push((*watch_id, self.rows(collection, &w.predicates)));
            }
        }
        for (watch_id, rows) in results {
            let alive = self
                .query_watchers
                .get(&watch_id)
                .is_some_and(|w| w.tx.send(StoreEvent::Changed(rows)).is_ok());
            if !alive {
                self.query_watchers.remove(&watch_id);
            }
        }
    }
}

/// In-process document store with live watchers.
///
/// Cloning shares the same underlying data. Besides the `DocumentStore`
/// operations it exposes writes and fault injection for drivers and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whole-document write; last write wins.
    pub fn put(&self, collection: &str, id: &str, doc: Document) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        debug!(collection, id, "document written");
        inner.publish(collection, id);
    }

    pub fn remove(&self, collection: &str, id: &str) {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            inner.publish(collection, id);
        }
    }

    /// Delivers a transport failure to every watcher of `collection/id`.
    pub fn fail_document(&self, collection: &str, id: &str, reason: &str) {
        let inner = self.lock();
        for w in inner.doc_watchers.values() {
            if w.key.0 == collection && w.key.1 == id {
                let _ = w
                    .tx
                    .send(StoreEvent::Failed(StoreError::Transport(reason.to_string())));
            }
        }
    }

    /// Delivers a transport failure to every query watcher on `collection`.
    pub fn fail_queries(&self, collection: &str, reason: &str) {
        let inner = self.lock();
        for w in inner.query_watchers.values() {
            if w.collection == collection {
                let _ = w
                    .tx
                    .send(StoreEvent::Failed(StoreError::Transport(reason.to_string())));
            }
        }
    }

    /// While offline, reads, appends and new subscriptions fail with a
    /// transport error. Existing watches stay open.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock().document(collection, id)
    }

    pub fn watcher_count(&self) -> usize {
        let inner = self.lock();
        inner.doc_watchers.len() + inner.query_watchers.len()
    }

    fn release_handle(&self, watch_id: u64) -> impl FnOnce() + Send + 'static {
        let inner = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.doc_watchers.remove(&watch_id);
                inner.query_watchers.remove(&watch_id);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.document(collection, id))
    }

    async fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<Document>>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_id = {
            let mut inner = self.lock();
            inner.check_online()?;
            let watch_id = inner.allocate_watch_id();
            // First event mirrors the current state, like a vendor snapshot listener.
            let _ = tx.send(StoreEvent::Changed(inner.document(collection, id)));
            inner.doc_watchers.insert(
                watch_id,
                DocWatcher {
                    key: (collection.to_string(), id.to_string()),
                    tx,
                },
            );
            watch_id
        };
        debug!(collection, id, watch_id, "document watch opened");
        Ok(Subscription::new(rx, self.release_handle(watch_id)))
    }

    async fn query(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Row>, StoreError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.rows(collection, predicates))
    }

    async fn subscribe_query(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Subscription<Vec<Row>>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_id = {
            let mut inner = self.lock();
            inner.check_online()?;
            let watch_id = inner.allocate_watch_id();
            let _ = tx.send(StoreEvent::Changed(inner.rows(collection, predicates)));
            inner.query_watchers.insert(
                watch_id,
                QueryWatcher {
                    collection: collection.to_string(),
                    predicates: predicates.to_vec(),
                    tx,
                },
            );
            watch_id
        };
        debug!(collection, watch_id, "query watch opened");
        Ok(Subscription::new(rx, self.release_handle(watch_id)))
    }

    async fn append(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        item: Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_online()?;
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        match doc.entry(field.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(items) => items.push(item),
            other => *other = Value::Array(vec![item]),
        }
        inner.publish(collection, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn document_watch_sees_initial_state_then_writes() {
        let store = MemoryStore::new();
        store.put("chats", "c1", doc(json!({"v": 1})));
        let mut sub = store.subscribe("chats", "c1").await.unwrap();

        assert_eq!(
            sub.next().await,
            Some(StoreEvent::Changed(Some(doc(json!({"v": 1})))))
        );
        store.put("chats", "c1", doc(json!({"v": 2})));
        store.put("chats", "other", doc(json!({"v": 9})));
        assert_eq!(
            sub.next().await,
            Some(StoreEvent::Changed(Some(doc(json!({"v": 2})))))
        );
        store.remove("chats", "c1");
        assert_eq!(sub.next().await, Some(StoreEvent::Changed(None)));
    }

    #[tokio::test]
    async fn query_watch_tracks_matching_rows() {
        let store = MemoryStore::new();
        let filter = [Predicate::eq("buyerId", "B1")];
        let mut sub = store.subscribe_query("rfqs", &filter).await.unwrap();
        assert_eq!(sub.next().await, Some(StoreEvent::Changed(vec![])));

        store.put("rfqs", "r1", doc(json!({"buyerId": "B1"})));
        store.put("rfqs", "r2", doc(json!({"buyerId": "B2"})));
        let Some(StoreEvent::Changed(rows)) = sub.next().await else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "r1");

        // The unrelated write still re-evaluates the query.
        let Some(StoreEvent::Changed(rows)) = sub.next().await else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_watcher() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("chats", "c1").await.unwrap();
        assert_eq!(store.watcher_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.watcher_count(), 0);
        store.put("chats", "c1", doc(json!({})));
        // Only the initial snapshot that was already buffered remains.
        assert_eq!(sub.next().await, Some(StoreEvent::Changed(None)));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn offline_store_rejects_reads_and_appends() {
        let store = MemoryStore::new();
        store.put("chats", "c1", doc(json!({"messages": []})));
        store.set_offline(true);
        assert!(matches!(
            store.get("chats", "c1").await,
            Err(StoreError::Transport(_))
        ));
        assert!(store.subscribe("chats", "c1").await.is_err());
        assert!(store
            .append("chats", "c1", "messages", json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn append_extends_array_and_notifies() {
        let store = MemoryStore::new();
        store.put("chats", "c1", doc(json!({})));
        let mut sub = store.subscribe("chats", "c1").await.unwrap();
        let _ = sub.next().await;

        store
            .append("chats", "c1", "messages", json!({"text": "hi"}))
            .await
            .unwrap();
        let Some(StoreEvent::Changed(Some(d))) = sub.next().await else {
            panic!("expected document");
        };
        assert_eq!(d["messages"], json!([{"text": "hi"}]));

        let missing = store.append("chats", "nope", "messages", json!({})).await;
        assert!(matches!(missing, Err(StoreError::Missing { .. })));
    }

    #[tokio::test]
    async fn injected_failure_reaches_document_watchers() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("chatProducts", "c1").await.unwrap();
        let _ = sub.next().await;
        store.fail_document("chatProducts", "c1", "socket reset");
        assert_eq!(
            sub.next().await,
            Some(StoreEvent::Failed(StoreError::Transport("socket reset".into())))
        );
    }
}

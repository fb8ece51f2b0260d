use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

/// A schemaless document as held by the store.
pub type Document = Map<String, Value>;

/// A query result row: document id and its fields.
pub type Row = (String, Document);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("document {collection}/{id} does not exist")]
    Missing { collection: String, id: String },
}

/// Equality filter on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub value: Value,
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

pub fn matches_all(predicates: &[Predicate], doc: &Document) -> bool {
    predicates.iter().all(|p| p.matches(doc))
}

/// One push notification from a watched document or query.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent<T> {
    Changed(T),
    Failed(StoreError),
}

/// A standing watch on a document or query.
///
/// Events arrive in the commit order of the watched resource. Releasing is
/// idempotent and also happens on drop.
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<StoreEvent<T>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(
        events: mpsc::UnboundedReceiver<StoreEvent<T>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            release: Some(Box::new(release)),
        }
    }

    /// `None` once the store side has gone away or the watch was released.
    pub async fn next(&mut self) -> Option<StoreEvent<T>> {
        self.events.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.events.close();
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The external document store ConversationSync is built against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<Document>>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<Row>, StoreError>;

    async fn subscribe_query(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Subscription<Vec<Row>>, StoreError>;

    /// Appends `item` to the array held in `field` of an existing document.
    async fn append(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        item: Value,
    ) -> Result<(), StoreError>;
}

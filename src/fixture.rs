use crate::memory_store::MemoryStore;
use crate::store::Document;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Seed file layout: `{ "<collection>": { "<id>": { ...fields } } }`.
pub type Fixture = BTreeMap<String, BTreeMap<String, Value>>;

pub fn parse(content: &str) -> Result<Fixture> {
    serde_json::from_str(content).context("failed to parse fixture json")
}

pub fn seed(store: &MemoryStore, fixture: Fixture) -> Result<usize> {
    let mut count = 0;
    for (collection, docs) in fixture {
        for (id, value) in docs {
            let doc: Document = match value {
                Value::Object(map) => map,
                _ => bail!("fixture document {collection}/{id} is not an object"),
            };
            store.put(&collection, &id, doc);
            count += 1;
        }
    }
    Ok(count)
}

pub fn load(store: &MemoryStore, path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture: {}", path.display()))?;
    let count = seed(store, parse(&content)?)?;
    info!(path = %path.display(), documents = count, "fixture loaded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_every_document() {
        let store = MemoryStore::new();
        let fixture = parse(
            r#"{
                "chats": {"c1": {"buyerId": "B1", "supplierId": "S1"}},
                "rfqs": {"r1": {"buyerId": "B1"}, "r2": {"buyerId": "B2"}}
            }"#,
        )
        .unwrap();
        assert_eq!(seed(&store, fixture).unwrap(), 3);
        assert!(store.document("rfqs", "r2").is_some());
    }

    #[test]
    fn non_object_document_is_rejected() {
        let store = MemoryStore::new();
        let fixture = parse(r#"{"chats": {"c1": [1, 2]}}"#).unwrap();
        assert!(seed(&store, fixture).is_err());
    }
}

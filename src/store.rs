//! Document store access.
//!
//! [`DocumentStore`] is the seam between the pipeline and persistence.
//! [`MongoStore`] talks to MongoDB; [`MemoryStore`] keeps collections in
//! process for offline runs.

use crate::config::Settings;
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Database};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Minimal set of document-store operations the pipeline needs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Distinct values of a (dotted) field across a collection.
    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>>;

    /// Bulk insert; returns the number of inserted documents.
    async fn insert_many(&self, collection: &str, documents: Vec<Map<String, Value>>) -> Result<usize>;

    /// Up to `limit` documents from a collection.
    async fn find(&self, collection: &str, limit: i64) -> Result<Vec<Value>>;
}

/// MongoDB-backed store.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect using `MONGO_URL` from the settings.
    ///
    /// A missing URL is a config error. The driver connects lazily, so an
    /// unreachable server surfaces on the first operation instead.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let url = settings.require_mongo_url()?;
        let client = Client::with_uri_str(url)
            .await
            .map_err(|e| HarvestError::Config(format!("Invalid MongoDB connection string: {}", e)))?;
        info!(database = %settings.database, "MongoDB client ready");
        Ok(Self {
            db: client.database(&settings.database),
        })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>> {
        let values = self
            .db
            .collection::<Document>(collection)
            .distinct(field, doc! {})
            .await?;
        debug!(collection, field, count = values.len(), "Fetched distinct values");
        Ok(values.into_iter().map(Bson::into_relaxed_extjson).collect())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Map<String, Value>>) -> Result<usize> {
        let documents = documents
            .iter()
            .map(mongodb::bson::to_document)
            .collect::<std::result::Result<Vec<Document>, _>>()?;
        let result = self
            .db
            .collection::<Document>(collection)
            .insert_many(documents)
            .await?;
        Ok(result.inserted_ids.len())
    }

    async fn find(&self, collection: &str, limit: i64) -> Result<Vec<Value>> {
        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(doc! {})
            .limit(limit)
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents
            .into_iter()
            .map(|d| Bson::Document(d).into_relaxed_extjson())
            .collect())
    }
}

/// In-process store with MongoDB-like `distinct` semantics.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>>> {
        self.collections
            .lock()
            .map_err(|_| HarvestError::Storage("memory store lock poisoned".to_string()))
    }
}

/// Collect values at a dotted path, unwinding arrays along the way.
fn values_at<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                values_at(item, path, out);
            }
        }
        _ => match path.split_first() {
            None => out.push(value),
            Some((head, rest)) => {
                if let Some(next) = value.get(*head) {
                    values_at(next, rest, out);
                }
            }
        },
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>> {
        let collections = self.lock()?;
        let path: Vec<&str> = field.split('.').collect();
        let mut distinct: Vec<Value> = Vec::new();

        for document in collections.get(collection).into_iter().flatten() {
            let mut found = Vec::new();
            values_at(document, &path, &mut found);
            for value in found {
                if !value.is_null() && !distinct.contains(value) {
                    distinct.push(value.clone());
                }
            }
        }
        Ok(distinct)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Map<String, Value>>) -> Result<usize> {
        let count = documents.len();
        self.lock()?
            .entry(collection.to_string())
            .or_default()
            .extend(documents.into_iter().map(Value::Object));
        Ok(count)
    }

    async fn find(&self, collection: &str, limit: i64) -> Result<Vec<Value>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()?
            .get(collection)
            .map(|docs| docs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_distinct_unwinds_arrays() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_many(
                "works",
                vec![
                    object(json!({"primary_location": {"source": {"issn": ["1111-1111", "2222-2222"]}}})),
                    object(json!({"primary_location": {"source": {"issn": ["2222-2222"]}}})),
                    object(json!({"primary_location": {"source": null}})),
                    object(json!({"title": "no location"})),
                ],
            )
            .await?;

        let values = store.distinct("works", "primary_location.source.issn").await?;
        assert_eq!(values, vec![json!("1111-1111"), json!("2222-2222")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_find_respects_limit() -> Result<()> {
        let store = MemoryStore::new();
        let docs = (0..5).map(|i| object(json!({"n": i}))).collect();
        assert_eq!(store.insert_many("c", docs).await?, 5);

        assert_eq!(store.find("c", 2).await?.len(), 2);
        assert!(store.find("missing", 10).await?.is_empty());
        assert_eq!(store.documents("c").len(), 5);
        Ok(())
    }
}

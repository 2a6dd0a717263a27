use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Backend, Document, Filter, StoreError};

/// In-process document store. Collections keep insertion order.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<(String, String), Vec<(String, Document)>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn find(&self, db: &str, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(&(db.to_owned(), collection.to_owned())) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn upsert(&self, db: &str, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let docs = collections
            .entry((db.to_owned(), collection.to_owned()))
            .or_default();
        match docs.iter_mut().find(|(key, _)| key == id) {
            Some((_, existing)) => *existing = doc,
            None => docs.push((id.to_owned(), doc)),
        }
        Ok(())
    }

    async fn remove(&self, db: &str, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(&(db.to_owned(), collection.to_owned())) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|(key, _)| key != id);
        Ok(docs.len() != before)
    }
}

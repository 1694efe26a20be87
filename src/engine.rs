//! The engine context shared by every document and schema.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use serde_json::Value;

use crate::loader::Fetcher;
use crate::schema::Schema;
use crate::store::{Pending, SchemaStore};

/// Process-wide state: the id counter and the schema store.
///
/// Cloning is cheap and yields a handle to the same engine. Documents keep a
/// handle, so schemas loaded through one document are visible to all.
#[derive(Clone, Default)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    next_id: Cell<u64>,
    store: RefCell<SchemaStore>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh id. Ids are never reused.
    pub fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        id
    }

    /// A fresh schema key, for callers registering schemas by hand.
    pub fn unique_key(&self) -> String {
        format!("k{}", self.next_id())
    }

    pub fn store(&self) -> Ref<'_, SchemaStore> {
        self.inner.store.borrow()
    }

    pub(crate) fn store_mut(&self) -> RefMut<'_, SchemaStore> {
        self.inner.store.borrow_mut()
    }

    /// Register a schema document fetched from `url`.
    pub fn add_schema_document(&self, url: &str, value: Value) -> Schema {
        self.store_mut().add_document(url, value)
    }

    /// Register an in-memory schema under an anonymous URL.
    pub fn create_schema(&self, value: Value) -> Schema {
        self.store_mut().add_anonymous(value)
    }

    /// A `$ref` schema pointing at `url`, resolved lazily.
    pub fn schema_reference(&self, url: &str) -> Schema {
        self.store().reference(url)
    }

    /// Follow `$ref` chains for `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Pending` if a document on the chain is not loaded yet.
    pub fn get_full(&self, schema: &Schema) -> Result<Schema, Pending> {
        self.store().get_full(schema)
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.store().contains(url)
    }

    /// Fetch the schema document at `url` unless it is already loaded.
    /// Failures are recorded in the store, which then serves an empty schema.
    pub fn fetch_schema(&self, url: &str, fetcher: &dyn Fetcher) {
        if self.is_loaded(url) {
            return;
        }
        log::debug!("fetching schema {}", url);
        match fetcher.fetch(url) {
            Ok(fetched) => {
                self.add_schema_document(url, fetched.value);
            }
            Err(err) => self.store_mut().add_failed(url, err.to_string()),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("next_id", &self.inner.next_id.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique() {
        let engine = Engine::new();
        let a = engine.next_id();
        let b = engine.clone().next_id();
        assert!(b > a);
        assert_ne!(engine.unique_key(), engine.unique_key());
    }

    #[test]
    fn store_is_shared_between_handles() {
        let engine = Engine::new();
        let other = engine.clone();
        engine.add_schema_document("http://example.com/s.json", json!({"type": "string"}));
        assert!(other.is_loaded("http://example.com/s.json#/x"));
        let reference = other.schema_reference("http://example.com/s.json");
        assert_eq!(other.get_full(&reference).unwrap().value(), &json!({"type": "string"}));
    }
}

//! Loaded schema documents and `$ref` resolution.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{json, Value};

use crate::schema::{Schema, SchemaDocument};
use crate::uri;

/// URL prefix given to schemas created from in-memory values.
pub const ANONYMOUS_PREFIX: &str = "urn:hyperschema:anonymous:";

/// URL of the empty schema served for unresolvable references.
pub const EMPTY_SCHEMA_URL: &str = "urn:hyperschema:empty";

/// A reference whose target document has not been loaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pending {
    pub url: String,
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiting for {}", self.url)
    }
}

/// All schema documents known to an [`Engine`](crate::Engine).
#[derive(Debug)]
pub struct SchemaStore {
    documents: HashMap<String, Schema>,
    failed: HashMap<String, String>,
    anonymous: u64,
    empty: Schema,
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore {
    pub fn new() -> Self {
        let empty = Schema::root(SchemaDocument::new(
            EMPTY_SCHEMA_URL,
            EMPTY_SCHEMA_URL,
            json!({}),
        ));
        Self {
            documents: HashMap::new(),
            failed: HashMap::new(),
            anonymous: 0,
            empty,
        }
    }

    /// Register a schema document under `url` (any fragment is ignored).
    /// Replaces a previously loaded document with the same URL.
    pub fn add_document(&mut self, url: &str, value: Value) -> Schema {
        let (base, _) = uri::split_fragment(url);
        log::debug!("loaded schema document {}", base);
        let schema = Schema::root(SchemaDocument::new(base, base, value));
        self.failed.remove(base);
        self.documents.insert(base.to_string(), schema.clone());
        schema
    }

    /// Record a failed fetch. The URL resolves to an empty schema from now on.
    pub fn add_failed(&mut self, url: &str, message: impl Into<String>) {
        let (base, _) = uri::split_fragment(url);
        let message = message.into();
        log::warn!("schema {} could not be loaded: {}", base, message);
        self.add_document(base, json!({}));
        self.failed.insert(base.to_string(), message);
    }

    /// Register an in-memory schema under a fresh anonymous URL.
    pub fn add_anonymous(&mut self, value: Value) -> Schema {
        self.anonymous += 1;
        let url = format!("{}{}", ANONYMOUS_PREFIX, self.anonymous);
        self.add_document(&url, value)
    }

    /// A schema that is nothing but a `$ref` to `url`.
    pub fn reference(&self, url: &str) -> Schema {
        Schema::root(SchemaDocument::new(
            format!("ref:{}", url),
            url,
            json!({ "$ref": url }),
        ))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.documents.contains_key(uri::split_fragment(url).0)
    }

    /// The failure message recorded for `url`, if its fetch failed.
    pub fn failure(&self, url: &str) -> Option<&str> {
        self.failed
            .get(uri::split_fragment(url).0)
            .map(String::as_str)
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// The schema that accepts everything.
    pub fn empty(&self) -> Schema {
        self.empty.clone()
    }

    /// Look up the schema addressed by `url` (document URL plus optional
    /// JSON Pointer fragment), without following `$ref`.
    ///
    /// # Errors
    ///
    /// Returns `Pending` when the document has not been loaded.
    pub fn lookup(&self, url: &str) -> Result<Schema, Pending> {
        let (base, fragment) = uri::split_fragment(url);
        let Some(root) = self.documents.get(base) else {
            return Err(Pending {
                url: base.to_string(),
            });
        };
        let fragment = fragment.unwrap_or("");
        if fragment.is_empty() {
            return Ok(root.clone());
        }
        let decoded = percent_encoding::percent_decode_str(fragment).decode_utf8_lossy();
        if !decoded.starts_with('/') {
            log::warn!("unsupported fragment in {}, using empty schema", url);
            return Ok(self.empty());
        }
        match root.at_pointer(&decoded) {
            Some(schema) => Ok(schema),
            None => {
                log::warn!("reference {} not found, using empty schema", url);
                Ok(self.empty())
            }
        }
    }

    /// Follow `$ref` until a full (non-reference) schema is reached.
    ///
    /// Reference cycles that never reach a full schema resolve to the empty
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns `Pending` naming the first unloaded document on the chain.
    pub fn get_full(&self, schema: &Schema) -> Result<Schema, Pending> {
        let mut current = schema.clone();
        let mut seen = HashSet::new();
        while let Some(reference) = current.reference() {
            if !seen.insert(reference.clone()) {
                log::warn!("circular $ref through {}, using empty schema", reference);
                return Ok(self.empty());
            }
            current = self.lookup(&reference)?;
        }
        Ok(current)
    }

    /// Resolve every schema in `schemas`, stopping at the first pending one.
    pub fn get_full_all(&self, schemas: &[Schema]) -> Result<Vec<Schema>, Pending> {
        schemas.iter().map(|s| self.get_full(s)).collect()
    }
}

/// Pointer-qualified URL for `schema`, e.g. `http://x/s.json#/definitions/a`.
pub fn schema_url(schema: &Schema) -> String {
    if schema.pointer().is_empty() {
        schema.document_url().to_string()
    } else {
        format!("{}#{}", schema.document_url(), schema.pointer())
    }
}

//! Hyper-Schema Documents
//!
//! Live JSON documents bound to JSON Hyper-Schema.
//!
//! A [`Document`] holds a JSON value as a tree of nodes. Nodes carry the
//! schemas that apply to them; schemas propagate from parents to children,
//! `oneOf`/`anyOf`/`dependencies` selections follow the data, and link
//! definitions turn into concrete [`ActiveLink`]s. Every mutation is a
//! [`Patch`], so changes can be observed, inverted and replayed.
//!
//! # Example
//!
//! ```
//! use hyperschema::{Document, DocumentOptions, Engine, Patch};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let schema = engine.create_schema(json!({
//!     "properties": {"id": {"type": "integer"}},
//!     "links": [{"rel": "self", "href": "/items/{id}"}]
//! }));
//!
//! let mut doc = Document::new(
//!     &engine,
//!     json!({"id": 1}),
//!     DocumentOptions::new().url("http://example.com/items/"),
//! );
//! let root = doc.root().unwrap().id();
//! doc.add_schema(root, schema, None);
//!
//! let applied = doc.patch(&Patch::new().replace("/id", json!(2))).unwrap();
//! let root = doc.data(root).unwrap();
//! assert_eq!(root.link("self").unwrap().href, "http://example.com/items/2");
//!
//! // Applied patches carry old values and can be undone.
//! doc.patch(&applied.inverse()).unwrap();
//! assert_eq!(doc.value(), Some(json!({"id": 1})));
//! ```
//!
//! # Schema loading
//!
//! The engine never fetches on its own. Bindings whose `$ref` target is not
//! loaded wait; [`Document::pending_urls`] lists what is missing and
//! [`Document::fetch_pending`] loads it through a [`Fetcher`].

mod batch;
mod data;
mod document;
mod engine;
mod error;
mod link;
mod linter;
mod loader;
mod patch;
mod pointer;
mod schema;
mod schema_list;
mod schema_match;
mod schema_set;
mod store;
mod types;
mod uri;
mod uri_template;

pub use batch::DelayedCallbacks;
pub use data::{Data, NodeId};
pub use document::{ChangeListener, Document, DocumentOptions, MatchCallback, StableCallback};
pub use engine::Engine;
pub use error::{BindError, LinkError, LoadError, PatchError, TemplateError, UriError};
pub use link::{ActiveLink, LinkInstance, LinkRequest, PotentialLink, FORM_ENCODING, JSON_ENCODING};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    content_type_profile, is_url, load_document, load_json, load_json_auto, load_json_str,
    load_patch, parse_link_header, response_metadata, AutoFetcher, FileFetcher, Fetched, Fetcher,
};
pub use patch::{Action, Patch, PatchOperation, RAW_PREFIX};
pub use pointer::{escape_component, join_pointer, split_pointer, unescape_component};
pub use schema::{Dependency, Schema};
pub use schema_list::{SchemaList, Synthesis};
pub use schema_match::{
    evaluate, evaluate_list, FailReason, MatchOutcome, OrSelector, SchemaMatch, XorSelector,
};
pub use schema_set::SchemaSet;
pub use store::{schema_url, Pending, SchemaStore, ANONYMOUS_PREFIX, EMPTY_SCHEMA_URL};
pub use types::{json_equal, json_type_name, BasicType};
pub use uri::{resolve, Uri};
pub use uri_template::UriTemplate;

#[cfg(feature = "remote")]
pub use loader::HttpFetcher;

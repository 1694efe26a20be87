//! Per-node schema bookkeeping: keyed registration, selector variants,
//! links, match monitors and stability tracking.
//!
//! Every schema is registered under a key. Schemas introduced on behalf of
//! another registration (a selected `oneOf` option, an active dependency, a
//! `describedby` target) go under a variant key `{key}.{kind}{id}`, so that
//! removing a key also removes everything derived from it.

use std::collections::{BTreeMap, BTreeSet};

use crate::data::{NodeId, Tree};
use crate::document::Event;
use crate::link::{ActiveLink, LinkInstance, PotentialLink};
use crate::pointer;
use crate::schema::{Dependency, Schema};
use crate::schema_list::SchemaList;
use crate::schema_match::{FailReason, OrSelector, SchemaMatch, XorSelector};

/// A registration waiting for its schema document.
#[derive(Debug, Clone)]
struct PendingSchema {
    key: String,
    schema: Schema,
    history: Vec<String>,
    url: String,
}

/// A selector plus the key of the registration that declared it.
#[derive(Debug, Clone)]
struct Owned<T> {
    owner: String,
    history: Vec<String>,
    pending: Option<String>,
    item: T,
}

impl<T> Owned<T> {
    fn new(owner: &str, history: &[String], item: T) -> Self {
        Self {
            owner: owner.to_string(),
            history: history.to_vec(),
            pending: None,
            item,
        }
    }
}

/// A schema-valued `dependencies` entry; applies while `property` exists.
#[derive(Debug, Clone)]
struct DependencyRule {
    property: String,
    schema: Schema,
    active: bool,
}

/// Schemas bound to one node.
#[derive(Debug)]
pub struct SchemaSet {
    schemas: BTreeMap<String, Vec<Schema>>,
    pending: Vec<PendingSchema>,
    links: BTreeMap<String, Vec<LinkInstance>>,
    xor: BTreeMap<String, Owned<XorSelector>>,
    or: BTreeMap<String, Owned<OrSelector>>,
    dependencies: BTreeMap<String, Owned<DependencyRule>>,
    matches: BTreeMap<String, Vec<SchemaMatch>>,
    flux: usize,
    reported_stable: bool,
}

impl Default for SchemaSet {
    fn default() -> Self {
        Self {
            schemas: BTreeMap::new(),
            pending: Vec::new(),
            links: BTreeMap::new(),
            xor: BTreeMap::new(),
            or: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            matches: BTreeMap::new(),
            flux: 0,
            reported_stable: true,
        }
    }
}

/// True if `key` is `root` or a variant derived from it.
fn in_lineage(key: &str, root: &str) -> bool {
    key == root
        || (key.len() > root.len() && key.starts_with(root) && key.as_bytes()[root.len()] == b'.')
}

impl SchemaSet {
    /// All bound schemas, in key order.
    pub fn schemas(&self) -> SchemaList {
        self.schemas.values().flatten().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn schemas_for(&self, key: &str) -> SchemaList {
        self.schemas.get(key).cloned().map(SchemaList::new).unwrap_or_default()
    }

    pub fn flux(&self) -> usize {
        self.flux
    }

    /// True when no registration is in progress or waiting on a fetch.
    pub fn is_stable(&self) -> bool {
        self.flux == 0 && !self.waiting()
    }

    fn waiting(&self) -> bool {
        !self.pending.is_empty()
            || self.xor.values().any(|s| s.pending.is_some())
            || self.or.values().any(|s| s.pending.is_some())
            || self.matches.values().flatten().any(|m| m.pending().is_some())
    }

    /// URLs of schema documents this set waits for.
    pub fn pending_urls(&self) -> BTreeSet<String> {
        let mut urls: BTreeSet<String> = self.pending.iter().map(|p| p.url.clone()).collect();
        urls.extend(self.xor.values().filter_map(|s| s.pending.clone()));
        urls.extend(self.or.values().filter_map(|s| s.pending.clone()));
        urls.extend(
            self.matches
                .values()
                .flatten()
                .filter_map(|m| m.pending().map(str::to_string)),
        );
        urls
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkInstance> {
        self.links.values().flatten()
    }

    pub fn active_links(&self) -> Vec<ActiveLink> {
        self.links().filter_map(|l| l.active().cloned()).collect()
    }

    fn self_href(&self) -> Option<String> {
        self.links()
            .filter(|l| l.is_self())
            .find_map(|l| l.active().map(|a| a.href.clone()))
    }

    /// Why the node fails each `oneOf` group it is bound to, if it does.
    pub fn xor_fail_reasons(&self) -> Vec<FailReason> {
        self.xor
            .values()
            .filter_map(|s| s.item.fail_reason().cloned())
            .collect()
    }

    pub fn or_fail_reasons(&self) -> Vec<FailReason> {
        self.or.values().filter_map(|s| s.item.fail_reason()).collect()
    }

    pub fn monitor(&self, id: u64) -> Option<&SchemaMatch> {
        self.matches.values().flatten().find(|m| m.id() == id)
    }

    pub(crate) fn monitor_ids(&self) -> Vec<u64> {
        self.matches.values().flatten().map(SchemaMatch::id).collect()
    }

    pub(crate) fn has_tuple_typing(&self) -> bool {
        self.schemas.values().flatten().any(Schema::tuple_typing)
    }

    pub(crate) fn insert_monitor(&mut self, monitor_key: &str, monitor: SchemaMatch) {
        self.matches
            .entry(monitor_key.to_string())
            .or_default()
            .push(monitor);
    }

    pub(crate) fn remove_monitor(&mut self, id: u64) -> bool {
        let mut removed = false;
        for list in self.matches.values_mut() {
            let before = list.len();
            list.retain(|m| m.id() != id);
            removed |= list.len() != before;
        }
        self.matches.retain(|_, list| !list.is_empty());
        removed
    }

    pub(crate) fn monitor_mut(&mut self, id: u64) -> Option<&mut SchemaMatch> {
        self.matches.values_mut().flatten().find(|m| m.id() == id)
    }
}

/// Schemas a parent schema imposes on its child at `key`.
fn child_schemas(schema: &Schema, parent_is_array: bool, key: &str) -> Vec<Schema> {
    match pointer::parse_index(key) {
        Some(index) if parent_is_array => schema.index_schemas(index),
        _ => schema.property_schemas(key),
    }
}

impl Tree {
    /// Register `schema` on `node` under `key`. `history` holds the ids of
    /// schemas already registered along the current chain.
    pub(crate) fn add_schema(
        &mut self,
        node: NodeId,
        schema: Schema,
        key: &str,
        history: Vec<String>,
    ) {
        let engine = self.engine.clone();
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        set.flux += 1;
        match engine.get_full(&schema) {
            Ok(full) => {
                self.register_full(node, full, key, history);
                if let Some(set) = self.schema_set_mut(node) {
                    set.flux -= 1;
                }
            }
            Err(pending) => {
                log::debug!("node {}: {} waits for {}", node, schema.id(), pending.url);
                set.pending.push(PendingSchema {
                    key: key.to_string(),
                    schema,
                    history,
                    url: pending.url,
                });
            }
        }
        self.check_stable(node);
    }

    fn register_full(&mut self, node: NodeId, full: Schema, key: &str, mut history: Vec<String>) {
        let id = full.id();
        if history.contains(&id) {
            log::trace!("node {}: {} already on this chain", node, id);
            return;
        }
        history.push(id);
        let engine = self.engine.clone();
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        let list = set.schemas.entry(key.to_string()).or_default();
        if list.contains(&full) {
            return;
        }
        list.push(full.clone());
        log::debug!("node {}: bound {} under {}", node, full.id(), key);

        for definition in full.link_definitions() {
            match PotentialLink::new(&definition) {
                Ok(potential) => set
                    .links
                    .entry(key.to_string())
                    .or_default()
                    .push(LinkInstance::new(engine.next_id(), key, potential)),
                Err(err) => log::warn!("{}: ignoring link: {}", full.id(), err),
            }
        }
        for group in full.xor_schemas() {
            let variant = format!("{}.xor{}", key, engine.next_id());
            set.xor
                .insert(variant, Owned::new(key, &history, XorSelector::new(group)));
        }
        for group in full.or_schemas() {
            let variant = format!("{}.or{}", key, engine.next_id());
            set.or
                .insert(variant, Owned::new(key, &history, OrSelector::new(group)));
        }
        for (property, dependency) in full.dependencies() {
            if let Dependency::Schema(schema) = dependency {
                let variant = format!("{}.dep{}", key, engine.next_id());
                let rule = DependencyRule {
                    property,
                    schema,
                    active: false,
                };
                set.dependencies
                    .insert(variant, Owned::new(key, &history, rule));
            }
        }

        for and in full.and_schemas() {
            self.add_schema(node, and, key, history.clone());
        }
        let is_array = self.is_array(node);
        for (child_key, child) in self.children(node) {
            for schema in child_schemas(&full, is_array, &child_key) {
                self.add_schema(child, schema, key, Vec::new());
            }
        }
        self.refresh_node(node);
    }

    /// Unbind `key` and every variant derived from it, children first.
    pub(crate) fn remove_schema(&mut self, node: NodeId, key: &str) {
        for (_, child) in self.children(node) {
            self.remove_schema(child, key);
        }
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        set.schemas.retain(|k, _| !in_lineage(k, key));
        let before = set.pending.len();
        set.pending.retain(|p| !in_lineage(&p.key, key));
        set.flux -= before - set.pending.len();
        let links_before = set.links.len();
        set.links.retain(|k, _| !in_lineage(k, key));
        let links_removed = set.links.len() != links_before;
        set.xor.retain(|_, s| !in_lineage(&s.owner, key));
        set.or.retain(|_, s| !in_lineage(&s.owner, key));
        set.dependencies.retain(|_, s| !in_lineage(&s.owner, key));
        let mut dropped = Vec::new();
        set.matches.retain(|k, list| {
            let keep = !in_lineage(k, key);
            if !keep {
                dropped.extend(list.iter().map(SchemaMatch::id));
            }
            keep
        });
        self.dropped_monitors.extend(dropped);
        log::trace!("node {}: unbound {}", node, key);
        if links_removed {
            self.update_links(node);
        }
        self.check_stable(node);
    }

    /// Children pick up the schemas their parent's schemas impose.
    pub(crate) fn inherit_schemas(&mut self, parent: NodeId, child: NodeId) {
        let Some(set) = self.schema_set(parent) else {
            return;
        };
        let bound: Vec<(String, Schema)> = set
            .schemas
            .iter()
            .flat_map(|(k, list)| list.iter().map(move |s| (k.clone(), s.clone())))
            .collect();
        let Some(key) = self.nodes.get(&child).and_then(|n| n.key.clone()) else {
            return;
        };
        let is_array = self.is_array(parent);
        for (bound_key, schema) in bound {
            for child_schema in child_schemas(&schema, is_array, &key) {
                self.add_schema(child, child_schema, &bound_key, Vec::new());
            }
        }
    }

    /// Array children that changed index under a tuple-typed parent are
    /// rebound to their new position's schemas.
    pub(crate) fn rebind_shifted(&mut self, shifted: &[NodeId]) {
        for &child in shifted {
            let Some(parent) = self.parent(child) else {
                continue;
            };
            let tuple = self.schema_set(parent).map_or(false, SchemaSet::has_tuple_typing);
            if !tuple {
                continue;
            }
            let keys = self.schema_set(parent).map(SchemaSet::keys).unwrap_or_default();
            for key in keys {
                self.remove_schema(child, &key);
            }
            self.inherit_schemas(parent, child);
        }
    }

    /// Re-evaluate everything on `node` that depends on its value.
    pub(crate) fn refresh_node(&mut self, node: NodeId) {
        let Some(set) = self.schema_set(node) else {
            return;
        };
        let mut variants: Vec<String> = set
            .dependencies
            .keys()
            .chain(set.xor.keys())
            .chain(set.or.keys())
            .cloned()
            .collect();
        variants.sort_unstable_by(|a, b| b.cmp(a));
        for variant in variants {
            self.refresh_variant(node, &variant);
        }
        self.update_links(node);
        self.update_matches(node);
        self.check_stable(node);
    }

    fn refresh_variant(&mut self, node: NodeId, variant: &str) {
        let engine = self.engine.clone();
        let value = self.value(node);
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        let store = engine.store();

        enum Change {
            Select(Vec<Schema>, Vec<String>),
            Deactivate,
        }
        let change = if let Some(entry) = set.dependencies.get_mut(variant) {
            let active = value
                .as_ref()
                .and_then(|v| v.as_object())
                .map_or(false, |o| o.contains_key(&entry.item.property));
            if active == entry.item.active {
                return;
            }
            entry.item.active = active;
            if active {
                Change::Select(vec![entry.item.schema.clone()], entry.history.clone())
            } else {
                Change::Deactivate
            }
        } else if let Some(entry) = set.xor.get_mut(variant) {
            match entry.item.update(&store, value.as_ref()) {
                Ok(false) => {
                    entry.pending = None;
                    return;
                }
                Ok(true) => {
                    entry.pending = None;
                    let selected = entry.item.selected_option().cloned().into_iter().collect();
                    Change::Select(selected, entry.history.clone())
                }
                Err(pending) => {
                    entry.pending = Some(pending.url);
                    return;
                }
            }
        } else if let Some(entry) = set.or.get_mut(variant) {
            match entry.item.update(&store, value.as_ref()) {
                Ok(false) => {
                    entry.pending = None;
                    return;
                }
                Ok(true) => {
                    entry.pending = None;
                    let selected = entry.item.selected_options().into_iter().cloned().collect();
                    Change::Select(selected, entry.history.clone())
                }
                Err(pending) => {
                    entry.pending = Some(pending.url);
                    return;
                }
            }
        } else {
            return;
        };
        drop(store);

        self.remove_schema(node, variant);
        if let Change::Select(schemas, history) = change {
            for schema in schemas {
                self.add_schema(node, schema, variant, history.clone());
            }
        }
    }

    /// Own `self` link target, or the inherited base.
    pub(crate) fn base_url(&self, node: NodeId) -> String {
        self.schema_set(node)
            .and_then(SchemaSet::self_href)
            .unwrap_or_else(|| self.inherited_base_url(node))
    }

    fn inherited_base_url(&self, node: NodeId) -> String {
        match self.parent(node) {
            Some(parent) => self.base_url(parent),
            None => self.document_url.clone().unwrap_or_default(),
        }
    }

    /// Recompute link targets. Non-self links resolve against the inherited
    /// base; the `self` link is computed last and, if it moves the node's
    /// base, descendants are refreshed.
    pub(crate) fn update_links(&mut self, node: NodeId) {
        let value = self.value(node);
        let inherited = self.inherited_base_url(node);
        let old_base = self.base_url(node);
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        let mut described = Vec::new();
        for link in set.links.values_mut().flatten() {
            if link.is_self() {
                link.disable();
            }
        }
        for (key, links) in set.links.iter_mut().rev() {
            for link in links.iter_mut().filter(|l| !l.is_self()) {
                if link.update(value.as_ref(), &inherited) && link.potential().rel() == "describedby" {
                    described.push((
                        format!("{}.link{}", key, link.id()),
                        link.active().map(|a| a.href.clone()),
                    ));
                }
            }
        }
        for links in set.links.values_mut().rev() {
            for link in links.iter_mut().filter(|l| l.is_self()) {
                link.update(value.as_ref(), &inherited);
            }
        }

        for (variant, href) in described {
            self.remove_schema(node, &variant);
            if let Some(href) = href {
                let schema = self.engine.schema_reference(&href);
                self.add_schema(node, schema, &variant, Vec::new());
            }
        }
        if self.base_url(node) != old_base {
            for (_, child) in self.children(node) {
                self.update_links(child);
            }
        }
    }

    fn update_matches(&mut self, node: NodeId) {
        let engine = self.engine.clone();
        let value = self.value(node);
        let Some(set) = self.schema_set_mut(node) else {
            return;
        };
        let store = engine.store();
        for monitor in set.matches.values_mut().flatten() {
            monitor.update(&store, value.as_ref());
        }
        drop(store);
        self.notify_matches(node, false);
    }

    /// Queue notifications for changed match outcomes. Patient monitors only
    /// report once the node is stable.
    pub(crate) fn notify_matches(&mut self, node: NodeId, force: bool) {
        let Some(set) = self.nodes.get_mut(&node).map(|n| &mut n.schemas) else {
            return;
        };
        let stable = set.is_stable();
        for monitor in set.matches.values_mut().flatten() {
            if force || monitor.is_impatient() || stable {
                if let Some(outcome) = monitor.take_notification() {
                    self.batch.push(Event::Match {
                        node,
                        monitor: monitor.id(),
                        outcome,
                    });
                }
            }
        }
    }

    /// Report a transition to stability exactly once.
    pub(crate) fn check_stable(&mut self, node: NodeId) {
        let Some(set) = self.nodes.get_mut(&node).map(|n| &mut n.schemas) else {
            return;
        };
        if set.is_stable() {
            if !set.reported_stable {
                set.reported_stable = true;
                log::debug!("node {}: schemas stable", node);
                self.batch.push(Event::Stable(node));
                self.notify_matches(node, false);
            }
        } else if set.waiting() {
            set.reported_stable = false;
        }
        if node == self.raw_root && self.root_path.is_none() {
            self.discover_root();
        }
    }

    /// Once the raw root is stable, fix the logical root: a `root` link's
    /// fragment, else the configured path, else the raw root itself.
    fn discover_root(&mut self) {
        let raw_root = self.raw_root;
        let Some(set) = self.schema_set(raw_root) else {
            return;
        };
        if !set.is_stable() {
            return;
        }
        let from_link = set
            .active_links()
            .into_iter()
            .find(|l| l.rel == "root")
            .and_then(|l| {
                let (_, fragment) = crate::uri::split_fragment(&l.href);
                fragment.map(|f| {
                    percent_encoding::percent_decode_str(f)
                        .decode_utf8_lossy()
                        .into_owned()
                })
            })
            .filter(|f| f.is_empty() || f.starts_with('/'));
        let path = self
            .fixed_root
            .clone()
            .or(from_link)
            .unwrap_or_default();
        log::debug!("root at {:?}", path);
        self.root_path = Some(path.clone());
        self.node_at_raw_path(&path);
        self.batch.push(Event::RootReady);
    }

    /// Retry registrations and selectors waiting on schema documents.
    pub(crate) fn resolve_pending(&mut self) {
        let engine = self.engine.clone();
        let mut waiting: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.schemas.waiting())
            .map(|(id, _)| *id)
            .collect();
        waiting.sort_unstable();
        for node in waiting {
            let Some(set) = self.schema_set_mut(node) else {
                continue;
            };
            let pending = std::mem::take(&mut set.pending);
            for registration in pending {
                match engine.get_full(&registration.schema) {
                    Ok(full) => {
                        self.register_full(node, full, &registration.key, registration.history);
                        if let Some(set) = self.schema_set_mut(node) {
                            set.flux -= 1;
                        }
                    }
                    Err(still) => {
                        if let Some(set) = self.schema_set_mut(node) {
                            set.pending.push(PendingSchema {
                                url: still.url,
                                ..registration
                            });
                        }
                    }
                }
            }
            self.refresh_node(node);
        }
    }

    pub(crate) fn pending_urls(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|n| n.schemas.pending_urls())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use serde_json::{json, Value};

    fn tree(engine: &Engine, value: Value) -> Tree {
        let mut tree = Tree::new(engine.clone(), Some(value), None);
        tree.batch.begin();
        tree
    }

    #[test]
    fn lineage_is_dot_separated() {
        assert!(in_lineage("k1", "k1"));
        assert!(in_lineage("k1.xor4", "k1"));
        assert!(!in_lineage("k10", "k1"));
        assert!(!in_lineage("k1", "k1.xor4"));
    }

    #[test]
    fn properties_propagate_to_children() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "properties": {"a": {"type": "integer"}}
        }));
        let mut t = tree(&engine, json!({"a": 1}));
        let root = t.raw_root;
        t.add_schema(root, schema, "k", Vec::new());
        let a = t.child(root, "a").unwrap();
        assert_eq!(t.schema_set(a).unwrap().keys(), vec!["k".to_string()]);
        t.remove_schema(root, "k");
        assert!(t.schema_set(a).unwrap().schemas().is_empty());
    }

    #[test]
    fn one_of_selection_follows_the_value() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "oneOf": [
                {"type": "string", "title": "text"},
                {"type": "number", "title": "count"}
            ]
        }));
        let mut t = tree(&engine, json!("hello"));
        let root = t.raw_root;
        t.add_schema(root, schema, "k", Vec::new());
        let titles = |t: &Tree| -> Vec<String> {
            t.schema_set(root)
                .unwrap()
                .schemas()
                .iter()
                .filter_map(|s| s.title().map(str::to_string))
                .collect()
        };
        assert_eq!(titles(&t), vec!["text"]);
        t.apply_replace("", json!(5)).unwrap();
        for id in t.take_dirty() {
            t.refresh_node(id);
        }
        assert_eq!(titles(&t), vec!["count"]);
    }

    #[test]
    fn self_referencing_all_of_registers_once() {
        let engine = Engine::new();
        engine.add_schema_document(
            "http://example.com/s.json",
            json!({"allOf": [{"$ref": "#"}], "title": "loop"}),
        );
        let schema = engine.schema_reference("http://example.com/s.json");
        let mut t = tree(&engine, json!({}));
        let root = t.raw_root;
        t.add_schema(root, schema, "k", Vec::new());
        let set = t.schema_set(root).unwrap();
        assert_eq!(set.schemas().len(), 1);
        assert!(set.is_stable());
    }

    #[test]
    fn pending_registration_holds_stability() {
        let engine = Engine::new();
        let schema = engine.schema_reference("http://example.com/later.json");
        let mut t = tree(&engine, json!({}));
        let root = t.raw_root;
        t.add_schema(root, schema, "k", Vec::new());
        assert!(!t.schema_set(root).unwrap().is_stable());
        assert_eq!(
            t.pending_urls().into_iter().collect::<Vec<_>>(),
            vec!["http://example.com/later.json".to_string()]
        );
        engine.add_schema_document("http://example.com/later.json", json!({"title": "late"}));
        t.resolve_pending();
        let set = t.schema_set(root).unwrap();
        assert!(set.is_stable());
        assert_eq!(set.schemas().len(), 1);
        let stable_events = t
            .batch
            .end()
            .into_iter()
            .filter(|e| matches!(e, Event::Stable(n) if *n == root))
            .count();
        assert_eq!(stable_events, 1);
    }

    fn stable_events(t: &mut Tree, node: NodeId) -> usize {
        let count = t
            .batch
            .end()
            .into_iter()
            .filter(|e| matches!(e, Event::Stable(n) if *n == node))
            .count();
        t.batch.begin();
        count
    }

    fn refresh(t: &mut Tree) {
        for id in t.take_dirty() {
            t.refresh_node(id);
        }
    }

    #[test]
    fn one_stable_event_per_settle() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "oneOf": [
                {"properties": {
                    "kind": {"enum": ["a"]},
                    "detail": {"$ref": "http://example.com/a.json"}
                }},
                {"properties": {
                    "kind": {"enum": ["b"]},
                    "detail": {"$ref": "http://example.com/b.json"}
                }}
            ]
        }));
        let mut t = tree(&engine, json!({"kind": "a"}));
        let root = t.raw_root;
        let detail = t.child(root, "detail").unwrap();
        t.add_schema(root, schema, "k", Vec::new());
        assert!(!t.schema_set(detail).unwrap().is_stable());
        assert_eq!(stable_events(&mut t, detail), 0);

        engine.add_schema_document("http://example.com/a.json", json!({"title": "a"}));
        t.resolve_pending();
        assert!(t.schema_set(detail).unwrap().is_stable());
        assert_eq!(stable_events(&mut t, detail), 1);

        // Nothing changed: no further notification
        t.resolve_pending();
        t.apply_replace("/kind", json!("a")).unwrap();
        refresh(&mut t);
        assert_eq!(stable_events(&mut t, detail), 0);

        // Switching the oneOf option binds a schema that is not loaded yet
        t.apply_replace("/kind", json!("b")).unwrap();
        refresh(&mut t);
        assert!(!t.schema_set(detail).unwrap().is_stable());
        assert_eq!(
            t.pending_urls().into_iter().collect::<Vec<_>>(),
            vec!["http://example.com/b.json".to_string()]
        );
        assert_eq!(stable_events(&mut t, detail), 0);

        t.resolve_pending();
        assert_eq!(stable_events(&mut t, detail), 0);

        engine.add_schema_document("http://example.com/b.json", json!({"title": "b"}));
        t.resolve_pending();
        let titles: Vec<String> = t
            .schema_set(detail)
            .unwrap()
            .schemas()
            .iter()
            .filter_map(|s| s.title().map(str::to_string))
            .collect();
        assert_eq!(titles, vec!["b"]);
        assert_eq!(stable_events(&mut t, detail), 1);
    }

    #[test]
    fn dependency_schema_applies_while_property_present() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "dependencies": {"card": {"title": "billing"}}
        }));
        let mut t = tree(&engine, json!({}));
        let root = t.raw_root;
        t.add_schema(root, schema, "k", Vec::new());
        assert_eq!(t.schema_set(root).unwrap().schemas().len(), 1);
        t.apply_add("/card", json!("1234")).unwrap();
        for id in t.take_dirty() {
            t.refresh_node(id);
        }
        assert_eq!(t.schema_set(root).unwrap().schemas().len(), 2);
        t.apply_remove("/card").unwrap();
        for id in t.take_dirty() {
            t.refresh_node(id);
        }
        assert_eq!(t.schema_set(root).unwrap().schemas().len(), 1);
    }

    #[test]
    fn self_link_sets_the_base_for_children() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "links": [{"rel": "self", "href": "/items/{id}"}],
            "properties": {
                "owner": {"links": [{"rel": "author", "href": "people/{name}"}]}
            }
        }));
        let mut t = Tree::new(
            engine.clone(),
            Some(json!({"id": 7, "owner": {"name": "ann"}})),
            Some("http://example.com/list".to_string()),
        );
        t.batch.begin();
        let root = t.raw_root;
        let owner = t.child(root, "owner").unwrap();
        t.add_schema(root, schema, "k", Vec::new());
        assert_eq!(t.base_url(root), "http://example.com/items/7");
        let links = t.schema_set(owner).unwrap().active_links();
        assert_eq!(links[0].href, "http://example.com/items/people/ann");
    }
}

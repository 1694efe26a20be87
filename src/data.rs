//! The node tree behind a [`Document`]: lazy child materialization, value
//! computation and node-level patch application.
//!
//! Nodes live in an arena keyed by [`NodeId`]. A container's children are
//! [`Slot`]s holding either a raw JSON value or a materialized node, so the
//! value of a node can always be rebuilt from its slots. Ids are never
//! reused; an array node keeps its id when its index shifts.

use std::cell::Ref;
use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::batch::DelayedCallbacks;
use crate::document::{Document, Event, MatchCallback, StableCallback};
use crate::engine::Engine;
use crate::error::{BindError, PatchError};
use crate::link::ActiveLink;
use crate::patch::RAW_PREFIX;
use crate::pointer;
use crate::schema::Schema;
use crate::schema_list::SchemaList;
use crate::schema_set::SchemaSet;
use crate::types::BasicType;

/// Identity of a node. Unique per engine and never reused.
pub type NodeId = u64;

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Raw(Value),
    Node(NodeId),
}

#[derive(Debug)]
pub(crate) enum Content {
    Undefined,
    Scalar(Value),
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Content {
    fn from_value(value: Option<Value>) -> Self {
        match value {
            None => Content::Undefined,
            Some(Value::Object(map)) => {
                Content::Object(map.into_iter().map(|(k, v)| (k, Slot::Raw(v))).collect())
            }
            Some(Value::Array(items)) => Content::Array(items.into_iter().map(Slot::Raw).collect()),
            Some(scalar) => Content::Scalar(scalar),
        }
    }

    fn is_array(&self) -> bool {
        matches!(self, Content::Array(_))
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        match self {
            Content::Object(map) => map.get(key),
            Content::Array(items) => pointer::parse_index(key).and_then(|i| items.get(i)),
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Slot> {
        match self {
            Content::Object(map) => map.get_mut(key),
            Content::Array(items) => pointer::parse_index(key).and_then(|i| items.get_mut(i)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    /// Key in the parent (array indices in decimal form).
    pub(crate) key: Option<String>,
    pub(crate) content: Content,
    /// Materialized children whose key is currently absent.
    pub(crate) phantoms: BTreeMap<String, NodeId>,
    pub(crate) schemas: SchemaSet,
}

impl Node {
    fn new(parent: Option<NodeId>, key: Option<String>, content: Content) -> Self {
        Self {
            parent,
            key,
            content,
            phantoms: BTreeMap::new(),
            schemas: SchemaSet::default(),
        }
    }
}

/// Where the parent container of a patch subject lives.
enum Container {
    Node(NodeId),
    /// Inside the raw value held by `slot` of `node`, at `rest`.
    Raw {
        node: NodeId,
        slot: String,
        rest: Vec<String>,
    },
}

pub(crate) struct Tree {
    pub(crate) engine: Engine,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) raw_root: NodeId,
    /// Raw path of the logical root, once known.
    pub(crate) root_path: Option<String>,
    /// Root path fixed by the caller; skips link-based discovery.
    pub(crate) fixed_root: Option<String>,
    pub(crate) document_url: Option<String>,
    pub(crate) batch: DelayedCallbacks<Event>,
    dirty: Vec<NodeId>,
    shifted: Vec<NodeId>,
    pub(crate) dropped_monitors: Vec<u64>,
}

impl Tree {
    pub(crate) fn new(engine: Engine, value: Option<Value>, document_url: Option<String>) -> Self {
        let raw_root = engine.next_id();
        let mut nodes = HashMap::new();
        nodes.insert(raw_root, Node::new(None, None, Content::from_value(value)));
        Self {
            engine,
            nodes,
            raw_root,
            root_path: None,
            fixed_root: None,
            document_url,
            batch: DelayedCallbacks::new(),
            dirty: Vec::new(),
            shifted: Vec::new(),
            dropped_monitors: Vec::new(),
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn schema_set(&self, id: NodeId) -> Option<&SchemaSet> {
        self.nodes.get(&id).map(|n| &n.schemas)
    }

    pub(crate) fn schema_set_mut(&mut self, id: NodeId) -> Option<&mut SchemaSet> {
        self.nodes.get_mut(&id).map(|n| &mut n.schemas)
    }

    // ---- navigation ----

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub(crate) fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Unescaped keys from the raw root down to `id`.
    pub(crate) fn components(&self, id: NodeId) -> Vec<String> {
        let mut components = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            if let Some(key) = &node.key {
                components.push(key.clone());
            }
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        components.reverse();
        components
    }

    pub(crate) fn raw_path(&self, id: NodeId) -> String {
        pointer::join_pointer(&self.components(id))
    }

    /// Patch-addressable path: relative to the logical root when the node
    /// lies under it, otherwise `?`-prefixed raw path.
    pub(crate) fn node_path(&self, id: NodeId) -> String {
        let raw = self.raw_path(id);
        let root = self.root_path.as_deref().unwrap_or("");
        if pointer::has_prefix(&raw, root) {
            raw[root.len()..].to_string()
        } else {
            format!("{}{}", RAW_PREFIX, raw)
        }
    }

    /// Translate a patch path into a raw path.
    pub(crate) fn to_raw_path(&self, path: &str) -> String {
        if pointer::has_prefix(path, RAW_PREFIX) {
            path[RAW_PREFIX.len()..].to_string()
        } else {
            format!("{}{}", self.root_path.as_deref().unwrap_or(""), path)
        }
    }

    /// Materialized children, including phantoms.
    pub(crate) fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut children: Vec<(String, NodeId)> = match &node.content {
            Content::Object(map) => map
                .iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Node(child) => Some((k.clone(), *child)),
                    Slot::Raw(_) => None,
                })
                .collect(),
            Content::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| match slot {
                    Slot::Node(child) => Some((i.to_string(), *child)),
                    Slot::Raw(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        children.extend(node.phantoms.iter().map(|(k, id)| (k.clone(), *id)));
        children
    }

    pub(crate) fn is_array(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map_or(false, |n| n.content.is_array())
    }

    /// Get or materialize the child of `parent` at `key`.
    pub(crate) fn child(&mut self, parent: NodeId, key: &str) -> Option<NodeId> {
        let node = self.nodes.get(&parent)?;
        match node.content.slot(key) {
            Some(Slot::Node(existing)) => return Some(*existing),
            Some(Slot::Raw(_)) => {}
            None => {
                if let Some(existing) = node.phantoms.get(key) {
                    return Some(*existing);
                }
            }
        }
        let id = self.engine.next_id();
        let node = self.nodes.get_mut(&parent)?;
        let content = match node.content.slot_mut(key) {
            Some(slot) => match std::mem::replace(slot, Slot::Node(id)) {
                Slot::Raw(value) => Content::from_value(Some(value)),
                Slot::Node(existing) => {
                    *slot = Slot::Node(existing);
                    return Some(existing);
                }
            },
            None => {
                node.phantoms.insert(key.to_string(), id);
                Content::Undefined
            }
        };
        self.nodes
            .insert(id, Node::new(Some(parent), Some(key.to_string()), content));
        self.inherit_schemas(parent, id);
        Some(id)
    }

    /// Materialize every node along a raw path.
    pub(crate) fn node_at_raw_path(&mut self, raw_path: &str) -> Option<NodeId> {
        let mut current = self.raw_root;
        for component in pointer::split_pointer(raw_path) {
            current = self.child(current, &component)?;
        }
        Some(current)
    }

    // ---- values ----

    pub(crate) fn value(&self, id: NodeId) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        match &node.content {
            Content::Undefined => None,
            Content::Scalar(value) => Some(value.clone()),
            Content::Object(map) => {
                let mut object = Map::new();
                for (key, slot) in map {
                    if let Some(value) = self.slot_value(slot) {
                        object.insert(key.clone(), value);
                    }
                }
                Some(Value::Object(object))
            }
            Content::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|slot| self.slot_value(slot).unwrap_or(Value::Null))
                    .collect(),
            )),
        }
    }

    fn slot_value(&self, slot: &Slot) -> Option<Value> {
        match slot {
            Slot::Raw(value) => Some(value.clone()),
            Slot::Node(id) => self.value(*id),
        }
    }

    pub(crate) fn basic_type(&self, id: NodeId) -> BasicType {
        match self.nodes.get(&id).map(|n| &n.content) {
            None | Some(Content::Undefined) => BasicType::Undefined,
            Some(Content::Scalar(value)) => BasicType::of(Some(value)),
            Some(Content::Object(_)) => BasicType::Object,
            Some(Content::Array(_)) => BasicType::Array,
        }
    }

    pub(crate) fn keys(&self, id: NodeId) -> Vec<String> {
        match self.nodes.get(&id).map(|n| &n.content) {
            Some(Content::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn length(&self, id: NodeId) -> usize {
        match self.nodes.get(&id).map(|n| &n.content) {
            Some(Content::Array(items)) => items.len(),
            _ => 0,
        }
    }

    pub(crate) fn mark_dirty(&mut self, id: NodeId) {
        self.dirty.push(id);
    }

    /// Set a node's value, keeping the identity of materialized children
    /// whose key survives. Children whose key disappears stay materialized
    /// with an undefined value.
    pub(crate) fn set_node_value(&mut self, id: NodeId, value: Option<Value>) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let old = std::mem::replace(&mut node.content, Content::Undefined);
        let mut existing: BTreeMap<String, NodeId> = std::mem::take(&mut node.phantoms);
        match old {
            Content::Object(map) => existing.extend(map.into_iter().filter_map(|(k, slot)| match slot {
                Slot::Node(child) => Some((k, child)),
                Slot::Raw(_) => None,
            })),
            Content::Array(items) => {
                existing.extend(items.into_iter().enumerate().filter_map(|(i, slot)| match slot {
                    Slot::Node(child) => Some((i.to_string(), child)),
                    Slot::Raw(_) => None,
                }))
            }
            Content::Undefined | Content::Scalar(_) => {}
        }

        let content = match value {
            Some(Value::Object(map)) => {
                let mut slots = IndexMap::with_capacity(map.len());
                for (key, child_value) in map {
                    let slot = match existing.remove(&key) {
                        Some(child) => {
                            self.set_node_value(child, Some(child_value));
                            Slot::Node(child)
                        }
                        None => Slot::Raw(child_value),
                    };
                    slots.insert(key, slot);
                }
                Content::Object(slots)
            }
            Some(Value::Array(items)) => {
                let mut slots = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let slot = match existing.remove(&index.to_string()) {
                        Some(child) => {
                            self.set_node_value(child, Some(item));
                            Slot::Node(child)
                        }
                        None => Slot::Raw(item),
                    };
                    slots.push(slot);
                }
                Content::Array(slots)
            }
            other => Content::from_value(other),
        };
        for child in existing.values() {
            self.set_node_value(*child, None);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.content = content;
            node.phantoms = existing;
        }
        self.mark_dirty(id);
    }

    /// Remove a node and its descendants from the arena.
    pub(crate) fn destroy(&mut self, id: NodeId) {
        let children = self.children(id);
        for (_, child) in children {
            self.destroy(child);
        }
        if let Some(node) = self.nodes.remove(&id) {
            self.dropped_monitors.extend(node.schemas.monitor_ids());
        }
    }

    // ---- patch application ----

    /// Apply one operation addressed by raw paths. Returns the subject's
    /// previous value.
    pub(crate) fn apply_add(&mut self, path: &str, value: Value) -> Result<Option<Value>, PatchError> {
        let components = pointer::split_pointer(path);
        let Some((last, parents)) = components.split_last() else {
            let old = self.value(self.raw_root);
            self.set_node_value(self.raw_root, Some(value));
            return Ok(old);
        };
        match self.locate(parents, "add", path)? {
            Container::Node(parent) => self.node_add(parent, last, value, path).map(|_| None),
            Container::Raw { node, slot, rest } => {
                let target = self.raw_container(node, &slot, &rest, "add", path)?;
                raw_add(target, last, value, path)?;
                self.mark_dirty(node);
                Ok(None)
            }
        }
    }

    pub(crate) fn apply_replace(
        &mut self,
        path: &str,
        value: Value,
    ) -> Result<Option<Value>, PatchError> {
        let components = pointer::split_pointer(path);
        let Some((last, parents)) = components.split_last() else {
            let old = self.value(self.raw_root);
            self.set_node_value(self.raw_root, Some(value));
            return Ok(old);
        };
        match self.locate(parents, "replace", path)? {
            Container::Node(parent) => self.node_replace(parent, last, value, path).map(Some),
            Container::Raw { node, slot, rest } => {
                let target = self.raw_container(node, &slot, &rest, "replace", path)?;
                let old = raw_replace(target, last, value, path)?;
                self.mark_dirty(node);
                Ok(Some(old))
            }
        }
    }

    pub(crate) fn apply_remove(&mut self, path: &str) -> Result<Option<Value>, PatchError> {
        let components = pointer::split_pointer(path);
        let Some((last, parents)) = components.split_last() else {
            let old = self.value(self.raw_root);
            self.set_node_value(self.raw_root, None);
            return Ok(old);
        };
        match self.locate(parents, "remove", path)? {
            Container::Node(parent) => self.node_remove(parent, last, "remove", path).map(Some),
            Container::Raw { node, slot, rest } => {
                let target = self.raw_container(node, &slot, &rest, "remove", path)?;
                let old = raw_remove(target, last, "remove", path)?;
                self.mark_dirty(node);
                Ok(Some(old))
            }
        }
    }

    /// Move `from` to `to`. Returns the moved value and the target path
    /// actually written, with a trailing `-` resolved to its index.
    pub(crate) fn apply_move(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<(Option<Value>, String), PatchError> {
        if from == to {
            return Ok((self.value_at_raw_path(from), to.to_string()));
        }
        if pointer::has_prefix(to, from) {
            return Err(PatchError::MoveIntoSelf {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let components = pointer::split_pointer(from);
        let Some((last, parents)) = components.split_last() else {
            return Err(PatchError::MoveIntoSelf {
                from: from.to_string(),
                to: to.to_string(),
            });
        };
        let value = match self.locate(parents, "move", from)? {
            Container::Node(parent) => self.node_remove(parent, last, "move", from)?,
            Container::Raw { node, slot, rest } => {
                let target = self.raw_container(node, &slot, &rest, "move", from)?;
                let old = raw_remove(target, last, "move", from)?;
                self.mark_dirty(node);
                old
            }
        };
        let to = self.resolve_append(to)?;
        self.apply_add(&to, value.clone())?;
        Ok((Some(value), to))
    }

    /// Replace a trailing `-` that appends to an array with the index the
    /// new item will occupy. Other paths are returned unchanged.
    pub(crate) fn resolve_append(&mut self, path: &str) -> Result<String, PatchError> {
        let components = pointer::split_pointer(path);
        let Some((last, parents)) = components.split_last() else {
            return Ok(path.to_string());
        };
        if last != "-" {
            return Ok(path.to_string());
        }
        let length = match self.locate(parents, "add", path)? {
            Container::Node(parent) => match self.nodes.get(&parent).map(|n| &n.content) {
                Some(Content::Array(items)) => Some(items.len()),
                _ => None,
            },
            Container::Raw { node, slot, rest } => self
                .raw_container(node, &slot, &rest, "add", path)?
                .as_array()
                .map(Vec::len),
        };
        Ok(match length {
            Some(length) => {
                let mut resolved = parents.to_vec();
                resolved.push(length.to_string());
                pointer::join_pointer(&resolved)
            }
            None => path.to_string(),
        })
    }

    pub(crate) fn value_at_raw_path(&self, raw_path: &str) -> Option<Value> {
        let root = self.value(self.raw_root)?;
        root.pointer(raw_path).cloned()
    }

    fn locate(
        &self,
        parents: &[String],
        op: &'static str,
        path: &str,
    ) -> Result<Container, PatchError> {
        let mut current = self.raw_root;
        for (i, component) in parents.iter().enumerate() {
            let node = self.nodes.get(&current).ok_or_else(|| missing(op, path))?;
            let slot = match &node.content {
                Content::Object(map) => map.get(component).ok_or_else(|| missing(op, path))?,
                Content::Array(items) => {
                    let index = parse_array_index(component, path)?;
                    items.get(index).ok_or(PatchError::IndexOutOfRange {
                        op,
                        path: path.to_string(),
                        index,
                        length: items.len(),
                    })?
                }
                Content::Undefined => return Err(missing(op, path)),
                Content::Scalar(_) => {
                    return Err(PatchError::InvalidTarget {
                        path: path.to_string(),
                    })
                }
            };
            match slot {
                Slot::Node(child) => current = *child,
                Slot::Raw(_) => {
                    return Ok(Container::Raw {
                        node: current,
                        slot: component.clone(),
                        rest: parents[i + 1..].to_vec(),
                    })
                }
            }
        }
        Ok(Container::Node(current))
    }

    fn raw_container(
        &mut self,
        node: NodeId,
        slot: &str,
        rest: &[String],
        op: &'static str,
        path: &str,
    ) -> Result<&mut Value, PatchError> {
        let node = self.nodes.get_mut(&node).ok_or_else(|| missing(op, path))?;
        let slot = match &mut node.content {
            Content::Object(map) => map.get_mut(slot),
            Content::Array(items) => pointer::parse_index(slot).and_then(|i| items.get_mut(i)),
            _ => None,
        };
        let Some(Slot::Raw(value)) = slot else {
            return Err(missing(op, path));
        };
        let mut target = value;
        for component in rest {
            target = match target {
                Value::Object(map) => map.get_mut(component).ok_or_else(|| missing(op, path))?,
                Value::Array(items) => {
                    let index = parse_array_index(component, path)?;
                    let length = items.len();
                    items.get_mut(index).ok_or(PatchError::IndexOutOfRange {
                        op,
                        path: path.to_string(),
                        index,
                        length,
                    })?
                }
                _ => {
                    return Err(PatchError::InvalidTarget {
                        path: path.to_string(),
                    })
                }
            };
        }
        Ok(target)
    }

    fn node_add(
        &mut self,
        parent: NodeId,
        key: &str,
        value: Value,
        path: &str,
    ) -> Result<(), PatchError> {
        let node = self.nodes.get_mut(&parent).ok_or_else(|| missing("add", path))?;
        match &mut node.content {
            Content::Object(map) => {
                if map.contains_key(key) {
                    return Err(PatchError::DuplicateKey {
                        path: path.to_string(),
                    });
                }
                match node.phantoms.remove(key) {
                    Some(child) => {
                        map.insert(key.to_string(), Slot::Node(child));
                        self.set_node_value(child, Some(value));
                    }
                    None => {
                        map.insert(key.to_string(), Slot::Raw(value));
                    }
                }
            }
            Content::Array(items) => {
                let index = if key == "-" {
                    items.len()
                } else {
                    parse_array_index(key, path)?
                };
                if index > items.len() {
                    return Err(PatchError::IndexOutOfRange {
                        op: "add",
                        path: path.to_string(),
                        index,
                        length: items.len(),
                    });
                }
                items.insert(index, Slot::Raw(value));
                self.renumber(parent, index + 1);
                self.clear_array_phantoms(parent);
            }
            Content::Undefined => return Err(missing("add", path)),
            Content::Scalar(_) => {
                return Err(PatchError::InvalidTarget {
                    path: path.to_string(),
                })
            }
        }
        self.mark_dirty(parent);
        Ok(())
    }

    fn node_replace(
        &mut self,
        parent: NodeId,
        key: &str,
        value: Value,
        path: &str,
    ) -> Result<Value, PatchError> {
        let node = self.nodes.get_mut(&parent).ok_or_else(|| missing("replace", path))?;
        let slot = match &mut node.content {
            Content::Object(map) => map.get_mut(key).ok_or_else(|| missing("replace", path))?,
            Content::Array(items) => {
                let index = parse_array_index(key, path)?;
                let length = items.len();
                items.get_mut(index).ok_or(PatchError::IndexOutOfRange {
                    op: "replace",
                    path: path.to_string(),
                    index,
                    length,
                })?
            }
            Content::Undefined => return Err(missing("replace", path)),
            Content::Scalar(_) => {
                return Err(PatchError::InvalidTarget {
                    path: path.to_string(),
                })
            }
        };
        let old = match slot {
            Slot::Raw(old) => {
                let old = std::mem::replace(old, value);
                self.mark_dirty(parent);
                old
            }
            Slot::Node(child) => {
                let child = *child;
                let old = self.value(child).unwrap_or(Value::Null);
                self.set_node_value(child, Some(value));
                old
            }
        };
        Ok(old)
    }

    fn node_remove(
        &mut self,
        parent: NodeId,
        key: &str,
        op: &'static str,
        path: &str,
    ) -> Result<Value, PatchError> {
        let node = self.nodes.get_mut(&parent).ok_or_else(|| missing(op, path))?;
        let (slot, shift_from) = match &mut node.content {
            Content::Object(map) => (map.shift_remove(key).ok_or_else(|| missing(op, path))?, None),
            Content::Array(items) => {
                let index = parse_array_index(key, path)?;
                if index >= items.len() {
                    return Err(PatchError::IndexOutOfRange {
                        op,
                        path: path.to_string(),
                        index,
                        length: items.len(),
                    });
                }
                (items.remove(index), Some(index))
            }
            Content::Undefined => return Err(missing(op, path)),
            Content::Scalar(_) => {
                return Err(PatchError::InvalidTarget {
                    path: path.to_string(),
                })
            }
        };
        let old = match slot {
            Slot::Raw(value) => value,
            Slot::Node(child) => {
                let old = self.value(child).unwrap_or(Value::Null);
                if shift_from.is_some() {
                    self.destroy(child);
                } else {
                    self.set_node_value(child, None);
                    if let Some(node) = self.nodes.get_mut(&parent) {
                        node.phantoms.insert(key.to_string(), child);
                    }
                }
                old
            }
        };
        if let Some(index) = shift_from {
            self.renumber(parent, index);
            self.clear_array_phantoms(parent);
        }
        self.mark_dirty(parent);
        Ok(old)
    }

    /// Re-key materialized array children from `from` onwards after a shift.
    fn renumber(&mut self, parent: NodeId, from: usize) {
        let moved: Vec<(usize, NodeId)> = match self.nodes.get(&parent).map(|n| &n.content) {
            Some(Content::Array(items)) => items
                .iter()
                .enumerate()
                .skip(from)
                .filter_map(|(i, slot)| match slot {
                    Slot::Node(child) => Some((i, *child)),
                    Slot::Raw(_) => None,
                })
                .collect(),
            _ => return,
        };
        for (index, child) in moved {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.key = Some(index.to_string());
            }
            self.shifted.push(child);
        }
    }

    /// Phantom array children point at indices that just moved.
    fn clear_array_phantoms(&mut self, parent: NodeId) {
        let phantoms = match self.nodes.get_mut(&parent) {
            Some(node) => std::mem::take(&mut node.phantoms),
            None => return,
        };
        for child in phantoms.into_values() {
            self.destroy(child);
        }
    }

    /// Nodes whose value changed since the last call, with their ancestors,
    /// parents first.
    pub(crate) fn take_dirty(&mut self) -> Vec<NodeId> {
        let mut all: Vec<NodeId> = Vec::new();
        for id in std::mem::take(&mut self.dirty) {
            let mut current = Some(id);
            while let Some(node) = current {
                if !self.contains(node) || all.contains(&node) {
                    break;
                }
                all.push(node);
                current = self.parent(node);
            }
        }
        all.sort_by_key(|id| (self.depth(*id), *id));
        all
    }

    pub(crate) fn take_shifted(&mut self) -> Vec<NodeId> {
        let mut shifted = std::mem::take(&mut self.shifted);
        shifted.sort_unstable();
        shifted.dedup();
        shifted.retain(|id| self.contains(*id));
        shifted
    }
}

fn missing(op: &'static str, path: &str) -> PatchError {
    PatchError::MissingKey {
        op,
        path: path.to_string(),
    }
}

fn parse_array_index(component: &str, path: &str) -> Result<usize, PatchError> {
    pointer::parse_index(component).ok_or_else(|| PatchError::NonNumericIndex {
        path: path.to_string(),
        segment: component.to_string(),
    })
}

fn raw_add(container: &mut Value, key: &str, value: Value, path: &str) -> Result<(), PatchError> {
    match container {
        Value::Object(map) => {
            if map.contains_key(key) {
                return Err(PatchError::DuplicateKey {
                    path: path.to_string(),
                });
            }
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = if key == "-" {
                items.len()
            } else {
                parse_array_index(key, path)?
            };
            if index > items.len() {
                return Err(PatchError::IndexOutOfRange {
                    op: "add",
                    path: path.to_string(),
                    index,
                    length: items.len(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::InvalidTarget {
            path: path.to_string(),
        }),
    }
}

fn raw_replace(
    container: &mut Value,
    key: &str,
    value: Value,
    path: &str,
) -> Result<Value, PatchError> {
    let slot = match container {
        Value::Object(map) => map.get_mut(key).ok_or_else(|| missing("replace", path))?,
        Value::Array(items) => {
            let index = parse_array_index(key, path)?;
            let length = items.len();
            items.get_mut(index).ok_or(PatchError::IndexOutOfRange {
                op: "replace",
                path: path.to_string(),
                index,
                length,
            })?
        }
        _ => {
            return Err(PatchError::InvalidTarget {
                path: path.to_string(),
            })
        }
    };
    Ok(std::mem::replace(slot, value))
}

fn raw_remove(
    container: &mut Value,
    key: &str,
    op: &'static str,
    path: &str,
) -> Result<Value, PatchError> {
    match container {
        Value::Object(map) => map.shift_remove(key).ok_or_else(|| missing(op, path)),
        Value::Array(items) => {
            let index = parse_array_index(key, path)?;
            if index >= items.len() {
                return Err(PatchError::IndexOutOfRange {
                    op,
                    path: path.to_string(),
                    index,
                    length: items.len(),
                });
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchError::InvalidTarget {
            path: path.to_string(),
        }),
    }
}

/// A read handle on one node of a [`Document`].
///
/// Navigation (`property`, `item`) materializes child nodes on first use.
/// Handles borrow the document, so mutations go through
/// [`Document::patch`] and friends using the node's [`id`](Data::id).
#[derive(Clone, Copy)]
pub struct Data<'a> {
    document: &'a Document,
    id: NodeId,
}

impl<'a> Data<'a> {
    pub(crate) fn new(document: &'a Document, id: NodeId) -> Self {
        Self { document, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    fn tree(&self) -> Ref<'a, Tree> {
        self.document.tree()
    }

    /// False once the node has been destroyed (array removal, type change
    /// of an array parent).
    pub fn exists(&self) -> bool {
        self.tree().contains(self.id)
    }

    /// Path usable in patches (`?`-prefixed if outside the logical root).
    pub fn path(&self) -> String {
        self.tree().node_path(self.id)
    }

    pub fn raw_path(&self) -> String {
        self.tree().raw_path(self.id)
    }

    pub fn parent(&self) -> Option<Data<'a>> {
        let parent = self.tree().parent(self.id)?;
        Some(Data::new(self.document, parent))
    }

    /// Key of this node in its parent.
    pub fn parent_key(&self) -> Option<String> {
        self.tree().nodes.get(&self.id).and_then(|n| n.key.clone())
    }

    pub fn basic_type(&self) -> BasicType {
        self.tree().basic_type(self.id)
    }

    pub fn is_defined(&self) -> bool {
        self.basic_type() != BasicType::Undefined
    }

    /// The node's value; `None` when undefined.
    pub fn value(&self) -> Option<Value> {
        self.tree().value(self.id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.tree().keys(self.id)
    }

    pub fn length(&self) -> usize {
        self.tree().length(self.id)
    }

    pub fn property(&self, key: &str) -> Data<'a> {
        let id = self
            .document
            .with_tree(|tree| tree.child(self.id, key))
            .unwrap_or(self.id);
        Data::new(self.document, id)
    }

    pub fn item(&self, index: usize) -> Data<'a> {
        self.property(&index.to_string())
    }

    pub fn property_value(&self, key: &str) -> Option<Value> {
        match self.value()? {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        }
    }

    /// All schemas currently bound to the node.
    pub fn schemas(&self) -> SchemaList {
        self.tree()
            .schema_set(self.id)
            .map(SchemaSet::schemas)
            .unwrap_or_default()
    }

    pub fn schema_keys(&self) -> Vec<String> {
        self.tree()
            .schema_set(self.id)
            .map(SchemaSet::keys)
            .unwrap_or_default()
    }

    /// Borrow the node's schema set. Release it before mutating the document.
    pub fn schema_set(&self) -> Option<Ref<'a, SchemaSet>> {
        Ref::filter_map(self.tree(), |tree| tree.schema_set(self.id)).ok()
    }

    pub fn schemas_stable(&self) -> bool {
        self.tree()
            .schema_set(self.id)
            .map_or(true, SchemaSet::is_stable)
    }

    /// Active links, optionally filtered by (case-insensitive) relation.
    pub fn links(&self, rel: Option<&str>) -> Vec<ActiveLink> {
        let rel = rel.map(str::to_lowercase);
        self.tree()
            .schema_set(self.id)
            .map(|set| {
                set.active_links()
                    .into_iter()
                    .filter(|link| rel.as_deref().map_or(true, |r| link.rel == r))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn link(&self, rel: &str) -> Option<ActiveLink> {
        self.links(Some(rel)).into_iter().next()
    }

    /// URL that relative links on this node resolve against.
    pub fn base_url(&self) -> String {
        self.tree().base_url(self.id)
    }

    pub fn reference_url(&self) -> Option<String> {
        self.document.reference_url(self.id)
    }

    /// Bind `schema` under `key` (or a fresh key). Returns the key used.
    pub fn add_schema(&self, schema: Schema, key: Option<&str>) -> String {
        self.document.add_schema(self.id, schema, key)
    }

    pub fn remove_schema(&self, key: &str) {
        self.document.remove_schema(self.id, key)
    }

    /// See [`Document::add_schema_match_monitor`].
    pub fn add_schema_match_monitor(
        &self,
        monitor_key: &str,
        schema: Schema,
        callback: MatchCallback,
        immediate: bool,
        impatient: bool,
    ) -> Result<u64, BindError> {
        self.document
            .add_schema_match_monitor(self.id, monitor_key, schema, callback, immediate, impatient)
    }

    pub fn when_schemas_stable(&self, callback: StableCallback) {
        self.document.when_schemas_stable(self.id, callback)
    }
}

impl std::fmt::Debug for Data<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("id", &self.id)
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> Tree {
        Tree::new(Engine::new(), Some(value), None)
    }

    #[test]
    fn lazy_children_share_the_value() {
        let mut t = tree(json!({"a": {"b": [1, 2]}}));
        let a = t.child(t.raw_root, "a").unwrap();
        let b = t.child(a, "b").unwrap();
        assert_eq!(t.value(b), Some(json!([1, 2])));
        assert_eq!(t.raw_path(b), "/a/b");
        assert_eq!(t.value(t.raw_root), Some(json!({"a": {"b": [1, 2]}})));
        assert_eq!(t.child(t.raw_root, "a"), Some(a));
    }

    #[test]
    fn missing_children_are_undefined_until_added() {
        let mut t = tree(json!({}));
        let x = t.child(t.raw_root, "x").unwrap();
        assert_eq!(t.basic_type(x), BasicType::Undefined);
        t.apply_add("/x", json!(5)).unwrap();
        assert_eq!(t.value(x), Some(json!(5)));
        assert_eq!(t.child(t.raw_root, "x"), Some(x));
    }

    #[test]
    fn array_insert_renumbers_materialized_siblings() {
        let mut t = tree(json!({"arr": [0, 1, 2, 3, 4]}));
        let arr = t.child(t.raw_root, "arr").unwrap();
        let nodes: Vec<NodeId> = (2..5).map(|i| t.child(arr, &i.to_string()).unwrap()).collect();
        t.apply_add("/arr/2", json!("new")).unwrap();
        assert_eq!(t.length(arr), 6);
        for (offset, node) in nodes.iter().enumerate() {
            let index = offset + 3;
            assert_eq!(t.child(arr, &index.to_string()), Some(*node));
            assert_eq!(t.value(*node), Some(json!(offset + 2)));
        }
    }

    #[test]
    fn array_remove_renumbers_and_destroys() {
        let mut t = tree(json!(["x", "y", "z"]));
        let y = t.child(t.raw_root, "1").unwrap();
        let z = t.child(t.raw_root, "2").unwrap();
        assert_eq!(t.apply_remove("/1").unwrap(), Some(json!("y")));
        assert!(!t.contains(y));
        assert_eq!(t.child(t.raw_root, "1"), Some(z));
        assert_eq!(t.value(z), Some(json!("z")));
        assert_eq!(t.value(t.raw_root), Some(json!(["x", "z"])));
    }

    #[test]
    fn replace_keeps_surviving_children() {
        let mut t = tree(json!({"a": {"keep": 1, "drop": 2}}));
        let a = t.child(t.raw_root, "a").unwrap();
        let keep = t.child(a, "keep").unwrap();
        let drop = t.child(a, "drop").unwrap();
        t.apply_replace("/a", json!({"keep": 10})).unwrap();
        assert_eq!(t.value(keep), Some(json!(10)));
        assert_eq!(t.value(drop), None);
        assert_eq!(t.value(a), Some(json!({"keep": 10})));
    }

    #[test]
    fn raw_slots_are_patched_in_place() {
        let mut t = tree(json!({"a": {"b": {"c": [1]}}}));
        t.apply_add("/a/b/c/1", json!(2)).unwrap();
        t.apply_replace("/a/b/c/0", json!(0)).unwrap();
        assert_eq!(t.apply_remove("/a/b/c/1").unwrap(), Some(json!(2)));
        assert_eq!(t.value(t.raw_root), Some(json!({"a": {"b": {"c": [0]}}})));
    }

    #[test]
    fn move_between_parents() {
        let mut t = tree(json!({"a": {"x": 1}, "b": {}}));
        let x = t.child(t.raw_root, "a").and_then(|a| t.child(a, "x")).unwrap();
        t.apply_move("/a/x", "/b/y").unwrap();
        assert_eq!(t.value(t.raw_root), Some(json!({"a": {}, "b": {"y": 1}})));
        assert_eq!(t.value(x), None);
    }

    #[test]
    fn lookups_of_existing_children_allocate_no_ids() {
        let engine = Engine::new();
        let mut t = Tree::new(engine.clone(), Some(json!({"a": 1, "arr": [1]})), None);
        let a = t.child(t.raw_root, "a").unwrap();
        let ghost = t.child(t.raw_root, "ghost").unwrap();
        let before = engine.next_id();
        assert_eq!(t.child(t.raw_root, "a"), Some(a));
        assert_eq!(t.child(t.raw_root, "ghost"), Some(ghost));
        assert_eq!(engine.next_id(), before + 1);
    }

    #[test]
    fn append_paths_resolve_to_indices() {
        let mut t = tree(json!({"arr": [1, 2], "deep": {"list": []}, "obj": {}}));
        t.child(t.raw_root, "arr").unwrap();
        assert_eq!(t.resolve_append("/arr/-").unwrap(), "/arr/2");
        // Still raw below /deep
        assert_eq!(t.resolve_append("/deep/list/-").unwrap(), "/deep/list/0");
        // `-` is an ordinary key on objects
        assert_eq!(t.resolve_append("/obj/-").unwrap(), "/obj/-");
        assert_eq!(t.resolve_append("/arr/1").unwrap(), "/arr/1");

        let (moved, to) = t.apply_move("/arr/0", "/arr/-").unwrap();
        assert_eq!(moved, Some(json!(1)));
        assert_eq!(to, "/arr/1");
        assert_eq!(t.value_at_raw_path("/arr"), Some(json!([2, 1])));
    }

    #[test]
    fn contract_violations() {
        let mut t = tree(json!({"a": 1, "arr": [1]}));
        assert!(matches!(t.apply_add("/a", json!(2)), Err(PatchError::DuplicateKey { .. })));
        assert!(matches!(t.apply_remove("/nope"), Err(PatchError::MissingKey { .. })));
        assert!(matches!(
            t.apply_remove("/arr/3"),
            Err(PatchError::IndexOutOfRange { index: 3, length: 1, .. })
        ));
        assert!(matches!(
            t.apply_add("/arr/x", json!(1)),
            Err(PatchError::NonNumericIndex { .. })
        ));
        assert!(matches!(
            t.apply_add("/a/b", json!(1)),
            Err(PatchError::InvalidTarget { .. })
        ));
        assert!(matches!(
            t.apply_move("/arr", "/arr/0"),
            Err(PatchError::MoveIntoSelf { .. })
        ));
    }
}

//! Documents: a raw JSON tree, its logical root, patch application and
//! listener dispatch.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashSet, VecDeque};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};

use crate::data::{Data, NodeId, Tree};
use crate::engine::Engine;
use crate::error::{BindError, PatchError};
use crate::loader::{Fetched, Fetcher};
use crate::patch::{Action, Patch, PatchOperation, RAW_PREFIX};
use crate::pointer;
use crate::schema::Schema;
use crate::schema_match::{MatchOutcome, SchemaMatch};
use crate::types::BasicType;
use crate::uri::split_fragment;

/// Characters escaped when a pointer is placed in a URL fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub type ChangeListener = Box<dyn FnMut(&Patch, &Document)>;
pub type MatchCallback = Box<dyn FnMut(&MatchOutcome, &Document)>;
pub type StableCallback = Box<dyn FnOnce(&Document)>;

/// Notifications queued while a batch is open.
#[derive(Debug)]
pub(crate) enum Event {
    Changed(Patch),
    Match {
        node: NodeId,
        monitor: u64,
        outcome: MatchOutcome,
    },
    Stable(NodeId),
    RootReady,
}

#[derive(Default)]
struct Callbacks {
    change: Vec<(u64, ChangeListener)>,
    cancelled: HashSet<u64>,
    monitors: Vec<(u64, MatchCallback)>,
    stable: Vec<(NodeId, StableCallback)>,
    root: Vec<StableCallback>,
}

/// Options for [`Document::new`].
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    pub url: Option<String>,
    /// A definitive document is the authoritative copy of the resource at
    /// its URL, so its nodes have reference URLs.
    pub definitive: bool,
    pub read_only: bool,
    /// Raw path of the logical root; overrides `root` links.
    pub root_path: Option<String>,
    /// Schema URL bound to the raw root (the response's `profile`).
    pub profile: Option<String>,
}

impl DocumentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn definitive(mut self, definitive: bool) -> Self {
        self.definitive = definitive;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn root_path(mut self, path: impl Into<String>) -> Self {
        self.root_path = Some(path.into());
        self
    }

    pub fn profile(mut self, url: impl Into<String>) -> Self {
        self.profile = Some(url.into());
        self
    }
}

/// A JSON document whose nodes carry live schema bindings.
///
/// Reads and schema registration take `&self`; patching takes `&mut self`.
/// Callbacks receive `&Document` and may read, register schemas or
/// [`queue_patch`](Document::queue_patch); queued patches are applied at
/// the end of the current [`patch`](Document::patch) call.
pub struct Document {
    engine: Engine,
    id: u64,
    url: Option<String>,
    definitive: bool,
    read_only: bool,
    successful: bool,
    error_message: Option<String>,
    tree: RefCell<Tree>,
    callbacks: RefCell<Callbacks>,
    events: RefCell<VecDeque<Event>>,
    dispatching: Cell<bool>,
    queued: RefCell<VecDeque<Patch>>,
}

impl Document {
    pub fn new(engine: &Engine, value: Value, options: DocumentOptions) -> Self {
        Self::build(engine, Some(value), options, None)
    }

    /// A document standing for a failed load: undefined value, not
    /// successful.
    pub fn failed(engine: &Engine, url: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("document {} failed: {}", url, message);
        Self::build(
            engine,
            None,
            DocumentOptions::new().url(url).read_only(true),
            Some(message),
        )
    }

    /// A document from a fetched response. The `profile` and `root`
    /// response metadata fill in unset options.
    pub fn from_fetched(engine: &Engine, url: &str, fetched: Fetched, options: DocumentOptions) -> Self {
        let mut options = options;
        if options.url.is_none() {
            options.url = Some(url.to_string());
        }
        if options.profile.is_none() {
            options.profile = fetched.profile;
        }
        if options.root_path.is_none() {
            options.root_path = fetched.root;
        }
        Self::build(engine, Some(fetched.value), options, None)
    }

    fn build(
        engine: &Engine,
        value: Option<Value>,
        options: DocumentOptions,
        error_message: Option<String>,
    ) -> Self {
        let mut tree = Tree::new(engine.clone(), value, options.url.clone());
        tree.fixed_root = options.root_path.clone();
        let document = Self {
            engine: engine.clone(),
            id: engine.next_id(),
            url: options.url,
            definitive: options.definitive,
            read_only: options.read_only,
            successful: error_message.is_none(),
            error_message,
            tree: RefCell::new(tree),
            callbacks: RefCell::default(),
            events: RefCell::default(),
            dispatching: Cell::new(false),
            queued: RefCell::default(),
        };
        let profile = options.profile;
        document.with_tree(|tree| {
            let root = tree.raw_root;
            if let Some(profile) = profile {
                let schema = tree.engine.schema_reference(&profile);
                let key = tree.engine.unique_key();
                tree.add_schema(root, schema, &key, Vec::new());
            }
            tree.check_stable(root);
        });
        document
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn is_definitive(&self) -> bool {
        self.definitive
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// False for documents created by [`Document::failed`].
    pub fn successful(&self) -> bool {
        self.successful
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub(crate) fn tree(&self) -> Ref<'_, Tree> {
        self.tree.borrow()
    }

    /// Run `f` on the tree inside a batch, then dispatch what it queued.
    pub(crate) fn with_tree<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        let (result, events) = {
            let mut tree = self.tree.borrow_mut();
            tree.batch.begin();
            let result = f(&mut tree);
            (result, tree.batch.end())
        };
        self.dispatch(events);
        result
    }

    /// The raw tree's root node.
    pub fn raw(&self) -> Data<'_> {
        let root = self.tree().raw_root;
        Data::new(self, root)
    }

    /// The logical root; `None` until the raw root's schemas first settle.
    pub fn root(&self) -> Option<Data<'_>> {
        let path = self.tree().root_path.clone()?;
        let id = self.with_tree(|tree| tree.node_at_raw_path(&path))?;
        Some(Data::new(self, id))
    }

    /// Logical root value (`None` if undefined or not yet known).
    pub fn value(&self) -> Option<Value> {
        self.root().and_then(|root| root.value())
    }

    pub fn raw_value(&self) -> Option<Value> {
        self.raw().value()
    }

    pub fn data(&self, id: NodeId) -> Option<Data<'_>> {
        self.tree().contains(id).then(|| Data::new(self, id))
    }

    /// The node at a patch path, materializing it if needed.
    pub fn data_at(&self, path: &str) -> Option<Data<'_>> {
        let id = self.with_tree(|tree| {
            let raw = tree.to_raw_path(path);
            tree.node_at_raw_path(&raw)
        })?;
        Some(Data::new(self, id))
    }

    /// Invoke `callback` once the logical root is known.
    pub fn when_root_ready(&self, callback: StableCallback) {
        self.callbacks.borrow_mut().root.push(callback);
        if self.tree().root_path.is_some() {
            self.with_tree(|tree| tree.batch.push(Event::RootReady));
        }
    }

    // ---- mutation ----

    /// Apply `patch` atomically with respect to listeners: every operation
    /// is applied, then listeners see the whole patch. Returns the applied
    /// patch with old values captured, ready for [`Patch::inverse`].
    ///
    /// # Errors
    ///
    /// Stops at the first operation that violates its contract. Operations
    /// before it stay applied and no change notification is sent.
    pub fn patch(&mut self, patch: &Patch) -> Result<Patch, PatchError> {
        if self.read_only {
            return Err(PatchError::ReadOnly);
        }
        let operations = patch.operations();
        let is_raw = |i: &usize| operations[*i].has_prefix(RAW_PREFIX);
        let order: Vec<usize> = (0..operations.len())
            .filter(is_raw)
            .chain((0..operations.len()).filter(|i| !is_raw(i)))
            .collect();
        log::debug!(
            "document {}: applying {} raw and {} root operations",
            self.id,
            order.iter().filter(|i| is_raw(i)).count(),
            order.iter().filter(|i| !is_raw(i)).count()
        );
        let mut applied = Patch::new();
        // Applied operations by their position in `patch`
        let mut resolved: Vec<Option<PatchOperation>> = vec![None; operations.len()];
        let (outcome, events) = {
            let tree = self.tree.get_mut();
            tree.batch.begin();
            let mut outcome = Ok(());
            for index in order {
                let operation = &operations[index];
                match apply_operation(tree, operation) {
                    Ok(done) => {
                        applied.push(done.clone());
                        resolved[index] = Some(done);
                    }
                    Err(err) => {
                        log::warn!("patch aborted at {}: {}", operation.subject(), err);
                        outcome = Err(err);
                        break;
                    }
                }
            }
            let shifted = tree.take_shifted();
            tree.rebind_shifted(&shifted);
            for id in tree.take_dirty() {
                tree.refresh_node(id);
            }
            if outcome.is_ok() {
                let changed: Patch = resolved.into_iter().flatten().collect();
                tree.batch.push(Event::Changed(changed));
            }
            let dropped = std::mem::take(&mut tree.dropped_monitors);
            let events = tree.batch.end();
            let callbacks = self.callbacks.get_mut();
            callbacks.monitors.retain(|(id, _)| !dropped.contains(id));
            (outcome, events)
        };
        self.dispatch(events);
        outcome?;
        self.apply_queued()?;
        Ok(applied)
    }

    /// Queue a patch to be applied once the current patch completes.
    /// Usable from inside listeners.
    pub fn queue_patch(&self, patch: Patch) {
        self.queued.borrow_mut().push_back(patch);
    }

    pub fn apply_queued(&mut self) -> Result<(), PatchError> {
        loop {
            let next = self.queued.get_mut().pop_front();
            match next {
                Some(patch) => {
                    self.patch(&patch)?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Set a node's value with the operation its current state calls for:
    /// `add` if undefined, `replace` if defined, `remove` for `None`.
    /// An undefined parent is created as an object holding the value.
    pub fn set_value(&mut self, node: NodeId, value: Option<Value>) -> Result<Patch, PatchError> {
        let (path, defined, parent, key) = {
            let tree = self.tree();
            let node_ref = tree.nodes.get(&node).ok_or_else(|| PatchError::MalformedOperation {
                message: format!("unknown node #{}", node),
            })?;
            (
                tree.node_path(node),
                tree.basic_type(node) != BasicType::Undefined,
                node_ref.parent,
                node_ref.key.clone(),
            )
        };
        let operation = match (value, defined) {
            (None, false) => return Ok(Patch::new()),
            (None, true) => PatchOperation::remove(path),
            (Some(value), true) => PatchOperation::replace(path, value),
            (Some(value), false) => {
                if let (Some(parent), Some(key)) = (parent, key) {
                    if self.tree().basic_type(parent) == BasicType::Undefined {
                        let mut map = Map::new();
                        map.insert(key, value);
                        return self.set_value(parent, Some(Value::Object(map)));
                    }
                }
                PatchOperation::add(path, value)
            }
        };
        self.patch(&Patch::from_iter([operation]))
    }

    pub fn remove(&mut self, node: NodeId) -> Result<Patch, PatchError> {
        self.set_value(node, None)
    }

    // ---- listeners ----

    pub fn register_change_listener(&self, listener: ChangeListener) -> u64 {
        let id = self.engine.next_id();
        self.callbacks.borrow_mut().change.push((id, listener));
        id
    }

    pub fn unregister_change_listener(&self, id: u64) {
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.change.retain(|(listener, _)| *listener != id);
        callbacks.cancelled.insert(id);
    }

    // ---- schemas ----

    /// Bind `schema` to `node` under `key` (a fresh key when `None`).
    /// Returns the key used.
    pub fn add_schema(&self, node: NodeId, schema: Schema, key: Option<&str>) -> String {
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| self.engine.unique_key());
        self.with_tree(|tree| tree.add_schema(node, schema, &key, Vec::new()));
        key
    }

    pub fn remove_schema(&self, node: NodeId, key: &str) {
        self.with_tree(|tree| tree.remove_schema(node, key));
    }

    /// Watch whether `node` matches `schema`.
    ///
    /// `monitor_key` groups monitors for removal along with schema keys.
    /// With `immediate` the current outcome is reported right away;
    /// otherwise only changes are. Impatient monitors report before the
    /// node's schemas are stable.
    ///
    /// # Errors
    ///
    /// Fails on an empty monitor key, one with empty dot-separated segments,
    /// or an unknown node.
    pub fn add_schema_match_monitor(
        &self,
        node: NodeId,
        monitor_key: &str,
        schema: Schema,
        callback: MatchCallback,
        immediate: bool,
        impatient: bool,
    ) -> Result<u64, BindError> {
        validate_monitor_key(monitor_key)?;
        if !self.tree().contains(node) {
            return Err(BindError::UnknownNode { id: node });
        }
        let id = self.engine.next_id();
        self.callbacks.borrow_mut().monitors.push((id, callback));
        self.with_tree(|tree| {
            let value = tree.value(node);
            let mut monitor = SchemaMatch::new(id, schema, impatient);
            {
                let store = tree.engine.store();
                monitor.update(&store, value.as_ref());
            }
            let stable = tree.schema_set(node).map_or(true, |s| s.is_stable());
            if !immediate {
                monitor.take_notification();
            } else if impatient || stable {
                if let Some(outcome) = monitor.take_notification() {
                    tree.batch.push(Event::Match {
                        node,
                        monitor: id,
                        outcome,
                    });
                }
            }
            if let Some(set) = tree.schema_set_mut(node) {
                set.insert_monitor(monitor_key, monitor);
            }
            tree.check_stable(node);
        });
        Ok(id)
    }

    pub fn remove_schema_match_monitor(&self, monitor: u64) -> bool {
        let removed = {
            let mut tree = self.tree.borrow_mut();
            let ids: Vec<NodeId> = tree.nodes.keys().copied().collect();
            ids.into_iter().any(|node| {
                tree.schema_set_mut(node)
                    .map_or(false, |set| set.remove_monitor(monitor))
            })
        };
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.monitors.retain(|(id, _)| *id != monitor);
        callbacks.cancelled.insert(monitor);
        removed
    }

    /// Invoke `callback` once `node`'s schemas are stable (at the end of
    /// the current batch if they already are).
    pub fn when_schemas_stable(&self, node: NodeId, callback: StableCallback) {
        self.callbacks.borrow_mut().stable.push((node, callback));
        let stable = self
            .tree()
            .schema_set(node)
            .map_or(true, |set| set.is_stable());
        if stable {
            self.with_tree(|tree| tree.batch.push(Event::Stable(node)));
        }
    }

    /// URLs of schema documents some binding is waiting for.
    pub fn pending_urls(&self) -> Vec<String> {
        self.tree().pending_urls().into_iter().collect()
    }

    /// Retry bindings after schema documents were added to the engine.
    pub fn resolve_pending(&self) {
        self.with_tree(Tree::resolve_pending);
    }

    /// Fetch every pending schema document and resolve, until nothing
    /// new is pending.
    pub fn fetch_pending(&self, fetcher: &dyn Fetcher) {
        let mut attempted = HashSet::new();
        loop {
            let urls: Vec<String> = self
                .pending_urls()
                .into_iter()
                .filter(|url| attempted.insert(split_fragment(url).0.to_string()))
                .collect();
            if urls.is_empty() {
                return;
            }
            for url in urls {
                self.engine.fetch_schema(split_fragment(&url).0, fetcher);
            }
            self.resolve_pending();
        }
    }

    // ---- addressing ----

    /// `url#pointer` for a node of a definitive document.
    pub fn reference_url(&self, node: NodeId) -> Option<String> {
        if !self.definitive {
            return None;
        }
        let url = self.url.as_deref()?;
        let path = self.tree().node_path(node);
        if path.starts_with(RAW_PREFIX) {
            return None;
        }
        Some(format!(
            "{}#{}",
            split_fragment(url).0,
            utf8_percent_encode(&path, FRAGMENT)
        ))
    }

    /// Materialized nodes whose value `operation` changes: those at or
    /// under its paths, and their ancestors. Parents come first.
    pub fn affected_nodes(&self, operation: &PatchOperation) -> Vec<NodeId> {
        let tree = self.tree();
        let mut paths = vec![tree.to_raw_path(operation.subject())];
        if let Some(target) = operation.target() {
            paths.push(tree.to_raw_path(target));
        }
        let mut affected: Vec<(usize, NodeId)> = tree
            .nodes
            .keys()
            .filter(|id| {
                let node_path = tree.raw_path(**id);
                paths.iter().any(|p| {
                    pointer::has_prefix(&node_path, p) || pointer::has_prefix(p, &node_path)
                })
            })
            .map(|id| (tree.depth(*id), *id))
            .collect();
        affected.sort_unstable();
        affected.into_iter().map(|(_, id)| id).collect()
    }

    // ---- dispatch ----

    fn dispatch(&self, events: Vec<Event>) {
        self.events.borrow_mut().extend(events);
        if self.dispatching.replace(true) {
            return;
        }
        loop {
            let next = self.events.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.dispatch_one(event);
        }
        self.dispatching.set(false);
    }

    fn dispatch_one(&self, event: Event) {
        match event {
            Event::Changed(patch) => {
                let mut listeners = std::mem::take(&mut self.callbacks.borrow_mut().change);
                for (id, listener) in listeners.iter_mut() {
                    if !self.callbacks.borrow().cancelled.contains(id) {
                        listener(&patch, self);
                    }
                }
                let mut callbacks = self.callbacks.borrow_mut();
                let cancelled = std::mem::take(&mut callbacks.cancelled);
                listeners.retain(|(id, _)| !cancelled.contains(id));
                let added = std::mem::replace(&mut callbacks.change, listeners);
                callbacks.change.extend(added);
            }
            Event::Match {
                node,
                monitor,
                outcome,
            } => {
                let taken = {
                    let mut callbacks = self.callbacks.borrow_mut();
                    let index = callbacks.monitors.iter().position(|(id, _)| *id == monitor);
                    index.map(|i| callbacks.monitors.remove(i))
                };
                let Some((id, mut callback)) = taken else {
                    return;
                };
                log::trace!("node {}: monitor {} matched={}", node, id, outcome.matched);
                callback(&outcome, self);
                let mut callbacks = self.callbacks.borrow_mut();
                if !callbacks.cancelled.remove(&id) {
                    callbacks.monitors.push((id, callback));
                }
            }
            Event::Stable(node) => {
                let stable = self
                    .tree()
                    .schema_set(node)
                    .map_or(true, |set| set.is_stable());
                if !stable {
                    return;
                }
                let ready: Vec<StableCallback> = {
                    let mut callbacks = self.callbacks.borrow_mut();
                    let (ready, waiting) = std::mem::take(&mut callbacks.stable)
                        .into_iter()
                        .partition(|(n, _)| *n == node);
                    callbacks.stable = waiting;
                    ready.into_iter().map(|(_, cb)| cb).collect()
                };
                for callback in ready {
                    callback(self);
                }
            }
            Event::RootReady => {
                let ready = std::mem::take(&mut self.callbacks.borrow_mut().root);
                for callback in ready {
                    callback(self);
                }
            }
        }
    }
}

/// Apply one operation, returning it as applied: old value captured and
/// any appending `-` replaced by the index that was written.
fn apply_operation(tree: &mut Tree, operation: &PatchOperation) -> Result<PatchOperation, PatchError> {
    let subject = tree.to_raw_path(operation.subject());
    let value = || {
        operation
            .value()
            .cloned()
            .ok_or_else(|| PatchError::MalformedOperation {
                message: format!("{} without a value", operation.action().as_str()),
            })
    };
    let (mut done, old) = match operation.action() {
        Action::Add => {
            let value = value()?;
            let written = tree.resolve_append(&subject)?;
            let old = tree.apply_add(&written, value.clone())?;
            let path = with_written_index(operation.subject(), &written);
            (PatchOperation::add(path, value), old)
        }
        Action::Replace => (operation.clone(), tree.apply_replace(&subject, value()?)?),
        Action::Remove => (operation.clone(), tree.apply_remove(&subject)?),
        Action::Move => {
            let target = operation
                .target()
                .ok_or_else(|| PatchError::MalformedOperation {
                    message: "move without a target".to_string(),
                })?;
            let raw_target = tree.to_raw_path(target);
            let (old, written) = tree.apply_move(&subject, &raw_target)?;
            let path = with_written_index(target, &written);
            (PatchOperation::move_to(operation.subject(), path), old)
        }
    };
    done.set_old_value(old);
    Ok(done)
}

/// `path` with a trailing `-` swapped for the last component of the raw
/// path that was actually written.
fn with_written_index(path: &str, written: &str) -> String {
    match (path.strip_suffix('-'), written.rsplit_once('/')) {
        (Some(parent), Some((_, index))) if parent.ends_with('/') && index != "-" => {
            format!("{}{}", parent, index)
        }
        _ => path.to_string(),
    }
}

fn validate_monitor_key(key: &str) -> Result<(), BindError> {
    let malformed = |message: &str| BindError::MalformedMonitorKey {
        key: key.to_string(),
        message: message.to_string(),
    };
    if key.is_empty() {
        return Err(malformed("key is empty"));
    }
    if key.split('.').any(str::is_empty) {
        return Err(malformed("key has an empty segment"));
    }
    Ok(())
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("successful", &self.successful)
            .finish_non_exhaustive()
    }
}

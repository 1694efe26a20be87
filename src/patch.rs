//! The patch protocol: ordered add/replace/remove/move operations over
//! pointer paths.
//!
//! Paths starting with `?` address the raw (wire) tree of a document; all
//! other paths are relative to its logical root. The wire shape of an
//! operation is `{"add": "/a", "value": 1}`, `{"remove": "/a"}` or
//! `{"move": "/a", "to": "/b"}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pointer;

/// Prefix marking a path in the raw tree.
pub const RAW_PREFIX: &str = "?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Replace,
    Remove,
    Move,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Replace => "replace",
            Action::Remove => "remove",
            Action::Move => "move",
        }
    }
}

/// A single patch operation.
///
/// `old_value` is captured when the operation is applied to a document and
/// is what makes [`Patch::inverse`] possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "PlainOperation", from = "PlainOperation")]
pub struct PatchOperation {
    action: Action,
    subject: String,
    value: Option<Value>,
    target: Option<String>,
    old_value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self::new(Action::Add, path.into(), Some(value), None)
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::new(Action::Replace, path.into(), Some(value), None)
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::new(Action::Remove, path.into(), None, None)
    }

    pub fn move_to(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Action::Move, path.into(), None, Some(target.into()))
    }

    fn new(action: Action, subject: String, value: Option<Value>, target: Option<String>) -> Self {
        Self {
            action,
            subject,
            value,
            target,
            old_value: None,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The new value for `add`/`replace`.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The destination of a `move`.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// The subject's value before the operation was applied.
    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    pub(crate) fn set_old_value(&mut self, old: Option<Value>) {
        self.old_value = old;
    }

    /// True if the subject (or, for `move`, the target) is `path` or nested under it.
    pub fn has_prefix(&self, path: &str) -> bool {
        pointer::has_prefix(&self.subject, path)
            || self
                .target
                .as_deref()
                .map_or(false, |target| pointer::has_prefix(target, path))
    }

    /// True if the subject addresses the raw tree.
    pub fn is_raw(&self) -> bool {
        pointer::has_prefix(&self.subject, RAW_PREFIX)
    }

    /// Copy of this operation with `prefix` stripped from its paths.
    ///
    /// Paths not under `prefix` are left unchanged.
    pub fn relative_to(&self, prefix: &str) -> Self {
        let strip = |path: &str| -> String {
            if pointer::has_prefix(path, prefix) {
                path[prefix.len()..].to_string()
            } else {
                path.to_string()
            }
        };
        Self {
            subject: strip(&self.subject),
            target: self.target.as_deref().map(strip),
            ..self.clone()
        }
    }

    /// The operation that undoes this one.
    pub fn inverse(&self) -> Self {
        match self.action {
            Action::Add => match &self.old_value {
                Some(old) => PatchOperation::replace(self.subject.clone(), old.clone()),
                None => PatchOperation::remove(self.subject.clone()),
            },
            Action::Replace => match &self.old_value {
                Some(old) => PatchOperation::replace(self.subject.clone(), old.clone()),
                None => PatchOperation::remove(self.subject.clone()),
            },
            Action::Remove => PatchOperation::add(
                self.subject.clone(),
                self.old_value.clone().unwrap_or(Value::Null),
            ),
            Action::Move => PatchOperation::move_to(
                self.target.clone().unwrap_or_default(),
                self.subject.clone(),
            ),
        }
    }

    /// The wire representation of this operation.
    pub fn plain(&self) -> Value {
        match self.action {
            Action::Add | Action::Replace => {
                let mut map = serde_json::Map::new();
                map.insert(
                    self.action.as_str().to_string(),
                    Value::String(self.subject.clone()),
                );
                map.insert(
                    "value".to_string(),
                    self.value.clone().unwrap_or(Value::Null),
                );
                Value::Object(map)
            }
            Action::Remove => json!({ "remove": self.subject }),
            Action::Move => json!({
                "move": self.subject,
                "to": self.target.clone().unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PlainOperation {
    Add {
        add: String,
        value: Value,
    },
    Replace {
        replace: String,
        value: Value,
    },
    Remove {
        remove: String,
    },
    Move {
        #[serde(rename = "move")]
        from: String,
        to: String,
    },
}

impl From<PlainOperation> for PatchOperation {
    fn from(plain: PlainOperation) -> Self {
        match plain {
            PlainOperation::Add { add, value } => PatchOperation::add(add, value),
            PlainOperation::Replace { replace, value } => PatchOperation::replace(replace, value),
            PlainOperation::Remove { remove } => PatchOperation::remove(remove),
            PlainOperation::Move { from, to } => PatchOperation::move_to(from, to),
        }
    }
}

impl From<PatchOperation> for PlainOperation {
    fn from(op: PatchOperation) -> Self {
        match op.action {
            Action::Add => PlainOperation::Add {
                add: op.subject,
                value: op.value.unwrap_or(Value::Null),
            },
            Action::Replace => PlainOperation::Replace {
                replace: op.subject,
                value: op.value.unwrap_or(Value::Null),
            },
            Action::Remove => PlainOperation::Remove { remove: op.subject },
            Action::Move => PlainOperation::Move {
                from: op.subject,
                to: op.target.unwrap_or_default(),
            },
        }
    }
}

/// An ordered sequence of operations. Operations apply in order and are
/// never reordered or merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    operations: Vec<PatchOperation>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, path: impl Into<String>, value: Value) -> Self {
        self.operations.push(PatchOperation::add(path, value));
        self
    }

    pub fn replace(mut self, path: impl Into<String>, value: Value) -> Self {
        self.operations.push(PatchOperation::replace(path, value));
        self
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.operations.push(PatchOperation::remove(path));
        self
    }

    pub fn move_to(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.operations.push(PatchOperation::move_to(path, target));
        self
    }

    pub fn push(&mut self, operation: PatchOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub(crate) fn operations_mut(&mut self) -> &mut [PatchOperation] {
        &mut self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> {
        self.operations.iter()
    }

    /// Operations whose subject or target lies under `prefix`.
    pub fn filter(&self, prefix: &str) -> Patch {
        Patch {
            operations: self
                .operations
                .iter()
                .filter(|op| op.has_prefix(prefix))
                .cloned()
                .collect(),
        }
    }

    /// Operations not touching `prefix` at all.
    pub fn filter_remainder(&self, prefix: &str) -> Patch {
        Patch {
            operations: self
                .operations
                .iter()
                .filter(|op| !op.has_prefix(prefix))
                .cloned()
                .collect(),
        }
    }

    /// True if any operation touches `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.operations.iter().any(|op| op.has_prefix(prefix))
    }

    /// The patch that undoes this one once it has been applied.
    pub fn inverse(&self) -> Patch {
        Patch {
            operations: self.operations.iter().rev().map(|op| op.inverse()).collect(),
        }
    }

    /// Kept as an identity transform: operations are never coalesced.
    pub fn condense(self) -> Patch {
        self
    }

    /// The wire representation (a JSON array of plain operations).
    pub fn plain(&self) -> Value {
        Value::Array(self.operations.iter().map(|op| op.plain()).collect())
    }

    /// Parse the wire representation.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for anything that is not an array of
    /// plain operations.
    pub fn from_plain(plain: &Value) -> Result<Patch, serde_json::Error> {
        Patch::deserialize(plain)
    }
}

impl FromIterator<PatchOperation> for Patch {
    fn from_iter<I: IntoIterator<Item = PatchOperation>>(iter: I) -> Self {
        Patch {
            operations: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_order() {
        let patch = Patch::new()
            .add("/a", json!(1))
            .remove("/b")
            .move_to("/c", "/d");
        let actions: Vec<Action> = patch.iter().map(|op| op.action()).collect();
        assert_eq!(actions, vec![Action::Add, Action::Remove, Action::Move]);
    }

    #[test]
    fn prefix_checks_include_move_target() {
        let op = PatchOperation::move_to("/a/1", "/b/0");
        assert!(op.has_prefix("/a"));
        assert!(op.has_prefix("/b"));
        assert!(!op.has_prefix("/c"));
        assert!(!PatchOperation::remove("/ab").has_prefix("/a"));
    }

    #[test]
    fn filter_partitions() {
        let patch = Patch::new()
            .add("?/raw", json!(1))
            .add("/a", json!(2))
            .replace("?", json!({}));
        assert_eq!(patch.filter(RAW_PREFIX).len(), 2);
        assert_eq!(patch.filter_remainder(RAW_PREFIX).len(), 1);
        assert_eq!(patch.filter_remainder(RAW_PREFIX).operations()[0].subject(), "/a");
    }

    #[test]
    fn relative_paths() {
        let op = PatchOperation::move_to("?/a/b", "?/c").relative_to(RAW_PREFIX);
        assert_eq!(op.subject(), "/a/b");
        assert_eq!(op.target(), Some("/c"));
    }

    #[test]
    fn inverse_uses_captured_values() {
        let mut patch = Patch::new()
            .add("/a", json!(1))
            .replace("/b", json!(2))
            .remove("/c");
        patch.operations_mut()[1].set_old_value(Some(json!("old b")));
        patch.operations_mut()[2].set_old_value(Some(json!("old c")));

        let inverse = patch.inverse();
        assert_eq!(
            inverse.plain(),
            json!([
                {"add": "/c", "value": "old c"},
                {"replace": "/b", "value": "old b"},
                {"remove": "/a"}
            ])
        );
    }

    #[test]
    fn inverse_of_move_swaps_paths() {
        let inverse = Patch::new().move_to("/a", "/b").inverse();
        assert_eq!(inverse.plain(), json!([{"move": "/b", "to": "/a"}]));
    }

    #[test]
    fn plain_round_trip() {
        let plain = json!([
            {"add": "/a", "value": {"x": 1}},
            {"replace": "/b", "value": null},
            {"remove": "/c"},
            {"move": "/d", "to": "/e"}
        ]);
        let patch = Patch::from_plain(&plain).unwrap();
        assert_eq!(patch.len(), 4);
        assert_eq!(patch.operations()[3].target(), Some("/e"));
        assert_eq!(patch.plain(), plain);
        assert_eq!(serde_json::to_value(&patch).unwrap(), plain);
    }

    #[test]
    fn malformed_plain_rejected() {
        assert!(Patch::from_plain(&json!([{"copy": "/a", "from": "/b"}])).is_err());
        assert!(Patch::from_plain(&json!({"add": "/a"})).is_err());
    }

    #[test]
    fn condense_is_identity() {
        let patch = Patch::new().add("/a", json!(1)).remove("/a");
        assert_eq!(patch.clone().condense(), patch);
    }
}

//! Matching data against schemas.
//!
//! [`evaluate`] is a pure function of (value, schema). The stateful types
//! here ([`SchemaMatch`], [`XorSelector`], [`OrSelector`]) remember the last
//! result so a document only reports real changes.

use std::fmt;

use serde_json::Value;

use crate::schema::{Dependency, Schema};
use crate::schema_list::{is_multiple, SchemaList};
use crate::store::{Pending, SchemaStore};
use crate::types::{json_equal, BasicType, ALL_TYPES};

/// Why a value does not match a schema, optionally wrapping the failure of
/// a nested match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailReason {
    message: String,
    cause: Option<Box<FailReason>>,
}

impl FailReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn caused_by(message: impl Into<String>, cause: FailReason) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&FailReason> {
        self.cause.as_deref()
    }

    /// The innermost failure.
    pub fn root_cause(&self) -> &FailReason {
        let mut reason = self;
        while let Some(cause) = reason.cause() {
            reason = cause;
        }
        reason
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// The result of matching one value against one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub fail_reason: Option<FailReason>,
}

impl MatchOutcome {
    fn from_failure(failure: Option<FailReason>) -> Self {
        Self {
            matched: failure.is_none(),
            fail_reason: failure,
        }
    }
}

/// Match `value` (`None` is undefined) against `schema`.
///
/// Checks run in a fixed order and the first failure is reported: basic
/// types, then sub-schemas (`allOf`, `not`, `oneOf`, `anyOf`, properties,
/// items), then the schema's own constraints.
///
/// # Errors
///
/// Returns `Pending` if a `$ref` on the way cannot be resolved yet.
pub fn evaluate(
    store: &SchemaStore,
    value: Option<&Value>,
    schema: &Schema,
) -> Result<MatchOutcome, Pending> {
    let mut evaluator = Evaluator {
        store,
        active: Vec::new(),
    };
    Ok(MatchOutcome::from_failure(evaluator.check(value, schema)?))
}

/// Match `value` against every schema of `list`.
///
/// # Errors
///
/// Returns `Pending` if a `$ref` cannot be resolved yet.
pub fn evaluate_list(
    store: &SchemaStore,
    value: Option<&Value>,
    list: &SchemaList,
) -> Result<MatchOutcome, Pending> {
    for schema in list {
        let outcome = evaluate(store, value, schema)?;
        if !outcome.matched {
            return Ok(outcome);
        }
    }
    Ok(MatchOutcome::from_failure(None))
}

struct Evaluator<'s> {
    store: &'s SchemaStore,
    /// Schemas being checked against the current value; re-entering one is a
    /// cycle and counts as a pass.
    active: Vec<String>,
}

type Check = Result<Option<FailReason>, Pending>;

impl Evaluator<'_> {
    fn check(&mut self, value: Option<&Value>, schema: &Schema) -> Check {
        let full = self.store.get_full(schema)?;
        let id = full.id();
        if self.active.contains(&id) {
            return Ok(None);
        }
        self.active.push(id);
        let result = self.check_full(value, &full);
        self.active.pop();
        result
    }

    /// Check a child value; cycle tracking restarts one level down.
    fn check_child(&mut self, value: &Value, schema: &Schema) -> Check {
        let saved = std::mem::take(&mut self.active);
        let result = self.check(Some(value), schema);
        self.active = saved;
        result
    }

    fn check_full(&mut self, value: Option<&Value>, schema: &Schema) -> Check {
        if let Some(reason) = basic_types(value, schema) {
            return Ok(Some(reason));
        }
        if let Some(reason) = self.sub_matches(value, schema)? {
            return Ok(Some(reason));
        }
        self.immediate(value, schema)
    }

    fn sub_matches(&mut self, value: Option<&Value>, schema: &Schema) -> Check {
        for and in schema.and_schemas() {
            if let Some(reason) = self.check(value, &and)? {
                return Ok(Some(FailReason::caused_by(
                    "does not match allOf/extends schema",
                    reason,
                )));
            }
        }
        for not in schema.not_schemas() {
            if self.check(value, &not)?.is_none() {
                return Ok(Some(FailReason::new("matches a forbidden (not/disallow) schema")));
            }
        }
        for group in schema.xor_schemas() {
            let mut passing = 0;
            for option in &group {
                if self.check(value, option)?.is_none() {
                    passing += 1;
                }
            }
            match passing {
                1 => {}
                0 => return Ok(Some(FailReason::new("does not match any oneOf option"))),
                _ => return Ok(Some(FailReason::new("matches more than one oneOf option"))),
            }
        }
        for group in schema.or_schemas() {
            let mut any = false;
            for option in &group {
                if self.check(value, option)?.is_none() {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(Some(FailReason::new("does not match any anyOf option")));
            }
        }
        match value {
            Some(Value::Object(object)) => {
                for (key, child) in object {
                    for property_schema in schema.property_schemas(key) {
                        if let Some(reason) = self.check_child(child, &property_schema)? {
                            return Ok(Some(FailReason::caused_by(
                                format!("property {:?} is invalid", key),
                                reason,
                            )));
                        }
                    }
                }
            }
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    for index_schema in schema.index_schemas(index) {
                        if let Some(reason) = self.check_child(item, &index_schema)? {
                            return Ok(Some(FailReason::caused_by(
                                format!("item {} is invalid", index),
                                reason,
                            )));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn immediate(&mut self, value: Option<&Value>, schema: &Schema) -> Check {
        if let Some(allowed) = schema.enum_values() {
            let found = value.map_or(false, |v| allowed.iter().any(|e| json_equal(e, v)));
            if !found {
                return Ok(Some(FailReason::new("value is not one of the enum values")));
            }
        }
        let reason = match value {
            Some(Value::Number(n)) => n.as_f64().and_then(|n| number_constraints(n, schema)),
            Some(Value::String(s)) => string_constraints(s, schema),
            Some(Value::Array(items)) => array_constraints(items, schema),
            Some(Value::Object(object)) => {
                if let Some(reason) = object_constraints(object, schema) {
                    Some(reason)
                } else {
                    self.dependencies(value, object, schema)?
                }
            }
            _ => None,
        };
        Ok(reason)
    }

    fn dependencies(
        &mut self,
        value: Option<&Value>,
        object: &serde_json::Map<String, Value>,
        schema: &Schema,
    ) -> Check {
        for (key, dependency) in schema.dependencies() {
            if !object.contains_key(&key) {
                continue;
            }
            match dependency {
                Dependency::Properties(required) => {
                    if let Some(missing) = required.iter().find(|p| !object.contains_key(*p)) {
                        return Ok(Some(FailReason::new(format!(
                            "property {:?} requires property {:?}",
                            key, missing
                        ))));
                    }
                }
                Dependency::Schema(dependent) => {
                    if let Some(reason) = self.check(value, &dependent)? {
                        return Ok(Some(FailReason::caused_by(
                            format!("dependency of property {:?} is not satisfied", key),
                            reason,
                        )));
                    }
                }
            }
        }
        Ok(None)
    }
}

fn type_list(types: &[BasicType]) -> String {
    types.iter().map(BasicType::as_str).collect::<Vec<_>>().join(", ")
}

fn basic_types(value: Option<&Value>, schema: &Schema) -> Option<FailReason> {
    let types = schema.types();
    let actual = BasicType::of(value);
    if value.is_none() {
        if types.len() < ALL_TYPES.len() {
            return Some(FailReason::new(format!(
                "value is undefined, expected one of: {}",
                type_list(&types)
            )));
        }
        return None;
    }
    if types.iter().any(|declared| actual.satisfies(*declared)) {
        None
    } else {
        Some(FailReason::new(format!(
            "type {} is not one of: {}",
            actual,
            type_list(&types)
        )))
    }
}

fn number_constraints(n: f64, schema: &Schema) -> Option<FailReason> {
    if let Some(min) = schema.minimum() {
        if schema.exclusive_minimum() && n <= min {
            return Some(FailReason::new(format!("value must be greater than {}", min)));
        }
        if n < min {
            return Some(FailReason::new(format!("value must be at least {}", min)));
        }
    }
    if let Some(max) = schema.maximum() {
        if schema.exclusive_maximum() && n >= max {
            return Some(FailReason::new(format!("value must be less than {}", max)));
        }
        if n > max {
            return Some(FailReason::new(format!("value must be at most {}", max)));
        }
    }
    if let Some(multiple) = schema.multiple_of() {
        if !is_multiple(n, multiple) {
            return Some(FailReason::new(format!("value must be a multiple of {}", multiple)));
        }
    }
    None
}

fn string_constraints(s: &str, schema: &Schema) -> Option<FailReason> {
    let length = s.chars().count();
    if length < schema.min_length() {
        return Some(FailReason::new(format!(
            "string must be at least {} characters",
            schema.min_length()
        )));
    }
    if let Some(max) = schema.max_length() {
        if length > max {
            return Some(FailReason::new(format!("string must be at most {} characters", max)));
        }
    }
    if let Some(pattern) = schema.pattern() {
        if let Some(re) = schema.regex(pattern) {
            if !re.is_match(s) {
                return Some(FailReason::new(format!("string does not match pattern {}", pattern)));
            }
        }
    }
    None
}

fn array_constraints(items: &[Value], schema: &Schema) -> Option<FailReason> {
    if items.len() < schema.min_items() {
        return Some(FailReason::new(format!(
            "array must have at least {} items",
            schema.min_items()
        )));
    }
    if let Some(max) = schema.max_items() {
        if items.len() > max {
            return Some(FailReason::new(format!("array must have at most {} items", max)));
        }
    }
    if !schema.allowed_additional_items() {
        if let Some(tuple) = schema.tuple_length() {
            if items.len() > tuple {
                return Some(FailReason::new(format!(
                    "array must have at most {} items (no additional items)",
                    tuple
                )));
            }
        }
    }
    if schema.unique_items() {
        for (i, a) in items.iter().enumerate() {
            if items[i + 1..].iter().any(|b| json_equal(a, b)) {
                return Some(FailReason::new("array items must be unique"));
            }
        }
    }
    None
}

fn object_constraints(
    object: &serde_json::Map<String, Value>,
    schema: &Schema,
) -> Option<FailReason> {
    for required in schema.required_properties() {
        if !object.contains_key(&required) {
            return Some(FailReason::new(format!(
                "missing required property {:?}",
                required
            )));
        }
    }
    if object.len() < schema.min_properties() {
        return Some(FailReason::new(format!(
            "object must have at least {} properties",
            schema.min_properties()
        )));
    }
    if let Some(max) = schema.max_properties() {
        if object.len() > max {
            return Some(FailReason::new(format!(
                "object must have at most {} properties",
                max
            )));
        }
    }
    if !schema.allowed_additional_properties() {
        if let Some(key) = object.keys().find(|k| !schema.is_defined_property(k)) {
            return Some(FailReason::new(format!(
                "additional property {:?} is not allowed",
                key
            )));
        }
    }
    None
}

/// A monitored match between one node and one schema.
#[derive(Debug, Clone)]
pub struct SchemaMatch {
    id: u64,
    schema: Schema,
    impatient: bool,
    outcome: Option<MatchOutcome>,
    notified: Option<MatchOutcome>,
    pending: Option<String>,
}

impl SchemaMatch {
    pub fn new(id: u64, schema: Schema, impatient: bool) -> Self {
        Self {
            id,
            schema,
            impatient,
            outcome: None,
            notified: None,
            pending: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Impatient matches report before the node's schemas are stable.
    pub fn is_impatient(&self) -> bool {
        self.impatient
    }

    /// The most recent outcome, once one could be computed.
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    pub fn matched(&self) -> bool {
        self.outcome.as_ref().map_or(false, |o| o.matched)
    }

    /// URL of the schema document this match is waiting for.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Re-evaluate against `value`.
    pub fn update(&mut self, store: &SchemaStore, value: Option<&Value>) {
        match evaluate(store, value, &self.schema) {
            Ok(outcome) => {
                self.pending = None;
                self.outcome = Some(outcome);
            }
            Err(pending) => self.pending = Some(pending.url),
        }
    }

    /// The outcome to report, if it differs from the last one reported.
    /// An unchanged fail reason is not reported twice.
    pub fn take_notification(&mut self) -> Option<MatchOutcome> {
        if self.outcome.is_some() && self.outcome != self.notified {
            self.notified = self.outcome.clone();
            self.outcome.clone()
        } else {
            None
        }
    }
}

/// Tracks which option of a `oneOf` group currently applies.
#[derive(Debug, Clone)]
pub struct XorSelector {
    options: Vec<Schema>,
    selected: Option<usize>,
    fail_reason: Option<FailReason>,
}

impl XorSelector {
    pub fn new(options: Vec<Schema>) -> Self {
        Self {
            options,
            selected: None,
            fail_reason: None,
        }
    }

    pub fn options(&self) -> &[Schema] {
        &self.options
    }

    /// Re-evaluate. Returns whether the selected option changed.
    ///
    /// # Errors
    ///
    /// Returns `Pending` if an option cannot be resolved yet; the previous
    /// selection is kept.
    pub fn update(&mut self, store: &SchemaStore, value: Option<&Value>) -> Result<bool, Pending> {
        let mut passing = Vec::new();
        for (index, option) in self.options.iter().enumerate() {
            if evaluate(store, value, option)?.matched {
                passing.push(index);
            }
        }
        let selected = match passing.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        self.fail_reason = match passing.len() {
            0 => Some(FailReason::new("no option matched")),
            1 => None,
            _ => Some(FailReason::new("more than one option matched")),
        };
        let changed = selected != self.selected;
        self.selected = selected;
        Ok(changed)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_option(&self) -> Option<&Schema> {
        self.selected.map(|i| &self.options[i])
    }

    pub fn fail_reason(&self) -> Option<&FailReason> {
        self.fail_reason.as_ref()
    }
}

/// Tracks which options of an `anyOf` group currently apply.
#[derive(Debug, Clone)]
pub struct OrSelector {
    options: Vec<Schema>,
    selected: Vec<usize>,
}

impl OrSelector {
    pub fn new(options: Vec<Schema>) -> Self {
        Self {
            options,
            selected: Vec::new(),
        }
    }

    pub fn options(&self) -> &[Schema] {
        &self.options
    }

    /// Re-evaluate. Returns whether the set of passing options changed.
    ///
    /// # Errors
    ///
    /// Returns `Pending` if an option cannot be resolved yet.
    pub fn update(&mut self, store: &SchemaStore, value: Option<&Value>) -> Result<bool, Pending> {
        let mut passing = Vec::new();
        for (index, option) in self.options.iter().enumerate() {
            if evaluate(store, value, option)?.matched {
                passing.push(index);
            }
        }
        let changed = passing != self.selected;
        self.selected = passing;
        Ok(changed)
    }

    pub fn selected_options(&self) -> Vec<&Schema> {
        self.selected.iter().map(|i| &self.options[*i]).collect()
    }

    pub fn fail_reason(&self) -> Option<FailReason> {
        if self.selected.is_empty() {
            Some(FailReason::new("no option matched"))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(schema: Value, value: Value) -> MatchOutcome {
        let mut store = SchemaStore::new();
        let schema = store.add_anonymous(schema);
        evaluate(&store, Some(&value), &schema).unwrap()
    }

    fn reason(schema: Value, value: Value) -> String {
        check(schema, value)
            .fail_reason
            .map(|r| r.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn integer_is_a_number_but_not_vice_versa() {
        assert!(check(json!({"type": "number"}), json!(3)).matched);
        assert!(!check(json!({"type": "integer"}), json!(3.5)).matched);
        assert!(check(json!({"type": "integer"}), json!(3.0)).matched);
    }

    #[test]
    fn basic_types_are_checked_first() {
        assert_eq!(
            reason(json!({"type": "string", "enum": ["a"]}), json!(1)),
            "type integer is not one of: string"
        );
    }

    #[test]
    fn nested_property_failure() {
        let outcome = check(
            json!({"properties": {"a": {"type": "object", "required": ["b"]}}}),
            json!({"a": {}}),
        );
        let fail = outcome.fail_reason.unwrap();
        assert_eq!(fail.message(), "property \"a\" is invalid");
        assert_eq!(fail.root_cause().message(), "missing required property \"b\"");
    }

    #[test]
    fn composition() {
        let one_of = json!({"oneOf": [{"type": "integer"}, {"minimum": 0}]});
        assert!(check(one_of.clone(), json!(-1)).matched);
        assert_eq!(reason(one_of.clone(), json!(1)), "matches more than one oneOf option");
        assert_eq!(reason(one_of, json!(-1.5)), "does not match any oneOf option");

        assert!(check(json!({"anyOf": [{"type": "string"}, {"type": "null"}]}), json!(null)).matched);
        assert!(!check(json!({"not": {"type": "string"}}), json!("x")).matched);
        assert!(!check(json!({"disallow": "string"}), json!("x")).matched);
    }

    #[test]
    fn immediate_constraints() {
        assert_eq!(
            reason(json!({"minimum": 5, "exclusiveMinimum": true}), json!(5)),
            "value must be greater than 5"
        );
        assert_eq!(reason(json!({"multipleOf": 0.5}), json!(1.25)), "value must be a multiple of 0.5");
        assert!(check(json!({"multipleOf": 0.1}), json!(0.3)).matched);
        assert_eq!(reason(json!({"maxLength": 2}), json!("abc")), "string must be at most 2 characters");
        assert_eq!(reason(json!({"pattern": "^a"}), json!("ba")), "string does not match pattern ^a");
        assert_eq!(reason(json!({"uniqueItems": true}), json!([1, 1.0])), "array items must be unique");
        assert_eq!(
            reason(json!({"properties": {"a": {}}, "additionalProperties": false}), json!({"a": 1, "b": 2})),
            "additional property \"b\" is not allowed"
        );
        assert!(check(json!({"enum": [{"a": [1]}]}), json!({"a": [1.0]})).matched);
    }

    #[test]
    fn dependencies() {
        let schema = json!({"dependencies": {"a": ["b"], "c": {"required": ["d"]}}});
        assert!(check(schema.clone(), json!({"x": 1})).matched);
        assert_eq!(
            reason(schema.clone(), json!({"a": 1})),
            "property \"a\" requires property \"b\""
        );
        assert_eq!(
            reason(schema, json!({"c": 1})),
            "dependency of property \"c\" is not satisfied: missing required property \"d\""
        );
    }

    #[test]
    fn cyclic_all_of_terminates() {
        let mut store = SchemaStore::new();
        let schema = store.add_anonymous(json!({
            "allOf": [{"$ref": "#/definitions/a"}],
            "definitions": {"a": {"allOf": [{"$ref": "#"}], "type": "object"}}
        }));
        assert!(evaluate(&store, Some(&json!({})), &schema).unwrap().matched);
        assert!(!evaluate(&store, Some(&json!(1)), &schema).unwrap().matched);
    }

    #[test]
    fn undefined_values() {
        let mut store = SchemaStore::new();
        let any = store.add_anonymous(json!({}));
        let string = store.add_anonymous(json!({"type": "string"}));
        assert!(evaluate(&store, None, &any).unwrap().matched);
        assert!(!evaluate(&store, None, &string).unwrap().matched);
    }

    #[test]
    fn xor_selector_exclusivity() {
        let mut store = SchemaStore::new();
        let a = store.add_anonymous(json!({"type": "string"}));
        let b = store.add_anonymous(json!({"type": "string", "maxLength": 3}));
        let mut selector = XorSelector::new(vec![a.clone(), b]);

        assert!(!selector.update(&store, Some(&json!(1.5))).unwrap());
        assert_eq!(selector.selected_option(), None);
        assert!(selector.update(&store, Some(&json!("long string"))).unwrap());
        assert_eq!(selector.selected_option(), Some(&a));
        assert!(!selector.update(&store, Some(&json!("other long"))).unwrap());
        assert!(selector.update(&store, Some(&json!("ab"))).unwrap());
        assert_eq!(selector.selected_option(), None);
        assert_eq!(selector.fail_reason().unwrap().message(), "more than one option matched");
    }

    #[test]
    fn or_selector_reports_set_changes_only() {
        let mut store = SchemaStore::new();
        let a = store.add_anonymous(json!({"type": "string"}));
        let b = store.add_anonymous(json!({"maxLength": 3}));
        let mut selector = OrSelector::new(vec![a, b]);
        assert!(selector.update(&store, Some(&json!("ab"))).unwrap());
        assert_eq!(selector.selected_options().len(), 2);
        assert!(!selector.update(&store, Some(&json!("cd"))).unwrap());
        assert!(selector.update(&store, Some(&json!("abcd"))).unwrap());
        assert_eq!(selector.selected_options().len(), 1);
    }

    #[test]
    fn schema_match_suppresses_repeated_reasons() {
        let mut store = SchemaStore::new();
        let schema = store.add_anonymous(json!({"type": "string"}));
        let mut m = SchemaMatch::new(1, schema, false);
        m.update(&store, Some(&json!(1)));
        assert!(m.take_notification().is_some());
        m.update(&store, Some(&json!(2)));
        assert!(m.take_notification().is_none());
        m.update(&store, Some(&json!("x")));
        assert!(m.take_notification().unwrap().matched);
    }
}

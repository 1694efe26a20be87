//! Schemas jointly constraining one value, and value synthesis.
//!
//! Most facets compose by intersection (tightest bound wins). Derived
//! results are memoized per list; a list never changes after construction,
//! so the memo never needs invalidating.

use std::cell::OnceCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{json, Map, Value};

use crate::engine::Engine;
use crate::loader::Fetcher;
use crate::schema::Schema;
use crate::store::{Pending, SchemaStore};
use crate::types::{json_equal, BasicType, ALL_TYPES};

/// Nesting depth at which synthesis gives up on recursive schemas.
const MAX_DEPTH: usize = 32;
/// Upper bound on the `oneOf`/`anyOf` combinations tried per level.
const MAX_COMBINATIONS: usize = 64;

/// Result of [`SchemaList::create_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    Value(Value),
    /// No combination of the schemas admits a value.
    Unsatisfiable,
    /// A `$ref` target must be loaded before synthesis can finish.
    Pending(String),
}

#[derive(Debug, Default)]
struct Memo {
    types: OnceCell<Vec<BasicType>>,
    enum_values: OnceCell<Option<Vec<Value>>>,
    required: OnceCell<Vec<String>>,
    defined: OnceCell<Vec<String>>,
}

/// An ordered, deduplicated list of schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaList {
    schemas: Vec<Schema>,
    memo: Rc<Memo>,
}

impl SchemaList {
    pub fn new(schemas: impl IntoIterator<Item = Schema>) -> Self {
        let mut unique: Vec<Schema> = Vec::new();
        for schema in schemas {
            if !unique.contains(&schema) {
                unique.push(schema);
            }
        }
        Self {
            schemas: unique,
            memo: Rc::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Schema> {
        self.schemas.iter()
    }

    pub fn as_slice(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn contains(&self, schema: &Schema) -> bool {
        self.schemas.contains(schema)
    }

    pub fn concat(&self, other: &SchemaList) -> SchemaList {
        SchemaList::new(self.schemas.iter().chain(other.iter()).cloned())
    }

    /// Basic types allowed by every schema, in [`ALL_TYPES`] order.
    pub fn types(&self) -> &[BasicType] {
        self.memo.types.get_or_init(|| {
            let per_schema: Vec<Vec<BasicType>> = self.schemas.iter().map(Schema::types).collect();
            ALL_TYPES
                .iter()
                .copied()
                .filter(|t| per_schema.iter().all(|types| types.contains(t)))
                .collect()
        })
    }

    /// Union of every declared `enum`, in declaration order without
    /// duplicates; `None` if no schema declares one. Each schema still
    /// enforces its own `enum` when matching.
    pub fn enum_values(&self) -> Option<&[Value]> {
        self.memo
            .enum_values
            .get_or_init(|| {
                let mut union: Option<Vec<Value>> = None;
                for values in self.schemas.iter().filter_map(Schema::enum_values) {
                    let union = union.get_or_insert_with(Vec::new);
                    for value in values {
                        if !union.iter().any(|v| json_equal(v, &value)) {
                            union.push(value);
                        }
                    }
                }
                union
            })
            .as_deref()
    }

    /// The first declared `default`.
    pub fn default_value(&self) -> Option<Value> {
        self.schemas.iter().find_map(Schema::default_value)
    }

    pub fn minimum(&self) -> Option<f64> {
        self.schemas
            .iter()
            .filter_map(Schema::minimum)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| a.max(m))))
    }

    /// Whether the combined lower bound is exclusive.
    pub fn exclusive_minimum(&self) -> bool {
        let Some(bound) = self.minimum() else {
            return false;
        };
        self.schemas
            .iter()
            .any(|s| s.minimum() == Some(bound) && s.exclusive_minimum())
    }

    pub fn maximum(&self) -> Option<f64> {
        self.schemas
            .iter()
            .filter_map(Schema::maximum)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| a.min(m))))
    }

    /// Whether the combined upper bound is exclusive.
    pub fn exclusive_maximum(&self) -> bool {
        let Some(bound) = self.maximum() else {
            return false;
        };
        self.schemas
            .iter()
            .any(|s| s.maximum() == Some(bound) && s.exclusive_maximum())
    }

    /// A common multiple of every declared `multipleOf`.
    pub fn multiple_of(&self) -> Option<f64> {
        self.schemas
            .iter()
            .filter_map(Schema::multiple_of)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| common_multiple(a, m))))
    }

    pub fn min_length(&self) -> usize {
        self.schemas.iter().map(Schema::min_length).max().unwrap_or(0)
    }

    pub fn max_length(&self) -> Option<usize> {
        self.schemas.iter().filter_map(Schema::max_length).min()
    }

    pub fn min_items(&self) -> usize {
        self.schemas.iter().map(Schema::min_items).max().unwrap_or(0)
    }

    pub fn max_items(&self) -> Option<usize> {
        self.schemas.iter().filter_map(Schema::max_items).min()
    }

    pub fn min_properties(&self) -> usize {
        self.schemas.iter().map(Schema::min_properties).max().unwrap_or(0)
    }

    pub fn max_properties(&self) -> Option<usize> {
        self.schemas.iter().filter_map(Schema::max_properties).min()
    }

    /// Union of required properties.
    pub fn required_properties(&self) -> &[String] {
        self.memo
            .required
            .get_or_init(|| union(self.schemas.iter().map(Schema::required_properties)))
    }

    /// Union of the keys under `properties`.
    pub fn defined_properties(&self) -> &[String] {
        self.memo
            .defined
            .get_or_init(|| union(self.schemas.iter().map(Schema::defined_properties)))
    }

    pub fn allowed_additional_properties(&self) -> bool {
        self.schemas.iter().all(Schema::allowed_additional_properties)
    }

    pub fn property_schemas(&self, key: &str) -> SchemaList {
        SchemaList::new(self.schemas.iter().flat_map(|s| s.property_schemas(key)))
    }

    pub fn index_schemas(&self, index: usize) -> SchemaList {
        SchemaList::new(self.schemas.iter().flat_map(|s| s.index_schemas(index)))
    }

    pub fn and_schemas(&self) -> SchemaList {
        SchemaList::new(self.schemas.iter().flat_map(Schema::and_schemas))
    }

    pub fn or_schemas(&self) -> Vec<Vec<Schema>> {
        self.schemas.iter().flat_map(Schema::or_schemas).collect()
    }

    pub fn xor_schemas(&self) -> Vec<Vec<Schema>> {
        self.schemas.iter().flat_map(Schema::xor_schemas).collect()
    }

    pub fn not_schemas(&self) -> SchemaList {
        SchemaList::new(self.schemas.iter().flat_map(Schema::not_schemas))
    }

    /// Link definitions of every schema, in list order.
    pub fn link_definitions(&self) -> Vec<Value> {
        self.schemas.iter().flat_map(Schema::link_definitions).collect()
    }

    /// Synthesize a minimal value satisfying every schema in the list.
    ///
    /// Preference order: a declared `default`, the first allowed `enum`
    /// value, then the first basic type (in [`ALL_TYPES`] order) for which a
    /// value can be built. With `oneOf`/`anyOf` present, each combination of
    /// options is tried in turn and the first success wins.
    pub fn create_value(&self, store: &SchemaStore) -> Synthesis {
        match synthesize(store, self.schemas.iter().cloned(), 0) {
            Ok(Some(value)) => Synthesis::Value(value),
            Ok(None) => Synthesis::Unsatisfiable,
            Err(pending) => Synthesis::Pending(pending.url),
        }
    }

    /// Like [`create_value`](Self::create_value), fetching missing schema
    /// documents through `fetcher` until the result settles.
    pub fn create_value_blocking(&self, engine: &Engine, fetcher: &dyn Fetcher) -> Synthesis {
        let mut fetched = HashSet::new();
        loop {
            let result = self.create_value(&engine.store());
            match result {
                Synthesis::Pending(url) if fetched.insert(url.clone()) => {
                    engine.fetch_schema(&url, fetcher);
                }
                Synthesis::Pending(url) => {
                    log::warn!("schema {} is still unresolved after fetching", url);
                    return Synthesis::Pending(url);
                }
                other => return other,
            }
        }
    }
}

impl From<Schema> for SchemaList {
    fn from(schema: Schema) -> Self {
        SchemaList::new([schema])
    }
}

impl FromIterator<Schema> for SchemaList {
    fn from_iter<I: IntoIterator<Item = Schema>>(iter: I) -> Self {
        SchemaList::new(iter)
    }
}

impl<'a> IntoIterator for &'a SchemaList {
    type Item = &'a Schema;
    type IntoIter = std::slice::Iter<'a, Schema>;

    fn into_iter(self) -> Self::IntoIter {
        self.schemas.iter()
    }
}

impl PartialEq for SchemaList {
    fn eq(&self, other: &Self) -> bool {
        self.schemas == other.schemas
    }
}

fn union(lists: impl Iterator<Item = Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for list in lists {
        for item in list {
            if !out.contains(&item) {
                out.push(item);
            }
        }
    }
    out
}

/// Smallest of `a * k` (k = 1..=1000) that is also a multiple of `b`.
fn common_multiple(a: f64, b: f64) -> f64 {
    (1..=1000)
        .map(|k| a * f64::from(k))
        .find(|m| is_multiple(*m, b))
        .unwrap_or(a * b)
}

pub(crate) fn is_multiple(value: f64, of: f64) -> bool {
    let ratio = value / of;
    (ratio - ratio.round()).abs() < 1e-9
}

/// Resolve `$ref`s and flatten `allOf` into one list.
fn expand(
    store: &SchemaStore,
    schemas: impl IntoIterator<Item = Schema>,
) -> Result<SchemaList, Pending> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<Schema> = schemas.into_iter().collect();
    stack.reverse();
    while let Some(schema) = stack.pop() {
        let full = store.get_full(&schema)?;
        if seen.insert(full.id()) {
            stack.extend(full.and_schemas().into_iter().rev());
            out.push(full);
        }
    }
    Ok(SchemaList::new(out))
}

/// Enumerate every way of picking one option from each undecided
/// `oneOf`/`anyOf` group. Options can bring their own groups, which are
/// expanded recursively.
fn combinations(
    store: &SchemaStore,
    list: SchemaList,
    decided: &HashSet<String>,
    out: &mut Vec<SchemaList>,
) -> Result<(), Pending> {
    let groups: Vec<(String, Vec<Schema>)> = list
        .iter()
        .flat_map(|s| {
            let id = s.id();
            let xor = s
                .xor_schemas()
                .into_iter()
                .enumerate()
                .map(move |(i, g)| (format!("{}|xor{}", id, i), g));
            let id = s.id();
            let or = s
                .or_schemas()
                .into_iter()
                .enumerate()
                .map(move |(i, g)| (format!("{}|or{}", id, i), g));
            xor.chain(or).collect::<Vec<_>>()
        })
        .filter(|(id, _)| !decided.contains(id))
        .collect();

    if groups.is_empty() {
        out.push(list);
        return Ok(());
    }
    if groups.iter().any(|(_, options)| options.is_empty()) {
        return Ok(());
    }

    let mut decided = decided.clone();
    decided.extend(groups.iter().map(|(id, _)| id.clone()));

    let mut choice = vec![0usize; groups.len()];
    loop {
        let chosen = groups
            .iter()
            .zip(&choice)
            .map(|((_, options), &i)| options[i].clone());
        let combination = expand(store, list.iter().cloned().chain(chosen))?;
        combinations(store, combination, &decided, out)?;
        if out.len() >= MAX_COMBINATIONS {
            return Ok(());
        }

        let mut pos = groups.len();
        loop {
            if pos == 0 {
                return Ok(());
            }
            pos -= 1;
            choice[pos] += 1;
            if choice[pos] < groups[pos].1.len() {
                break;
            }
            choice[pos] = 0;
        }
    }
}

fn synthesize(
    store: &SchemaStore,
    schemas: impl IntoIterator<Item = Schema>,
    depth: usize,
) -> Result<Option<Value>, Pending> {
    if depth > MAX_DEPTH {
        return Ok(None);
    }
    let expanded = expand(store, schemas)?;
    let mut candidates = Vec::new();
    combinations(store, expanded, &HashSet::new(), &mut candidates)?;
    for candidate in &candidates {
        if let Some(value) = synthesize_direct(store, candidate, depth)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn synthesize_direct(
    store: &SchemaStore,
    list: &SchemaList,
    depth: usize,
) -> Result<Option<Value>, Pending> {
    if let Some(default) = list.default_value() {
        return Ok(Some(default));
    }
    if let Some(values) = list.enum_values() {
        let declared: Vec<Vec<Value>> = list.iter().filter_map(Schema::enum_values).collect();
        let accepted = values
            .iter()
            .find(|v| declared.iter().all(|d| d.iter().any(|o| json_equal(v, o))));
        return Ok(accepted.or_else(|| values.first()).cloned());
    }
    for basic_type in list.types() {
        let value = match basic_type {
            BasicType::Null => Some(Value::Null),
            BasicType::Boolean => Some(Value::Bool(true)),
            BasicType::Integer => synthesize_number(list, true),
            BasicType::Number => synthesize_number(list, false),
            BasicType::String => synthesize_string(list),
            BasicType::Array => synthesize_array(store, list, depth)?,
            BasicType::Object => synthesize_object(store, list, depth)?,
            BasicType::Undefined => None,
        };
        if value.is_some() {
            return Ok(value);
        }
    }
    Ok(None)
}

fn synthesize_number(list: &SchemaList, integer: bool) -> Option<Value> {
    let unit = match (list.multiple_of(), integer) {
        (Some(m), true) => Some(common_multiple(m, 1.0)),
        (Some(m), false) => Some(m),
        (None, true) => Some(1.0),
        (None, false) => None,
    };
    let step = unit.unwrap_or(1.0);
    let (min, max) = (list.minimum(), list.maximum());
    let (exclusive_min, exclusive_max) = (list.exclusive_minimum(), list.exclusive_maximum());

    let mut value = 0.0_f64;
    if let Some(min) = min.filter(|m| *m >= 0.0) {
        value = min;
        if let Some(u) = unit {
            value = (value / u).ceil() * u;
        }
        if exclusive_min && value <= min {
            value += step;
        }
    } else if let Some(max) = max.filter(|m| *m <= 0.0) {
        value = max;
        if let Some(u) = unit {
            value = (value / u).floor() * u;
        }
        if exclusive_max && value >= max {
            value -= step;
        }
    }

    let within = |v: f64| {
        min.map_or(true, |m| if exclusive_min { v > m } else { v >= m })
            && max.map_or(true, |m| if exclusive_max { v < m } else { v <= m })
    };
    if !within(value) {
        // Narrow non-aligned ranges: try the midpoint
        match (unit, min, max) {
            (None, Some(lo), Some(hi)) if within((lo + hi) / 2.0) => value = (lo + hi) / 2.0,
            _ => return None,
        }
    }

    if integer || value.fract() == 0.0 {
        Some(json!(value as i64))
    } else {
        Some(json!(value))
    }
}

fn synthesize_string(list: &SchemaList) -> Option<Value> {
    let min = list.min_length();
    if list.max_length().map_or(false, |max| max < min) {
        return None;
    }
    Some(Value::String(" ".repeat(min)))
}

fn synthesize_array(
    store: &SchemaStore,
    list: &SchemaList,
    depth: usize,
) -> Result<Option<Value>, Pending> {
    let min = list.min_items();
    if list.max_items().map_or(false, |max| max < min) {
        return Ok(None);
    }
    let mut items = Vec::with_capacity(min);
    for index in 0..min {
        let item_schemas = list.index_schemas(index);
        match synthesize(store, item_schemas.iter().cloned(), depth + 1)? {
            Some(value) => items.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(Value::Array(items)))
}

fn synthesize_object(
    store: &SchemaStore,
    list: &SchemaList,
    depth: usize,
) -> Result<Option<Value>, Pending> {
    let required = list.required_properties();
    if list.max_properties().map_or(false, |max| max < required.len()) {
        return Ok(None);
    }
    let mut object = Map::new();
    for key in required {
        let property_schemas = list.property_schemas(key);
        match synthesize(store, property_schemas.iter().cloned(), depth + 1)? {
            Some(value) => {
                object.insert(key.clone(), value);
            }
            None => return Ok(None),
        }
    }
    Ok(Some(Value::Object(object)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn synth(value: Value) -> Synthesis {
        let mut store = SchemaStore::new();
        let schema = store.add_anonymous(value);
        SchemaList::from(schema).create_value(&store)
    }

    #[test]
    fn exclusive_integer_minimum() {
        assert_eq!(
            synth(json!({"type": "integer", "minimum": 5, "exclusiveMinimum": true})),
            Synthesis::Value(json!(6))
        );
    }

    #[test]
    fn default_then_enum_then_type() {
        assert_eq!(
            synth(json!({"default": "x", "enum": ["y"]})),
            Synthesis::Value(json!("x"))
        );
        assert_eq!(synth(json!({"enum": ["y", "z"]})), Synthesis::Value(json!("y")));
        assert_eq!(synth(json!({})), Synthesis::Value(Value::Null));
        assert_eq!(synth(json!({"type": "boolean"})), Synthesis::Value(json!(true)));
    }

    #[test]
    fn numbers_respect_bounds_and_intervals() {
        assert_eq!(
            synth(json!({"type": "number", "minimum": 2.5, "multipleOf": 2})),
            Synthesis::Value(json!(4))
        );
        assert_eq!(
            synth(json!({"type": "integer", "maximum": -3, "exclusiveMaximum": true})),
            Synthesis::Value(json!(-4))
        );
        assert_eq!(
            synth(json!({"type": "number", "minimum": 0, "exclusiveMinimum": true, "maximum": 0.5})),
            Synthesis::Value(json!(0.25))
        );
        assert_eq!(
            synth(json!({"type": "integer", "minimum": 3, "maximum": 2})),
            Synthesis::Unsatisfiable
        );
    }

    #[test]
    fn strings_arrays_objects() {
        assert_eq!(
            synth(json!({"type": "string", "minLength": 3})),
            Synthesis::Value(json!("   "))
        );
        assert_eq!(
            synth(json!({"type": "array", "minItems": 2, "items": {"type": "integer", "minimum": 1}})),
            Synthesis::Value(json!([1, 1]))
        );
        assert_eq!(
            synth(json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string"},
                    "age": {"type": "integer"},
                    "tags": {"type": "array", "required": true}
                }
            })),
            Synthesis::Value(json!({"name": "", "tags": []}))
        );
    }

    #[test]
    fn one_of_picks_first_satisfiable_option() {
        assert_eq!(
            synth(json!({
                "type": "string",
                "oneOf": [{"type": "integer"}, {"minLength": 2}]
            })),
            Synthesis::Value(json!("  "))
        );
        assert_eq!(
            synth(json!({"oneOf": [{"type": "integer"}, {"type": "string"}], "type": "boolean"})),
            Synthesis::Unsatisfiable
        );
    }

    #[test]
    fn all_of_intersects() {
        assert_eq!(
            synth(json!({"allOf": [{"type": ["string", "integer"]}, {"type": "integer", "minimum": 10}]})),
            Synthesis::Value(json!(10))
        );
    }

    #[test]
    fn pending_reference() {
        let mut store = SchemaStore::new();
        let schema = store.add_anonymous(json!({"$ref": "http://example.com/a.json"}));
        let list = SchemaList::from(schema);
        assert_eq!(
            list.create_value(&store),
            Synthesis::Pending("http://example.com/a.json".into())
        );
        store.add_document("http://example.com/a.json", json!({"type": "string"}));
        assert_eq!(list.create_value(&store), Synthesis::Value(json!("")));
    }

    #[test]
    fn recursive_required_terminates() {
        assert_eq!(
            synth(json!({
                "type": "object",
                "required": ["next"],
                "properties": {"next": {"$ref": "#"}}
            })),
            Synthesis::Unsatisfiable
        );
    }

    #[test]
    fn combined_accessors() {
        let mut store = SchemaStore::new();
        let a = store.add_anonymous(json!({"minimum": 1, "maximum": 10, "exclusiveMaximum": true, "enum": [1, 2, 3]}));
        let b = store.add_anonymous(json!({"minimum": 2, "exclusiveMinimum": true, "maximum": 20, "enum": [2.0, 3, 4]}));
        let list = SchemaList::new([a.clone(), b, a]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.minimum(), Some(2.0));
        assert!(list.exclusive_minimum());
        assert_eq!(list.maximum(), Some(10.0));
        assert!(list.exclusive_maximum());
        assert_eq!(
            list.enum_values(),
            Some(&[json!(1), json!(2), json!(3), json!(4)][..])
        );
    }

    #[test]
    fn enum_values_are_a_union() {
        let mut store = SchemaStore::new();
        let a = store.add_anonymous(json!({"enum": ["x", "y"]}));
        let b = store.add_anonymous(json!({"enum": ["y", "z"]}));
        let open = store.add_anonymous(json!({"type": "string"}));
        let list = SchemaList::new([open.clone(), a, b]);
        assert_eq!(
            list.enum_values(),
            Some(&[json!("x"), json!("y"), json!("z")][..])
        );
        assert_eq!(SchemaList::new([open]).enum_values(), None);

        // Synthesis prefers a member every enum accepts
        assert_eq!(list.create_value(&store), Synthesis::Value(json!("y")));
    }
}

//! Read-only view of one schema inside a loaded schema document.
//!
//! Accessors accept both draft-03 and draft-04 vocabularies (`extends`,
//! `disallow`, `divisibleBy`, per-property `required: true`), and a bare
//! string is read as the shorthand `{"type": <string>}`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use regex::Regex;
use serde_json::{Map, Value};

use crate::pointer;
use crate::types::{BasicType, ALL_TYPES};
use crate::uri;

static NULL: Value = Value::Null;

/// A loaded schema document.
#[derive(Debug)]
pub(crate) struct SchemaDocument {
    /// Identity of the document (its URL, or a synthetic name).
    pub(crate) id: String,
    /// Base URL used to resolve references made from inside the document.
    pub(crate) url: String,
    pub(crate) value: Value,
    regexes: RefCell<HashMap<String, Option<Regex>>>,
}

impl SchemaDocument {
    pub(crate) fn new(id: impl Into<String>, url: impl Into<String>, value: Value) -> Rc<Self> {
        Rc::new(Self {
            id: id.into(),
            url: url.into(),
            value,
            regexes: RefCell::new(HashMap::new()),
        })
    }
}

/// A dependency declared under `dependencies`.
#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    /// Co-presence: every listed property must also be present.
    Properties(Vec<String>),
    /// The whole instance must satisfy this schema.
    Schema(Schema),
}

/// A schema: a location inside a [`SchemaDocument`].
#[derive(Clone)]
pub struct Schema {
    document: Rc<SchemaDocument>,
    pointer: String,
    base_url: String,
}

impl Schema {
    pub(crate) fn root(document: Rc<SchemaDocument>) -> Self {
        let base_url = match document.value.get("id").and_then(Value::as_str) {
            Some(id) => uri::resolve(&document.url, id).unwrap_or_else(|_| document.url.clone()),
            None => document.url.clone(),
        };
        Self {
            document,
            pointer: String::new(),
            base_url,
        }
    }

    /// The schema at `pointer` inside the same document, if present.
    pub(crate) fn at_pointer(&self, pointer_path: &str) -> Option<Schema> {
        let mut current = Schema::root(Rc::clone(&self.document));
        for component in pointer::split_pointer(pointer_path) {
            current = current.child(&[component.as_str()])?;
        }
        Some(current)
    }

    /// Descend through `components`. `None` if the location does not exist.
    fn child(&self, components: &[&str]) -> Option<Schema> {
        let mut pointer_path = self.pointer.clone();
        for component in components {
            pointer_path = pointer::child_pointer(&pointer_path, component);
        }
        let value = self.document.value.pointer(&pointer_path)?;
        let base_url = match value.get("id").and_then(Value::as_str) {
            Some(id) => uri::resolve(&self.base_url, id).unwrap_or_else(|_| self.base_url.clone()),
            None => self.base_url.clone(),
        };
        Some(Schema {
            document: Rc::clone(&self.document),
            pointer: pointer_path,
            base_url,
        })
    }

    /// Stable identity: document identity plus pointer.
    pub fn id(&self) -> String {
        format!("{}#{}", self.document.id, self.pointer)
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// URL of the containing document.
    pub fn document_url(&self) -> &str {
        &self.document.url
    }

    /// Base URL for references made from this schema.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The raw schema JSON.
    pub fn value(&self) -> &Value {
        self.document.value.pointer(&self.pointer).unwrap_or(&NULL)
    }

    fn object(&self) -> Option<&Map<String, Value>> {
        self.value().as_object()
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.object().and_then(|o| o.get(key))
    }

    /// Absolute target of `$ref`, if this schema is a reference.
    pub fn reference(&self) -> Option<String> {
        let target = self.get("$ref")?.as_str()?;
        Some(uri::resolve(&self.base_url, target).unwrap_or_else(|_| target.to_string()))
    }

    pub fn is_reference(&self) -> bool {
        self.reference().is_some()
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.get("description").and_then(Value::as_str)
    }

    pub fn format(&self) -> Option<&str> {
        self.get("format").and_then(Value::as_str)
    }

    /// Declared basic types, normalized. `integer` is always implied by `number`.
    pub fn types(&self) -> Vec<BasicType> {
        let declared = match self.value() {
            Value::String(s) => Some(Value::String(s.clone())),
            _ => self.get("type").cloned(),
        };
        let names: Vec<String> = match declared {
            None => return ALL_TYPES.to_vec(),
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(entries)) => {
                // Embedded schemas turn the array into a oneOf; see xor_schemas
                if entries.iter().any(|e| !e.is_string()) {
                    return ALL_TYPES.to_vec();
                }
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            }
            Some(_) => return ALL_TYPES.to_vec(),
        };
        if names.iter().any(|n| n == "any" || n == "all") {
            return ALL_TYPES.to_vec();
        }
        let mut types: Vec<BasicType> = names.iter().filter_map(|n| BasicType::parse(n)).collect();
        if types.contains(&BasicType::Number) && !types.contains(&BasicType::Integer) {
            types.push(BasicType::Integer);
        }
        ALL_TYPES
            .iter()
            .copied()
            .filter(|t| types.contains(t))
            .collect()
    }

    pub fn enum_values(&self) -> Option<Vec<Value>> {
        self.get("enum").and_then(Value::as_array).cloned()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.get("default").cloned()
    }

    pub fn minimum(&self) -> Option<f64> {
        let inclusive = self.get("minimum").and_then(Value::as_f64);
        match self.get("exclusiveMinimum").and_then(Value::as_f64) {
            Some(exclusive) => Some(inclusive.map_or(exclusive, |m| m.max(exclusive))),
            None => inclusive,
        }
    }

    pub fn exclusive_minimum(&self) -> bool {
        match self.get("exclusiveMinimum") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => {
                let bound = n.as_f64();
                let inclusive = self.get("minimum").and_then(Value::as_f64);
                match (bound, inclusive) {
                    (Some(b), Some(m)) => b >= m,
                    (Some(_), None) => true,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    pub fn maximum(&self) -> Option<f64> {
        let inclusive = self.get("maximum").and_then(Value::as_f64);
        match self.get("exclusiveMaximum").and_then(Value::as_f64) {
            Some(exclusive) => Some(inclusive.map_or(exclusive, |m| m.min(exclusive))),
            None => inclusive,
        }
    }

    pub fn exclusive_maximum(&self) -> bool {
        match self.get("exclusiveMaximum") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => {
                let bound = n.as_f64();
                let inclusive = self.get("maximum").and_then(Value::as_f64);
                match (bound, inclusive) {
                    (Some(b), Some(m)) => b <= m,
                    (Some(_), None) => true,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// `multipleOf`, or draft-03 `divisibleBy`.
    pub fn multiple_of(&self) -> Option<f64> {
        self.get("multipleOf")
            .or_else(|| self.get("divisibleBy"))
            .and_then(Value::as_f64)
            .filter(|m| *m > 0.0)
    }

    pub fn min_length(&self) -> usize {
        self.usize_field("minLength").unwrap_or(0)
    }

    pub fn max_length(&self) -> Option<usize> {
        self.usize_field("maxLength")
    }

    pub fn pattern(&self) -> Option<&str> {
        self.get("pattern").and_then(Value::as_str)
    }

    pub fn min_items(&self) -> usize {
        self.usize_field("minItems").unwrap_or(0)
    }

    pub fn max_items(&self) -> Option<usize> {
        self.usize_field("maxItems")
    }

    pub fn unique_items(&self) -> bool {
        self.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn min_properties(&self) -> usize {
        self.usize_field("minProperties").unwrap_or(0)
    }

    pub fn max_properties(&self) -> Option<usize> {
        self.usize_field("maxProperties")
    }

    fn usize_field(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(Value::as_u64).map(|n| n as usize)
    }

    /// Union of the `required` array and legacy `required: true` property flags.
    pub fn required_properties(&self) -> Vec<String> {
        let mut required: Vec<String> = self
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        if let Some(props) = self.get("properties").and_then(Value::as_object) {
            for (key, prop) in props {
                if prop.get("required") == Some(&Value::Bool(true)) && !required.contains(key) {
                    required.push(key.clone());
                }
            }
        }
        required
    }

    /// Keys listed under `properties`.
    pub fn defined_properties(&self) -> Vec<String> {
        self.get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// False only if `additionalProperties` is `false`.
    pub fn allowed_additional_properties(&self) -> bool {
        self.get("additionalProperties") != Some(&Value::Bool(false))
    }

    /// True if `key` is covered by `properties` or `patternProperties`.
    pub fn is_defined_property(&self, key: &str) -> bool {
        self.get("properties")
            .and_then(Value::as_object)
            .map_or(false, |props| props.contains_key(key))
            || !self.pattern_property_schemas(key).is_empty()
    }

    fn pattern_property_schemas(&self, key: &str) -> Vec<Schema> {
        let Some(patterns) = self.get("patternProperties").and_then(Value::as_object) else {
            return Vec::new();
        };
        patterns
            .keys()
            .filter(|pattern| self.regex(pattern).map_or(false, |re| re.is_match(key)))
            .filter_map(|pattern| self.child(&["patternProperties", pattern]))
            .collect()
    }

    /// Schemas constraining the value of property `key`.
    pub fn property_schemas(&self, key: &str) -> Vec<Schema> {
        let mut schemas = Vec::new();
        if let Some(schema) = self
            .get("properties")
            .and_then(Value::as_object)
            .filter(|props| props.contains_key(key))
            .and_then(|_| self.child(&["properties", key]))
        {
            schemas.push(schema);
        }
        schemas.extend(self.pattern_property_schemas(key));
        if schemas.is_empty() {
            if let Some(Value::Object(_)) = self.get("additionalProperties") {
                schemas.extend(self.child(&["additionalProperties"]));
            }
        }
        schemas
    }

    /// True if `items` is an array (per-index schemas).
    pub fn tuple_typing(&self) -> bool {
        matches!(self.get("items"), Some(Value::Array(_)))
    }

    /// Number of tuple entries, if `items` is an array.
    pub fn tuple_length(&self) -> Option<usize> {
        self.get("items").and_then(Value::as_array).map(Vec::len)
    }

    /// False only if tuple typing is used and `additionalItems` is `false`.
    pub fn allowed_additional_items(&self) -> bool {
        !(self.tuple_typing() && self.get("additionalItems") == Some(&Value::Bool(false)))
    }

    /// Schemas constraining array item `index`.
    pub fn index_schemas(&self, index: usize) -> Vec<Schema> {
        match self.get("items") {
            Some(Value::Object(_)) => self.child(&["items"]).into_iter().collect(),
            Some(Value::Array(items)) if index < items.len() => self
                .child(&["items", &index.to_string()])
                .into_iter()
                .collect(),
            Some(Value::Array(_)) => match self.get("additionalItems") {
                Some(Value::Object(_)) => self.child(&["additionalItems"]).into_iter().collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// `allOf` entries plus draft-03 `extends`.
    pub fn and_schemas(&self) -> Vec<Schema> {
        let mut schemas = self.array_children("allOf");
        match self.get("extends") {
            Some(Value::Object(_)) => schemas.extend(self.child(&["extends"])),
            Some(Value::Array(_)) => schemas.extend(self.array_children("extends")),
            _ => {}
        }
        schemas
    }

    /// `anyOf` groups.
    pub fn or_schemas(&self) -> Vec<Vec<Schema>> {
        let options = self.array_children("anyOf");
        if options.is_empty() {
            Vec::new()
        } else {
            vec![options]
        }
    }

    /// `oneOf` groups, plus `type` arrays that embed schemas.
    pub fn xor_schemas(&self) -> Vec<Vec<Schema>> {
        let mut groups = Vec::new();
        let one_of = self.array_children("oneOf");
        if !one_of.is_empty() {
            groups.push(one_of);
        }
        if let Some(Value::Array(entries)) = self.get("type") {
            if entries.iter().any(|e| !e.is_string()) {
                groups.push(self.array_children("type"));
            }
        }
        groups
    }

    /// `not`, plus draft-03 `disallow`.
    pub fn not_schemas(&self) -> Vec<Schema> {
        let mut schemas = Vec::new();
        if let Some(Value::Object(_)) = self.get("not") {
            schemas.extend(self.child(&["not"]));
        }
        match self.get("disallow") {
            Some(Value::String(_)) => schemas.extend(self.child(&["disallow"])),
            Some(Value::Array(_)) => schemas.extend(self.array_children("disallow")),
            _ => {}
        }
        schemas
    }

    pub fn dependencies(&self) -> Vec<(String, Dependency)> {
        let Some(deps) = self.get("dependencies").and_then(Value::as_object) else {
            return Vec::new();
        };
        deps.iter()
            .filter_map(|(key, dep)| {
                let dependency = match dep {
                    Value::String(s) => Dependency::Properties(vec![s.clone()]),
                    Value::Array(arr) => Dependency::Properties(
                        arr.iter().filter_map(Value::as_str).map(String::from).collect(),
                    ),
                    Value::Object(_) => Dependency::Schema(self.child(&["dependencies", key])?),
                    _ => return None,
                };
                Some((key.clone(), dependency))
            })
            .collect()
    }

    /// Raw link definitions from the `links` array.
    pub fn link_definitions(&self) -> Vec<Value> {
        self.get("links")
            .and_then(Value::as_array)
            .map(|links| links.iter().filter(|l| l.is_object()).cloned().collect())
            .unwrap_or_default()
    }

    /// Compile (and cache per document) a regular expression from this schema.
    pub(crate) fn regex(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.document.regexes.borrow_mut();
        cache
            .entry(pattern.to_string())
            .or_insert_with(|| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    log::warn!("ignoring invalid pattern {:?} in {}: {}", pattern, self.id(), err);
                    None
                }
            })
            .clone()
    }

    fn array_children(&self, key: &str) -> Vec<Schema> {
        let len = self.get(key).and_then(Value::as_array).map_or(0, Vec::len);
        (0..len)
            .filter_map(|i| self.child(&[key, &i.to_string()]))
            .collect()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.document.id == other.document.id && self.pointer == other.pointer
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.document.id.hash(state);
        self.pointer.hash(state);
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> Schema {
        Schema::root(SchemaDocument::new("test", "http://example.com/s.json", value))
    }

    #[test]
    fn types_normalization() {
        assert_eq!(schema(json!({})).types(), ALL_TYPES.to_vec());
        assert_eq!(schema(json!({"type": "any"})).types(), ALL_TYPES.to_vec());
        assert_eq!(
            schema(json!({"type": "number"})).types(),
            vec![BasicType::Integer, BasicType::Number]
        );
        assert_eq!(
            schema(json!({"type": ["string", "null"]})).types(),
            vec![BasicType::Null, BasicType::String]
        );
        assert_eq!(
            schema(json!({"type": ["string", {"type": "object"}]})).types(),
            ALL_TYPES.to_vec()
        );
        assert_eq!(schema(json!("boolean")).types(), vec![BasicType::Boolean]);
    }

    #[test]
    fn required_union_of_array_and_flags() {
        let s = schema(json!({
            "required": ["a"],
            "properties": {
                "a": {},
                "b": {"required": true},
                "c": {"required": false}
            }
        }));
        assert_eq!(s.required_properties(), vec!["a", "b"]);
    }

    #[test]
    fn numeric_bounds_are_independent() {
        let s = schema(json!({
            "minimum": 1, "exclusiveMinimum": true,
            "maximum": 9
        }));
        assert_eq!(s.minimum(), Some(1.0));
        assert!(s.exclusive_minimum());
        assert_eq!(s.maximum(), Some(9.0));
        assert!(!s.exclusive_maximum());

        let draft6 = schema(json!({"exclusiveMaximum": 4}));
        assert_eq!(draft6.maximum(), Some(4.0));
        assert!(draft6.exclusive_maximum());
    }

    #[test]
    fn property_schema_lookup() {
        let s = schema(json!({
            "properties": {"a": {"type": "string"}},
            "patternProperties": {"^x-": {"type": "integer"}},
            "additionalProperties": {"type": "boolean"}
        }));
        assert_eq!(s.property_schemas("a")[0].pointer(), "/properties/a");
        assert_eq!(
            s.property_schemas("x-id")[0].pointer(),
            "/patternProperties/^x-"
        );
        assert_eq!(s.property_schemas("other")[0].pointer(), "/additionalProperties");
        assert!(s.is_defined_property("x-y"));
        assert!(!s.is_defined_property("other"));
    }

    #[test]
    fn index_schema_lookup() {
        let tuple = schema(json!({
            "items": [{"type": "string"}, {"type": "integer"}],
            "additionalItems": false
        }));
        assert_eq!(tuple.index_schemas(1)[0].pointer(), "/items/1");
        assert!(tuple.index_schemas(2).is_empty());
        assert!(!tuple.allowed_additional_items());

        let list = schema(json!({"items": {"type": "string"}}));
        assert_eq!(list.index_schemas(7)[0].pointer(), "/items");
    }

    #[test]
    fn composition_accessors() {
        let s = schema(json!({
            "allOf": [{"type": "object"}],
            "extends": {"title": "base"},
            "anyOf": [{}, {}],
            "oneOf": [{}, {}, {}],
            "not": {"type": "null"},
            "disallow": ["string"]
        }));
        assert_eq!(s.and_schemas().len(), 2);
        assert_eq!(s.or_schemas()[0].len(), 2);
        assert_eq!(s.xor_schemas()[0].len(), 3);
        let nots = s.not_schemas();
        assert_eq!(nots.len(), 2);
        assert_eq!(nots[1].types(), vec![BasicType::String]);
    }

    #[test]
    fn references_resolve_against_id() {
        let s = schema(json!({
            "id": "http://other.example/base/",
            "properties": {"a": {"$ref": "a.json#/x"}}
        }));
        let a = &s.property_schemas("a")[0];
        assert_eq!(
            a.reference().as_deref(),
            Some("http://other.example/base/a.json#/x")
        );
    }

    #[test]
    fn dependencies_forms() {
        let s = schema(json!({
            "dependencies": {
                "a": "b",
                "c": ["d", "e"],
                "f": {"required": ["g"]}
            }
        }));
        let deps = s.dependencies();
        assert_eq!(deps[0], ("a".to_string(), Dependency::Properties(vec!["b".into()])));
        assert_eq!(
            deps[1],
            ("c".to_string(), Dependency::Properties(vec!["d".into(), "e".into()]))
        );
        assert!(matches!(deps[2].1, Dependency::Schema(_)));
    }
}

//! Integration tests for schemas, matching, value synthesis and URI
//! handling.

use hyperschema::{
    evaluate, resolve, Engine, OrSelector, SchemaList, Synthesis, UriTemplate, XorSelector,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn matches(engine: &Engine, schema: Value, value: Value) -> bool {
    let schema = engine.create_schema(schema);
    evaluate(&engine.store(), Some(&value), &schema)
        .unwrap()
        .matched
}

mod synthesis {
    use super::*;
    use pretty_assertions::assert_eq;

    fn create(engine: &Engine, schema: Value) -> Synthesis {
        let schema = engine.create_schema(schema);
        SchemaList::from(schema).create_value(&engine.store())
    }

    #[test]
    fn exclusive_minimum_integer() {
        let engine = Engine::new();
        let value = create(
            &engine,
            json!({"type": "integer", "minimum": 5, "exclusiveMinimum": true}),
        );
        assert_eq!(value, Synthesis::Value(json!(6)));
    }

    #[test]
    fn default_wins() {
        let engine = Engine::new();
        let value = create(&engine, json!({"type": "string", "default": "hello"}));
        assert_eq!(value, Synthesis::Value(json!("hello")));
    }

    #[test]
    fn required_properties_are_filled() {
        let engine = Engine::new();
        let value = create(
            &engine,
            json!({
                "type": "object",
                "required": ["name"],
                "properties": {"name": {"type": "string", "enum": ["a", "b"]}}
            }),
        );
        assert_eq!(value, Synthesis::Value(json!({"name": "a"})));
    }

    #[test]
    fn contradictions_are_unsatisfiable() {
        let engine = Engine::new();
        let value = create(
            &engine,
            json!({"allOf": [{"type": "string"}, {"type": "integer"}]}),
        );
        assert_eq!(value, Synthesis::Unsatisfiable);
    }

    #[test]
    fn unloaded_reference_is_pending() {
        let engine = Engine::new();
        let value = create(&engine, json!({"$ref": "http://example.com/s.json"}));
        assert_eq!(value, Synthesis::Pending("http://example.com/s.json".into()));
    }
}

mod matching {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numeric_bounds() {
        let engine = Engine::new();
        let schema = json!({"minimum": 5, "exclusiveMinimum": true});
        assert!(!matches(&engine, schema.clone(), json!(5)));
        assert!(matches(&engine, schema, json!(5.5)));
    }

    #[test]
    fn integer_type_accepts_whole_floats() {
        let engine = Engine::new();
        assert!(matches(&engine, json!({"type": "integer"}), json!(3.0)));
        assert!(!matches(&engine, json!({"type": "integer"}), json!(3.5)));
    }

    #[test]
    fn failures_name_a_reason() {
        let engine = Engine::new();
        let schema = engine.create_schema(json!({
            "properties": {"tags": {"items": {"type": "string"}}}
        }));
        let outcome = evaluate(&engine.store(), Some(&json!({"tags": ["a", 1]})), &schema).unwrap();
        assert!(!outcome.matched);
        assert!(!outcome.fail_reason.unwrap().message().is_empty());
    }

    #[test]
    fn references_across_documents() {
        let engine = Engine::new();
        engine.add_schema_document(
            "http://example.com/defs.json",
            json!({"definitions": {"id": {"type": "integer", "minimum": 1}}}),
        );
        let schema = json!({"properties": {"id": {"$ref": "http://example.com/defs.json#/definitions/id"}}});
        assert!(matches(&engine, schema.clone(), json!({"id": 4})));
        assert!(!matches(&engine, schema, json!({"id": 0})));
    }

    #[test]
    fn xor_selector_picks_the_single_match() {
        let engine = Engine::new();
        let options = vec![
            engine.create_schema(json!({"type": "string"})),
            engine.create_schema(json!({"type": "number"})),
        ];
        let mut selector = XorSelector::new(options);
        let changed = selector.update(&engine.store(), Some(&json!(2))).unwrap();
        assert!(changed);
        assert_eq!(selector.selected_index(), Some(1));

        let changed = selector.update(&engine.store(), Some(&json!(true))).unwrap();
        assert!(changed);
        assert_eq!(selector.selected_index(), None);
        assert!(selector.fail_reason().is_some());
    }

    #[test]
    fn or_selector_keeps_every_match() {
        let engine = Engine::new();
        let options = vec![
            engine.create_schema(json!({"title": "small", "maximum": 10})),
            engine.create_schema(json!({"title": "even", "multipleOf": 2})),
            engine.create_schema(json!({"title": "big", "minimum": 100})),
        ];
        let mut selector = OrSelector::new(options);
        selector.update(&engine.store(), Some(&json!(4))).unwrap();
        let titles: Vec<&str> = selector
            .selected_options()
            .into_iter()
            .filter_map(|s| s.title())
            .collect();
        assert_eq!(titles, vec!["small", "even"]);
    }
}

mod uris {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_expansion() {
        let template = UriTemplate::parse("/widgets{?id}").unwrap();
        let filled = template.fill(|name| (name == "id").then(|| json!("7")));
        assert_eq!(filled, "/widgets?id=7");
    }

    #[test]
    fn undefined_variables_vanish() {
        let template = UriTemplate::parse("/search{?q,page}").unwrap();
        let filled = template.fill(|name| (name == "page").then(|| json!(2)));
        assert_eq!(filled, "/search?page=2");
    }

    #[test]
    fn relative_resolution() {
        assert_eq!(
            resolve("http://example.com/a/b/c", "../d?x=1").unwrap(),
            "http://example.com/a/d?x=1"
        );
        assert_eq!(
            resolve("http://example.com/a/b", "#/frag").unwrap(),
            "http://example.com/a/b#/frag"
        );
    }
}

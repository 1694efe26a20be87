//! CLI integration tests for the hyperschema binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("hyperschema"))
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

mod patch_command {
    use super::*;

    #[test]
    fn applies_operations_in_order() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"items": ["x", "y", "z"]}"#);
        let patch = write_temp_file(
            &dir,
            "patch.json",
            r#"[
                {"remove": "/items/1"},
                {"add": "/count", "value": 2}
            ]"#,
        );

        cmd()
            .args(["patch", doc.to_str().unwrap(), patch.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"items":["x","z"],"count":2}"#));
    }

    #[test]
    fn writes_inverse_patch() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{}"#);
        let patch = write_temp_file(
            &dir,
            "patch.json",
            r#"[{"add": "/a", "value": 1}, {"add": "/b", "value": 2}]"#,
        );
        let inverse = dir.path().join("inverse.json");
        let output = dir.path().join("out.json");

        cmd()
            .args([
                "patch",
                doc.to_str().unwrap(),
                patch.to_str().unwrap(),
                "--inverse",
                inverse.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success();

        let undo = fs::read_to_string(&inverse).unwrap();
        assert_eq!(undo, r#"[{"remove":"/b"},{"remove":"/a"}]"#);

        // Applying the inverse to the output restores the original
        cmd()
            .args(["patch", output.to_str().unwrap(), inverse.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("{}"));
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{}"#);
        let patch = write_temp_file(&dir, "patch.json", r#"[{"add": "/a", "value": 1}]"#);

        cmd()
            .args([
                "patch",
                doc.to_str().unwrap(),
                patch.to_str().unwrap(),
                "--pretty",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"a\": 1"));
    }

    #[test]
    fn contract_violation_fails() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"a": 1}"#);
        let patch = write_temp_file(&dir, "patch.json", r#"[{"add": "/a", "value": 2}]"#);

        cmd()
            .args(["patch", doc.to_str().unwrap(), patch.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("already present"));
    }

    #[test]
    fn malformed_patch_fails() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{}"#);
        let patch = write_temp_file(&dir, "patch.json", r#"[{"frobnicate": "/a"}]"#);

        cmd()
            .args(["patch", doc.to_str().unwrap(), patch.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid patch"));
    }
}

mod match_command {
    use super::*;

    #[test]
    fn matching_document() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type": "object", "properties": {"n": {"type": "integer"}}}"#,
        );
        let doc = write_temp_file(&dir, "doc.json", r#"{"n": 3}"#);

        cmd()
            .args([
                "match",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Matched"));
    }

    #[test]
    fn mismatch_exits_one() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"properties": {"n": {"type": "integer"}}}"#,
        );
        let doc = write_temp_file(&dir, "doc.json", r#"{"n": "three"}"#);

        cmd()
            .args([
                "match",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Match failed"));
    }

    #[test]
    fn json_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{"required": ["id"]}"#);
        let doc = write_temp_file(&dir, "doc.json", r#"{}"#);

        cmd()
            .args([
                "match",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""matched":false"#));
    }

    #[test]
    fn relative_refs_load_sibling_files() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "defs.json", r#"{"definitions": {"n": {"minimum": 10}}}"#);
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"properties": {"n": {"$ref": "defs.json#/definitions/n"}}}"#,
        );
        let doc = write_temp_file(&dir, "doc.json", r#"{"n": 3}"#);

        cmd()
            .args([
                "match",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
            ])
            .assert()
            .code(1);
    }
}

mod create_command {
    use super::*;

    #[test]
    fn generates_a_value() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"type": "integer", "minimum": 5, "exclusiveMinimum": true}"#,
        );

        cmd()
            .args(["create", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout("6\n");
    }

    #[test]
    fn unsatisfiable_schema() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"allOf": [{"type": "string"}, {"type": "boolean"}]}"#,
        );

        cmd()
            .args(["create", schema.to_str().unwrap()])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no value satisfies"));
    }
}

mod links_command {
    use super::*;

    #[test]
    fn lists_resolved_links() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{
                "links": [
                    {"rel": "self", "href": "{id}"},
                    {"rel": "edit", "href": "{id}", "method": "PUT"}
                ]
            }"#,
        );
        let doc = write_temp_file(&dir, "doc.json", r#"{"id": 7}"#);

        cmd()
            .args([
                "links",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--url",
                "http://example.com/items/",
                "--rel",
                "edit",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#""href":"http://example.com/items/7""#,
            ))
            .stdout(predicate::str::contains(r#""method":"PUT""#))
            .stdout(predicate::str::contains(r#""rel":"self""#).not());
    }

    #[test]
    fn links_of_a_nested_node() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{
                "items": {"links": [{"rel": "item", "href": "/things/{name}"}]}
            }"#,
        );
        let doc = write_temp_file(&dir, "doc.json", r#"[{"name": "a"}, {"name": "b"}]"#);

        cmd()
            .args([
                "links",
                doc.to_str().unwrap(),
                "--schema",
                schema.to_str().unwrap(),
                "--url",
                "http://example.com/",
                "--path",
                "/1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://example.com/things/b"));
    }
}

mod expand_command {
    use super::*;

    #[test]
    fn query_template() {
        cmd()
            .args(["expand", "/widgets{?id}", "--data", r#"{"id": "7"}"#])
            .assert()
            .success()
            .stdout("/widgets?id=7\n");
    }

    #[test]
    fn invalid_template() {
        cmd()
            .args(["expand", "/widgets{?id"])
            .assert()
            .code(2);
    }
}

mod lint_command {
    use super::*;

    #[test]
    fn clean_directory() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "ok.json",
            r#"{"type": "object", "links": [{"rel": "self", "href": "{id}"}]}"#,
        );

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("all passed"));
    }

    #[test]
    fn broken_reference() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "bad.json", r#"{"$ref": "missing.json"}"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--format", "json"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("E002"));
    }

    #[test]
    fn strict_fails_on_warnings() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "warn.json", r#"{"links": [{"href": "/a"}]}"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success();

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--strict"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("W001"));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn file_not_found() {
        cmd()
            .args(["create", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(
                predicate::str::contains("not found").or(predicate::str::contains("No such file")),
            );
    }

    #[test]
    fn invalid_json_document() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{ not valid json"#);
        let patch = write_temp_file(&dir, "patch.json", r#"[]"#);

        cmd()
            .args(["patch", doc.to_str().unwrap(), patch.to_str().unwrap()])
            .assert()
            .code(2);
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("patch"))
            .stdout(predicate::str::contains("links"));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("hyperschema"));
    }

    #[test]
    fn missing_subcommand_args() {
        cmd().args(["match", "doc.json"]).assert().failure();
    }
}

mod remote {
    use super::*;

    #[test]
    fn schema_from_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/schema.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type": "object", "required": ["id"]}"#)
            .create();
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "doc.json", r#"{"id": 1}"#);

        cmd()
            .args([
                "match",
                doc.to_str().unwrap(),
                "--schema",
                &format!("{}/schema.json", server.url()),
            ])
            .assert()
            .success();
        mock.assert();
    }

    #[test]
    fn schema_url_404() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing.json").with_status(404).create();

        cmd()
            .args(["create", &format!("{}/missing.json", server.url())])
            .assert()
            .code(3);
    }
}

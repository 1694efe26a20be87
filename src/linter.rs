//! Schema linting - static analysis of hyper-schema files.
//!
//! Validates schema files for:
//! - JSON syntax errors
//! - Broken $ref references (file not found, fragment not found)
//! - Link definitions with bad href templates or no relation
//! - Unknown type names

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::loader::load_json;
use crate::pointer::child_pointer;
use crate::types::BasicType;
use crate::uri::split_fragment;
use crate::uri_template::UriTemplate;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON path to the issue (e.g., "/links/0/href")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, warnings are treated as errors.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let results: Vec<FileResult> = files.iter().map(|file| lint_file(file, path)).collect();

    let count = |severity: Severity| -> usize {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single schema file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let relative = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();
    let mut checker = Checker {
        file,
        dir: file.parent().unwrap_or(Path::new(".")),
        diagnostics: Vec::new(),
    };

    let schema = match load_json(file) {
        Ok(s) => s,
        Err(e) => {
            checker.report(Severity::Error, "E001", "", format!("syntax error: {}", e));
            return FileResult {
                file: relative,
                status: FileStatus::Error,
                diagnostics: checker.diagnostics,
            };
        }
    };

    checker.walk(&schema, "", &schema);
    let diagnostics = checker.diagnostics;

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: relative,
        status,
        diagnostics,
    }
}

struct Checker<'a> {
    file: &'a Path,
    dir: &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn report(&mut self, severity: Severity, code: &str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            file: self.file.to_path_buf(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            message,
        });
    }

    fn walk(&mut self, value: &Value, path: &str, root: &Value) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    self.check_ref(reference, &child_pointer(path, "$ref"), root);
                }
                if let Some(Value::Array(links)) = map.get("links") {
                    self.check_links(links, &child_pointer(path, "links"));
                }
                if let Some(declared) = map.get("type") {
                    self.check_type(declared, &child_pointer(path, "type"));
                }
                for (key, child) in map {
                    self.walk(child, &child_pointer(path, key), root);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &child_pointer(path, &i.to_string()), root);
                }
            }
            _ => {}
        }
    }

    fn check_ref(&mut self, reference: &str, path: &str, root: &Value) {
        // Remote schemas can't be checked locally - skip silently
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return;
        }

        let (location, fragment) = split_fragment(reference);
        if location.is_empty() {
            if let Some(fragment) = fragment {
                if !fragment_resolves(root, fragment) {
                    self.report(
                        Severity::Error,
                        "E003",
                        path,
                        format!("fragment not found: #{}", fragment),
                    );
                }
            }
            return;
        }

        let target = self.dir.join(location);
        if !target.exists() {
            self.report(
                Severity::Error,
                "E002",
                path,
                format!("file not found: {}", location),
            );
            return;
        }

        if let Some(fragment) = fragment {
            // An unloadable target already shows up when that file is linted
            if let Ok(document) = load_json(&target) {
                if !fragment_resolves(&document, fragment) {
                    self.report(
                        Severity::Error,
                        "E003",
                        path,
                        format!("fragment not found in {}: #{}", location, fragment),
                    );
                }
            }
        }
    }

    fn check_links(&mut self, links: &[Value], path: &str) {
        for (i, link) in links.iter().enumerate() {
            let link_path = child_pointer(path, &i.to_string());
            match link.get("href") {
                Some(Value::String(href)) => {
                    if let Err(e) = UriTemplate::parse(href) {
                        self.report(
                            Severity::Error,
                            "E004",
                            &child_pointer(&link_path, "href"),
                            format!("invalid href template \"{}\": {}", href, e),
                        );
                    }
                }
                _ => self.report(
                    Severity::Error,
                    "E004",
                    &link_path,
                    "link has no string href".to_string(),
                ),
            }
            let has_rel = link
                .get("rel")
                .and_then(Value::as_str)
                .map_or(false, |rel| !rel.trim().is_empty());
            if !has_rel {
                self.report(
                    Severity::Warning,
                    "W001",
                    &link_path,
                    "link has no rel".to_string(),
                );
            }
        }
    }

    fn check_type(&mut self, declared: &Value, path: &str) {
        let names: Vec<(String, &str)> = match declared {
            Value::String(name) => vec![(path.to_string(), name.as_str())],
            Value::Array(entries) => entries
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| {
                    entry
                        .as_str()
                        .map(|name| (child_pointer(path, &i.to_string()), name))
                })
                .collect(),
            _ => return,
        };
        for (entry_path, name) in names {
            if name != "any" && name != "all" && BasicType::parse(name).is_none() {
                self.report(
                    Severity::Warning,
                    "W002",
                    &entry_path,
                    format!("unknown type \"{}\"", name),
                );
            }
        }
    }
}

/// True if `fragment` (without `#`) is a JSON pointer into `document`.
fn fragment_resolves(document: &Value, fragment: &str) -> bool {
    let decoded = percent_encoding::percent_decode_str(fragment).decode_utf8_lossy();
    decoded.is_empty() || (decoded.starts_with('/') && document.pointer(&decoded).is_some())
}

/// Collect all .json files in a path (file or directory).
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn lint_str(content: &str) -> FileResult {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        lint_file(file.path(), file.path().parent().unwrap())
    }

    fn codes(result: &FileResult) -> Vec<&str> {
        result.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn lint_valid_schema() {
        let result = lint_str(
            r#"{
            "type": "object",
            "properties": {"id": {"type": ["integer", "string"]}},
            "links": [{"rel": "self", "href": "/items/{id}"}]
        }"#,
        );
        assert_eq!(result.status, FileStatus::Ok);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn lint_invalid_json_syntax() {
        let result = lint_str("{ not valid json }");
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E001"]);
    }

    #[test]
    fn lint_broken_internal_ref() {
        let result = lint_str(
            r##"{"definitions": {}, "properties": {"data": {"$ref": "#/definitions/missing"}}}"##,
        );
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E003"]);
        assert_eq!(result.diagnostics[0].path, "/properties/data/$ref");
    }

    #[test]
    fn lint_self_ref_is_fine() {
        let result = lint_str(r##"{"items": {"$ref": "#"}}"##);
        assert_eq!(result.status, FileStatus::Ok);
    }

    #[test]
    fn lint_broken_file_ref() {
        let result = lint_str(r#"{"properties": {"data": {"$ref": "nonexistent.json"}}}"#);
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E002"]);
    }

    #[test]
    fn lint_bad_link_template() {
        let result = lint_str(r#"{"links": [{"rel": "self", "href": "/items/{id"}]}"#);
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E004"]);
        assert_eq!(result.diagnostics[0].path, "/links/0/href");
    }

    #[test]
    fn lint_link_without_rel() {
        let result = lint_str(r#"{"links": [{"href": "/items"}]}"#);
        assert_eq!(result.status, FileStatus::Warning);
        assert_eq!(codes(&result), vec!["W001"]);
    }

    #[test]
    fn lint_unknown_type() {
        let result = lint_str(r#"{"type": ["string", "text", {"type": "number"}]}"#);
        assert_eq!(result.status, FileStatus::Warning);
        assert_eq!(codes(&result), vec!["W002"]);
        assert_eq!(result.diagnostics[0].path, "/type/1");
    }

    #[test]
    fn lint_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("valid.json"), r#"{"type": "object"}"#).unwrap();
        std::fs::write(dir.path().join("invalid.json"), "{ not json }").unwrap();

        let result = lint(dir.path(), false);
        assert_eq!(result.files_checked, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn lint_strict_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.json");
        std::fs::write(&file_path, r#"{"type": "whole"}"#).unwrap();

        let result = lint(&file_path, false);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 0);

        let result = lint(&file_path, true);
        assert_eq!(result.passed, 0);
        assert_eq!(result.failed, 1);
    }

    #[test]
    fn lint_ref_into_other_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("types.json"),
            r#"{"definitions": {"thing": {"type": "string"}}}"#,
        )
        .unwrap();
        let main_path = dir.path().join("main.json");
        std::fs::write(
            &main_path,
            r#"{"properties": {
                "x": {"$ref": "types.json#/definitions/thing"},
                "y": {"$ref": "types.json#/definitions/other"}
            }}"#,
        )
        .unwrap();

        let result = lint_file(&main_path, dir.path());
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E003"]);
        assert_eq!(result.diagnostics[0].path, "/properties/y/$ref");
    }
}

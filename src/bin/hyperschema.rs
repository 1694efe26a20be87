//! Hyper-Schema CLI
//!
//! Command-line interface for patching documents, matching them against
//! schemas, deriving links and linting schema files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hyperschema::{
    evaluate, is_url, lint, load_json_auto, load_json_str, load_patch, AutoFetcher, Document,
    DocumentOptions, Engine, Fetcher, FileStatus, Schema, SchemaList, Synthesis, UriTemplate,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "hyperschema")]
#[command(about = "Apply patches, match schemas and derive links for JSON Hyper-Schema")]
#[command(version)]
struct Cli {
    /// Log schema loading and binding activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch file to a document
    Patch {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Patch file (array of add/replace/remove/move operations)
        patch: PathBuf,

        /// Write the patch that undoes this one to a file
        #[arg(long)]
        inverse: Option<PathBuf>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check a document against a schema
    Match {
        /// Document source: file path or URL
        document: String,

        /// Schema source: file path or URL
        #[arg(long, short)]
        schema: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Generate a value satisfying a schema
    Create {
        /// Schema source: file path or URL
        schema: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// List the links a schema defines for a document
    Links {
        /// Document source: file path or URL
        document: String,

        /// Schema source: file path or URL
        #[arg(long, short)]
        schema: String,

        /// Base URL for relative links (default: the document source)
        #[arg(long)]
        url: Option<String>,

        /// Only list links with this relation
        #[arg(long)]
        rel: Option<String>,

        /// Pointer to the node whose links to list
        #[arg(long, default_value = "")]
        path: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Expand a URI template
    Expand {
        /// The template, e.g. "/items/{id}{?q}"
        template: String,

        /// JSON object supplying variable values (`$` is the whole value)
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Lint schema files for errors (syntax, broken refs, bad links)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let result = match cli.command {
        Commands::Patch {
            document,
            patch,
            inverse,
            output,
            pretty,
        } => run_patch(&document, &patch, inverse, output, pretty),
        Commands::Match {
            document,
            schema,
            json,
        } => run_match(&document, &schema, json),
        Commands::Create { schema, pretty } => run_create(&schema, pretty),
        Commands::Links {
            document,
            schema,
            url,
            rel,
            path,
            pretty,
        } => run_links(LinksArgs {
            document,
            schema,
            url,
            rel,
            path,
            pretty,
        }),
        Commands::Expand { template, data } => run_expand(&template, &data),
        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// URL under which a source is registered, so relative `$ref`s resolve.
fn source_url(source: &str) -> String {
    if is_url(source) {
        return source.to_string();
    }
    let path = Path::new(source);
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

fn load_schema(engine: &Engine, fetcher: &dyn Fetcher, source: &str) -> Result<Schema, u8> {
    let url = source_url(source);
    let fetched = fetcher.fetch(&url).map_err(|e| {
        eprintln!("Error: loading schema: {}", e);
        e.exit_code() as u8
    })?;
    Ok(engine.add_schema_document(&url, fetched.value))
}

fn load_value(source: &str) -> Result<Value, u8> {
    load_json_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn to_json(value: &Value, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}

fn write_output(output: Option<&Path>, text: &str) -> Result<(), u8> {
    match output {
        Some(path) => std::fs::write(path, text).map_err(|e| {
            eprintln!("Error writing to {}: {}", path.display(), e);
            3u8
        }),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

fn run_patch(
    source: &str,
    patch_path: &Path,
    inverse: Option<PathBuf>,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let value = load_value(source)?;
    let patch = load_patch(patch_path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let engine = Engine::new();
    let mut document = Document::new(&engine, value, DocumentOptions::new());
    let applied = document.patch(&patch).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if let Some(path) = inverse {
        write_output(Some(&path), &to_json(&applied.inverse().plain(), pretty)?)?;
    }
    let result = document.raw_value().unwrap_or(Value::Null);
    write_output(output.as_deref(), &to_json(&result, pretty)?)
}

fn run_match(source: &str, schema_source: &str, json_output: bool) -> Result<(), u8> {
    let engine = Engine::new();
    let fetcher = AutoFetcher::default();
    let schema = load_schema(&engine, &fetcher, schema_source)?;
    let value = load_value(source)?;

    let document = Document::new(&engine, value, DocumentOptions::new().url(source_url(source)));
    let root = document.raw().id();
    document.add_schema(root, schema.clone(), None);
    document.fetch_pending(&fetcher);

    let outcome = evaluate(&engine.store(), document.raw_value().as_ref(), &schema);
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(pending) => {
            report_error(json_output, &format!("cannot load schema: {}", pending));
            return Err(3);
        }
    };

    if outcome.matched {
        if json_output {
            println!(r#"{{"matched":true}}"#);
        } else {
            println!("Matched");
        }
        return Ok(());
    }
    let reason = outcome
        .fail_reason
        .map(|r| r.to_string())
        .unwrap_or_default();
    if json_output {
        println!("{}", json!({"matched": false, "reason": reason}));
    } else {
        eprintln!("Match failed: {}", reason);
    }
    Err(1)
}

fn run_create(schema_source: &str, pretty: bool) -> Result<(), u8> {
    let engine = Engine::new();
    let fetcher = AutoFetcher::default();
    let schema = load_schema(&engine, &fetcher, schema_source)?;

    match SchemaList::from(schema).create_value_blocking(&engine, &fetcher) {
        Synthesis::Value(value) => write_output(None, &to_json(&value, pretty)?),
        Synthesis::Unsatisfiable => {
            eprintln!("Error: no value satisfies the schema");
            Err(1)
        }
        Synthesis::Pending(url) => {
            eprintln!("Error: cannot load schema {}", url);
            Err(3)
        }
    }
}

struct LinksArgs {
    document: String,
    schema: String,
    url: Option<String>,
    rel: Option<String>,
    path: String,
    pretty: bool,
}

fn run_links(args: LinksArgs) -> Result<(), u8> {
    let LinksArgs {
        document: source,
        schema: schema_source,
        url,
        rel,
        path,
        pretty,
    } = args;
    let engine = Engine::new();
    let fetcher = AutoFetcher::default();
    let schema = load_schema(&engine, &fetcher, schema_source.as_str())?;
    let value = load_value(&source)?;

    let url = url.unwrap_or_else(|| source_url(&source));
    let document = Document::new(&engine, value, DocumentOptions::new().url(url));
    let root = document.raw().id();
    document.add_schema(root, schema, None);
    document.fetch_pending(&fetcher);

    let Some(node) = document.data_at(&path) else {
        eprintln!("Error: no node at {}", path);
        return Err(2);
    };
    let links: Vec<Value> = node
        .links(rel.as_deref())
        .into_iter()
        .map(|link| {
            json!({
                "rel": link.rel,
                "href": link.href,
                "method": link.method,
                "encType": link.enc_type,
            })
        })
        .collect();
    write_output(None, &to_json(&Value::Array(links), pretty)?)
}

fn run_expand(template: &str, data: &str) -> Result<(), u8> {
    let template = UriTemplate::parse(template).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let data = load_json_str(data).map_err(|e| {
        eprintln!("Error: --data: {}", e);
        e.exit_code() as u8
    })?;
    let expanded = template.fill(|name| {
        if name == "$" {
            Some(data.clone())
        } else {
            data.get(name).cloned()
        }
    });
    println!("{}", expanded);
    Ok(())
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({"matched": false, "error": msg}));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    use hyperschema::Severity;

    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        let text = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", text);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}

//! Loading JSON documents, schemas and patches from files and URLs.
//!
//! Fetching sits behind the [`Fetcher`] trait so the engine never performs
//! I/O on its own: callers decide when pending schema URLs get loaded.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::document::{Document, DocumentOptions};
use crate::engine::Engine;
use crate::error::LoadError;
use crate::patch::Patch;
use crate::uri;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(feature = "remote")]
const ACCEPT: &str = "application/json, application/schema+json;q=0.9, */*;q=0.1";

/// A loaded JSON body plus the response metadata the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    /// Schema URL from the `Content-Type` profile parameter or a
    /// `describedby` link header.
    pub profile: Option<String>,
    /// Raw path of the logical root, from a `rel="root"` link header.
    pub root: Option<String>,
}

impl Fetched {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            profile: None,
            root: None,
        }
    }
}

/// Source of JSON resources by URL.
pub trait Fetcher {
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the resource cannot be read or parsed.
    fn fetch(&self, url: &str) -> Result<Fetched, LoadError>;
}

/// Load a JSON file.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_json_str(&content)
}

/// Parse a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a patch in wire form (an array of operations) from a file.
///
/// # Errors
///
/// Returns `LoadError::InvalidPatch` if the JSON is not a valid patch.
pub fn load_patch(path: &Path) -> Result<Patch, LoadError> {
    let plain = load_json(path)?;
    Patch::from_plain(&plain).map_err(|source| LoadError::InvalidPatch { source })
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load JSON from a file path or URL.
///
/// # Errors
///
/// Returns appropriate errors based on the source type.
pub fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    AutoFetcher::default().fetch(source).map(|f| f.value)
}

/// Load a document, turning load failures into a failed document.
pub fn load_document(
    engine: &Engine,
    url: &str,
    fetcher: &dyn Fetcher,
    options: DocumentOptions,
) -> Document {
    match fetcher.fetch(url) {
        Ok(fetched) => Document::from_fetched(engine, url, fetched, options),
        Err(err) => Document::failed(engine, url, err.to_string()),
    }
}

/// Reads `file://` URLs and plain paths, relative ones from `base_dir`.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        let (location, _) = uri::split_fragment(url);
        let location = location.strip_prefix("file://").unwrap_or(location);
        let decoded = percent_encoding::percent_decode_str(location).decode_utf8_lossy();
        let path = PathBuf::from(decoded.as_ref());
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, LoadError> {
        let path = self.path_for(url);
        log::debug!("reading {}", path.display());
        load_json(&path).map(Fetched::new)
    }
}

/// Fetches over HTTP with a 10 second timeout.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    /// # Errors
    ///
    /// Returns `LoadError::NetworkError` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, LoadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| LoadError::NetworkError {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, LoadError> {
        let (location, _) = uri::split_fragment(url);
        let network = |source| LoadError::NetworkError {
            url: location.to_string(),
            source,
        };
        log::debug!("GET {}", location);
        let response = self
            .client
            .get(location)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .map_err(network)?;

        // Check for HTTP errors before parsing
        let response = response.error_for_status().map_err(network)?;

        let header = |name: reqwest::header::HeaderName| -> Vec<String> {
            response
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect()
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let links = header(reqwest::header::LINK);
        let text = response.text().map_err(network)?;
        let value = load_json_str(&text)?;
        Ok(response_metadata(location, value, &content_type, &links))
    }
}

/// Dispatches on the URL scheme: HTTP(S) to [`HttpFetcher`], everything
/// else to [`FileFetcher`].
#[derive(Debug, Clone, Default)]
pub struct AutoFetcher {
    files: FileFetcher,
}

impl AutoFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            files: FileFetcher::new(base_dir),
        }
    }
}

impl Fetcher for AutoFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, LoadError> {
        if is_url(url) {
            #[cfg(feature = "remote")]
            {
                HttpFetcher::new()?.fetch(url)
            }
            #[cfg(not(feature = "remote"))]
            {
                Err(LoadError::RemoteDisabled {
                    url: url.to_string(),
                })
            }
        } else {
            self.files.fetch(url)
        }
    }
}

/// Build a [`Fetched`] from a body and its `Content-Type` and `Link`
/// header values.
pub fn response_metadata(
    url: &str,
    value: Value,
    content_types: &[String],
    links: &[String],
) -> Fetched {
    let resolve = |href: &str| uri::resolve(url, href).unwrap_or_else(|_| href.to_string());
    let link_values: Vec<(String, Vec<String>)> =
        links.iter().flat_map(|h| parse_link_header(h)).collect();
    let with_rel = |rel: &str| {
        link_values
            .iter()
            .find(|(_, rels)| rels.iter().any(|r| r == rel))
            .map(|(href, _)| resolve(href))
    };
    let profile = content_types
        .iter()
        .find_map(|h| content_type_profile(h))
        .map(|p| resolve(&p))
        .or_else(|| with_rel("describedby"));
    let root = with_rel("root").and_then(|href| {
        let (_, fragment) = uri::split_fragment(&href);
        fragment.map(|f| {
            percent_encoding::percent_decode_str(f)
                .decode_utf8_lossy()
                .into_owned()
        })
    });
    Fetched {
        value,
        profile,
        root,
    }
}

/// The `profile` parameter of a `Content-Type` header value.
pub fn content_type_profile(header: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("profile")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Parse a `Link` header value into `(href, rels)` pairs. Relation names
/// are lowercased.
pub fn parse_link_header(header: &str) -> Vec<(String, Vec<String>)> {
    let mut links = Vec::new();
    let mut rest = header;
    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let href = rest[open + 1..open + close].trim().to_string();
        rest = &rest[open + close + 1..];
        let params_end = rest.find(',').unwrap_or(rest.len());
        let rels = rest[..params_end]
            .split(';')
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                name.trim().eq_ignore_ascii_case("rel").then(|| {
                    value
                        .trim()
                        .trim_matches('"')
                        .split_whitespace()
                        .map(str::to_lowercase)
                        .collect::<Vec<_>>()
                })
            })
            .flatten()
            .collect();
        links.push((href, rels));
        rest = &rest[params_end..];
    }
    links
}

//! Hypermedia links derived from schema `links` declarations.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::{LinkError, TemplateError};
use crate::pointer;
use crate::types::{default_enc_type, default_method, json_type_name};
use crate::uri;
use crate::uri_template::{UriTemplate, INSTANCE_VARIABLE};

const FORM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const JSON_ENCODING: &str = "application/json";
pub const FORM_ENCODING: &str = "application/x-www-form-urlencoded";

/// A link definition from a schema, not yet bound to data.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialLink {
    definition: Value,
    template: UriTemplate,
    rel: String,
    method: String,
    enc_type: String,
}

impl PotentialLink {
    /// Compile a link definition (`{"href": ..., "rel": ..., ...}`).
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if `href` is not a valid URI template.
    pub fn new(definition: &Value) -> Result<Self, TemplateError> {
        let href = definition.get("href").and_then(Value::as_str).unwrap_or("");
        let rel = definition
            .get("rel")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let method = definition
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .unwrap_or_else(|| default_method(&rel).to_string());
        let enc_type = definition
            .get("encType")
            .or_else(|| definition.get("enctype"))
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| default_enc_type(&method).to_string());
        Ok(Self {
            definition: definition.clone(),
            template: UriTemplate::parse(href)?,
            rel,
            method,
            enc_type,
        })
    }

    /// Lower-cased relation.
    pub fn rel(&self) -> &str {
        &self.rel
    }

    pub fn is_self(&self) -> bool {
        self.rel == "self"
    }

    pub fn href_template(&self) -> &str {
        self.template.as_str()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn enc_type(&self) -> &str {
        &self.enc_type
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    /// True if every template variable resolves to a defined, non-null value.
    pub fn can_apply_to(&self, value: Option<&Value>) -> bool {
        self.template
            .variables()
            .iter()
            .all(|var| lookup(value, &var.name).is_some())
    }

    /// Bind the link to `value`, resolving the href against `base_url`.
    /// `None` if the link cannot apply.
    pub fn link_for(&self, value: Option<&Value>, base_url: &str) -> Option<ActiveLink> {
        if !self.can_apply_to(value) {
            return None;
        }
        let raw_href = self.template.fill(|name| lookup(value, name));
        let href = uri::resolve(base_url, &raw_href).unwrap_or_else(|err| {
            log::warn!("cannot resolve link {:?} against {:?}: {}", raw_href, base_url, err);
            raw_href.clone()
        });
        let text = |key: &str| self.definition.get(key).and_then(Value::as_str).map(String::from);
        Some(ActiveLink {
            href,
            raw_href,
            rel: self.rel.clone(),
            method: self.method.clone(),
            enc_type: self.enc_type.clone(),
            title: text("title"),
            target_schema: self.definition.get("targetSchema").cloned(),
            submission_schema: self.definition.get("schema").cloned(),
        })
    }
}

/// Resolve a template variable against the instance.
fn lookup(value: Option<&Value>, name: &str) -> Option<Value> {
    let value = value?;
    let found = if name == INSTANCE_VARIABLE {
        Some(value)
    } else {
        match value {
            Value::Object(object) => object.get(name),
            Value::Array(items) => pointer::parse_index(name).and_then(|i| items.get(i)),
            _ => None,
        }
    };
    found.filter(|v| !v.is_null()).cloned()
}

/// A link bound to data.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLink {
    pub href: String,
    /// The expanded template before resolution.
    pub raw_href: String,
    pub rel: String,
    pub method: String,
    pub enc_type: String,
    pub title: Option<String>,
    pub target_schema: Option<Value>,
    pub submission_schema: Option<Value>,
}

/// A request ready to be sent for a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub method: String,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

impl ActiveLink {
    pub fn is_self(&self) -> bool {
        self.rel == "self"
    }

    /// Encode `submission` according to the link's method and encoding.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::UnsupportedEncoding` for encodings other than JSON
    /// and form-urlencoded, and `LinkError::NotFormEncodable` if form data is
    /// not an object.
    pub fn create_request(&self, submission: Option<&Value>) -> Result<LinkRequest, LinkError> {
        let mut request = LinkRequest {
            method: self.method.clone(),
            url: self.href.clone(),
            content_type: None,
            body: None,
        };
        let Some(data) = submission else {
            return Ok(request);
        };
        let media_type = self.enc_type.split(';').next().unwrap_or("").trim();
        match media_type {
            FORM_ENCODING => {
                let encoded = form_encode(data)?;
                if matches!(self.method.as_str(), "GET" | "DELETE") {
                    if !encoded.is_empty() {
                        let separator = if request.url.contains('?') { '&' } else { '?' };
                        request.url = format!("{}{}{}", request.url, separator, encoded);
                    }
                } else {
                    request.content_type = Some(FORM_ENCODING.to_string());
                    request.body = Some(encoded);
                }
            }
            JSON_ENCODING => {
                request.content_type = Some(self.enc_type.clone());
                request.body = Some(data.to_string());
            }
            _ => {
                return Err(LinkError::UnsupportedEncoding {
                    enc_type: self.enc_type.clone(),
                })
            }
        }
        Ok(request)
    }
}

fn form_encode(data: &Value) -> Result<String, LinkError> {
    let Value::Object(object) = data else {
        return Err(LinkError::NotFormEncodable {
            actual: json_type_name(data).to_string(),
        });
    };
    let mut pairs = Vec::new();
    for (key, value) in object {
        let key = utf8_percent_encode(key, FORM).to_string();
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for value in values {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            pairs.push(format!("{}={}", key, utf8_percent_encode(&text, FORM)));
        }
    }
    Ok(pairs.join("&"))
}

/// One potential link registered on a node, with its current binding.
#[derive(Debug, Clone)]
pub struct LinkInstance {
    id: u64,
    key: String,
    potential: PotentialLink,
    active: Option<ActiveLink>,
}

impl LinkInstance {
    pub fn new(id: u64, key: impl Into<String>, potential: PotentialLink) -> Self {
        Self {
            id,
            key: key.into(),
            potential,
            active: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The schema key this link was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn potential(&self) -> &PotentialLink {
        &self.potential
    }

    pub fn active(&self) -> Option<&ActiveLink> {
        self.active.as_ref()
    }

    pub fn is_self(&self) -> bool {
        self.potential.is_self()
    }

    /// Recompute the binding. Returns whether it changed.
    pub fn update(&mut self, value: Option<&Value>, base_url: &str) -> bool {
        let next = self.potential.link_for(value, base_url);
        let changed = next != self.active;
        self.active = next;
        changed
    }

    /// Deactivate. Returns whether the link was active.
    pub fn disable(&mut self) -> bool {
        self.active.take().is_some()
    }
}

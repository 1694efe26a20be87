//! URI Templates (RFC 6570, levels 1-4).
//!
//! Variable names follow the hyper-schema conventions: `$` names the whole
//! instance and a parenthesised name is taken literally, so `()` names the
//! empty-string property.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::TemplateError;

/// Characters left alone by simple expansion (RFC 3986 unreserved).
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Characters left alone by `+` and `#` expansion (unreserved + reserved).
const RESERVED: &AsciiSet = &UNRESERVED
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Name used in templates for the instance itself.
pub const INSTANCE_VARIABLE: &str = "$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Operator {
    first: &'static str,
    separator: &'static str,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        let op = match c {
            '+' => Operator::new("", ",", false, "", true),
            '#' => Operator::new("#", ",", false, "", true),
            '.' => Operator::new(".", ".", false, "", false),
            '/' => Operator::new("/", "/", false, "", false),
            ';' => Operator::new(";", ";", true, "", false),
            '?' => Operator::new("?", "&", true, "=", false),
            '&' => Operator::new("&", "&", true, "=", false),
            _ => return None,
        };
        Some(op)
    }

    const fn new(
        first: &'static str,
        separator: &'static str,
        named: bool,
        if_empty: &'static str,
        allow_reserved: bool,
    ) -> Self {
        Self {
            first,
            separator,
            named,
            if_empty,
            allow_reserved,
        }
    }

    const fn simple() -> Self {
        Operator::new("", ",", false, "", false)
    }

    fn encode(&self, text: &str) -> String {
        if !self.allow_reserved {
            return utf8_percent_encode(text, UNRESERVED).to_string();
        }
        // Existing pct-encoded triplets pass through; a bare `%` does not.
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(at) = rest.find('%') {
            out.extend(utf8_percent_encode(&rest[..at], RESERVED));
            let hex = rest.as_bytes().get(at + 1..at + 3);
            if hex.map_or(false, |h| h.iter().all(u8::is_ascii_hexdigit)) {
                out.push_str(&rest[at..at + 3]);
                rest = &rest[at + 3..];
            } else {
                out.push_str("%25");
                rest = &rest[at + 1..];
            }
        }
        out.extend(utf8_percent_encode(rest, RESERVED));
        out
    }
}

/// One variable reference inside an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSpec {
    pub name: String,
    pub explode: bool,
    pub prefix: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression { operator: Operator, vars: Vec<VarSpec> },
}

/// A compiled URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
}

impl UriTemplate {
    /// Compile a template string.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` for unclosed expressions, empty names or
    /// malformed prefix modifiers.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .ok_or(TemplateError::UnclosedExpression {
                    offset: offset + open,
                })?;
            let expression = &rest[open + 1..open + close];
            parts.push(parse_expression(expression)?);
            offset += open + close + 1;
            rest = &rest[open + close + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every variable referenced by the template, in order of appearance.
    pub fn variables(&self) -> Vec<&VarSpec> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Expression { vars, .. } => Some(vars.iter()),
                Part::Literal(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Expand the template. `lookup` returns `None` for undefined variables,
    /// which contribute nothing (not even their separator).
    pub fn fill<F>(&self, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<Value>,
    {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expression { operator, vars } => {
                    let mut first = true;
                    for var in vars {
                        let Some(value) = lookup(&var.name) else {
                            continue;
                        };
                        let Some(expanded) = expand_var(operator, var, &value) else {
                            continue;
                        };
                        out.push_str(if first {
                            operator.first
                        } else {
                            operator.separator
                        });
                        out.push_str(&expanded);
                        first = false;
                    }
                }
            }
        }
        out
    }
}

fn parse_expression(expression: &str) -> Result<Part, TemplateError> {
    let mut chars = expression.chars();
    let (operator, body) = match chars.next().and_then(Operator::from_char) {
        Some(op) => (op, chars.as_str()),
        None => (Operator::simple(), expression),
    };

    let mut vars = Vec::new();
    for spec in split_var_list(body) {
        let (mut name, explode, prefix) = if let Some(name) = spec.strip_suffix('*') {
            (name, true, None)
        } else if let Some(idx) = spec.rfind(':').filter(|_| !spec.ends_with(')')) {
            let modifier = &spec[idx + 1..];
            let length = modifier
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0 && *n < 10_000)
                .ok_or_else(|| TemplateError::InvalidPrefix {
                    expression: expression.to_string(),
                    modifier: modifier.to_string(),
                })?;
            (&spec[..idx], false, Some(length))
        } else {
            (spec, false, None)
        };

        if let Some(inner) = name.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
            name = inner;
        } else if name.is_empty() {
            return Err(TemplateError::EmptyVariable {
                expression: expression.to_string(),
            });
        }

        let name = percent_encoding::percent_decode_str(name)
            .decode_utf8_lossy()
            .into_owned();
        vars.push(VarSpec {
            name,
            explode,
            prefix,
        });
    }

    Ok(Part::Expression { operator, vars })
}

/// Split on commas that are not inside a parenthesised name.
fn split_var_list(body: &str) -> Vec<&str> {
    let mut specs = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                specs.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    specs.push(&body[start..]);
    specs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn truncate(text: &str, prefix: Option<usize>) -> &str {
    match prefix {
        Some(n) => match text.char_indices().nth(n) {
            Some((idx, _)) => &text[..idx],
            None => text,
        },
        None => text,
    }
}

fn named(operator: &Operator, name: &str, encoded: &str) -> String {
    if encoded.is_empty() {
        format!("{}{}", operator.encode(name), operator.if_empty)
    } else {
        format!("{}={}", operator.encode(name), encoded)
    }
}

fn expand_var(operator: &Operator, var: &VarSpec, value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items
                .iter()
                .filter_map(scalar_text)
                .map(|s| operator.encode(&s))
                .collect();
            if items.is_empty() {
                return None;
            }
            if var.explode {
                let joined: Vec<String> = if operator.named {
                    items
                        .iter()
                        .map(|item| named(operator, &var.name, item))
                        .collect()
                } else {
                    items
                };
                Some(joined.join(operator.separator))
            } else if operator.named {
                Some(named(operator, &var.name, &items.join(",")))
            } else {
                Some(items.join(","))
            }
        }
        Value::Object(map) => {
            let pairs: Vec<(String, String)> = map
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|s| (operator.encode(k), operator.encode(&s))))
                .collect();
            if pairs.is_empty() {
                return None;
            }
            if var.explode {
                let joined: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| {
                        if operator.named && v.is_empty() {
                            format!("{}{}", k, operator.if_empty)
                        } else {
                            format!("{}={}", k, v)
                        }
                    })
                    .collect();
                Some(joined.join(operator.separator))
            } else {
                let flat: Vec<String> = pairs
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                let flat = flat.join(",");
                if operator.named {
                    Some(named(operator, &var.name, &flat))
                } else {
                    Some(flat)
                }
            }
        }
        scalar => {
            let text = scalar_text(scalar)?;
            let encoded = operator.encode(truncate(&text, var.prefix));
            if operator.named {
                Some(named(operator, &var.name, &encoded))
            } else {
                Some(encoded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expand(template: &str, vars: &Value) -> String {
        let template = UriTemplate::parse(template).unwrap();
        template.fill(|name| vars.get(name).cloned())
    }

    #[test]
    fn query_expansion() {
        assert_eq!(expand("/widgets{?id}", &json!({"id": "7"})), "/widgets?id=7");
        assert_eq!(expand("/widgets{?id,q}", &json!({"q": ""})), "/widgets?q=");
        assert_eq!(expand("/widgets{?id}", &json!({})), "/widgets");
    }

    #[test]
    fn level_one_and_two() {
        let vars = json!({"var": "value", "hello": "Hello World!", "path": "/foo/bar"});
        assert_eq!(expand("{var}", &vars), "value");
        assert_eq!(expand("{hello}", &vars), "Hello%20World%21");
        assert_eq!(expand("{+hello}", &vars), "Hello%20World!");
        assert_eq!(expand("{+path}/here", &vars), "/foo/bar/here");
        assert_eq!(expand("X{#var}", &vars), "X#value");
    }

    #[test]
    fn reserved_expansion_keeps_only_valid_triplets() {
        let vars = json!({"a": "50%", "b": "%7e%zz", "c": "100% sure", "d": "%4"});
        assert_eq!(expand("{+a}", &vars), "50%25");
        assert_eq!(expand("{#b}", &vars), "#%7e%25zz");
        assert_eq!(expand("{+c}", &vars), "100%25%20sure");
        assert_eq!(expand("{+d}", &vars), "%254");
        assert_eq!(expand("{a}", &vars), "50%25");
    }

    #[test]
    fn level_three_operators() {
        let vars = json!({"x": "1024", "y": "768", "var": "value", "empty": ""});
        assert_eq!(expand("map?{x,y}", &vars), "map?1024,768");
        assert_eq!(expand("{/var,x}/here", &vars), "/value/1024/here");
        assert_eq!(expand("{;x,y,empty}", &vars), ";x=1024;y=768;empty");
        assert_eq!(expand("{?x,y,empty}", &vars), "?x=1024&y=768&empty=");
        assert_eq!(expand("?fixed=yes{&x}", &vars), "?fixed=yes&x=1024");
        assert_eq!(expand("X{.var}", &vars), "X.value");
    }

    #[test]
    fn level_four_modifiers() {
        let vars = json!({
            "var": "value",
            "list": ["red", "green", "blue"],
            "keys": {"semi": ";", "dot": ".", "comma": ","}
        });
        assert_eq!(expand("{var:3}", &vars), "val");
        assert_eq!(expand("{list}", &vars), "red,green,blue");
        assert_eq!(expand("{list*}", &vars), "red,green,blue");
        assert_eq!(expand("{/list*}", &vars), "/red/green/blue");
        assert_eq!(expand("{?list*}", &vars), "?list=red&list=green&list=blue");
        assert_eq!(expand("{keys}", &vars), "semi,%3B,dot,.,comma,%2C");
        assert_eq!(expand("{?keys*}", &vars), "?semi=%3B&dot=.&comma=%2C");
    }

    #[test]
    fn numbers_and_booleans_render_as_text() {
        assert_eq!(expand("/items/{id}", &json!({"id": 42})), "/items/42");
        assert_eq!(expand("{?flag}", &json!({"flag": true})), "?flag=true");
    }

    #[test]
    fn special_variable_names() {
        let template = UriTemplate::parse("/things/{$}{?()}").unwrap();
        let names: Vec<&str> = template.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["$", ""]);
    }

    #[test]
    fn percent_encoded_names_are_decoded() {
        let template = UriTemplate::parse("{a%20b}").unwrap();
        assert_eq!(template.variables()[0].name, "a b");
    }

    #[test]
    fn malformed_templates() {
        assert!(matches!(
            UriTemplate::parse("/a/{id"),
            Err(TemplateError::UnclosedExpression { offset: 3 })
        ));
        assert!(matches!(
            UriTemplate::parse("{var:x}"),
            Err(TemplateError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            UriTemplate::parse("{}"),
            Err(TemplateError::EmptyVariable { .. })
        ));
    }
}

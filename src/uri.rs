//! URI references (RFC 3986): parsing, serialization and reference resolution.
//!
//! Bases may themselves be relative (`/api/items/`), which is the common case
//! for documents fetched by path, so resolution never requires a scheme.

use std::fmt;

use crate::error::UriError;

/// The authority component of a URI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Authority {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

/// A parsed URI reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub scheme: Option<String>,
    pub authority: Option<Authority>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Uri {
    /// Parse a URI reference.
    ///
    /// # Errors
    ///
    /// Returns `UriError::InvalidPort` if the authority carries a non-numeric port.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let (rest, fragment) = match input.find('#') {
            Some(idx) => (&input[..idx], Some(input[idx + 1..].to_string())),
            None => (input, None),
        };
        let (rest, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };

        let (scheme, rest) = match split_scheme(rest) {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest),
            None => (None, rest),
        };

        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find('/').unwrap_or(after.len());
                let authority = parse_authority(&after[..end], input)?;
                (Some(authority), &after[end..])
            }
            None => (None, rest),
        };

        Ok(Uri {
            scheme,
            authority,
            path: path.to_string(),
            query,
            fragment,
        })
    }

    /// True if the reference carries a scheme.
    pub fn is_absolute(&self) -> bool {
        self.scheme.is_some()
    }

    /// Resolve `reference` against this URI as base (RFC 3986 section 5.2.2).
    pub fn join(&self, reference: &Uri) -> Uri {
        let mut target = Uri {
            fragment: reference.fragment.clone(),
            ..Uri::default()
        };

        if reference.scheme.is_some() {
            target.scheme = reference.scheme.clone();
            target.authority = reference.authority.clone();
            target.path = remove_dot_segments(&reference.path);
            target.query = reference.query.clone();
            return target;
        }

        if reference.authority.is_some() {
            target.authority = reference.authority.clone();
            target.path = remove_dot_segments(&reference.path);
            target.query = reference.query.clone();
        } else {
            if reference.path.is_empty() {
                target.path = self.path.clone();
                target.query = reference.query.clone().or_else(|| self.query.clone());
            } else {
                target.path = if reference.path.starts_with('/') {
                    remove_dot_segments(&reference.path)
                } else {
                    remove_dot_segments(&self.merge(&reference.path))
                };
                target.query = reference.query.clone();
            }
            target.authority = self.authority.clone();
        }
        target.scheme = self.scheme.clone();
        target
    }

    /// A copy with the fragment removed.
    pub fn without_fragment(&self) -> Uri {
        Uri {
            fragment: None,
            ..self.clone()
        }
    }

    fn merge(&self, reference_path: &str) -> String {
        if self.authority.is_some() && self.path.is_empty() {
            return format!("/{}", reference_path);
        }
        match self.path.rfind('/') {
            Some(idx) => format!("{}{}", &self.path[..=idx], reference_path),
            None => reference_path.to_string(),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

/// Resolve `relative` against `base` and serialize the result.
///
/// # Errors
///
/// Returns `UriError` if either reference is malformed.
pub fn resolve(base: &str, relative: &str) -> Result<String, UriError> {
    let base = Uri::parse(base)?;
    let reference = Uri::parse(relative)?;
    Ok(base.join(&reference).to_string())
}

/// Split `url` into the part before `#` and the fragment (without `#`).
pub fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.find('#') {
        Some(idx) => (&url[..idx], Some(&url[idx + 1..])),
        None => (url, None),
    }
}

fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    let candidate = &input[..colon];
    if candidate.contains(['/', '?', '#']) {
        return None;
    }
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((candidate, &input[colon + 1..]))
}

fn parse_authority(authority: &str, uri: &str) -> Result<Authority, UriError> {
    let (userinfo, hostport) = match authority.rfind('@') {
        Some(idx) => (Some(&authority[..idx]), &authority[idx + 1..]),
        None => (None, authority),
    };
    let (user, password) = match userinfo {
        Some(info) => match info.find(':') {
            Some(idx) => (
                Some(info[..idx].to_string()),
                Some(info[idx + 1..].to_string()),
            ),
            None => (Some(info.to_string()), None),
        },
        None => (None, None),
    };

    // IPv6 literals keep their colons inside brackets
    let port_sep = match hostport.rfind(']') {
        Some(bracket) => hostport[bracket..].find(':').map(|i| i + bracket),
        None => hostport.rfind(':'),
    };
    let (host, port) = match port_sep {
        Some(idx) => {
            let port = &hostport[idx + 1..];
            let port = if port.is_empty() {
                None
            } else {
                Some(port.parse::<u16>().map_err(|_| UriError::InvalidPort {
                    uri: uri.to_string(),
                    port: port.to_string(),
                })?)
            };
            (&hostport[..idx], port)
        }
        None => (hostport, None),
    };

    Ok(Authority {
        user,
        password,
        host: host.to_string(),
        port,
    })
}

/// Remove `.` and `..` segments (RFC 3986 section 5.2.4).
fn remove_dot_segments(path: &str) -> String {
    let mut input = path.to_string();
    let mut output = String::with_capacity(path.len());

    fn pop_segment(output: &mut String) {
        match output.rfind('/') {
            Some(idx) => output.truncate(idx),
            None => output.clear(),
        }
    }

    while !input.is_empty() {
        if let Some(rest) = input.strip_prefix("../") {
            input = rest.to_string();
        } else if let Some(rest) = input.strip_prefix("./") {
            input = rest.to_string();
        } else if let Some(rest) = input.strip_prefix("/./") {
            input = format!("/{}", rest);
        } else if input == "/." {
            input = "/".to_string();
        } else if let Some(rest) = input.strip_prefix("/../") {
            input = format!("/{}", rest);
            pop_segment(&mut output);
        } else if input == "/.." {
            input = "/".to_string();
            pop_segment(&mut output);
        } else if input == "." || input == ".." {
            input.clear();
        } else {
            let start = usize::from(input.starts_with('/'));
            let end = input[start..]
                .find('/')
                .map(|i| i + start)
                .unwrap_or(input.len());
            output.push_str(&input[..end]);
            input = input[end..].to_string();
        }
    }
    // `..` above a relative path is dropped; the result stays relative.
    if !path.starts_with('/') && output.starts_with('/') {
        return output.trim_start_matches('/').to_string();
    }
    output
}

//! JSON Pointer (RFC 6901) helpers.

/// Unescape a single pointer component (`~1` -> `/`, `~0` -> `~`).
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    component.replace("~1", "/").replace("~0", "~")
}

/// Escape a single pointer component.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Split a pointer into unescaped components. `""` is the root.
pub fn split_pointer(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .strip_prefix('/')
        .unwrap_or(pointer)
        .split('/')
        .map(unescape_component)
        .collect()
}

/// Join unescaped components into a pointer.
pub fn join_pointer<S: AsRef<str>>(components: &[S]) -> String {
    let mut out = String::new();
    for component in components {
        out.push('/');
        out.push_str(&escape_component(component.as_ref()));
    }
    out
}

/// Append one unescaped component to a pointer.
pub fn child_pointer(pointer: &str, component: &str) -> String {
    format!("{}/{}", pointer, escape_component(component))
}

/// True if `path` equals `prefix` or lies beneath it.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Parse an array index component. Leading zeros are rejected.
pub fn parse_index(component: &str) -> Option<usize> {
    if component.is_empty() || (component.len() > 1 && component.starts_with('0')) {
        return None;
    }
    if !component.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    component.parse().ok()
}

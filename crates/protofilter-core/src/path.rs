//! Element paths
//!
//! A path is the sequence of names from the declaring file down to an element,
//! joined with `/` (e.g. `test.proto/msg_a/field_a_1`). Paths key both rule
//! lookups and inclusion state.

/// Separator between path segments
pub const SEPARATOR: char = '/';

/// Join segments into a path, skipping empty segments
pub fn build_path<S: AsRef<str>>(parts: &[S]) -> String {
    let mut result = String::new();
    for part in parts {
        let part = part.as_ref();
        if part.is_empty() {
            continue;
        }
        if !result.is_empty() {
            result.push(SEPARATOR);
        }
        result.push_str(part);
    }
    result
}

/// Append a single name to a parent path
pub fn concat(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, SEPARATOR, name)
    }
}

/// Split a path back into its segments
pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

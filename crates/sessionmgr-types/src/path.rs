//! Module path encoding.
//!
//! A module path is the sequence of names from the story root down to the
//! module. Encoded paths serve both as storage key suffixes and as the
//! surface ids handed to the story shell, so encoding must be injective:
//! `:` separates segments, and `:` or `\` inside a segment are escaped
//! with `\`.

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Escape every occurrence of the characters in `special` (and the escape
/// character itself) with a backslash.
pub fn escape(segment: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == ESCAPE || special.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Encode a module path into a surface id.
pub fn encode_module_path(module_path: &[String]) -> String {
    module_path
        .iter()
        .map(|segment| escape(segment, &[SEPARATOR]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Decode a surface id produced by [`encode_module_path`].
pub fn decode_module_path(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            SEPARATOR => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// The path of the parent module, or `None` for a root (or empty) path.
pub fn parent_module_path(module_path: &[String]) -> Option<&[String]> {
    match module_path.len() {
        0 | 1 => None,
        n => Some(&module_path[..n - 1]),
    }
}

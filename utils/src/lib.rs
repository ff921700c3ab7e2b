//! # Access Control Utilities
//!
//! Hashing and key helpers shared by the cache engine and its backing stores.
//!
//! Cache keys must be reproducible across deployments that already hold
//! entries, so identifier hashes follow the 32-bit polynomial string hash
//! (`h = 31 * h + c` over UTF-16 code units) rendered as unsigned lowercase
//! hex.

use regex::Regex;

/// 32-bit polynomial hash over the UTF-16 code units of `s`.
///
/// # Examples
///
/// ```
/// use utils::string_hash;
///
/// assert_eq!(string_hash(""), 0);
/// assert_eq!(string_hash("a"), 97);
/// ```
#[must_use]
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0_i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Ordered list hash: seeded with 1, each element folded in as
/// `h = 31 * h + hash(element)`. Reordering elements changes the result.
#[must_use]
pub fn list_hash<S: AsRef<str>>(items: &[S]) -> i32 {
    items.iter().fold(1_i32, |h, item| {
        h.wrapping_mul(31).wrapping_add(string_hash(item.as_ref()))
    })
}

/// Renders a 32-bit hash as unsigned lowercase hex without padding.
#[must_use]
pub fn to_hex(hash: i32) -> String {
    format!("{:x}", hash as u32)
}

/// `to_hex(string_hash(s))`
#[must_use]
pub fn hex_hash(s: &str) -> String {
    to_hex(string_hash(s))
}

/// Parses a marker value written as decimal epoch milliseconds.
#[must_use]
pub fn parse_epoch_millis(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// Compiles a Redis-style glob (`*`, `?`, `[...]`, `\` escapes) into an
/// anchored regular expression.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                let mut first = true;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if first && inner == '^' {
                        out.push('^');
                    } else if inner == '\\' || inner == '[' {
                        out.push('\\');
                        out.push(inner);
                    } else {
                        out.push(inner);
                    }
                    first = false;
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string()))
        }
    }
    out.push('$');
    Regex::new(&out)
}

/// True when `key` matches the Redis-style glob `pattern`. An invalid pattern
/// matches nothing.
#[must_use]
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    glob_to_regex(pattern).is_ok_and(|re| re.is_match(key))
}

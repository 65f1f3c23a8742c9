//! Canonical resource keys.
//!
//! Two requests that differ only in parameter order, trailing slashes, empty
//! query values or a fragment map to the same key, so they share one cache entry.

use std::collections::HashSet;

use serde_json::Value;
use url::form_urlencoded;

/// Extra query parameters merged into a key.
pub type Params = serde_json::Map<String, Value>;

/// Normalize a URL (absolute or path-only) plus optional parameters into a resource key.
///
/// - the fragment is dropped
/// - trailing `/` are trimmed from the path
/// - every query parameter that has an empty value is deleted (all occurrences of that name)
/// - `params` are merged in, replacing existing values of the same name; `null`,
///   `false`, `0` and empty strings are skipped, other non-strings are JSON-encoded
/// - parameters are sorted by name (stable, so repeated names keep their order)
///
/// # Example
/// ```
/// use swr_fetch::normalize_url;
///
/// assert_eq!(normalize_url("/foo/bar?b=2&a=1&c=", None), "/foo/bar?a=1&b=2");
/// ```
pub fn normalize_url(url: &str, params: Option<&Params>) -> String {
    let url = url.split_once('#').map_or(url, |(head, _)| head);
    let (path, search) = url.split_once('?').unwrap_or((url, ""));
    let path = path.trim_end_matches('/');

    if search.is_empty() && params.is_none_or(|p| p.is_empty()) {
        return path.to_string();
    }

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(search.as_bytes())
        .into_owned()
        .collect();

    let emptied: HashSet<String> = pairs
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name.clone())
        .collect();
    pairs.retain(|(name, _)| !emptied.contains(name));

    for (name, value) in params.into_iter().flatten() {
        if let Some(value) = param_value(value) {
            set_param(&mut pairs, name, value);
        }
    }

    // Compare in UTF-16 code units to match the ordering browsers use for query sorting.
    pairs.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

    if pairs.is_empty() {
        return path.to_string();
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();
    format!("{}?{}", path, query)
}

/// Falsy values (`null`, `false`, `0`, `""`) are skipped.
fn param_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Replace the first occurrence of `name` and drop the rest, or append.
fn set_param(pairs: &mut Vec<(String, String)>, name: &str, value: String) {
    match pairs.iter().position(|(n, _)| n == name) {
        Some(first) => {
            pairs[first].1 = value;
            let mut index = 0;
            pairs.retain(|(n, _)| {
                let keep = index <= first || n != name;
                index += 1;
                keep
            });
        }
        None => pairs.push((name.to_string(), value)),
    }
}

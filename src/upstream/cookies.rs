use std::collections::HashMap;

use reqwest::header::{HeaderMap, SET_COOKIE};

/// Collects `name=value` pairs from every `Set-Cookie` header.
///
/// Only the leading pair of each header is considered; attributes such as
/// `Path`, `HttpOnly` or `Max-Age` are ignored whatever their order. Empty
/// values and placeholder values (`name=`) are skipped. When a name appears
/// more than once the last non-empty value wins.
pub fn extract_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

fn parse_set_cookie(line: &str) -> Option<(String, String)> {
    let pair = line.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    let value = value.trim().trim_matches('"');

    if name.is_empty() || value.is_empty() || value == format!("{name}=") {
        return None;
    }

    Some((name.to_string(), value.to_string()))
}

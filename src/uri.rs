//! URL resolution and query building.
//!
//! - A URL counts as absolute only when it parses with an `http` or `https`
//!   scheme. Anything else is a path relative to the configured host.
//! - The host contributes its origin only (`scheme://host[:port]`), without
//!   a trailing slash.
//! - For verbs without a wire body, the structured body becomes the query
//!   string and replaces whatever `?...` the URL already had.
use crate::errors::ClientError;
use url::Url;

pub const TEXT_PLAIN: &str = "text/plain";

pub fn is_absolute_http_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => url.scheme() == "http" || url.scheme() == "https",
        Err(_) => false,
    }
}

/// `scheme://host[:port]` of an absolute http(s) URL.
pub fn host_of(host: &str) -> Result<String, ClientError> {
    let url = Url::parse(host).map_err(|e| ClientError::InvalidUrl {
        url: host.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ClientError::InvalidUrl {
            url: host.to_string(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }

    let origin = url.origin().ascii_serialization();
    Ok(origin.trim_end_matches('/').to_string())
}

/// Resolves `target` against `host` unless it is already absolute.
pub fn resolve(target: &str, host: Option<&str>) -> Result<String, ClientError> {
    if is_absolute_http_url(target) {
        return Ok(target.to_string());
    }

    let Some(host) = host else {
        log::error!("Cannot resolve relative URL {target:?}: no host configured");
        return Err(ClientError::MissingHost(target.to_string()));
    };

    let resolved = format!("{}/{}", host_of(host)?, target.trim_start_matches('/'));
    Url::parse(&resolved).map_err(|e| ClientError::InvalidUrl {
        url: resolved.clone(),
        reason: e.to_string(),
    })?;

    Ok(resolved)
}

/// Encodes one `name=value` pair.
///
/// Under `text/plain` whitespace, `=` and `\` in the value are backslash
/// escaped. Every other content type gets form-urlencoded values.
pub fn encode_pair(name: &str, value: &str, content_type: &str) -> String {
    if is_text_plain(content_type) {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if c.is_whitespace() || c == '=' || c == '\\' {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        format!("{name}={escaped}")
    } else {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        format!("{name}={encoded}")
    }
}

/// Replaces the query of `target` with the encoded `pairs`, keeping any
/// fragment at the end. With no pairs, any existing query is dropped.
pub fn build_query(target: &str, pairs: &[(String, String)], content_type: &str) -> String {
    let (target, fragment) = match target.find('#') {
        Some(i) => target.split_at(i),
        None => (target, ""),
    };
    let base = match target.find('?') {
        Some(i) => &target[..i],
        None => target,
    };

    if pairs.is_empty() {
        return format!("{base}{fragment}");
    }

    let query = pairs
        .iter()
        .map(|(name, value)| encode_pair(name, value, content_type))
        .collect::<Vec<_>>()
        .join("&");

    format!("{base}?{query}{fragment}")
}

pub(crate) fn is_text_plain(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(TEXT_PLAIN))
        .unwrap_or(false)
}

//! HTTP request header model.
//!
//! The parser fills a [`RequestHeaderIntermediate`] field by field. Once the header
//! section is complete it is frozen into a [`RequestHeader`], which adds the decoded
//! path and query parameters and never changes afterwards.

use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Raw header data exactly as it was received.
///
/// Field names keep their original case and the target URL is not decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaderIntermediate {
    pub method: String,
    pub url: String,
    pub protocol: String,
    pub version: String,
    pub fields: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl RequestHeaderIntermediate {
    /// Splits a `Cookie` field value on `;` and records every `name=value` pair.
    pub(crate) fn add_cookies(&mut self, value: &str) {
        for pair in value.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((name, value)) => self.cookies.insert(name.trim().to_owned(), value.trim().to_owned()),
                None => self.cookies.insert(pair.to_owned(), String::new()),
            };
        }
    }
}

/// The immutable request header handed to request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    method: String,
    url: String,
    protocol: String,
    version: String,
    path: String,
    query: HashMap<String, String>,
    fields: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl From<RequestHeaderIntermediate> for RequestHeader {
    fn from(raw: RequestHeaderIntermediate) -> Self {
        let (path, query) = split_target(&raw.url);

        let path = match urlencoding::decode(path) {
            Ok(decoded) => decoded.into_owned(),
            Err(e) => {
                debug!(cause = %e, path, "path is not valid utf-8 after decoding, keeping it raw");
                path.to_owned()
            }
        };

        let query = match query {
            Some(query) => parse_query(query),
            None => HashMap::new(),
        };

        Self {
            method: raw.method,
            url: raw.url,
            protocol: raw.protocol,
            version: raw.version,
            path,
            query,
            fields: raw.fields,
            cookies: raw.cookies,
        }
    }
}

impl RequestHeader {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target as received, not decoded.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The decoded path, without query string or fragment.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Looks up a header field, exact name first, then ignoring ASCII case.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .or_else(|| self.fields.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value))
            .map(String::as_str)
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }
}

impl fmt::Display for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}/{}", self.method, self.url, self.protocol, self.version)
    }
}

/// Cuts the target at the first `?` or `#`. A fragment never carries query parameters.
fn split_target(url: &str) -> (&str, Option<&str>) {
    let Some(at) = url.find(['?', '#']) else {
        return (url, None);
    };

    let (path, rest) = url.split_at(at);
    if !rest.starts_with('?') {
        return (path, None);
    }

    let query = &rest[1..];
    let query = query.split_once('#').map_or(query, |(query, _)| query);
    (path, Some(query))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => pairs.into_iter().collect(),
        Err(e) => {
            debug!(cause = %e, query, "ignoring malformed query string");
            HashMap::new()
        }
    }
}

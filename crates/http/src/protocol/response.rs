//! HTTP response header model.

use crate::protocol::Cookie;
use http::StatusCode;

/// Reason phrase for a status code, `"Unknown"` for codes without one.
pub fn status_message(code: u16) -> &'static str {
    StatusCode::from_u16(code).ok().and_then(|status| status.canonical_reason()).unwrap_or("Unknown")
}

/// The outgoing status line, header fields and cookies of a response.
///
/// A fresh header answers `HTTP/1.1 204 No Content`. Field names are compared
/// ignoring ASCII case but written out exactly as they were first set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    protocol: String,
    version: String,
    code: u16,
    message: Option<String>,
    fields: Vec<(String, String)>,
    cookies: Vec<Cookie>,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            protocol: "HTTP".to_owned(),
            version: "1.1".to_owned(),
            code: 204,
            message: None,
            fields: Vec::new(),
            cookies: Vec::new(),
        }
    }
}

impl ResponseHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Sets the status code and drops any message override.
    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.code = code;
        self.message = None;
        self
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| status_message(self.code))
    }

    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.position(name).map(|at| self.fields[at].1.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replaces the value of a field, inserting it if absent.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(at) => self.fields[at].1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Adds a value to a field, joining it to an existing value with `", "`.
    pub fn append_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(at) => {
                let existing = &mut self.fields[at].1;
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.fields.push((name, value)),
        }
        self
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|at| self.fields.remove(at).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn add_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_content() {
        let header = ResponseHeader::new();
        assert_eq!(header.code(), 204);
        assert_eq!(header.message(), "No Content");
        assert_eq!(header.protocol(), "HTTP");
        assert_eq!(header.version(), "1.1");
    }

    #[test]
    fn status_message_lookup() {
        assert_eq!(status_message(404), "Not Found");
        assert_eq!(status_message(411), "Length Required");
        assert_eq!(status_message(599), "Unknown");
    }

    #[test]
    fn set_and_append_fields() {
        let mut header = ResponseHeader::new();
        header.set_field("Content-Type", "text/plain").set_field("content-type", "text/html");
        header.append_field("Link", "<a>").append_field("link", "<b>");

        assert_eq!(header.field("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(header.field("Link"), Some("<a>, <b>"));
        assert_eq!(header.fields().count(), 2);

        assert_eq!(header.remove_field("link").as_deref(), Some("<a>, <b>"));
        assert!(!header.has_field("Link"));
    }

    #[test]
    fn set_code_resets_message_override() {
        let mut header = ResponseHeader::new();
        header.set_code(200).set_message("Fine");
        assert_eq!(header.message(), "Fine");

        header.set_code(201);
        assert_eq!(header.message(), "Created");
    }
}

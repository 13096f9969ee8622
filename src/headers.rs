//! Ordered, case-insensitive header map.
//!
//! Names are compared and merged case-insensitively, but the casing of the
//! last write is what goes out on the wire. Unlike `http::HeaderMap`, which
//! lowercases everything, this keeps `X-Requested-With` as `X-Requested-With`.
use crate::value::{Cloneable, Patch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw header block (`Name: value` lines separated by CRLF), as
    /// returned by XHR-like primitives. Lines without a `": "` separator are skipped.
    pub fn from_raw(block: &str) -> Self {
        let mut headers = Headers::new();
        for line in block.split("\r\n") {
            if let Some((name, value)) = line.split_once(": ") {
                if !name.is_empty() {
                    headers.insert(name, value);
                }
            }
        }
        headers
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Inserts or replaces a header. Last write wins, including the casing of the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        map.iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect()
    }
}

/// Header edits applied in order on top of an existing map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadersOverrides {
    edits: Vec<(String, Patch<String>)>,
}

impl HeadersOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.edits.push((name.into(), Patch::Set(value.into())));
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.edits.push((name.into(), Patch::Clear));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn merge(mut self, later: HeadersOverrides) -> Self {
        self.edits.extend(later.edits);
        self
    }
}

impl Cloneable for Headers {
    type Overrides = HeadersOverrides;

    fn clone_with(&self, overrides: HeadersOverrides) -> Self {
        let mut headers = self.clone();
        for (name, edit) in overrides.edits {
            match edit {
                Patch::Keep => {}
                Patch::Set(value) => headers.insert(name, value),
                Patch::Clear => {
                    headers.remove(&name);
                }
            }
        }
        headers
    }
}

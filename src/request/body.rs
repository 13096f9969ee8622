//! Request bodies.
//!
//! A body is one of three closed shapes: named form fields (text or file
//! parts), a JSON document, or opaque bytes that go out untouched.
use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Named fields in declaration order.
    Form(Vec<(String, FormValue)>),
    /// A structured document, serialized according to the content type.
    Json(serde_json::Value),
    /// Already encoded by the caller. Bypasses every encoder.
    Binary(Vec<u8>),
}

impl Body {
    /// Text-only form body.
    pub fn form<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), FormValue::Text(v.into())))
                .collect(),
        )
    }

    /// Appends a field to a form body. Other bodies are turned into an empty form first.
    pub fn field(self, name: impl Into<String>, value: FormValue) -> Self {
        let mut fields = match self {
            Body::Form(fields) => fields,
            _ => Vec::new(),
        };
        fields.push((name.into(), value));
        Body::Form(fields)
    }

    /// Flattens the body into `name=value` text pairs for query strings and
    /// text encodings. File parts contribute their file name, JSON objects their
    /// top-level members (strings unquoted). Binary bodies have no pairs.
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            Body::Form(fields) => fields
                .iter()
                .map(|(name, value)| {
                    let text = match value {
                        FormValue::Text(text) => text.clone(),
                        FormValue::File(file) => file.filename.clone(),
                    };
                    (name.clone(), text)
                })
                .collect(),
            Body::Json(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(name, value)| {
                    let text = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), text)
                })
                .collect(),
            Body::Json(_) | Body::Binary(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(FilePart),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<FilePart> for FormValue {
    fn from(value: FilePart) -> Self {
        FormValue::File(value)
    }
}

/// Reads the raw bytes of a file part. Reads may suspend.
pub trait ContentSource: Send + Sync {
    fn read(&self) -> BoxFuture<'static, io::Result<Vec<u8>>>;
}

/// A binary form field: file name, MIME type and where to read it from.
#[derive(Clone)]
pub struct FilePart {
    pub filename: String,
    pub mime: String,
    source: Arc<dyn ContentSource>,
}

impl FilePart {
    pub fn new(filename: impl Into<String>, mime: impl Into<String>, source: Arc<dyn ContentSource>) -> Self {
        Self {
            filename: filename.into(),
            mime: mime.into(),
            source,
        }
    }

    /// File part backed by an in-memory buffer.
    pub fn from_bytes(filename: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(filename, mime, Arc::new(MemoryContent(Arc::from(bytes))))
    }

    /// File part read from disk when the body is encoded.
    pub fn from_path(filename: impl Into<String>, mime: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(filename, mime, Arc::new(FileContent(path.into())))
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        self.source.read().await
    }
}

impl PartialEq for FilePart {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename && self.mime == other.mime && Arc::ptr_eq(&self.source, &other.source)
    }
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

struct MemoryContent(Arc<[u8]>);

impl ContentSource for MemoryContent {
    fn read(&self) -> BoxFuture<'static, io::Result<Vec<u8>>> {
        let bytes = self.0.clone();
        Box::pin(async move { Ok(bytes.to_vec()) })
    }
}

struct FileContent(PathBuf);

impl ContentSource for FileContent {
    fn read(&self) -> BoxFuture<'static, io::Result<Vec<u8>>> {
        let path = self.0.clone();
        Box::pin(async move { tokio::fs::read(path).await })
    }
}

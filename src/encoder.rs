//! Content-type driven body encoding.
//!
//! The `content-type` the caller declared picks the encoder:
//! - `application/json` writes the body as JSON text;
//! - `multipart/form-data` builds a boundary-delimited body, reading file
//!   parts concurrently and joining them in declaration order;
//! - anything else joins `name=value` pairs (`\r\n` for `text/plain`, `&`
//!   otherwise).
//!
//! [`Body::Binary`] bypasses all of them. The content type that ends up on
//! the wire is returned alongside the bytes, since JSON and multipart rewrite it.
use crate::headers::Headers;
use crate::request::{Body, FormValue};
use crate::uri::{encode_pair, is_text_plain};
use futures::future::try_join_all;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// Used when the caller declares no content type.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

const BOUNDARY_PREFIX: &str = "---------------------------";

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Cannot serialize body as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field {0:?} holds a file and cannot be sent as JSON")]
    FileInJson(String),

    #[error("Cannot read file part {field:?}: {source}")]
    Read { field: String, source: io::Error },
}

/// Encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    /// Value for the `content-type` header, `None` to leave it unset.
    pub content_type: Option<String>,
    /// Bytes to send, `None` for an empty send.
    pub bytes: Option<Vec<u8>>,
}

/// Declared content type, or the JSON default.
pub fn content_type_of(headers: &Headers) -> String {
    headers
        .get("content-type")
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Encodes `body` for the given headers.
pub async fn encode(headers: &Headers, body: Option<&Body>) -> Result<EncodedBody, EncodeError> {
    let declared = content_type_of(headers);

    let Some(body) = body else {
        return Ok(EncodedBody { content_type: Some(declared), bytes: None });
    };

    if let Body::Binary(bytes) = body {
        return Ok(EncodedBody {
            content_type: headers.get("content-type").map(str::to_string),
            bytes: Some(bytes.clone()),
        });
    }

    match BodyEncoder::for_content_type(&declared) {
        BodyEncoder::Json(encoder) => Ok(EncodedBody {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            bytes: Some(encoder.encode(body)?),
        }),
        BodyEncoder::FormData(encoder) => Ok(EncodedBody {
            content_type: Some(encoder.content_type()),
            bytes: Some(encoder.encode(body).await?),
        }),
        BodyEncoder::Text(encoder) => Ok(EncodedBody {
            content_type: Some(declared),
            bytes: Some(encoder.encode(body).into_bytes()),
        }),
    }
}

pub enum BodyEncoder {
    Json(JsonEncoder),
    FormData(FormDataEncoder),
    Text(TextEncoder),
}

impl BodyEncoder {
    pub fn for_content_type(content_type: &str) -> Self {
        let lower = content_type.to_ascii_lowercase();
        if lower.contains("application/json") {
            BodyEncoder::Json(JsonEncoder)
        } else if lower.contains("multipart/form-data") {
            BodyEncoder::FormData(FormDataEncoder::new())
        } else {
            BodyEncoder::Text(TextEncoder::new(content_type))
        }
    }
}

pub struct JsonEncoder;

impl JsonEncoder {
    pub fn encode(&self, body: &Body) -> Result<Vec<u8>, EncodeError> {
        match body {
            Body::Json(value) => Ok(serde_json::to_vec(value)?),
            Body::Form(fields) => {
                let mut map = serde_json::Map::new();
                for (name, value) in fields {
                    match value {
                        FormValue::Text(text) => {
                            map.insert(name.clone(), serde_json::Value::String(text.clone()));
                        }
                        FormValue::File(_) => return Err(EncodeError::FileInJson(name.clone())),
                    }
                }
                Ok(serde_json::to_vec(&map)?)
            }
            Body::Binary(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Multipart encoder. The boundary is fixed for the lifetime of the encoder.
pub struct FormDataEncoder {
    boundary: String,
}

impl FormDataEncoder {
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::with_boundary(format!("{BOUNDARY_PREFIX}{millis:x}"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into() }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub async fn encode(&self, body: &Body) -> Result<Vec<u8>, EncodeError> {
        let fields: Vec<(String, FormValue)> = match body {
            Body::Form(fields) => fields.clone(),
            other => other
                .pairs()
                .into_iter()
                .map(|(name, value)| (name, FormValue::Text(value)))
                .collect(),
        };

        let parts = try_join_all(fields.iter().map(|(name, value)| encode_part(name, value))).await?;

        let delimiter = format!("--{}\r\n", self.boundary).into_bytes();
        let mut out = delimiter.clone();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&delimiter);
            }
            out.extend_from_slice(part);
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Ok(out)
    }
}

impl Default for FormDataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

async fn encode_part(name: &str, value: &FormValue) -> Result<Vec<u8>, EncodeError> {
    match value {
        FormValue::Text(text) => {
            Ok(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{text}\r\n").into_bytes())
        }
        FormValue::File(file) => {
            let content = file.read().await.map_err(|source| EncodeError::Read {
                field: name.to_string(),
                source,
            })?;
            let mut part = format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.filename, file.mime
            )
            .into_bytes();
            part.extend_from_slice(&content);
            part.extend_from_slice(b"\r\n");
            Ok(part)
        }
    }
}

/// `name=value` pairs, escaped for `text/plain` and form-urlencoded otherwise.
pub struct TextEncoder {
    content_type: String,
}

impl TextEncoder {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self { content_type: content_type.into() }
    }

    pub fn encode(&self, body: &Body) -> String {
        let separator = if is_text_plain(&self.content_type) { "\r\n" } else { "&" };
        body.pairs()
            .iter()
            .map(|(name, value)| encode_pair(name, value, &self.content_type))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

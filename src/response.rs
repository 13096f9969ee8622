//! Response value model.
//!
//! Built once by the transport when a request settles, then optionally
//! derived from by response-transforming interceptors on the way back out.
//! Successful outcomes are [`Response`]s, everything else is an
//! [`ErrorResponse`] delivered through the future's error channel.
use crate::headers::{Headers, HeadersOverrides};
use crate::request::ResponseType;
use crate::value::{Cloneable, Patch};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Future returned by transports and pipelines.
pub type ResponseFuture = BoxFuture<'static, Result<Response, ErrorResponse>>;

/// Response body, either raw as delivered by the primitive or parsed.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Text(text) => text.is_empty(),
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Json(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    response_type: ResponseType,
    url: Option<String>,
    body: Payload,
}

impl Response {
    pub fn new(status: u16, body: Payload) -> Self {
        Self {
            status,
            status_text: "OK".to_string(),
            headers: Headers::new(),
            response_type: ResponseType::default(),
            url: None,
            body,
        }
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn body(&self) -> &Payload {
        &self.body
    }

    /// Deserializes a JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.body {
            Payload::Json(value) => serde_json::from_value(value.clone()),
            Payload::Text(text) => serde_json::from_str(text),
            Payload::Bytes(bytes) => serde_json::from_slice(bytes),
            Payload::Empty => serde_json::from_value(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseOverrides {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub headers: HeadersOverrides,
    pub response_type: Option<ResponseType>,
    pub url: Patch<String>,
    pub body: Option<Payload>,
}

impl Cloneable for Response {
    type Overrides = ResponseOverrides;

    fn clone_with(&self, o: ResponseOverrides) -> Self {
        Self {
            status: o.status.unwrap_or(self.status),
            status_text: o.status_text.unwrap_or_else(|| self.status_text.clone()),
            headers: self.headers.clone_with(o.headers),
            response_type: o.response_type.unwrap_or(self.response_type),
            url: o.url.apply(&self.url),
            body: o.body.unwrap_or_else(|| self.body.clone()),
        }
    }
}

/// Why a request failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The body was declared JSON but could not be parsed.
    Parse,
    /// Network failure, timeout, or a body that could not be encoded.
    Transport,
    /// Well-formed response with a status outside 2xx.
    Server,
    /// Cancelled through `abort`.
    Aborted,
}

/// What an [`ErrorResponse`] carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// The response body, parsed when possible.
    Payload(Payload),
    /// JSON parsing failed; `text` is the body as received.
    Parse { error: String, text: String },
    /// Description of a failure below HTTP.
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{status} {status_text} ({kind:?})")]
pub struct ErrorResponse {
    kind: ErrorKind,
    status: u16,
    status_text: String,
    headers: Headers,
    url: Option<String>,
    error: ErrorBody,
}

pub(crate) const UNKNOWN_ERROR: &str = "Unknown Error";

impl ErrorResponse {
    pub fn new(kind: ErrorKind, status: u16, error: ErrorBody) -> Self {
        Self {
            kind,
            status,
            status_text: UNKNOWN_ERROR.to_string(),
            headers: Headers::new(),
            url: None,
            error,
        }
    }

    /// Failure below HTTP, without any response metadata.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, 0, ErrorBody::Transport(message.into()))
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, 0, ErrorBody::Transport("Request aborted".to_string()))
    }

    pub fn with_status_text(mut self, status_text: Option<String>) -> Self {
        self.status_text = status_text
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn error(&self) -> &ErrorBody {
        &self.error
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorResponseOverrides {
    pub kind: Option<ErrorKind>,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub headers: HeadersOverrides,
    pub url: Patch<String>,
    pub error: Option<ErrorBody>,
}

impl Cloneable for ErrorResponse {
    type Overrides = ErrorResponseOverrides;

    fn clone_with(&self, o: ErrorResponseOverrides) -> Self {
        Self {
            kind: o.kind.unwrap_or(self.kind),
            status: o.status.unwrap_or(self.status),
            status_text: o.status_text.unwrap_or_else(|| self.status_text.clone()),
            headers: self.headers.clone_with(o.headers),
            url: o.url.apply(&self.url),
            error: o.error.unwrap_or_else(|| self.error.clone()),
        }
    }
}

/// Progress of an upload or download with a known total size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    loaded: u64,
    total: u64,
    percent_completed: f64,
    #[serde(rename = "type")]
    event_type: String,
}

impl ProgressEvent {
    /// Returns `None` when the total is unknown or zero; such events are not surfaced.
    pub fn computed(loaded: u64, total: Option<u64>, event_type: impl Into<String>) -> Option<Self> {
        let total = total.filter(|t| *t > 0)?;
        Some(Self {
            loaded,
            total,
            percent_completed: loaded as f64 / total as f64,
            event_type: event_type.into(),
        })
    }

    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Fraction in `0.0..=1.0`.
    pub fn percent_completed(&self) -> f64 {
        self.percent_completed
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressOverrides {
    pub loaded: Option<u64>,
    pub total: Option<u64>,
    pub event_type: Option<String>,
}

impl Cloneable for ProgressEvent {
    type Overrides = ProgressOverrides;

    /// The percentage is always recomputed from the resulting `loaded`/`total`.
    fn clone_with(&self, o: ProgressOverrides) -> Self {
        let loaded = o.loaded.unwrap_or(self.loaded);
        let total = o.total.unwrap_or(self.total);
        Self {
            loaded,
            total,
            percent_completed: if total > 0 { loaded as f64 / total as f64 } else { 0.0 },
            event_type: o.event_type.unwrap_or_else(|| self.event_type.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_emptiness() {
        assert!(Payload::Empty.is_empty());
        assert!(Payload::Text(String::new()).is_empty());
        assert!(!Payload::Text("x".into()).is_empty());
        assert!(Payload::Bytes(vec![]).is_empty());
        assert!(!Payload::Json(json!(null)).is_empty());
    }

    #[test]
    fn response_clone_overrides_only_named_fields() {
        let original = Response::new(200, Payload::Json(json!({"id": 1})))
            .with_headers(Headers::new().with("ETag", "abc"))
            .with_url(Some("https://a.test/x".into()));

        let derived = original.clone_with(ResponseOverrides {
            status: Some(203),
            url: Patch::Clear,
            ..Default::default()
        });

        assert_eq!(derived.status(), 203);
        assert_eq!(derived.url(), None);
        assert_eq!(derived.headers().get("etag"), Some("abc"));
        assert_eq!(derived.body(), original.body());
        assert_eq!(original.status(), 200);
        assert_eq!(original.clone_with(ResponseOverrides::default()), original);
    }

    #[test]
    fn response_json_reads_any_body_shape() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Item {
            id: u32,
        }
        let parsed = Response::new(200, Payload::Json(json!({"id": 4})));
        let text = Response::new(200, Payload::Text("{\"id\":5}".into()));
        assert_eq!(parsed.json::<Item>().unwrap(), Item { id: 4 });
        assert_eq!(text.json::<Item>().unwrap(), Item { id: 5 });
    }

    #[test]
    fn error_response_defaults_status_text() {
        let err = ErrorResponse::transport("connection reset").with_status_text(None);
        assert_eq!(err.status_text(), "Unknown Error");
        assert_eq!(err.kind(), ErrorKind::Transport);

        let err = err.with_status_text(Some(String::new()));
        assert_eq!(err.status_text(), "Unknown Error");
    }

    #[test]
    fn error_response_clone_keeps_payload() {
        let err = ErrorResponse::new(ErrorKind::Server, 404, ErrorBody::Payload(Payload::Text("nope".into())))
            .with_status_text(Some("Not Found".into()));
        let derived = err.clone_with(ErrorResponseOverrides {
            headers: HeadersOverrides::new().set("X-Retry", "no"),
            ..Default::default()
        });
        assert_eq!(derived.error(), err.error());
        assert_eq!(derived.status_text(), "Not Found");
        assert_eq!(derived.headers().get("x-retry"), Some("no"));
        assert!(err.headers().is_empty());
        assert_eq!(err.to_string(), "404 Not Found (Server)");
    }

    #[test]
    fn progress_requires_a_computable_total() {
        assert!(ProgressEvent::computed(10, None, "download").is_none());
        assert!(ProgressEvent::computed(10, Some(0), "download").is_none());

        let ev = ProgressEvent::computed(25, Some(100), "upload").unwrap();
        assert_eq!(ev.percent_completed(), 0.25);
        assert_eq!(ev.event_type(), "upload");

        let later = ev.clone_with(ProgressOverrides { loaded: Some(50), ..Default::default() });
        assert_eq!(later.percent_completed(), 0.5);
        assert_eq!(ev.loaded(), 25);
    }

    #[test]
    fn progress_serializes_with_type_field() {
        let ev = ProgressEvent::computed(1, Some(2), "download").unwrap();
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["type"], "download");
        assert_eq!(value["percent_completed"], 0.5);
    }
}

//! Request value model.
//!
//! A [`Request`] is built once by the caller, then only ever derived from via
//! [`Cloneable::clone_with`]. Interceptors that want a different URL, extra
//! headers or another response type produce a new request and pass that on.
mod body;

pub use body::{Body, ContentSource, FilePart, FormValue};

use crate::client::RequestInterceptor;
use crate::errors::ClientError;
use crate::headers::{Headers, HeadersOverrides};
use crate::response::ProgressEvent;
use crate::value::{later, Cloneable, Patch};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// True for verbs whose body travels on the wire. For the others a
    /// structured body is moved into the query string instead.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl FromStr for Method {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            // "OPTION" shows up in older callers
            "OPTIONS" | "OPTION" => Ok(Method::Options),
            _ => Err(ClientError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
            Method::Head => http::Method::HEAD,
            Method::Options => http::Method::OPTIONS,
        }
    }
}

/// How the caller wants the response body handed back.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Blob,
    ArrayBuffer,
    Document,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Json => "json",
            ResponseType::Text => "text",
            ResponseType::Blob => "blob",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Document => "document",
        }
    }

    /// Textual types are delivered as strings by the primitive, the rest as bytes.
    pub fn is_textual(&self) -> bool {
        matches!(self, ResponseType::Json | ResponseType::Text | ResponseType::Document)
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseType::Json),
            "text" | "" => Ok(ResponseType::Text),
            "blob" => Ok(ResponseType::Blob),
            "arraybuffer" => Ok(ResponseType::ArrayBuffer),
            "document" => Ok(ResponseType::Document),
            other => Err(format!("unknown response type {other:?}")),
        }
    }
}

/// Shared callback handle. Cloning shares the same closure.
pub struct Callback<A>(Arc<dyn Fn(A) + Send + Sync>);

impl<A> Callback<A> {
    pub fn new<F: Fn(A) + Send + Sync + 'static>(f: F) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, arg: A) {
        (self.0)(arg)
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A> PartialEq for Callback<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0))
    }
}

pub type ProgressCallback = Callback<ProgressEvent>;
pub type TimeoutCallback = Callback<()>;

/// Per-request options. Built with the chained setters, then immutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    headers: Headers,
    timeout: Option<Duration>,
    with_credentials: Option<bool>,
    response_type: Option<ResponseType>,
    on_progress: Option<ProgressCallback>,
    on_timeout: Option<TimeoutCallback>,
    interceptors: Vec<RequestInterceptor>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_credentials(mut self, on: bool) -> Self {
        self.with_credentials = Some(on);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn on_progress<F: Fn(ProgressEvent) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_progress = Some(Callback::new(f));
        self
    }

    pub fn on_timeout<F: Fn(()) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_timeout = Some(Callback::new(f));
        self
    }

    pub fn interceptor(mut self, interceptor: RequestInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn credentials(&self) -> bool {
        self.with_credentials.unwrap_or(false)
    }

    /// The credentials flag, if the request chose one.
    pub fn declared_credentials(&self) -> Option<bool> {
        self.with_credentials
    }

    pub fn declared_response_type(&self) -> Option<ResponseType> {
        self.response_type
    }

    pub fn progress_callback(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    pub fn timeout_callback(&self) -> Option<&TimeoutCallback> {
        self.on_timeout.as_ref()
    }

    pub fn interceptors(&self) -> &[RequestInterceptor] {
        &self.interceptors
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsOverrides {
    pub headers: HeadersOverrides,
    pub timeout: Patch<Duration>,
    pub with_credentials: Option<bool>,
    pub response_type: Patch<ResponseType>,
    pub on_progress: Patch<ProgressCallback>,
    pub on_timeout: Patch<TimeoutCallback>,
    pub interceptors: Option<Vec<RequestInterceptor>>,
}

impl OptionsOverrides {
    pub fn merge(self, later_overrides: OptionsOverrides) -> Self {
        Self {
            headers: self.headers.merge(later_overrides.headers),
            timeout: self.timeout.then(later_overrides.timeout),
            with_credentials: later(self.with_credentials, later_overrides.with_credentials),
            response_type: self.response_type.then(later_overrides.response_type),
            on_progress: self.on_progress.then(later_overrides.on_progress),
            on_timeout: self.on_timeout.then(later_overrides.on_timeout),
            interceptors: later(self.interceptors, later_overrides.interceptors),
        }
    }
}

impl Cloneable for RequestOptions {
    type Overrides = OptionsOverrides;

    fn clone_with(&self, o: OptionsOverrides) -> Self {
        Self {
            headers: self.headers.clone_with(o.headers),
            timeout: o.timeout.apply(&self.timeout),
            with_credentials: o.with_credentials.or(self.with_credentials),
            response_type: o.response_type.apply(&self.response_type),
            on_progress: o.on_progress.apply(&self.on_progress),
            on_timeout: o.on_timeout.apply(&self.on_timeout),
            interceptors: o.interceptors.unwrap_or_else(|| self.interceptors.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: String,
    options: RequestOptions,
    body: Option<Body>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            options: RequestOptions::default(),
            body: None,
        }
    }

    /// Builds a request from a method name, case-insensitively.
    pub fn parse(method: &str, url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self::new(method.parse()?, url))
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// `content-type` declared by the caller, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.options.headers.get("content-type")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub method: Option<Method>,
    pub url: Option<String>,
    pub options: OptionsOverrides,
    pub body: Patch<Body>,
}

impl RequestOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers = self.options.headers.set(name, value);
        self
    }

    pub fn remove_header(mut self, name: impl Into<String>) -> Self {
        self.options.headers = self.options.headers.remove(name);
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Patch<Duration>>) -> Self {
        self.options.timeout = timeout.into();
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.options.response_type = Patch::Set(response_type);
        self
    }

    pub fn with_credentials(mut self, on: bool) -> Self {
        self.options.with_credentials = Some(on);
        self
    }

    pub fn body(mut self, body: impl Into<Patch<Body>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn merge(self, later_overrides: RequestOverrides) -> Self {
        Self {
            method: later(self.method, later_overrides.method),
            url: later(self.url, later_overrides.url),
            options: self.options.merge(later_overrides.options),
            body: self.body.then(later_overrides.body),
        }
    }
}

impl Cloneable for Request {
    type Overrides = RequestOverrides;

    fn clone_with(&self, o: RequestOverrides) -> Self {
        Self {
            method: o.method.unwrap_or(self.method),
            url: o.url.unwrap_or_else(|| self.url.clone()),
            options: self.options.clone_with(o.options),
            body: o.body.apply(&self.body),
        }
    }
}

impl From<Duration> for Patch<Duration> {
    fn from(value: Duration) -> Self {
        Patch::Set(value)
    }
}

impl From<Body> for Patch<Body> {
    fn from(value: Body) -> Self {
        Patch::Set(value)
    }
}

//! Transport layer.
//!
//! A [`Transfer`] is the raw byte-transfer primitive (an XHR-like object): it
//! is opened, configured, sent, and reports what happens through events.
//! [`HttpBackend`] drives exactly one transfer for one request and turns its
//! events into a single [`Response`] or [`ErrorResponse`].
//!
//! # Concurrency
//!
//! A backend is not re-entrant. Calling [`Backend::handle`] again before the
//! previous request settled is a caller error; use one backend per in-flight
//! request (the [`Client`](crate::client::Client) does this for you).
//!
//! The pending future is settled by whichever of load, error, timeout or abort
//! arrives first. The settle handle lives behind a mutex and is taken exactly
//! once, so later events are dropped.
pub mod memory;
pub mod network;

use crate::encoder;
use crate::headers::Headers;
use crate::request::{Method, ProgressCallback, Request, ResponseType, TimeoutCallback};
use crate::response::{ErrorBody, ErrorKind, ErrorResponse, Payload, ProgressEvent, Response, ResponseFuture};
use futures::channel::oneshot;
use futures::FutureExt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Handle for a registered transfer listener.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Upload,
    Download,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Upload => "upload",
            Phase::Download => "download",
        }
    }
}

/// Events reported by a transfer. Progress may fire any number of times
/// before one of the terminal events.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress { phase: Phase, loaded: u64, total: Option<u64> },
    Load,
    Error(String),
    Timeout,
    Abort,
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress { .. })
    }
}

pub type Listener = Arc<dyn Fn(&TransferEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer has not been opened")]
    NotOpen,

    #[error("Transfer was already sent")]
    AlreadySent,

    #[error("Cannot start transfer: {0}")]
    Unavailable(String),
}

/// Capability surface of the byte-transfer primitive.
///
/// All methods take `&self`; implementations keep their state behind interior
/// mutability since listeners call back into the getters. Listeners must be
/// invoked without holding any internal lock.
pub trait Transfer: Send + Sync {
    fn open(&self, method: Method, url: &str) -> Result<(), TransferError>;
    fn set_request_header(&self, name: &str, value: &str);
    fn set_timeout(&self, timeout: Option<Duration>);
    fn set_with_credentials(&self, on: bool);
    fn set_response_type(&self, response_type: ResponseType);
    fn send(&self, body: Option<Vec<u8>>) -> Result<(), TransferError>;
    /// Cancels the transfer. Reports [`TransferEvent::Abort`] if it was still running.
    fn abort(&self);
    /// True once a terminal event has been reported.
    fn is_done(&self) -> bool;

    fn status(&self) -> u16;
    fn status_text(&self) -> Option<String>;
    fn response_url(&self) -> Option<String>;
    fn response_headers(&self) -> Headers;
    fn response(&self) -> Payload;

    fn add_listener(&self, listener: Listener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Request handler at the end of a client pipeline.
pub trait Backend: Send + Sync {
    /// Issues `request`. Every failure is delivered through the returned future.
    fn handle(&self, request: Request) -> ResponseFuture;
    /// Base host used to resolve relative URLs.
    fn host(&self) -> Option<&str>;
    /// Cancels the in-flight request. Idempotent.
    fn abort(&self);
    /// Releases the transfer. The backend refuses new requests afterwards.
    fn on_destroy(&self);
}

type Outcome = Result<Response, ErrorResponse>;

#[derive(Default)]
struct State {
    listener: Option<ListenerId>,
    settle: Option<oneshot::Sender<Outcome>>,
    aborted: bool,
    destroyed: bool,
}

/// [`Backend`] over a single [`Transfer`].
pub struct HttpBackend<T: Transfer> {
    host: Option<String>,
    transfer: Arc<T>,
    state: Arc<Mutex<State>>,
}

impl<T: Transfer + 'static> HttpBackend<T> {
    pub fn new(transfer: Arc<T>, host: Option<String>) -> Self {
        Self {
            host,
            transfer,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn transfer(&self) -> &Arc<T> {
        &self.transfer
    }

    async fn start(transfer: Arc<T>, state: Arc<Mutex<State>>, request: Request) -> Result<(), ErrorResponse> {
        if state.lock().unwrap().aborted {
            return Ok(());
        }

        let options = request.options();
        let response_type = options.declared_response_type().unwrap_or_default();

        transfer
            .open(request.method(), request.url())
            .map_err(|e| ErrorResponse::transport(e.to_string()).with_url(Some(request.url().to_string())))?;
        transfer.set_with_credentials(options.credentials());
        transfer.set_timeout(options.timeout_value());
        transfer.set_response_type(response_type);

        // content-type is decided by the encoder
        for (name, value) in options.header_map().iter() {
            if !name.eq_ignore_ascii_case("content-type") {
                transfer.set_request_header(name, value);
            }
        }

        {
            let mut guard = state.lock().unwrap();
            if guard.aborted {
                return Ok(());
            }
            let listener = event_listener(
                Arc::downgrade(&transfer),
                Arc::downgrade(&state),
                response_type,
                options.progress_callback().cloned(),
                options.timeout_callback().cloned(),
            );
            guard.listener = Some(transfer.add_listener(listener));
        }

        let body = if request.method().carries_body() { request.body() } else { None };
        let encoded = encoder::encode(options.header_map(), body).await.map_err(|e| {
            log::warn!("HttpBackend: cannot encode body for {}: {e}", request.url());
            ErrorResponse::transport(e.to_string()).with_url(Some(request.url().to_string()))
        })?;

        if let Some(content_type) = &encoded.content_type {
            transfer.set_request_header("Content-Type", content_type);
        }

        if state.lock().unwrap().aborted {
            return Ok(());
        }

        log::debug!("HttpBackend: sending {} {}", request.method(), request.url());
        transfer
            .send(encoded.bytes)
            .map_err(|e| ErrorResponse::transport(e.to_string()).with_url(Some(request.url().to_string())))
    }

    fn detach(&self) {
        detach(&*self.transfer, &self.state);
    }
}

/// Unsubscribes the backend's listener from `transfer`, if one is attached.
fn detach<T: Transfer + ?Sized>(transfer: &T, state: &Mutex<State>) {
    let listener = state.lock().unwrap().listener.take();
    if let Some(id) = listener {
        transfer.remove_listener(id);
    }
}

impl<T: Transfer + 'static> Backend for HttpBackend<T> {
    fn handle(&self, request: Request) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap();
            if state.aborted || state.destroyed {
                return futures::future::ready(Err(ErrorResponse::aborted())).boxed();
            }
            state.settle = Some(tx);
        }

        let transfer = self.transfer.clone();
        let state = self.state.clone();
        async move {
            if let Err(error) = Self::start(transfer.clone(), state.clone(), request).await {
                settle(&state, Err(error));
            }
            let outcome = rx.await.unwrap_or_else(|_| Err(ErrorResponse::aborted()));
            detach(&*transfer, &state);
            outcome
        }
        .boxed()
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn abort(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.aborted {
                return;
            }
            state.aborted = true;
        }

        log::debug!("HttpBackend: aborting request");
        self.detach();
        if !self.transfer.is_done() {
            self.transfer.abort();
        }
        settle(&self.state, Err(ErrorResponse::aborted()));
    }

    fn on_destroy(&self) {
        self.abort();
        self.state.lock().unwrap().destroyed = true;
    }
}

/// Hands `outcome` to the pending future unless another event got there first.
fn settle(state: &Mutex<State>, outcome: Outcome) -> bool {
    let sender = state.lock().unwrap().settle.take();
    match sender {
        Some(tx) => tx.send(outcome).is_ok(),
        None => false,
    }
}

fn event_listener<T: Transfer + 'static>(
    transfer: Weak<T>,
    state: Weak<Mutex<State>>,
    response_type: ResponseType,
    on_progress: Option<ProgressCallback>,
    on_timeout: Option<TimeoutCallback>,
) -> Listener {
    Arc::new(move |event: &TransferEvent| {
        let (Some(transfer), Some(state)) = (transfer.upgrade(), state.upgrade()) else {
            return;
        };

        match event {
            TransferEvent::Progress { phase, loaded, total } => {
                if let Some(callback) = &on_progress {
                    if let Some(progress) = ProgressEvent::computed(*loaded, *total, phase.as_str()) {
                        callback.call(progress);
                    }
                }
            }
            TransferEvent::Load => {
                settle(&state, normalize(Completion::read(&*transfer), response_type));
            }
            TransferEvent::Error(message) => {
                log::warn!("HttpBackend: transfer failed: {message}");
                let completion = Completion::read(&*transfer);
                settle(&state, Err(completion.interrupted(ErrorKind::Transport, message)));
            }
            TransferEvent::Timeout => {
                log::warn!("HttpBackend: transfer timed out");
                if let Some(callback) = &on_timeout {
                    callback.call(());
                }
                let completion = Completion::read(&*transfer);
                settle(&state, Err(completion.interrupted(ErrorKind::Transport, "Request timed out")));
            }
            TransferEvent::Abort => {
                let completion = Completion::read(&*transfer);
                settle(&state, Err(completion.interrupted(ErrorKind::Aborted, "Request aborted")));
            }
        }
    })
}

/// What the primitive reported when it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
    pub status: u16,
    pub status_text: Option<String>,
    pub url: Option<String>,
    pub headers: Headers,
    pub body: Payload,
}

impl Completion {
    /// Reads the response fields of `transfer`. The URL falls back to the
    /// `X-Request-URL` header when the primitive does not expose one.
    pub fn read<T: Transfer + ?Sized>(transfer: &T) -> Self {
        let headers = transfer.response_headers();
        let url = transfer
            .response_url()
            .filter(|u| !u.is_empty())
            .or_else(|| headers.get("X-Request-URL").map(str::to_string));

        Self {
            status: transfer.status(),
            status_text: transfer.status_text(),
            url,
            headers,
            body: transfer.response(),
        }
    }

    fn interrupted(self, kind: ErrorKind, message: &str) -> ErrorResponse {
        ErrorResponse::new(kind, self.status, ErrorBody::Transport(message.to_string()))
            .with_status_text(self.status_text)
            .with_headers(self.headers)
            .with_url(self.url)
    }
}

const XSSI_PREFIX: &str = ")]}'";

/// Strips an anti-XSSI prefix (`)]}'`, an optional `,`, then a newline).
pub fn strip_xssi(text: &str) -> &str {
    let Some(rest) = text.strip_prefix(XSSI_PREFIX) else {
        return text;
    };
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    rest.strip_prefix('\n').unwrap_or(text)
}

fn parse_json(text: &str) -> serde_json::Result<Payload> {
    let stripped = strip_xssi(text);
    if stripped.trim().is_empty() {
        return Ok(Payload::Empty);
    }
    serde_json::from_str(stripped).map(Payload::Json)
}

/// Turns a completed transfer into the request's outcome.
///
/// - status 0 with a body counts as 200, status 0 without one stays a failure;
/// - a JSON response that does not parse fails with [`ErrorKind::Parse`] even
///   when the status was 2xx;
/// - a non-2xx response keeps its raw body if it is not JSON.
pub fn normalize(completion: Completion, response_type: ResponseType) -> Result<Response, ErrorResponse> {
    let Completion {
        mut status,
        status_text,
        url,
        headers,
        mut body,
    } = completion;

    if status == 0 && !body.is_empty() {
        status = 200;
    }
    let ok = (200..300).contains(&status);

    if response_type == ResponseType::Json {
        if let Payload::Text(text) = &body {
            match parse_json(text) {
                Ok(parsed) => body = parsed,
                Err(e) if ok => {
                    log::warn!("HttpBackend: invalid JSON from {}: {e}", url.as_deref().unwrap_or("?"));
                    let error = ErrorBody::Parse {
                        error: e.to_string(),
                        text: text.clone(),
                    };
                    return Err(ErrorResponse::new(ErrorKind::Parse, status, error)
                        .with_status_text(status_text)
                        .with_headers(headers)
                        .with_url(url));
                }
                Err(_) => {}
            }
        }
    }

    if ok {
        let status_text = status_text.filter(|s| !s.is_empty()).unwrap_or_else(|| "OK".to_string());
        return Ok(Response::new(status, body)
            .with_status_text(status_text)
            .with_headers(headers)
            .with_response_type(response_type)
            .with_url(url));
    }

    let kind = if status == 0 { ErrorKind::Transport } else { ErrorKind::Server };
    Err(ErrorResponse::new(kind, status, ErrorBody::Payload(body))
        .with_status_text(status_text)
        .with_headers(headers)
        .with_url(url))
}

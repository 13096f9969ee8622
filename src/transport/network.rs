//! Network transfer over `reqwest`.
//!
//! `send` spawns the request on the current tokio runtime. The body is
//! buffered chunk by chunk so download progress can be reported, and the
//! whole exchange races a cancellation token that `abort` trips.
//!
//! The request body goes out as one buffer, so upload progress is a single
//! event reported once the server has answered.
//!
//! Cookies only persist across requests whose transfers share a
//! [`Clients`] pair. A transfer made with [`ReqwestTransfer::new`] builds its
//! own client and forgets its cookies when it is done.
use crate::headers::Headers;
use crate::request::{Method, ResponseType};
use crate::response::Payload;
use crate::transport::{Listener, ListenerId, Phase, Transfer, TransferError, TransferEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Inner {
    request: Option<(Method, String)>,
    headers: Headers,
    timeout: Option<Duration>,
    with_credentials: bool,
    response_type: ResponseType,
    sent: bool,
    done: bool,
    status: u16,
    status_text: Option<String>,
    url: Option<String>,
    response_headers: Headers,
    body: Payload,
    listeners: Vec<(ListenerId, Listener)>,
}

/// `reqwest` clients shared between transfers: one that keeps a cookie
/// store for credentialed requests and one that does not.
#[derive(Clone)]
pub struct Clients {
    plain: reqwest::Client,
    credentialed: reqwest::Client,
}

impl Clients {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            plain: reqwest::Client::builder().build()?,
            credentialed: reqwest::Client::builder().cookie_store(true).build()?,
        })
    }

    fn pick(&self, with_credentials: bool) -> reqwest::Client {
        if with_credentials {
            self.credentialed.clone()
        } else {
            self.plain.clone()
        }
    }
}

pub struct ReqwestTransfer {
    inner: Arc<Mutex<Inner>>,
    cancel: CancellationToken,
    clients: Option<Clients>,
}

impl ReqwestTransfer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            cancel: CancellationToken::new(),
            clients: None,
        }
    }

    /// Transfer that sends through `clients`, keeping cookies between requests.
    pub fn with_clients(clients: Clients) -> Self {
        Self {
            clients: Some(clients),
            ..Self::new()
        }
    }
}

impl Default for ReqwestTransfer {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(inner: &Mutex<Inner>, event: &TransferEvent) {
    let listeners: Vec<Listener> = {
        let mut guard = inner.lock().unwrap();
        if event.is_terminal() {
            guard.done = true;
        }
        guard.listeners.iter().map(|(_, l)| l.clone()).collect()
    };
    for listener in listeners {
        listener(event);
    }
}

async fn exchange(
    builder: reqwest::RequestBuilder,
    inner: &Mutex<Inner>,
    upload: Option<u64>,
    response_type: ResponseType,
) -> Result<(), reqwest::Error> {
    let mut response = builder.send().await?;

    if let Some(len) = upload {
        emit(inner, &TransferEvent::Progress { phase: Phase::Upload, loaded: len, total: Some(len) });
    }

    {
        let mut guard = inner.lock().unwrap();
        guard.status = response.status().as_u16();
        guard.status_text = response.status().canonical_reason().map(str::to_string);
        guard.url = Some(response.url().to_string());
        guard.response_headers = Headers::from(response.headers());
    }

    let total = response.content_length();
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        bytes.extend_from_slice(&chunk);
        emit(
            inner,
            &TransferEvent::Progress {
                phase: Phase::Download,
                loaded: bytes.len() as u64,
                total,
            },
        );
    }

    let body = if bytes.is_empty() {
        Payload::Empty
    } else if response_type.is_textual() {
        Payload::Text(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Payload::Bytes(bytes)
    };
    inner.lock().unwrap().body = body;
    Ok(())
}

impl Transfer for ReqwestTransfer {
    fn open(&self, method: Method, url: &str) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sent {
            return Err(TransferError::AlreadySent);
        }
        inner.request = Some((method, url.to_string()));
        inner.headers = Headers::new();
        Ok(())
    }

    fn set_request_header(&self, name: &str, value: &str) {
        self.inner.lock().unwrap().headers.insert(name, value);
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.inner.lock().unwrap().timeout = timeout;
    }

    fn set_with_credentials(&self, on: bool) {
        self.inner.lock().unwrap().with_credentials = on;
    }

    fn set_response_type(&self, response_type: ResponseType) {
        self.inner.lock().unwrap().response_type = response_type;
    }

    fn send(&self, body: Option<Vec<u8>>) -> Result<(), TransferError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| TransferError::Unavailable(e.to_string()))?;

        let (builder, response_type, upload) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.sent {
                return Err(TransferError::AlreadySent);
            }
            let Some((method, url)) = inner.request.clone() else {
                return Err(TransferError::NotOpen);
            };

            // cookies are only kept for credentialed requests
            let client = match &self.clients {
                Some(clients) => clients.pick(inner.with_credentials),
                None => reqwest::Client::builder()
                    .cookie_store(inner.with_credentials)
                    .build()
                    .map_err(|e| TransferError::Unavailable(e.to_string()))?,
            };

            let mut builder = client.request(method.into(), url.as_str());
            for (name, value) in inner.headers.iter() {
                builder = builder.header(name, value);
            }
            if let Some(timeout) = inner.timeout {
                builder = builder.timeout(timeout);
            }
            let upload = body.as_ref().map(|b| b.len() as u64);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            inner.sent = true;
            (builder, inner.response_type, upload)
        };

        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => TransferEvent::Abort,
                result = exchange(builder, &inner, upload, response_type) => match result {
                    Ok(()) => TransferEvent::Load,
                    Err(e) if e.is_timeout() => TransferEvent::Timeout,
                    Err(e) => TransferEvent::Error(e.to_string()),
                },
            };
            emit(&inner, &outcome);
        });

        Ok(())
    }

    fn abort(&self) {
        let (sent, done) = {
            let inner = self.inner.lock().unwrap();
            (inner.sent, inner.done)
        };
        if done {
            return;
        }
        if sent {
            self.cancel.cancel();
        } else {
            emit(&self.inner, &TransferEvent::Abort);
        }
    }

    fn is_done(&self) -> bool {
        self.inner.lock().unwrap().done
    }

    fn status(&self) -> u16 {
        self.inner.lock().unwrap().status
    }

    fn status_text(&self) -> Option<String> {
        self.inner.lock().unwrap().status_text.clone()
    }

    fn response_url(&self) -> Option<String> {
        self.inner.lock().unwrap().url.clone()
    }

    fn response_headers(&self) -> Headers {
        self.inner.lock().unwrap().response_headers.clone()
    }

    fn response(&self) -> Payload {
        self.inner.lock().unwrap().body.clone()
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.inner.lock().unwrap().listeners.push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.lock().unwrap().listeners.retain(|(l, _)| *l != id);
    }
}

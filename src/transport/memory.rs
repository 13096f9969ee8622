//! In-process transfer driven by a script instead of a network.
//!
//! Used as the default primitive in tests. A transfer built with
//! [`MemoryTransfer::replying`] plays its [`Reply`] as soon as it is sent; one
//! built with [`MemoryTransfer::new`] stays pending until the test calls
//! [`MemoryTransfer::complete`] or [`MemoryTransfer::emit`].
use crate::headers::Headers;
use crate::request::{Method, ResponseType};
use crate::response::Payload;
use crate::transport::{Listener, ListenerId, Phase, Transfer, TransferError, TransferEvent};
use std::sync::Mutex;
use std::time::Duration;

/// Canned outcome of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    status: u16,
    status_text: Option<String>,
    headers: Headers,
    url: Option<String>,
    body: Payload,
    progress: Vec<TransferEvent>,
    outcome: TransferEvent,
}

impl Reply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: None,
            headers: Headers::new(),
            url: None,
            body: Payload::Empty,
            progress: Vec::new(),
            outcome: TransferEvent::Load,
        }
    }

    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(Payload::Text(text.into()))
    }

    pub fn body(mut self, body: Payload) -> Self {
        self.body = body;
        self
    }

    /// Progress reported before the terminal event.
    pub fn progress(mut self, phase: Phase, loaded: u64, total: Option<u64>) -> Self {
        self.progress.push(TransferEvent::Progress { phase, loaded, total });
        self
    }

    pub fn fails(mut self, message: impl Into<String>) -> Self {
        self.outcome = TransferEvent::Error(message.into());
        self
    }

    pub fn times_out(mut self) -> Self {
        self.outcome = TransferEvent::Timeout;
        self
    }
}

/// What the transfer was asked to send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub timeout: Option<Duration>,
    pub with_credentials: bool,
    pub response_type: ResponseType,
    pub body: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    opened: Option<(Method, String)>,
    headers: Headers,
    timeout: Option<Duration>,
    with_credentials: bool,
    response_type: ResponseType,
    script: Option<Reply>,
    sent: Option<SentRequest>,
    status: u16,
    status_text: Option<String>,
    url: Option<String>,
    response_headers: Headers,
    body: Payload,
    done: bool,
    aborts: usize,
    listeners: Vec<(ListenerId, Listener)>,
}

#[derive(Default)]
pub struct MemoryTransfer {
    inner: Mutex<Inner>,
}

impl MemoryTransfer {
    /// A transfer that stays pending after `send`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transfer that plays `reply` as soon as it is sent.
    pub fn replying(reply: Reply) -> Self {
        let transfer = Self::default();
        transfer.inner.lock().unwrap().script = Some(reply);
        transfer
    }

    /// Plays `reply`: progress events, then its response fields, then its terminal event.
    pub fn complete(&self, reply: Reply) {
        for event in &reply.progress {
            self.emit(event);
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.status = reply.status;
            inner.status_text = reply.status_text;
            inner.url = reply.url;
            inner.response_headers = reply.headers;
            inner.body = reply.body;
            inner.done = true;
        }
        self.emit(&reply.outcome);
    }

    /// Delivers `event` to every listener. No lock is held while they run.
    pub fn emit(&self, event: &TransferEvent) {
        let listeners: Vec<Listener> = {
            let mut inner = self.inner.lock().unwrap();
            if event.is_terminal() {
                inner.done = true;
            }
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    pub fn sent(&self) -> Option<SentRequest> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// How many times `abort` actually cancelled the transfer.
    pub fn abort_count(&self) -> usize {
        self.inner.lock().unwrap().aborts
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }
}

impl Transfer for MemoryTransfer {
    fn open(&self, method: Method, url: &str) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.opened = Some((method, url.to_string()));
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
        let script = {
            let mut inner = self.inner.lock().unwrap();
            if inner.sent.is_some() {
                return Err(TransferError::AlreadySent);
            }
            let Some((method, url)) = inner.opened.clone() else {
                return Err(TransferError::NotOpen);
            };
            inner.sent = Some(SentRequest {
                method,
                url,
                headers: inner.headers.clone(),
                timeout: inner.timeout,
                with_credentials: inner.with_credentials,
                response_type: inner.response_type,
                body,
            });
            inner.script.take()
        };

        if let Some(reply) = script {
            self.complete(reply);
        }
        Ok(())
    }

    fn abort(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.done {
                return;
            }
            inner.aborts += 1;
        }
        self.emit(&TransferEvent::Abort);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder(transfer: &MemoryTransfer) -> Arc<Mutex<Vec<TransferEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        transfer.add_listener(Arc::new(move |ev: &TransferEvent| sink.lock().unwrap().push(ev.clone())));
        events
    }

    #[test]
    fn send_requires_open() {
        let transfer = MemoryTransfer::new();
        assert_eq!(transfer.send(None), Err(TransferError::NotOpen));
    }

    #[test]
    fn scripted_reply_plays_on_send() {
        let transfer = MemoryTransfer::replying(Reply::new(201).text("made").progress(Phase::Upload, 1, Some(1)));
        let events = recorder(&transfer);

        transfer.open(Method::Post, "http://a.test/").unwrap();
        transfer.set_request_header("X-A", "1");
        transfer.send(Some(b"abc".to_vec())).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                TransferEvent::Progress { phase: Phase::Upload, loaded: 1, total: Some(1) },
                TransferEvent::Load
            ]
        );
        assert_eq!(transfer.status(), 201);
        assert_eq!(transfer.response(), Payload::Text("made".into()));
        assert!(transfer.is_done());

        let sent = transfer.sent().unwrap();
        assert_eq!(sent.headers.get("x-a"), Some("1"));
        assert_eq!(sent.body.as_deref(), Some(&b"abc"[..]));
        assert_eq!(transfer.send(None), Err(TransferError::AlreadySent));
    }

    #[test]
    fn abort_only_cancels_a_running_transfer() {
        let transfer = MemoryTransfer::new();
        let events = recorder(&transfer);
        transfer.open(Method::Get, "http://a.test/").unwrap();
        transfer.send(None).unwrap();

        transfer.abort();
        transfer.abort();

        assert_eq!(transfer.abort_count(), 1);
        assert_eq!(*events.lock().unwrap(), vec![TransferEvent::Abort]);
    }

    #[test]
    fn removed_listeners_hear_nothing() {
        let transfer = MemoryTransfer::new();
        let events = Arc::new(Mutex::new(0));
        let sink = events.clone();
        let id = transfer.add_listener(Arc::new(move |_: &TransferEvent| *sink.lock().unwrap() += 1));

        transfer.remove_listener(id);
        transfer.emit(&TransferEvent::Load);

        assert_eq!(*events.lock().unwrap(), 0);
        assert_eq!(transfer.listener_count(), 0);
    }
}

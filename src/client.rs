//! Client facade.
//!
//! [`Client::request`] builds a fresh pipeline for every request: the
//! interceptors named in the request options (resolved against the client's
//! registry), followed by a finalizing interceptor that fills in defaults,
//! ending in a backend that owns one transfer. An interceptor that runs the
//! rest of the chain again gets a fresh backend and transfer each time.
//!
//! The finalizing step:
//! - resolves relative URLs against the backend host;
//! - for verbs without a wire body, moves the body into the query string;
//! - adds configured default headers and the user agent the caller did not set;
//! - applies the configured response type, timeout and credentials flag.
//!
//! ```rust,no_run
//! use gosub_fetch::client::Client;
//! use gosub_fetch::config::ClientConfig;
//! use gosub_fetch::transport::network::ReqwestTransfer;
//! use gosub_fetch::Request;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::builder().host("https://auth.example/").build()?;
//! let client = Client::new(config, || Arc::new(ReqwestTransfer::new()));
//! let response = client.request(Request::get("api/v2/login"))?.await?;
//! println!("{}", response.status());
//! # Ok(()) }
//! ```
use crate::config::ClientConfig;
use crate::errors::{ClientError, FetchError};
use crate::pipeline::{Interceptor, Next, Pipeline};
use crate::request::{Request, RequestOverrides};
use crate::response::{ErrorResponse, Response, ResponseFuture};
use crate::transport::{Backend, HttpBackend, Transfer};
use crate::uri;
use crate::value::Cloneable;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// What a request pipeline returns: the response future, or the reason the
/// request could not be addressed at all.
pub type Dispatch = Result<ResponseFuture, ClientError>;

pub type RequestInterceptor = Interceptor<Request, Dispatch>;

pub type BackendFactory = Arc<dyn Fn(Option<&str>) -> Arc<dyn Backend> + Send + Sync>;

pub struct Client {
    config: ClientConfig,
    factory: BackendFactory,
    registry: HashMap<String, RequestInterceptor>,
}

impl Client {
    /// Client that gives every request its own transfer from `make_transfer`.
    pub fn new<T, F>(config: ClientConfig, make_transfer: F) -> Self
    where
        T: Transfer + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        Self::with_backend_factory(config, move |host| {
            Arc::new(HttpBackend::new(make_transfer(), host.map(str::to_string))) as Arc<dyn Backend>
        })
    }

    pub fn with_backend_factory<F>(config: ClientConfig, factory: F) -> Self
    where
        F: Fn(Option<&str>) -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Arc::new(factory),
            registry: HashMap::new(),
        }
    }

    /// Registers an interceptor that requests can refer to with [`Interceptor::named`].
    pub fn register_interceptor(&mut self, name: impl Into<String>, interceptor: RequestInterceptor) {
        self.registry.insert(name.into(), interceptor);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs `request` through its pipeline.
    ///
    /// Fails synchronously when the pipeline cannot be built or the URL cannot
    /// be resolved. Everything after that is reported by the returned future.
    pub fn request(&self, request: Request) -> Result<PendingResponse, FetchError> {
        let backends = Arc::new(Backends::new(self.factory.clone(), self.config.host.as_deref()));

        let mut chain: Vec<RequestInterceptor> = request
            .options()
            .interceptors()
            .iter()
            .map(|i| i.resolve(&self.registry))
            .collect();
        chain.push(finalizer(self.config.clone(), backends.host().map(str::to_string)));

        let terminal = backends.clone();
        let pipeline = Pipeline::compose(&chain, move |request: Request| Ok(terminal.dispatch(request)))?;

        log::debug!("Client: {} {}", request.method(), request.url());
        let future = pipeline.call(request)?;

        Ok(PendingResponse { future, backends })
    }
}

/// The backends of one request. Every pass through the end of the pipeline
/// gets its own backend, so an interceptor that retries starts a new transfer.
struct Backends {
    factory: BackendFactory,
    host: Option<String>,
    state: Mutex<BackendsState>,
}

#[derive(Default)]
struct BackendsState {
    next: Option<Arc<dyn Backend>>,
    issued: Vec<Arc<dyn Backend>>,
    aborted: bool,
}

impl Backends {
    fn new(factory: BackendFactory, host: Option<&str>) -> Self {
        let first = factory(host);
        let host = first.host().map(str::to_string);
        Self {
            factory,
            host,
            state: Mutex::new(BackendsState {
                next: Some(first),
                ..Default::default()
            }),
        }
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn dispatch(&self, request: Request) -> ResponseFuture {
        let (backend, aborted) = {
            let mut state = self.state.lock().unwrap();
            let backend = match state.next.take() {
                Some(backend) => backend,
                None => (self.factory)(self.host.as_deref()),
            };
            state.issued.push(backend.clone());
            (backend, state.aborted)
        };
        if aborted {
            backend.abort();
        }
        backend.handle(request)
    }

    fn abort(&self) {
        let issued = {
            let mut state = self.state.lock().unwrap();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.next = None;
            std::mem::take(&mut state.issued)
        };
        for backend in issued {
            backend.abort();
        }
    }
}

fn finalizer(config: ClientConfig, host: Option<String>) -> RequestInterceptor {
    Interceptor::new(move |request: Request, next: Next<Request, Dispatch>| {
        let finalized = finalize(&config, host.as_deref(), &request)?;
        next.run(finalized)
    })
}

/// Fills in everything the request left to the client.
pub fn finalize(config: &ClientConfig, host: Option<&str>, request: &Request) -> Result<Request, ClientError> {
    let options = request.options();
    let mut url = uri::resolve(request.url(), host)?;

    if !request.method().carries_body() {
        if let Some(body) = request.body() {
            let content_type = match request.content_type() {
                Some(ct) if ct.to_ascii_lowercase().contains("x-www-form-urlencoded") => ct,
                _ => uri::TEXT_PLAIN,
            };
            url = uri::build_query(&url, &body.pairs(), content_type);
        }
    }

    let mut overrides = RequestOverrides::new().url(url);

    for (name, value) in config.default_headers.iter() {
        if !options.header_map().contains(name) {
            overrides = overrides.header(name, value);
        }
    }
    if let Some(ua) = &config.user_agent {
        if !options.header_map().contains("user-agent") {
            overrides = overrides.header("User-Agent", ua.as_str());
        }
    }
    if options.declared_response_type().is_none() {
        overrides = overrides.response_type(config.default_response_type);
    }
    if options.timeout_value().is_none() {
        if let Some(timeout) = config.timeout {
            overrides = overrides.timeout(timeout);
        }
    }
    if options.declared_credentials().is_none() {
        overrides = overrides.with_credentials(config.with_credentials);
    }

    Ok(request.clone_with(overrides))
}

/// Short-circuits a pipeline with a ready outcome.
pub fn respond_with(outcome: Result<Response, ErrorResponse>) -> Dispatch {
    Ok(futures::future::ready(outcome).boxed())
}

/// Transforms the eventual outcome of `dispatch` on its way back out.
pub fn map_response<F>(dispatch: Dispatch, f: F) -> Dispatch
where
    F: FnOnce(Result<Response, ErrorResponse>) -> Result<Response, ErrorResponse> + Send + 'static,
{
    dispatch.map(|future| future.map(f).boxed())
}

/// A response that has not arrived yet.
pub struct PendingResponse {
    future: ResponseFuture,
    backends: Arc<Backends>,
}

impl PendingResponse {
    /// Cancels the request. The future then fails with [`ErrorKind::Aborted`](crate::response::ErrorKind::Aborted).
    pub fn abort(&self) {
        self.backends.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            backends: self.backends.clone(),
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, ErrorResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

#[derive(Clone)]
pub struct AbortHandle {
    backends: Arc<Backends>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.backends.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::JSON_CONTENT_TYPE;
    use crate::errors::ConfigError;
    use crate::request::{Body, FilePart, Method, RequestOptions, ResponseType};
    use crate::response::{ErrorBody, ErrorKind, Payload, ResponseOverrides};
    use crate::transport::memory::{MemoryTransfer, Reply};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend that records what reached it and answers 200.
    #[derive(Default)]
    struct RecordingBackend {
        host: Option<String>,
        seen: Mutex<Vec<Request>>,
    }

    impl Backend for RecordingBackend {
        fn handle(&self, request: Request) -> ResponseFuture {
            self.seen.lock().unwrap().push(request);
            futures::future::ready(Ok(Response::new(200, Payload::Empty))).boxed()
        }

        fn host(&self) -> Option<&str> {
            self.host.as_deref()
        }

        fn abort(&self) {}

        fn on_destroy(&self) {}
    }

    fn recording_client(host: &str) -> (Client, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend {
            host: Some(host.to_string()),
            ..Default::default()
        });
        let shared = backend.clone();
        let config = ClientConfig::builder().host(host).build().unwrap();
        let client = Client::with_backend_factory(config, move |_| shared.clone() as Arc<dyn Backend>);
        (client, backend)
    }

    fn memory_client(host: &str, transfer: Arc<MemoryTransfer>) -> Client {
        let config = ClientConfig::builder().host(host).build().unwrap();
        Client::new(config, move || transfer.clone())
    }

    #[tokio::test]
    async fn relative_get_is_resolved_and_defaulted() {
        let transfer = Arc::new(MemoryTransfer::replying(Reply::new(200).text("{\"ok\":true}")));
        let client = memory_client("https://auth.example/", transfer.clone());

        let response = client.request(Request::get("api/v2/login")).unwrap().await.unwrap();
        assert_eq!(response.body(), &Payload::Json(json!({"ok": true})));

        let sent = transfer.sent().unwrap();
        assert_eq!(sent.method, Method::Get);
        assert_eq!(sent.url, "https://auth.example/api/v2/login");
        assert_eq!(sent.headers.get("accept"), Some("application/json"));
        assert_eq!(sent.headers.get("cache-control"), Some("no-cache"));
        assert_eq!(sent.headers.get("x-requested-with"), Some("XMLHttpRequest"));
        assert_eq!(sent.body, None);
    }

    #[tokio::test]
    async fn interceptor_changes_are_merged_into_one_options_object() {
        let (client, backend) = recording_client("https://api.example");

        let auth = Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
            next.run(req.clone_with(RequestOverrides::new().header("Authorization", "Bearer abc")))
        });
        let blob = Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
            next.run(req.clone_with(RequestOverrides::new().response_type(ResponseType::Blob)))
        });
        let options = RequestOptions::new()
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(5))
            .interceptor(auth)
            .interceptor(blob);
        let request = Request::post("users").with_options(options).with_body(Body::Json(json!({"a": 1})));

        client.request(request).unwrap().await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let options = seen[0].options();
        assert_eq!(options.header_map().get("authorization"), Some("Bearer abc"));
        assert_eq!(options.header_map().get("content-type"), Some("application/json"));
        assert_eq!(options.declared_response_type(), Some(ResponseType::Blob));
        assert_eq!(options.timeout_value(), Some(Duration::from_secs(5)));
        assert_eq!(seen[0].url(), "https://api.example/users");
    }

    #[tokio::test]
    async fn multipart_upload_reaches_the_wire_intact() {
        let transfer = Arc::new(MemoryTransfer::replying(Reply::new(201).text("{}")));
        let client = memory_client("https://files.example", transfer.clone());
        let body = Body::form([("name", "bob")])
            .field("file", FilePart::from_bytes("a.bin", "application/octet-stream", vec![1, 2, 3]).into());
        let request = Request::post("upload")
            .with_options(RequestOptions::new().header("Content-Type", "multipart/form-data"))
            .with_body(body);

        client.request(request).unwrap().await.unwrap();

        let sent = transfer.sent().unwrap();
        let content_type = sent.headers.get("content-type").unwrap().to_string();
        let boundary = content_type.strip_prefix("multipart/form-data; boundary=").unwrap();

        let mut expected = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nbob\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        expected.extend_from_slice(&[1, 2, 3]);
        expected.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        assert_eq!(sent.body.unwrap(), expected);
    }

    #[tokio::test]
    async fn server_error_fails_the_future_with_the_parsed_body() {
        let transfer = Arc::new(MemoryTransfer::replying(
            Reply::new(404).status_text("Not Found").text("{\"error\":\"missing\"}"),
        ));
        let client = memory_client("https://api.example", transfer);

        let err = client.request(Request::get("users/9")).unwrap().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), 404);
        assert_eq!(err.status_text(), "Not Found");
        assert_eq!(err.error(), &ErrorBody::Payload(Payload::Json(json!({"error": "missing"}))));
    }

    #[tokio::test]
    async fn invalid_json_on_200_is_a_parse_failure() {
        let transfer = Arc::new(MemoryTransfer::replying(Reply::new(200).text("{\"broken\":")));
        let client = memory_client("https://api.example", transfer);

        let err = client.request(Request::get("users")).unwrap().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.status(), 200);
        assert!(matches!(err.error(), ErrorBody::Parse { text, .. } if text == "{\"broken\":"));
    }

    #[tokio::test]
    async fn body_of_a_get_becomes_the_query() {
        let (client, backend) = recording_client("https://api.example");
        let request = Request::get("search?stale=1").with_body(Body::form([("q", "rust lang"), ("page", "2")]));

        client.request(request).unwrap().await.unwrap();
        assert_eq!(backend.seen.lock().unwrap()[0].url(), "https://api.example/search?q=rust\\ lang&page=2");

        let request = Request::delete("items")
            .with_options(RequestOptions::new().header("Content-Type", "application/x-www-form-urlencoded"))
            .with_body(Body::form([("id", "a b")]));
        client.request(request).unwrap().await.unwrap();
        assert_eq!(backend.seen.lock().unwrap()[1].url(), "https://api.example/items?id=a+b");
    }

    #[tokio::test]
    async fn caller_headers_beat_defaults_case_insensitively() {
        let (client, backend) = recording_client("https://api.example");
        let request = Request::get("x").with_options(RequestOptions::new().header("accept", "text/csv"));

        client.request(request).unwrap().await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let headers = seen[0].options().header_map();
        assert_eq!(headers.get("Accept"), Some("text/csv"));
        assert_eq!(headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case("accept")).count(), 1);
        assert_eq!(seen[0].options().declared_response_type(), Some(ResponseType::Json));
    }

    #[tokio::test]
    async fn config_fills_timeout_credentials_and_user_agent() {
        let backend = Arc::new(RecordingBackend::default());
        let shared = backend.clone();
        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(30))
            .with_credentials(true)
            .user_agent("Gosub/0.1")
            .build()
            .unwrap();
        let client = Client::with_backend_factory(config, move |_| shared.clone() as Arc<dyn Backend>);

        client.request(Request::get("https://abs.example/x")).unwrap().await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let options = seen[0].options();
        assert_eq!(options.timeout_value(), Some(Duration::from_secs(30)));
        assert!(options.credentials());
        assert_eq!(options.header_map().get("user-agent"), Some("Gosub/0.1"));
    }

    #[test]
    fn relative_url_without_host_fails_synchronously() {
        let backend = Arc::new(RecordingBackend::default());
        let shared = backend.clone();
        let client = Client::with_backend_factory(ClientConfig::default(), move |_| shared.clone() as Arc<dyn Backend>);

        let err = client.request(Request::get("api")).err().unwrap();
        assert_eq!(err, FetchError::Client(ClientError::MissingHost("api".into())));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unregistered_interceptor_fails_pipeline_construction() {
        let (client, backend) = recording_client("https://api.example");
        let request = Request::get("x").with_options(RequestOptions::new().interceptor(Interceptor::named("auth")));

        let err = client.request(request).err().unwrap();
        assert_eq!(
            err,
            FetchError::Config(ConfigError::NotCallable { position: 0, name: "auth".into() })
        );
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn named_interceptors_resolve_from_the_registry() {
        let (mut client, backend) = recording_client("https://api.example");
        client.register_interceptor(
            "auth",
            Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
                next.run(req.clone_with(RequestOverrides::new().header("Authorization", "Token t")))
            }),
        );
        let request = Request::get("x").with_options(RequestOptions::new().interceptor(Interceptor::named("auth")));

        client.request(request).unwrap().await.unwrap();
        assert_eq!(
            backend.seen.lock().unwrap()[0].options().header_map().get("authorization"),
            Some("Token t")
        );
    }

    #[tokio::test]
    async fn interceptors_can_rewrite_and_short_circuit_responses() {
        let (client, backend) = recording_client("https://api.example");

        let stamp = Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
            map_response(next.run(req), |outcome| {
                outcome.map(|res| {
                    res.clone_with(ResponseOverrides {
                        status_text: Some("Stamped".into()),
                        ..Default::default()
                    })
                })
            })
        });
        let request = Request::get("x").with_options(RequestOptions::new().interceptor(stamp));
        let res = client.request(request).unwrap().await.unwrap();
        assert_eq!(res.status_text(), "Stamped");

        let cached = Interceptor::new(|_req: Request, _next: Next<Request, Dispatch>| {
            respond_with(Ok(Response::new(200, Payload::Text("cached".into()))))
        });
        let request = Request::get("y").with_options(RequestOptions::new().interceptor(cached));
        let res = client.request(request).unwrap().await.unwrap();
        assert_eq!(res.body(), &Payload::Text("cached".into()));
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_interceptor_reinvokes_the_rest_of_the_chain() {
        let (client, backend) = recording_client("https://api.example");
        let twice = Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
            let _ = next.run(req.clone())?;
            next.run(req)
        });
        let request = Request::get("x").with_options(RequestOptions::new().interceptor(twice));

        client.request(request).unwrap().await.unwrap();
        assert_eq!(backend.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_after_a_server_error_starts_a_new_transfer() {
        let transfers = Arc::new(Mutex::new(Vec::<Arc<MemoryTransfer>>::new()));
        let made = transfers.clone();
        let config = ClientConfig::builder().host("https://api.example").build().unwrap();
        let client = Client::new(config, move || {
            let transfer = Arc::new(MemoryTransfer::replying(Reply::new(503).text("{}")));
            made.lock().unwrap().push(transfer.clone());
            transfer
        });

        let retry = Interceptor::new(|req: Request, next: Next<Request, Dispatch>| {
            let first = next.run(req.clone())?;
            Ok(async move {
                match first.await {
                    Err(err) if err.kind() == ErrorKind::Server => match next.run(req) {
                        Ok(again) => again.await,
                        Err(_) => Err(err),
                    },
                    outcome => outcome,
                }
            }
            .boxed())
        });
        let request = Request::get("flaky").with_options(RequestOptions::new().interceptor(retry));

        let err = client.request(request).unwrap().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), 503);

        let transfers = transfers.lock().unwrap();
        assert_eq!(transfers.len(), 2);
        for transfer in transfers.iter() {
            assert_eq!(transfer.sent().unwrap().url, "https://api.example/flaky");
            assert_eq!(transfer.listener_count(), 0);
        }
    }

    #[tokio::test]
    async fn request_can_opt_out_of_configured_credentials() {
        let backend = Arc::new(RecordingBackend::default());
        let shared = backend.clone();
        let config = ClientConfig::builder().with_credentials(true).build().unwrap();
        let client = Client::with_backend_factory(config, move |_| shared.clone() as Arc<dyn Backend>);

        let request = Request::get("https://abs.example/x").with_options(RequestOptions::new().with_credentials(false));
        client.request(request).unwrap().await.unwrap();
        client.request(Request::get("https://abs.example/y")).unwrap().await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].options().declared_credentials(), Some(false));
        assert!(!seen[0].options().credentials());
        assert!(seen[1].options().credentials());
    }

    #[tokio::test]
    async fn abort_settles_the_pending_response() {
        let transfer = Arc::new(MemoryTransfer::new());
        let client = memory_client("https://api.example", transfer.clone());

        let mut pending = client.request(Request::get("slow")).unwrap();
        assert!(futures::poll!(&mut pending).is_pending());

        let handle = pending.abort_handle();
        handle.abort();
        pending.abort();

        assert_eq!(transfer.abort_count(), 1);
        assert_eq!(pending.await.unwrap_err().kind(), ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn json_post_goes_out_with_the_canonical_content_type() {
        let transfer = Arc::new(MemoryTransfer::replying(Reply::new(200).text("{}")));
        let client = memory_client("https://api.example", transfer.clone());
        let request = Request::post("users").with_body(Body::Json(json!({"name": "bob"})));

        client.request(request).unwrap().await.unwrap();

        let sent = transfer.sent().unwrap();
        assert_eq!(sent.headers.get("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(sent.body.unwrap(), br#"{"name":"bob"}"#.to_vec());
    }
}

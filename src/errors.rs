/// Raised while building a client or a request pipeline. Nothing has been sent yet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Interceptor #{position} ({name}) is not callable")]
    NotCallable { position: usize, name: String },

    #[error("Invalid host {0:?}: expected an absolute http(s) URL")]
    InvalidHost(String),

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
}

/// Raised synchronously when a request cannot be addressed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot resolve relative URL {0:?} without a host")]
    MissingHost(String),

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported HTTP method {0:?}")]
    UnsupportedMethod(String),
}

/// Everything [`Client::request`](crate::client::Client::request) can fail with
/// before a response future exists. Failures after that point are
/// [`ErrorResponse`](crate::response::ErrorResponse) values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

//! Client configuration.
//!
//! `ClientConfig` holds what the finalizing step of every pipeline falls back
//! on when a request leaves something unset: the host for relative URLs, the
//! default headers, the response type, the timeout and the credentials flag.
//!
//! ```rust
//! use gosub_fetch::config::ClientConfig;
//! use std::time::Duration;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ClientConfig::builder()
//!     .host("https://auth.example/")
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("Gosub/0.1")
//!     .build()?;
//! assert_eq!(cfg.default_headers.get("accept"), Some("application/json"));
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! [`ClientConfigBuilder::build`] rejects a host that is not an absolute
//! `http`/`https` URL and a zero timeout.
use crate::errors::ConfigError;
use crate::headers::Headers;
use crate::request::ResponseType;
use crate::uri;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: Option<String>,
    pub default_headers: Headers,
    pub default_response_type: ResponseType,
    pub timeout: Option<Duration>,
    pub with_credentials: bool,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            default_headers: Headers::new()
                .with("Accept", "application/json")
                .with("Cache-Control", "no-cache")
                .with("X-Requested-With", "XMLHttpRequest"),
            default_response_type: ResponseType::Json,
            timeout: None,
            with_credentials: false,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut ClientConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn host<S: Into<String>>(self, host: S) -> Self { self.map(|c| c.host = Some(host.into())) }
    pub fn default_header<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.map(|c| c.default_headers.insert(name, value))
    }
    pub fn default_headers(self, headers: Headers) -> Self { self.map(|c| c.default_headers = headers) }
    pub fn default_response_type(self, rt: ResponseType) -> Self { self.map(|c| c.default_response_type = rt) }
    pub fn timeout(self, timeout: Duration) -> Self { self.map(|c| c.timeout = Some(timeout)) }
    pub fn with_credentials(self, on: bool) -> Self { self.map(|c| c.with_credentials = on) }
    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = Some(ua.into())) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut ClientConfig)) -> Self { self.map(f) }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

fn validate(c: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(host) = &c.host {
        if uri::host_of(host).is_err() {
            return Err(ConfigError::InvalidHost(host.clone()));
        }
    }
    if c.timeout == Some(Duration::ZERO) {
        return Err(ConfigError::ZeroTimeout);
    }
    Ok(())
}

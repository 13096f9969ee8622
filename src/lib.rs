pub mod client;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod headers;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;
pub mod uri;
pub mod value;

pub use client::{Client, Dispatch, PendingResponse, RequestInterceptor};
pub use config::ClientConfig;
pub use errors::{ClientError, ConfigError, FetchError};
pub use headers::Headers;
pub use pipeline::{Interceptor, Next, Pipeline};
pub use request::{Body, FilePart, FormValue, Method, Request, RequestOptions, RequestOverrides, ResponseType};
pub use response::{ErrorBody, ErrorKind, ErrorResponse, Payload, ProgressEvent, Response};
pub use value::{Cloneable, Patch};

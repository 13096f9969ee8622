//! Interceptor pipeline.
//!
//! An interceptor receives the message and a [`Next`] continuation. It may
//! rewrite the message before calling `next`, rewrite whatever `next` returns,
//! or not call `next` at all. [`Pipeline::compose`] folds a sequence of
//! interceptors around a terminal handler, innermost first, so that calling
//! the pipeline runs interceptors in registration order on the way in and
//! unwinds them in reverse order on the way out.
//!
//! The pipeline is generic over the message `M` and result `R`. The client
//! uses `Pipeline<Request, Dispatch>`, where the result is itself a response
//! future, so composition stays synchronous and only the transport suspends.
//!
//! ```rust
//! use gosub_fetch::pipeline::{Interceptor, Pipeline};
//!
//! let shout = Interceptor::new(|msg: String, next| next.run(msg.to_uppercase()));
//! let pipeline = Pipeline::compose(&[shout], |msg: String| msg.len()).unwrap();
//! assert_eq!(pipeline.call("hello".to_string()), 5);
//! ```
use crate::errors::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Handler<M, R> = Arc<dyn Fn(M, Next<M, R>) -> R + Send + Sync>;
type Step<M, R> = Arc<dyn Fn(M) -> R + Send + Sync>;

/// A single step of a pipeline.
///
/// Either a callable handler, or a by-name reference to a handler registered
/// elsewhere (see [`Interceptor::resolve`]). A reference that was never
/// resolved is not callable and makes [`Pipeline::compose`] fail.
pub struct Interceptor<M, R> {
    repr: Repr<M, R>,
}

enum Repr<M, R> {
    Callable(Handler<M, R>),
    Named(String),
}

impl<M, R> Interceptor<M, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(M, Next<M, R>) -> R + Send + Sync + 'static,
    {
        Self { repr: Repr::Callable(Arc::new(f)) }
    }

    /// A late-bound reference to an interceptor registered under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self { repr: Repr::Named(name.into()) }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.repr, Repr::Callable(_))
    }

    /// Name of an unresolved reference.
    pub fn name(&self) -> Option<&str> {
        match &self.repr {
            Repr::Named(name) => Some(name),
            Repr::Callable(_) => None,
        }
    }

    /// Swaps a by-name reference for the registered interceptor, if any.
    /// Callable interceptors and unknown names are returned unchanged.
    pub fn resolve(&self, registry: &HashMap<String, Interceptor<M, R>>) -> Self {
        match &self.repr {
            Repr::Named(name) => registry.get(name).cloned().unwrap_or_else(|| self.clone()),
            Repr::Callable(_) => self.clone(),
        }
    }
}

impl<M, R> Clone for Interceptor<M, R> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Callable(f) => Repr::Callable(f.clone()),
            Repr::Named(name) => Repr::Named(name.clone()),
        };
        Self { repr }
    }
}

/// Two interceptors are equal when they are the same handler (or the same name).
impl<M, R> PartialEq for Interceptor<M, R> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Callable(a), Repr::Callable(b)) => Arc::ptr_eq(a, b),
            (Repr::Named(a), Repr::Named(b)) => a == b,
            _ => false,
        }
    }
}

impl<M, R> fmt::Debug for Interceptor<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Callable(h) => write!(f, "Interceptor({:p})", Arc::as_ptr(h)),
            Repr::Named(name) => write!(f, "Interceptor({name:?})"),
        }
    }
}

/// Continuation handed to an interceptor: runs the rest of the chain.
pub struct Next<M, R> {
    step: Step<M, R>,
}

impl<M, R> Next<M, R> {
    /// Runs the remaining interceptors and the terminal handler.
    ///
    /// May be called more than once, e.g. by an interceptor that retries.
    pub fn run(&self, message: M) -> R {
        (self.step)(message)
    }
}

impl<M, R> Clone for Next<M, R> {
    fn clone(&self) -> Self {
        Self { step: self.step.clone() }
    }
}

/// A composed chain of interceptors ending in a terminal handler.
pub struct Pipeline<M, R> {
    entry: Step<M, R>,
}

impl<M: 'static, R: 'static> Pipeline<M, R> {
    /// Composes `interceptors` around `terminal`.
    ///
    /// The slice is read once; the pipeline keeps its own handles. Fails if any
    /// element is not callable, before any message is processed. An empty slice
    /// yields the terminal handler itself.
    pub fn compose<T>(interceptors: &[Interceptor<M, R>], terminal: T) -> Result<Self, ConfigError>
    where
        T: Fn(M) -> R + Send + Sync + 'static,
    {
        let mut handlers = Vec::with_capacity(interceptors.len());
        for (position, interceptor) in interceptors.iter().enumerate() {
            match &interceptor.repr {
                Repr::Callable(handler) => handlers.push(handler.clone()),
                Repr::Named(name) => {
                    log::error!("Pipeline: interceptor #{position} ({name}) is not registered");
                    return Err(ConfigError::NotCallable { position, name: name.clone() });
                }
            }
        }

        let mut entry: Step<M, R> = Arc::new(terminal);
        for handler in handlers.into_iter().rev() {
            let next = Next { step: entry };
            entry = Arc::new(move |message| handler(message, next.clone()));
        }

        Ok(Self { entry })
    }
}

impl<M, R> Pipeline<M, R> {
    pub fn call(&self, message: M) -> R {
        (self.entry)(message)
    }
}

impl<M, R> Clone for Pipeline<M, R> {
    fn clone(&self) -> Self {
        Self { entry: self.entry.clone() }
    }
}

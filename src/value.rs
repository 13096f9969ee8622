//! Clone-with-overrides value model.
//!
//! Requests, responses, error responses and their nested option blocks are
//! immutable once built. The only way to "change" one is to derive a new
//! value from it with [`Cloneable::clone_with`], handing over an overrides
//! value that names the fields to replace.
//!
//! Every overrides type follows the same rules:
//! - a required scalar is an `Option<T>`: `None` inherits, `Some` replaces;
//! - an optional field is a [`Patch<T>`]: `Keep` inherits, `Set` replaces,
//!   `Clear` empties the field;
//! - a nested value model (e.g. the options inside a request) carries its own
//!   overrides type and is merged recursively, so touching
//!   `options.headers` never drops `options.timeout`;
//! - callbacks are shared handles (`Arc`) and are carried over by reference.
//!
//! ```rust
//! use gosub_fetch::{Cloneable, Method, Request, RequestOverrides};
//!
//! let original = Request::new(Method::Get, "api/users");
//! let derived = original.clone_with(RequestOverrides::new().header("Authorization", "Bearer x"));
//!
//! assert!(original.options().header_map().get("authorization").is_none());
//! assert_eq!(derived.options().header_map().get("authorization"), Some("Bearer x"));
//! ```

/// A value type that can only be modified by deriving a new instance.
pub trait Cloneable: Sized {
    /// Partial description of the fields to replace. `Default` means "change nothing".
    type Overrides: Default;

    /// Returns a new value equal to `self` except for the fields in `overrides`.
    ///
    /// The receiver is never modified and the result shares no mutable state with it.
    fn clone_with(&self, overrides: Self::Overrides) -> Self;
}

/// Override marker for optional fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    /// Inherit the current value.
    #[default]
    Keep,
    /// Replace the current value.
    Set(T),
    /// Remove the current value.
    Clear,
}

impl<T: Clone> Patch<T> {
    /// Applies the patch on top of `current`.
    pub fn apply(self, current: &Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current.clone(),
            Patch::Set(value) => Some(value),
            Patch::Clear => None,
        }
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Combines two patches as if they were applied one after the other.
    pub fn then(self, later: Patch<T>) -> Patch<T> {
        match later {
            Patch::Keep => self,
            other => other,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets the field, `None` clears it.
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

/// Later `Some` wins, used when merging two override sets.
pub(crate) fn later<T>(earlier: Option<T>, later: Option<T>) -> Option<T> {
    later.or(earlier)
}

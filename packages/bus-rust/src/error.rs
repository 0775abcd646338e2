//! Errors raised by the bus.
//!
//! These are programmer-usage errors and unexpected handler errors. Business
//! failures never travel here; they are returned inside a `BusResult`.

/// Errors surfaced by `MessageBus` operations and middleware.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("A handler could not be found for the message '{message}'")]
    MissingHandler { message: &'static str },
    #[error("A handler has already been registered for the message {message}")]
    TooManyHandlers { message: &'static str },
    #[error("no dependency loader provided to the message bus")]
    MissingLoader,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("unexpected reply for message {message}: expected {expected}")]
    UnexpectedReply {
        message: &'static str,
        expected: &'static str,
    },
    /// A handler returned an error. Propagated unmodified through the chain.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl BusError {
    /// The underlying handler error, if this is one.
    #[must_use]
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors from a dependency loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot resolve dependency {type_name}")]
    Unresolved { type_name: &'static str },
    #[error("dependency {type_name} resolved to an instance of another type")]
    TypeMismatch { type_name: &'static str },
}

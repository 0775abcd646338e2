//! Middleware chain for message handling.
//!
//! - [`chain`]: Folds an ordered middleware list into a single continuation
//! - [`locker`]: Task-aware bus lock with postponement of nested messages
//! - [`logging`]: Pre/post/error log lines for opted-in messages
//! - [`invariant`]: Translates invariant violations into failure reasons
//!
//! A middleware receives the [`Envelope`] and the [`Next`] continuation. It
//! may act before and after calling `next`, short-circuit by returning a
//! [`Reply`] without calling it, or hand the continuation off for later.

pub mod chain;
pub mod invariant;
pub mod locker;
pub mod logging;

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use kbus_core::{BusResult, FailureReason, Message};

use crate::error::BusError;
use crate::handler::RegisteredHandler;

pub use chain::build_chain;
pub use invariant::InvalidInvariantCatcher;
pub use locker::{BusLockedFailure, BusLocker};
pub use logging::{Logger, MessageLogger, TracingLogger};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// A handling step wrapped around the message handlers.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handle `envelope`, usually by awaiting `next.run(envelope)`.
    ///
    /// # Errors
    ///
    /// Propagates errors raised further down the chain, or raises its own.
    async fn handle(&self, envelope: Envelope, next: Next) -> Result<Reply, BusError>;
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A message travelling through the chain together with the handlers
/// resolved for it at submission time.
#[derive(Clone)]
pub struct Envelope {
    message: Arc<dyn Message>,
    handlers: Arc<[RegisteredHandler]>,
}

impl Envelope {
    /// An envelope with no handlers attached.
    #[must_use]
    pub fn new(message: impl Message) -> Self {
        Self::routed(Arc::new(message), Vec::new())
    }

    #[must_use]
    pub fn routed(message: Arc<dyn Message>, handlers: Vec<RegisteredHandler>) -> Self {
        Self {
            message,
            handlers: handlers.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    /// Shared handle on the message, for use after the envelope was moved on.
    #[must_use]
    pub fn shared_message(&self) -> Arc<dyn Message> {
        Arc::clone(&self.message)
    }

    #[must_use]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.message().downcast_ref::<M>()
    }

    #[must_use]
    pub fn handlers(&self) -> &[RegisteredHandler] {
        &self.handlers
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("message", &self.message())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// What the chain produced for a message.
pub enum Reply {
    /// Output of the single resolved handler, a boxed `BusResult` for
    /// commands and queries.
    Value(Box<dyn Any + Send>),
    /// A middleware short-circuited with a failure reason.
    Failed(Box<dyn FailureReason>),
    /// The message fanned out to zero or several handlers.
    Empty,
}

impl Reply {
    #[must_use]
    pub fn value<T: Any + Send>(value: T) -> Self {
        Self::Value(Box::new(value))
    }

    #[must_use]
    pub fn failed(reason: impl FailureReason) -> Self {
        Self::Failed(Box::new(reason))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The short-circuit failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&dyn FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason.as_ref()),
            _ => None,
        }
    }

    /// Borrow the handler output as `T`.
    #[must_use]
    pub fn value_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Value(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Recover the typed result of a command or query.
    ///
    /// A short-circuit failure becomes a failed result carrying that reason.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnexpectedReply`] when the reply holds no result of
    /// the expected type.
    pub fn into_bus_result<T, F>(self, message: &'static str) -> Result<BusResult<T, F>, BusError>
    where
        T: Send + 'static,
        F: FailureReason,
    {
        let unexpected = || BusError::UnexpectedReply {
            message,
            expected: type_name::<BusResult<T, F>>(),
        };
        match self {
            Self::Value(value) => value
                .downcast::<BusResult<T, F>>()
                .map(|result| *result)
                .map_err(|_| unexpected()),
            Self::Failed(reason) => Ok(BusResult::from_reason(reason)),
            Self::Empty => Err(unexpected()),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

type Link = dyn Fn(Envelope) -> BoxFuture<'static, Result<Reply, BusError>> + Send + Sync;

/// The remainder of the chain after the current middleware.
///
/// Consumed by [`Next::run`]; a middleware that wants to run it later keeps
/// the value instead.
pub struct Next {
    link: Arc<Link>,
}

impl Next {
    /// A continuation backed by an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, BusError>> + Send + 'static,
    {
        Self {
            link: Arc::new(move |envelope: Envelope| f(envelope).boxed()),
        }
    }

    /// Continue handling `envelope`.
    ///
    /// # Errors
    ///
    /// Whatever the rest of the chain raises.
    pub async fn run(self, envelope: Envelope) -> Result<Reply, BusError> {
        (self.link)(envelope).await
    }

    pub(crate) fn share(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

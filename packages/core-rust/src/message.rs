//! Message taxonomy: commands, queries and events.
//!
//! Every message handed to the bus implements [`Message`]. The kind is fixed
//! per type and only used for diagnostics; routing is by concrete type.
//! Optional capabilities (locking, logging, invariant catching) are expressed
//! as provided trait methods with neutral defaults, so a message opts in by
//! overriding the relevant method.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::failure::FailureReason;
use crate::invariant::InvalidInvariant;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Intent with exactly one handler.
    Command,
    /// Read request with exactly one handler.
    Query,
    /// Broadcast fact with zero or more handlers.
    Event,
}

impl MessageKind {
    /// Lowercase discriminant used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Declares a message as a locking message.
///
/// `timeout` overrides the locker's default wait horizon for as long as this
/// message holds the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Option<Duration>,
}

impl LockPolicy {
    /// Lock using the locker's default timeout.
    pub const DEFAULT: Self = Self { timeout: None };

    /// Lock and publish `timeout` as the wait horizon while held.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Verb forms used when logging a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogVerbs {
    pub finite: &'static str,
    pub present: &'static str,
    pub past: &'static str,
}

impl LogVerbs {
    pub const MESSAGE: Self = Self {
        finite: "handle",
        present: "handling",
        past: "handled",
    };
    pub const COMMAND: Self = Self {
        finite: "execute",
        present: "executing",
        past: "executed",
    };
    pub const QUERY: Self = Self {
        finite: "process",
        present: "processing",
        past: "processed",
    };
    pub const EVENT: Self = Self {
        finite: "dispatch",
        present: "dispatching",
        past: "dispatched",
    };

    /// Default verbs for a message kind.
    #[must_use]
    pub const fn for_kind(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Command => Self::COMMAND,
            MessageKind::Query => Self::QUERY,
            MessageKind::Event => Self::EVENT,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Upcast to `&dyn Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value submitted to the bus.
///
/// Messages are immutable once constructed and are never reused across
/// dispatches. Use [`impl_command!`](crate::impl_command),
/// [`impl_query!`](crate::impl_query) or [`impl_event!`](crate::impl_event)
/// rather than implementing this by hand.
pub trait Message: AsAny + Send + Sync + 'static {
    /// Category of this message.
    fn kind(&self) -> MessageKind;

    /// Display name, the unqualified Rust type name by default.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// `Some` if handling this message must be mutually exclusive bus-wide.
    fn lock_policy(&self) -> Option<LockPolicy> {
        None
    }

    /// Wait horizon to use instead of the locker's current one while this
    /// message waits for the lock.
    fn wait_timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the logging middleware reports this message.
    fn is_logged(&self) -> bool {
        false
    }

    fn log_verbs(&self) -> LogVerbs {
        LogVerbs::for_kind(self.kind())
    }

    /// Translates an invariant violation raised while handling this message
    /// into a failure reason. `None` (the default) lets the error propagate.
    fn map_invariant(&self, _violation: &InvalidInvariant) -> Option<Box<dyn FailureReason>> {
        None
    }

    /// `"Executing command <Name>"`.
    fn pre_handle_log(&self) -> String {
        format!(
            "{} {} <{}>",
            capitalize(self.log_verbs().present),
            self.kind(),
            self.name()
        )
    }

    /// `"Successfully executed command <Name>"`.
    fn post_handle_log(&self) -> String {
        format!(
            "Successfully {} {} <{}>",
            self.log_verbs().past,
            self.kind(),
            self.name()
        )
    }

    /// `"Failed executing command <Name>"`.
    fn error_log(&self) -> String {
        format!(
            "Failed {} {} <{}>",
            self.log_verbs().present,
            self.kind(),
            self.name()
        )
    }
}

impl dyn Message {
    /// Borrow the concrete message type, if it is `T`.
    #[must_use]
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.kind(), self.name())
    }
}

/// A message handled by exactly one handler, producing a [`BusResult`](crate::BusResult).
pub trait Command: Message {
    type Output: Send + 'static;
    type Failure: FailureReason;
}

/// A read-only request handled by exactly one handler.
pub trait Query: Message {
    type Output: Send + 'static;
    type Failure: FailureReason;
}

/// A fact broadcast to any number of handlers.
pub trait Event: Message {}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Declaration macros
// ---------------------------------------------------------------------------

/// Implement [`Message`] and [`Command`] for a type.
///
/// ```
/// use kbus_core::{impl_command, GenericFailure, LockPolicy};
///
/// struct Rename { id: u32, name: String }
///
/// impl_command!(Rename => (), GenericFailure, {
///     fn lock_policy(&self) -> Option<LockPolicy> {
///         Some(LockPolicy::DEFAULT)
///     }
/// });
/// ```
#[macro_export]
macro_rules! impl_command {
    ($ty:ty => $output:ty, $failure:ty $(, { $($body:tt)* })?) => {
        impl $crate::Message for $ty {
            fn kind(&self) -> $crate::MessageKind {
                $crate::MessageKind::Command
            }
            $($($body)*)?
        }

        impl $crate::Command for $ty {
            type Output = $output;
            type Failure = $failure;
        }
    };
}

/// Implement [`Message`] and [`Query`] for a type.
#[macro_export]
macro_rules! impl_query {
    ($ty:ty => $output:ty, $failure:ty $(, { $($body:tt)* })?) => {
        impl $crate::Message for $ty {
            fn kind(&self) -> $crate::MessageKind {
                $crate::MessageKind::Query
            }
            $($($body)*)?
        }

        impl $crate::Query for $ty {
            type Output = $output;
            type Failure = $failure;
        }
    };
}

/// Implement [`Message`] and [`Event`] for a type.
#[macro_export]
macro_rules! impl_event {
    ($ty:ty $(, { $($body:tt)* })?) => {
        impl $crate::Message for $ty {
            fn kind(&self) -> $crate::MessageKind {
                $crate::MessageKind::Event
            }
            $($($body)*)?
        }

        impl $crate::Event for $ty {}
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Failure reasons: structured, non-exceptional descriptions of why a handler
//! did not succeed.

use std::fmt;

use crate::message::AsAny;

/// A reason carried by the failure side of a [`BusResult`](crate::BusResult).
///
/// Domain code defines its own reasons by implementing this trait.
pub trait FailureReason: AsAny + fmt::Debug + Send + Sync + 'static {
    /// Human-readable description, if any.
    fn message(&self) -> Option<&str>;
}

impl dyn FailureReason {
    /// Borrow the concrete reason type, if it is `T`.
    #[must_use]
    pub fn downcast_ref<T: FailureReason>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T: FailureReason>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Display for dyn FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// GenericFailure
// ---------------------------------------------------------------------------

/// A failure described only by its message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericFailure {
    message: Option<String>,
}

impl GenericFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl FailureReason for GenericFailure {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<&str> for GenericFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for GenericFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

// ---------------------------------------------------------------------------
// MultipleFailureReasons
// ---------------------------------------------------------------------------

/// Aggregate of several reasons, kept in the order they were added.
#[derive(Debug, Default)]
pub struct MultipleFailureReasons {
    reasons: Vec<Box<dyn FailureReason>>,
}

impl MultipleFailureReasons {
    pub const MESSAGE: &'static str = "There were multiple failures";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reason.
    #[must_use]
    pub fn with(mut self, reason: impl FailureReason) -> Self {
        self.reasons.push(Box::new(reason));
        self
    }

    pub fn push(&mut self, reason: Box<dyn FailureReason>) {
        self.reasons.push(reason);
    }

    #[must_use]
    pub fn reasons(&self) -> &[Box<dyn FailureReason>] {
        &self.reasons
    }

    #[must_use]
    pub fn into_reasons(self) -> Vec<Box<dyn FailureReason>> {
        self.reasons
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }
}

impl FailureReason for MultipleFailureReasons {
    fn message(&self) -> Option<&str> {
        Some(Self::MESSAGE)
    }
}

impl FromIterator<Box<dyn FailureReason>> for MultipleFailureReasons {
    fn from_iter<I: IntoIterator<Item = Box<dyn FailureReason>>>(iter: I) -> Self {
        Self {
            reasons: iter.into_iter().collect(),
        }
    }
}

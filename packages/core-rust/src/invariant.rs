//! Domain invariant assertions.
//!
//! Handlers raise [`InvalidInvariant`] through `?`; the bus's invariant
//! catcher may translate it into a failure reason for messages that opt in.

use crate::failure::FailureReason;

/// A domain invariant did not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InvalidInvariant {
    message: String,
}

impl InvalidInvariant {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl FailureReason for InvalidInvariant {
    fn message(&self) -> Option<&str> {
        Some(&self.message)
    }
}

/// Fail with `message` unless `holds`.
///
/// # Errors
///
/// Returns [`InvalidInvariant`] when the invariant does not hold.
pub fn ensure_invariant(holds: bool, message: impl Into<String>) -> Result<(), InvalidInvariant> {
    if holds {
        Ok(())
    } else {
        Err(InvalidInvariant::new(message))
    }
}

/// Fail with the violation built by `violation` unless `holds`.
///
/// # Errors
///
/// Returns the supplied violation when the invariant does not hold.
pub fn ensure_invariant_with<E>(holds: bool, violation: impl FnOnce() -> E) -> Result<(), E>
where
    E: Into<InvalidInvariant>,
{
    if holds {
        Ok(())
    } else {
        Err(violation())
    }
}

/// Domain types that validate themselves.
pub trait HasInvariants {
    /// Check every invariant of `self`.
    ///
    /// # Errors
    ///
    /// Returns the first invariant that does not hold.
    fn validate(&self) -> Result<(), InvalidInvariant>;

    /// Fail with `message` unless `holds`. Meant for use inside `validate`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInvariant`] when the invariant does not hold.
    fn check(&self, holds: bool, message: &str) -> Result<(), InvalidInvariant> {
        ensure_invariant(holds, message)
    }

    /// Return `self` if it is valid.
    ///
    /// # Errors
    ///
    /// Returns the first invariant that does not hold.
    fn validated(self) -> Result<Self, InvalidInvariant>
    where
        Self: Sized,
    {
        self.validate()?;
        Ok(self)
    }
}

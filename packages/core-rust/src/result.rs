//! Two-variant handler outcome replacing exception-based control flow.
//!
//! A [`BusResult`] is exactly one of success or failure. It can only be built
//! through its named constructors; the representation is private.

use std::fmt;

use crate::failure::{FailureReason, GenericFailure, MultipleFailureReasons};

/// The failure side of a [`BusResult`].
#[derive(Debug)]
pub enum Failure<F> {
    /// A single reason of the handler's declared failure type.
    Reason(F),
    /// Several reasons reported together.
    Multiple(MultipleFailureReasons),
    /// A reason produced outside the handler (a middleware or the bus itself),
    /// e.g. a lock conflict.
    Raised(Box<dyn FailureReason>),
}

impl<F: FailureReason> Failure<F> {
    /// The reason as a trait object, whatever the variant.
    #[must_use]
    pub fn reason(&self) -> &dyn FailureReason {
        match self {
            Self::Reason(reason) => reason,
            Self::Multiple(multiple) => multiple,
            Self::Raised(reason) => reason.as_ref(),
        }
    }

    /// Borrow the reason as `T`, if it has that type.
    #[must_use]
    pub fn downcast_ref<T: FailureReason>(&self) -> Option<&T> {
        self.reason().downcast_ref::<T>()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.reason().message()
    }
}

#[derive(Debug)]
enum Outcome<T, F> {
    Success(T),
    Failure(Failure<F>),
}

/// Result of a command or query.
#[derive(Debug)]
pub struct BusResult<T, F = GenericFailure> {
    outcome: Outcome<T, F>,
}

impl<T, F: FailureReason> BusResult<T, F> {
    #[must_use]
    pub fn success(value: T) -> Self {
        Self {
            outcome: Outcome::Success(value),
        }
    }

    #[must_use]
    pub fn failure(reason: impl Into<F>) -> Self {
        Self {
            outcome: Outcome::Failure(Failure::Reason(reason.into())),
        }
    }

    #[must_use]
    pub fn failures(reasons: MultipleFailureReasons) -> Self {
        Self {
            outcome: Outcome::Failure(Failure::Multiple(reasons)),
        }
    }

    /// Failure carrying a reason that is not of the declared type `F`.
    #[must_use]
    pub fn from_reason(reason: Box<dyn FailureReason>) -> Self {
        Self {
            outcome: Outcome::Failure(Failure::Raised(reason)),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// The success value, `None` on failure.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure, `None` on success.
    #[must_use]
    pub fn failure_ref(&self) -> Option<&Failure<F>> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// The failure reason as a trait object, `None` on success.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&dyn FailureReason> {
        self.failure_ref().map(Failure::reason)
    }

    /// The failure reason as `X`, if this is a failure of that type.
    #[must_use]
    pub fn downcast_failure<X: FailureReason>(&self) -> Option<&X> {
        self.failure_ref().and_then(Failure::downcast_ref::<X>)
    }

    /// Convert into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the [`Failure`] when this is a failure.
    pub fn into_result(self) -> Result<T, Failure<F>> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }

    /// Map the success value, keeping any failure as is.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BusResult<U, F> {
        BusResult {
            outcome: match self.outcome {
                Outcome::Success(value) => Outcome::Success(f(value)),
                Outcome::Failure(failure) => Outcome::Failure(failure),
            },
        }
    }
}

impl<T: fmt::Debug, F: FailureReason> fmt::Display for BusResult<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success(value) => write!(f, "Success({value:?})"),
            Outcome::Failure(failure) => {
                write!(f, "Failure({})", failure.message().unwrap_or_default())
            }
        }
    }
}

/// Shorthand for [`BusResult::success`].
#[must_use]
pub fn success<T, F: FailureReason>(value: T) -> BusResult<T, F> {
    BusResult::success(value)
}

/// Shorthand for [`BusResult::failure`].
#[must_use]
pub fn failure<T, F: FailureReason>(reason: impl Into<F>) -> BusResult<T, F> {
    BusResult::failure(reason)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BrokenState(String);

    impl FailureReason for BrokenState {
        fn message(&self) -> Option<&str> {
            Some(&self.0)
        }
    }

    #[test]
    fn success_holds_value() {
        let result: BusResult<&str> = success("Test the bus");
        assert!(result.is_success());
        assert_eq!(result.value(), Some(&"Test the bus"));
        assert!(result.failure_reason().is_none());
        assert_eq!(result.to_string(), "Success(\"Test the bus\")");
    }

    #[test]
    fn unit_success() {
        let result: BusResult<()> = success(());
        assert_eq!(result.into_value(), Some(()));
    }

    #[test]
    fn generic_failure_from_message() {
        let result: BusResult<String> = failure("The command failed");
        assert!(result.is_failure());
        assert!(result.value().is_none());
        assert_eq!(
            result.failure_reason().and_then(FailureReason::message),
            Some("The command failed")
        );
        assert_eq!(result.to_string(), "Failure(The command failed)");
    }

    #[test]
    fn typed_failure_is_recoverable() {
        let result: BusResult<String, BrokenState> =
            failure(BrokenState("Illegal state in command handling".into()));

        assert!(matches!(result.failure_ref(), Some(Failure::Reason(_))));
        let reason = result.downcast_failure::<BrokenState>().unwrap();
        assert_eq!(reason.0, "Illegal state in command handling");
        assert_eq!(
            result.to_string(),
            "Failure(Illegal state in command handling)"
        );
    }

    #[test]
    fn multiple_failures_keep_every_reason() {
        let result: BusResult<String> = BusResult::failures(
            MultipleFailureReasons::new()
                .with(GenericFailure::new("The command failed"))
                .with(BrokenState("Illegal state in command handling".into())),
        );

        let Some(Failure::Multiple(multiple)) = result.failure_ref() else {
            panic!("expected a multi-reason failure");
        };
        assert_eq!(multiple.len(), 2);
        assert!(multiple.reasons()[0].is::<GenericFailure>());
        assert!(multiple.reasons()[1].is::<BrokenState>());
        assert_eq!(result.to_string(), "Failure(There were multiple failures)");
    }

    #[test]
    fn raised_reason_of_foreign_type() {
        let result: BusResult<u8, BrokenState> =
            BusResult::from_reason(Box::new(GenericFailure::new("locked")));

        assert!(result.downcast_failure::<BrokenState>().is_none());
        assert_eq!(
            result.downcast_failure::<GenericFailure>().unwrap().message(),
            Some("locked")
        );
    }

    #[test]
    fn map_and_into_result() {
        let doubled: BusResult<u32> = success::<u32, GenericFailure>(21).map(|v| v * 2);
        assert_eq!(doubled.into_result().unwrap(), 42);

        let failed: BusResult<u32> = failure("nope");
        let err = failed.map(|v| v + 1).into_result().unwrap_err();
        assert_eq!(err.message(), Some("nope"));
    }
}

//! `kbus` core: message taxonomy, result and failure model, domain invariants.

pub mod failure;
pub mod invariant;
pub mod message;
pub mod result;

pub use failure::{FailureReason, GenericFailure, MultipleFailureReasons};
pub use invariant::{ensure_invariant, ensure_invariant_with, HasInvariants, InvalidInvariant};
pub use message::{AsAny, Command, Event, LockPolicy, LogVerbs, Message, MessageKind, Query};
pub use result::{failure, success, BusResult, Failure};

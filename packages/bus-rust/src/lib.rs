//! `kbus`: in-process command/query/event bus with a middleware chain and a
//! task-aware bus lock.
//!
//! Message types, results and failures come from `kbus-core` and are
//! re-exported here.

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod loader;
pub mod middleware;
pub mod store;
pub mod task;

pub use bus::{MessageBus, MessageBusBuilder};
pub use config::BusConfig;
pub use error::{BusError, LoadError};
pub use handler::{CommandHandler, EventHandler, QueryHandler, RegisteredHandler};
pub use loader::{DependencyLoader, FactoryLoader};
pub use middleware::{
    build_chain, BusLockedFailure, BusLocker, Envelope, InvalidInvariantCatcher, Logger,
    MessageLogger, Middleware, Next, Reply, TracingLogger,
};
pub use store::{MessageKey, MessageStore};
pub use task::TaskIdentity;

pub use kbus_core::{
    ensure_invariant, ensure_invariant_with, failure, impl_command, impl_event, impl_query,
    success, BusResult, Command, Event, Failure, FailureReason, GenericFailure, HasInvariants,
    InvalidInvariant, LockPolicy, LogVerbs, Message, MessageKind, MultipleFailureReasons, Query,
};

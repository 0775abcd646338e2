//! Handler traits and their type-erased form held by the bus.
//!
//! Handlers are stateless-by-convention async services shared behind an
//! `Arc`. The bus only ever sees [`RegisteredHandler`], which pairs the
//! handler's identity with an adapter that downcasts the incoming message and
//! boxes the outcome.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use kbus_core::{BusResult, Command, Event, Message, Query};

// ---------------------------------------------------------------------------
// Public handler traits
// ---------------------------------------------------------------------------

/// Handles one command type.
///
/// Expected business failures are returned as a failed [`BusResult`];
/// `Err` is reserved for unexpected errors, which propagate out of the bus.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(&self, command: &C) -> anyhow::Result<BusResult<C::Output, C::Failure>>;
}

/// Handles one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    async fn handle(&self, query: &Q) -> anyhow::Result<BusResult<Q::Output, Q::Failure>>;
}

/// Reacts to one event type. Events produce no value.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

pub(crate) type Outcome = Box<dyn Any + Send>;

trait ErasedHandler: Send + Sync {
    fn call<'a>(&'a self, message: &'a dyn Message) -> BoxFuture<'a, anyhow::Result<Outcome>>;
}

fn downcast<'a, M: Message>(message: &'a dyn Message, handler: &'static str) -> anyhow::Result<&'a M> {
    message.downcast_ref::<M>().ok_or_else(|| {
        anyhow!(
            "handler {handler} cannot handle {message:?}, expected {}",
            type_name::<M>()
        )
    })
}

struct CommandAdapter<C, H: ?Sized> {
    handler: Arc<H>,
    _message: PhantomData<fn(&C)>,
}

impl<C, H> ErasedHandler for CommandAdapter<C, H>
where
    C: Command,
    H: CommandHandler<C> + ?Sized,
{
    fn call<'a>(&'a self, message: &'a dyn Message) -> BoxFuture<'a, anyhow::Result<Outcome>> {
        Box::pin(async move {
            let command = downcast::<C>(message, type_name::<H>())?;
            let result = self.handler.handle(command).await?;
            Ok(Box::new(result) as Outcome)
        })
    }
}

struct QueryAdapter<Q, H: ?Sized> {
    handler: Arc<H>,
    _message: PhantomData<fn(&Q)>,
}

impl<Q, H> ErasedHandler for QueryAdapter<Q, H>
where
    Q: Query,
    H: QueryHandler<Q> + ?Sized,
{
    fn call<'a>(&'a self, message: &'a dyn Message) -> BoxFuture<'a, anyhow::Result<Outcome>> {
        Box::pin(async move {
            let query = downcast::<Q>(message, type_name::<H>())?;
            let result = self.handler.handle(query).await?;
            Ok(Box::new(result) as Outcome)
        })
    }
}

struct EventAdapter<E, H: ?Sized> {
    handler: Arc<H>,
    _message: PhantomData<fn(&E)>,
}

impl<E, H> ErasedHandler for EventAdapter<E, H>
where
    E: Event,
    H: EventHandler<E> + ?Sized,
{
    fn call<'a>(&'a self, message: &'a dyn Message) -> BoxFuture<'a, anyhow::Result<Outcome>> {
        Box::pin(async move {
            let event = downcast::<E>(message, type_name::<H>())?;
            self.handler.handle(event).await?;
            Ok(Box::new(()) as Outcome)
        })
    }
}

// ---------------------------------------------------------------------------
// RegisteredHandler
// ---------------------------------------------------------------------------

/// A handler instance as stored by the bus.
///
/// Two registered handlers are the same when they wrap the same `Arc`
/// allocation; that identity is what deregistration matches on.
#[derive(Clone)]
pub struct RegisteredHandler {
    identity: usize,
    name: &'static str,
    inner: Arc<dyn ErasedHandler>,
}

impl RegisteredHandler {
    #[must_use]
    pub fn command<C, H>(handler: Arc<H>) -> Self
    where
        C: Command,
        H: CommandHandler<C> + ?Sized,
    {
        Self {
            identity: identity_of(&handler),
            name: type_name::<H>(),
            inner: Arc::new(CommandAdapter {
                handler,
                _message: PhantomData,
            }),
        }
    }

    #[must_use]
    pub fn query<Q, H>(handler: Arc<H>) -> Self
    where
        Q: Query,
        H: QueryHandler<Q> + ?Sized,
    {
        Self {
            identity: identity_of(&handler),
            name: type_name::<H>(),
            inner: Arc::new(QueryAdapter {
                handler,
                _message: PhantomData,
            }),
        }
    }

    #[must_use]
    pub fn event<E, H>(handler: Arc<H>) -> Self
    where
        E: Event,
        H: EventHandler<E> + ?Sized,
    {
        Self {
            identity: identity_of(&handler),
            name: type_name::<H>(),
            inner: Arc::new(EventAdapter {
                handler,
                _message: PhantomData,
            }),
        }
    }

    /// Type name of the wrapped handler.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether both wrap the same handler instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        self.identity == other.identity
    }

    /// Invoke the handler with `message`, returning its boxed outcome.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or an error if `message` is not the type
    /// this handler was registered for.
    pub async fn call(&self, message: &dyn Message) -> anyhow::Result<Box<dyn Any + Send>> {
        self.inner.call(message).await
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .field("identity", &format_args!("{:#x}", self.identity))
            .finish()
    }
}

fn identity_of<H: ?Sized>(handler: &Arc<H>) -> usize {
    Arc::as_ptr(handler).cast::<()>() as usize
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The message bus facade.
//!
//! Owns one [`MessageStore`] per message kind and the middleware chain. The
//! chain is built once by [`MessageBusBuilder::build`]; every submission
//! resolves its handlers up front and travels the chain in an [`Envelope`].

use std::any::type_name;
use std::sync::Arc;

use kbus_core::{BusResult, Command, Event, Query};
use tracing::{debug, debug_span, trace, Instrument};

use crate::config::BusConfig;
use crate::error::BusError;
use crate::handler::{CommandHandler, EventHandler, QueryHandler, RegisteredHandler};
use crate::loader::DependencyLoader;
use crate::middleware::{
    build_chain, BusLocker, Envelope, MessageLogger, Middleware, Next, Reply, TracingLogger,
};
use crate::store::{invoke_handlers, MessageKey, MessageStore};

// ---------------------------------------------------------------------------
// MessageBusBuilder
// ---------------------------------------------------------------------------

/// Configures the middleware list, loader and config of a [`MessageBus`].
#[derive(Default)]
pub struct MessageBusBuilder {
    config: BusConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
    loader: Option<Arc<dyn DependencyLoader>>,
}

impl MessageBusBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Config used by [`with_locker`](Self::with_locker) and
    /// [`with_logging`](Self::with_logging). Set it before calling those.
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a middleware. The first one added is the outermost.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Append a [`BusLocker`] built from the config.
    #[must_use]
    pub fn with_locker(self) -> Self {
        let locker = BusLocker::from_config(&self.config);
        self.middleware(Arc::new(locker))
    }

    /// Append a tracing-backed [`MessageLogger`] using the config's levels.
    #[must_use]
    pub fn with_logging(self) -> Self {
        let logger = MessageLogger::from_config(Arc::new(TracingLogger), &self.config);
        self.middleware(Arc::new(logger))
    }

    /// Loader used by the type-based registration and execution methods.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn DependencyLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    #[must_use]
    pub fn build(self) -> MessageBus {
        let terminal = Next::from_fn(|envelope: Envelope| async move {
            invoke_handlers(envelope.message(), envelope.handlers()).await
        });

        debug!(middlewares = self.middlewares.len(), "message bus built");
        MessageBus {
            commands: MessageStore::new(),
            queries: MessageStore::new(),
            events: MessageStore::new(),
            chain: build_chain(terminal, &self.middlewares),
            loader: self.loader,
            config: self.config,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// Routes commands, queries and events to their handlers through the
/// middleware chain.
///
/// Commands and queries have exactly one handler, either registered up front
/// or passed with the message. Events go to every registered handler plus
/// any passed with the event.
pub struct MessageBus {
    commands: MessageStore,
    queries: MessageStore,
    events: MessageStore,
    chain: Next,
    loader: Option<Arc<dyn DependencyLoader>>,
    config: BusConfig,
}

impl MessageBus {
    /// A bus without middleware or loader.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // -- Commands -----------------------------------------------------------

    /// Execute `command` with `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TooManyHandlers`] if a handler is registered for
    /// the command type, and any error raised by middleware or the handler.
    pub async fn execute<C, H>(
        &self,
        command: C,
        handler: Arc<H>,
    ) -> Result<BusResult<C::Output, C::Failure>, BusError>
    where
        C: Command,
        H: CommandHandler<C> + ?Sized,
    {
        let key = MessageKey::of::<C>();
        if self.commands.is_registered(key) {
            return Err(BusError::TooManyHandlers { message: key.name() });
        }

        let handlers = vec![RegisteredHandler::command::<C, H>(handler)];
        self.run(Envelope::routed(Arc::new(command), handlers))
            .await?
            .into_bus_result(key.name())
    }

    /// Execute `command` with its registered handler.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if no handler is registered, and
    /// any error raised by middleware or the handler.
    pub async fn execute_registered<C: Command>(
        &self,
        command: C,
    ) -> Result<BusResult<C::Output, C::Failure>, BusError> {
        let key = MessageKey::of::<C>();
        let handlers = self.registered(&self.commands, key)?;
        self.run(Envelope::routed(Arc::new(command), handlers))
            .await?
            .into_bus_result(key.name())
    }

    /// Execute `command` with a handler of type `H` obtained from the loader.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingLoader`] without a loader, a
    /// [`BusError::Load`] if the handler cannot be loaded, and otherwise as
    /// [`execute`](Self::execute).
    pub async fn execute_command_type<C, H>(
        &self,
        command: C,
    ) -> Result<BusResult<C::Output, C::Failure>, BusError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let handler = self.loader()?.load::<H>()?;
        self.execute(command, handler).await
    }

    /// Register `handler` as the handler for `C`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TooManyHandlers`] if one is already registered.
    pub fn register_command<C, H>(&self, handler: Arc<H>) -> Result<(), BusError>
    where
        C: Command,
        H: CommandHandler<C> + ?Sized,
    {
        let key = MessageKey::of::<C>();
        self.commands
            .register_unique(key, RegisteredHandler::command::<C, H>(handler))?;
        debug!(message = key.name(), handler = type_name::<H>(), "command handler registered");
        Ok(())
    }

    /// Register a handler of type `H`, obtained from the loader, for `C`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingLoader`] without a loader, a
    /// [`BusError::Load`] if the handler cannot be loaded, and otherwise as
    /// [`register_command`](Self::register_command).
    pub fn register_command_type<C, H>(&self) -> Result<(), BusError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let handler = self.loader()?.load::<H>()?;
        self.register_command::<C, H>(handler)
    }

    /// Remove the handler registered for `C`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if none is registered.
    pub fn deregister_command<C: Command>(&self) -> Result<(), BusError> {
        self.commands.remove_handlers(MessageKey::of::<C>(), &[])
    }

    #[must_use]
    pub fn is_registered<C: Command>(&self) -> bool {
        self.commands.is_registered(MessageKey::of::<C>())
    }

    // -- Queries ------------------------------------------------------------

    /// Process `query` with `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TooManyHandlers`] if a handler is registered for
    /// the query type, and any error raised by middleware or the handler.
    pub async fn query<Q, H>(
        &self,
        query: Q,
        handler: Arc<H>,
    ) -> Result<BusResult<Q::Output, Q::Failure>, BusError>
    where
        Q: Query,
        H: QueryHandler<Q> + ?Sized,
    {
        let key = MessageKey::of::<Q>();
        if self.queries.is_registered(key) {
            return Err(BusError::TooManyHandlers { message: key.name() });
        }

        let handlers = vec![RegisteredHandler::query::<Q, H>(handler)];
        self.run(Envelope::routed(Arc::new(query), handlers))
            .await?
            .into_bus_result(key.name())
    }

    /// Process `query` with its registered handler.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if no handler is registered, and
    /// any error raised by middleware or the handler.
    pub async fn query_registered<Q: Query>(
        &self,
        query: Q,
    ) -> Result<BusResult<Q::Output, Q::Failure>, BusError> {
        let key = MessageKey::of::<Q>();
        let handlers = self.registered(&self.queries, key)?;
        self.run(Envelope::routed(Arc::new(query), handlers))
            .await?
            .into_bus_result(key.name())
    }

    /// Process `query` with a handler of type `H` obtained from the loader.
    ///
    /// # Errors
    ///
    /// As [`execute_command_type`](Self::execute_command_type).
    pub async fn query_type<Q, H>(&self, query: Q) -> Result<BusResult<Q::Output, Q::Failure>, BusError>
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let handler = self.loader()?.load::<H>()?;
        self.query(query, handler).await
    }

    /// Register `handler` as the handler for `Q`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TooManyHandlers`] if one is already registered.
    pub fn register_query<Q, H>(&self, handler: Arc<H>) -> Result<(), BusError>
    where
        Q: Query,
        H: QueryHandler<Q> + ?Sized,
    {
        let key = MessageKey::of::<Q>();
        self.queries
            .register_unique(key, RegisteredHandler::query::<Q, H>(handler))?;
        debug!(message = key.name(), handler = type_name::<H>(), "query handler registered");
        Ok(())
    }

    /// Register a handler of type `H`, obtained from the loader, for `Q`.
    ///
    /// # Errors
    ///
    /// As [`register_command_type`](Self::register_command_type).
    pub fn register_query_type<Q, H>(&self) -> Result<(), BusError>
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let handler = self.loader()?.load::<H>()?;
        self.register_query::<Q, H>(handler)
    }

    /// Remove the handler registered for `Q`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if none is registered.
    pub fn deregister_query<Q: Query>(&self) -> Result<(), BusError> {
        self.queries.remove_handlers(MessageKey::of::<Q>(), &[])
    }

    #[must_use]
    pub fn is_query_registered<Q: Query>(&self) -> bool {
        self.queries.is_registered(MessageKey::of::<Q>())
    }

    // -- Events -------------------------------------------------------------

    /// Dispatch `event` to its registered handlers followed by `handlers`.
    ///
    /// Handlers run one after another; the first error stops the rest.
    ///
    /// # Errors
    ///
    /// Returns any error raised by middleware or a handler.
    pub async fn dispatch<E: Event>(
        &self,
        event: E,
        handlers: impl IntoIterator<Item = Arc<dyn EventHandler<E>>>,
    ) -> Result<(), BusError> {
        let extra = handlers
            .into_iter()
            .map(RegisteredHandler::event::<E, dyn EventHandler<E>>)
            .collect();
        let handlers = self.events.resolve(MessageKey::of::<E>(), extra);

        let reply = self.run(Envelope::routed(Arc::new(event), handlers)).await?;
        if let Some(reason) = reply.failure_reason() {
            debug!(reason = %reason, "event not dispatched yet");
        }
        Ok(())
    }

    /// Dispatch `event` to its registered handlers only.
    ///
    /// # Errors
    ///
    /// As [`dispatch`](Self::dispatch).
    pub async fn dispatch_registered<E: Event>(&self, event: E) -> Result<(), BusError> {
        self.dispatch(event, []).await
    }

    /// Append `handlers` to those registered for `E`.
    pub fn register_events<E: Event>(
        &self,
        handlers: impl IntoIterator<Item = Arc<dyn EventHandler<E>>>,
    ) {
        let key = MessageKey::of::<E>();
        self.events.register_handlers(
            key,
            handlers
                .into_iter()
                .map(RegisteredHandler::event::<E, dyn EventHandler<E>>),
        );
        debug!(
            message = key.name(),
            handlers = self.events.handler_count(key),
            "event handlers registered"
        );
    }

    /// Register a handler of type `H`, obtained from the loader, for `E`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingLoader`] without a loader, or a
    /// [`BusError::Load`] if the handler cannot be loaded.
    pub fn register_event_type<E, H>(&self) -> Result<(), BusError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let handler: Arc<dyn EventHandler<E>> = self.loader()?.load::<H>()?;
        self.register_events([handler]);
        Ok(())
    }

    /// Remove `handlers` from those registered for `E`, or every handler when
    /// `handlers` is empty. Handlers are matched by instance.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if `E` was never registered.
    pub fn deregister_events<E: Event>(
        &self,
        handlers: &[Arc<dyn EventHandler<E>>],
    ) -> Result<(), BusError> {
        let handlers: Vec<_> = handlers
            .iter()
            .cloned()
            .map(RegisteredHandler::event::<E, dyn EventHandler<E>>)
            .collect();
        self.events.remove_handlers(MessageKey::of::<E>(), &handlers)
    }

    /// Number of handlers registered for `E`.
    #[must_use]
    pub fn event_handler_count<E: Event>(&self) -> usize {
        self.events.handler_count(MessageKey::of::<E>())
    }

    // -- Internals ----------------------------------------------------------

    async fn run(&self, envelope: Envelope) -> Result<Reply, BusError> {
        let message = envelope.message();
        let span = debug_span!("message", kind = %message.kind(), name = message.name());
        trace!(parent: &span, handlers = envelope.handlers().len(), "message submitted");

        self.chain.share().run(envelope).instrument(span).await
    }

    fn registered(
        &self,
        store: &MessageStore,
        key: MessageKey,
    ) -> Result<Vec<RegisteredHandler>, BusError> {
        if !store.is_registered(key) {
            return Err(BusError::MissingHandler { message: key.name() });
        }
        Ok(store.get_handlers(key))
    }

    fn loader(&self) -> Result<&dyn DependencyLoader, BusError> {
        self.loader.as_deref().ok_or(BusError::MissingLoader)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

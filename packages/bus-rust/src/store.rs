//! Handler registry keyed by message type.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kbus_core::Message;

use crate::error::BusError;
use crate::handler::RegisteredHandler;
use crate::middleware::Reply;

// ---------------------------------------------------------------------------
// MessageKey
// ---------------------------------------------------------------------------

/// Identity of a message type. Equality and hashing use the `TypeId` only.
#[derive(Debug, Clone, Copy)]
pub struct MessageKey {
    id: TypeId,
    name: &'static str,
}

impl MessageKey {
    #[must_use]
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: short_name::<M>(),
        }
    }

    /// Key of the concrete type behind a message trait object.
    #[must_use]
    pub fn of_message(message: &dyn Message) -> Self {
        Self {
            id: message.as_any().type_id(),
            name: message.name(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageKey {}

impl Hash for MessageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn short_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

/// Ordered handler lists per message type.
///
/// A key is present once handlers were registered for it, even if a later
/// partial deregistration left its list empty. Only a full deregistration
/// removes the key.
#[derive(Default)]
pub struct MessageStore {
    handlers: DashMap<MessageKey, Vec<RegisteredHandler>>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handlers` to the list for `key`, keeping earlier ones.
    pub fn register_handlers(
        &self,
        key: MessageKey,
        handlers: impl IntoIterator<Item = RegisteredHandler>,
    ) {
        self.handlers.entry(key).or_default().extend(handlers);
    }

    /// Register `handler` as the only handler for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TooManyHandlers`] if `key` is already registered.
    pub fn register_unique(&self, key: MessageKey, handler: RegisteredHandler) -> Result<(), BusError> {
        match self.handlers.entry(key) {
            Entry::Occupied(_) => Err(BusError::TooManyHandlers { message: key.name }),
            Entry::Vacant(entry) => {
                entry.insert(vec![handler]);
                Ok(())
            }
        }
    }

    /// Remove handlers for `key`.
    ///
    /// An empty `handlers` slice removes the key entirely. Otherwise every
    /// registered handler that is the same instance as one in `handlers` is
    /// dropped; unknown instances are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingHandler`] if `key` was never registered.
    pub fn remove_handlers(
        &self,
        key: MessageKey,
        handlers: &[RegisteredHandler],
    ) -> Result<(), BusError> {
        let missing = || BusError::MissingHandler { message: key.name };

        if handlers.is_empty() {
            return self.handlers.remove(&key).map(|_| ()).ok_or_else(missing);
        }

        let mut registered = self.handlers.get_mut(&key).ok_or_else(missing)?;
        registered.retain(|handler| !handlers.iter().any(|h| h.same_instance(handler)));
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, key: MessageKey) -> bool {
        self.handlers.contains_key(&key)
    }

    /// Snapshot of the handlers for `key`, empty if none.
    #[must_use]
    pub fn get_handlers(&self, key: MessageKey) -> Vec<RegisteredHandler> {
        self.handlers
            .get(&key)
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn handler_count(&self, key: MessageKey) -> usize {
        self.handlers.get(&key).map_or(0, |handlers| handlers.len())
    }

    /// Registered handlers for `key` followed by `extra`.
    #[must_use]
    pub fn resolve(&self, key: MessageKey, extra: Vec<RegisteredHandler>) -> Vec<RegisteredHandler> {
        let mut handlers = self.get_handlers(key);
        handlers.extend(extra);
        handlers
    }

    /// Run `message` through its registered handlers plus `extra`.
    ///
    /// # Errors
    ///
    /// Propagates the first handler error.
    pub async fn handle(
        &self,
        message: &dyn Message,
        extra: Vec<RegisteredHandler>,
    ) -> Result<Reply, BusError> {
        let handlers = self.resolve(MessageKey::of_message(message), extra);
        invoke_handlers(message, &handlers).await
    }
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore")
            .field("message_types", &self.handlers.len())
            .finish()
    }
}

/// Invoke `handlers` in order.
///
/// A single handler's output is returned as [`Reply::Value`]. Zero or several
/// handlers run one after another and yield [`Reply::Empty`]; the first error
/// stops the remaining ones.
///
/// # Errors
///
/// Returns the failing handler's error as [`BusError::Handler`].
pub async fn invoke_handlers(
    message: &dyn Message,
    handlers: &[RegisteredHandler],
) -> Result<Reply, BusError> {
    if let [handler] = handlers {
        return Ok(Reply::Value(handler.call(message).await?));
    }
    for handler in handlers {
        handler.call(message).await?;
    }
    Ok(Reply::Empty)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use kbus_core::{impl_command, impl_event, success, BusResult, GenericFailure};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::handler::{CommandHandler, EventHandler};

    struct ReturnCommand(String);
    impl_command!(ReturnCommand => String, GenericFailure);

    struct ReturnCommandHandler;

    #[async_trait]
    impl CommandHandler<ReturnCommand> for ReturnCommandHandler {
        async fn handle(&self, command: &ReturnCommand) -> anyhow::Result<BusResult<String>> {
            Ok(success(command.0.clone()))
        }
    }

    struct StorageEvent {
        data: &'static str,
        store: Arc<Mutex<Vec<String>>>,
    }
    impl_event!(StorageEvent);

    struct PrintEventHandler(&'static str);

    #[async_trait]
    impl EventHandler<StorageEvent> for PrintEventHandler {
        async fn handle(&self, event: &StorageEvent) -> anyhow::Result<()> {
            event.store.lock().push(format!("{}:{}", self.0, event.data));
            Ok(())
        }
    }

    fn return_handler() -> RegisteredHandler {
        RegisteredHandler::command::<ReturnCommand, _>(Arc::new(ReturnCommandHandler))
    }

    fn print_handler(name: &'static str) -> RegisteredHandler {
        RegisteredHandler::event::<StorageEvent, _>(Arc::new(PrintEventHandler(name)))
    }

    fn result_of(reply: Reply) -> BusResult<String> {
        reply.into_bus_result("ReturnCommand").unwrap()
    }

    #[tokio::test]
    async fn handle_with_explicit_handler_returns_value() {
        let store = MessageStore::new();
        let reply = store
            .handle(&ReturnCommand("Testing".into()), vec![return_handler()])
            .await
            .unwrap();

        assert_eq!(result_of(reply).into_value().as_deref(), Some("Testing"));
    }

    #[tokio::test]
    async fn handle_finds_a_previously_registered_message() {
        let store = MessageStore::new();
        store.register_handlers(MessageKey::of::<ReturnCommand>(), [return_handler()]);

        let reply = store
            .handle(&ReturnCommand("Testing".into()), Vec::new())
            .await
            .unwrap();

        assert_eq!(result_of(reply).into_value().as_deref(), Some("Testing"));
    }

    #[tokio::test]
    async fn fan_out_runs_every_handler_in_order() {
        let store = MessageStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.register_handlers(MessageKey::of::<StorageEvent>(), [print_handler("a")]);

        let event = StorageEvent {
            data: "x",
            store: Arc::clone(&log),
        };
        let reply = store.handle(&event, vec![print_handler("b")]).await.unwrap();

        assert!(reply.is_empty());
        assert_eq!(*log.lock(), ["a:x", "b:x"]);
    }

    #[tokio::test]
    async fn no_handlers_is_a_no_op() {
        let store = MessageStore::new();
        let event = StorageEvent {
            data: "x",
            store: Arc::new(Mutex::new(Vec::new())),
        };

        assert!(store.handle(&event, Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn is_registered_only_for_registered_types() {
        let store = MessageStore::new();
        store.register_handlers(MessageKey::of::<StorageEvent>(), [print_handler("a")]);

        assert!(store.is_registered(MessageKey::of::<StorageEvent>()));
        assert!(!store.is_registered(MessageKey::of::<ReturnCommand>()));
    }

    #[test]
    fn registration_appends() {
        let store = MessageStore::new();
        let key = MessageKey::of::<StorageEvent>();
        let first = print_handler("a");
        store.register_handlers(key, [first.clone(), print_handler("b")]);
        store.register_handlers(key, [print_handler("c")]);

        let handlers = store.get_handlers(key);
        assert_eq!(handlers.len(), 3);
        assert!(handlers[0].same_instance(&first));
    }

    #[test]
    fn unique_registration_rejects_a_second_handler() {
        let store = MessageStore::new();
        let key = MessageKey::of::<ReturnCommand>();
        store.register_unique(key, return_handler()).unwrap();

        let err = store.register_unique(key, return_handler()).unwrap_err();
        assert!(matches!(err, BusError::TooManyHandlers { .. }));
        assert_eq!(store.handler_count(key), 1);
    }

    #[test]
    fn remove_handlers_removes_given_instances() {
        let store = MessageStore::new();
        let key = MessageKey::of::<StorageEvent>();
        let (h1, h2, h3) = (print_handler("a"), print_handler("b"), print_handler("a"));
        store.register_handlers(key, [h1.clone(), h2.clone(), h3.clone()]);

        store.remove_handlers(key, &[h1, h3]).unwrap();

        let remaining = store.get_handlers(key);
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].same_instance(&h2));
    }

    #[test]
    fn remove_handlers_removes_all_by_default() {
        let store = MessageStore::new();
        let key = MessageKey::of::<StorageEvent>();
        store.register_handlers(key, [print_handler("a"), print_handler("b")]);

        store.remove_handlers(key, &[]).unwrap();

        assert!(!store.is_registered(key));
        assert_eq!(store.handler_count(key), 0);
    }

    #[test]
    fn remove_handlers_errors_if_message_is_not_registered() {
        let store = MessageStore::new();
        let err = store
            .remove_handlers(MessageKey::of::<ReturnCommand>(), &[])
            .unwrap_err();

        assert!(matches!(
            err,
            BusError::MissingHandler {
                message: "ReturnCommand"
            }
        ));
    }

    #[test]
    fn key_of_message_matches_key_of_type() {
        let command: &dyn Message = &ReturnCommand("x".into());
        assert_eq!(MessageKey::of_message(command), MessageKey::of::<ReturnCommand>());
        assert_eq!(MessageKey::of::<ReturnCommand>().to_string(), "ReturnCommand");
    }

    proptest! {
        /// Registering `n` handlers then removing a subset leaves exactly the
        /// complement, in registration order.
        #[test]
        fn removal_leaves_the_complement(mask in proptest::collection::vec(any::<bool>(), 1..12)) {
            let store = MessageStore::new();
            let key = MessageKey::of::<StorageEvent>();
            let handlers: Vec<_> = mask.iter().map(|_| print_handler("h")).collect();
            store.register_handlers(key, handlers.clone());

            let removed: Vec<_> = handlers
                .iter()
                .zip(&mask)
                .filter(|(_, remove)| **remove)
                .map(|(h, _)| h.clone())
                .collect();
            let kept: Vec<_> = handlers
                .iter()
                .zip(&mask)
                .filter(|(_, remove)| !**remove)
                .map(|(h, _)| h.clone())
                .collect();

            if removed.is_empty() {
                prop_assert_eq!(store.handler_count(key), kept.len());
            } else {
                store.remove_handlers(key, &removed).unwrap();
                let remaining = store.get_handlers(key);
                prop_assert_eq!(remaining.len(), kept.len());
                for (left, right) in remaining.iter().zip(&kept) {
                    prop_assert!(left.same_instance(right));
                }
            }
            prop_assert!(store.is_registered(key));
        }
    }
}

//! Translates invariant violations into failure reasons for messages that
//! opt in through [`map_invariant`](kbus_core::Message::map_invariant).

use async_trait::async_trait;
use kbus_core::InvalidInvariant;
use tracing::debug;

use super::{Envelope, Middleware, Next, Reply};
use crate::error::BusError;

/// Catches [`InvalidInvariant`] errors raised by handlers.
///
/// Every other error, and violations raised for messages that do not map
/// them, propagate unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidInvariantCatcher;

#[async_trait]
impl Middleware for InvalidInvariantCatcher {
    async fn handle(&self, envelope: Envelope, next: Next) -> Result<Reply, BusError> {
        let message = envelope.shared_message();

        match next.run(envelope).await {
            Err(BusError::Handler(err)) => {
                let mapped = err
                    .downcast_ref::<InvalidInvariant>()
                    .and_then(|violation| message.map_invariant(violation));
                match mapped {
                    Some(reason) => {
                        debug!(message = message.name(), "invariant violation mapped to failure");
                        Ok(Reply::Failed(reason))
                    }
                    None => Err(BusError::Handler(err)),
                }
            }
            other => other,
        }
    }
}

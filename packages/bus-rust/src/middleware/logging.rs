//! Logging middleware for messages that opt in via
//! [`is_logged`](kbus_core::Message::is_logged).
//!
//! Log lines go to a pluggable [`Logger`]; [`TracingLogger`] forwards them to
//! `tracing` events at the configured level.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Level;

use super::{Envelope, Middleware, Next, Reply};
use crate::config::BusConfig;
use crate::error::BusError;

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Sink for message log lines.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, line: &str, error: Option<&BusError>);
}

/// Emits each line as a `tracing` event under the `kbus` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, line: &str, error: Option<&BusError>) {
        macro_rules! emit {
            ($lvl:expr) => {
                match error {
                    Some(err) => tracing::event!(target: "kbus", $lvl, error = %err, "{line}"),
                    None => tracing::event!(target: "kbus", $lvl, "{line}"),
                }
            };
        }

        match level {
            Level::ERROR => emit!(Level::ERROR),
            Level::WARN => emit!(Level::WARN),
            Level::INFO => emit!(Level::INFO),
            Level::DEBUG => emit!(Level::DEBUG),
            _ => emit!(Level::TRACE),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageLogger
// ---------------------------------------------------------------------------

/// Logs before and after handling, and on error before re-raising it.
pub struct MessageLogger {
    logger: Arc<dyn Logger>,
    pre_handle: Level,
    post_handle: Level,
    error: Level,
}

impl MessageLogger {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>, pre_handle: Level, post_handle: Level, error: Level) -> Self {
        Self {
            logger,
            pre_handle,
            post_handle,
            error,
        }
    }

    /// Levels taken from `config`.
    #[must_use]
    pub fn from_config(logger: Arc<dyn Logger>, config: &BusConfig) -> Self {
        Self::new(
            logger,
            config.pre_handle_level,
            config.post_handle_level,
            config.error_level,
        )
    }

    /// A logger writing to `tracing` with the default levels.
    #[must_use]
    pub fn tracing() -> Self {
        Self::from_config(Arc::new(TracingLogger), &BusConfig::default())
    }
}

#[async_trait]
impl Middleware for MessageLogger {
    async fn handle(&self, envelope: Envelope, next: Next) -> Result<Reply, BusError> {
        let message = envelope.shared_message();
        if !message.is_logged() {
            return next.run(envelope).await;
        }

        self.logger.log(self.pre_handle, &message.pre_handle_log(), None);

        match next.run(envelope).await {
            Ok(reply) => {
                self.logger
                    .log(self.post_handle, &message.post_handle_log(), None);
                Ok(reply)
            }
            Err(err) => {
                self.logger.log(self.error, &message.error_log(), Some(&err));
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

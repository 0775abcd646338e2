//! Chain composition: folds the middleware list into a single continuation.

use std::sync::Arc;

use super::{Middleware, Next};

/// Wrap `terminal` with `middlewares`.
///
/// The first middleware in the list is the outermost: it sees the message
/// first and the reply last. The fold happens once; the returned [`Next`] is
/// reused for every message.
#[must_use]
pub fn build_chain(terminal: Next, middlewares: &[Arc<dyn Middleware>]) -> Next {
    middlewares.iter().rev().fold(terminal, |inner, middleware| {
        let middleware = Arc::clone(middleware);
        Next::from_fn(move |envelope| {
            let middleware = Arc::clone(&middleware);
            let inner = inner.share();
            async move { middleware.handle(envelope, inner).await }
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

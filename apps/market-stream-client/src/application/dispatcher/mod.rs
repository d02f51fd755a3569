//! Message Dispatcher
//!
//! Routes decoded inbound frames to the handlers registered for their
//! message type. Registration is independent of connection state.
//!
//! # Guarantees
//!
//! - Handlers for a type run in registration order, once per frame.
//! - A handler that returns `Err` or panics is logged and skipped over;
//!   the remaining handlers still run.
//! - Handlers run with no lock held, so they may register or remove
//!   handlers (or subscribe) from inside a callback. Such changes apply
//!   from the next frame on.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::messages::{InboundFrame, MessageType};

// =============================================================================
// Handlers
// =============================================================================

type HandlerFn = dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync;

/// A registered callback.
///
/// Identity is the identity of the wrapped closure: clones of one handler
/// are the same handler, two handlers built from identical code are not.
///
/// # Example
///
/// ```rust
/// use market_stream_client::MessageHandler;
///
/// let handler = MessageHandler::new(|data| {
///     println!("{data}");
///     Ok(())
/// });
/// let same = handler.clone();
/// assert!(handler.same_as(&same));
/// ```
#[derive(Clone)]
pub struct MessageHandler(Arc<HandlerFn>);

impl MessageHandler {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Whether `self` and `other` are the same registration target.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, data: &Value) -> anyhow::Result<()> {
        (self.0)(data)
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageHandler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

// =============================================================================
// Dispatch Report
// =============================================================================

/// Outcome of routing one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl DispatchReport {
    /// Whether no handler was registered for the frame's type.
    #[must_use]
    pub const fn unhandled(&self) -> bool {
        self.invoked == 0
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Message type → ordered handler list.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<MessageType, Vec<MessageHandler>>>,
}

impl Dispatcher {
    /// Create a dispatcher with no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `message_type`.
    ///
    /// Registering the same handler twice makes it run twice per frame.
    pub fn on(&self, message_type: impl Into<MessageType>, handler: MessageHandler) {
        let message_type = message_type.into();
        tracing::trace!(%message_type, "Registering handler");
        self.handlers
            .write()
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// Remove the first registration of `handler` for `message_type`.
    ///
    /// Returns `true` if a registration was removed.
    pub fn off(&self, message_type: impl Into<MessageType>, handler: &MessageHandler) -> bool {
        let message_type = message_type.into();
        let mut handlers = self.handlers.write();

        let Some(list) = handlers.get_mut(&message_type) else {
            return false;
        };
        let Some(index) = list.iter().position(|h| h.same_as(handler)) else {
            return false;
        };

        list.remove(index);
        if list.is_empty() {
            handlers.remove(&message_type);
        }
        true
    }

    /// Number of registrations for `message_type`.
    #[must_use]
    pub fn handler_count(&self, message_type: &MessageType) -> usize {
        self.handlers.read().get(message_type).map_or(0, Vec::len)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Invoke every handler registered for the frame's type, in order.
    pub fn dispatch(&self, frame: &InboundFrame) -> DispatchReport {
        let snapshot = self
            .handlers
            .read()
            .get(&frame.message_type)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(message_type = %frame.message_type, "No handlers registered");
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for (index, handler) in snapshot.iter().enumerate() {
            report.invoked += 1;

            match catch_unwind(AssertUnwindSafe(|| handler.call(&frame.data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        message_type = %frame.message_type,
                        handler = index,
                        error = %e,
                        "Handler returned an error"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        message_type = %frame.message_type,
                        handler = index,
                        panic = panic_message(panic.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        }

        report
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for (message_type, list) in handlers.iter() {
            map.entry(&message_type.as_str(), &list.len());
        }
        map.finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// Copyright 2025 Cowboy AI, LLC.

//! Business handler contract and the event-type registry

use crate::record::EventRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Error raised by a business handler
///
/// The choreographer catches and logs these; they never propagate to the
/// bus subscription layer and never un-acknowledge a message.
#[derive(Debug, Error)]
#[error("Handler failed: {0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error with the given reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A pluggable business handler for one event type
///
/// `handle` receives the opaque business payload verbatim and the durable
/// record it was stored under. Handlers must be idempotent: a record whose
/// processed transition was never written will be re-run by the recovery
/// sweep.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event-type tag this handler serves
    fn event_type(&self) -> &str;

    /// Handle one event
    async fn handle(&self, payload: &[u8], record: &EventRecord) -> Result<(), HandlerError>;
}

/// Static mapping from event-type tag to business handler
///
/// Built once at startup from the available handler implementations. An
/// event type with no registered handler is not an error here; it surfaces
/// at dispatch time as a logged configuration gap.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its event type
    ///
    /// Registering a second handler for the same type replaces the first.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let event_type = handler.event_type().to_string();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            warn!("Replaced handler registration for event type {event_type}");
        }
    }

    /// Look up the handler for an event type
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Event types with a registered handler
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler {
        event_type: String,
    }

    #[async_trait]
    impl EventHandler for NoopHandler {
        fn event_type(&self) -> &str {
            &self.event_type
        }

        async fn handle(&self, _payload: &[u8], _record: &EventRecord) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn registry_is_enumerable() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NoopHandler {
            event_type: "UPDATE_X".to_string(),
        }));
        registry.register(Arc::new(NoopHandler {
            event_type: "DELETE_Y".to_string(),
        }));

        assert_eq!(registry.len(), 2);
        let mut types = registry.registered_types();
        types.sort();
        assert_eq!(types, vec!["DELETE_Y", "UPDATE_X"]);

        assert!(registry.get("UPDATE_X").is_some());
        assert!(registry.get("UNKNOWN_TYPE").is_none());
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler {
            event_type: "UPDATE_X".to_string(),
        }));
        registry.register(Arc::new(NoopHandler {
            event_type: "UPDATE_X".to_string(),
        }));
        assert_eq!(registry.len(), 1);
    }
}

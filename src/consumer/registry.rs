//! Channel -> handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::ConsumerHandler;

/// Handlers keyed by the subscriber channel they consume.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ConsumerHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `channel`, replacing any previous one.
    pub fn register(&mut self, channel: impl Into<String>, handler: Arc<dyn ConsumerHandler>) {
        self.handlers.insert(channel.into(), handler);
    }

    pub fn with_handler(
        mut self,
        channel: impl Into<String>,
        handler: Arc<dyn ConsumerHandler>,
    ) -> Self {
        self.register(channel, handler);
        self
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ConsumerHandler>> {
        self.handlers.get(channel).cloned()
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("channels", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

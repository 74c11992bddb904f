use crate::StepHandler;
use dashmap::DashMap;
use std::sync::Arc;

/// Fallback used when no handler is registered under a key
pub type HandlerFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn StepHandler>> + Send + Sync>;

/// Maps `ActionConfig::handler` keys to step handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn StepHandler>>,
    factory: Option<HandlerFactory>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `factory` for keys without an explicit registration
    pub fn with_factory(mut self, factory: HandlerFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Register a handler, replacing any previous one under the key
    pub fn register(&self, key: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Builder-style registration
    pub fn with_handler(self, key: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.register(key, handler);
        self
    }

    /// Find the handler for a key
    pub fn resolve(&self, key: &str) -> Option<Arc<dyn StepHandler>> {
        if let Some(handler) = self.handlers.get(key) {
            return Some(handler.value().clone());
        }
        self.factory.as_ref().and_then(|factory| factory(key))
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.keys())
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoreError, DataPacket, StepContext};
    use async_trait::async_trait;
    use serde_json::json;

    struct Constant(serde_json::Value);

    #[async_trait]
    impl StepHandler for Constant {
        async fn execute(&self, _context: StepContext) -> Result<DataPacket, CoreError> {
            Ok(DataPacket::new(self.0.clone()))
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new().with_handler("send_email", Arc::new(Constant(json!(1))));
        assert!(registry.resolve("send_email").is_some());
        assert!(registry.resolve("ai_analysis").is_none());
        assert_eq!(registry.keys(), vec!["send_email".to_string()]);
    }

    #[test]
    fn test_factory_fallback() {
        let factory: HandlerFactory = Arc::new(|key: &str| {
            if key.starts_with("ai_") {
                Some(Arc::new(Constant(json!(key))) as Arc<dyn StepHandler>)
            } else {
                None
            }
        });
        let registry = HandlerRegistry::new().with_factory(factory);

        assert!(registry.resolve("ai_analysis").is_some());
        assert!(registry.resolve("send_email").is_none());
    }
}

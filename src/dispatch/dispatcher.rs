//! Topic dispatcher
//!
//! Keeps the pattern → handler registry and routes every inbound message.
//! Routing is deliberately not first-match-wins: an exact registration and
//! every matching wildcard registration all receive the message.

use super::topic_matcher::TopicPattern;
use crate::observability::metrics::metrics;
use crate::protocol::Payload;
use crate::transport::{InboundSink, Transport};
use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Callback for messages on a subscribed pattern
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &Payload);
}

#[derive(Clone)]
struct Subscription {
    pattern: TopicPattern,
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
}

/// Pattern registry bound to a transport
pub struct TopicDispatcher<T: Transport> {
    transport: Arc<T>,
    registry: RwLock<HashMap<String, Subscription>>,
}

impl<T: Transport> TopicDispatcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `pattern`, replacing any previous handler
    ///
    /// Returns false without touching the registry when the transport is not
    /// connected, the pattern is invalid, or the broker subscription fails.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
        qos: QoS,
    ) -> bool {
        if !self.transport.is_connected() {
            warn!(pattern = %pattern, "Cannot subscribe: not connected");
            return false;
        }

        let parsed = match TopicPattern::parse(pattern) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Rejected subscription pattern");
                return false;
            }
        };

        if let Err(e) = self.transport.subscribe(pattern, qos).await {
            warn!(pattern = %pattern, error = %e, "Broker subscription failed");
            return false;
        }

        let replaced = self
            .registry
            .write()
            .await
            .insert(
                pattern.to_string(),
                Subscription {
                    pattern: parsed,
                    qos,
                    handler,
                },
            )
            .is_some();

        debug!(pattern = %pattern, qos = ?qos, replaced, "Registered subscription");
        true
    }

    /// Remove the registration for `pattern`
    pub async fn unsubscribe(&self, pattern: &str) -> bool {
        if !self.transport.is_connected() {
            warn!(pattern = %pattern, "Cannot unsubscribe: not connected");
            return false;
        }

        if let Err(e) = self.transport.unsubscribe(pattern).await {
            warn!(pattern = %pattern, error = %e, "Broker unsubscribe failed");
            return false;
        }

        let removed = self.registry.write().await.remove(pattern).is_some();
        debug!(pattern = %pattern, removed, "Removed subscription");
        true
    }

    /// Registered patterns with their QoS, sorted by pattern
    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        let registry = self.registry.read().await;
        let mut entries: Vec<(String, QoS)> = registry
            .iter()
            .map(|(pattern, sub)| (pattern.clone(), sub.qos))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Route one inbound message
    ///
    /// Returns how many handlers were invoked.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        metrics().message_received();
        let payload = Payload::decode(payload);

        let handlers = self.resolve_handlers(topic).await;
        if handlers.is_empty() {
            debug!(topic = %topic, "No handler registered for topic");
            return 0;
        }

        for handler in &handlers {
            handler.handle(topic, &payload).await;
        }
        handlers.len()
    }

    /// Collect handlers under the read lock, to be invoked after it is released
    async fn resolve_handlers(&self, topic: &str) -> Vec<Arc<dyn MessageHandler>> {
        let registry = self.registry.read().await;
        let mut handlers = Vec::new();

        if let Some(exact) = registry.get(topic) {
            handlers.push(exact.handler.clone());
        }
        for sub in registry.values() {
            if sub.pattern.has_wildcard() && sub.pattern.matches(topic) {
                handlers.push(sub.handler.clone());
            }
        }
        handlers
    }
}

#[async_trait]
impl<T: Transport + 'static> InboundSink for TopicDispatcher<T> {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        self.dispatch(topic, payload).await;
    }
}

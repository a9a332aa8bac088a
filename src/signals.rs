//! One-shot signal channels between the page and the orchestrator
//!
//! Each capture attempt owns a private registry mapping channel names to
//! single-use continuations. Channel names are namespaced by surface
//! identity so concurrent captures in the same process cannot claim each
//! other's signals.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

/// The per-surface signal channel names.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    /// Default ready signal, sent after the first post-injection paint
    pub loaded: String,
    /// Ready signal when the request names a custom DOM event
    pub custom_loaded: String,
    /// Content-size report
    pub size: String,
    /// Iframe-count probe reply
    pub frames: String,
}

impl ChannelNames {
    pub fn for_surface(id: u64) -> Self {
        Self {
            loaded: format!("Loaded-{id}"),
            custom_loaded: format!("CustomLoaded-{id}"),
            size: format!("Size-{id}"),
            frames: format!("Frames-{id}"),
        }
    }
}

/// Registry of pending one-shot subscriptions.
///
/// A channel accepts at most one message per attempt: dispatch removes the
/// continuation before firing it, so a second message on the same name
/// finds nothing to deliver to.
#[derive(Default)]
pub struct SignalRegistry {
    pending: HashMap<String, oneshot::Sender<Value>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe once to a named channel. Subscribing again under the same
    /// name replaces the previous continuation, which then resolves as
    /// closed.
    pub fn subscribe(&mut self, name: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(name.to_string(), tx);
        rx
    }

    /// Deliver a payload to the named channel. Returns false when no
    /// subscription is pending, which includes already-consumed channels.
    pub fn dispatch(&mut self, name: &str, payload: Value) -> bool {
        match self.pending.remove(name) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Drop every pending subscription.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_names_are_namespaced_by_surface() {
        let a = ChannelNames::for_surface(1);
        let b = ChannelNames::for_surface(2);
        assert_eq!(a.loaded, "Loaded-1");
        assert_eq!(a.custom_loaded, "CustomLoaded-1");
        assert_eq!(a.size, "Size-1");
        assert_eq!(a.frames, "Frames-1");
        assert_ne!(a.loaded, b.loaded);
    }

    #[tokio::test]
    async fn dispatch_consumes_the_subscription() {
        let mut registry = SignalRegistry::new();
        let rx = registry.subscribe("Loaded-7");

        assert!(registry.dispatch("Loaded-7", json!({"devicePixelRatio": 2.0})));
        // Second message on a consumed channel is dropped
        assert!(!registry.dispatch("Loaded-7", json!({"devicePixelRatio": 1.0})));

        let payload = rx.await.unwrap();
        assert_eq!(payload["devicePixelRatio"], 2.0);
    }

    #[test]
    fn dispatch_without_subscription_is_ignored() {
        let mut registry = SignalRegistry::new();
        assert!(!registry.dispatch("Size-1", json!({})));
    }

    #[tokio::test]
    async fn clear_drops_pending_continuations() {
        let mut registry = SignalRegistry::new();
        let rx = registry.subscribe("Size-3");
        registry.clear();
        assert!(rx.await.is_err());
        assert!(!registry.dispatch("Size-3", json!({})));
    }
}

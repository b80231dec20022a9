use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::error::EventSystemError;
use crate::event::{ListenerId, ListenerResult, PluginEventBus, PluginLifecycleEvent};

/// Listener callback
pub type Listener = Box<dyn Fn(&PluginLifecycleEvent) -> ListenerResult + Send + Sync>;

#[derive(Default)]
struct Listeners {
    by_name: HashMap<&'static str, Vec<(ListenerId, Listener)>>,
    all: Vec<(ListenerId, Listener)>,
    next_id: ListenerId,
}

/// In-process event bus.
///
/// Listeners registered for a specific event name run before catch-all
/// listeners, each group in registration order.
pub struct DefaultEventBus {
    listeners: RwLock<Listeners>,
}

impl fmt::Debug for DefaultEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultEventBus").finish_non_exhaustive()
    }
}

impl DefaultEventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Listeners {
                next_id: 1,
                ..Listeners::default()
            }),
        }
    }

    /// Register a listener for one event name (see [`PluginLifecycleEvent::name`])
    pub async fn register_listener(&self, event_name: &'static str, listener: Listener) -> ListenerId {
        let mut listeners = self.listeners.write().await;
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.by_name.entry(event_name).or_default().push((id, listener));
        id
    }

    /// Register a listener receiving every event
    pub async fn register_catch_all(&self, listener: Listener) -> ListenerId {
        let mut listeners = self.listeners.write().await;
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.all.push((id, listener));
        id
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> Result<(), EventSystemError> {
        let mut listeners = self.listeners.write().await;
        let mut found = false;
        for handlers in listeners.by_name.values_mut() {
            let before = handlers.len();
            handlers.retain(|(h_id, _)| *h_id != id);
            found |= handlers.len() < before;
        }
        let before = listeners.all.len();
        listeners.all.retain(|(h_id, _)| *h_id != id);
        found |= listeners.all.len() < before;

        if found {
            Ok(())
        } else {
            Err(EventSystemError::ListenerUnregistrationFailed {
                id,
                reason: "no such listener".to_string(),
            })
        }
    }

    pub async fn listener_count(&self) -> usize {
        let listeners = self.listeners.read().await;
        listeners.by_name.values().map(Vec::len).sum::<usize>() + listeners.all.len()
    }
}

impl Default for DefaultEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginEventBus for DefaultEventBus {
    async fn broadcast(&self, event: &PluginLifecycleEvent) -> Result<(), EventSystemError> {
        let listeners = self.listeners.read().await;
        let named = listeners.by_name.get(event.name()).into_iter().flatten();

        let mut failures = Vec::new();
        for (id, listener) in named.chain(listeners.all.iter()) {
            if let Err(e) = listener(event) {
                log::warn!("Listener {} failed on {}: {}", id, event, e);
                failures.push(e.to_string());
            }
        }

        match failures.len() {
            0 => Ok(()),
            failed => Err(EventSystemError::BroadcastFailed {
                event_name: event.name().to_string(),
                failed,
                first: failures.swap_remove(0),
            }),
        }
    }
}

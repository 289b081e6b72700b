use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::messaging::command::EventCategory;
use crate::vehicle::events::VehicleEvent;

/// Receives push events. Implementations are called from whichever task delivers the event and
///  should return quickly.
pub trait VehicleListener: Send + Sync {
    fn on_event(&self, event: &VehicleEvent);
}

impl <F: Fn(&VehicleEvent) + Send + Sync> VehicleListener for F {
    fn on_event(&self, event: &VehicleEvent) {
        self(event)
    }
}

/// Handle for removing a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener lists, one per event category, each with its own lock.
pub struct ListenerRegistry {
    next_id: AtomicU64,
    lists: Vec<RwLock<Vec<(ListenerId, Arc<dyn VehicleListener>)>>>,
}

impl ListenerRegistry {
    pub fn new() -> ListenerRegistry {
        ListenerRegistry {
            next_id: AtomicU64::new(1),
            lists: EventCategory::ALL.iter()
                .map(|_| RwLock::new(Vec::new()))
                .collect(),
        }
    }

    pub fn add(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lists[category.index()].write().unwrap()
            .push((id, listener));
        id
    }

    pub fn remove(&self, category: EventCategory, id: ListenerId) -> bool {
        let mut list = self.lists[category.index()].write().unwrap();
        let len_before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != len_before
    }

    pub fn has_listeners(&self, category: EventCategory) -> bool {
        !self.lists[category.index()].read().unwrap().is_empty()
    }

    pub fn categories_with_listeners(&self) -> Vec<EventCategory> {
        EventCategory::ALL.into_iter()
            .filter(|c| self.has_listeners(*c))
            .collect()
    }

    /// Calls the listeners of the event's category. They are called outside the lock, so a
    ///  listener may add or remove listeners.
    pub fn notify(&self, event: &VehicleEvent) {
        let listeners: Vec<Arc<dyn VehicleListener>> = self.lists[event.category().index()].read().unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        trace!("notifying {} listener(s) of {:?}", listeners.len(), event.category());
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        ListenerRegistry::new()
    }
}

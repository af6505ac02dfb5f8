//! Priority-ordered listener registry
//!
//! Listeners are kept in ascending priority order; listeners registered with
//! the same priority run in registration order. The registry only holds weak
//! references, it never keeps a listener alive.
//!
//! Walks go over a [`ListenerSnapshot`], a copy of the chain taken when the
//! walk starts, so listeners may add or remove listeners (themselves
//! included) while being called:
//! - a node removed before the walk reaches it is skipped
//! - a node removed after it was visited has no further effect
//! - a node added during the walk is only seen by later walks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ncz_sdk::SlotStatus;
use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Key for registered listeners, used for removal
    pub struct ListenerKey;
}

/// One entry of the chain
pub struct ListenerNode<T: ?Sized> {
    key: ListenerKey,
    listener: Weak<T>,
    priority: usize,
    filter: SlotStatus,
    alive: AtomicBool,
}

impl<T: ?Sized> ListenerNode<T> {
    pub fn key(&self) -> ListenerKey {
        self.key
    }

    /// Lower runs earlier
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Minimum player status required for this listener to be called
    pub fn filter(&self) -> SlotStatus {
        self.filter
    }

    /// `false` once the node has been removed from its registry
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Upgrade to the listener, `None` if it was dropped
    pub fn listener(&self) -> Option<Arc<T>> {
        self.listener.upgrade()
    }

    fn is(&self, listener: &Arc<T>) -> bool {
        std::ptr::addr_eq(self.listener.as_ptr(), Arc::as_ptr(listener))
    }
}

struct RegistryInner<T: ?Sized> {
    nodes: SlotMap<ListenerKey, Arc<ListenerNode<T>>>,
    order: Vec<Arc<ListenerNode<T>>>,
}

/// Ordered registry of non-owned listeners
pub struct PriorityListenerRegistry<T: ?Sized> {
    inner: RwLock<RegistryInner<T>>,
}

impl<T: ?Sized> Default for PriorityListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> PriorityListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                nodes: SlotMap::with_key(),
                order: Vec::new(),
            }),
        }
    }

    /// Add a listener sorted by priority
    ///
    /// The node goes before the first node with a strictly greater
    /// priority, so equal priorities keep registration order.
    ///
    /// # Returns
    /// A key that can be used to remove this entry via `remove_key`.
    pub fn add(&self, listener: &Arc<T>, priority: usize, filter: SlotStatus) -> ListenerKey {
        let mut inner = self.inner.write();

        let weak = Arc::downgrade(listener);
        let key = inner.nodes.insert_with_key(|key| {
            Arc::new(ListenerNode {
                key,
                listener: weak,
                priority,
                filter,
                alive: AtomicBool::new(true),
            })
        });
        let node = Arc::clone(&inner.nodes[key]);

        let position = inner
            .order
            .iter()
            .position(|other| other.priority > priority)
            .unwrap_or(inner.order.len());
        inner.order.insert(position, node);

        tracing::trace!(
            "Added listener at position {} (priority {}, filter {:?}, total {})",
            position,
            priority,
            filter,
            inner.order.len()
        );

        key
    }

    /// Add with priority 0, only called for players in tests
    pub fn add_default(&self, listener: &Arc<T>) -> ListenerKey {
        self.add(listener, 0, SlotStatus::PlayerInTests)
    }

    /// Find this listener and remove it from the chain
    ///
    /// # Returns
    /// `true` if the listener was found and removed.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let key = self
            .inner
            .read()
            .order
            .iter()
            .find(|node| node.is(listener))
            .map(|node| node.key);

        match key {
            Some(key) => self.remove_key(key),
            None => false,
        }
    }

    /// Remove an entry by its key
    ///
    /// # Returns
    /// `true` if the entry was found and removed.
    pub fn remove_key(&self, key: ListenerKey) -> bool {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.remove(key) else {
            return false;
        };

        node.alive.store(false, Ordering::Release);
        inner.order.retain(|other| other.key != key);

        tracing::trace!("Removed listener (total {})", inner.order.len());
        true
    }

    /// Find the entry of `listener`, ignoring entries of `exclude`
    pub fn find_by_listener(&self, listener: &Arc<T>, exclude: Option<&Arc<T>>) -> Option<ListenerKey> {
        self.inner
            .read()
            .order
            .iter()
            .filter(|node| !exclude.is_some_and(|excluded| node.is(excluded)))
            .find(|node| node.is(listener))
            .map(|node| node.key)
    }

    /// Get a node by key
    pub fn get(&self, key: ListenerKey) -> Option<Arc<ListenerNode<T>>> {
        self.inner.read().nodes.get(key).cloned()
    }

    /// Keys in call order
    pub fn keys(&self) -> Vec<ListenerKey> {
        self.inner.read().order.iter().map(|node| node.key).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for node in inner.order.drain(..) {
            node.alive.store(false, Ordering::Release);
        }
        inner.nodes.clear();
    }

    /// Start a walk over the current chain
    ///
    /// No lock is held while the snapshot is iterated.
    pub fn snapshot(&self) -> ListenerSnapshot<T> {
        ListenerSnapshot {
            nodes: self.inner.read().order.clone().into_iter(),
        }
    }
}

impl<T: ?Sized> Drop for PriorityListenerRegistry<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Walk over a copy of the chain, in call order
///
/// Yields only nodes that are still registered and whose listener is still
/// alive at the moment the walk reaches them.
pub struct ListenerSnapshot<T: ?Sized> {
    nodes: std::vec::IntoIter<Arc<ListenerNode<T>>>,
}

impl<T: ?Sized> Iterator for ListenerSnapshot<T> {
    type Item = (Arc<ListenerNode<T>>, Arc<T>);

    fn next(&mut self) -> Option<Self::Item> {
        for node in self.nodes.by_ref() {
            if !node.is_alive() {
                continue;
            }
            if let Some(listener) = node.listener() {
                return Some((node, listener));
            }
        }
        None
    }
}

use crate::subscription::{Subscription, SubscriptionId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Registry of active subscriptions, keyed by correlation label
///
/// Labels are `L<n>` tokens handed to the device with each `subscribe` so
/// that notification lines can be routed back to their subscription. A label
/// stays unique among active entries and returns to the free list only when
/// its entry is removed or replaced. All mutation happens from the command
/// path; the notification loop only looks labels up, and a lookup racing a
/// removal sees "not found".
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    by_label: HashMap<String, Subscription>,
    label_of: HashMap<SubscriptionId, String>,
    next_label: u64,
    free_labels: Vec<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_label: HashMap::new(),
                label_of: HashMap::new(),
                next_label: 1,
                free_labels: Vec::new(),
            }),
        }
    }

    /// Register a subscription under a fresh label
    ///
    /// Re-registering an existing identity replaces the entry rather than
    /// duplicating it; the displaced label is released for reuse.
    pub fn register(&self, subscription: Subscription) -> String {
        let mut inner = self.inner.lock().unwrap();
        let id = subscription.id();
        // Allocate before releasing any displaced label so a replacement
        // never hands back the label it is displacing.
        let label = match inner.free_labels.pop() {
            Some(label) => label,
            None => {
                let label = format!("L{}", inner.next_label);
                inner.next_label += 1;
                label
            }
        };
        if let Some(old_label) = inner.label_of.remove(&id) {
            inner.by_label.remove(&old_label);
            inner.free_labels.push(old_label);
        }
        inner.by_label.insert(label.clone(), subscription);
        inner.label_of.insert(id, label.clone());
        label
    }

    /// Look up the subscription a label belongs to
    pub fn get(&self, label: &str) -> Option<Subscription> {
        self.inner.lock().unwrap().by_label.get(label).cloned()
    }

    /// Remove a subscription by identity, releasing and returning its label
    pub fn remove(&self, id: &SubscriptionId) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let label = inner.label_of.remove(id)?;
        inner.by_label.remove(&label);
        inner.free_labels.push(label.clone());
        Some(label)
    }

    /// Snapshot of all active entries, for the resubscription pass
    pub fn snapshot(&self) -> Vec<(String, Subscription)> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_label
            .iter()
            .map(|(label, sub)| (label.clone(), sub.clone()))
            .collect()
    }

    /// Number of active entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_label.len()
    }

    /// Drop all entries and released labels
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_label.clear();
        inner.label_of.clear();
        inner.free_labels.clear();
        inner.next_label = 1;
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

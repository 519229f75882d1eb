use std::collections::HashMap;

use crate::types::AlternateKey;
use crate::types::InternalId;
use crate::types::ListenerId;

/// A resolve request waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Waiter {
    pub(crate) listener:         ListenerId,
    pub(crate) first:            String,
    pub(crate) second:           String,
    pub(crate) require_complete: bool,
}

/// Pending resolve requests.
///
/// Requests for an unknown address wait on the key; the presence of a key entry means a backend lookup for it is
/// in flight. Requests that need a complete record of a known but incomplete item wait on the item.
#[derive(Debug, Default)]
pub(crate) struct ResolveTable {
    by_key:  HashMap<AlternateKey, Vec<Waiter>>,
    by_item: HashMap<InternalId, Vec<Waiter>>,
}

impl ResolveTable {
    /// Returns `true` if no lookup for the key was in flight yet.
    pub(crate) fn wait_for_key(&mut self, key: AlternateKey, waiter: Waiter) -> bool {
        let mut is_new = false;
        let waiters = self.by_key.entry(key).or_insert_with(|| {
            is_new = true;
            Vec::new()
        });
        if !waiters.contains(&waiter) {
            waiters.push(waiter);
        }
        is_new
    }

    pub(crate) fn wait_for_item(&mut self, iid: InternalId, waiter: Waiter) {
        let waiters = self.by_item.entry(iid).or_default();
        if !waiters.contains(&waiter) {
            waiters.push(waiter);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_key_pending(&self, key: &AlternateKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub(crate) fn take_key(&mut self, key: &AlternateKey) -> Vec<Waiter> {
        self.by_key.remove(key).unwrap_or_default()
    }

    pub(crate) fn take_item(&mut self, iid: InternalId) -> Vec<Waiter> {
        self.by_item.remove(&iid).unwrap_or_default()
    }

    /// Forgets every request of a listener.
    pub(crate) fn cancel(&mut self, listener: ListenerId) {
        for waiters in self.by_key.values_mut() {
            waiters.retain(|w| w.listener != listener);
        }
        // Empty key entries stay: the lookup is still in flight and the completion clears them.
        self.by_item.retain(|_, waiters| {
            waiters.retain(|w| w.listener != listener);
            !waiters.is_empty()
        });
    }

    pub(crate) fn clear(&mut self) {
        self.by_key.clear();
        self.by_item.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(listener: ListenerId) -> Waiter {
        Waiter {
            listener,
            first: String::new(),
            second: "jane@example.com".into(),
            require_complete: true,
        }
    }

    #[test]
    fn one_lookup_per_key() {
        let mut table = ResolveTable::default();
        let key = AlternateKey::Email("jane@example.com".into());
        let (a, b) = (ListenerId::next(), ListenerId::next());

        assert!(table.wait_for_key(key.clone(), waiter(a)));
        assert!(!table.wait_for_key(key.clone(), waiter(b)));
        assert!(!table.wait_for_key(key.clone(), waiter(b)));

        let waiters = table.take_key(&key);
        assert_eq!(waiters.len(), 2);
        assert!(!table.is_key_pending(&key));
    }

    #[test]
    fn cancel_keeps_lookup_in_flight() {
        let mut table = ResolveTable::default();
        let key = AlternateKey::Phone("5550100".into());
        let iid = InternalId::new(7);
        let a = ListenerId::next();

        table.wait_for_key(key.clone(), waiter(a));
        table.wait_for_item(iid, waiter(a));
        table.cancel(a);

        assert!(table.is_key_pending(&key));
        assert!(table.take_key(&key).is_empty());
        assert!(table.take_item(iid).is_empty());
    }
}

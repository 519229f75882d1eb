use std::collections::HashMap;

use crate::index::IndexSet;
use crate::item::CacheItem;
use crate::item::ItemHandle;
use crate::types::AlternateKey;
use crate::types::ContactId;
use crate::types::InternalId;

/// Authoritative set of cache items.
#[derive(Debug, Default)]
pub(crate) struct RecordStore {
    items:            Vec<ItemHandle>,
    ids:              HashMap<ContactId, InternalId>,
    pub(crate) index: IndexSet,
    // Survives `clear()` so that late completions for a pre-reset id can't hit a new item.
    last_iid:         u32,
}

impl RecordStore {
    pub(crate) fn items(&self) -> &[ItemHandle] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn get(&self, iid: InternalId) -> Option<&ItemHandle> {
        self.index.position(iid).and_then(|pos| self.items.get(pos))
    }

    pub(crate) fn iid_of(&self, id: &ContactId) -> Option<InternalId> {
        self.ids.get(id).copied()
    }

    pub(crate) fn by_contact_id(&self, id: &ContactId) -> Option<&ItemHandle> {
        self.iid_of(id).and_then(|iid| self.get(iid))
    }

    pub(crate) fn lookup(&self, key: &AlternateKey) -> Option<&ItemHandle> {
        self.index.lookup(key).and_then(|iid| self.get(iid))
    }

    /// Creates an absent placeholder item for a contact id not seen before.
    pub(crate) fn create(&mut self, id: ContactId) -> ItemHandle {
        self.last_iid += 1;
        let iid = InternalId::new(self.last_iid);
        let handle = ItemHandle::new(CacheItem::new(iid, id.clone()));
        self.index.set_position(iid, self.items.len());
        self.items.push(handle.clone());
        self.ids.insert(id, iid);
        handle
    }

    pub(crate) fn remove(&mut self, iid: InternalId) -> Option<ItemHandle> {
        let pos = self.index.remove(iid)?;
        let handle = self.items.swap_remove(pos);
        if let Some(moved) = self.items.get(pos) {
            self.index.set_position(moved.iid(), pos);
        }
        let id = handle.contact_id();
        if self.ids.get(&id) == Some(&iid) {
            self.ids.remove(&id);
        }
        Some(handle)
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.ids.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_removal() {
        let mut store = RecordStore::default();
        let a = store.create("a".into());
        let b = store.create("b".into());
        let c = store.create("c".into());
        assert_ne!(a.iid(), b.iid());

        store.remove(a.iid());
        assert!(store.get(a.iid()).is_none());
        assert!(store.by_contact_id(&"a".into()).is_none());
        assert_eq!(store.get(c.iid()), Some(&c));
        assert_eq!(store.get(b.iid()), Some(&b));
        assert_eq!(store.len(), 2);
        assert!(store.remove(a.iid()).is_none());
    }

    #[test]
    fn iids_are_not_reused_after_clear() {
        let mut store = RecordStore::default();
        let first = store.create("a".into()).iid();
        store.clear();
        let second = store.create("a".into()).iid();
        assert_ne!(first, second);
        assert!(store.get(first).is_none());
    }
}

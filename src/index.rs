use std::collections::HashMap;
use strum::EnumCount;

use crate::types::AlternateKey;
use crate::types::FilterType;
use crate::types::InternalId;

/// Primary and alternate-key indices.
///
/// The primary index is the only authority on item identity: every alternate key points at an id that has a
/// primary entry.
#[derive(Debug, Default)]
pub(crate) struct IndexSet {
    primary:   HashMap<InternalId, usize>,
    alternate: HashMap<AlternateKey, InternalId>,
    // Keys currently indexed for an item, so that stale ones can be dropped on update.
    keys_of:   HashMap<InternalId, Vec<AlternateKey>>,
}

impl IndexSet {
    pub(crate) fn position(&self, iid: InternalId) -> Option<usize> {
        self.primary.get(&iid).copied()
    }

    pub(crate) fn set_position(&mut self, iid: InternalId, position: usize) {
        self.primary.insert(iid, position);
    }

    /// Drops the item from every index.
    pub(crate) fn remove(&mut self, iid: InternalId) -> Option<usize> {
        self.drop_keys(iid);
        self.primary.remove(&iid)
    }

    pub(crate) fn lookup(&self, key: &AlternateKey) -> Option<InternalId> {
        self.alternate
            .get(key)
            .copied()
            .filter(|iid| self.primary.contains_key(iid))
    }

    #[cfg(test)]
    pub(crate) fn keys_of(&self, iid: InternalId) -> &[AlternateKey] {
        self.keys_of.get(&iid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces the alternate keys of an item. Returns the keys that now point at the item but didn't before.
    pub(crate) fn reindex(&mut self, iid: InternalId, keys: Vec<AlternateKey>) -> Vec<AlternateKey> {
        let previous = self.keys_of.remove(&iid).unwrap_or_default();
        for stale in previous.iter().filter(|k| !keys.contains(k)) {
            if self.alternate.get(stale) == Some(&iid) {
                self.alternate.remove(stale);
            }
        }

        let mut added = Vec::new();
        for key in &keys {
            if self.alternate.insert(key.clone(), iid) != Some(iid) {
                added.push(key.clone());
            }
        }

        if !keys.is_empty() {
            self.keys_of.insert(iid, keys);
        }
        added
    }

    pub(crate) fn drop_keys(&mut self, iid: InternalId) {
        self.reindex(iid, Vec::new());
    }

    pub(crate) fn clear(&mut self) {
        self.primary.clear();
        self.alternate.clear();
        self.keys_of.clear();
    }

    #[cfg(test)]
    pub(crate) fn alternate_len(&self) -> usize {
        self.alternate.len()
    }
}

/// Ordered id list of every filter.
///
/// Order is by sort key, ties broken by internal id, so an item whose key doesn't change never moves. Every list
/// keeps the keys of its own members, which keeps it searchable while an item's key is being changed list by list.
#[derive(Debug, Default)]
pub(crate) struct FilterLists {
    lists:      [Vec<InternalId>; FilterType::COUNT],
    keys:       [HashMap<InternalId, String>; FilterType::COUNT],
    populated:  [bool; FilterType::COUNT],
    populating: [bool; FilterType::COUNT],
}

impl FilterLists {
    pub(crate) fn ids(&self, filter: FilterType) -> &[InternalId] {
        &self.lists[filter.index()]
    }

    pub(crate) fn len(&self, filter: FilterType) -> usize {
        self.lists[filter.index()].len()
    }

    pub(crate) fn position(&self, filter: FilterType, iid: InternalId) -> Option<usize> {
        let key = self.keys[filter.index()].get(&iid)?;
        let position = self.insertion_point(filter, iid, key);
        (self.lists[filter.index()].get(position) == Some(&iid)).then_some(position)
    }

    /// Sort key of the item in any list it is a member of.
    pub(crate) fn sort_key(&self, iid: InternalId) -> Option<&str> {
        self.keys.iter().find_map(|keys| keys.get(&iid)).map(String::as_str)
    }

    pub(crate) fn sort_key_in(&self, filter: FilterType, iid: InternalId) -> Option<&str> {
        self.keys[filter.index()].get(&iid).map(String::as_str)
    }

    pub(crate) fn is_populated(&self, filter: FilterType) -> bool {
        self.populated[filter.index()]
    }

    pub(crate) fn is_populating(&self, filter: FilterType) -> bool {
        self.populating[filter.index()]
    }

    pub(crate) fn set_populating(&mut self, filter: FilterType, populating: bool) {
        self.populating[filter.index()] = populating;
    }

    pub(crate) fn set_populated(&mut self, filter: FilterType) {
        self.populating[filter.index()] = false;
        self.populated[filter.index()] = true;
    }

    /// Where an item with the key would be inserted.
    pub(crate) fn insertion_point(&self, filter: FilterType, iid: InternalId, key: &str) -> usize {
        let keys = &self.keys[filter.index()];
        self.lists[filter.index()].partition_point(|id| {
            let id_key = keys.get(id).map_or("", String::as_str);
            (id_key, *id) < (key, iid)
        })
    }

    pub(crate) fn insert(&mut self, filter: FilterType, position: usize, iid: InternalId, key: String) {
        self.lists[filter.index()].insert(position, iid);
        self.keys[filter.index()].insert(iid, key);
    }

    pub(crate) fn remove(&mut self, filter: FilterType, position: usize) -> InternalId {
        let iid = self.lists[filter.index()].remove(position);
        self.keys[filter.index()].remove(&iid);
        iid
    }

    /// Sets the whole list of a filter from entries already sorted by the caller.
    pub(crate) fn fill(&mut self, filter: FilterType, entries: Vec<(InternalId, String)>) {
        let list = &mut self.lists[filter.index()];
        let keys = &mut self.keys[filter.index()];
        list.clear();
        keys.clear();
        for (iid, key) in entries {
            list.push(iid);
            keys.insert(iid, key);
        }
    }

    pub(crate) fn set_sort_key(&mut self, iid: InternalId, key: String) {
        for keys in self.keys.iter_mut() {
            if let Some(current) = keys.get_mut(&iid) {
                current.clone_from(&key);
            }
        }
    }

    /// Reorders every list after sort keys have been changed wholesale.
    pub(crate) fn resort(&mut self) {
        for (list, keys) in self.lists.iter_mut().zip(self.keys.iter()) {
            list.sort_by(|a, b| {
                let ka = keys.get(a).map_or("", String::as_str);
                let kb = keys.get(b).map_or("", String::as_str);
                (ka, a).cmp(&(kb, b))
            });
        }
    }

    pub(crate) fn clear(&mut self) {
        for list in self.lists.iter_mut() {
            list.clear();
        }
        for keys in self.keys.iter_mut() {
            keys.clear();
        }
        self.populated = [false; FilterType::COUNT];
        self.populating = [false; FilterType::COUNT];
    }
}

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;

use crate::contact::Contact;
use crate::traits::ContactBackend;
use crate::types::AlternateKey;
use crate::types::ContactId;
use crate::types::FetchTypes;
use crate::types::FilterType;
use crate::types::StatusFlags;

#[derive(Debug, Error)]
pub enum MemoryBackendError {
    #[error("backend refuses writes")]
    WritesRefused,
    #[error("no contact '{0}'")]
    NoContact(ContactId),
}

/// How many times each backend operation has been called.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub load_by_id:            usize,
    pub load_by_alternate_key: usize,
    pub load_filter:           usize,
    pub save:                  usize,
    pub remove:                usize,
    pub aggregate:             usize,
    pub disaggregate:          usize,
}

/// Contact storage kept in memory.
///
/// Contacts put in with [`MemoryBackend::insert`] bypass any cache, which is how tests simulate changes made by other
/// processes.
#[derive(Debug)]
pub struct MemoryBackend {
    contacts:           RwLock<BTreeMap<ContactId, Contact>>,
    constituents:       RwLock<HashMap<ContactId, Vec<ContactId>>>,
    calls:              Mutex<CallCounts>,
    next_id:            AtomicU64,
    fail_writes:        AtomicBool,
    phone_match_length: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            contacts:           RwLock::new(BTreeMap::new()),
            constituents:       RwLock::new(HashMap::new()),
            calls:              Mutex::new(CallCounts::default()),
            next_id:            AtomicU64::new(1),
            fail_writes:        AtomicBool::new(false),
            phone_match_length: 7,
        }
    }

    pub fn with_contacts<I>(contacts: I) -> Self
    where
        I: IntoIterator<Item = Contact>,
    {
        let backend = Self::new();
        for contact in contacts {
            backend.insert(contact);
        }
        backend
    }

    /// Stores a contact directly, assigning an id if it has none.
    pub fn insert(&self, mut contact: Contact) -> ContactId {
        let id = contact.id.clone().unwrap_or_else(|| self.next_contact_id());
        contact.id = Some(id.clone());
        self.contacts.write().insert(id.clone(), contact);
        id
    }

    pub fn delete(&self, id: &ContactId) -> Option<Contact> {
        self.contacts.write().remove(id)
    }

    pub fn get(&self, id: &ContactId) -> Option<Contact> {
        self.contacts.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock()
    }

    fn next_contact_id(&self) -> ContactId {
        ContactId::new(format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn count(&self, f: impl FnOnce(&mut CallCounts)) {
        f(&mut self.calls.lock());
    }

    fn check_writable(&self) -> Result<(), MemoryBackendError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(MemoryBackendError::WritesRefused)
        }
        else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContactBackend for MemoryBackend {
    type Error = MemoryBackendError;

    async fn load_by_id(&self, id: &ContactId) -> Result<Option<Contact>, Self::Error> {
        self.count(|c| c.load_by_id += 1);
        Ok(self.get(id))
    }

    async fn load_by_alternate_key(&self, key: &AlternateKey) -> Result<Option<Contact>, Self::Error> {
        self.count(|c| c.load_by_alternate_key += 1);
        Ok(self
            .contacts
            .read()
            .values()
            .find(|c| c.alternate_keys(self.phone_match_length).contains(key))
            .cloned())
    }

    async fn load_filter(&self, filter: FilterType, facets: FetchTypes) -> Result<Vec<Contact>, Self::Error> {
        self.count(|c| c.load_filter += 1);
        Ok(self
            .contacts
            .read()
            .values()
            .filter(|c| match filter {
                FilterType::All => true,
                FilterType::Favorites => c.favorite,
                FilterType::Online => c.status_flags.contains(StatusFlags::IS_ONLINE),
            })
            .map(|c| c.restricted_to(facets))
            .collect())
    }

    async fn save(&self, contact: &Contact) -> Result<ContactId, Self::Error> {
        self.count(|c| c.save += 1);
        self.check_writable()?;
        Ok(self.insert(contact.clone()))
    }

    async fn remove(&self, id: &ContactId) -> Result<(), Self::Error> {
        self.count(|c| c.remove += 1);
        self.check_writable()?;
        self.delete(id)
            .map(|_| ())
            .ok_or_else(|| MemoryBackendError::NoContact(id.clone()))
    }

    async fn aggregate(&self, first: &ContactId, second: &ContactId) -> Result<(), Self::Error> {
        self.count(|c| c.aggregate += 1);
        self.check_writable()?;
        let mut contacts = self.contacts.write();
        let merged = contacts
            .get(second)
            .cloned()
            .ok_or_else(|| MemoryBackendError::NoContact(second.clone()))?;
        let target = contacts
            .get_mut(first)
            .ok_or_else(|| MemoryBackendError::NoContact(first.clone()))?;
        for number in merged.phone_numbers {
            if !target.phone_numbers.contains(&number) {
                target.phone_numbers.push(number);
            }
        }
        for email in merged.email_addresses {
            if !target.email_addresses.contains(&email) {
                target.email_addresses.push(email);
            }
        }
        self.constituents
            .write()
            .entry(first.clone())
            .or_default()
            .push(second.clone());
        Ok(())
    }

    async fn disaggregate(&self, first: &ContactId, second: &ContactId) -> Result<(), Self::Error> {
        self.count(|c| c.disaggregate += 1);
        self.check_writable()?;
        let mut constituents = self.constituents.write();
        let list = constituents
            .get_mut(first)
            .ok_or_else(|| MemoryBackendError::NoContact(first.clone()))?;
        list.retain(|id| id != second);
        Ok(())
    }

    async fn fetch_constituents(&self, id: &ContactId) -> Result<Vec<ContactId>, Self::Error> {
        Ok(self.constituents.read().get(id).cloned().unwrap_or_default())
    }

    async fn fetch_merge_candidates(&self, id: &ContactId) -> Result<Vec<ContactId>, Self::Error> {
        let contacts = self.contacts.read();
        let Some(contact) = contacts.get(id)
        else {
            return Err(MemoryBackendError::NoContact(id.clone()));
        };
        let last = contact.name.last.to_lowercase();
        Ok(contacts
            .iter()
            .filter(|(cid, c)| *cid != id && !last.is_empty() && c.name.last.to_lowercase() == last)
            .map(|(cid, _)| cid.clone())
            .collect())
    }
}

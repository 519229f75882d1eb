use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use crate::contact::Contact;
use crate::error::CacheError;
use crate::traits::ItemData;
use crate::traits::ItemListener;
use crate::types::ContactId;
use crate::types::ContactState;
use crate::types::FetchTypes;
use crate::types::InternalId;
use crate::types::ListenerId;
use crate::types::StatusFlags;

/// Record content of a cache item. The compact form keeps large result sets cheap; the live form is used while a
/// record is being actively inspected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContactData {
    #[default]
    Empty,
    Compact(Vec<u8>),
    Live(Box<Contact>),
}

impl ContactData {
    pub fn compact(contact: &Contact) -> Result<Self, CacheError> {
        Ok(Self::Compact(postcard::to_allocvec(contact)?))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_instantiated(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn compact_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Compact(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Turns the compact form into the live one. A no-op for live or empty data.
    pub fn instantiate(&mut self) -> Result<Option<&mut Contact>, CacheError> {
        if let Self::Compact(bytes) = self {
            let contact: Contact = postcard::from_bytes(bytes)?;
            *self = Self::Live(Box::new(contact));
        }
        Ok(match self {
            Self::Live(contact) => Some(contact.as_mut()),
            _ => None,
        })
    }

    /// Turns the live form back into the compact one. A no-op for compact or empty data.
    pub fn release(&mut self) -> Result<(), CacheError> {
        if let Self::Live(contact) = self {
            let bytes = postcard::to_allocvec(contact.as_ref())?;
            *self = Self::Compact(bytes);
        }
        Ok(())
    }

    pub fn contact(&self) -> Result<Option<Cow<'_, Contact>>, CacheError> {
        Ok(match self {
            Self::Empty => None,
            Self::Compact(bytes) => Some(Cow::Owned(postcard::from_bytes(bytes)?)),
            Self::Live(contact) => Some(Cow::Borrowed(contact.as_ref())),
        })
    }
}

pub struct CacheItem {
    pub(crate) iid:               InternalId,
    pub(crate) contact_id:        ContactId,
    pub(crate) status_flags:      StatusFlags,
    pub(crate) contact_state:     ContactState,
    // Completeness of the data actually stored; differs from contact_state while a fetch is in flight.
    pub(crate) data_completeness: ContactState,
    pub(crate) fetched_facets:    FetchTypes,
    // Latest full fetch issued for the item. Results of older ones are stale.
    pub(crate) request:           u64,
    pub(crate) favorite:          bool,
    pub(crate) data:              ContactData,
    pub(crate) name_group:        String,
    pub(crate) display_label:     String,
    pub(crate) listeners:         Vec<(ListenerId, Arc<dyn ItemListener>)>,
    pub(crate) item_data:         Option<Box<dyn ItemData>>,
}

impl CacheItem {
    pub(crate) fn new(iid: InternalId, contact_id: ContactId) -> Self {
        Self {
            iid,
            contact_id,
            status_flags: StatusFlags::empty(),
            contact_state: ContactState::Absent,
            data_completeness: ContactState::Absent,
            fetched_facets: FetchTypes::empty(),
            request: 0,
            favorite: false,
            data: ContactData::Empty,
            name_group: String::new(),
            display_label: String::new(),
            listeners: Vec::new(),
            item_data: None,
        }
    }

    pub fn iid(&self) -> InternalId {
        self.iid
    }

    pub fn contact_id(&self) -> &ContactId {
        &self.contact_id
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    pub fn contact_state(&self) -> ContactState {
        self.contact_state
    }

    pub fn fetched_facets(&self) -> FetchTypes {
        self.fetched_facets
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite
    }

    pub fn name_group(&self) -> &str {
        &self.name_group
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn data(&self) -> &ContactData {
        &self.data
    }

    pub fn contact(&self) -> Result<Option<Cow<'_, Contact>>, CacheError> {
        self.data.contact()
    }

    pub fn item_data(&self) -> Option<&dyn ItemData> {
        self.item_data.as_deref()
    }

    pub fn item_data_mut(&mut self) -> Option<&mut (dyn ItemData + 'static)> {
        self.item_data.as_deref_mut()
    }

    // Incoming data never downgrades what is already stored.
    pub(crate) fn accepts(&self, completeness: ContactState) -> bool {
        completeness >= self.data_completeness
    }
}

impl Debug for CacheItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheItem")
            .field("iid", &self.iid)
            .field("contact_id", &self.contact_id)
            .field("contact_state", &self.contact_state)
            .field("status_flags", &self.status_flags)
            .field("display_label", &self.display_label)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Shared handle of a cache item. Two handles are equal when they refer to the same item.
#[derive(Clone)]
pub struct ItemHandle {
    iid:   InternalId,
    inner: Arc<RwLock<CacheItem>>,
}

impl ItemHandle {
    pub(crate) fn new(item: CacheItem) -> Self {
        Self {
            iid:   item.iid,
            inner: Arc::new(RwLock::new(item)),
        }
    }

    pub fn iid(&self) -> InternalId {
        self.iid
    }

    pub fn read(&self) -> RwLockReadGuard<'_, CacheItem> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, CacheItem> {
        self.inner.write()
    }

    pub fn contact_id(&self) -> ContactId {
        self.read().contact_id.clone()
    }

    pub fn contact_state(&self) -> ContactState {
        self.read().contact_state
    }

    pub fn display_label(&self) -> String {
        self.read().display_label.clone()
    }

    pub fn name_group(&self) -> String {
        self.read().name_group.clone()
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.read().status_flags
    }

    /// A copy of the record, decoded from the compact form if needed.
    pub fn contact(&self) -> Result<Option<Contact>, CacheError> {
        Ok(self.read().contact()?.map(Cow::into_owned))
    }

    pub fn instantiate_contact(&self) -> Result<(), CacheError> {
        self.write().data.instantiate().map(|_| ())
    }

    pub fn release_contact(&self) -> Result<(), CacheError> {
        self.write().data.release()
    }

    pub fn set_item_data(&self, item_data: Box<dyn ItemData>) {
        self.write().item_data = Some(item_data);
    }

    pub fn take_item_data(&self) -> Option<Box<dyn ItemData>> {
        self.write().item_data.take()
    }

    pub fn append_listener(&self, listener: Arc<dyn ItemListener>) -> ListenerId {
        let id = ListenerId::next();
        self.write().listeners.push((id, listener));
        id
    }

    pub fn listener(&self, id: ListenerId) -> Option<Arc<dyn ItemListener>> {
        self.read()
            .listeners
            .iter()
            .find(|(lid, _)| *lid == id)
            .map(|(_, l)| Arc::clone(l))
    }

    /// Returns `false` if the listener wasn't attached; removing twice is harmless.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut item = self.write();
        let before = item.listeners.len();
        item.listeners.retain(|(lid, _)| *lid != id);
        item.listeners.len() != before
    }

    pub(crate) fn listener_ids(&self) -> Vec<ListenerId> {
        self.read().listeners.iter().map(|(id, _)| *id).collect()
    }
}

impl PartialEq for ItemHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ItemHandle {}

impl Debug for ItemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_read() {
            Some(item) => Debug::fmt(&*item, f),
            None => f.debug_tuple("ItemHandle").field(&self.iid).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::OnlineAccount;

    fn sample() -> Contact {
        let mut contact = Contact::with_name("Jane", "Doe");
        contact.id = Some("jane".into());
        contact.phone_numbers.push("+1-555-0100".into());
        contact.online_accounts.push(OnlineAccount {
            local_uid: "/acct/1".into(),
            remote_uid: "jane@im".into(),
            ..Default::default()
        });
        contact
    }

    #[test]
    fn instantiate_then_release_is_byte_identical() {
        let mut data = ContactData::compact(&sample()).unwrap();
        let original = data.compact_bytes().unwrap().to_vec();

        let live = data.instantiate().unwrap().cloned();
        assert_eq!(live, Some(sample()));
        assert!(data.is_instantiated());
        assert!(data.compact_bytes().is_none());

        data.release().unwrap();
        assert_eq!(data.compact_bytes(), Some(original.as_slice()));
    }

    #[test]
    fn transitions_are_idempotent() {
        let mut data = ContactData::compact(&sample()).unwrap();
        data.release().unwrap();
        assert!(!data.is_instantiated());
        data.instantiate().unwrap();
        data.instantiate().unwrap();
        assert!(data.is_instantiated());

        let mut empty = ContactData::Empty;
        assert!(empty.instantiate().unwrap().is_none());
        empty.release().unwrap();
        assert!(empty.is_empty());
    }

    struct Nop;
    impl ItemListener for Nop {}

    #[test]
    fn listeners_are_removed_by_handle() {
        let handle = ItemHandle::new(CacheItem::new(InternalId::new(1), "jane".into()));
        let first = handle.append_listener(Arc::new(Nop));
        let second = handle.append_listener(Arc::new(Nop));
        assert!(handle.remove_listener(first));
        assert!(!handle.remove_listener(first));
        assert!(handle.listener(first).is_none());
        assert!(handle.listener(second).is_some());
        assert_eq!(handle.listener_ids(), vec![second]);
    }
}

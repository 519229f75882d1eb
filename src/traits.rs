use async_trait::async_trait;

use crate::contact::Contact;
use crate::item::ItemHandle;
use crate::types::AlternateKey;
use crate::types::ContactId;
use crate::types::DisplayLabelOrder;
use crate::types::FetchTypes;
use crate::types::FilterType;
use crate::types::InternalId;

// For types that are in charge of loading and storing contact records.
#[async_trait]
pub trait ContactBackend: Sized + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Full record of a contact, `None` if the backend doesn't know it.
    async fn load_by_id(&self, id: &ContactId) -> Result<Option<Contact>, Self::Error>;

    /// Full record of the contact owning the alternate key.
    async fn load_by_alternate_key(&self, key: &AlternateKey) -> Result<Option<Contact>, Self::Error>;

    /// Contacts belonging to a filter with only the requested facets loaded.
    async fn load_filter(&self, filter: FilterType, facets: FetchTypes) -> Result<Vec<Contact>, Self::Error>;

    /// Stores the record and returns its canonical identifier.
    async fn save(&self, contact: &Contact) -> Result<ContactId, Self::Error>;

    async fn remove(&self, id: &ContactId) -> Result<(), Self::Error>;

    async fn aggregate(&self, first: &ContactId, second: &ContactId) -> Result<(), Self::Error>;

    async fn disaggregate(&self, first: &ContactId, second: &ContactId) -> Result<(), Self::Error>;

    async fn fetch_constituents(&self, _id: &ContactId) -> Result<Vec<ContactId>, Self::Error> {
        Ok(Vec::new())
    }

    async fn fetch_merge_candidates(&self, _id: &ContactId) -> Result<Vec<ContactId>, Self::Error> {
        Ok(Vec::new())
    }
}

/// The contract of a filtered list view.
///
/// Ranges are contiguous and end-exclusive. Every `source_about_to_*` call is paired with its completion call.
pub trait ListModel: Send + Sync + 'static {
    fn source_about_to_remove_items(&self, begin: usize, end: usize);
    fn source_items_removed(&self, begin: usize, end: usize);

    fn source_about_to_insert_items(&self, begin: usize, end: usize);
    fn source_items_inserted(&self, begin: usize, end: usize);

    fn source_data_changed(&self, begin: usize, end: usize);

    /// A batch of data changes has settled.
    fn source_items_changed(&self) {}

    fn make_populated(&self);

    fn update_display_label_order(&self) {}
    fn update_sort_property(&self) {}
    fn update_group_property(&self) {}
}

/// Interest in a single cache item.
pub trait ItemListener: Send + Sync + 'static {
    fn item_updated(&self, _item: &ItemHandle) {}
    fn item_about_to_be_removed(&self, _item: &ItemHandle) {}
}

/// Interest in every cache item.
pub trait ChangeListener: Send + Sync + 'static {
    fn item_updated(&self, item: &ItemHandle);
    fn item_about_to_be_removed(&self, item: &ItemHandle);
}

pub trait ResolveListener: Send + Sync + 'static {
    /// `first` and `second` echo the resolved address: the local and remote UIDs of an online account, or an empty
    /// string and the phone number or email address as requested.
    fn address_resolved(&self, first: &str, second: &str, item: &ItemHandle);
}

/// Per-item extension state owned by the cache item.
pub trait ItemData: Send + Sync + 'static {
    fn display_label_order_changed(&mut self, _order: DisplayLabelOrder) {}
    fn update_cache_contact(&mut self, _iid: InternalId, _contact: &Contact) {}
    fn constituents_fetched(&mut self, _ids: &[InternalId]) {}
    fn merge_candidates_fetched(&mut self, _ids: &[InternalId]) {}
}

//! # contact-cache
//!
//! Process-wide cache of address book contacts that sits between a contact storage backend and any number of list
//! views.
//!
//! The cache owns one item per known contact and keeps, for each [filter](types::FilterType), an ordered list of the
//! items the filter selects. Views register for a filter and from then on are told about every structural change of
//! that list with begin/end call pairs, so that they can mirror it without re-reading the whole list.
//!
//! # The Basics
//!
//! - Contact ids are owned by the backend; the cache assigns each contact a small [internal
//!   id](types::InternalId) of its own.
//! - Items can be looked up by contact id, by internal id, and by alternate keys: phone numbers (compared by their
//!   trailing digits), email addresses (case-insensitively), and online accounts.
//! - Item data comes in stages: _absent_, _partial_ (only the facets some view asked for), _requested_ (a full fetch
//!   is in flight), and _complete_. Incoming data never downgrades what is already stored.
//! - Records are kept in a compact serialized form until someone asks to instantiate them.
//! - Nothing blocks on the backend. Lookups return right away; fetches run as tokio tasks and report back through
//!   item listeners, views, and resolve listeners.
//!
//! # The Backend
//!
//! Everything the cache knows comes from an implementation of [`ContactBackend`]. The cache never guesses what the
//! backend would say: writes go to the backend first and touch the cache only once the backend has accepted them.
//!
//! # Notifications
//!
//! For any change of a single item the observable order is:
//!
//! 1. the item's listeners learn that it is about to be removed, if it is;
//! 2. views get _about to remove_ for every list the item leaves and _about to insert_ for every list it enters;
//! 3. the lists, the item and its alternate keys change;
//! 4. views get _removed_ and _inserted_ for the same lists;
//! 5. views of lists where the item moves to a new place get a remove pair followed by an insert pair;
//! 6. views of lists where the item stays in place get _data changed_ followed by _items changed_;
//! 7. the item's listeners learn that it was updated;
//! 8. pending resolve requests the change satisfies are delivered.
//!
//! Every view or listener can be unregistered at any moment, including from inside one of its own callbacks. From
//! then on it receives nothing more.
//!
//! # Tests
//!
//! The `test` feature enables the [`test`] module with an in-memory backend and recording views and listeners.

pub mod cache;
pub mod contact;
pub mod error;
pub(crate) mod index;
pub mod item;
pub(crate) mod notify;
pub mod phone;
pub(crate) mod registry;
pub(crate) mod resolve;
pub(crate) mod store;
pub mod test;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::ContactCache;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use traits::ContactBackend;

pub mod prelude {
    pub use crate::cache::ContactCache;
    pub use crate::contact::*;
    pub use crate::error::CacheError;
    pub use crate::item::CacheItem;
    pub use crate::item::ContactData;
    pub use crate::item::ItemHandle;
    pub use crate::traits::*;
    pub use crate::types::*;
}

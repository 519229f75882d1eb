use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use strum::Display as StrumDisplay;
use strum::EnumCount;
use strum::EnumIter;

use crate::phone::minimize_phone_number;

/// Canonical contact identifier. Owned by the backend; opaque to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(String);

impl ContactId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContactId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// In-process surrogate of a [`ContactId`]. Never reused within the lifetime of a cache, not even across resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(u32);

impl InternalId {
    pub(crate) fn new(iid: u32) -> Self {
        Self(iid)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Display for InternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Registration handle of a view or a listener. Deregistration is done by handle, never by pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The filter classes for which the cache maintains ordered lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, StrumDisplay)]
pub enum FilterType {
    All,
    Favorites,
    Online,
}

impl FilterType {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Optional data facets a view wants fetched for the contacts of its list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FetchTypes: u32 {
        const ACCOUNT_URI = 1 << 0;
        const PHONE_NUMBER = 1 << 1;
        const EMAIL_ADDRESS = 1 << 2;
        const ORGANIZATION = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StatusFlags: u64 {
        const HAS_PHONE_NUMBER = 1 << 0;
        const HAS_EMAIL_ADDRESS = 1 << 1;
        const HAS_ONLINE_ACCOUNT = 1 << 2;
        const IS_ONLINE = 1 << 3;
        const HAS_VALID_ONLINE_ACCOUNT = 1 << 4;
    }
}

/// Completion state of a cached contact.
///
/// The order of the variants is meaningful: a later state never gets replaced by data of an earlier one unless the
/// item is explicitly invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ContactState {
    #[default]
    Absent,
    Partial,
    Requested,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, StrumDisplay)]
pub enum DisplayLabelOrder {
    #[default]
    FirstNameFirst,
    LastNameFirst,
}

/// Name property used for sorting and for name grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, StrumDisplay)]
pub enum NameProperty {
    #[default]
    FirstName,
    LastName,
}

/// Alternate lookup key of a contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlternateKey {
    /// Minimized phone number digits.
    Phone(String),
    /// Lower-cased email address.
    Email(String),
    Account { local_uid: String, remote_uid: String },
}

impl AlternateKey {
    pub fn phone(number: &str, match_length: usize) -> Option<Self> {
        let minimized = minimize_phone_number(number, match_length, false);
        (!minimized.is_empty()).then_some(Self::Phone(minimized))
    }

    pub fn email(address: &str) -> Option<Self> {
        let address = address.trim();
        (!address.is_empty()).then(|| Self::Email(address.to_lowercase()))
    }

    pub fn account(local_uid: &str, remote_uid: &str) -> Option<Self> {
        (!remote_uid.is_empty()).then(|| Self::Account {
            local_uid:  local_uid.to_string(),
            remote_uid: remote_uid.to_string(),
        })
    }
}

impl Display for AlternateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phone(p) => write!(f, "tel:{p}"),
            Self::Email(e) => write!(f, "mailto:{e}"),
            Self::Account { local_uid, remote_uid } => write!(f, "account:{local_uid}/{remote_uid}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn contact_state_ordering() {
        assert!(ContactState::Absent < ContactState::Partial);
        assert!(ContactState::Partial < ContactState::Requested);
        assert!(ContactState::Requested < ContactState::Complete);
    }

    #[test]
    fn filter_indices_are_dense() {
        let indices: Vec<usize> = FilterType::iter().map(FilterType::index).collect();
        assert_eq!(indices, (0..FilterType::COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn alternate_key_normalization() {
        assert_eq!(
            AlternateKey::phone("+1-555-0100", 7),
            Some(AlternateKey::Phone("5550100".into()))
        );
        assert_eq!(AlternateKey::phone("--", 7), None);
        assert_eq!(
            AlternateKey::email("  Jane.Doe@Example.COM "),
            Some(AlternateKey::Email("jane.doe@example.com".into()))
        );
        assert_eq!(AlternateKey::account("local", ""), None);
    }

    #[test]
    fn listener_ids_are_unique() {
        assert_ne!(ListenerId::next(), ListenerId::next());
    }
}

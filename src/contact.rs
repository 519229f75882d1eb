//! Structured contact record.
//!
//! The cache treats the record as a bag of typed facets. It only interprets the name-bearing content (to derive
//! display labels, name groups and sort keys), the favorite flag, the status flags, and the facets that produce
//! alternate lookup keys.

use serde::Deserialize;
use serde::Serialize;

use crate::types::AlternateKey;
use crate::types::ContactId;
use crate::types::DisplayLabelOrder;
use crate::types::FetchTypes;
use crate::types::NameProperty;
use crate::types::StatusFlags;

pub(crate) const UNNAMED_LABEL: &str = "(Unnamed)";
pub(crate) const OTHER_NAME_GROUP: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Name {
    pub first:  String,
    pub middle: String,
    pub last:   String,
}

impl Name {
    pub fn new<F: Into<String>, L: Into<String>>(first: F, last: L) -> Self {
        Self {
            first:  first.into(),
            middle: String::new(),
            last:   last.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.middle.is_empty() && self.last.is_empty()
    }

    fn property(&self, property: NameProperty) -> &str {
        match property {
            NameProperty::FirstName => &self.first,
            NameProperty::LastName => &self.last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnlineAccount {
    pub local_uid:    String,
    pub remote_uid:   String,
    pub account_uri:  String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Organization {
    pub name:       String,
    pub department: String,
    pub title:      String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    /// `None` until the backend has stored the record.
    pub id:              Option<ContactId>,
    pub name:            Name,
    pub nickname:        String,
    /// Overrides the generated display label when not empty.
    pub custom_label:    String,
    pub favorite:        bool,
    pub status_flags:    StatusFlags,
    pub phone_numbers:   Vec<String>,
    pub email_addresses: Vec<String>,
    pub online_accounts: Vec<OnlineAccount>,
    pub organization:    Option<Organization>,
}

impl Contact {
    pub fn with_name<F: Into<String>, L: Into<String>>(first: F, last: L) -> Self {
        Self {
            name: Name::new(first, last),
            ..Default::default()
        }
    }

    /// Copy of the record carrying only the facets named in `facets`. Name, labels, favorite and status flags are
    /// always kept.
    pub fn restricted_to(&self, facets: FetchTypes) -> Self {
        Self {
            id:              self.id.clone(),
            name:            self.name.clone(),
            nickname:        self.nickname.clone(),
            custom_label:    self.custom_label.clone(),
            favorite:        self.favorite,
            status_flags:    self.status_flags,
            phone_numbers:   if facets.contains(FetchTypes::PHONE_NUMBER) {
                self.phone_numbers.clone()
            }
            else {
                Vec::new()
            },
            email_addresses: if facets.contains(FetchTypes::EMAIL_ADDRESS) {
                self.email_addresses.clone()
            }
            else {
                Vec::new()
            },
            online_accounts: if facets.contains(FetchTypes::ACCOUNT_URI) {
                self.online_accounts.clone()
            }
            else {
                Vec::new()
            },
            organization:    if facets.contains(FetchTypes::ORGANIZATION) {
                self.organization.clone()
            }
            else {
                None
            },
        }
    }

    /// Takes the facets outside of `fetched` from an earlier copy of the record.
    pub fn fill_facets_from(&mut self, earlier: &Contact, fetched: FetchTypes) {
        if !fetched.contains(FetchTypes::PHONE_NUMBER) {
            self.phone_numbers = earlier.phone_numbers.clone();
        }
        if !fetched.contains(FetchTypes::EMAIL_ADDRESS) {
            self.email_addresses = earlier.email_addresses.clone();
        }
        if !fetched.contains(FetchTypes::ACCOUNT_URI) {
            self.online_accounts = earlier.online_accounts.clone();
        }
        if !fetched.contains(FetchTypes::ORGANIZATION) {
            self.organization = earlier.organization.clone();
        }
    }

    /// Status flags as stored plus those derived from the record's facets.
    pub fn effective_status_flags(&self) -> StatusFlags {
        let mut flags = self.status_flags
            - (StatusFlags::HAS_PHONE_NUMBER
                | StatusFlags::HAS_EMAIL_ADDRESS
                | StatusFlags::HAS_ONLINE_ACCOUNT
                | StatusFlags::HAS_VALID_ONLINE_ACCOUNT);
        flags.set(StatusFlags::HAS_PHONE_NUMBER, !self.phone_numbers.is_empty());
        flags.set(StatusFlags::HAS_EMAIL_ADDRESS, !self.email_addresses.is_empty());
        flags.set(StatusFlags::HAS_ONLINE_ACCOUNT, !self.online_accounts.is_empty());
        flags.set(
            StatusFlags::HAS_VALID_ONLINE_ACCOUNT,
            self.online_accounts.iter().any(|a| !a.remote_uid.is_empty()),
        );
        flags
    }

    pub fn alternate_keys(&self, phone_match_length: usize) -> Vec<AlternateKey> {
        let mut keys = Vec::new();
        let phones = self
            .phone_numbers
            .iter()
            .filter_map(|p| AlternateKey::phone(p, phone_match_length));
        let emails = self.email_addresses.iter().filter_map(|e| AlternateKey::email(e));
        let accounts = self
            .online_accounts
            .iter()
            .filter_map(|a| AlternateKey::account(&a.local_uid, &a.remote_uid));
        for key in phones.chain(emails).chain(accounts) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn sort_key(&self, property: NameProperty) -> String {
        let name = &self.name;
        let key = match property {
            NameProperty::FirstName => join_non_empty(&[&name.first, &name.last]),
            NameProperty::LastName => join_non_empty(&[&name.last, &name.first]),
        };
        if key.is_empty() {
            generate_display_label(self, DisplayLabelOrder::FirstNameFirst).to_lowercase()
        }
        else {
            key.to_lowercase()
        }
    }
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn generate_display_label(contact: &Contact, order: DisplayLabelOrder) -> String {
    if !contact.custom_label.trim().is_empty() {
        return contact.custom_label.trim().to_string();
    }

    let name = &contact.name;
    let label = match order {
        DisplayLabelOrder::FirstNameFirst => join_non_empty(&[&name.first, &name.middle, &name.last]),
        DisplayLabelOrder::LastNameFirst => join_non_empty(&[&name.last, &name.first, &name.middle]),
    };

    if label.is_empty() {
        generate_display_label_from_non_name_details(contact)
    }
    else {
        label
    }
}

/// Label for a contact without any name, picked from its nickname, accounts, addresses, numbers or organization.
pub fn generate_display_label_from_non_name_details(contact: &Contact) -> String {
    let candidates = std::iter::once(contact.nickname.as_str())
        .chain(contact.online_accounts.iter().map(|a| a.display_name.as_str()))
        .chain(contact.online_accounts.iter().map(|a| a.remote_uid.as_str()))
        .chain(contact.email_addresses.iter().map(String::as_str))
        .chain(contact.phone_numbers.iter().map(String::as_str))
        .chain(contact.organization.iter().map(|o| o.name.as_str()));

    candidates
        .map(str::trim)
        .find(|c| !c.is_empty())
        .unwrap_or(UNNAMED_LABEL)
        .to_string()
}

/// Name group of a contact: the upper-cased initial of the grouping property, falling back to the display label.
pub fn determine_name_group(contact: &Contact, property: NameProperty, display_label: &str) -> String {
    let source = contact.name.property(property).trim();
    let source = if source.is_empty() { display_label } else { source };
    match source.chars().next() {
        Some(c) if c.is_alphabetic() && source != UNNAMED_LABEL => c.to_uppercase().collect(),
        _ => OTHER_NAME_GROUP.to_string(),
    }
}

pub fn all_name_groups() -> Vec<String> {
    ('A'..='Z')
        .map(String::from)
        .chain(std::iter::once(OTHER_NAME_GROUP.to_string()))
        .collect()
}

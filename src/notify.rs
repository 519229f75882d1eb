//! Notification fan-out.
//!
//! Receivers are always looked up right before each delivery rather than snapshotted, so that a view or listener
//! unregistered by an earlier callback of the same mutation gets nothing more.

use std::sync::Arc;
use tracing::trace;

use crate::item::ItemHandle;
use crate::traits::ChangeListener;
use crate::traits::ListModel;
use crate::types::FilterType;
use crate::types::ListenerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListEvent {
    AboutToRemove(usize, usize),
    Removed(usize, usize),
    AboutToInsert(usize, usize),
    Inserted(usize, usize),
    DataChanged(usize, usize),
    ItemsChanged,
    Populated,
    DisplayLabelOrder,
    SortProperty,
    GroupProperty,
}

impl ListEvent {
    pub(crate) fn deliver(self, model: &dyn ListModel) {
        match self {
            Self::AboutToRemove(begin, end) => model.source_about_to_remove_items(begin, end),
            Self::Removed(begin, end) => model.source_items_removed(begin, end),
            Self::AboutToInsert(begin, end) => model.source_about_to_insert_items(begin, end),
            Self::Inserted(begin, end) => model.source_items_inserted(begin, end),
            Self::DataChanged(begin, end) => model.source_data_changed(begin, end),
            Self::ItemsChanged => model.source_items_changed(),
            Self::Populated => model.make_populated(),
            Self::DisplayLabelOrder => model.update_display_label_order(),
            Self::SortProperty => model.update_sort_property(),
            Self::GroupProperty => model.update_group_property(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemEvent {
    Updated,
    AboutToBeRemoved,
}

/// How a single item's list memberships change in one mutation. Positions are those before the mutation.
///
/// Removals and insertions are bracketed together across all lists. A move, which is the item staying in a list under
/// a new sort key, is a removal followed by an insertion in that one list.
#[derive(Debug, Default)]
pub(crate) struct MembershipPlan {
    pub(crate) removals:   Vec<(FilterType, usize)>,
    pub(crate) insertions: Vec<(FilterType, usize)>,
    pub(crate) moves:      Vec<(FilterType, usize)>,
    pub(crate) changes:    Vec<(FilterType, usize)>,
}

impl MembershipPlan {
    pub(crate) fn is_structural(&self) -> bool {
        !(self.removals.is_empty() && self.insertions.is_empty() && self.moves.is_empty())
    }
}

pub(crate) fn dispatch_list<L>(filter: FilterType, receivers: &[ListenerId], event: ListEvent, lookup: L)
where
    L: Fn(ListenerId) -> Option<Arc<dyn ListModel>>,
{
    trace!("{filter} list: {event:?} to {} view(s)", receivers.len());
    for id in receivers {
        if let Some(model) = lookup(*id) {
            event.deliver(model.as_ref());
        }
    }
}

/// Delivers an item event to the item's own listeners first and to the global change listeners after.
pub(crate) fn dispatch_item<L>(item: &ItemHandle, event: ItemEvent, change_receivers: &[ListenerId], lookup: L)
where
    L: Fn(ListenerId) -> Option<Arc<dyn ChangeListener>>,
{
    for id in item.listener_ids() {
        if let Some(listener) = item.listener(id) {
            match event {
                ItemEvent::Updated => listener.item_updated(item),
                ItemEvent::AboutToBeRemoved => listener.item_about_to_be_removed(item),
            }
        }
    }

    for id in change_receivers {
        if let Some(listener) = lookup(*id) {
            match event {
                ItemEvent::Updated => listener.item_updated(item),
                ItemEvent::AboutToBeRemoved => listener.item_about_to_be_removed(item),
            }
        }
    }
}

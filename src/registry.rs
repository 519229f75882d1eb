use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::ChangeListener;
use crate::traits::ListModel;
use crate::traits::ResolveListener;
use crate::types::FetchTypes;
use crate::types::FilterType;
use crate::types::ListenerId;

struct RegisteredModel {
    id:       ListenerId,
    filter:   FilterType,
    required: FetchTypes,
    extra:    FetchTypes,
    model:    Arc<dyn ListModel>,
}

/// Views and global listeners known to the cache.
#[derive(Default)]
pub(crate) struct ModelRegistry {
    models:           Vec<RegisteredModel>,
    change_listeners: Vec<(ListenerId, Arc<dyn ChangeListener>)>,
    resolvers:        HashMap<ListenerId, Arc<dyn ResolveListener>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.len())
            .field("change_listeners", &self.change_listeners.len())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl ModelRegistry {
    pub(crate) fn add_model(
        &mut self,
        model: Arc<dyn ListModel>,
        filter: FilterType,
        required: FetchTypes,
        extra: FetchTypes,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.models.push(RegisteredModel {
            id,
            filter,
            required,
            extra,
            model,
        });
        id
    }

    pub(crate) fn remove_model(&mut self, id: ListenerId) -> bool {
        let before = self.models.len();
        self.models.retain(|m| m.id != id);
        self.models.len() != before
    }

    pub(crate) fn model(&self, id: ListenerId) -> Option<Arc<dyn ListModel>> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .map(|m| Arc::clone(&m.model))
    }

    pub(crate) fn model_ids(&self, filter: FilterType) -> Vec<ListenerId> {
        self.models
            .iter()
            .filter(|m| m.filter == filter)
            .map(|m| m.id)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn all_model_ids(&self) -> Vec<ListenerId> {
        self.models.iter().map(|m| m.id).collect()
    }

    pub(crate) fn has_models(&self, filter: FilterType) -> bool {
        self.models.iter().any(|m| m.filter == filter)
    }

    /// Facets that entries of the filter's list must have loaded.
    pub(crate) fn required_facets(&self, filter: FilterType) -> FetchTypes {
        self.models
            .iter()
            .filter(|m| m.filter == filter)
            .fold(FetchTypes::empty(), |acc, m| acc | m.required)
    }

    /// Facets to request when populating the filter's list.
    pub(crate) fn population_facets(&self, filter: FilterType) -> FetchTypes {
        self.models
            .iter()
            .filter(|m| m.filter == filter)
            .fold(FetchTypes::empty(), |acc, m| acc | m.required | m.extra)
    }

    pub(crate) fn add_change_listener(&mut self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId::next();
        self.change_listeners.push((id, listener));
        id
    }

    pub(crate) fn remove_change_listener(&mut self, id: ListenerId) -> bool {
        let before = self.change_listeners.len();
        self.change_listeners.retain(|(lid, _)| *lid != id);
        self.change_listeners.len() != before
    }

    pub(crate) fn change_listener(&self, id: ListenerId) -> Option<Arc<dyn ChangeListener>> {
        self.change_listeners
            .iter()
            .find(|(lid, _)| *lid == id)
            .map(|(_, l)| Arc::clone(l))
    }

    pub(crate) fn change_listener_ids(&self) -> Vec<ListenerId> {
        self.change_listeners.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn add_resolver(&mut self, listener: Arc<dyn ResolveListener>) -> ListenerId {
        let id = ListenerId::next();
        self.resolvers.insert(id, listener);
        id
    }

    pub(crate) fn remove_resolver(&mut self, id: ListenerId) -> bool {
        self.resolvers.remove(&id).is_some()
    }

    pub(crate) fn resolver(&self, id: ListenerId) -> Option<Arc<dyn ResolveListener>> {
        self.resolvers.get(&id).cloned()
    }
}

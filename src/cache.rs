use fieldx_plus::fx_plus;
use parking_lot::ReentrantMutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use strum::Display as StrumDisplay;
use strum::IntoEnumIterator;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::contact::determine_name_group;
use crate::contact::generate_display_label;
use crate::contact::Contact;
use crate::error::CacheError;
use crate::index::FilterLists;
use crate::item::ContactData;
use crate::item::ItemHandle;
use crate::notify::dispatch_item;
use crate::notify::dispatch_list;
use crate::notify::ItemEvent;
use crate::notify::ListEvent;
use crate::notify::MembershipPlan;
use crate::registry::ModelRegistry;
use crate::resolve::ResolveTable;
use crate::resolve::Waiter;
use crate::store::RecordStore;
use crate::traits::ChangeListener;
use crate::traits::ContactBackend;
use crate::traits::ItemData;
use crate::traits::ListModel;
use crate::traits::ResolveListener;
use crate::types::AlternateKey;
use crate::types::ContactId;
use crate::types::ContactState;
use crate::types::DisplayLabelOrder;
use crate::types::FetchTypes;
use crate::types::FilterType;
use crate::types::InternalId;
use crate::types::ListenerId;
use crate::types::NameProperty;
use crate::types::StatusFlags;

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) store:    RecordStore,
    pub(crate) lists:    FilterLists,
    pub(crate) registry: ModelRegistry,
    pub(crate) resolve:  ResolveTable,
    // Bumped by every reset; backend results started before it are dropped.
    pub(crate) epoch:    u64,
    pub(crate) requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
enum Related {
    #[strum(serialize = "constituents")]
    Constituents,
    #[strum(serialize = "merge candidates")]
    MergeCandidates,
}

enum Change {
    Data {
        contact:      Contact,
        // Encoded before anything is notified.
        compact:      ContactData,
        completeness: ContactState,
        facets:       FetchTypes,
    },
    Flags(StatusFlags),
    Invalidate,
    Remove,
}

// Attributes derived from record content.
struct Derived {
    display_label: String,
    name_group:    String,
    sort_key:      String,
    favorite:      bool,
    flags:         StatusFlags,
    keys:          Vec<AlternateKey>,
}

impl Derived {
    fn of(
        contact: &Contact,
        order: DisplayLabelOrder,
        sort: NameProperty,
        group: NameProperty,
        phone_match_length: usize,
    ) -> Self {
        let display_label = generate_display_label(contact, order);
        Self {
            name_group: determine_name_group(contact, group, &display_label),
            sort_key: contact.sort_key(sort),
            favorite: contact.favorite,
            flags: contact.effective_status_flags(),
            keys: contact.alternate_keys(phone_match_length),
            display_label,
        }
    }
}

fn filter_matches(filter: FilterType, favorite: bool, flags: StatusFlags) -> bool {
    match filter {
        FilterType::All => true,
        FilterType::Favorites => favorite,
        FilterType::Online => flags.contains(StatusFlags::IS_ONLINE),
    }
}

/// The contact cache context object.
///
/// All mutations are serialized by a reentrant gate: a mutation started from within a notification callback on the
/// same thread proceeds, one from another thread waits for the current mutation to finish. Backend requests run as
/// tokio tasks and feed their results back through the same gate.
///
/// ```ignore
/// let cache = ContactCache::builder()
///     .backend(MyBackend::connect(url).await?)
///     .display_label_order(DisplayLabelOrder::LastNameFirst)
///     .build()?;
///
/// let model_id = cache.register_model(my_view, FilterType::Favorites, FetchTypes::PHONE_NUMBER, FetchTypes::empty());
/// let resolver = cache.register_resolve_listener(my_resolver);
/// if let Some(item) = cache.resolve_phone_number(resolver, "+1 555 0100", true) {
///     // Known already, possibly still incomplete.
/// }
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`ContactCache`].", "", "See [`ContactCache::builder()`] method."),
        method_doc("Implement builder pattern for [`ContactCache`]."),
    )
)]
pub struct ContactCache<B>
where
    B: ContactBackend,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required, into), get(clone))]
    backend: Arc<B>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get(copy), default("contacts"))]
    name: &'static str,

    /// How many trailing digits of a phone number are compared when matching numbers.
    #[fieldx(get(copy), default(7))]
    phone_match_length: usize,

    #[fieldx(lock, get(copy), set(private), default(DisplayLabelOrder::FirstNameFirst))]
    display_label_order: DisplayLabelOrder,

    #[fieldx(lock, get(copy), set(private), default(NameProperty::FirstName))]
    sort_property: NameProperty,

    #[fieldx(lock, get(copy), set(private), default(NameProperty::FirstName))]
    group_property: NameProperty,

    #[fieldx(private, lazy, lock, get, get_mut, builder(off))]
    state: CacheState,

    #[fieldx(private, get, builder(off), default(ReentrantMutex::new(())))]
    gate: ReentrantMutex<()>,

    // Backend requests in flight.
    #[fieldx(private, lazy, lock, get_mut, builder(off))]
    tasks: JoinSet<()>,

    #[fieldx(lock, private, get(copy), set, builder(off), default(false))]
    closed: bool,
}

impl<B> ContactCache<B>
where
    B: ContactBackend,
{
    /// Cache over the backend with every setting at its default.
    pub fn new<T>(backend: T) -> Result<Arc<Self>, CacheError>
    where
        T: Into<Arc<B>>,
    {
        Self::builder()
            .backend(backend)
            .build()
            .map_err(|err| CacheError::Builder(err.to_string()))
    }

    fn build_state(&self) -> CacheState {
        CacheState::default()
    }

    fn build_tasks(&self) -> JoinSet<()> {
        JoinSet::new()
    }

    fn check_open(&self) -> Result<(), CacheError> {
        if self.closed() {
            Err(CacheError::Closed)
        }
        else {
            Ok(())
        }
    }

    fn spawn<F>(&self, what: &str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed() {
            debug!("[{}] closed, not starting {what}", self.name());
            return false;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                trace!("[{}] starting {what}", self.name());
                let mut tasks = self.tasks_mut();
                while tasks.try_join_next().is_some() {}
                tasks.spawn_on(fut, &handle);
                true
            }
            Err(_) => {
                warn!("[{}] {what}: {}", self.name(), CacheError::NoRuntime);
                false
            }
        }
    }

    // ---- Lookups

    pub fn existing_item(&self, id: &ContactId) -> Option<ItemHandle> {
        self.state().store.by_contact_id(id).cloned()
    }

    pub fn existing_item_by_iid(&self, iid: InternalId) -> Option<ItemHandle> {
        self.state().store.get(iid).cloned()
    }

    pub fn internal_id(&self, id: &ContactId) -> Option<InternalId> {
        self.state().store.iid_of(id)
    }

    pub fn api_id(&self, iid: InternalId) -> Option<ContactId> {
        self.existing_item_by_iid(iid).map(|item| item.contact_id())
    }

    /// Record of a known contact, if any data has been loaded for it.
    pub fn contact_by_id(&self, id: &ContactId) -> Option<Contact> {
        let item = self.existing_item(id)?;
        match item.contact() {
            Ok(contact) => contact,
            Err(err) => {
                warn!("[{}] cannot decode contact {id}: {err}", self.name());
                None
            }
        }
    }

    /// Returns the item of a contact, creating an absent placeholder on first reference. Never blocks: with
    /// `require_complete` a fetch is started, and the item becomes complete later.
    pub fn item_by_id(&self, id: &ContactId, require_complete: bool) -> ItemHandle {
        let _gate = self.gate().lock();
        let item = self.ensure_item(id);
        if require_complete && item.contact_state() < ContactState::Requested {
            self.request_contact(&item);
        }
        item
    }

    pub fn item_by_phone_number(&self, number: &str, require_complete: bool) -> Option<ItemHandle> {
        let key = AlternateKey::phone(number, self.phone_match_length())?;
        self.item_by_key(&key, require_complete)
    }

    pub fn item_by_email_address(&self, email: &str, require_complete: bool) -> Option<ItemHandle> {
        let key = AlternateKey::email(email)?;
        self.item_by_key(&key, require_complete)
    }

    pub fn item_by_online_account(
        &self,
        local_uid: &str,
        remote_uid: &str,
        require_complete: bool,
    ) -> Option<ItemHandle> {
        let key = AlternateKey::account(local_uid, remote_uid)?;
        self.item_by_key(&key, require_complete)
    }

    fn item_by_key(&self, key: &AlternateKey, require_complete: bool) -> Option<ItemHandle> {
        let item = self.state().store.lookup(key).cloned()?;
        if require_complete {
            self.ensure_completion(&item);
        }
        Some(item)
    }

    pub fn contacts(&self, filter: FilterType) -> Vec<InternalId> {
        self.state().lists.ids(filter).to_vec()
    }

    pub fn count(&self, filter: FilterType) -> usize {
        self.state().lists.len(filter)
    }

    pub fn item_at(&self, filter: FilterType, index: usize) -> Option<ItemHandle> {
        let state = self.state();
        let iid = state.lists.ids(filter).get(index).copied()?;
        state.store.get(iid).cloned()
    }

    pub fn is_populated(&self, filter: FilterType) -> bool {
        self.state().lists.is_populated(filter)
    }

    pub fn len(&self) -> usize {
        self.state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- Completion

    /// Starts a full fetch unless the item is complete or already requested.
    pub fn ensure_completion(&self, item: &ItemHandle) {
        let _gate = self.gate().lock();
        if item.contact_state() < ContactState::Requested {
            self.request_contact(item);
        }
    }

    /// Re-fetches the item regardless of its current state. Cached content stays available until the new one
    /// arrives, and a fetch already in flight is superseded.
    pub fn refresh_contact(&self, item: &ItemHandle) {
        let _gate = self.gate().lock();
        self.request_contact(item);
    }

    /// Drops the record content of the item, bringing it back to the absent state. List memberships and listeners
    /// are kept.
    pub fn invalidate_contact(&self, item: &ItemHandle) {
        let _gate = self.gate().lock();
        if self.existing_item_by_iid(item.iid()).is_some() {
            self.commit(item, Change::Invalidate);
        }
    }

    fn request_contact(&self, item: &ItemHandle) {
        let Some(myself) = self.myself()
        else {
            return;
        };
        let backend = self.backend();
        let id = item.contact_id();
        let request = {
            let mut state = self.state_mut();
            state.requests += 1;
            state.requests
        };
        let what = format!("fetch of {id}");
        let started = self.spawn(&what, async move {
            let result = backend.load_by_id(&id).await;
            myself.contact_fetched(&id, request, result);
        });
        if started {
            let mut item = item.write();
            item.request = request;
            item.contact_state = ContactState::Requested;
        }
    }

    fn contact_fetched(&self, id: &ContactId, request: u64, result: Result<Option<Contact>, B::Error>) {
        let _gate = self.gate().lock();
        let Some(item) = self.existing_item(id)
        else {
            debug!("[{}] contact {id} was dropped while being fetched", self.name());
            return;
        };
        if item.read().request != request {
            debug!("[{}] fetch #{request} of {id} was superseded", self.name());
            return;
        }

        match result {
            Ok(Some(mut contact)) => {
                contact.id = Some(id.clone());
                if let Err(err) = self.apply_to(&item, contact, ContactState::Complete, FetchTypes::all()) {
                    warn!("[{}] cannot store fetched contact {id}: {err}", self.name());
                    self.revert_request(&item);
                }
            }
            Ok(None) => {
                debug!("[{}] backend has no contact {id}", self.name());
                self.revert_request(&item);
            }
            Err(err) => {
                warn!("[{}] fetching contact {id} failed: {err}", self.name());
                self.revert_request(&item);
            }
        }
    }

    fn revert_request(&self, item: &ItemHandle) {
        let mut item = item.write();
        if item.contact_state == ContactState::Requested {
            item.contact_state = item.data_completeness;
        }
    }

    // ---- Resolution

    pub fn register_resolve_listener(&self, listener: Arc<dyn ResolveListener>) -> ListenerId {
        self.state_mut().registry.add_resolver(listener)
    }

    /// Cancels every pending resolve of the listener. In-flight lookups keep running for other listeners.
    pub fn unregister_resolve_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state_mut();
        state.resolve.cancel(id);
        state.registry.remove_resolver(id)
    }

    pub fn resolve_phone_number(
        &self,
        listener: ListenerId,
        number: &str,
        require_complete: bool,
    ) -> Option<ItemHandle> {
        let key = AlternateKey::phone(number, self.phone_match_length())?;
        self.resolve(listener, key, String::new(), number.to_string(), require_complete)
    }

    pub fn resolve_email_address(
        &self,
        listener: ListenerId,
        email: &str,
        require_complete: bool,
    ) -> Option<ItemHandle> {
        let key = AlternateKey::email(email)?;
        self.resolve(listener, key, String::new(), email.to_string(), require_complete)
    }

    pub fn resolve_online_account(
        &self,
        listener: ListenerId,
        local_uid: &str,
        remote_uid: &str,
        require_complete: bool,
    ) -> Option<ItemHandle> {
        let key = AlternateKey::account(local_uid, remote_uid)?;
        self.resolve(
            listener,
            key,
            local_uid.to_string(),
            remote_uid.to_string(),
            require_complete,
        )
    }

    fn resolve(
        &self,
        listener: ListenerId,
        key: AlternateKey,
        first: String,
        second: String,
        require_complete: bool,
    ) -> Option<ItemHandle> {
        let _gate = self.gate().lock();
        let hit = self.state().store.lookup(&key).cloned();

        if let Some(ref item) = hit {
            if !require_complete || item.contact_state() == ContactState::Complete {
                return hit;
            }
        }

        if self.state().registry.resolver(listener).is_none() {
            warn!("[{}] resolve of {key} by unknown listener {listener:?}", self.name());
            return hit;
        }

        let waiter = Waiter {
            listener,
            first,
            second,
            require_complete,
        };

        if let Some(item) = hit {
            self.state_mut().resolve.wait_for_item(item.iid(), waiter);
            self.ensure_completion(&item);
            return Some(item);
        }

        let is_new = self.state_mut().resolve.wait_for_key(key.clone(), waiter);
        if is_new {
            self.request_address(key);
        }
        None
    }

    fn request_address(&self, key: AlternateKey) {
        let Some(myself) = self.myself()
        else {
            return;
        };
        let backend = self.backend();
        let epoch = self.state().epoch;
        let what = format!("lookup of {key}");
        let lookup_key = key.clone();
        let started = self.spawn(&what, async move {
            let result = backend.load_by_alternate_key(&lookup_key).await;
            myself.address_fetched(epoch, lookup_key, result);
        });
        if !started {
            self.state_mut().resolve.take_key(&key);
        }
    }

    fn address_fetched(&self, epoch: u64, key: AlternateKey, result: Result<Option<Contact>, B::Error>) {
        let _gate = self.gate().lock();
        if self.state().epoch != epoch {
            debug!("[{}] dropping lookup of {key} started before a reset", self.name());
            return;
        }
        let item = match result {
            Ok(Some(contact)) => match self.apply_contact(contact, ContactState::Complete, FetchTypes::all()) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!("[{}] cannot store contact resolved by {key}: {err}", self.name());
                    None
                }
            },
            Ok(None) => {
                debug!("[{}] nothing resolves {key}", self.name());
                None
            }
            Err(err) => {
                warn!("[{}] lookup of {key} failed: {err}", self.name());
                None
            }
        };

        // Usually empty by now: indexing the contact has delivered to the key's waiters already.
        let waiters = self.state_mut().resolve.take_key(&key);
        if let Some(item) = item {
            self.deliver_resolved(&item, waiters);
        }
    }

    fn deliver_resolved(&self, item: &ItemHandle, waiters: Vec<Waiter>) {
        if waiters.is_empty() {
            return;
        }

        let complete = item.contact_state() == ContactState::Complete;
        let mut needs_completion = false;
        for waiter in waiters {
            if waiter.require_complete && !complete {
                self.state_mut().resolve.wait_for_item(item.iid(), waiter);
                needs_completion = true;
                continue;
            }
            let listener = self.state().registry.resolver(waiter.listener);
            if let Some(listener) = listener {
                listener.address_resolved(&waiter.first, &waiter.second, item);
            }
        }

        if needs_completion {
            self.ensure_completion(item);
        }
    }

    // ---- Mutation

    /// Stores the contact in the backend and then in the cache. On failure the cache is left untouched.
    #[instrument(level = "debug", skip_all, fields(cache = self.name()))]
    pub async fn save_contact(&self, mut contact: Contact) -> Result<ItemHandle, CacheError> {
        self.check_open()?;
        let id = self.backend().save(&contact).await.map_err(CacheError::backend)?;
        contact.id = Some(id);
        self.apply_contact(contact, ContactState::Complete, FetchTypes::all())
    }

    #[instrument(level = "debug", skip(self), fields(cache = self.name()))]
    pub async fn remove_contact(&self, id: &ContactId) -> Result<(), CacheError> {
        self.check_open()?;
        self.backend().remove(id).await.map_err(CacheError::backend)?;
        self.drop_contact(id);
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(cache = self.name()))]
    pub async fn aggregate_contacts(&self, first: &ContactId, second: &ContactId) -> Result<(), CacheError> {
        self.check_open()?;
        self.backend()
            .aggregate(first, second)
            .await
            .map_err(CacheError::backend)?;
        self.contacts_changed(&[first.clone(), second.clone()]);
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(cache = self.name()))]
    pub async fn disaggregate_contacts(&self, first: &ContactId, second: &ContactId) -> Result<(), CacheError> {
        self.check_open()?;
        self.backend()
            .disaggregate(first, second)
            .await
            .map_err(CacheError::backend)?;
        self.contacts_changed(&[first.clone(), second.clone()]);
        Ok(())
    }

    /// Status flags can change without the record being reloaded, e.g. on presence updates.
    pub fn update_status_flags(&self, id: &ContactId, flags: StatusFlags) -> bool {
        let _gate = self.gate().lock();
        let Some(item) = self.existing_item(id)
        else {
            return false;
        };
        if item.status_flags() != flags {
            self.commit(&item, Change::Flags(flags));
        }
        true
    }

    /// New contacts appeared in the backend.
    pub fn contacts_added(&self, ids: &[ContactId]) {
        let _gate = self.gate().lock();
        if !FilterType::iter().any(|f| self.is_populated(f)) {
            return;
        }
        for id in ids {
            let item = self.ensure_item(id);
            self.ensure_completion(&item);
        }
    }

    /// Known contacts were modified in the backend.
    pub fn contacts_changed(&self, ids: &[ContactId]) {
        let _gate = self.gate().lock();
        for id in ids {
            if let Some(item) = self.existing_item(id) {
                self.refresh_contact(&item);
            }
        }
    }

    /// Contacts were removed from the backend by someone else.
    pub fn contacts_removed(&self, ids: &[ContactId]) {
        let _gate = self.gate().lock();
        for id in ids {
            self.drop_contact(id);
        }
    }

    fn drop_contact(&self, id: &ContactId) {
        let _gate = self.gate().lock();
        if let Some(item) = self.existing_item(id) {
            self.commit(&item, Change::Remove);
        }
    }

    fn ensure_item(&self, id: &ContactId) -> ItemHandle {
        let existing = self.state().store.by_contact_id(id).cloned();
        if let Some(item) = existing {
            return item;
        }
        let item = self.state_mut().store.create(id.clone());
        trace!("[{}] new item {} for {id}", self.name(), item.iid());
        item
    }

    pub(crate) fn apply_contact(
        &self,
        contact: Contact,
        completeness: ContactState,
        facets: FetchTypes,
    ) -> Result<ItemHandle, CacheError> {
        let id = contact.id.clone().ok_or(CacheError::MissingId)?;
        let _gate = self.gate().lock();
        let item = self.ensure_item(&id);
        self.apply_to(&item, contact, completeness, facets)?;
        Ok(item)
    }

    fn apply_to(
        &self,
        item: &ItemHandle,
        mut contact: Contact,
        completeness: ContactState,
        mut facets: FetchTypes,
    ) -> Result<(), CacheError> {
        {
            let current = item.read();
            if !current.accepts(completeness) {
                trace!(
                    "[{}] ignoring {completeness:?} data for {}: already has more",
                    self.name(),
                    item.iid()
                );
                return Ok(());
            }
            // A partial row only speaks for the facets it was fetched with; the rest stays as loaded earlier.
            if completeness == ContactState::Partial && current.data_completeness == ContactState::Partial {
                if let Some(stored) = current.contact()? {
                    contact.fill_facets_from(&stored, facets);
                    facets |= current.fetched_facets;
                }
            }
        }
        let compact = ContactData::compact(&contact)?;
        self.commit(
            item,
            Change::Data {
                contact,
                compact,
                completeness,
                facets,
            },
        );
        Ok(())
    }

    fn current_sort_key(&self, item: &ItemHandle) -> String {
        let listed = self.state().lists.sort_key(item.iid()).map(str::to_string);
        if let Some(key) = listed {
            return key;
        }
        let item = item.read();
        match item.contact() {
            Ok(Some(contact)) => contact.sort_key(self.sort_property()),
            _ => item.display_label.to_lowercase(),
        }
    }

    // Applies one logical mutation of one item. Every view is told about the coming removals and insertions before
    // any list changes, and about their completion once the record, its keys and the lists are all updated. Moves
    // inside a list follow, then data change notifications, item listeners, and finally resolve deliveries.
    fn commit(&self, item: &ItemHandle, change: Change) {
        let _gate = self.gate().lock();
        let iid = item.iid();
        let removing = matches!(change, Change::Remove);

        let derived = match &change {
            Change::Data { contact, .. } => Some(Derived::of(
                contact,
                self.display_label_order(),
                self.sort_property(),
                self.group_property(),
                self.phone_match_length(),
            )),
            _ => None,
        };

        let (favorite, flags, has_data) = {
            let current = item.read();
            match (&change, &derived) {
                (_, Some(derived)) => (derived.favorite, derived.flags, true),
                (Change::Flags(flags), _) => (current.favorite, *flags, !current.data.is_empty()),
                (Change::Invalidate, _) => (current.favorite, current.status_flags, false),
                _ => (current.favorite, current.status_flags, !current.data.is_empty()),
            }
        };
        let sort_key = match &derived {
            Some(derived) => derived.sort_key.clone(),
            None => self.current_sort_key(item),
        };

        let mut plan = MembershipPlan::default();
        {
            let state = self.state();
            for filter in FilterType::iter() {
                let position = state.lists.position(filter, iid);
                let member = !removing
                    && state.lists.is_populated(filter)
                    && (has_data || position.is_some())
                    && filter_matches(filter, favorite, flags);
                let moved = state.lists.sort_key_in(filter, iid).is_some_and(|k| k != sort_key);
                match (position, member) {
                    (Some(pos), false) => plan.removals.push((filter, pos)),
                    (Some(pos), true) if moved => plan.moves.push((filter, pos)),
                    (Some(pos), true) => plan.changes.push((filter, pos)),
                    (None, true) => plan
                        .insertions
                        .push((filter, state.lists.insertion_point(filter, iid, &sort_key))),
                    (None, false) => (),
                }
            }
        }

        if plan.is_structural() {
            debug!("[{}] membership of {iid} changes: {plan:?}", self.name());
        }
        else {
            trace!("[{}] commit {iid}: {plan:?}", self.name());
        }

        let change_receivers = self.state().registry.change_listener_ids();
        let change_lookup = |id| self.state().registry.change_listener(id);

        if removing {
            dispatch_item(item, ItemEvent::AboutToBeRemoved, &change_receivers, change_lookup);
        }

        for (filter, pos) in &plan.removals {
            self.emit(*filter, ListEvent::AboutToRemove(*pos, pos + 1));
        }
        for (filter, pos) in &plan.insertions {
            self.emit(*filter, ListEvent::AboutToInsert(*pos, pos + 1));
        }

        // Lists, the record, and its alternate keys change together.
        let mut newly_indexed = Vec::new();
        let mut became_complete = false;
        let mut stored = None;
        {
            let mut state = self.state_mut();
            for (filter, pos) in &plan.removals {
                state.lists.remove(*filter, *pos);
            }
            match change {
                Change::Data {
                    contact,
                    compact,
                    completeness,
                    facets,
                } => {
                    if let Some(derived) = derived {
                        {
                            let mut current = item.write();
                            current.data = if current.data.is_instantiated() {
                                ContactData::Live(Box::new(contact.clone()))
                            }
                            else {
                                compact
                            };
                            became_complete = completeness == ContactState::Complete
                                && current.contact_state != ContactState::Complete;
                            current.data_completeness = completeness;
                            current.contact_state = if current.contact_state == ContactState::Requested
                                && completeness < ContactState::Complete
                            {
                                ContactState::Requested
                            }
                            else {
                                completeness
                            };
                            current.fetched_facets = if completeness == ContactState::Complete {
                                FetchTypes::all()
                            }
                            else {
                                facets
                            };
                            current.favorite = derived.favorite;
                            current.status_flags = derived.flags;
                            current.display_label = derived.display_label;
                            current.name_group = derived.name_group;
                        }
                        newly_indexed = state.store.index.reindex(iid, derived.keys);
                        stored = Some(contact);
                    }
                }
                Change::Flags(flags) => {
                    item.write().status_flags = flags;
                }
                Change::Invalidate => {
                    let mut current = item.write();
                    current.data = ContactData::Empty;
                    current.contact_state = ContactState::Absent;
                    current.data_completeness = ContactState::Absent;
                    current.fetched_facets = FetchTypes::empty();
                    state.store.index.drop_keys(iid);
                }
                Change::Remove => {
                    state.store.remove(iid);
                    state.resolve.take_item(iid);
                }
            }
            for (filter, pos) in &plan.insertions {
                state.lists.insert(*filter, *pos, iid, sort_key.clone());
            }
        }

        for (filter, pos) in &plan.removals {
            self.emit(*filter, ListEvent::Removed(*pos, pos + 1));
        }
        for (filter, pos) in &plan.insertions {
            self.emit(*filter, ListEvent::Inserted(*pos, pos + 1));
        }

        if removing {
            debug!("[{}] removed {iid}", self.name());
            return;
        }

        if let Some(contact) = stored {
            self.with_item_data(item, |item_data| item_data.update_cache_contact(iid, &contact));
        }

        for (filter, pos) in &plan.moves {
            self.emit(*filter, ListEvent::AboutToRemove(*pos, pos + 1));
            self.state_mut().lists.remove(*filter, *pos);
            self.emit(*filter, ListEvent::Removed(*pos, pos + 1));

            let at = self.state().lists.insertion_point(*filter, iid, &sort_key);
            self.emit(*filter, ListEvent::AboutToInsert(at, at + 1));
            self.state_mut().lists.insert(*filter, at, iid, sort_key.clone());
            self.emit(*filter, ListEvent::Inserted(at, at + 1));
        }

        for (filter, pos) in &plan.changes {
            self.emit(*filter, ListEvent::DataChanged(*pos, pos + 1));
        }
        for (filter, _) in &plan.changes {
            self.emit(*filter, ListEvent::ItemsChanged);
        }

        dispatch_item(item, ItemEvent::Updated, &change_receivers, change_lookup);

        for (filter, _) in &plan.insertions {
            self.top_up_facets(*filter, &[iid]);
        }

        let mut waiters = Vec::new();
        {
            let mut state = self.state_mut();
            for key in &newly_indexed {
                waiters.extend(state.resolve.take_key(key));
            }
            if became_complete {
                waiters.extend(state.resolve.take_item(iid));
            }
        }
        self.deliver_resolved(item, waiters);
    }

    fn emit(&self, filter: FilterType, event: ListEvent) {
        let receivers = self.state().registry.model_ids(filter);
        dispatch_list(filter, &receivers, event, |id| self.state().registry.model(id));
    }

    fn emit_all(&self, event: ListEvent) {
        for filter in FilterType::iter() {
            self.emit(filter, event);
        }
    }

    // Requests full data for listed items that lack facets required by the filter's views.
    fn top_up_facets(&self, filter: FilterType, iids: &[InternalId]) {
        let required = self.state().registry.required_facets(filter);
        if required.is_empty() {
            return;
        }
        for iid in iids {
            let Some(item) = self.existing_item_by_iid(*iid)
            else {
                continue;
            };
            let missing = !item.read().fetched_facets.contains(required);
            if missing {
                self.ensure_completion(&item);
            }
        }
    }

    // ---- Views and listeners

    /// Registers a view for a filter. The view's `make_populated` is called once the filter's list is built, right
    /// away if it already is.
    pub fn register_model(
        &self,
        model: Arc<dyn ListModel>,
        filter: FilterType,
        required: FetchTypes,
        extra: FetchTypes,
    ) -> ListenerId {
        let _gate = self.gate().lock();
        let (id, populated) = {
            let mut state = self.state_mut();
            let id = state.registry.add_model(Arc::clone(&model), filter, required, extra);
            (id, state.lists.is_populated(filter))
        };
        debug!("[{}] registered view {id:?} for {filter}", self.name());

        if populated {
            model.make_populated();
            let listed = self.contacts(filter);
            self.top_up_facets(filter, &listed);
        }
        else {
            self.populate(filter);
        }
        id
    }

    /// Safe to call at any time, including from the view's own teardown; repeated calls are no-ops.
    pub fn unregister_model(&self, id: ListenerId) -> bool {
        self.state_mut().registry.remove_model(id)
    }

    pub fn register_change_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.state_mut().registry.add_change_listener(listener)
    }

    pub fn unregister_change_listener(&self, id: ListenerId) -> bool {
        self.state_mut().registry.remove_change_listener(id)
    }

    /// Starts building the filter's list unless it is built or being built.
    pub fn populate(&self, filter: FilterType) {
        let _gate = self.gate().lock();
        let (facets, epoch) = {
            let state = self.state();
            if state.lists.is_populated(filter) || state.lists.is_populating(filter) {
                return;
            }
            (state.registry.population_facets(filter), state.epoch)
        };

        let Some(myself) = self.myself()
        else {
            return;
        };
        let backend = self.backend();
        let started = self.spawn(&format!("population of {filter}"), async move {
            let result = backend.load_filter(filter, facets).await;
            myself.filter_loaded(epoch, filter, facets, result);
        });
        if started {
            self.state_mut().lists.set_populating(filter, true);
        }
    }

    fn filter_loaded(
        &self,
        epoch: u64,
        filter: FilterType,
        facets: FetchTypes,
        result: Result<Vec<Contact>, B::Error>,
    ) {
        let _gate = self.gate().lock();
        let stale = {
            let state = self.state();
            state.epoch != epoch || !state.lists.is_populating(filter)
        };
        if stale {
            debug!("[{}] dropping stale population of {filter}", self.name());
            return;
        }

        let contacts = match result {
            Ok(contacts) => contacts,
            Err(err) => {
                warn!("[{}] population of {filter} failed: {err}", self.name());
                self.state_mut().lists.set_populating(filter, false);
                return;
            }
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(contacts.len());
        for contact in contacts {
            let item = match self.apply_contact(contact, ContactState::Partial, facets) {
                Ok(item) => item,
                Err(err) => {
                    warn!("[{}] skipping contact while populating {filter}: {err}", self.name());
                    continue;
                }
            };
            let (favorite, flags) = {
                let current = item.read();
                (current.favorite, current.status_flags)
            };
            if filter_matches(filter, favorite, flags) && seen.insert(item.iid()) {
                entries.push((item.iid(), self.current_sort_key(&item)));
            }
        }
        entries.sort_by(|(ia, ka), (ib, kb)| (ka.as_str(), ia).cmp(&(kb.as_str(), ib)));

        let count = entries.len();
        let listed: Vec<InternalId> = entries.iter().map(|(iid, _)| *iid).collect();
        debug!("[{}] {filter} populated with {count} contact(s)", self.name());

        if count > 0 {
            self.emit(filter, ListEvent::AboutToInsert(0, count));
        }
        {
            let mut state = self.state_mut();
            state.lists.fill(filter, entries);
            state.lists.set_populated(filter);
        }
        if count > 0 {
            self.emit(filter, ListEvent::Inserted(0, count));
        }
        self.emit(filter, ListEvent::Populated);
        self.top_up_facets(filter, &listed);
    }

    // ---- Display configuration

    pub fn change_display_label_order(&self, order: DisplayLabelOrder) {
        let _gate = self.gate().lock();
        if self.display_label_order() == order {
            return;
        }
        self.set_display_label_order(order);
        let group = self.group_property();

        let items = self.state().store.items().to_vec();
        for item in items {
            let mut current = item.write();
            let contact = match current.contact() {
                Ok(Some(contact)) => contact.into_owned(),
                Ok(None) => continue,
                Err(err) => {
                    warn!("[{}] cannot decode {}: {err}", self.name(), current.iid);
                    continue;
                }
            };
            current.display_label = generate_display_label(&contact, order);
            current.name_group = determine_name_group(&contact, group, &current.display_label);
            drop(current);
            self.with_item_data(&item, |item_data| item_data.display_label_order_changed(order));
        }

        self.emit_all(ListEvent::DisplayLabelOrder);
    }

    /// Re-sorts every list. Views are told to re-read their lists.
    pub fn change_sort_property(&self, property: NameProperty) {
        let _gate = self.gate().lock();
        if self.sort_property() == property {
            return;
        }
        self.set_sort_property(property);

        let items = self.state().store.items().to_vec();
        let mut keys = Vec::new();
        for item in items {
            if self.state().lists.sort_key(item.iid()).is_none() {
                continue;
            }
            let current = item.read();
            let key = match current.contact() {
                Ok(Some(contact)) => contact.sort_key(property),
                _ => current.display_label.to_lowercase(),
            };
            keys.push((item.iid(), key));
        }

        {
            let mut state = self.state_mut();
            for (iid, key) in keys {
                state.lists.set_sort_key(iid, key);
            }
            state.lists.resort();
        }

        self.emit_all(ListEvent::SortProperty);
    }

    pub fn change_group_property(&self, property: NameProperty) {
        let _gate = self.gate().lock();
        if self.group_property() == property {
            return;
        }
        self.set_group_property(property);

        let items = self.state().store.items().to_vec();
        for item in items {
            let mut current = item.write();
            let contact = match current.contact() {
                Ok(Some(contact)) => contact.into_owned(),
                _ => continue,
            };
            current.name_group = determine_name_group(&contact, property, &current.display_label);
        }

        self.emit_all(ListEvent::GroupProperty);
    }

    // ---- Item extension data

    /// Fetches the constituents of an aggregate contact and hands them over to the item's extension data.
    pub fn fetch_constituents(&self, item: &ItemHandle) {
        self.fetch_related(item, Related::Constituents);
    }

    pub fn fetch_merge_candidates(&self, item: &ItemHandle) {
        self.fetch_related(item, Related::MergeCandidates);
    }

    fn fetch_related(&self, item: &ItemHandle, related: Related) {
        let Some(myself) = self.myself()
        else {
            return;
        };
        let backend = self.backend();
        let id = item.contact_id();
        let target = item.clone();
        self.spawn(&format!("fetch of {related} of {id}"), async move {
            let result = match related {
                Related::Constituents => backend.fetch_constituents(&id).await,
                Related::MergeCandidates => backend.fetch_merge_candidates(&id).await,
            };
            match result {
                Ok(ids) => myself.related_fetched(&target, related, ids),
                Err(err) => warn!("[{}] fetching {related} of {id} failed: {err}", myself.name()),
            }
        });
    }

    fn related_fetched(&self, item: &ItemHandle, related: Related, ids: Vec<ContactId>) {
        let _gate = self.gate().lock();
        if self.existing_item_by_iid(item.iid()).is_none() {
            return;
        }
        let iids: Vec<InternalId> = ids.iter().map(|id| self.ensure_item(id).iid()).collect();
        self.with_item_data(item, |item_data| match related {
            Related::Constituents => item_data.constituents_fetched(&iids),
            Related::MergeCandidates => item_data.merge_candidates_fetched(&iids),
        });
    }

    // Extension data is called with no lock held. It is put back unless another one was set meanwhile.
    fn with_item_data<F>(&self, item: &ItemHandle, f: F)
    where
        F: FnOnce(&mut dyn ItemData),
    {
        let Some(mut item_data) = item.take_item_data()
        else {
            return;
        };
        f(item_data.as_mut());
        let mut current = item.write();
        if current.item_data.is_none() {
            current.item_data = Some(item_data);
        }
    }

    // ---- Lifecycle

    /// Forgets every item. Views get removal brackets for their whole lists, item listeners are told about the
    /// removal, and filters with registered views are populated again.
    pub fn reset(&self) {
        let _gate = self.gate().lock();
        debug!("[{}] reset", self.name());
        // Nothing waits for the results of requests issued before the reset. Tasks a running `settle()` has taken
        // over are out of reach here; their results are dropped by epoch.
        self.tasks_mut().abort_all();

        let items = self.state().store.items().to_vec();
        let change_receivers = self.state().registry.change_listener_ids();
        for item in &items {
            dispatch_item(item, ItemEvent::AboutToBeRemoved, &change_receivers, |id| {
                self.state().registry.change_listener(id)
            });
        }

        let lengths: Vec<(FilterType, usize)> = {
            let state = self.state();
            FilterType::iter()
                .map(|f| (f, state.lists.len(f)))
                .filter(|(_, len)| *len > 0)
                .collect()
        };
        for (filter, len) in &lengths {
            self.emit(*filter, ListEvent::AboutToRemove(0, *len));
        }
        {
            let mut state = self.state_mut();
            state.store.clear();
            state.lists.clear();
            state.resolve.clear();
            state.epoch += 1;
        }
        for (filter, len) in &lengths {
            self.emit(*filter, ListEvent::Removed(0, *len));
        }

        for filter in FilterType::iter() {
            let has_models = self.state().registry.has_models(filter);
            if has_models {
                self.populate(filter);
            }
        }
    }

    /// Waits until no backend request is in flight, including requests started by completions.
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::replace(&mut *self.tasks_mut(), JoinSet::new());
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    if err.is_panic() {
                        warn!("[{}] backend request panicked: {err}", self.name());
                    }
                }
            }
        }
    }

    /// Aborts in-flight requests and refuses new ones.
    pub async fn close(&self) {
        self.set_closed(true);
        let mut tasks = std::mem::replace(&mut *self.tasks_mut(), JoinSet::new());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        debug!("[{}] closed", self.name());
    }
}

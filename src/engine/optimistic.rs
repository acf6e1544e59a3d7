//! Local mutations applied ahead of server confirmation.
//!
//! An [`OptimisticStore`] owns one collection. Every mutation goes through a
//! [`PendingAction`] that is either confirmed (the local change stays) or
//! reverted (the collection returns to its pre-mutation state). Several actions
//! may be pending at once; two pending edits of the same item are not
//! reconciled beyond "last applied wins".
//!
//! A pending delete hides its item rather than removing it, so reverting
//! deletes in any order puts every item back in its original slot.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;

pub trait Identified {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

pub type ActionId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

/// Update and delete carry the original value so they can always be undone.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    Create(T),
    Update { data: T, original: T },
    Delete { original: T },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction<T> {
    pub id: ActionId,
    pub mutation: Mutation<T>,
}

impl<T: Identified> PendingAction<T> {
    pub fn create(data: T) -> Self {
        Self::new(Mutation::Create(data))
    }

    pub fn update(data: T, original: T) -> Self {
        Self::new(Mutation::Update { data, original })
    }

    pub fn delete(original: T) -> Self {
        Self::new(Mutation::Delete { original })
    }

    fn new(mutation: Mutation<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mutation,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.mutation {
            Mutation::Create(_) => ActionKind::Create,
            Mutation::Update { .. } => ActionKind::Update,
            Mutation::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn data(&self) -> &T {
        match &self.mutation {
            Mutation::Create(data) | Mutation::Update { data, .. } => data,
            Mutation::Delete { original } => original,
        }
    }

    pub fn original_data(&self) -> Option<&T> {
        match &self.mutation {
            Mutation::Create(_) => None,
            Mutation::Update { original, .. } | Mutation::Delete { original } => Some(original),
        }
    }

    pub fn target_id(&self) -> T::Id {
        self.data().id()
    }
}

type ActionHook<T> = Box<dyn Fn(&PendingAction<T>) + Send + Sync>;
type ErrorHook<T> = Box<dyn Fn(&PendingAction<T>, &AppError) + Send + Sync>;

pub struct OptimisticCallbacks<T> {
    on_success: Option<ActionHook<T>>,
    on_error: Option<ErrorHook<T>>,
    on_revert: Option<ActionHook<T>>,
}

impl<T> Default for OptimisticCallbacks<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_revert: None,
        }
    }
}

impl<T> OptimisticCallbacks<T> {
    pub fn on_success(mut self, hook: impl Fn(&PendingAction<T>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_error(
        mut self,
        hook: impl Fn(&PendingAction<T>, &AppError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_revert(mut self, hook: impl Fn(&PendingAction<T>) + Send + Sync + 'static) -> Self {
        self.on_revert = Some(Box::new(hook));
        self
    }
}

struct PendingRecord<T> {
    action: PendingAction<T>,
    /// Index the original item occupied, used when a refresh dropped it.
    position: Option<usize>,
}

struct StoreInner<T> {
    /// Backing list, including items hidden by a pending delete.
    items: Vec<T>,
    pending: HashMap<ActionId, PendingRecord<T>>,
    /// Application order, so reconciliation re-applies stacked edits in sequence.
    order: Vec<ActionId>,
}

impl<T: Identified + Clone> StoreInner<T> {
    fn hidden(&self) -> HashSet<T::Id> {
        self.pending
            .values()
            .filter_map(|record| match &record.action.mutation {
                Mutation::Delete { original } => Some(original.id()),
                _ => None,
            })
            .collect()
    }

    fn visible(&self) -> Vec<T> {
        let hidden = self.hidden();
        self.items
            .iter()
            .filter(|item| !hidden.contains(&item.id()))
            .cloned()
            .collect()
    }

    fn visible_position(&self, id: &T::Id) -> Result<usize, AppError> {
        if self.hidden().contains(id) {
            return Err(AppError::NotFound(format!("item {id:?} is pending deletion")));
        }
        position_of(&self.items, id)
    }
}

pub struct OptimisticStore<T: Identified> {
    inner: Mutex<StoreInner<T>>,
    callbacks: OptimisticCallbacks<T>,
    ordering: Option<fn(&T, &T) -> Ordering>,
    items_tx: watch::Sender<Vec<T>>,
}

impl<T> OptimisticStore<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    pub fn new(items: Vec<T>) -> Self {
        Self::with_callbacks(items, OptimisticCallbacks::default())
    }

    pub fn with_callbacks(items: Vec<T>, callbacks: OptimisticCallbacks<T>) -> Self {
        let (items_tx, _unused_rx) = watch::channel(items.clone());
        Self {
            inner: Mutex::new(StoreInner {
                items,
                pending: HashMap::new(),
                order: Vec::new(),
            }),
            callbacks,
            ordering: None,
            items_tx,
        }
    }

    /// Published views are sorted with `ordering`; storage keeps insertion order.
    pub fn with_ordering(mut self, ordering: fn(&T, &T) -> Ordering) -> Self {
        self.ordering = Some(ordering);
        self.publish(&self.lock());
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &StoreInner<T>) {
        let mut view = inner.visible();
        if let Some(ordering) = self.ordering {
            view.sort_by(ordering);
        }
        self.items_tx.send_replace(view);
    }

    pub fn items(&self) -> Vec<T> {
        self.items_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.items_tx.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_pending(&self, action_id: &ActionId) -> bool {
        self.lock().pending.contains_key(action_id)
    }

    pub fn apply_optimistic(&self, action: PendingAction<T>) -> Result<ActionId, AppError> {
        let mut inner = self.lock();
        if inner.pending.contains_key(&action.id) {
            return Err(AppError::Internal(format!(
                "optimistic action {} already pending",
                action.id
            )));
        }

        let position = apply_mutation(&mut inner, &action.mutation)?;
        let action_id = action.id;
        debug!(action_id = %action_id, kind = ?action.kind(), "optimistic action applied");
        inner.order.push(action_id);
        inner.pending.insert(action_id, PendingRecord { action, position });
        self.publish(&inner);
        Ok(action_id)
    }

    pub fn confirm(&self, action_id: &ActionId) -> Result<PendingAction<T>, AppError> {
        let record = {
            let mut inner = self.lock();
            let record = take_pending(&mut inner, action_id)?;
            if let Mutation::Delete { original } = &record.action.mutation {
                let id = original.id();
                if let Some(index) = inner.items.iter().position(|item| item.id() == id) {
                    inner.items.remove(index);
                }
            }
            self.publish(&inner);
            record
        };

        debug!(action_id = %action_id, "optimistic action confirmed");
        if let Some(hook) = &self.callbacks.on_success {
            hook(&record.action);
        }
        Ok(record.action)
    }

    pub fn revert(
        &self,
        action_id: &ActionId,
        error: &AppError,
    ) -> Result<PendingAction<T>, AppError> {
        let record = {
            let mut inner = self.lock();
            let record = take_pending(&mut inner, action_id)?;
            undo_mutation(&mut inner.items, &record);
            self.publish(&inner);
            record
        };

        warn!(action_id = %action_id, error = %error, "optimistic action reverted");
        if let Some(hook) = &self.callbacks.on_error {
            hook(&record.action, error);
        }
        if let Some(hook) = &self.callbacks.on_revert {
            hook(&record.action);
        }
        Ok(record.action)
    }

    /// Apply, run the server call, then confirm or revert. The collection never
    /// stays in the optimistic state once this returns, and a dropped future
    /// reverts as well.
    pub async fn execute_with_optimism<F, Fut, R>(
        &self,
        action: PendingAction<T>,
        server_call: F,
    ) -> Result<R, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, AppError>>,
    {
        let action_id = self.apply_optimistic(action)?;
        let mut guard = SettleGuard {
            store: self,
            action_id,
            armed: true,
        };

        let result = server_call().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.confirm(&action_id)?;
                Ok(value)
            }
            Err(err) => {
                self.revert(&action_id, &err)?;
                Err(err)
            }
        }
    }

    /// Swaps the item with id `id` for `item` outside any pending action, e.g.
    /// to replace a confirmed optimistic entry with the server's copy.
    /// A copy already present under the new id (from a refresh that landed
    /// first) is dropped so the item never shows twice.
    pub fn replace(&self, id: &T::Id, item: T) -> bool {
        let mut inner = self.lock();
        let new_id = item.id();
        if new_id != *id {
            inner.items.retain(|existing| existing.id() != new_id);
        }
        let replaced = match inner.items.iter().position(|existing| existing.id() == *id) {
            Some(index) => {
                inner.items[index] = item;
                true
            }
            None => false,
        };
        if replaced {
            self.publish(&inner);
        }
        replaced
    }

    /// Wholesale replacement with fresh server state. Pending actions are
    /// re-applied on top so in-flight edits stay visible until they settle.
    pub fn replace_all(&self, items: Vec<T>) {
        let mut inner = self.lock();
        inner.items = items;

        let order = inner.order.clone();
        for action_id in order {
            let Some(mutation) = inner
                .pending
                .get(&action_id)
                .map(|record| record.action.mutation.clone())
            else {
                continue;
            };

            let target = match &mutation {
                Mutation::Create(data) => data.id(),
                Mutation::Update { data, .. } => data.id(),
                Mutation::Delete { original } => original.id(),
            };
            let existing = inner.items.iter().position(|item| item.id() == target);

            // Deletes need no work here: the item stays hidden while pending.
            let position = match (&mutation, existing) {
                (Mutation::Create(_), Some(_)) => None,
                (Mutation::Create(data), None) => {
                    inner.items.push(data.clone());
                    None
                }
                (Mutation::Update { data, .. }, Some(index)) => {
                    inner.items[index] = data.clone();
                    Some(index)
                }
                (Mutation::Delete { .. }, Some(index)) => Some(index),
                (_, None) => None,
            };

            if let Some(record) = inner.pending.get_mut(&action_id) {
                record.position = position;
            }
        }

        self.publish(&inner);
    }
}

struct SettleGuard<'a, T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    store: &'a OptimisticStore<T>,
    action_id: ActionId,
    armed: bool,
}

impl<T> Drop for SettleGuard<'_, T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            let err = AppError::Internal("optimistic action abandoned before settling".to_string());
            let _ = self.store.revert(&self.action_id, &err);
        }
    }
}

fn take_pending<T>(
    inner: &mut StoreInner<T>,
    action_id: &ActionId,
) -> Result<PendingRecord<T>, AppError> {
    let record = inner
        .pending
        .remove(action_id)
        .ok_or_else(|| AppError::NotFound(format!("optimistic action {action_id} not pending")))?;
    inner.order.retain(|id| id != action_id);
    Ok(record)
}

fn apply_mutation<T>(
    inner: &mut StoreInner<T>,
    mutation: &Mutation<T>,
) -> Result<Option<usize>, AppError>
where
    T: Identified + Clone,
{
    match mutation {
        Mutation::Create(data) => {
            inner.items.push(data.clone());
            Ok(None)
        }
        Mutation::Update { data, .. } => {
            let index = inner.visible_position(&data.id())?;
            inner.items[index] = data.clone();
            Ok(Some(index))
        }
        Mutation::Delete { original } => inner.visible_position(&original.id()).map(Some),
    }
}

fn undo_mutation<T>(items: &mut Vec<T>, record: &PendingRecord<T>)
where
    T: Identified + Clone,
{
    match &record.action.mutation {
        Mutation::Create(data) => {
            let id = data.id();
            if let Some(index) = items.iter().rposition(|item| item.id() == id) {
                items.remove(index);
            }
        }
        Mutation::Update { original, .. } => {
            let id = original.id();
            match items.iter().position(|item| item.id() == id) {
                Some(index) => items[index] = original.clone(),
                None => reinsert(items, record.position, original.clone()),
            }
        }
        Mutation::Delete { original } => {
            let id = original.id();
            if !items.iter().any(|item| item.id() == id) {
                reinsert(items, record.position, original.clone());
            }
        }
    }
}

fn reinsert<T>(items: &mut Vec<T>, position: Option<usize>, item: T) {
    let index = position.unwrap_or(items.len()).min(items.len());
    items.insert(index, item);
}

fn position_of<T: Identified>(items: &[T], id: &T::Id) -> Result<usize, AppError> {
    items
        .iter()
        .position(|item| item.id() == *id)
        .ok_or_else(|| AppError::NotFound(format!("item {id:?} not in collection")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Favorite {
        id: u32,
        label: String,
    }

    impl Identified for Favorite {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    fn fav(id: u32, label: &str) -> Favorite {
        Favorite {
            id,
            label: label.to_string(),
        }
    }

    fn seeded() -> OptimisticStore<Favorite> {
        OptimisticStore::new(vec![fav(1, "kottu"), fav(2, "hoppers"), fav(3, "lamprais")])
    }

    #[test]
    fn create_then_revert_restores_exactly() {
        let store = seeded();
        let before = store.items();

        let id = store.apply_optimistic(PendingAction::create(fav(4, "pittu"))).unwrap();
        assert_eq!(store.items().len(), 4);

        store
            .revert(&id, &AppError::Transient("offline".into()))
            .unwrap();
        assert_eq!(store.items(), before);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn replace_drops_copy_already_present_under_new_id() {
        let store = seeded();
        store.replace_all(vec![fav(1, "kottu"), fav(9, "pittu (server)")]);
        store.replace_all({
            let mut items = store.items();
            items.push(fav(4, "pittu"));
            items
        });

        assert!(store.replace(&4, fav(9, "pittu (server)")));
        assert_eq!(store.items(), vec![fav(1, "kottu"), fav(9, "pittu (server)")]);
        assert!(!store.replace(&42, fav(43, "ghost")));
    }

    #[test]
    fn delete_then_revert_reinserts_in_place() {
        let store = seeded();
        let before = store.items();

        let id = store
            .apply_optimistic(PendingAction::delete(fav(2, "hoppers")))
            .unwrap();
        assert_eq!(store.items().len(), 2);

        store.revert(&id, &AppError::Transient("500".into())).unwrap();
        assert_eq!(store.items(), before);
    }

    #[test]
    fn stacked_deletes_revert_in_any_order() {
        let store = seeded();
        let before = store.items();

        let first = store
            .apply_optimistic(PendingAction::delete(fav(1, "kottu")))
            .unwrap();
        let last = store
            .apply_optimistic(PendingAction::delete(fav(3, "lamprais")))
            .unwrap();
        assert_eq!(store.items(), vec![fav(2, "hoppers")]);

        store.revert(&first, &AppError::Transient("503".into())).unwrap();
        store.revert(&last, &AppError::Transient("503".into())).unwrap();
        assert_eq!(store.items(), before);

        let a = store.apply_optimistic(PendingAction::delete(fav(1, "kottu"))).unwrap();
        let b = store.apply_optimistic(PendingAction::delete(fav(2, "hoppers"))).unwrap();
        let c = store.apply_optimistic(PendingAction::delete(fav(3, "lamprais"))).unwrap();
        assert!(store.items().is_empty());

        for id in [b, c, a] {
            store.revert(&id, &AppError::Transient("503".into())).unwrap();
        }
        assert_eq!(store.items(), before);
    }

    #[test]
    fn confirmed_delete_removes_item_and_rejects_further_edits_while_pending() {
        let store = seeded();
        let id = store
            .apply_optimistic(PendingAction::delete(fav(2, "hoppers")))
            .unwrap();

        let edit = store.apply_optimistic(PendingAction::update(fav(2, "x"), fav(2, "hoppers")));
        assert!(matches!(edit, Err(AppError::NotFound(_))));

        store.confirm(&id).unwrap();
        assert_eq!(store.items(), vec![fav(1, "kottu"), fav(3, "lamprais")]);
        store.replace_all(store.items());
        assert_eq!(store.items(), vec![fav(1, "kottu"), fav(3, "lamprais")]);
    }

    #[test]
    fn update_then_confirm_keeps_new_value() {
        let store = seeded();
        let id = store
            .apply_optimistic(PendingAction::update(fav(3, "lamprais x2"), fav(3, "lamprais")))
            .unwrap();
        store.confirm(&id).unwrap();

        assert_eq!(store.items()[2], fav(3, "lamprais x2"));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn update_of_missing_item_is_rejected_without_side_effects() {
        let store = seeded();
        let before = store.items();
        let result = store.apply_optimistic(PendingAction::update(fav(9, "x"), fav(9, "y")));
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.items(), before);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn stacked_actions_on_different_items_settle_independently() {
        let store = seeded();
        let a = store.apply_optimistic(PendingAction::create(fav(4, "pittu"))).unwrap();
        let b = store
            .apply_optimistic(PendingAction::delete(fav(1, "kottu")))
            .unwrap();

        store.revert(&b, &AppError::Rejected("no".into())).unwrap();
        store.confirm(&a).unwrap();

        assert_eq!(
            store.items(),
            vec![fav(1, "kottu"), fav(2, "hoppers"), fav(3, "lamprais"), fav(4, "pittu")]
        );
    }

    #[test]
    fn confirming_unknown_action_fails() {
        let store = seeded();
        assert!(store.confirm(&Uuid::new_v4()).is_err());
    }

    #[test]
    fn replace_all_keeps_pending_edits_visible() {
        let store = seeded();
        store.apply_optimistic(PendingAction::create(fav(4, "pittu"))).unwrap();
        store
            .apply_optimistic(PendingAction::delete(fav(1, "kottu")))
            .unwrap();

        store.replace_all(vec![fav(1, "kottu"), fav(2, "hoppers v2")]);

        assert_eq!(store.items(), vec![fav(2, "hoppers v2"), fav(4, "pittu")]);
        assert_eq!(store.pending_count(), 2);
    }

    #[tokio::test]
    async fn execute_success_confirms_and_fires_callback() {
        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();
        let store = OptimisticStore::with_callbacks(
            vec![fav(1, "kottu")],
            OptimisticCallbacks::default().on_success(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        let value = store
            .execute_with_optimism(PendingAction::create(fav(2, "hoppers")), || async {
                Ok::<_, AppError>("saved")
            })
            .await
            .unwrap();

        assert_eq!(value, "saved");
        assert_eq!(store.items(), vec![fav(1, "kottu"), fav(2, "hoppers")]);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(successes.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_failure_reverts_and_fires_error_hooks() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let (on_error, on_revert) = (hooks.clone(), hooks.clone());
        let store = OptimisticStore::with_callbacks(
            vec![fav(1, "kottu"), fav(2, "hoppers")],
            OptimisticCallbacks::default()
                .on_error(move |_, _| {
                    on_error.fetch_add(1, AtomicOrdering::SeqCst);
                })
                .on_revert(move |_| {
                    on_revert.fetch_add(10, AtomicOrdering::SeqCst);
                }),
        );
        let before = store.items();

        let result: Result<(), AppError> = store
            .execute_with_optimism(
                PendingAction::update(fav(1, "kottu xl"), fav(1, "kottu")),
                || async { Err(AppError::Transient("timeout".into())) },
            )
            .await;

        assert!(matches!(result, Err(AppError::Transient(_))));
        assert_eq!(store.items(), before);
        assert_eq!(hooks.load(AtomicOrdering::SeqCst), 11);
    }

    #[tokio::test]
    async fn abandoned_execution_reverts_on_drop() {
        let store = seeded();
        let before = store.items();

        {
            let call = store.execute_with_optimism(PendingAction::create(fav(5, "x")), || {
                futures::future::pending::<Result<(), AppError>>()
            });
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), call).await;
        }

        assert_eq!(store.items(), before);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn published_view_is_sorted_when_ordering_is_set() {
        let store = OptimisticStore::new(vec![fav(3, "c"), fav(1, "a")])
            .with_ordering(|a, b| a.id.cmp(&b.id));
        assert_eq!(store.items(), vec![fav(1, "a"), fav(3, "c")]);
    }
}

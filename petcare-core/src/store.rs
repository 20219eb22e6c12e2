//! ScheduleStore: the in-memory, per-pet authoritative cache of schedule items.
//!
//! Design:
//! - One store per [`ScheduleKind`], built once by the application root and
//!   shared by handle (`Arc<ScheduleStore>`).
//! - Each pet owns a slot behind its own mutex, so read-modify-write on one
//!   pet is serialized while different pets never contend.
//! - Slots load lazily from the mirror on first touch. Every mutation is
//!   written to the mirror before it becomes visible in memory; a failed write
//!   leaves the previous list in place.
//! - Lists are always sorted by `next_due_time` ascending, ties by
//!   `assignment_id`.
//! - Observers subscribe to a broadcast stream of [`StoreEvent`]s.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::item::{ScheduleItem, ScheduleKind};
use crate::mirror::ScheduleMirror;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Full replace, e.g. after a remote refresh.
    Replaced { count: usize },
    Upserted { assignment_id: String },
    Removed { assignment_ids: Vec<String> },
    /// Arbitrary atomic edit through [`ScheduleStore::modify`].
    Modified,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: ScheduleKind,
    pub pet_id: String,
    pub change: StoreChange,
}

/// `None` until the pet's list has been read from the mirror.
type Slot = Arc<Mutex<Option<Vec<ScheduleItem>>>>;

pub struct ScheduleStore {
    kind: ScheduleKind,
    mirror: Arc<dyn ScheduleMirror>,
    slots: Mutex<HashMap<String, Slot>>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleStore")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn sort_items(items: &mut [ScheduleItem]) {
    items.sort_by(|a, b| {
        a.next_due_time
            .cmp(&b.next_due_time)
            .then_with(|| a.assignment_id.cmp(&b.assignment_id))
    });
}

impl ScheduleStore {
    /// Store that loads each pet lazily from `mirror`.
    pub fn new(kind: ScheduleKind, mirror: Arc<dyn ScheduleMirror>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kind,
            mirror,
            slots: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Store with every pet the mirror knows about already loaded.
    pub fn open(kind: ScheduleKind, mirror: Arc<dyn ScheduleMirror>) -> Result<Self> {
        let store = Self::new(kind, mirror);
        let pets = store.mirror.pets(kind)?;
        for pet in &pets {
            store.with_slot(pet, |_| ())?;
        }
        tracing::debug!(%kind, pets = pets.len(), "schedule store opened");
        Ok(store)
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Items for a pet, sorted by next due time. Empty if none are cached.
    pub fn get(&self, pet_id: &str) -> Result<Vec<ScheduleItem>> {
        self.with_slot(pet_id, |items| items.clone())
    }

    pub fn find(&self, pet_id: &str, assignment_id: &str) -> Result<Option<ScheduleItem>> {
        self.with_slot(pet_id, |items| {
            items
                .iter()
                .find(|i| i.assignment_id == assignment_id)
                .cloned()
        })
    }

    /// Items whose next due time is at or before `cutoff`.
    pub fn due_before(&self, pet_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<ScheduleItem>> {
        self.with_slot(pet_id, |items| {
            items
                .iter()
                .take_while(|i| i.next_due_time <= cutoff)
                .cloned()
                .collect()
        })
    }

    /// Replace the whole list. Never merges with what was cached before.
    pub fn replace_all(&self, pet_id: &str, items: Vec<ScheduleItem>) -> Result<()> {
        let count = items.len();
        self.commit(pet_id, StoreChange::Replaced { count }, move |list| {
            *list = items;
        })
    }

    /// Insert, or replace the item with the same `assignment_id`.
    pub fn upsert(&self, pet_id: &str, item: ScheduleItem) -> Result<()> {
        let assignment_id = item.assignment_id.clone();
        self.commit(pet_id, StoreChange::Upserted { assignment_id }, move |list| {
            match list
                .iter_mut()
                .find(|i| i.assignment_id == item.assignment_id)
            {
                Some(slot) => *slot = item,
                None => list.push(item),
            }
        })
    }

    /// Local removal only; remote deletion is the caller's business.
    ///
    /// An unknown id is a no-op: nothing is written and no event is sent.
    pub fn remove(&self, pet_id: &str, assignment_id: &str) -> Result<Option<ScheduleItem>> {
        let hit = self.with_slot(pet_id, |items| items.iter().any(|i| i.assignment_id == assignment_id))?;
        if !hit {
            return Ok(None);
        }
        let mut removed = None;
        let change = StoreChange::Removed {
            assignment_ids: vec![assignment_id.to_string()],
        };
        self.commit(pet_id, change, |list| {
            if let Some(pos) = list.iter().position(|i| i.assignment_id == assignment_id) {
                removed = Some(list.remove(pos));
            }
        })?;
        Ok(removed)
    }

    /// Remove every assignment of a definition, across all known pets.
    pub fn remove_entity(&self, entity_id: &str) -> Result<Vec<ScheduleItem>> {
        let mut removed = Vec::new();
        for pet in self.pets()? {
            let hit = self.with_slot(&pet, |items| items.iter().any(|i| i.entity_id == entity_id))?;
            if !hit {
                continue;
            }
            let mut taken = Vec::new();
            let ids = self.modify_with(&pet, |list| {
                let (gone, keep): (Vec<_>, Vec<_>) =
                    list.drain(..).partition(|i| i.entity_id == entity_id);
                *list = keep;
                taken = gone;
                taken.iter().map(|i| i.assignment_id.clone()).collect::<Vec<_>>()
            })?;
            self.emit(&pet, StoreChange::Removed { assignment_ids: ids });
            removed.extend(taken);
        }
        Ok(removed)
    }

    /// Atomic read-modify-write of one pet's list. The list is re-sorted and
    /// mirrored afterwards.
    ///
    /// `f` runs with the pet's slot locked. It must not call back into the
    /// store; doing so deadlocks.
    pub fn modify<R>(&self, pet_id: &str, f: impl FnOnce(&mut Vec<ScheduleItem>) -> R) -> Result<R> {
        let out = self.modify_with(pet_id, f)?;
        self.emit(pet_id, StoreChange::Modified);
        Ok(out)
    }

    /// Drop a pet's list from memory and from the mirror.
    pub fn clear(&self, pet_id: &str) -> Result<()> {
        let slot = self.slot(pet_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.mirror.remove(self.kind, pet_id)?;
        *guard = Some(Vec::new());
        drop(guard);
        self.emit(pet_id, StoreChange::Cleared);
        Ok(())
    }

    /// Every pet with a cached or persisted list.
    pub fn pets(&self) -> Result<Vec<String>> {
        let mut pets: BTreeSet<String> = self.mirror.pets(self.kind)?.into_iter().collect();
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for (pet, slot) in slots.iter() {
            let loaded = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if loaded.as_ref().is_some_and(|items| !items.is_empty()) {
                pets.insert(pet.clone());
            }
        }
        Ok(pets.into_iter().collect())
    }

    /// Flush loaded lists to the mirror and drop the in-memory cache.
    ///
    /// The store stays usable; pets reload lazily afterwards.
    pub fn dispose(&self) -> Result<()> {
        let drained: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.drain().collect()
        };
        for (pet, slot) in drained {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(items) = guard.take() {
                self.mirror.save(self.kind, &pet, &items)?;
            }
        }
        tracing::debug!(kind = %self.kind, "schedule store disposed");
        Ok(())
    }

    fn slot(&self, pet_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(pet_id.to_string()).or_default().clone()
    }

    fn with_slot<R>(&self, pet_id: &str, f: impl FnOnce(&Vec<ScheduleItem>) -> R) -> Result<R> {
        let slot = self.slot(pet_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let items = self.loaded(pet_id, &mut guard)?;
        Ok(f(items))
    }

    fn loaded<'a>(
        &self,
        pet_id: &str,
        guard: &'a mut Option<Vec<ScheduleItem>>,
    ) -> Result<&'a mut Vec<ScheduleItem>> {
        if guard.is_none() {
            let mut items = self.mirror.load(self.kind, pet_id)?;
            sort_items(&mut items);
            *guard = Some(items);
        }
        Ok(guard.get_or_insert_with(Vec::new))
    }

    fn modify_with<R>(&self, pet_id: &str, f: impl FnOnce(&mut Vec<ScheduleItem>) -> R) -> Result<R> {
        let slot = self.slot(pet_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.loaded(pet_id, &mut guard)?;

        let mut next = current.clone();
        let out = f(&mut next);
        sort_items(&mut next);

        self.mirror.save(self.kind, pet_id, &next)?;
        *current = next;
        Ok(out)
    }

    fn commit(
        &self,
        pet_id: &str,
        change: StoreChange,
        f: impl FnOnce(&mut Vec<ScheduleItem>),
    ) -> Result<()> {
        self.modify_with(pet_id, f)?;
        tracing::debug!(kind = %self.kind, pet_id, ?change, "schedule store updated");
        self.emit(pet_id, change);
        Ok(())
    }

    fn emit(&self, pet_id: &str, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.events.send(StoreEvent {
            kind: self.kind,
            pet_id: pet_id.to_string(),
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScheduleError;
    use crate::interval::Interval;
    use crate::mirror::{JsonDirMirror, MemoryMirror};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn item(id: &str, pet: &str, due_in_hours: i64) -> ScheduleItem {
        let mut it = ScheduleItem::scheduled(id, format!("r-{id}"), pet, "u1", Interval::days(1).unwrap(), now(), now());
        it.next_due_time = now() + Duration::hours(due_in_hours);
        it
    }

    fn store() -> ScheduleStore {
        ScheduleStore::new(ScheduleKind::Routine, Arc::new(MemoryMirror::new()))
    }

    #[test]
    fn unknown_pet_is_empty() {
        assert!(store().get("nobody").unwrap().is_empty());
    }

    #[test]
    fn upsert_inserts_then_replaces_and_keeps_order() {
        let s = store();
        s.upsert("rex", item("a", "rex", 10)).unwrap();
        s.upsert("rex", item("b", "rex", 5)).unwrap();
        s.upsert("rex", item("c", "rex", 7)).unwrap();

        let ids: Vec<_> = s.get("rex").unwrap().into_iter().map(|i| i.assignment_id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let mut moved = item("b", "rex", 20);
        moved.name = Some("walk".to_string());
        s.upsert("rex", moved.clone()).unwrap();

        let list = s.get("rex").unwrap();
        assert_eq!(list.iter().filter(|i| i.assignment_id == "b").count(), 1);
        assert_eq!(list.last().unwrap(), &moved);
        assert!(list.windows(2).all(|w| w[0].next_due_time <= w[1].next_due_time));
    }

    #[test]
    fn replace_all_does_not_merge() {
        let s = store();
        s.upsert("rex", item("old", "rex", 1)).unwrap();
        s.replace_all("rex", vec![item("n2", "rex", 9), item("n1", "rex", 3)]).unwrap();

        let ids: Vec<_> = s.get("rex").unwrap().into_iter().map(|i| i.assignment_id).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn remove_is_local_and_per_pet() {
        let s = store();
        s.upsert("rex", item("a", "rex", 1)).unwrap();
        s.upsert("fido", item("a", "fido", 1)).unwrap();

        assert!(s.remove("rex", "a").unwrap().is_some());
        assert!(s.remove("rex", "a").unwrap().is_none());
        assert!(s.get("rex").unwrap().is_empty());
        assert_eq!(s.get("fido").unwrap().len(), 1);
    }

    #[test]
    fn remove_entity_spans_pets() {
        let s = store();
        let mut a = item("a", "rex", 1);
        a.entity_id = "walk".to_string();
        let mut b = item("b", "fido", 2);
        b.entity_id = "walk".to_string();
        s.upsert("rex", a).unwrap();
        s.upsert("fido", b).unwrap();
        s.upsert("fido", item("c", "fido", 3)).unwrap();

        let removed = s.remove_entity("walk").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(s.get("rex").unwrap().is_empty());
        assert_eq!(s.get("fido").unwrap().len(), 1);
    }

    #[test]
    fn reopening_over_the_same_mirror_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let mirror: Arc<dyn ScheduleMirror> = Arc::new(JsonDirMirror::new(dir.path()));

        let s = ScheduleStore::new(ScheduleKind::Medication, mirror.clone());
        s.upsert("rex", item("a", "rex", 4)).unwrap();
        s.upsert("rex", item("b", "rex", 2)).unwrap();
        let before = s.get("rex").unwrap();
        drop(s);

        let reopened = ScheduleStore::open(ScheduleKind::Medication, mirror).unwrap();
        assert_eq!(reopened.get("rex").unwrap(), before);
        assert_eq!(reopened.pets().unwrap(), vec!["rex".to_string()]);
    }

    #[test]
    fn clear_drops_memory_and_mirror() {
        let mirror = Arc::new(MemoryMirror::new());
        let s = ScheduleStore::new(ScheduleKind::Routine, mirror.clone());
        s.upsert("rex", item("a", "rex", 1)).unwrap();
        s.clear("rex").unwrap();
        assert!(s.get("rex").unwrap().is_empty());
        assert!(mirror.load(ScheduleKind::Routine, "rex").unwrap().is_empty());
    }

    #[test]
    fn dispose_flushes_and_reloads_lazily() {
        let mirror = Arc::new(MemoryMirror::new());
        let s = ScheduleStore::new(ScheduleKind::Routine, mirror.clone());
        s.upsert("rex", item("a", "rex", 1)).unwrap();
        s.dispose().unwrap();
        assert_eq!(s.get("rex").unwrap().len(), 1);
    }

    #[test]
    fn due_before_takes_the_sorted_prefix() {
        let s = store();
        s.upsert("rex", item("a", "rex", -2)).unwrap();
        s.upsert("rex", item("b", "rex", 1)).unwrap();
        s.upsert("rex", item("c", "rex", 48)).unwrap();
        let due: Vec<_> = s
            .due_before("rex", now() + Duration::hours(1))
            .unwrap()
            .into_iter()
            .map(|i| i.assignment_id)
            .collect();
        assert_eq!(due, vec!["a", "b"]);
    }

    struct FailingMirror;

    impl ScheduleMirror for FailingMirror {
        fn load(&self, _: ScheduleKind, _: &str) -> Result<Vec<ScheduleItem>> {
            Ok(Vec::new())
        }
        fn save(&self, _: ScheduleKind, pet_id: &str, _: &[ScheduleItem]) -> Result<()> {
            Err(ScheduleError::Mirror {
                path: pet_id.into(),
                message: "disk full".to_string(),
            })
        }
        fn remove(&self, _: ScheduleKind, _: &str) -> Result<()> {
            Ok(())
        }
        fn pets(&self, _: ScheduleKind) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_mirror_write_keeps_previous_list() {
        let s = ScheduleStore::new(ScheduleKind::Routine, Arc::new(FailingMirror));
        assert!(s.upsert("rex", item("a", "rex", 1)).is_err());
        assert!(s.get("rex").unwrap().is_empty());
    }

    #[test]
    fn removing_an_unknown_id_writes_nothing() {
        let s = ScheduleStore::new(ScheduleKind::Routine, Arc::new(FailingMirror));
        let mut rx = s.subscribe();

        assert!(s.remove("rex", "ghost").unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribers_see_mutations() {
        let s = store();
        let mut rx = s.subscribe();
        s.upsert("rex", item("a", "rex", 1)).unwrap();
        s.remove("rex", "a").unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.pet_id, "rex");
        assert_eq!(first.change, StoreChange::Upserted { assignment_id: "a".to_string() });
        assert!(matches!(rx.try_recv().unwrap().change, StoreChange::Removed { .. }));
    }

    #[test]
    fn different_pets_mutate_in_parallel() {
        let s = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let s = s.clone();
                std::thread::spawn(move || {
                    let pet = format!("pet-{}", n % 2);
                    for i in 0..25 {
                        s.upsert(&pet, item(&format!("{n}-{i}"), &pet, i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.get("pet-0").unwrap().len(), 100);
        assert_eq!(s.get("pet-1").unwrap().len(), 100);
    }
}

//! RemoteSync: keeps a [`ScheduleStore`] consistent with the remote sheet.
//!
//! Protocol:
//! - refresh: full replace from the server; on failure the cache is left as is.
//! - create: optional provisional items first, then the server's answer
//!   replaces them. The server always wins.
//! - delete: local removal only after the server confirms.
//! - perform: remote perform, then a best-effort refresh.
//!
//! Every network round-trip plus the store update that follows it runs as a
//! detached tokio task. A caller that stops awaiting does not cancel it; the
//! result still lands in the store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use petcare_core::{
    ReschedulePolicy, ScheduleItem, ScheduleKind, ScheduleStore, compute_overdue_reschedule,
    overdue_perform_time, parse_wire_timestamp,
};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::remote::ScheduleRemote;
use crate::wire::{NewSchedule, PerformRequest};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Prefix of locally synthesized assignment ids.
pub const PROVISIONAL_PREFIX: &str = "pending-";

#[derive(Clone)]
pub struct SyncOptions {
    /// Zone for naive wire timestamps and "YYYY-MM-DD HH:mm" create fields.
    pub timezone: Tz,
    /// Upsert provisional items before the server answers.
    pub optimistic: bool,
    pub clock: Clock,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            optimistic: true,
            clock: Arc::new(Utc::now),
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("timezone", &self.timezone)
            .field("optimistic", &self.optimistic)
            .finish_non_exhaustive()
    }
}

impl SyncOptions {
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }

    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

/// Result of a perform round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformOutcome {
    pub last_performed_at: Option<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
    /// Whether the follow-up refresh succeeded.
    pub refreshed: bool,
}

#[derive(Clone)]
pub struct RemoteSync {
    store: Arc<ScheduleStore>,
    remote: Arc<dyn ScheduleRemote>,
    options: SyncOptions,
}

impl std::fmt::Debug for RemoteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSync")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Run a sync step on its own task so dropping the caller's future cannot
/// leave the server and the store disagreeing.
async fn detached<T, F>(fut: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| SyncError::Aborted(e.to_string()))?
}

impl RemoteSync {
    pub fn new(store: Arc<ScheduleStore>, remote: Arc<dyn ScheduleRemote>, options: SyncOptions) -> Self {
        Self {
            store,
            remote,
            options,
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        self.store.kind()
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.options.clock)()
    }

    /// Replace the pet's cached list with the server's.
    pub async fn refresh(&self, pet_id: &str) -> Result<Vec<ScheduleItem>> {
        let this = self.clone();
        let pet = pet_id.to_string();
        detached(async move { this.refresh_now(&pet).await }).await
    }

    async fn refresh_now(&self, pet_id: &str) -> Result<Vec<ScheduleItem>> {
        let kind = self.kind();
        let rows = match self.remote.list(kind, pet_id).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(%kind, pet_id, error = %e, "refresh failed; keeping cached list");
                return Err(e);
            }
        };

        let now = self.now();
        let total = rows.len();
        let items: Vec<ScheduleItem> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.assignment_id.clone();
                match row.into_item(None, self.options.timezone, now) {
                    Ok(mut item) => {
                        if item.pet_id.is_empty() {
                            item.pet_id = pet_id.to_string();
                        }
                        Some(item)
                    }
                    Err(e) => {
                        tracing::warn!(%kind, pet_id, assignment_id = %id, error = %e, "dropping unusable row");
                        None
                    }
                }
            })
            .collect();

        self.store.replace_all(pet_id, items)?;
        let cached = self.store.get(pet_id)?;
        tracing::info!(%kind, pet_id, rows = total, kept = cached.len(), "refreshed");
        Ok(cached)
    }

    /// Create one definition and one assignment per pet.
    ///
    /// With `optimistic` on, provisional items appear in the store right away
    /// and are swapped for the server's items when it answers, or removed if
    /// the create fails. Returns the confirmed items.
    pub async fn create_and_assign(
        &self,
        schedule: NewSchedule,
        pet_ids: &BTreeSet<String>,
    ) -> Result<Vec<ScheduleItem>> {
        if schedule.name.trim().is_empty() {
            return Err(SyncError::InvalidRequest("name must not be empty".to_string()));
        }
        if pet_ids.iter().any(|p| p.trim().is_empty()) {
            return Err(SyncError::InvalidRequest("pet ids must not be empty".to_string()));
        }

        let kind = self.kind();
        let now = self.now();
        let pets: Vec<String> = pet_ids.iter().cloned().collect();
        let body = schedule.to_json(kind, &pets, self.options.timezone);

        let mut provisional: Vec<(String, String)> = Vec::new();
        if self.options.optimistic {
            let owner = schedule.owner_id.clone().unwrap_or_default();
            for pet in &pets {
                let id = format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4());
                let item = ScheduleItem::scheduled(
                    id.clone(),
                    String::new(),
                    pet.clone(),
                    owner.clone(),
                    schedule.interval,
                    schedule.start,
                    now,
                )
                .with_name(schedule.name.clone())
                .provisional();
                self.store.upsert(pet, item)?;
                provisional.push((pet.clone(), id));
            }
        }

        let this = self.clone();
        detached(async move {
            let resp = match this.remote.create(kind, &body).await {
                Ok(resp) => resp,
                Err(e) => {
                    this.drop_provisional(&provisional)?;
                    return Err(e);
                }
            };

            let tz = this.options.timezone;
            let definition = resp.definition;
            let only_pet = match pets.as_slice() {
                [pet] => Some(pet.as_str()),
                _ => None,
            };
            let confirmed: Vec<ScheduleItem> = resp
                .assignments
                .into_iter()
                .filter_map(|row| {
                    let id = row.assignment_id.clone();
                    let mut item = match row.into_item(Some(&definition), tz, now) {
                        Ok(item) => item,
                        Err(e) => {
                            tracing::warn!(%kind, assignment_id = %id, error = %e, "dropping unusable created row");
                            return None;
                        }
                    };
                    if item.pet_id.is_empty() {
                        match only_pet {
                            Some(pet) => item.pet_id = pet.to_string(),
                            None => {
                                tracing::warn!(%kind, assignment_id = %id, "dropping created row without pet_id");
                                return None;
                            }
                        }
                    }
                    Some(item)
                })
                .collect();

            let mut by_pet: HashMap<String, (HashSet<String>, Vec<ScheduleItem>)> = HashMap::new();
            for (pet, id) in &provisional {
                by_pet.entry(pet.clone()).or_default().0.insert(id.clone());
            }
            for item in &confirmed {
                by_pet
                    .entry(item.pet_id.clone())
                    .or_default()
                    .1
                    .push(item.clone());
            }

            for (pet, (stale, fresh)) in by_pet {
                this.store.modify(&pet, |list| {
                    list.retain(|i| !stale.contains(&i.assignment_id));
                    for item in fresh {
                        match list.iter_mut().find(|i| i.assignment_id == item.assignment_id) {
                            Some(slot) => *slot = item,
                            None => list.push(item),
                        }
                    }
                })?;
            }

            tracing::info!(%kind, entity_id = %definition.id, assignments = confirmed.len(), "created");
            Ok(confirmed)
        })
        .await
    }

    fn drop_provisional(&self, provisional: &[(String, String)]) -> Result<()> {
        for (pet, id) in provisional {
            self.store.remove(pet, id)?;
        }
        Ok(())
    }

    /// Delete a definition remotely, then drop its assignments locally.
    ///
    /// Local items stay put unless the server confirms.
    pub async fn delete(&self, entity_id: &str) -> Result<Vec<ScheduleItem>> {
        let this = self.clone();
        let entity_id = entity_id.to_string();
        detached(async move {
            let kind = this.kind();
            let resp = this.remote.delete(kind, &entity_id).await?;
            if !resp.confirmed() {
                tracing::warn!(%kind, %entity_id, "delete not confirmed; keeping local items");
                return Err(SyncError::DeleteNotConfirmed { entity_id });
            }
            let removed = this.store.remove_entity(&entity_id)?;
            tracing::info!(%kind, %entity_id, removed = removed.len(), "deleted");
            Ok(removed)
        })
        .await
    }

    /// Record a perform remotely, then refresh the pet's list.
    ///
    /// A failed refresh is logged and reported through
    /// [`PerformOutcome::refreshed`]; the perform itself stands.
    pub async fn perform(
        &self,
        entity_id: &str,
        pet_id: &str,
        performed_at: DateTime<Utc>,
    ) -> Result<PerformOutcome> {
        let kind = self.kind();
        let previous = self
            .store
            .get(pet_id)?
            .into_iter()
            .find(|i| i.entity_id == entity_id);

        if self.options.optimistic {
            if let Some(prev) = &previous {
                let mut guess = prev.clone();
                guess.record_perform(performed_at);
                guess.provisional = true;
                self.store.upsert(pet_id, guess)?;
            }
        }

        let req = PerformRequest {
            entity_id: entity_id.to_string(),
            pet_id: pet_id.to_string(),
            performed_at,
        };
        let this = self.clone();
        detached(async move {
            let resp = match this.remote.perform(kind, &req).await {
                Ok(resp) => resp,
                Err(e) => {
                    if this.options.optimistic {
                        if let Some(prev) = previous {
                            this.store.upsert(&req.pet_id, prev)?;
                        }
                    }
                    return Err(e);
                }
            };

            let last = this
                .reply_timestamp("last_performed_at", &resp.last_performed_at)
                .or(Some(performed_at));
            let next = this.reply_timestamp("next_due", &resp.next_due);

            let refreshed = match this.refresh_now(&req.pet_id).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(%kind, pet_id = %req.pet_id, error = %e, "post-perform refresh failed");
                    if let (Some(prev), Some(next)) = (previous, next) {
                        let mut confirmed = prev;
                        confirmed.last_performed_time = last;
                        confirmed.next_due_time = next;
                        confirmed.provisional = false;
                        this.store.upsert(&req.pet_id, confirmed)?;
                    }
                    false
                }
            };

            Ok(PerformOutcome {
                last_performed_at: last,
                next_due: next,
                refreshed,
            })
        })
        .await
    }

    /// Perform an item that is past due, rescheduling per `policy`.
    ///
    /// `FromNow` performs at `now`. `FromOriginal` performs at the last slot
    /// of the original cadence that is not after `now`, so the server's
    /// one-interval advance lands on the next slot of that cadence; see
    /// [`overdue_perform_time`] for the month-end case where it cannot. An
    /// item that is not yet due is simply performed at `now`.
    pub async fn perform_overdue(
        &self,
        item: &ScheduleItem,
        policy: ReschedulePolicy,
        now: DateTime<Utc>,
    ) -> Result<PerformOutcome> {
        let (performed_at, lands_on) = overdue_perform_time(item.next_due_time, item.interval, now, policy);
        let target = compute_overdue_reschedule(item.next_due_time, item.interval, now, policy);
        if lands_on != target {
            tracing::warn!(
                kind = %self.kind(),
                assignment_id = %item.assignment_id,
                %target,
                %lands_on,
                "next due will differ from the original cadence"
            );
        }
        self.perform(&item.entity_id, &item.pet_id, performed_at).await
    }

    /// Timestamps in a perform reply are advisory; the refresh that follows
    /// is authoritative.
    fn reply_timestamp(&self, field: &str, raw: &str) -> Option<DateTime<Utc>> {
        parse_wire_timestamp(raw, self.options.timezone).unwrap_or_else(|e| {
            tracing::warn!(kind = %self.kind(), field, error = %e, "ignoring unreadable timestamp in perform reply");
            None
        })
    }
}

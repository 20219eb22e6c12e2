//! Schedule items: one routine or medication assignment for one pet.
//!
//! Routines and medications share every field the scheduler cares about;
//! [`ScheduleKind`] only changes wire names and where things are stored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::interval::Interval;
use crate::occurrence::{compute_after_perform, compute_next};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Routine,
    Medication,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 2] = [ScheduleKind::Routine, ScheduleKind::Medication];

    /// Plural path segment used by endpoints and the mirror directory.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Routine => "routines",
            Self::Medication => "medications",
        }
    }

    /// Wire name of the definition id on assignment rows.
    pub fn entity_id_field(&self) -> &'static str {
        match self {
            Self::Routine => "routine_id",
            Self::Medication => "medication_id",
        }
    }

    /// Wire name of the next-due column.
    pub fn next_due_field(&self) -> &'static str {
        match self {
            Self::Routine => "next_activity",
            Self::Medication => "next_dose",
        }
    }

    /// Wire name of the start field in create requests.
    pub fn create_start_field(&self) -> &'static str {
        match self {
            Self::Routine => "start_of_activity",
            Self::Medication => "start_of_supply",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routine => f.write_str("routine"),
            Self::Medication => f.write_str("medication"),
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "routine" | "routines" => Ok(Self::Routine),
            "medication" | "medications" => Ok(Self::Medication),
            other => Err(ScheduleError::InvalidKind(other.to_string())),
        }
    }
}

/// A routine or medication bound to one pet, with its own last/next times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Upsert key; stable once the server has assigned it.
    pub assignment_id: String,
    /// Id of the shared routine/medication definition.
    pub entity_id: String,
    pub pet_id: String,
    pub owner_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub interval: Interval,
    pub start_time: DateTime<Utc>,
    pub last_performed_time: Option<DateTime<Utc>>,
    pub next_due_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    /// Locally synthesized; a server-confirmed value must replace it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub provisional: bool,
}

impl ScheduleItem {
    /// Build an item from its declared start, computing last/next against `now`.
    pub fn scheduled(
        assignment_id: impl Into<String>,
        entity_id: impl Into<String>,
        pet_id: impl Into<String>,
        owner_id: impl Into<String>,
        interval: Interval,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let occ = compute_next(start_time, interval, now);
        Self {
            assignment_id: assignment_id.into(),
            entity_id: entity_id.into(),
            pet_id: pet_id.into(),
            owner_id: owner_id.into(),
            name: None,
            interval,
            start_time,
            last_performed_time: occ.effective_last,
            next_due_time: occ.next_due,
            created_at: now,
            provisional: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    /// Recompute last/next from the declared start.
    pub fn recompute(&mut self, now: DateTime<Utc>) {
        let occ = compute_next(self.start_time, self.interval, now);
        self.last_performed_time = occ.effective_last;
        self.next_due_time = occ.next_due;
    }

    /// Apply a perform event: last = `performed_at`, next = one interval later.
    pub fn record_perform(&mut self, performed_at: DateTime<Utc>) {
        self.last_performed_time = Some(performed_at);
        self.next_due_time = compute_after_perform(performed_at, self.interval);
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.next_due_time <= now
    }
}

//! Wire records exchanged with the sheet-backed functions.
//!
//! The sheet is loosely typed: ids and interval numbers arrive as strings or
//! numbers, unset timestamps as empty strings or nulls, and routines and
//! medications use different column names for the same things. Everything is
//! normalized here before it reaches the core.

use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use petcare_core::{
    Interval, ScheduleItem, ScheduleKind, compute_next, parse_interval, parse_wire_timestamp,
    to_local_minute, to_rfc3339_utc,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for NumberOrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Strings, numbers and nulls all read as text; null becomes "".
fn text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<NumberOrText>::deserialize(d)?
        .map(|v| v.to_string())
        .unwrap_or_default())
}

fn opt_text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<NumberOrText>::deserialize(d)?
        .map(|v| v.to_string())
        .filter(|s| !s.trim().is_empty()))
}

/// A shared routine/medication definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DefinitionRecord {
    #[serde(
        default,
        alias = "routine_id",
        alias = "medication_id",
        deserialize_with = "text"
    )]
    pub id: String,
    #[serde(default, deserialize_with = "opt_text")]
    pub name: Option<String>,
    #[serde(default, alias = "owner_id", deserialize_with = "text")]
    pub user_id: String,
    #[serde(
        default,
        alias = "start_of_activity",
        alias = "start_of_medication",
        alias = "start_of_supply",
        deserialize_with = "text"
    )]
    pub start: String,
    #[serde(default)]
    pub perform_every_number: Option<NumberOrText>,
    #[serde(default, deserialize_with = "opt_text")]
    pub perform_every_unit: Option<String>,
}

/// One pet's assignment row as returned by list and create endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssignmentRecord {
    #[serde(default, deserialize_with = "text")]
    pub assignment_id: String,
    #[serde(
        default,
        alias = "routine_id",
        alias = "medication_id",
        deserialize_with = "text"
    )]
    pub entity_id: String,
    #[serde(default, deserialize_with = "text")]
    pub pet_id: String,
    #[serde(default, alias = "owner_id", deserialize_with = "text")]
    pub user_id: String,
    #[serde(default, deserialize_with = "opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub last_performed_at: String,
    #[serde(
        default,
        alias = "next_activity",
        alias = "next_dose",
        deserialize_with = "text"
    )]
    pub next_due: String,
    #[serde(
        default,
        alias = "start_of_activity",
        alias = "start_of_medication",
        alias = "start_of_supply",
        deserialize_with = "text"
    )]
    pub start: String,
    #[serde(default)]
    pub perform_every_number: Option<NumberOrText>,
    #[serde(default, deserialize_with = "opt_text")]
    pub perform_every_unit: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub created_at: String,
}

impl AssignmentRecord {
    /// Normalize a row into a schedule item.
    ///
    /// Interval and start fall back to the definition when the row omits
    /// them. An empty next-due is computed from the start.
    pub fn into_item(
        self,
        definition: Option<&DefinitionRecord>,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<ScheduleItem> {
        if self.assignment_id.trim().is_empty() {
            return Err(SyncError::InvalidRecord("missing assignment_id".to_string()));
        }

        let number = self
            .perform_every_number
            .clone()
            .or_else(|| definition.and_then(|d| d.perform_every_number.clone()))
            .ok_or_else(|| {
                SyncError::InvalidInterval(format!(
                    "assignment {} has no perform_every_number",
                    self.assignment_id
                ))
            })?;
        let unit = self
            .perform_every_unit
            .clone()
            .or_else(|| definition.and_then(|d| d.perform_every_unit.clone()))
            .unwrap_or_default();
        let interval = parse_interval(number, &unit)?;

        let start_raw = if self.start.trim().is_empty() {
            definition.map(|d| d.start.as_str()).unwrap_or_default()
        } else {
            self.start.as_str()
        };
        let start = parse_wire_timestamp(start_raw, tz)?;
        let mut last = parse_wire_timestamp(&self.last_performed_at, tz)?;
        let next = parse_wire_timestamp(&self.next_due, tz)?;

        let next = match (next, start) {
            (Some(next), _) => next,
            (None, Some(start)) => {
                let occ = compute_next(start, interval, now);
                last = last.or(occ.effective_last);
                occ.next_due
            }
            (None, None) => {
                return Err(SyncError::InvalidRecord(format!(
                    "assignment {} has neither a next due time nor a start",
                    self.assignment_id
                )));
            }
        };

        let created_at = parse_wire_timestamp(&self.created_at, tz)?.unwrap_or(now);
        let entity_id = if self.entity_id.is_empty() {
            definition.map(|d| d.id.clone()).unwrap_or_default()
        } else {
            self.entity_id
        };
        let owner_id = if self.user_id.is_empty() {
            definition.map(|d| d.user_id.clone()).unwrap_or_default()
        } else {
            self.user_id
        };

        Ok(ScheduleItem {
            assignment_id: self.assignment_id,
            entity_id,
            pet_id: self.pet_id,
            owner_id,
            name: self.name.or_else(|| definition.and_then(|d| d.name.clone())),
            interval,
            start_time: start.or(last).unwrap_or(next),
            last_performed_time: last,
            next_due_time: next,
            created_at,
            provisional: false,
        })
    }
}

/// List bodies arrive either bare or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListBody {
    Rows(Vec<AssignmentRecord>),
    Wrapped {
        #[serde(alias = "data", alias = "routines", alias = "medications")]
        assignments: Vec<AssignmentRecord>,
    },
}

impl ListBody {
    pub fn into_rows(self) -> Vec<AssignmentRecord> {
        match self {
            Self::Rows(rows) | Self::Wrapped { assignments: rows } => rows,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    #[serde(alias = "routine", alias = "medication")]
    pub definition: DefinitionRecord,
    #[serde(default)]
    pub assignments: Vec<AssignmentRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerformResponse {
    #[serde(default, deserialize_with = "text")]
    pub assignment_id: String,
    #[serde(default, deserialize_with = "text")]
    pub last_performed_at: String,
    #[serde(
        default,
        alias = "next_activity",
        alias = "next_dose",
        deserialize_with = "text"
    )]
    pub next_due: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub deleted: Option<NumberOrText>,
}

impl DeleteResponse {
    /// A success response without the flag counts as confirmed.
    ///
    /// The flag may come back as a bool, 1/0 or a "true"/"false" cell. A
    /// blank cell reads as absent; any other value is not a confirmation.
    pub fn confirmed(&self) -> bool {
        match &self.deleted {
            None => true,
            Some(NumberOrText::Bool(b)) => *b,
            Some(NumberOrText::Int(n)) => *n != 0,
            Some(NumberOrText::Float(n)) => *n != 0.0,
            Some(NumberOrText::Text(s)) => {
                let s = s.trim();
                s.is_empty()
                    || s.eq_ignore_ascii_case("true")
                    || s.eq_ignore_ascii_case("yes")
                    || s == "1"
            }
        }
    }
}

/// A new routine/medication definition plus the pets it is assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub name: String,
    pub start: DateTime<Utc>,
    pub interval: Interval,
    pub owner_id: Option<String>,
}

impl NewSchedule {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, interval: Interval) -> Self {
        Self {
            name: name.into(),
            start,
            interval,
            owner_id: None,
        }
    }

    /// Build from raw form values. Fails locally, before any request.
    pub fn parse(
        name: &str,
        start_local: &str,
        amount_raw: &str,
        unit_raw: &str,
        tz: Tz,
    ) -> Result<Self> {
        let interval = parse_interval(amount_raw, unit_raw)?;
        let start = petcare_core::parse_local_to_utc(start_local, tz)?;
        Ok(Self::new(name.trim(), start, interval))
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn to_json(&self, kind: ScheduleKind, pets: &[String], tz: Tz) -> Value {
        let mut body = json!({
            "name": self.name,
            "perform_every_number": self.interval.amount(),
            "perform_every_unit": self.interval.unit().as_str(),
            "assign_to_pets": pets,
        });
        body[kind.create_start_field()] = Value::String(to_local_minute(self.start, tz));
        if let Some(owner) = &self.owner_id {
            body["user_id"] = Value::String(owner.clone());
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformRequest {
    pub entity_id: String,
    pub pet_id: String,
    pub performed_at: DateTime<Utc>,
}

impl PerformRequest {
    pub fn to_json(&self, kind: ScheduleKind) -> Value {
        let mut body = json!({
            "pet_id": self.pet_id,
            "performed_at": to_rfc3339_utc(self.performed_at),
        });
        body[kind.entity_id_field()] = Value::String(self.entity_id.clone());
        body
    }
}

pub fn delete_body(kind: ScheduleKind, entity_id: &str) -> Value {
    let mut body = json!({});
    body[kind.entity_id_field()] = Value::String(entity_id.to_string());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
    }

    #[test]
    fn row_with_empty_next_is_computed_from_start() {
        let row: AssignmentRecord = serde_json::from_value(json!({
            "assignment_id": 17,
            "routine_id": "r-9",
            "pet_id": "rex",
            "user_id": "u1",
            "last_performed_at": "",
            "next_activity": "",
            "start_of_activity": "2024-01-01 10:00",
            "perform_every_number": "2",
            "perform_every_unit": "Days"
        }))
        .unwrap();

        let item = row.into_item(None, chrono_tz::UTC, now()).unwrap();
        assert_eq!(item.assignment_id, "17");
        assert_eq!(item.entity_id, "r-9");
        assert_eq!(item.next_due_time, Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap());
        assert_eq!(item.last_performed_time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()));
    }

    #[test]
    fn server_next_due_is_taken_verbatim() {
        let row: AssignmentRecord = serde_json::from_value(json!({
            "assignment_id": "a1",
            "medication_id": "m1",
            "pet_id": "rex",
            "last_performed_at": "2024-01-04T08:00:00Z",
            "next_dose": "2024-01-04T20:00:00Z",
            "perform_every_number": 12,
            "perform_every_unit": "h"
        }))
        .unwrap();

        let item = row.into_item(None, chrono_tz::UTC, now()).unwrap();
        assert_eq!(item.entity_id, "m1");
        assert_eq!(item.next_due_time, Utc.with_ymd_and_hms(2024, 1, 4, 20, 0, 0).unwrap());
        assert_eq!(item.start_time, Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap());
    }

    #[test]
    fn unknown_unit_is_rejected_not_defaulted() {
        let row: AssignmentRecord = serde_json::from_value(json!({
            "assignment_id": "a1",
            "next_activity": "2024-01-04T20:00:00Z",
            "perform_every_number": 3,
            "perform_every_unit": "sometimes"
        }))
        .unwrap();
        assert!(matches!(
            row.into_item(None, chrono_tz::UTC, now()),
            Err(SyncError::InvalidInterval(_))
        ));
    }

    #[test]
    fn missing_fields_fall_back_to_definition() {
        let def: DefinitionRecord = serde_json::from_value(json!({
            "routine_id": "r-1",
            "name": "Walk",
            "user_id": "u7",
            "start_of_activity": "2030-01-01 07:30",
            "perform_every_number": 1,
            "perform_every_unit": "week"
        }))
        .unwrap();
        let row: AssignmentRecord = serde_json::from_value(json!({
            "assignment_id": "a1",
            "pet_id": "rex",
            "next_activity": null
        }))
        .unwrap();

        let item = row.into_item(Some(&def), chrono_tz::UTC, now()).unwrap();
        assert_eq!(item.entity_id, "r-1");
        assert_eq!(item.owner_id, "u7");
        assert_eq!(item.name.as_deref(), Some("Walk"));
        assert_eq!(item.next_due_time, Utc.with_ymd_and_hms(2030, 1, 1, 7, 30, 0).unwrap());
        assert_eq!(item.last_performed_time, None);
    }

    #[test]
    fn list_body_accepts_bare_and_wrapped() {
        let bare: ListBody = serde_json::from_value(json!([{ "assignment_id": "a" }])).unwrap();
        assert_eq!(bare.into_rows().len(), 1);
        let wrapped: ListBody =
            serde_json::from_value(json!({ "routines": [{ "assignment_id": "a" }, { "assignment_id": "b" }] })).unwrap();
        assert_eq!(wrapped.into_rows().len(), 2);
    }

    #[test]
    fn delete_flag_defaults_to_confirmed() {
        let absent: DeleteResponse = serde_json::from_value(json!({ "ok": true })).unwrap();
        assert!(absent.confirmed());
        let denied: DeleteResponse = serde_json::from_value(json!({ "deleted": false })).unwrap();
        assert!(!denied.confirmed());
    }

    #[test]
    fn delete_flag_reads_sheet_cells() {
        let flag = |v: Value| serde_json::from_value::<DeleteResponse>(json!({ "deleted": v })).unwrap();
        assert!(flag(json!("TRUE")).confirmed());
        assert!(flag(json!(1)).confirmed());
        assert!(flag(json!("")).confirmed());
        assert!(flag(Value::Null).confirmed());
        assert!(!flag(json!("false")).confirmed());
        assert!(!flag(json!(0)).confirmed());
        assert!(!flag(json!("pending")).confirmed());
    }

    #[test]
    fn create_body_uses_kind_specific_start_field() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        let new = NewSchedule::parse("Heartworm pill", "2024-02-01 08:00", "1", "months", tz).unwrap();
        let body = new.to_json(ScheduleKind::Medication, &["rex".to_string()], tz);
        assert_eq!(body["start_of_supply"], "2024-02-01 08:00");
        assert_eq!(body["perform_every_unit"], "month");
        assert_eq!(body["assign_to_pets"], json!(["rex"]));
        assert!(body.get("start_of_activity").is_none());
    }

    #[test]
    fn new_schedule_validates_before_sending() {
        let err = NewSchedule::parse("Walk", "2024-02-01 08:00", "0", "days", chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInterval(_)));
        let err = NewSchedule::parse("Walk", "tomorrow", "1", "days", chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
    }
}

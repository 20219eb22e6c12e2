//! petcare-core: recurring schedule engine for pet routines and medications.
//!
//! Interval parsing, next/last occurrence arithmetic, schedule items, and the
//! per-pet store with its durable mirror. Nothing in this crate talks to the
//! network; see `petcare-sync` for that.

pub mod error;
pub mod interval;
pub mod item;
pub mod mirror;
pub mod occurrence;
pub mod store;
pub mod time;

pub use error::{Result, ScheduleError};
pub use interval::{Interval, IntervalUnit, parse_interval};
pub use item::{ScheduleItem, ScheduleKind};
pub use mirror::{JsonDirMirror, MemoryMirror, ScheduleMirror};
pub use occurrence::{
    Occurrence, ReschedulePolicy, compute_after_perform, compute_next, compute_overdue_reschedule,
    overdue_perform_time, step_past,
};
pub use store::{ScheduleStore, StoreChange, StoreEvent};
pub use time::{
    parse_local_to_utc, parse_timezone, parse_wire_timestamp, to_local_minute, to_rfc3339_utc,
};

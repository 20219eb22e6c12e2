//! petcare-sync: reconciles per-pet schedule stores with the remote sheet.

pub mod error;
pub mod remote;
pub mod sync;
pub mod wire;

pub use error::{Result, SyncError};
pub use remote::{HttpRemote, HttpRemoteConfig, ScheduleRemote};
pub use sync::{Clock, PROVISIONAL_PREFIX, PerformOutcome, RemoteSync, SyncOptions};
pub use wire::{
    AssignmentRecord, CreateResponse, DefinitionRecord, DeleteResponse, NewSchedule,
    PerformRequest, PerformResponse,
};

#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use petcare_core::{MemoryMirror, ScheduleKind, ScheduleStore};
use petcare_sync::wire::ListBody;
use petcare_sync::{
    AssignmentRecord, CreateResponse, DeleteResponse, PerformRequest, PerformResponse, RemoteSync,
    ScheduleRemote, SyncError, SyncOptions,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
}

pub fn row(assignment_id: &str, entity_id: &str, pet_id: &str, next: &str) -> Value {
    json!({
        "assignment_id": assignment_id,
        "routine_id": entity_id,
        "pet_id": pet_id,
        "user_id": "u1",
        "last_performed_at": "",
        "next_activity": next,
        "start_of_activity": "2024-01-01 10:00",
        "perform_every_number": 2,
        "perform_every_unit": "days"
    })
}

fn unavailable(endpoint: &str) -> SyncError {
    SyncError::RemoteUnavailable {
        endpoint: endpoint.to_string(),
        status: Some(503),
        body: "sheet offline".to_string(),
    }
}

/// Scriptable in-process remote.
#[derive(Default)]
pub struct FakeRemote {
    pub lists: Mutex<HashMap<String, Value>>,
    pub fail_list: Mutex<bool>,
    pub create_reply: Mutex<Option<Value>>,
    pub perform_reply: Mutex<Option<Value>>,
    pub delete_reply: Mutex<Option<Value>>,
    pub create_bodies: Mutex<Vec<Value>>,
    pub performs: Mutex<Vec<PerformRequest>>,
    /// When set, create waits for a notification before answering.
    pub create_gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl FakeRemote {
    pub fn set_list(&self, pet: &str, rows: Value) {
        self.lists.lock().unwrap().insert(pet.to_string(), rows);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleRemote for FakeRemote {
    async fn list(&self, _kind: ScheduleKind, pet_id: &str) -> Result<Vec<AssignmentRecord>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_list.lock().unwrap() {
            return Err(unavailable("list"));
        }
        let body = self
            .lists
            .lock()
            .unwrap()
            .get(pet_id)
            .cloned()
            .unwrap_or_else(|| json!([]));
        let parsed: ListBody = serde_json::from_value(body).unwrap();
        Ok(parsed.into_rows())
    }

    async fn create(&self, _kind: ScheduleKind, body: &Value) -> Result<CreateResponse, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.create_bodies.lock().unwrap().push(body.clone());
        if let Some(gate) = &self.create_gate {
            gate.notified().await;
        }
        let reply = self.create_reply.lock().unwrap().clone();
        match reply {
            Some(v) => Ok(serde_json::from_value(v).unwrap()),
            None => Err(unavailable("create")),
        }
    }

    async fn perform(&self, _kind: ScheduleKind, req: &PerformRequest) -> Result<PerformResponse, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.performs.lock().unwrap().push(req.clone());
        let reply = self.perform_reply.lock().unwrap().clone();
        match reply {
            Some(v) => Ok(serde_json::from_value(v).unwrap()),
            None => Err(unavailable("perform")),
        }
    }

    async fn delete(&self, _kind: ScheduleKind, _entity_id: &str) -> Result<DeleteResponse, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.delete_reply.lock().unwrap().clone();
        match reply {
            Some(v) => Ok(serde_json::from_value(v).unwrap()),
            None => Err(unavailable("delete")),
        }
    }
}

pub fn sync_with(remote: Arc<FakeRemote>, optimistic: bool) -> RemoteSync {
    let store = Arc::new(ScheduleStore::new(ScheduleKind::Routine, Arc::new(MemoryMirror::new())));
    let options = SyncOptions::default()
        .with_optimistic(optimistic)
        .with_clock(now);
    RemoteSync::new(store, remote, options)
}

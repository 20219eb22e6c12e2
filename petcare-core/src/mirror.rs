//! Durable per-pet mirrors of the schedule store.
//!
//! One list per (kind, pet). The store writes through the mirror on every
//! mutation, so reopening a store over the same mirror reproduces its state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, ScheduleError};
use crate::item::{ScheduleItem, ScheduleKind};

pub trait ScheduleMirror: Send + Sync {
    /// Persisted list for a pet; empty when nothing was ever saved.
    fn load(&self, kind: ScheduleKind, pet_id: &str) -> Result<Vec<ScheduleItem>>;

    fn save(&self, kind: ScheduleKind, pet_id: &str, items: &[ScheduleItem]) -> Result<()>;

    fn remove(&self, kind: ScheduleKind, pet_id: &str) -> Result<()>;

    /// Pets with a persisted list of this kind.
    fn pets(&self, kind: ScheduleKind) -> Result<Vec<String>>;
}

/// JSON files under `<root>/<collection>/<url-encoded pet id>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirMirror {
    root: PathBuf,
}

impl JsonDirMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, kind: ScheduleKind) -> PathBuf {
        self.root.join(kind.collection())
    }

    fn file(&self, kind: ScheduleKind, pet_id: &str) -> PathBuf {
        self.dir(kind)
            .join(format!("{}.json", urlencoding::encode(pet_id)))
    }
}

fn mirror_err(path: &Path, e: impl std::fmt::Display) -> ScheduleError {
    ScheduleError::Mirror {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl ScheduleMirror for JsonDirMirror {
    fn load(&self, kind: ScheduleKind, pet_id: &str) -> Result<Vec<ScheduleItem>> {
        let p = self.file(kind, pet_id);
        if !p.exists() {
            return Ok(Vec::new());
        }
        let s = fs::read_to_string(&p).map_err(|e| mirror_err(&p, e))?;
        serde_json::from_str(&s).map_err(|e| mirror_err(&p, e))
    }

    fn save(&self, kind: ScheduleKind, pet_id: &str, items: &[ScheduleItem]) -> Result<()> {
        let dir = self.dir(kind);
        fs::create_dir_all(&dir).map_err(|e| mirror_err(&dir, e))?;

        let p = self.file(kind, pet_id);
        let tmp = p.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(items)?;
        fs::write(&tmp, json).map_err(|e| mirror_err(&tmp, e))?;
        fs::rename(&tmp, &p).map_err(|e| mirror_err(&p, e))?;
        Ok(())
    }

    fn remove(&self, kind: ScheduleKind, pet_id: &str) -> Result<()> {
        let p = self.file(kind, pet_id);
        match fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(mirror_err(&p, e)),
        }
    }

    fn pets(&self, kind: ScheduleKind) -> Result<Vec<String>> {
        let dir = self.dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| mirror_err(&dir, e))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(pet) => out.push(pet.into_owned()),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping undecodable mirror file"),
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Process-local mirror, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    lists: Mutex<HashMap<(ScheduleKind, String), Vec<ScheduleItem>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleMirror for MemoryMirror {
    fn load(&self, kind: ScheduleKind, pet_id: &str) -> Result<Vec<ScheduleItem>> {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(lists
            .get(&(kind, pet_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, kind: ScheduleKind, pet_id: &str, items: &[ScheduleItem]) -> Result<()> {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        lists.insert((kind, pet_id.to_string()), items.to_vec());
        Ok(())
    }

    fn remove(&self, kind: ScheduleKind, pet_id: &str) -> Result<()> {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        lists.remove(&(kind, pet_id.to_string()));
        Ok(())
    }

    fn pets(&self, kind: ScheduleKind) -> Result<Vec<String>> {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<String> = lists
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, pet)| pet.clone())
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, pet: &str) -> ScheduleItem {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        ScheduleItem::scheduled(id, "r1", pet, "u1", Interval::days(1).unwrap(), now, now)
    }

    #[test]
    fn json_dir_mirror_persists_per_pet_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = JsonDirMirror::new(dir.path());

        mirror.save(ScheduleKind::Routine, "pet/1", &[item("a1", "pet/1")]).unwrap();
        mirror.save(ScheduleKind::Medication, "pet-2", &[item("m1", "pet-2")]).unwrap();

        assert_eq!(mirror.load(ScheduleKind::Routine, "pet/1").unwrap().len(), 1);
        assert!(mirror.load(ScheduleKind::Routine, "pet-2").unwrap().is_empty());
        assert_eq!(mirror.pets(ScheduleKind::Routine).unwrap(), vec!["pet/1".to_string()]);
        assert_eq!(mirror.pets(ScheduleKind::Medication).unwrap(), vec!["pet-2".to_string()]);

        mirror.remove(ScheduleKind::Routine, "pet/1").unwrap();
        mirror.remove(ScheduleKind::Routine, "pet/1").unwrap();
        assert!(mirror.pets(ScheduleKind::Routine).unwrap().is_empty());
    }

    #[test]
    fn corrupt_mirror_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = JsonDirMirror::new(dir.path());
        fs::create_dir_all(dir.path().join("routines")).unwrap();
        fs::write(dir.path().join("routines").join("rex.json"), "{not json").unwrap();

        let err = mirror.load(ScheduleKind::Routine, "rex").unwrap_err();
        assert!(matches!(err, ScheduleError::Mirror { .. }));
    }

    #[test]
    fn memory_mirror_round_trip() {
        let mirror = MemoryMirror::new();
        mirror.save(ScheduleKind::Medication, "rex", &[item("m1", "rex")]).unwrap();
        assert_eq!(mirror.load(ScheduleKind::Medication, "rex").unwrap()[0].assignment_id, "m1");
        assert!(mirror.load(ScheduleKind::Routine, "rex").unwrap().is_empty());
    }
}

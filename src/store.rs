use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::countdown::model::{Countdown, load_countdown_file, save_countdown_file};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no countdown with id '{0}'")]
    UnknownId(String),
    #[error("countdown title must not be empty")]
    EmptyTitle,
    #[error("unable to persist countdown file")]
    Persist(#[from] anyhow::Error),
}

/// Opaque "something changed" signal. Every store mutation bumps the
/// revision; consumers that see it move re-list and re-drive registration.
/// The counter carries no other meaning.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    revision: AtomicU64,
}

impl ChangeSignal {
    pub fn notify(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }
}

/// File-backed countdown storage. Every mutation writes through to disk and
/// raises the change signal before returning.
pub struct CountdownStore {
    path: PathBuf,
    countdowns: Vec<Countdown>,
    next_seq: u64,
    signal: Arc<ChangeSignal>,
}

impl CountdownStore {
    /// Opens the store, treating a missing file as an empty list. The file
    /// is only created once the first countdown is saved.
    pub fn open(path: PathBuf, signal: Arc<ChangeSignal>) -> Result<Self> {
        let countdowns = if path.exists() {
            load_countdown_file(&path)?.countdowns
        } else {
            Vec::new()
        };
        let next_seq = countdowns
            .iter()
            .filter_map(|countdown| countdown.id.strip_prefix("cd-")?.parse::<u64>().ok())
            .max()
            .map_or(1, |highest| highest + 1);
        Ok(Self {
            path,
            countdowns,
            next_seq,
            signal,
        })
    }

    /// Read-only snapshot for callers; the store keeps ownership of the
    /// canonical list.
    pub fn list(&self) -> Vec<Countdown> {
        self.countdowns.clone()
    }

    pub fn len(&self) -> usize {
        self.countdowns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countdowns.is_empty()
    }

    pub fn create(
        &mut self,
        title: &str,
        target_utc: DateTime<Utc>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Countdown, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        let countdown = Countdown {
            id: format!("cd-{}", self.next_seq),
            title: title.to_string(),
            description: description.filter(|text| !text.trim().is_empty()),
            target_utc,
            created_utc: now,
        };
        self.next_seq += 1;
        self.countdowns.push(countdown.clone());
        self.persist()?;
        log::debug!("created countdown {} ('{}')", countdown.id, countdown.title);
        self.signal.notify();
        Ok(countdown)
    }

    pub fn delete(&mut self, id: &str) -> Result<Countdown, StoreError> {
        let Some(index) = self.countdowns.iter().position(|countdown| countdown.id == id) else {
            return Err(StoreError::UnknownId(id.to_string()));
        };
        let removed = self.countdowns.remove(index);
        self.persist()?;
        log::debug!("deleted countdown {}", removed.id);
        self.signal.notify();
        Ok(removed)
    }

    fn persist(&self) -> Result<(), StoreError> {
        save_countdown_file(&self.path, &self.countdowns)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("now")
    }

    fn target() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).single().expect("target")
    }

    #[test]
    fn missing_file_opens_as_an_empty_store() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("countdowns.json");
        let store = CountdownStore::open(path.clone(), Arc::new(ChangeSignal::default()))
            .expect("open");
        assert!(store.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn create_persists_and_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("countdowns.json");
        let signal = Arc::new(ChangeSignal::default());

        let mut store = CountdownStore::open(path.clone(), Arc::clone(&signal)).expect("open");
        let created = store
            .create("Launch party", target(), Some("bring snacks".to_string()), now())
            .expect("create");
        assert_eq!(created.id, "cd-1");

        let reopened = CountdownStore::open(path, signal).expect("reopen");
        assert_eq!(reopened.len(), 1);
        let listed = reopened.list();
        assert_eq!(listed[0].title, "Launch party");
        assert_eq!(listed[0].target_utc, target());
    }

    #[test]
    fn ids_stay_monotonic_after_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("countdowns.json");
        let signal = Arc::new(ChangeSignal::default());

        let mut store = CountdownStore::open(path.clone(), Arc::clone(&signal)).expect("open");
        store.create("First", target(), None, now()).expect("create");
        store.create("Second", target(), None, now()).expect("create");
        store.delete("cd-1").expect("delete");

        let mut reopened = CountdownStore::open(path, signal).expect("reopen");
        let third = reopened.create("Third", target(), None, now()).expect("create");
        assert_eq!(third.id, "cd-3");
    }

    #[test]
    fn delete_of_unknown_id_is_a_typed_error() {
        let dir = tempdir().expect("tempdir");
        let mut store = CountdownStore::open(
            dir.path().join("countdowns.json"),
            Arc::new(ChangeSignal::default()),
        )
        .expect("open");

        let err = store.delete("cd-404").expect_err("unknown id should fail");
        assert!(matches!(err, StoreError::UnknownId(id) if id == "cd-404"));
    }

    #[test]
    fn blank_title_is_rejected_before_anything_persists() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("countdowns.json");
        let mut store =
            CountdownStore::open(path.clone(), Arc::new(ChangeSignal::default())).expect("open");

        let err = store.create("   ", target(), None, now()).expect_err("blank title");
        assert!(matches!(err, StoreError::EmptyTitle));
        assert!(!path.exists());
    }

    #[test]
    fn mutations_raise_the_change_signal() {
        let dir = tempdir().expect("tempdir");
        let signal = Arc::new(ChangeSignal::default());
        let mut store = CountdownStore::open(
            dir.path().join("countdowns.json"),
            Arc::clone(&signal),
        )
        .expect("open");

        assert_eq!(signal.revision(), 0);
        store.create("Ping", target(), None, now()).expect("create");
        assert_eq!(signal.revision(), 1);
        store.delete("cd-1").expect("delete");
        assert_eq!(signal.revision(), 2);
    }

    #[test]
    fn whitespace_only_description_is_dropped() {
        let dir = tempdir().expect("tempdir");
        let mut store = CountdownStore::open(
            dir.path().join("countdowns.json"),
            Arc::new(ChangeSignal::default()),
        )
        .expect("open");

        let created = store
            .create("Quiet", target(), Some("   ".to_string()), now())
            .expect("create");
        assert!(created.description.is_none());
    }
}

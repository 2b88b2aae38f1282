//! Mapping registry and reconciliation state, persisted as two JSON files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::types::{Mapping, MappingStatus, ReconState, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingsDoc {
    mappings: Vec<Mapping>,
}

#[derive(Debug, Default)]
struct Inner {
    mappings: Vec<Mapping>,
    states: HashMap<String, ReconState>,
}

/// Thread-safe registry over the two persisted documents.
///
/// Readers get snapshots; writers rewrite the affected file atomically
/// before releasing the lock, so the reconciler never observes a
/// half-updated collection.
#[derive(Debug)]
pub struct ProgressStore {
    mappings_path: PathBuf,
    states_path: PathBuf,
    inner: RwLock<Inner>,
}

impl ProgressStore {
    /// Load both documents from the data directory, treating unreadable or
    /// truncated files as absent.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let mappings_path = data_dir.join("mappings.json");
        let states_path = data_dir.join("states.json");

        let doc: MappingsDoc = read_or_default(&mappings_path);
        let states: HashMap<String, ReconState> = read_or_default(&states_path);

        Ok(Self {
            mappings_path,
            states_path,
            inner: RwLock::new(Inner {
                mappings: doc.mappings,
                states,
            }),
        })
    }

    /// Startup recovery: jobs interrupted mid-flight are forgiven and the
    /// mapping goes back to reconciling. Returns how many were recovered.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let mut recovered = 0;
        for mapping in &mut inner.mappings {
            if matches!(
                mapping.status,
                MappingStatus::Processing | MappingStatus::Crashed
            ) {
                mapping.status = MappingStatus::Active;
                recovered += 1;
                info!(title = %mapping.title, "recovered interrupted job");
            }
        }
        if recovered > 0 {
            self.persist_mappings(&inner)?;
        }
        Ok(recovered)
    }

    /// Register a mapping, replacing any previous one with the same
    /// audiobook id.
    pub fn add_mapping(&self, mapping: Mapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner
            .mappings
            .retain(|m| m.audiobook_id != mapping.audiobook_id);
        info!(title = %mapping.title, status = ?mapping.status, "mapping added");
        inner.mappings.push(mapping);
        self.persist_mappings(&inner)
    }

    /// Remove a mapping and its reconciliation state.
    pub fn remove_mapping(&self, audiobook_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.mappings.len();
        inner.mappings.retain(|m| m.audiobook_id != audiobook_id);
        if inner.mappings.len() == before {
            return Ok(false);
        }
        self.persist_mappings(&inner)?;
        if inner.states.remove(audiobook_id).is_some() {
            self.persist_states(&inner)?;
        }
        info!(audiobook_id, "mapping removed");
        Ok(true)
    }

    /// Snapshot of all mappings.
    pub fn list_mappings(&self) -> Vec<Mapping> {
        self.inner.read().unwrap().mappings.clone()
    }

    pub fn get_mapping(&self, audiobook_id: &str) -> Option<Mapping> {
        self.inner
            .read()
            .unwrap()
            .mappings
            .iter()
            .find(|m| m.audiobook_id == audiobook_id)
            .cloned()
    }

    pub fn update_status(
        &self,
        audiobook_id: &str,
        status: MappingStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(mapping) = inner
            .mappings
            .iter_mut()
            .find(|m| m.audiobook_id == audiobook_id)
        {
            mapping.status = status;
            self.persist_mappings(&inner)?;
        }
        Ok(())
    }

    pub fn set_transcript_ref(
        &self,
        audiobook_id: &str,
        transcript_ref: PathBuf,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(mapping) = inner
            .mappings
            .iter_mut()
            .find(|m| m.audiobook_id == audiobook_id)
        {
            mapping.transcript_ref = Some(transcript_ref);
            self.persist_mappings(&inner)?;
        }
        Ok(())
    }

    /// Last reconciled state for a mapping, zeroed when none exists yet.
    pub fn state(&self, audiobook_id: &str) -> ReconState {
        self.inner
            .read()
            .unwrap()
            .states
            .get(audiobook_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put_state(&self, audiobook_id: &str, state: ReconState) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.states.insert(audiobook_id.to_string(), state);
        self.persist_states(&inner)
    }

    fn persist_mappings(&self, inner: &Inner) -> Result<(), StoreError> {
        let doc = MappingsDoc {
            mappings: inner.mappings.clone(),
        };
        write_atomic(&self.mappings_path, &doc)
    }

    fn persist_states(&self, inner: &Inner) -> Result<(), StoreError> {
        write_atomic(&self.states_path, &inner.states)
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable state file, starting empty");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mapping(id: &str, status: MappingStatus) -> Mapping {
        Mapping {
            audiobook_id: id.to_string(),
            ebook_doc_id: format!("hash-{id}"),
            ebook_file: format!("{id}.epub"),
            title: format!("Book {id}"),
            transcript_ref: None,
            status,
        }
    }

    #[test]
    fn add_replaces_same_audiobook_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();
        store.add_mapping(mapping("a", MappingStatus::Pending)).unwrap();
        store.add_mapping(mapping("a", MappingStatus::Active)).unwrap();
        let all = store.list_mappings();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, MappingStatus::Active);
    }

    #[test]
    fn remove_drops_state_as_well() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();
        store.add_mapping(mapping("a", MappingStatus::Active)).unwrap();
        store
            .put_state(
                "a",
                ReconState {
                    audio_seconds: 42.0,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store.remove_mapping("a").unwrap());
        assert!(!store.remove_mapping("a").unwrap());

        let reopened = ProgressStore::open(dir.path()).unwrap();
        assert!(reopened.list_mappings().is_empty());
        assert_eq!(reopened.state("a"), ReconState::default());
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ProgressStore::open(dir.path()).unwrap();
            store.add_mapping(mapping("a", MappingStatus::Active)).unwrap();
            store
                .put_state(
                    "a",
                    ReconState {
                        audio_seconds: 3600.0,
                        ebook_fraction: 0.42,
                        readalong_fraction: 0.42,
                        last_updated: 1.0,
                        ebook_char_cursor: 421,
                    },
                )
                .unwrap();
        }
        let store = ProgressStore::open(dir.path()).unwrap();
        assert_eq!(store.list_mappings().len(), 1);
        assert_eq!(store.state("a").ebook_char_cursor, 421);
    }

    #[rstest]
    #[case(MappingStatus::Processing, MappingStatus::Active)]
    #[case(MappingStatus::Crashed, MappingStatus::Active)]
    #[case(MappingStatus::PendingTranscript, MappingStatus::PendingTranscript)]
    #[case(MappingStatus::Failed, MappingStatus::Failed)]
    fn startup_recovery(#[case] stored: MappingStatus, #[case] expected: MappingStatus) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();
        store.add_mapping(mapping("a", stored)).unwrap();
        store.recover_interrupted().unwrap();
        assert_eq!(store.get_mapping("a").unwrap().status, expected);
    }

    #[test]
    fn truncated_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mappings.json"), "{\"mappings\": [tru").unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();
        assert!(store.list_mappings().is_empty());
    }

    #[test]
    fn legacy_state_records_gain_new_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("states.json"),
            r#"{"a": {"audio_seconds": 12.5, "ebook_fraction": 0.2}}"#,
        )
        .unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();
        let state = store.state("a");
        assert_eq!(state.audio_seconds, 12.5);
        assert_eq!(state.ebook_char_cursor, 0);
    }
}

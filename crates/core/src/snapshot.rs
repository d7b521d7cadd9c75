//! JSON workspace file for the reference adapters.
//!
//! The CLI keeps its whole state (location tree, patient registry, paper record store)
//! in one JSON file. Each command loads the file, runs one service operation and saves
//! the file again.

use crate::config::CoreConfig;
use crate::labels::{LabelPrinter, LabelRenderer};
use crate::locations::{LocationEntry, LocationTree};
use crate::patients::{InMemoryPatientRegistry, RegistrySnapshot};
use crate::repositories::memory::{InMemoryStore, StoreSnapshot};
use crate::service::PaperRecordService;
use crate::{PaperRecordError, PaperRecordResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    #[serde(default)]
    pub locations: Vec<LocationEntry>,
    #[serde(default)]
    pub registry: RegistrySnapshot,
    #[serde(default)]
    pub store: StoreSnapshot,
}

/// Live adapters built from a snapshot.
///
/// The adapters are shared with the service built by [`Workspace::service`], so the
/// workspace can still be snapshotted after the service has changed state.
#[derive(Clone)]
pub struct Workspace {
    pub locations: Arc<LocationTree>,
    pub registry: Arc<InMemoryPatientRegistry>,
    pub store: Arc<InMemoryStore>,
}

impl WorkspaceSnapshot {
    /// Reads a snapshot. A missing file is an empty workspace.
    pub fn load(path: &Path) -> PaperRecordResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(PaperRecordError::FileRead)?;
        serde_json::from_str(&contents).map_err(PaperRecordError::Deserialization)
    }

    /// Writes the snapshot through a temporary file so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> PaperRecordResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(PaperRecordError::Serialization)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(PaperRecordError::FileWrite)?;
        fs::rename(&tmp, path).map_err(PaperRecordError::FileWrite)?;
        Ok(())
    }

    pub fn into_workspace(self) -> PaperRecordResult<Workspace> {
        Ok(Workspace {
            locations: Arc::new(LocationTree::from_entries(self.locations)?),
            registry: Arc::new(InMemoryPatientRegistry::from_snapshot(self.registry)),
            store: Arc::new(InMemoryStore::from_snapshot(self.store)),
        })
    }
}

impl Workspace {
    pub fn service(
        &self,
        cfg: Arc<CoreConfig>,
        renderer: Arc<dyn LabelRenderer>,
        printer: Arc<dyn LabelPrinter>,
    ) -> PaperRecordService {
        PaperRecordService::new(
            cfg,
            self.store.clone(),
            self.registry.clone(),
            self.locations.clone(),
            renderer,
            printer,
        )
    }

    pub fn snapshot(&self) -> PaperRecordResult<WorkspaceSnapshot> {
        Ok(WorkspaceSnapshot {
            locations: self.locations.entries()?,
            registry: self.registry.snapshot()?,
            store: self.store.snapshot()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::PlainTextLabelRenderer;
    use crate::model::{NewPaperRecord, PersonId};
    use crate::patients::PatientRegistry;
    use crate::repositories::PaperRecordStore;
    use crate::test_support::{facility_tree, ident, loc, RecordingPrinter};
    use paper_record_types::NonEmptyText;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_workspace() {
        let dir = TempDir::new().unwrap();
        let snapshot = WorkspaceSnapshot::load(&dir.path().join("absent.json")).unwrap();
        assert!(snapshot.locations.is_empty());
        assert!(snapshot.store.paper_records.is_empty());
        assert_eq!(snapshot.registry.identifier_prefix, "A");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper_records.json");

        let workspace = Workspace {
            locations: Arc::new(facility_tree()),
            registry: Arc::new(InMemoryPatientRegistry::new("A")),
            store: Arc::new(InMemoryStore::new()),
        };
        let patient = workspace
            .registry
            .register_patient(NonEmptyText::new("Jean Louis").unwrap(), ident("P1"))
            .unwrap();
        let mut uow = workspace.store.begin().unwrap();
        uow.insert_record(NewPaperRecord {
            patient,
            identifier: ident("A000001"),
            record_location: loc("Main Hospital"),
            date_created: chrono::Utc::now(),
        })
        .unwrap();
        uow.commit().unwrap();

        let snapshot = workspace.snapshot().unwrap();
        snapshot.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = WorkspaceSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);

        let restored = loaded.into_workspace().unwrap();
        assert_eq!(
            restored
                .registry
                .patients_with_identifier(&ident("P1"), crate::patients::IdentifierKind::Primary)
                .unwrap(),
            vec![patient]
        );
        assert_eq!(restored.store.snapshot().unwrap().paper_records.len(), 1);
    }

    #[test]
    fn test_service_changes_reach_the_snapshot() {
        let workspace = WorkspaceSnapshot {
            locations: facility_tree().entries().unwrap(),
            ..WorkspaceSnapshot::default()
        }
        .into_workspace()
        .unwrap();
        let patient = workspace
            .registry
            .register_patient(NonEmptyText::new("Marie").unwrap(), ident("P2"))
            .unwrap();

        let service = workspace.service(
            Arc::new(CoreConfig::default().with_print_pacing(crate::PrintPacing::NONE)),
            Arc::new(PlainTextLabelRenderer),
            Arc::new(RecordingPrinter::new()),
        );
        let requests = service
            .request_paper_record(patient, &loc("Main Hospital"), &loc("Clinic 3"), PersonId::new())
            .unwrap();

        let snapshot = workspace.snapshot().unwrap();
        assert_eq!(snapshot.store.paper_record_requests.len(), 1);
        assert_eq!(snapshot.store.paper_record_requests[0].id, requests[0].id);
        assert_eq!(snapshot.locations.len(), 7);
    }

    #[test]
    fn test_corrupt_file_is_deserialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper_records.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            WorkspaceSnapshot::load(&path),
            Err(PaperRecordError::Deserialization(_))
        ));
    }
}

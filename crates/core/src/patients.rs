//! Patient registry boundary.
//!
//! Patient master data lives outside the core. The core only needs to look patients up by
//! identifier, read and store the chart number identifier, void an identifier on merge,
//! and draw fresh chart numbers from an identifier source.
//!
//! [`InMemoryPatientRegistry`] is the reference adapter used by the binaries and tests.
//! Its identifier source is a zero-padded sequence with a prefix; tests can queue exact
//! values ahead of the sequence to provoke collisions.

use crate::model::{LocationId, PatientId};
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::{Identifier, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Which identifier type is meant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentifierKind {
    /// The patient's main identifier in the digital record system.
    Primary,
    /// Chart tracking number, scoped to a medical record location.
    PaperRecord,
}

/// Read and write access to patient identifiers.
pub trait PatientRegistry: Send + Sync {
    /// Patients carrying a non-voided identifier of `kind` with this value.
    fn patients_with_identifier(
        &self,
        identifier: &Identifier,
        kind: IdentifierKind,
    ) -> PaperRecordResult<Vec<PatientId>>;

    /// The patient's non-voided identifier of `kind` at `location`, if any.
    fn identifier_for(
        &self,
        patient: PatientId,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<Option<Identifier>>;

    /// Whether any patient holds this identifier of `kind` at `location`.
    fn identifier_in_use(
        &self,
        identifier: &Identifier,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<bool>;

    fn save_identifier(
        &self,
        patient: PatientId,
        identifier: Identifier,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<()>;

    /// Voids the identifier. Returns `false` if the patient held no such live identifier.
    fn void_identifier(
        &self,
        patient: PatientId,
        identifier: &Identifier,
        kind: IdentifierKind,
        reason: &str,
    ) -> PaperRecordResult<bool>;

    /// Draws a fresh identifier. `None` means the source could not produce one.
    fn generate_identifier(
        &self,
        kind: IdentifierKind,
        location: &LocationId,
        purpose: &str,
    ) -> PaperRecordResult<Option<Identifier>>;

    /// Name printed on labels. Unknown patients yield `None`.
    fn display_name(&self, patient: PatientId) -> PaperRecordResult<Option<String>>;
}

/// One identifier held by a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentifier {
    pub identifier: Identifier,
    pub kind: IdentifierKind,
    pub location: Option<LocationId>,
    /// Reason recorded when the identifier was voided.
    pub void_reason: Option<String>,
}

impl PatientIdentifier {
    pub fn is_voided(&self) -> bool {
        self.void_reason.is_some()
    }

    fn matches(&self, identifier: &Identifier, kind: IdentifierKind) -> bool {
        !self.is_voided() && self.kind == kind && &self.identifier == identifier
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPatient {
    pub id: PatientId,
    pub name: NonEmptyText,
    pub identifiers: Vec<PatientIdentifier>,
}

/// Serializable copy of the in-memory registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub identifier_prefix: String,
    pub next_sequence: u64,
    pub patients: Vec<RegisteredPatient>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            identifier_prefix: "A".into(),
            next_sequence: 1,
            patients: Vec::new(),
        }
    }
}

struct RegistryState {
    identifier_prefix: String,
    next_sequence: u64,
    queued: VecDeque<Option<Identifier>>,
    patients: BTreeMap<PatientId, RegisteredPatient>,
}

pub struct InMemoryPatientRegistry {
    state: Mutex<RegistryState>,
}

impl Default for InMemoryPatientRegistry {
    fn default() -> Self {
        Self::new("A")
    }
}

impl InMemoryPatientRegistry {
    /// Registry whose generated chart numbers look like `{prefix}000001`.
    pub fn new(identifier_prefix: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                identifier_prefix: identifier_prefix.into(),
                next_sequence: 1,
                queued: VecDeque::new(),
                patients: BTreeMap::new(),
            }),
        }
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                identifier_prefix: snapshot.identifier_prefix,
                next_sequence: snapshot.next_sequence.max(1),
                queued: VecDeque::new(),
                patients: snapshot
                    .patients
                    .into_iter()
                    .map(|p| (p.id, p))
                    .collect(),
            }),
        }
    }

    pub fn snapshot(&self) -> PaperRecordResult<RegistrySnapshot> {
        let state = self.state()?;
        Ok(RegistrySnapshot {
            identifier_prefix: state.identifier_prefix.clone(),
            next_sequence: state.next_sequence,
            patients: state.patients.values().cloned().collect(),
        })
    }

    /// Adds a patient with a primary identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PaperRecordError::InvalidInput`] if another patient already holds the
    /// primary identifier.
    pub fn register_patient(
        &self,
        name: NonEmptyText,
        primary_identifier: Identifier,
    ) -> PaperRecordResult<PatientId> {
        let mut state = self.state()?;
        let taken = state.patients.values().any(|p| {
            p.identifiers
                .iter()
                .any(|i| i.matches(&primary_identifier, IdentifierKind::Primary))
        });
        if taken {
            return Err(PaperRecordError::InvalidInput(format!(
                "primary identifier {primary_identifier} is already assigned"
            )));
        }

        let id = PatientId::new();
        state.patients.insert(
            id,
            RegisteredPatient {
                id,
                name,
                identifiers: vec![PatientIdentifier {
                    identifier: primary_identifier,
                    kind: IdentifierKind::Primary,
                    location: None,
                    void_reason: None,
                }],
            },
        );
        tracing::info!("registered patient {}", id);
        Ok(id)
    }

    pub fn patient(&self, patient: PatientId) -> PaperRecordResult<Option<RegisteredPatient>> {
        Ok(self.state()?.patients.get(&patient).cloned())
    }

    /// Queues exact values to be returned by the next generator calls, ahead of the
    /// sequence. A queued `None` makes that call report failure.
    pub fn queue_generated(&self, values: impl IntoIterator<Item = Option<Identifier>>) {
        if let Ok(mut state) = self.state() {
            state.queued.extend(values);
        }
    }

    fn state(&self) -> PaperRecordResult<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| PaperRecordError::Registry("registry mutex poisoned".into()))
    }
}

impl PatientRegistry for InMemoryPatientRegistry {
    fn patients_with_identifier(
        &self,
        identifier: &Identifier,
        kind: IdentifierKind,
    ) -> PaperRecordResult<Vec<PatientId>> {
        let state = self.state()?;
        Ok(state
            .patients
            .values()
            .filter(|p| p.identifiers.iter().any(|i| i.matches(identifier, kind)))
            .map(|p| p.id)
            .collect())
    }

    fn identifier_for(
        &self,
        patient: PatientId,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<Option<Identifier>> {
        let state = self.state()?;
        Ok(state.patients.get(&patient).and_then(|p| {
            p.identifiers
                .iter()
                .find(|i| !i.is_voided() && i.kind == kind && i.location.as_ref() == Some(location))
                .map(|i| i.identifier.clone())
        }))
    }

    fn identifier_in_use(
        &self,
        identifier: &Identifier,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<bool> {
        let state = self.state()?;
        Ok(state.patients.values().any(|p| {
            p.identifiers.iter().any(|i| {
                &i.identifier == identifier && i.kind == kind && i.location.as_ref() == Some(location)
            })
        }))
    }

    fn save_identifier(
        &self,
        patient: PatientId,
        identifier: Identifier,
        kind: IdentifierKind,
        location: &LocationId,
    ) -> PaperRecordResult<()> {
        let mut state = self.state()?;
        let entry = state
            .patients
            .get_mut(&patient)
            .ok_or_else(|| PaperRecordError::Registry(format!("unknown patient {patient}")))?;
        entry.identifiers.push(PatientIdentifier {
            identifier,
            kind,
            location: Some(location.clone()),
            void_reason: None,
        });
        Ok(())
    }

    fn void_identifier(
        &self,
        patient: PatientId,
        identifier: &Identifier,
        kind: IdentifierKind,
        reason: &str,
    ) -> PaperRecordResult<bool> {
        let mut state = self.state()?;
        let Some(entry) = state.patients.get_mut(&patient) else {
            return Ok(false);
        };
        match entry
            .identifiers
            .iter_mut()
            .find(|i| i.matches(identifier, kind))
        {
            Some(found) => {
                found.void_reason = Some(reason.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn generate_identifier(
        &self,
        _kind: IdentifierKind,
        location: &LocationId,
        purpose: &str,
    ) -> PaperRecordResult<Option<Identifier>> {
        let mut state = self.state()?;
        if let Some(queued) = state.queued.pop_front() {
            return Ok(queued);
        }

        let value = format!("{}{:06}", state.identifier_prefix, state.next_sequence);
        state.next_sequence += 1;
        tracing::debug!("{} at {}: {}", purpose, location, value);
        Ok(Some(Identifier::new(value)?))
    }

    fn display_name(&self, patient: PatientId) -> PaperRecordResult<Option<String>> {
        Ok(self
            .state()?
            .patients
            .get(&patient)
            .map(|p| p.name.as_str().to_string()))
    }
}

//! Request-or-create with "last request wins" consolidation.
//!
//! A patient has at most one pending request per medical record location. Asking again
//! while one is pending moves that request to the new requesting location instead of
//! creating another, and any stray duplicates are cancelled on the way.
//!
//! A chart that has been merged into another is never requested again: requests for it go
//! to the chart it was merged into.

use super::{load_record, PaperRecordService};
use crate::constants::IDENTIFIER_GENERATION_PURPOSE;
use crate::model::{
    LocationId, MergeRequestStatus, NewPaperRecord, NewPaperRecordRequest, PaperRecord,
    PaperRecordRequest, PatientId, PersonId, PENDING_STATUSES,
};
use crate::patients::IdentifierKind;
use crate::repositories::UnitOfWork;
use crate::{PaperRecordError, PaperRecordResult};
use chrono::Utc;
use paper_record_types::Identifier;
use std::collections::BTreeSet;

impl PaperRecordService {
    /// Requests the patient's chart be brought to `request_location`.
    ///
    /// `location` may be any location; it is resolved to its medical record location. If a
    /// request is already pending there it is re-pointed at `request_location` and every
    /// other pending one is cancelled; the whole pending list is returned. Otherwise a
    /// chart is created if the patient has none and one OPEN request per chart is returned.
    pub fn request_paper_record(
        &self,
        patient: PatientId,
        location: &LocationId,
        request_location: &LocationId,
        creator: PersonId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.ensure_patient_known(patient)?;
        let record_location = self.medical_record_location_for(location)?;

        let _guard = self.locks.lock_patient(patient);
        self.in_transaction(|uow| {
            self.request_paper_record_in(uow, patient, &record_location, request_location, creator)
        })
    }

    /// Creates the patient's chart at the medical record location for `location`.
    ///
    /// Returns the existing chart (with a warning) if there already is one.
    pub fn create_paper_record(
        &self,
        patient: PatientId,
        location: &LocationId,
    ) -> PaperRecordResult<PaperRecord> {
        self.ensure_patient_known(patient)?;
        let record_location = self.medical_record_location_for(location)?;

        let _guard = self.locks.lock_patient(patient);
        self.in_transaction(|uow| self.create_paper_record_in(uow, patient, &record_location))
    }

    fn request_paper_record_in(
        &self,
        uow: &mut dyn UnitOfWork,
        patient: PatientId,
        record_location: &LocationId,
        request_location: &LocationId,
        creator: PersonId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        let mut records = surviving_records(uow, patient, record_location)?;

        let mut pending = Vec::new();
        for record in &records {
            pending.extend(uow.find_requests_for_record(&PENDING_STATUSES, record.id)?);
        }
        pending.sort_by_key(|request| request.id);

        if let Some((survivor, duplicates)) = pending.split_first_mut() {
            survivor.request_location = request_location.clone();
            uow.update_request(survivor)?;

            let now = Utc::now();
            for duplicate in duplicates.iter_mut() {
                duplicate.cancel(now)?;
                uow.update_request(duplicate)?;
            }
            if !duplicates.is_empty() {
                tracing::warn!(
                    "cancelled {} duplicate pending request(s) for patient {} at {}",
                    duplicates.len(),
                    patient,
                    record_location
                );
            }
            tracing::info!(
                "paper record request {} for patient {} now goes to {}",
                survivor.id,
                patient,
                request_location
            );
            return Ok(pending);
        }

        if records.is_empty() {
            records.push(self.create_paper_record_in(uow, patient, record_location)?);
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(records.len());
        for record in &records {
            let request = uow.insert_request(NewPaperRecordRequest {
                paper_record: record.id,
                request_location: request_location.clone(),
                creator,
                date_created: now,
            })?;
            tracing::info!(
                "created paper record request {} for {} to {}",
                request.id,
                record.identifier,
                request_location
            );
            created.push(request);
        }
        Ok(created)
    }

    pub(super) fn create_paper_record_in(
        &self,
        uow: &mut dyn UnitOfWork,
        patient: PatientId,
        record_location: &LocationId,
    ) -> PaperRecordResult<PaperRecord> {
        let identifier = match self.patients.identifier_for(
            patient,
            IdentifierKind::PaperRecord,
            record_location,
        )? {
            Some(identifier) => identifier,
            None => {
                let identifier = self.generate_paper_record_identifier(patient, record_location)?;
                self.patients.save_identifier(
                    patient,
                    identifier.clone(),
                    IdentifierKind::PaperRecord,
                    record_location,
                )?;
                identifier
            }
        };

        if let Some(existing) = uow.find_record(&identifier, Some(record_location))? {
            tracing::warn!(
                "create paper record called for {} which already has a record at {}",
                identifier,
                record_location
            );
            return Ok(existing);
        }

        let record = uow.insert_record(NewPaperRecord {
            patient,
            identifier,
            record_location: record_location.clone(),
            date_created: Utc::now(),
        })?;
        tracing::info!(
            "created paper record {} ({}) for patient {} at {}",
            record.id,
            record.identifier,
            patient,
            record_location
        );
        Ok(record)
    }

    fn generate_paper_record_identifier(
        &self,
        patient: PatientId,
        record_location: &LocationId,
    ) -> PaperRecordResult<Identifier> {
        let attempts = self.cfg.max_identifier_attempts();
        for attempt in 1..=attempts {
            let candidate = self
                .patients
                .generate_identifier(
                    IdentifierKind::PaperRecord,
                    record_location,
                    IDENTIFIER_GENERATION_PURPOSE,
                )?
                .ok_or_else(|| PaperRecordError::IdentifierGenerationFailed {
                    patient: patient.to_string(),
                })?;

            if !self.patients.identifier_in_use(
                &candidate,
                IdentifierKind::PaperRecord,
                record_location,
            )? {
                return Ok(candidate);
            }
            tracing::error!(
                "attempted to generate duplicate paper record identifier {} (attempt {}/{})",
                candidate,
                attempt,
                attempts
            );
        }

        Err(PaperRecordError::IdentifierGenerationExhausted {
            location: record_location.clone(),
            attempts,
        })
    }
}

/// The patient's charts at `record_location`, with every chart that has been merged away
/// replaced by the chart it was merged into.
fn surviving_records(
    uow: &dyn UnitOfWork,
    patient: PatientId,
    record_location: &LocationId,
) -> PaperRecordResult<Vec<PaperRecord>> {
    let merges = uow.find_merge_requests(
        &[MergeRequestStatus::Open, MergeRequestStatus::Merged],
        Some(record_location),
    )?;

    let mut survivors: Vec<PaperRecord> = Vec::new();
    for record in uow.find_records(patient, Some(record_location))? {
        let mut current = record;
        let mut visited = BTreeSet::new();
        while visited.insert(current.id) {
            let Some(merge) = merges
                .iter()
                .find(|m| m.not_preferred_paper_record == current.id)
            else {
                break;
            };
            current = load_record(uow, merge.preferred_paper_record)?;
        }
        if !survivors.iter().any(|r| r.id == current.id) {
            survivors.push(current);
        }
    }
    Ok(survivors)
}

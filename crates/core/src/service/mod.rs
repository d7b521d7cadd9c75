//! Paper record service.
//!
//! [`PaperRecordService`] is the single entry point for everything that changes or reads
//! paper record state. Its operations are split by concern:
//! - `consolidator`: request-or-create and record creation, under the per-patient lock
//! - `assignment`: batch assignment with label printing, under the assignment lock
//! - `merge`: reconciliation when two patients are merged
//! - `expiry`: cancellation of stale pending requests
//! - `printing`: label print operations
//! - `queries`: read-only lookups
//!
//! ## Transactions
//!
//! Every write operation runs as `lock → begin → work → commit or roll back → unlock`.
//! The lock guard is created before [`PaperRecordService::in_transaction`] is entered and
//! dropped after it returns, so a waiting caller always sees the committed outcome.

mod assignment;
mod consolidator;
mod expiry;
mod merge;
mod printing;
mod queries;

pub use assignment::AssignmentReport;

use crate::config::CoreConfig;
use crate::labels::{LabelPrinter, LabelPrintingService, LabelRenderer, LabelSubject};
use crate::locations::LocationDirectory;
use crate::locks::LockRegistry;
use crate::model::{
    LocationId, PaperRecord, PaperRecordId, PaperRecordRequest, PaperRecordRequestId, PatientId,
};
use crate::patients::PatientRegistry;
use crate::repositories::{PaperRecordStore, UnitOfWork};
use crate::{PaperRecordError, PaperRecordResult};
use chrono::Utc;
use paper_record_types::Identifier;
use std::sync::Arc;

// ============================================================================
// SERVICE
// ============================================================================

pub struct PaperRecordService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn PaperRecordStore>,
    patients: Arc<dyn PatientRegistry>,
    locations: Arc<dyn LocationDirectory>,
    labels: LabelPrintingService,
    locks: LockRegistry,
}

impl PaperRecordService {
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn PaperRecordStore>,
        patients: Arc<dyn PatientRegistry>,
        locations: Arc<dyn LocationDirectory>,
        renderer: Arc<dyn LabelRenderer>,
        printer: Arc<dyn LabelPrinter>,
    ) -> Self {
        let labels = LabelPrintingService::new(renderer, printer, cfg.print_pacing());
        Self {
            cfg,
            store,
            patients,
            locations,
            labels,
            locks: LockRegistry::new(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    // ------------------------------------------------------------------------
    // Request transitions
    // ------------------------------------------------------------------------

    /// Confirms the chart was sent to the requesting location.
    ///
    /// Allowed from any status, including after expiry or cancellation. The owning record
    /// becomes `ACTIVE` if it was still pending creation.
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::NotFound`] for an unknown id.
    pub fn mark_request_sent(&self, id: PaperRecordRequestId) -> PaperRecordResult<PaperRecordRequest> {
        self.in_transaction(|uow| {
            let now = Utc::now();
            let mut request = load_request(uow, id)?;
            request.mark_sent(now);
            uow.update_request(&request)?;

            let mut record = crate::repositories::record_of(uow, &request)?;
            if record.activate(now) {
                uow.update_record(&record)?;
                tracing::info!(
                    "paper record {} ({}) is now active",
                    record.id,
                    record.identifier
                );
            }
            Ok(request)
        })
    }

    /// Cancels an OPEN or ASSIGNED request.
    pub fn mark_request_cancelled(
        &self,
        id: PaperRecordRequestId,
    ) -> PaperRecordResult<PaperRecordRequest> {
        self.in_transaction(|uow| {
            let mut request = load_request(uow, id)?;
            request.cancel(Utc::now())?;
            uow.update_request(&request)?;
            Ok(request)
        })
    }

    /// Records that a SENT chart has come back to the archives.
    pub fn mark_request_returned(
        &self,
        id: PaperRecordRequestId,
    ) -> PaperRecordResult<PaperRecordRequest> {
        self.in_transaction(|uow| {
            let mut request = load_request(uow, id)?;
            request.mark_returned(Utc::now())?;
            uow.update_request(&request)?;
            Ok(request)
        })
    }

    // ------------------------------------------------------------------------
    // Location resolution
    // ------------------------------------------------------------------------

    /// The medical record location that owns charts for `location`.
    pub fn medical_record_location_for(&self, location: &LocationId) -> PaperRecordResult<LocationId> {
        self.locations
            .nearest_tagged_ancestor(location, self.cfg.medical_record_location_tag())
    }

    /// The archives room serving `location`'s medical record location.
    pub fn archives_location_for(&self, location: &LocationId) -> PaperRecordResult<LocationId> {
        let record_location = self.medical_record_location_for(location)?;
        self.locations
            .first_tagged_descendant(&record_location, self.cfg.archives_location_tag())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Runs `work` in one unit of work, committing on success.
    ///
    /// On error the unit is dropped uncommitted, which discards every write it made.
    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&mut dyn UnitOfWork) -> PaperRecordResult<T>,
    ) -> PaperRecordResult<T> {
        let mut uow = self.store.begin()?;
        match work(&mut *uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!("rolling back paper record transaction: {}", err);
                Err(err)
            }
        }
    }

    /// Runs read-only `work` against a fresh unit of work.
    fn read<T>(&self, work: impl FnOnce(&dyn UnitOfWork) -> PaperRecordResult<T>) -> PaperRecordResult<T> {
        let uow = self.store.begin()?;
        work(&*uow)
    }

    fn ensure_patient_known(&self, patient: PatientId) -> PaperRecordResult<()> {
        match self.patients.display_name(patient)? {
            Some(_) => Ok(()),
            None => Err(PaperRecordError::InvalidInput(format!(
                "unknown patient {patient}"
            ))),
        }
    }

    fn label_subject(
        &self,
        patient: PatientId,
        identifier: Option<Identifier>,
    ) -> PaperRecordResult<LabelSubject> {
        Ok(LabelSubject {
            patient,
            patient_name: self.patients.display_name(patient)?,
            identifier,
        })
    }
}

fn load_request(
    uow: &dyn UnitOfWork,
    id: PaperRecordRequestId,
) -> PaperRecordResult<PaperRecordRequest> {
    uow.request(id)?.ok_or(PaperRecordError::NotFound {
        entity: "paper record request",
        id: id.get(),
    })
}

fn load_record(uow: &dyn UnitOfWork, id: PaperRecordId) -> PaperRecordResult<PaperRecord> {
    uow.record(id)?.ok_or(PaperRecordError::NotFound {
        entity: "paper record",
        id: id.get(),
    })
}

//! Storage boundary for paper records, requests and merge requests.
//!
//! The core talks to storage through two traits:
//! - [`PaperRecordStore`] hands out units of work
//! - [`UnitOfWork`] is one transaction: reads see committed data plus the unit's own
//!   writes, [`UnitOfWork::commit`] publishes the writes, and dropping the unit without
//!   committing discards them
//!
//! The store enforces no uniqueness of its own. "One chart per identifier and location"
//! and "one pending request per patient and location" are kept by the core's locking.

pub mod memory;

use crate::model::{
    LocationId, MergeRequestStatus, NewPaperRecord, NewPaperRecordMergeRequest,
    NewPaperRecordRequest, PaperRecord, PaperRecordId, PaperRecordMergeRequest,
    PaperRecordMergeRequestId, PaperRecordRequest, PaperRecordRequestId, PatientId,
    RequestStatus,
};
use crate::PaperRecordResult;
use paper_record_types::Identifier;

/// Filter for request lookups. Unset fields match everything.
///
/// `patient`, `record_location` and `identifier` are matched against the owning record.
#[derive(Clone, Debug, Default)]
pub struct RequestQuery {
    pub statuses: Option<Vec<RequestStatus>>,
    pub patient: Option<PatientId>,
    pub record_location: Option<LocationId>,
    pub identifier: Option<Identifier>,
}

impl RequestQuery {
    pub fn with_statuses(statuses: &[RequestStatus]) -> Self {
        Self {
            statuses: Some(statuses.to_vec()),
            ..Self::default()
        }
    }

    pub fn patient(mut self, patient: PatientId) -> Self {
        self.patient = Some(patient);
        self
    }

    pub fn record_location(mut self, location: Option<LocationId>) -> Self {
        self.record_location = location;
        self
    }

    pub fn identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn matches(&self, request: &PaperRecordRequest, record: &PaperRecord) -> bool {
        self.statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&request.status))
            && self.patient.map_or(true, |p| record.patient == p)
            && self
                .record_location
                .as_ref()
                .map_or(true, |l| &record.record_location == l)
            && self
                .identifier
                .as_ref()
                .map_or(true, |i| &record.identifier == i)
    }
}

/// One transaction against the store.
///
/// Every list result is ordered by id, which is creation order.
pub trait UnitOfWork {
    fn find_requests(&self, query: &RequestQuery) -> PaperRecordResult<Vec<PaperRecordRequest>>;

    fn find_requests_for_record(
        &self,
        statuses: &[RequestStatus],
        record: PaperRecordId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>>;

    fn find_records(
        &self,
        patient: PatientId,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecord>>;

    fn find_record(
        &self,
        identifier: &Identifier,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Option<PaperRecord>>;

    fn find_merge_requests(
        &self,
        statuses: &[MergeRequestStatus],
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordMergeRequest>>;

    fn record(&self, id: PaperRecordId) -> PaperRecordResult<Option<PaperRecord>>;

    fn request(&self, id: PaperRecordRequestId) -> PaperRecordResult<Option<PaperRecordRequest>>;

    fn merge_request(
        &self,
        id: PaperRecordMergeRequestId,
    ) -> PaperRecordResult<Option<PaperRecordMergeRequest>>;

    fn insert_record(&mut self, record: NewPaperRecord) -> PaperRecordResult<PaperRecord>;

    fn update_record(&mut self, record: &PaperRecord) -> PaperRecordResult<()>;

    fn insert_request(
        &mut self,
        request: NewPaperRecordRequest,
    ) -> PaperRecordResult<PaperRecordRequest>;

    fn update_request(&mut self, request: &PaperRecordRequest) -> PaperRecordResult<()>;

    fn insert_merge_request(
        &mut self,
        merge_request: NewPaperRecordMergeRequest,
    ) -> PaperRecordResult<PaperRecordMergeRequest>;

    fn update_merge_request(
        &mut self,
        merge_request: &PaperRecordMergeRequest,
    ) -> PaperRecordResult<()>;

    /// Publishes every write made through this unit.
    fn commit(self: Box<Self>) -> PaperRecordResult<()>;
}

/// Source of units of work.
pub trait PaperRecordStore: Send + Sync {
    fn begin(&self) -> PaperRecordResult<Box<dyn UnitOfWork + '_>>;
}

/// Loads the record a request belongs to.
///
/// # Errors
///
/// Returns [`crate::PaperRecordError::IllegalState`] if the record does not exist, which
/// means the store holds a dangling reference.
pub fn record_of(
    uow: &dyn UnitOfWork,
    request: &PaperRecordRequest,
) -> PaperRecordResult<PaperRecord> {
    uow.record(request.paper_record)?.ok_or_else(|| {
        crate::PaperRecordError::IllegalState(format!(
            "paper record request {} refers to missing paper record {}",
            request.id, request.paper_record
        ))
    })
}

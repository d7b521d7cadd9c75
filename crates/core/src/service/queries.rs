//! Read-only lookups.
//!
//! Location arguments are resolved to their medical record location first. Lookups by
//! identifier try the chart number and fall back to the patient's primary identifier.

use super::PaperRecordService;
use crate::model::{
    LocationId, PaperRecord, PaperRecordId, PaperRecordMergeRequest, PaperRecordMergeRequestId,
    PaperRecordRequest, PaperRecordRequestId, PatientId, RequestStatus, PENDING_STATUSES,
};
use crate::patients::IdentifierKind;
use crate::repositories::{record_of, RequestQuery};
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::Identifier;

/// Whether a request is for an existing chart or one still to be made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Partition {
    ToPull,
    ToCreate,
}

impl PaperRecordService {
    pub fn get_paper_record(&self, id: PaperRecordId) -> PaperRecordResult<Option<PaperRecord>> {
        self.read(|uow| uow.record(id))
    }

    pub fn get_paper_record_request(
        &self,
        id: PaperRecordRequestId,
    ) -> PaperRecordResult<Option<PaperRecordRequest>> {
        self.read(|uow| uow.request(id))
    }

    pub fn get_paper_record_merge_request(
        &self,
        id: PaperRecordMergeRequestId,
    ) -> PaperRecordResult<Option<PaperRecordMergeRequest>> {
        self.read(|uow| uow.merge_request(id))
    }

    // ------------------------------------------------------------------------
    // Work lists
    // ------------------------------------------------------------------------

    pub fn open_requests_to_pull(
        &self,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.requests_in(RequestStatus::Open, Partition::ToPull, location)
    }

    pub fn open_requests_to_create(
        &self,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.requests_in(RequestStatus::Open, Partition::ToCreate, location)
    }

    pub fn assigned_requests_to_pull(
        &self,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.requests_in(RequestStatus::Assigned, Partition::ToPull, location)
    }

    pub fn assigned_requests_to_create(
        &self,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.requests_in(RequestStatus::Assigned, Partition::ToCreate, location)
    }

    pub fn get_paper_record_requests_for_patient(
        &self,
        patient: PatientId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.read(|uow| uow.find_requests(&RequestQuery::default().patient(patient)))
    }

    fn requests_in(
        &self,
        status: RequestStatus,
        partition: Partition,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        let record_location = self.resolve_optional(location)?;
        self.read(|uow| {
            let query = RequestQuery::with_statuses(&[status]).record_location(record_location);
            let mut found = Vec::new();
            for request in uow.find_requests(&query)? {
                let to_create = record_of(uow, &request)?.is_pending_creation();
                if to_create == (partition == Partition::ToCreate) {
                    found.push(request);
                }
            }
            Ok(found)
        })
    }

    // ------------------------------------------------------------------------
    // By identifier
    // ------------------------------------------------------------------------

    /// The single OPEN or ASSIGNED request matching `identifier`, if any.
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::IllegalState`] if more than one request matches.
    pub fn get_pending_paper_record_request_by_identifier(
        &self,
        identifier: &str,
        location: &LocationId,
    ) -> PaperRecordResult<Option<PaperRecordRequest>> {
        let found = self.requests_by_identifier(identifier, &PENDING_STATUSES, location)?;
        single(found, "pending", identifier)
    }

    pub fn get_assigned_paper_record_request_by_identifier(
        &self,
        identifier: &str,
        location: &LocationId,
    ) -> PaperRecordResult<Option<PaperRecordRequest>> {
        let found = self.requests_by_identifier(identifier, &[RequestStatus::Assigned], location)?;
        single(found, "assigned", identifier)
    }

    pub fn get_sent_paper_record_requests_by_identifier(
        &self,
        identifier: &str,
        location: &LocationId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        self.requests_by_identifier(identifier, &[RequestStatus::Sent], location)
    }

    /// The SENT request for `record` whose status changed last.
    pub fn get_most_recent_sent_paper_record_request(
        &self,
        record: PaperRecordId,
    ) -> PaperRecordResult<Option<PaperRecordRequest>> {
        self.read(|uow| {
            let sent = uow.find_requests_for_record(&[RequestStatus::Sent], record)?;
            Ok(sent.into_iter().max_by_key(|r| (r.date_status_changed, r.id)))
        })
    }

    fn requests_by_identifier(
        &self,
        identifier: &str,
        statuses: &[RequestStatus],
        location: &LocationId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        // A blank or malformed identifier cannot match anything.
        let Ok(identifier) = Identifier::new(identifier) else {
            return Ok(Vec::new());
        };
        let record_location = self.medical_record_location_for(location)?;

        let by_chart = self.read(|uow| {
            uow.find_requests(
                &RequestQuery::with_statuses(statuses)
                    .record_location(Some(record_location.clone()))
                    .identifier(identifier.clone()),
            )
        })?;
        if !by_chart.is_empty() {
            return Ok(by_chart);
        }

        match self.patient_by_primary_identifier(&identifier)? {
            Some(patient) => self.read(|uow| {
                uow.find_requests(
                    &RequestQuery::with_statuses(statuses)
                        .patient(patient)
                        .record_location(Some(record_location)),
                )
            }),
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    /// The patient's charts, optionally only those at `location`'s medical record
    /// location.
    pub fn get_paper_records(
        &self,
        patient: PatientId,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecord>> {
        let record_location = self.resolve_optional(location)?;
        self.read(|uow| uow.find_records(patient, record_location.as_ref()))
    }

    pub fn get_paper_record_by_identifier(
        &self,
        identifier: &Identifier,
        location: &LocationId,
    ) -> PaperRecordResult<Option<PaperRecord>> {
        let record_location = self.medical_record_location_for(location)?;
        self.read(|uow| uow.find_record(identifier, Some(&record_location)))
    }

    pub fn paper_record_exists_with_identifier(
        &self,
        identifier: &Identifier,
        location: &LocationId,
    ) -> PaperRecordResult<bool> {
        Ok(self
            .get_paper_record_by_identifier(identifier, location)?
            .is_some())
    }

    pub fn paper_record_exists_for_patient(
        &self,
        patient: PatientId,
        location: &LocationId,
    ) -> PaperRecordResult<bool> {
        Ok(!self.get_paper_records(patient, Some(location))?.is_empty())
    }

    /// Like [`Self::paper_record_exists_for_patient`], finding the patient by primary
    /// identifier. An unknown identifier yields `false`.
    pub fn paper_record_exists_for_patient_with_primary_identifier(
        &self,
        primary_identifier: &Identifier,
        location: &LocationId,
    ) -> PaperRecordResult<bool> {
        match self.patient_by_primary_identifier(primary_identifier)? {
            Some(patient) => self.paper_record_exists_for_patient(patient, location),
            None => Ok(false),
        }
    }

    /// Whether the chart number is already held by any patient at `location`'s medical
    /// record location, voided or not.
    pub fn paper_record_identifier_in_use(
        &self,
        identifier: &Identifier,
        location: &LocationId,
    ) -> PaperRecordResult<bool> {
        let record_location = self.medical_record_location_for(location)?;
        self.patients
            .identifier_in_use(identifier, IdentifierKind::PaperRecord, &record_location)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn resolve_optional(&self, location: Option<&LocationId>) -> PaperRecordResult<Option<LocationId>> {
        location
            .map(|l| self.medical_record_location_for(l))
            .transpose()
    }

    fn patient_by_primary_identifier(
        &self,
        identifier: &Identifier,
    ) -> PaperRecordResult<Option<PatientId>> {
        let patients = self
            .patients
            .patients_with_identifier(identifier, IdentifierKind::Primary)?;
        match patients.as_slice() {
            [] => Ok(None),
            [patient] => Ok(Some(*patient)),
            _ => Err(PaperRecordError::IllegalState(format!(
                "multiple patients found with identifier {identifier}"
            ))),
        }
    }
}

fn single(
    mut found: Vec<PaperRecordRequest>,
    status: &str,
    identifier: &str,
) -> PaperRecordResult<Option<PaperRecordRequest>> {
    if found.len() > 1 {
        return Err(PaperRecordError::IllegalState(format!(
            "duplicate {status} paper record requests with identifier {identifier}"
        )));
    }
    Ok(found.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewPaperRecordRequest;
    use crate::repositories::PaperRecordStore;
    use crate::test_support::{ident, loc, Fixture};
    use chrono::{Duration, Utc};

    #[test]
    fn test_work_lists_partition_by_record_status() {
        let fx = Fixture::new();
        let fresh_patient = fx.patient("Jean Louis", "P1");
        let known_patient = fx.patient("Marie", "P2");

        let known = fx
            .service
            .request_paper_record(known_patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        fx.service.mark_request_sent(known[0].id).unwrap();
        fx.service.mark_request_returned(known[0].id).unwrap();
        let pull = fx
            .service
            .request_paper_record(known_patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        let create = fx
            .service
            .request_paper_record(fresh_patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        let elsewhere = fx
            .service
            .request_paper_record(fresh_patient, &loc("Satellite Clinic"), &loc("Satellite Ward"), fx.clerk)
            .unwrap();

        let ids = |v: Vec<PaperRecordRequest>| v.into_iter().map(|r| r.id).collect::<Vec<_>>();

        assert_eq!(ids(fx.service.open_requests_to_pull(None).unwrap()), vec![pull[0].id]);
        assert_eq!(
            ids(fx.service.open_requests_to_create(None).unwrap()),
            vec![create[0].id, elsewhere[0].id]
        );
        assert_eq!(
            ids(fx.service.open_requests_to_create(Some(&loc("Outpatient"))).unwrap()),
            vec![create[0].id]
        );

        fx.service
            .assign_requests(&[pull[0].id], fx.clerk, &loc("Archives"))
            .unwrap();
        assert!(fx.service.open_requests_to_pull(None).unwrap().is_empty());
        assert_eq!(
            ids(fx.service.assigned_requests_to_pull(Some(&loc("Clinic 3"))).unwrap()),
            vec![pull[0].id]
        );
        assert!(fx.service.assigned_requests_to_create(None).unwrap().is_empty());
    }

    #[test]
    fn test_pending_by_chart_identifier_and_primary_fallback() {
        let fx = Fixture::new();
        let patient = fx.patient("Jean Louis", "P1");
        let requests = fx
            .service
            .request_paper_record(patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();

        let by_chart = fx
            .service
            .get_pending_paper_record_request_by_identifier("A000001", &loc("Clinic 3"))
            .unwrap();
        assert_eq!(by_chart.map(|r| r.id), Some(requests[0].id));

        let by_primary = fx
            .service
            .get_pending_paper_record_request_by_identifier("P1", &loc("Main Hospital"))
            .unwrap();
        assert_eq!(by_primary.map(|r| r.id), Some(requests[0].id));

        assert!(fx
            .service
            .get_pending_paper_record_request_by_identifier("", &loc("Main Hospital"))
            .unwrap()
            .is_none());
        assert!(fx
            .service
            .get_pending_paper_record_request_by_identifier("UNKNOWN", &loc("Main Hospital"))
            .unwrap()
            .is_none());
        assert!(fx
            .service
            .get_assigned_paper_record_request_by_identifier("A000001", &loc("Main Hospital"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_pending_requests_are_illegal_state() {
        let fx = Fixture::new();
        let patient = fx.patient("Jean Louis", "P1");
        let requests = fx
            .service
            .request_paper_record(patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();

        let mut uow = fx.store.begin().unwrap();
        uow.insert_request(NewPaperRecordRequest {
            paper_record: requests[0].paper_record,
            request_location: loc("Outpatient"),
            creator: fx.clerk,
            date_created: Utc::now(),
        })
        .unwrap();
        uow.commit().unwrap();

        let err = fx
            .service
            .get_pending_paper_record_request_by_identifier("A000001", &loc("Main Hospital"))
            .unwrap_err();
        assert!(matches!(err, PaperRecordError::IllegalState(_)));
    }

    #[test]
    fn test_sent_and_most_recent_sent() {
        let fx = Fixture::new();
        let patient = fx.patient("Jean Louis", "P1");
        let first = fx
            .service
            .request_paper_record(patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        fx.service.mark_request_sent(first[0].id).unwrap();
        let second = fx
            .service
            .request_paper_record(patient, &loc("Main Hospital"), &loc("Outpatient"), fx.clerk)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        fx.service.mark_request_sent(second[0].id).unwrap();

        let sent = fx
            .service
            .get_sent_paper_record_requests_by_identifier("A000001", &loc("Main Hospital"))
            .unwrap();
        assert_eq!(sent.len(), 2);

        let latest = fx
            .service
            .get_most_recent_sent_paper_record_request(first[0].paper_record)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second[0].id);
        assert!(latest.date_status_changed > Utc::now() - Duration::minutes(1));
    }

    #[test]
    fn test_existence_checks() {
        let fx = Fixture::new();
        let patient = fx.patient("Jean Louis", "P1");
        assert!(!fx
            .service
            .paper_record_exists_for_patient(patient, &loc("Clinic 3"))
            .unwrap());

        fx.service
            .create_paper_record(patient, &loc("Clinic 3"))
            .unwrap();

        assert!(fx
            .service
            .paper_record_exists_for_patient(patient, &loc("Outpatient"))
            .unwrap());
        assert!(!fx
            .service
            .paper_record_exists_for_patient(patient, &loc("Satellite Ward"))
            .unwrap());
        assert!(fx
            .service
            .paper_record_exists_with_identifier(&ident("A000001"), &loc("Main Hospital"))
            .unwrap());
        assert!(fx
            .service
            .paper_record_exists_for_patient_with_primary_identifier(&ident("P1"), &loc("Main Hospital"))
            .unwrap());
        assert!(!fx
            .service
            .paper_record_exists_for_patient_with_primary_identifier(&ident("P9"), &loc("Main Hospital"))
            .unwrap());
        assert!(fx
            .service
            .paper_record_identifier_in_use(&ident("A000001"), &loc("Clinic 3"))
            .unwrap());
        assert!(!fx
            .service
            .paper_record_identifier_in_use(&ident("A000001"), &loc("Satellite Clinic"))
            .unwrap());
    }

    #[test]
    fn test_records_for_patient_by_location() {
        let fx = Fixture::new();
        let patient = fx.patient("Jean Louis", "P1");
        fx.service
            .create_paper_record(patient, &loc("Main Hospital"))
            .unwrap();
        fx.service
            .create_paper_record(patient, &loc("Satellite Ward"))
            .unwrap();

        assert_eq!(fx.service.get_paper_records(patient, None).unwrap().len(), 2);
        let satellite = fx
            .service
            .get_paper_records(patient, Some(&loc("Satellite Ward")))
            .unwrap();
        assert_eq!(satellite.len(), 1);
        assert_eq!(satellite[0].record_location, loc("Satellite Clinic"));
        assert_eq!(
            fx.service
                .get_paper_record_by_identifier(&satellite[0].identifier, &loc("Satellite Clinic"))
                .unwrap()
                .map(|r| r.id),
            Some(satellite[0].id)
        );
    }
}

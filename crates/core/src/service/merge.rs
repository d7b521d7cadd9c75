//! Reconciliation when two patient identities are merged.
//!
//! The two charts still exist physically until staff combine them, so the merge only
//! clears in-flight work, moves charts that are out on the floor over to the surviving
//! record, and leaves an OPEN merge request behind for the archives room.

use super::{load_record, PaperRecordService};
use crate::constants::MERGE_VOID_REASON;
use crate::model::{
    LocationId, MergeRequestStatus, NewPaperRecordMergeRequest, PaperRecordId,
    PaperRecordMergeRequest, PaperRecordMergeRequestId, PersonId, RequestStatus, PENDING_STATUSES,
};
use crate::patients::IdentifierKind;
use crate::{PaperRecordError, PaperRecordResult};
use chrono::Utc;

impl PaperRecordService {
    /// Prepares two charts at the same location to be merged into `preferred`.
    ///
    /// Pending requests for either chart are cancelled, SENT requests of the losing chart
    /// are re-pointed at the preferred one, an OPEN merge request is created, and the
    /// losing chart number is voided in the patient registry.
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::RecordLocationMismatch`] if the charts belong to different
    /// locations. Nothing is changed in that case.
    pub fn mark_paper_records_for_merge(
        &self,
        preferred: PaperRecordId,
        not_preferred: PaperRecordId,
        creator: PersonId,
    ) -> PaperRecordResult<PaperRecordMergeRequest> {
        if preferred == not_preferred {
            return Err(PaperRecordError::InvalidInput(format!(
                "cannot merge paper record {preferred} into itself"
            )));
        }

        self.in_transaction(|uow| {
            let preferred = load_record(uow, preferred)?;
            let not_preferred = load_record(uow, not_preferred)?;
            if preferred.record_location != not_preferred.record_location {
                return Err(PaperRecordError::RecordLocationMismatch {
                    preferred_location: preferred.record_location,
                    not_preferred_location: not_preferred.record_location,
                });
            }

            let now = Utc::now();
            let mut cancelled = 0;
            for record in [preferred.id, not_preferred.id] {
                for mut request in uow.find_requests_for_record(&PENDING_STATUSES, record)? {
                    request.cancel(now)?;
                    uow.update_request(&request)?;
                    cancelled += 1;
                }
            }

            let mut moved = 0;
            for mut request in uow.find_requests_for_record(&[RequestStatus::Sent], not_preferred.id)? {
                request.paper_record = preferred.id;
                uow.update_request(&request)?;
                moved += 1;
            }

            let merge_request = uow.insert_merge_request(NewPaperRecordMergeRequest {
                preferred_paper_record: preferred.id,
                not_preferred_paper_record: not_preferred.id,
                creator,
                date_created: now,
            })?;

            // The losing number is unusable from the moment the merge is requested.
            self.patients.void_identifier(
                not_preferred.patient,
                &not_preferred.identifier,
                IdentifierKind::PaperRecord,
                MERGE_VOID_REASON,
            )?;

            tracing::info!(
                "merge request {}: {} into {} ({} pending cancelled, {} sent moved)",
                merge_request.id,
                not_preferred.identifier,
                preferred.identifier,
                cancelled,
                moved
            );
            Ok(merge_request)
        })
    }

    /// Confirms staff have physically combined the two charts.
    pub fn mark_paper_records_as_merged(
        &self,
        id: PaperRecordMergeRequestId,
    ) -> PaperRecordResult<PaperRecordMergeRequest> {
        self.in_transaction(|uow| {
            let mut merge_request = uow.merge_request(id)?.ok_or(PaperRecordError::NotFound {
                entity: "paper record merge request",
                id: id.get(),
            })?;
            merge_request.mark_merged()?;
            uow.update_merge_request(&merge_request)?;
            tracing::info!("merge request {} confirmed", merge_request.id);
            Ok(merge_request)
        })
    }

    /// Open merge requests at `location`'s medical record location.
    pub fn open_paper_record_merge_requests(
        &self,
        location: &LocationId,
    ) -> PaperRecordResult<Vec<PaperRecordMergeRequest>> {
        let record_location = self.medical_record_location_for(location)?;
        self.read(|uow| uow.find_merge_requests(&[MergeRequestStatus::Open], Some(&record_location)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaperRecordRequest;
    use crate::patients::PatientRegistry;
    use crate::test_support::{ident, loc, Fixture};

    struct MergeSetup {
        preferred: PaperRecordRequest,
        not_preferred: PaperRecordRequest,
        not_preferred_sent: PaperRecordRequest,
    }

    fn setup(fx: &Fixture) -> MergeSetup {
        let keep = fx.patient("Jean Louis", "P1");
        let lose = fx.patient("Jean-Louis", "P2");

        let not_preferred_sent = fx
            .service
            .request_paper_record(lose, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap()
            .remove(0);
        let not_preferred_sent = fx.service.mark_request_sent(not_preferred_sent.id).unwrap();

        let not_preferred = fx
            .service
            .request_paper_record(lose, &loc("Main Hospital"), &loc("Outpatient"), fx.clerk)
            .unwrap()
            .remove(0);
        let preferred = fx
            .service
            .request_paper_record(keep, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap()
            .remove(0);

        MergeSetup {
            preferred,
            not_preferred,
            not_preferred_sent,
        }
    }

    #[test]
    fn test_merge_cancels_pending_and_moves_sent() {
        let fx = Fixture::new();
        let s = setup(&fx);

        let merge = fx
            .service
            .mark_paper_records_for_merge(
                s.preferred.paper_record,
                s.not_preferred.paper_record,
                fx.clerk,
            )
            .unwrap();
        assert_eq!(merge.status, MergeRequestStatus::Open);
        assert_eq!(merge.creator, fx.clerk);

        for id in [s.preferred.id, s.not_preferred.id] {
            let request = fx.service.get_paper_record_request(id).unwrap().unwrap();
            assert_eq!(request.status, RequestStatus::Cancelled);
        }

        let moved = fx
            .service
            .get_paper_record_request(s.not_preferred_sent.id)
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, RequestStatus::Sent);
        assert_eq!(moved.paper_record, s.preferred.paper_record);

        let open = fx
            .service
            .open_paper_record_merge_requests(&loc("Clinic 3"))
            .unwrap();
        assert_eq!(open, vec![merge]);
    }

    #[test]
    fn test_merge_voids_losing_identifier() {
        let fx = Fixture::new();
        let s = setup(&fx);
        let losing = fx
            .service
            .get_paper_record(s.not_preferred.paper_record)
            .unwrap()
            .unwrap();

        fx.service
            .mark_paper_records_for_merge(
                s.preferred.paper_record,
                s.not_preferred.paper_record,
                fx.clerk,
            )
            .unwrap();

        assert!(fx
            .registry
            .identifier_for(losing.patient, IdentifierKind::PaperRecord, &loc("Main Hospital"))
            .unwrap()
            .is_none());
        let stored = fx.registry.patient(losing.patient).unwrap().unwrap();
        let voided = stored
            .identifiers
            .iter()
            .find(|i| i.identifier == losing.identifier)
            .unwrap();
        assert_eq!(voided.void_reason.as_deref(), Some(MERGE_VOID_REASON));
    }

    #[test]
    fn test_merge_across_locations_changes_nothing() {
        let fx = Fixture::new();
        let keep = fx.patient("Jean Louis", "P1");
        let lose = fx.patient("Jean-Louis", "P2");
        let here = fx
            .service
            .request_paper_record(keep, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap()
            .remove(0);
        let there = fx
            .service
            .request_paper_record(lose, &loc("Satellite Clinic"), &loc("Satellite Ward"), fx.clerk)
            .unwrap()
            .remove(0);

        let err = fx
            .service
            .mark_paper_records_for_merge(here.paper_record, there.paper_record, fx.clerk)
            .unwrap_err();
        assert!(matches!(err, PaperRecordError::RecordLocationMismatch { .. }));

        for id in [here.id, there.id] {
            let request = fx.service.get_paper_record_request(id).unwrap().unwrap();
            assert_eq!(request.status, RequestStatus::Open);
        }
        assert!(fx
            .service
            .open_paper_record_merge_requests(&loc("Main Hospital"))
            .unwrap()
            .is_empty());
        assert_eq!(
            fx.registry
                .identifier_for(lose, IdentifierKind::PaperRecord, &loc("Satellite Clinic"))
                .unwrap(),
            Some(ident("A000002"))
        );
    }

    #[test]
    fn test_confirm_merge_is_terminal() {
        let fx = Fixture::new();
        let s = setup(&fx);
        let merge = fx
            .service
            .mark_paper_records_for_merge(
                s.preferred.paper_record,
                s.not_preferred.paper_record,
                fx.clerk,
            )
            .unwrap();

        let merged = fx.service.mark_paper_records_as_merged(merge.id).unwrap();
        assert_eq!(merged.status, MergeRequestStatus::Merged);
        assert!(fx
            .service
            .open_paper_record_merge_requests(&loc("Main Hospital"))
            .unwrap()
            .is_empty());

        let err = fx.service.mark_paper_records_as_merged(merge.id).unwrap_err();
        assert!(matches!(err, PaperRecordError::InvalidTransition { .. }));
        assert_eq!(
            fx.service
                .get_paper_record_merge_request(merge.id)
                .unwrap()
                .unwrap()
                .status,
            MergeRequestStatus::Merged
        );
    }

    #[test]
    fn test_merge_into_itself_is_rejected() {
        let fx = Fixture::new();
        let s = setup(&fx);
        let err = fx
            .service
            .mark_paper_records_for_merge(s.preferred.paper_record, s.preferred.paper_record, fx.clerk)
            .unwrap_err();
        assert!(matches!(err, PaperRecordError::InvalidInput(_)));
    }

    #[test]
    fn test_request_after_merge_goes_to_preferred_record() {
        let fx = Fixture::new();
        let s = setup(&fx);
        let lose = fx
            .service
            .get_paper_record(s.not_preferred.paper_record)
            .unwrap()
            .unwrap()
            .patient;
        let keep = fx
            .service
            .get_paper_record(s.preferred.paper_record)
            .unwrap()
            .unwrap()
            .patient;
        let merge = fx
            .service
            .mark_paper_records_for_merge(
                s.preferred.paper_record,
                s.not_preferred.paper_record,
                fx.clerk,
            )
            .unwrap();

        let requested = fx
            .service
            .request_paper_record(lose, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].paper_record, s.preferred.paper_record);
        assert_eq!(requested[0].status, RequestStatus::Open);

        let again = fx
            .service
            .request_paper_record(keep, &loc("Main Hospital"), &loc("Outpatient"), fx.clerk)
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, requested[0].id);
        assert_eq!(again[0].request_location, loc("Outpatient"));

        fx.service.mark_paper_records_as_merged(merge.id).unwrap();
        let after_confirm = fx
            .service
            .request_paper_record(lose, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        assert_eq!(after_confirm.len(), 1);
        assert_eq!(after_confirm[0].id, requested[0].id);
        assert_eq!(after_confirm[0].paper_record, s.preferred.paper_record);
    }
}

//! Batch assignment of open requests to a staff member.
//!
//! Assignment is all-or-nothing. Labels are printed before each request moves to
//! ASSIGNED; if any print fails the whole batch is rolled back and the error lists the
//! charts whose labels did go out, so staff can pull those labels off the printer.

use super::{load_request, PaperRecordService};
use crate::model::{
    LocationId, PaperRecord, PaperRecordRequest, PaperRecordRequestId, PersonId, RequestStatus,
};
use crate::repositories::record_of;
use crate::{PaperRecordError, PaperRecordResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Outcome of a committed assignment batch, by chart identifier.
///
/// There is no per-chart error list. A label that fails to print aborts the batch with
/// [`PaperRecordError::AssignmentAborted`], so a report only exists when every OPEN request
/// was assigned. Requests that were not OPEN are reported under `skipped`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentReport {
    /// Requests now ASSIGNED, in input order.
    pub success: Vec<String>,
    /// Requests left alone because they were not OPEN.
    pub skipped: Vec<String>,
}

impl PaperRecordService {
    /// Assigns OPEN requests to `assignee`, printing labels at `location` for each.
    ///
    /// Requests that are not OPEN are skipped without error. Charts still pending
    /// creation get the full label set; existing charts get form labels only.
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::NotFound`] if any id is unknown (nothing is printed), and
    /// [`PaperRecordError::AssignmentAborted`] if a print fails part way through.
    pub fn assign_requests(
        &self,
        ids: &[PaperRecordRequestId],
        assignee: PersonId,
        location: &LocationId,
    ) -> PaperRecordResult<AssignmentReport> {
        let _guard = self.locks.lock_assignment();
        self.in_transaction(|uow| {
            for id in ids {
                load_request(uow, *id)?;
            }

            let mut report = AssignmentReport::default();
            let mut printed = Vec::new();
            for id in ids {
                // Reloaded per id so a repeated id sees its own earlier assignment.
                let mut request = load_request(uow, *id)?;
                let record = record_of(uow, &request)?;
                let identifier = record.identifier.to_string();

                if request.status != RequestStatus::Open {
                    tracing::debug!(
                        "skipping paper record request {} in status {}",
                        request.id,
                        request.status
                    );
                    report.skipped.push(identifier);
                    continue;
                }

                if let Err(err) = self.print_assignment_labels(&request, &record, location) {
                    tracing::warn!(
                        "assignment batch aborted at {}; labels already printed for {:?}",
                        identifier,
                        printed
                    );
                    return Err(PaperRecordError::AssignmentAborted {
                        failed_identifier: identifier,
                        printed_before_failure: printed,
                        source: Box::new(err),
                    });
                }
                printed.push(identifier.clone());

                request.assign(assignee, Utc::now())?;
                uow.update_request(&request)?;
                report.success.push(identifier);
            }

            tracing::info!(
                "assigned {} paper record request(s) to {}, skipped {}",
                report.success.len(),
                assignee,
                report.skipped.len()
            );
            Ok(report)
        })
    }

    fn print_assignment_labels(
        &self,
        request: &PaperRecordRequest,
        record: &PaperRecord,
        location: &LocationId,
    ) -> PaperRecordResult<()> {
        if record.is_pending_creation() {
            self.print_label_set_for(record, location)
        } else {
            tracing::debug!("printing form labels for request {}", request.id);
            self.print_form_labels_for(record, location, self.cfg.form_label_count())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelKind;
    use crate::test_support::{loc, Fixture, RecordingPrinter};

    /// One request for a brand new chart and one for a chart that already exists.
    fn two_open_requests(fx: &Fixture) -> (PaperRecordRequestId, PaperRecordRequestId) {
        let new_patient = fx.patient("Jean Louis", "P1");
        let known_patient = fx.patient("Marie Joseph", "P2");

        let known = fx
            .service
            .request_paper_record(known_patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();
        fx.service.mark_request_sent(known[0].id).unwrap();
        fx.service.mark_request_returned(known[0].id).unwrap();
        let known_again = fx
            .service
            .request_paper_record(known_patient, &loc("Main Hospital"), &loc("Outpatient"), fx.clerk)
            .unwrap();

        let fresh = fx
            .service
            .request_paper_record(new_patient, &loc("Main Hospital"), &loc("Clinic 3"), fx.clerk)
            .unwrap();

        (fresh[0].id, known_again[0].id)
    }

    #[test]
    fn test_full_label_set_for_new_chart_and_forms_for_existing() {
        let fx = Fixture::new();
        let (fresh, known) = two_open_requests(&fx);
        let assignee = PersonId::new();

        let report = fx
            .service
            .assign_requests(&[fresh, known], assignee, &loc("Archives"))
            .unwrap();

        assert_eq!(report.success.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(
            fx.printer.summary(),
            vec![
                (LabelKind::PaperRecord, 1),
                (LabelKind::PaperForm, 5),
                (LabelKind::IdCard, 1),
                (LabelKind::PaperForm, 5),
            ]
        );

        for id in [fresh, known] {
            let request = fx.service.get_paper_record_request(id).unwrap().unwrap();
            assert_eq!(request.status, RequestStatus::Assigned);
            assert_eq!(request.assignee, Some(assignee));
        }
    }

    #[test]
    fn test_non_open_requests_are_skipped() {
        let fx = Fixture::new();
        let (fresh, known) = two_open_requests(&fx);
        fx.service.mark_request_cancelled(known).unwrap();

        let report = fx
            .service
            .assign_requests(&[fresh, known, fresh], PersonId::new(), &loc("Archives"))
            .unwrap();

        assert_eq!(report.success.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        let cancelled = fx.service.get_paper_record_request(known).unwrap().unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(cancelled.assignee, None);
        // Only the first occurrence of `fresh` printed anything.
        assert_eq!(fx.printer.jobs().len(), 3);
    }

    #[test]
    fn test_print_failure_rolls_back_whole_batch() {
        // Calls 0..=2 are the first request's label set; call 3 is the second request's
        // form labels.
        let fx = Fixture::with_printer(RecordingPrinter::failing_on(3));
        let (fresh, known) = two_open_requests(&fx);
        let fresh_identifier = fx
            .service
            .get_paper_record_request(fresh)
            .unwrap()
            .map(|r| fx.service.get_paper_record(r.paper_record).unwrap().unwrap().identifier)
            .unwrap();

        let err = fx
            .service
            .assign_requests(&[fresh, known], PersonId::new(), &loc("Archives"))
            .unwrap_err();

        match &err {
            PaperRecordError::AssignmentAborted {
                printed_before_failure,
                source,
                ..
            } => {
                assert_eq!(printed_before_failure, &vec![fresh_identifier.to_string()]);
                assert!(matches!(**source, PaperRecordError::UnableToPrintLabel { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());

        for id in [fresh, known] {
            let request = fx.service.get_paper_record_request(id).unwrap().unwrap();
            assert_eq!(request.status, RequestStatus::Open);
            assert_eq!(request.assignee, None);
        }
    }

    #[test]
    fn test_unknown_id_aborts_before_printing() {
        let fx = Fixture::new();
        let (fresh, _) = two_open_requests(&fx);

        let err = fx
            .service
            .assign_requests(
                &[fresh, PaperRecordRequestId::new(9_999)],
                PersonId::new(),
                &loc("Archives"),
            )
            .unwrap_err();

        assert!(matches!(err, PaperRecordError::NotFound { id: 9_999, .. }));
        assert!(fx.printer.jobs().is_empty());
        let request = fx.service.get_paper_record_request(fresh).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Open);
    }

    #[test]
    fn test_report_serializes_with_success_and_skipped_keys() {
        let report = AssignmentReport {
            success: vec!["A000001".into()],
            skipped: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"][0], "A000001");
        assert!(json["skipped"].as_array().unwrap().is_empty());
        assert!(json.get("error").is_none());
    }
}

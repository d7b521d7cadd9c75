//! Label print operations.
//!
//! None of these change paper record state. The label set for a new chart is one chart
//! label, the configured number of form labels, and one ID card label, in that order.

use super::{load_request, PaperRecordService};
use crate::labels::LabelKind;
use crate::model::{LocationId, PaperRecord, PaperRecordRequestId, PatientId};
use crate::repositories::record_of;
use crate::PaperRecordResult;

impl PaperRecordService {
    pub fn print_paper_record_labels_for_request(
        &self,
        request: PaperRecordRequestId,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        let record = self.record_for_request(request)?;
        self.print_record_labels_for(&record, location, count)
    }

    /// Prints chart labels for every chart the patient has at `location`'s medical record
    /// location.
    pub fn print_paper_record_labels_for_patient(
        &self,
        patient: PatientId,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        for record in self.get_paper_records(patient, Some(location))? {
            self.print_record_labels_for(&record, location, count)?;
        }
        Ok(())
    }

    pub fn print_paper_form_labels_for_request(
        &self,
        request: PaperRecordRequestId,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        let record = self.record_for_request(request)?;
        self.print_form_labels_for(&record, location, count)
    }

    pub fn print_paper_form_labels_for_patient(
        &self,
        patient: PatientId,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        for record in self.get_paper_records(patient, Some(location))? {
            self.print_form_labels_for(&record, location, count)?;
        }
        Ok(())
    }

    pub fn print_id_card_label(&self, patient: PatientId, location: &LocationId) -> PaperRecordResult<()> {
        let subject = self.label_subject(patient, None)?;
        self.labels.print_labels(LabelKind::IdCard, &subject, location, 1)
    }

    /// Prints the full label set for the request's chart.
    pub fn print_paper_record_label_set(
        &self,
        request: PaperRecordRequestId,
        location: &LocationId,
    ) -> PaperRecordResult<()> {
        let record = self.record_for_request(request)?;
        self.print_label_set_for(&record, location)
    }

    pub(super) fn print_label_set_for(
        &self,
        record: &PaperRecord,
        location: &LocationId,
    ) -> PaperRecordResult<()> {
        self.print_record_labels_for(record, location, 1)?;
        self.print_form_labels_for(record, location, self.cfg.form_label_count())?;
        self.print_id_card_label(record.patient, location)
    }

    pub(super) fn print_form_labels_for(
        &self,
        record: &PaperRecord,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        let subject = self.label_subject(record.patient, Some(record.identifier.clone()))?;
        self.labels
            .print_labels(LabelKind::PaperForm, &subject, location, count)
    }

    fn print_record_labels_for(
        &self,
        record: &PaperRecord,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        let subject = self.label_subject(record.patient, Some(record.identifier.clone()))?;
        self.labels
            .print_labels(LabelKind::PaperRecord, &subject, location, count)
    }

    fn record_for_request(&self, request: PaperRecordRequestId) -> PaperRecordResult<PaperRecord> {
        self.read(|uow| {
            let request = load_request(uow, request)?;
            record_of(uow, &request)
        })
    }
}

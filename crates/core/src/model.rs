//! Paper record entities and their state machines.
//!
//! Three entity kinds are tracked:
//! - [`PaperRecord`]: one physical chart at one medical record location
//! - [`PaperRecordRequest`]: one "someone wants this chart" workflow
//! - [`PaperRecordMergeRequest`]: a pending physical merge of two charts
//!
//! All status changes go through the transition methods on each entity. A transition that
//! is not allowed returns [`PaperRecordError::InvalidTransition`] and leaves the entity
//! untouched.

use crate::{PaperRecordError, PaperRecordResult};
use chrono::{DateTime, Utc};
use paper_record_types::{Identifier, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

store_id!(
    /// Store-allocated id of a [`PaperRecord`].
    PaperRecordId
);
store_id!(
    /// Store-allocated id of a [`PaperRecordRequest`]. Ids increase with creation order.
    PaperRecordRequestId
);
store_id!(
    /// Store-allocated id of a [`PaperRecordMergeRequest`].
    PaperRecordMergeRequestId
);

/// A patient known to the patient registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(Uuid);

impl PatientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PatientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A member of staff: request creators and assignees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(Uuid);

impl PersonId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PersonId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A named location in the facility (ward, clinic, archives room, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(NonEmptyText);

impl LocationId {
    pub fn new(name: impl AsRef<str>) -> PaperRecordResult<Self> {
        Ok(Self(NonEmptyText::new(name)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PAPER RECORD
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaperRecordStatus {
    /// The chart has been requested but not yet physically made.
    PendingCreation,
    Active,
}

impl fmt::Display for PaperRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaperRecordStatus::PendingCreation => "PENDING_CREATION",
            PaperRecordStatus::Active => "ACTIVE",
        };
        f.write_str(s)
    }
}

/// One physical chart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: PaperRecordId,
    pub patient: PatientId,
    /// Chart tracking number, unique per record location.
    pub identifier: Identifier,
    pub record_location: LocationId,
    pub status: PaperRecordStatus,
    pub date_created: DateTime<Utc>,
    pub date_status_changed: DateTime<Utc>,
}

impl PaperRecord {
    pub fn is_pending_creation(&self) -> bool {
        self.status == PaperRecordStatus::PendingCreation
    }

    /// Marks the chart as physically existing.
    ///
    /// Returns `true` if the status changed. Already active records are left alone, so
    /// the record never returns to `PENDING_CREATION`.
    pub fn activate(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == PaperRecordStatus::Active {
            return false;
        }
        self.status = PaperRecordStatus::Active;
        self.date_status_changed = at;
        true
    }
}

/// Fields of a record before the store has given it an id.
#[derive(Clone, Debug)]
pub struct NewPaperRecord {
    pub patient: PatientId,
    pub identifier: Identifier,
    pub record_location: LocationId,
    pub date_created: DateTime<Utc>,
}

// ============================================================================
// PAPER RECORD REQUEST
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Assigned,
    Sent,
    Returned,
    Cancelled,
}

/// Requests that are neither dispatched nor finished.
pub const PENDING_STATUSES: [RequestStatus; 2] = [RequestStatus::Open, RequestStatus::Assigned];

impl RequestStatus {
    pub fn is_pending(&self) -> bool {
        PENDING_STATUSES.contains(self)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::Assigned => "ASSIGNED",
            RequestStatus::Sent => "SENT",
            RequestStatus::Returned => "RETURNED",
            RequestStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// One workflow instance asking for a chart to be pulled (or made) and sent somewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecordRequest {
    pub id: PaperRecordRequestId,
    pub paper_record: PaperRecordId,
    pub status: RequestStatus,
    pub request_location: LocationId,
    pub assignee: Option<PersonId>,
    pub creator: PersonId,
    pub date_created: DateTime<Utc>,
    pub date_status_changed: DateTime<Utc>,
}

impl PaperRecordRequest {
    fn transition(
        &mut self,
        allowed_from: &[RequestStatus],
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> PaperRecordResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(PaperRecordError::InvalidTransition {
                entity: "paper record request",
                id: self.id.get(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.date_status_changed = at;
        Ok(())
    }

    /// OPEN → ASSIGNED, recording who will pull the chart.
    pub fn assign(&mut self, assignee: PersonId, at: DateTime<Utc>) -> PaperRecordResult<()> {
        self.transition(&[RequestStatus::Open], RequestStatus::Assigned, at)?;
        self.assignee = Some(assignee);
        Ok(())
    }

    /// OPEN or ASSIGNED → CANCELLED.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> PaperRecordResult<()> {
        self.transition(&PENDING_STATUSES, RequestStatus::Cancelled, at)
    }

    /// Any status → SENT.
    ///
    /// A chart that physically leaves the archives is recorded as sent even if its request
    /// had already expired or been cancelled. The caller activates the owning record.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Sent;
        self.date_status_changed = at;
    }

    /// SENT → RETURNED.
    pub fn mark_returned(&mut self, at: DateTime<Utc>) -> PaperRecordResult<()> {
        self.transition(&[RequestStatus::Sent], RequestStatus::Returned, at)
    }
}

/// Fields of a request before the store has given it an id. New requests are always OPEN.
#[derive(Clone, Debug)]
pub struct NewPaperRecordRequest {
    pub paper_record: PaperRecordId,
    pub request_location: LocationId,
    pub creator: PersonId,
    pub date_created: DateTime<Utc>,
}

// ============================================================================
// MERGE REQUEST
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeRequestStatus {
    Open,
    Merged,
}

impl fmt::Display for MergeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeRequestStatus::Open => f.write_str("OPEN"),
            MergeRequestStatus::Merged => f.write_str("MERGED"),
        }
    }
}

/// Administrative note that two charts must be physically combined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecordMergeRequest {
    pub id: PaperRecordMergeRequestId,
    pub preferred_paper_record: PaperRecordId,
    pub not_preferred_paper_record: PaperRecordId,
    pub status: MergeRequestStatus,
    pub creator: PersonId,
    pub date_created: DateTime<Utc>,
}

impl PaperRecordMergeRequest {
    /// OPEN → MERGED. Staff have combined the two charts.
    pub fn mark_merged(&mut self) -> PaperRecordResult<()> {
        if self.status != MergeRequestStatus::Open {
            return Err(PaperRecordError::InvalidTransition {
                entity: "paper record merge request",
                id: self.id.get(),
                from: self.status.to_string(),
                to: MergeRequestStatus::Merged.to_string(),
            });
        }
        self.status = MergeRequestStatus::Merged;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct NewPaperRecordMergeRequest {
    pub preferred_paper_record: PaperRecordId,
    pub not_preferred_paper_record: PaperRecordId,
    pub creator: PersonId,
    pub date_created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: RequestStatus) -> PaperRecordRequest {
        let now = Utc::now();
        PaperRecordRequest {
            id: PaperRecordRequestId::new(1),
            paper_record: PaperRecordId::new(1),
            status,
            request_location: LocationId::new("Outpatient Clinic").unwrap(),
            assignee: None,
            creator: PersonId::new(),
            date_created: now,
            date_status_changed: now,
        }
    }

    fn record(status: PaperRecordStatus) -> PaperRecord {
        let now = Utc::now();
        PaperRecord {
            id: PaperRecordId::new(1),
            patient: PatientId::new(),
            identifier: Identifier::new("A000001").unwrap(),
            record_location: LocationId::new("Main Hospital").unwrap(),
            status,
            date_created: now,
            date_status_changed: now,
        }
    }

    #[test]
    fn test_assign_sets_assignee_from_open() {
        let mut req = request(RequestStatus::Open);
        let assignee = PersonId::new();
        req.assign(assignee, Utc::now()).unwrap();
        assert_eq!(req.status, RequestStatus::Assigned);
        assert_eq!(req.assignee, Some(assignee));
    }

    #[test]
    fn test_assign_rejected_unless_open() {
        for status in [
            RequestStatus::Assigned,
            RequestStatus::Sent,
            RequestStatus::Returned,
            RequestStatus::Cancelled,
        ] {
            let mut req = request(status);
            let err = req.assign(PersonId::new(), Utc::now()).unwrap_err();
            assert!(matches!(err, PaperRecordError::InvalidTransition { .. }));
            assert_eq!(req.status, status);
            assert_eq!(req.assignee, None);
        }
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut open = request(RequestStatus::Open);
        open.cancel(Utc::now()).unwrap();
        assert_eq!(open.status, RequestStatus::Cancelled);

        let mut assigned = request(RequestStatus::Assigned);
        assigned.cancel(Utc::now()).unwrap();
        assert_eq!(assigned.status, RequestStatus::Cancelled);

        let mut sent = request(RequestStatus::Sent);
        assert!(sent.cancel(Utc::now()).is_err());
        assert_eq!(sent.status, RequestStatus::Sent);
    }

    #[test]
    fn test_returned_only_from_sent() {
        let mut sent = request(RequestStatus::Sent);
        sent.mark_returned(Utc::now()).unwrap();
        assert_eq!(sent.status, RequestStatus::Returned);

        let mut open = request(RequestStatus::Open);
        assert!(open.mark_returned(Utc::now()).is_err());
    }

    #[test]
    fn test_transition_stamps_status_change_date() {
        let mut req = request(RequestStatus::Open);
        let later = req.date_status_changed + chrono::Duration::minutes(5);
        req.mark_sent(later);
        assert_eq!(req.date_status_changed, later);
    }

    #[test]
    fn test_mark_sent_from_any_status() {
        for status in [
            RequestStatus::Open,
            RequestStatus::Assigned,
            RequestStatus::Sent,
            RequestStatus::Returned,
            RequestStatus::Cancelled,
        ] {
            let mut req = request(status);
            req.mark_sent(Utc::now());
            assert_eq!(req.status, RequestStatus::Sent);
        }
    }

    #[test]
    fn test_record_activation_is_one_way() {
        let mut rec = record(PaperRecordStatus::PendingCreation);
        assert!(rec.activate(Utc::now()));
        assert_eq!(rec.status, PaperRecordStatus::Active);
        assert!(!rec.activate(Utc::now()));
        assert_eq!(rec.status, PaperRecordStatus::Active);
    }

    #[test]
    fn test_merge_request_merged_is_terminal() {
        let mut merge = PaperRecordMergeRequest {
            id: PaperRecordMergeRequestId::new(3),
            preferred_paper_record: PaperRecordId::new(1),
            not_preferred_paper_record: PaperRecordId::new(2),
            status: MergeRequestStatus::Open,
            creator: PersonId::new(),
            date_created: Utc::now(),
        };
        merge.mark_merged().unwrap();
        assert_eq!(merge.status, MergeRequestStatus::Merged);
        assert!(merge.mark_merged().is_err());
    }

    #[test]
    fn test_status_wire_names() {
        let s = serde_json::to_string(&PaperRecordStatus::PendingCreation).unwrap();
        assert_eq!(s, "\"PENDING_CREATION\"");
        let s = serde_json::to_string(&RequestStatus::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }

    #[test]
    fn test_location_id_rejects_blank() {
        assert!(LocationId::new("  ").is_err());
    }
}

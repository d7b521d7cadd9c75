//! Cancellation of stale pending requests.
//!
//! Pull and create requests expire separately because making a new chart usually takes
//! longer than pulling an existing one, so callers run the two sweeps with different
//! cutoffs.

use super::PaperRecordService;
use crate::model::{PaperRecordRequestId, PENDING_STATUSES};
use crate::repositories::{record_of, RequestQuery, UnitOfWork};
use crate::PaperRecordResult;
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sweep {
    Pull,
    Create,
}

impl PaperRecordService {
    /// Cancels pending requests for existing charts created strictly before `cutoff`.
    pub fn expire_pending_pull_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaperRecordResult<Vec<PaperRecordRequestId>> {
        self.in_transaction(|uow| expire(uow, Sweep::Pull, cutoff))
    }

    /// Cancels pending requests for charts still to be made, created strictly before
    /// `cutoff`.
    pub fn expire_pending_create_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaperRecordResult<Vec<PaperRecordRequestId>> {
        self.in_transaction(|uow| expire(uow, Sweep::Create, cutoff))
    }
}

fn expire(
    uow: &mut dyn UnitOfWork,
    sweep: Sweep,
    cutoff: DateTime<Utc>,
) -> PaperRecordResult<Vec<PaperRecordRequestId>> {
    let now = Utc::now();
    let mut expired = Vec::new();

    for mut request in uow.find_requests(&RequestQuery::with_statuses(&PENDING_STATUSES))? {
        if request.date_created >= cutoff {
            continue;
        }
        let record = record_of(uow, &request)?;
        let wanted = match sweep {
            Sweep::Pull => !record.is_pending_creation(),
            Sweep::Create => record.is_pending_creation(),
        };
        if !wanted {
            continue;
        }

        request.cancel(now)?;
        uow.update_request(&request)?;
        expired.push(request.id);
    }

    if !expired.is_empty() {
        tracing::info!(
            "expired {} pending {:?} request(s) created before {}",
            expired.len(),
            sweep,
            cutoff
        );
    }
    Ok(expired)
}

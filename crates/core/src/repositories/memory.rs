//! In-process implementation of the storage boundary.
//!
//! Committed rows live in one table set behind a mutex. A unit of work keeps its own write
//! set; reads overlay that write set on the committed rows, and commit copies the write
//! set in under the mutex in one step. The mutex is never held while caller code runs, so
//! long operations (label printing) do not block unrelated transactions.
//!
//! Every committed row carries a version. A unit remembers the version of each row the
//! first time it reads it, and commit fails with [`PaperRecordError::Conflict`] if a row
//! it writes has been committed by someone else since then. Nothing is applied in that
//! case.
//!
//! Ids come from one shared sequence and are used up even if the unit of work is rolled
//! back, the same way database sequences behave.

use super::{PaperRecordStore, RequestQuery, UnitOfWork};
use crate::model::{
    LocationId, MergeRequestStatus, NewPaperRecord, NewPaperRecordMergeRequest,
    NewPaperRecordRequest, PaperRecord, PaperRecordId, PaperRecordMergeRequest,
    PaperRecordMergeRequestId, PaperRecordRequest, PaperRecordRequestId, PaperRecordStatus,
    PatientId, RequestStatus,
};
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::Identifier;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Serializable copy of every committed row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub next_id: u64,
    pub paper_records: Vec<PaperRecord>,
    pub paper_record_requests: Vec<PaperRecordRequest>,
    pub paper_record_merge_requests: Vec<PaperRecordMergeRequest>,
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    records: BTreeMap<PaperRecordId, PaperRecord>,
    requests: BTreeMap<PaperRecordRequestId, PaperRecordRequest>,
    merge_requests: BTreeMap<PaperRecordMergeRequestId, PaperRecordMergeRequest>,
    // Keyed by raw id; all three tables share one id sequence. Absent means 0.
    versions: BTreeMap<u64, u64>,
}

impl Tables {
    fn version(&self, id: u64) -> u64 {
        self.versions.get(&id).copied().unwrap_or(0)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a snapshot.
    ///
    /// The id sequence resumes after the largest id present, even if the snapshot's
    /// `next_id` is behind.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let max_id = snapshot
            .paper_records
            .iter()
            .map(|r| r.id.get())
            .chain(snapshot.paper_record_requests.iter().map(|r| r.id.get()))
            .chain(snapshot.paper_record_merge_requests.iter().map(|m| m.id.get()))
            .max()
            .unwrap_or(0);

        let tables = Tables {
            next_id: snapshot.next_id.max(max_id),
            records: snapshot
                .paper_records
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            requests: snapshot
                .paper_record_requests
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            merge_requests: snapshot
                .paper_record_merge_requests
                .into_iter()
                .map(|m| (m.id, m))
                .collect(),
            versions: BTreeMap::new(),
        };

        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Copies out every committed row.
    pub fn snapshot(&self) -> PaperRecordResult<StoreSnapshot> {
        let tables = self.tables()?;
        Ok(StoreSnapshot {
            next_id: tables.next_id,
            paper_records: tables.records.values().cloned().collect(),
            paper_record_requests: tables.requests.values().cloned().collect(),
            paper_record_merge_requests: tables.merge_requests.values().cloned().collect(),
        })
    }

    fn tables(&self) -> PaperRecordResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PaperRecordError::Storage("store mutex poisoned".into()))
    }

    fn allocate_id(&self) -> PaperRecordResult<u64> {
        let mut tables = self.tables()?;
        tables.next_id += 1;
        Ok(tables.next_id)
    }
}

impl PaperRecordStore for InMemoryStore {
    fn begin(&self) -> PaperRecordResult<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self,
            records: BTreeMap::new(),
            requests: BTreeMap::new(),
            merge_requests: BTreeMap::new(),
            seen: RefCell::new(BTreeMap::new()),
        }))
    }
}

struct MemoryUnitOfWork<'a> {
    store: &'a InMemoryStore,
    records: BTreeMap<PaperRecordId, PaperRecord>,
    requests: BTreeMap<PaperRecordRequestId, PaperRecordRequest>,
    merge_requests: BTreeMap<PaperRecordMergeRequestId, PaperRecordMergeRequest>,
    /// Row version at first read, by raw id.
    seen: RefCell<BTreeMap<u64, u64>>,
}

/// Committed rows with this unit's writes laid over them, in id order.
fn overlay<'v, K: Ord + Copy, V>(
    committed: &'v BTreeMap<K, V>,
    written: &'v BTreeMap<K, V>,
) -> impl Iterator<Item = &'v V> {
    let mut merged: BTreeMap<K, &V> = committed.iter().map(|(k, v)| (*k, v)).collect();
    merged.extend(written.iter().map(|(k, v)| (*k, v)));
    merged.into_values()
}

impl MemoryUnitOfWork<'_> {
    fn saw(&self, tables: &Tables, id: u64) {
        self.seen
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| tables.version(id));
    }

    fn record_in<'s>(&'s self, tables: &'s Tables, id: PaperRecordId) -> Option<&'s PaperRecord> {
        self.records.get(&id).or_else(|| tables.records.get(&id))
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn find_requests(&self, query: &RequestQuery) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        let tables = self.store.tables()?;
        let mut found = Vec::new();
        for request in overlay(&tables.requests, &self.requests) {
            let Some(record) = self.record_in(&tables, request.paper_record) else {
                continue;
            };
            if query.matches(request, record) {
                self.saw(&tables, request.id.get());
                found.push(request.clone());
            }
        }
        Ok(found)
    }

    fn find_requests_for_record(
        &self,
        statuses: &[RequestStatus],
        record: PaperRecordId,
    ) -> PaperRecordResult<Vec<PaperRecordRequest>> {
        let tables = self.store.tables()?;
        let found: Vec<PaperRecordRequest> = overlay(&tables.requests, &self.requests)
            .filter(|r| r.paper_record == record && statuses.contains(&r.status))
            .cloned()
            .collect();
        for request in &found {
            self.saw(&tables, request.id.get());
        }
        Ok(found)
    }

    fn find_records(
        &self,
        patient: PatientId,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecord>> {
        let tables = self.store.tables()?;
        let found: Vec<PaperRecord> = overlay(&tables.records, &self.records)
            .filter(|r| r.patient == patient)
            .filter(|r| location.map_or(true, |l| &r.record_location == l))
            .cloned()
            .collect();
        for record in &found {
            self.saw(&tables, record.id.get());
        }
        Ok(found)
    }

    fn find_record(
        &self,
        identifier: &Identifier,
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Option<PaperRecord>> {
        let tables = self.store.tables()?;
        let mut matches = overlay(&tables.records, &self.records)
            .filter(|r| &r.identifier == identifier)
            .filter(|r| location.map_or(true, |l| &r.record_location == l));

        let first = matches.next().cloned();
        if location.is_some() && matches.next().is_some() {
            return Err(PaperRecordError::IllegalState(format!(
                "more than one paper record with identifier {identifier}"
            )));
        }
        if let Some(record) = &first {
            self.saw(&tables, record.id.get());
        }
        Ok(first)
    }

    fn find_merge_requests(
        &self,
        statuses: &[MergeRequestStatus],
        location: Option<&LocationId>,
    ) -> PaperRecordResult<Vec<PaperRecordMergeRequest>> {
        let tables = self.store.tables()?;
        let mut found = Vec::new();
        for merge in overlay(&tables.merge_requests, &self.merge_requests) {
            if !statuses.contains(&merge.status) {
                continue;
            }
            if let Some(location) = location {
                let at_location = self
                    .record_in(&tables, merge.preferred_paper_record)
                    .is_some_and(|r| &r.record_location == location);
                if !at_location {
                    continue;
                }
            }
            self.saw(&tables, merge.id.get());
            found.push(merge.clone());
        }
        Ok(found)
    }

    fn record(&self, id: PaperRecordId) -> PaperRecordResult<Option<PaperRecord>> {
        let tables = self.store.tables()?;
        let found = self.record_in(&tables, id).cloned();
        if found.is_some() {
            self.saw(&tables, id.get());
        }
        Ok(found)
    }

    fn request(&self, id: PaperRecordRequestId) -> PaperRecordResult<Option<PaperRecordRequest>> {
        if let Some(request) = self.requests.get(&id) {
            return Ok(Some(request.clone()));
        }
        let tables = self.store.tables()?;
        let found = tables.requests.get(&id).cloned();
        if found.is_some() {
            self.saw(&tables, id.get());
        }
        Ok(found)
    }

    fn merge_request(
        &self,
        id: PaperRecordMergeRequestId,
    ) -> PaperRecordResult<Option<PaperRecordMergeRequest>> {
        if let Some(merge) = self.merge_requests.get(&id) {
            return Ok(Some(merge.clone()));
        }
        let tables = self.store.tables()?;
        let found = tables.merge_requests.get(&id).cloned();
        if found.is_some() {
            self.saw(&tables, id.get());
        }
        Ok(found)
    }

    fn insert_record(&mut self, record: NewPaperRecord) -> PaperRecordResult<PaperRecord> {
        let id = PaperRecordId::new(self.store.allocate_id()?);
        let row = PaperRecord {
            id,
            patient: record.patient,
            identifier: record.identifier,
            record_location: record.record_location,
            status: PaperRecordStatus::PendingCreation,
            date_created: record.date_created,
            date_status_changed: record.date_created,
        };
        self.records.insert(id, row.clone());
        Ok(row)
    }

    fn update_record(&mut self, record: &PaperRecord) -> PaperRecordResult<()> {
        if self.record(record.id)?.is_none() {
            return Err(PaperRecordError::NotFound {
                entity: "paper record",
                id: record.id.get(),
            });
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn insert_request(
        &mut self,
        request: NewPaperRecordRequest,
    ) -> PaperRecordResult<PaperRecordRequest> {
        if self.record(request.paper_record)?.is_none() {
            return Err(PaperRecordError::NotFound {
                entity: "paper record",
                id: request.paper_record.get(),
            });
        }
        let id = PaperRecordRequestId::new(self.store.allocate_id()?);
        let row = PaperRecordRequest {
            id,
            paper_record: request.paper_record,
            status: RequestStatus::Open,
            request_location: request.request_location,
            assignee: None,
            creator: request.creator,
            date_created: request.date_created,
            date_status_changed: request.date_created,
        };
        self.requests.insert(id, row.clone());
        Ok(row)
    }

    fn update_request(&mut self, request: &PaperRecordRequest) -> PaperRecordResult<()> {
        if self.request(request.id)?.is_none() {
            return Err(PaperRecordError::NotFound {
                entity: "paper record request",
                id: request.id.get(),
            });
        }
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    fn insert_merge_request(
        &mut self,
        merge_request: NewPaperRecordMergeRequest,
    ) -> PaperRecordResult<PaperRecordMergeRequest> {
        let id = PaperRecordMergeRequestId::new(self.store.allocate_id()?);
        let row = PaperRecordMergeRequest {
            id,
            preferred_paper_record: merge_request.preferred_paper_record,
            not_preferred_paper_record: merge_request.not_preferred_paper_record,
            status: MergeRequestStatus::Open,
            creator: merge_request.creator,
            date_created: merge_request.date_created,
        };
        self.merge_requests.insert(id, row.clone());
        Ok(row)
    }

    fn update_merge_request(
        &mut self,
        merge_request: &PaperRecordMergeRequest,
    ) -> PaperRecordResult<()> {
        if self.merge_request(merge_request.id)?.is_none() {
            return Err(PaperRecordError::NotFound {
                entity: "paper record merge request",
                id: merge_request.id.get(),
            });
        }
        self.merge_requests
            .insert(merge_request.id, merge_request.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> PaperRecordResult<()> {
        let this = *self;
        let seen = this.seen.into_inner();
        let mut tables = this.store.tables()?;

        let written: Vec<u64> = this
            .records
            .keys()
            .map(|id| id.get())
            .chain(this.requests.keys().map(|id| id.get()))
            .chain(this.merge_requests.keys().map(|id| id.get()))
            .collect();
        for id in &written {
            if let Some(read) = seen.get(id) {
                if tables.version(*id) != *read {
                    return Err(PaperRecordError::Conflict(format!(
                        "row {id} was committed by another transaction after it was read"
                    )));
                }
            }
        }
        for id in written {
            *tables.versions.entry(id).or_insert(0) += 1;
        }

        tables.records.extend(this.records);
        tables.requests.extend(this.requests);
        tables.merge_requests.extend(this.merge_requests);
        Ok(())
    }
}

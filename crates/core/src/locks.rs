//! Process-wide exclusive sections.
//!
//! Two scopes exist:
//! - **per patient**: wraps "create paper record" and "request paper record" so two callers
//!   cannot both decide a chart or a pending request is missing and create one each
//! - **assignment**: wraps the whole batch assignment so no request is assigned (and its
//!   labels printed) twice
//!
//! A lock is always taken before the store transaction begins and released after it has
//! committed or rolled back. Nothing here spans processes.
//!
//! Patient entries are reference counted. The entry is created on first use and removed
//! when its last holder releases with nobody queued behind it, so the table only ever
//! contains patients that are being worked on right now.

use crate::model::PatientId;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct PatientSlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Registry of per-patient sections plus the single assignment section.
#[derive(Default)]
pub struct LockRegistry {
    patients: Mutex<HashMap<PatientId, Arc<PatientSlot>>>,
    assignment: Mutex<()>,
}

// The guarded data is either `()` or a plain flag/table that is never left half-updated,
// so a panic in some other holder does not make it unusable.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the calling thread holds the exclusive section for `patient`.
    pub fn lock_patient(&self, patient: PatientId) -> PatientLockGuard<'_> {
        let slot = {
            let mut table = lock_recover(&self.patients);
            Arc::clone(table.entry(patient).or_default())
        };

        let mut held = lock_recover(&slot.held);
        while *held {
            tracing::trace!("waiting for patient lock {}", patient);
            held = slot
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        drop(held);

        PatientLockGuard {
            registry: self,
            patient,
            slot: Some(slot),
        }
    }

    /// Blocks until the calling thread holds the system-wide assignment section.
    pub fn lock_assignment(&self) -> AssignmentLockGuard<'_> {
        AssignmentLockGuard {
            _guard: lock_recover(&self.assignment),
        }
    }

    /// Number of patients that currently have a holder or a waiter.
    pub fn tracked_patients(&self) -> usize {
        lock_recover(&self.patients).len()
    }
}

/// Holds a patient's exclusive section until dropped.
pub struct PatientLockGuard<'a> {
    registry: &'a LockRegistry,
    patient: PatientId,
    slot: Option<Arc<PatientSlot>>,
}

impl PatientLockGuard<'_> {
    pub fn patient(&self) -> PatientId {
        self.patient
    }
}

impl Drop for PatientLockGuard<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        *lock_recover(&slot.held) = false;
        slot.released.notify_one();

        // All clones and drops of slot handles happen under the table lock, so the count
        // seen here is exact: 1 means only the table still refers to the slot.
        let mut table = lock_recover(&self.registry.patients);
        drop(slot);
        if table
            .get(&self.patient)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(&self.patient);
        }
    }
}

/// Holds the assignment section until dropped.
pub struct AssignmentLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

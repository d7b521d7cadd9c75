//! Shared fixtures for the in-crate tests.

use crate::config::{CoreConfig, PrintPacing};
use crate::constants::{ARCHIVES_LOCATION_TAG, MEDICAL_RECORD_LOCATION_TAG};
use crate::labels::{LabelKind, LabelPrinter, PlainTextLabelRenderer, PrintJob, PrinterError};
use crate::locations::LocationTree;
use crate::model::{LocationId, PatientId, PersonId};
use crate::patients::InMemoryPatientRegistry;
use crate::repositories::memory::InMemoryStore;
use crate::service::PaperRecordService;
use paper_record_types::{Identifier, NonEmptyText};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Printer that keeps every accepted job and can be told to fail on one call.
#[derive(Default)]
pub struct RecordingPrinter {
    jobs: Mutex<Vec<PrintJob>>,
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
    gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
}

impl RecordingPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the call with this zero-based index; all other calls succeed.
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    /// Signals `entered` when the first call starts and holds that call until `release`
    /// receives.
    pub fn gated(entered: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            gate: Some((Mutex::new(entered), Mutex::new(release))),
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> Vec<PrintJob> {
        self.jobs.lock().expect("jobs mutex poisoned").clone()
    }

    /// `(kind, count)` of every accepted job, in order.
    pub fn summary(&self) -> Vec<(LabelKind, u32)> {
        self.jobs().iter().map(|j| (j.kind, j.count)).collect()
    }
}

impl LabelPrinter for RecordingPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), PrinterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let (0, Some((entered, release))) = (call, &self.gate) {
            entered.lock().expect("gate mutex poisoned").send(()).ok();
            release.lock().expect("gate mutex poisoned").recv().ok();
        }
        if self.fail_on_call == Some(call) {
            return Err(PrinterError::Unreachable("test printer".into()));
        }
        self.jobs.lock().expect("jobs mutex poisoned").push(job.clone());
        Ok(())
    }
}

pub fn loc(name: &str) -> LocationId {
    LocationId::new(name).unwrap()
}

pub fn ident(value: &str) -> Identifier {
    Identifier::new(value).unwrap()
}

/// Two facilities:
///
/// ```text
/// Main Hospital [medical record]
/// ├── Outpatient
/// │   └── Clinic 3
/// └── Basement
///     └── Archives [archives]
/// Satellite Clinic [medical record]
/// └── Satellite Ward
/// ```
pub fn facility_tree() -> LocationTree {
    let tree = LocationTree::new();
    let mrl = || vec![MEDICAL_RECORD_LOCATION_TAG.to_string()];
    tree.add_location(loc("Main Hospital"), None, mrl()).unwrap();
    tree.add_location(loc("Outpatient"), Some(loc("Main Hospital")), Vec::new())
        .unwrap();
    tree.add_location(loc("Clinic 3"), Some(loc("Outpatient")), Vec::new())
        .unwrap();
    tree.add_location(loc("Basement"), Some(loc("Main Hospital")), Vec::new())
        .unwrap();
    tree.add_location(
        loc("Archives"),
        Some(loc("Basement")),
        vec![ARCHIVES_LOCATION_TAG.to_string()],
    )
    .unwrap();
    tree.add_location(loc("Satellite Clinic"), None, mrl()).unwrap();
    tree.add_location(loc("Satellite Ward"), Some(loc("Satellite Clinic")), Vec::new())
        .unwrap();
    tree
}

pub struct Fixture {
    pub service: PaperRecordService,
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<InMemoryPatientRegistry>,
    pub printer: Arc<RecordingPrinter>,
    pub clerk: PersonId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_printer(RecordingPrinter::new())
    }

    pub fn with_printer(printer: RecordingPrinter) -> Self {
        Self::build(printer, CoreConfig::default())
    }

    pub fn build(printer: RecordingPrinter, config: CoreConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(InMemoryPatientRegistry::new("A"));
        let printer = Arc::new(printer);
        let config = Arc::new(config.with_print_pacing(PrintPacing::NONE));

        let service = PaperRecordService::new(
            config,
            store.clone(),
            registry.clone(),
            Arc::new(facility_tree()),
            Arc::new(PlainTextLabelRenderer),
            printer.clone(),
        );

        Self {
            service,
            store,
            registry,
            printer,
            clerk: PersonId::new(),
        }
    }

    /// Registers a patient with the given primary identifier.
    pub fn patient(&self, name: &str, primary: &str) -> PatientId {
        self.registry
            .register_patient(NonEmptyText::new(name).unwrap(), ident(primary))
            .unwrap()
    }
}

//! Label rendering and printing.
//!
//! Three label kinds go out when a chart is pulled or made: the chart label itself, form
//! labels stuck on loose paper forms, and an ID card label. Rendering and transport are
//! collaborators; this module only sequences jobs and paces them so one label printer
//! is not flooded.

use crate::config::PrintPacing;
use crate::model::{LocationId, PatientId};
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::Identifier;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LabelKind {
    PaperRecord,
    PaperForm,
    IdCard,
}

impl LabelKind {
    pub fn description(&self) -> &'static str {
        match self {
            LabelKind::PaperRecord => "paper record",
            LabelKind::PaperForm => "paper form",
            LabelKind::IdCard => "id card",
        }
    }
}

/// What a label is about. ID card labels carry no chart identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSubject {
    pub patient: PatientId,
    pub patient_name: Option<String>,
    pub identifier: Option<Identifier>,
}

impl LabelSubject {
    fn describe_patient(&self) -> String {
        match &self.patient_name {
            Some(name) => format!("{name} ({})", self.patient),
            None => self.patient.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedLabel {
    pub data: String,
    pub encoding: String,
}

pub trait LabelRenderer: Send + Sync {
    fn render(&self, kind: LabelKind, subject: &LabelSubject) -> RenderedLabel;
}

/// One dispatch to a printer: the rendered payload repeated `count` times.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintJob {
    pub kind: LabelKind,
    pub payload: String,
    pub encoding: String,
    pub location: LocationId,
    pub count: u32,
    /// Pause the printer needs after this job.
    pub pacing: std::time::Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PrinterError {
    #[error("no label printer reachable at {0}")]
    Unreachable(String),
    #[error("label printer timed out")]
    Timeout,
    #[error("failed to write print job: {0}")]
    Io(#[from] std::io::Error),
}

pub trait LabelPrinter: Send + Sync {
    fn print(&self, job: &PrintJob) -> Result<(), PrinterError>;
}

/// Renders labels as short blocks of plain text.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextLabelRenderer;

impl LabelRenderer for PlainTextLabelRenderer {
    fn render(&self, kind: LabelKind, subject: &LabelSubject) -> RenderedLabel {
        let mut data = String::new();
        data.push_str(&kind.description().to_uppercase());
        data.push('\n');
        if let Some(name) = &subject.patient_name {
            data.push_str(&format!("Name: {name}\n"));
        }
        data.push_str(&format!("Patient: {}\n", subject.patient));
        if let Some(identifier) = &subject.identifier {
            data.push_str(&format!("Dossier: {identifier}\n"));
        }
        data.push_str("--\n");

        RenderedLabel {
            data,
            encoding: "UTF-8".into(),
        }
    }
}

/// Writes each job to its own file in a spool directory.
///
/// Files are named `{location}-{sequence}.lbl`; a print daemon is expected to pick them up.
pub struct SpoolDirPrinter {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolDirPrinter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

impl LabelPrinter for SpoolDirPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), PrinterError> {
        if !self.dir.is_dir() {
            return Err(PrinterError::Unreachable(self.dir.display().to_string()));
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .dir
            .join(format!("{}-{n:06}.lbl", file_safe(job.location.as_str())));
        fs::write(path, job.payload.as_bytes())?;
        Ok(())
    }
}

/// Sequences and paces label print jobs.
#[derive(Clone)]
pub struct LabelPrintingService {
    renderer: Arc<dyn LabelRenderer>,
    printer: Arc<dyn LabelPrinter>,
    pacing: PrintPacing,
}

impl LabelPrintingService {
    pub fn new(
        renderer: Arc<dyn LabelRenderer>,
        printer: Arc<dyn LabelPrinter>,
        pacing: PrintPacing,
    ) -> Self {
        Self {
            renderer,
            printer,
            pacing,
        }
    }

    /// Prints `count` copies of one label as a single job, then waits out the pacing.
    ///
    /// A `count` of zero prints nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PaperRecordError::UnableToPrintLabel`] if the printer rejects the job.
    pub fn print_labels(
        &self,
        kind: LabelKind,
        subject: &LabelSubject,
        location: &LocationId,
        count: u32,
    ) -> PaperRecordResult<()> {
        if count == 0 {
            return Ok(());
        }

        let rendered = self.renderer.render(kind, subject);
        let job = PrintJob {
            kind,
            payload: rendered.data.repeat(count as usize),
            encoding: rendered.encoding,
            location: location.clone(),
            count,
            pacing: self.pacing.delay_for(count),
        };

        if let Err(source) = self.printer.print(&job) {
            tracing::error!(
                "failed to print {} {} label(s) at {}: {}",
                count,
                kind.description(),
                location,
                source
            );
            return Err(PaperRecordError::UnableToPrintLabel {
                label: kind.description(),
                location: location.clone(),
                patient: subject.describe_patient(),
                source,
            });
        }

        if !job.pacing.is_zero() {
            thread::sleep(job.pacing);
        }
        Ok(())
    }
}

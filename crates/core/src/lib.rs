//! # Paper Record Core
//!
//! Core business logic for tracking physical ("paper") medical charts.
//!
//! This crate owns the paper record, request and merge request state machines and the
//! rules around them:
//! - request-or-create with "last request wins" consolidation per patient and location
//! - batch assignment with label printing
//! - reconciliation of charts when two patients are merged
//! - expiry of stale pending requests
//!
//! Collaborators sit behind traits: [`repositories::PaperRecordStore`],
//! [`patients::PatientRegistry`], [`locations::LocationDirectory`],
//! [`labels::LabelRenderer`] and [`labels::LabelPrinter`]. Each has an in-process
//! reference adapter in this crate.
//!
//! **No API concerns**: HTTP routing and command-line parsing belong in the binaries.

pub mod config;
pub mod constants;
pub mod error;
pub mod labels;
pub mod locations;
pub mod locks;
pub mod model;
pub mod patients;
pub mod repositories;
pub mod service;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{CoreConfig, PrintPacing};
pub use error::{PaperRecordError, PaperRecordResult};
pub use model::{
    LocationId, MergeRequestStatus, PaperRecord, PaperRecordId, PaperRecordMergeRequest,
    PaperRecordMergeRequestId, PaperRecordRequest, PaperRecordRequestId, PaperRecordStatus,
    PatientId, PersonId, RequestStatus,
};
pub use service::{AssignmentReport, PaperRecordService};

//! Constants used throughout the paper record core crate.

/// Number of paper form labels printed whenever a request is assigned.
pub const NUMBER_OF_FORM_LABELS_TO_PRINT: u32 = 5;

/// Fixed part of the pause after each print job, in milliseconds.
pub const PRINT_BASE_DELAY_MS: u64 = 500;

/// Additional pause per label in a print job, in milliseconds.
pub const PRINT_DELAY_PER_LABEL_MS: u64 = 100;

/// How many identifiers may be drawn from the identifier source before giving up.
pub const MAX_IDENTIFIER_ATTEMPTS: u32 = 10;

/// Location tag marking the canonical owner of paper charts.
pub const MEDICAL_RECORD_LOCATION_TAG: &str = "Medical Record Location";

/// Location tag marking the room where charts are physically stored.
pub const ARCHIVES_LOCATION_TAG: &str = "Archives Location";

/// Purpose string handed to the identifier source.
pub const IDENTIFIER_GENERATION_PURPOSE: &str = "generating a new paper record identifier number";

/// Reason recorded when the losing identifier is voided by a merge.
pub const MERGE_VOID_REASON: &str = "voided during paper record merge";

/// Default filename for the workspace snapshot used by the binaries.
pub const DEFAULT_SNAPSHOT_FILENAME: &str = "paper_records.json";

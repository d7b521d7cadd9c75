use crate::labels::PrinterError;
use crate::model::LocationId;
use paper_record_types::TextError;

#[derive(Debug, thiserror::Error)]
pub enum PaperRecordError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    InvalidText(#[from] TextError),
    #[error("there is no location tagged '{tag}' associated with {location}")]
    NoMatchingLocation { tag: String, location: LocationId },
    #[error("unknown location: {0}")]
    UnknownLocation(LocationId),
    #[error(
        "cannot merge records from different locations: {preferred_location} and {not_preferred_location}"
    )]
    RecordLocationMismatch {
        preferred_location: LocationId,
        not_preferred_location: LocationId,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: u64,
        from: String,
        to: String,
    },
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("unable to print {label} label at {location} for patient {patient}: {source}")]
    UnableToPrintLabel {
        label: &'static str,
        location: LocationId,
        patient: String,
        #[source]
        source: PrinterError,
    },
    #[error(
        "assignment aborted while printing for {failed_identifier}; labels already printed for {printed_before_failure:?} were rolled back"
    )]
    AssignmentAborted {
        failed_identifier: String,
        printed_before_failure: Vec<String>,
        #[source]
        source: Box<PaperRecordError>,
    },

    #[error("unable to generate paper record identifier for patient {patient}")]
    IdentifierGenerationFailed { patient: String },
    #[error("gave up generating a paper record identifier at {location} after {attempts} attempts")]
    IdentifierGenerationExhausted { location: LocationId, attempts: u32 },

    #[error("patient registry error: {0}")]
    Registry(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("failed to serialize snapshot: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize snapshot: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to read snapshot file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write snapshot file: {0}")]
    FileWrite(std::io::Error),
}

impl PaperRecordError {
    /// Whether the caller may retry without changing its input.
    ///
    /// Printer trouble and write conflicts qualify; everything else is either bad input or
    /// a data integrity problem that needs an operator.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaperRecordError::UnableToPrintLabel { .. } | PaperRecordError::Conflict(_) => true,
            PaperRecordError::AssignmentAborted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type PaperRecordResult<T> = std::result::Result<T, PaperRecordError>;

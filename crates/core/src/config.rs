//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the service as
//! `Arc<CoreConfig>`. Binaries read environment variables; the core never does, so tests
//! and multi-threaded callers always see one consistent view.

use crate::constants::{
    ARCHIVES_LOCATION_TAG, MAX_IDENTIFIER_ATTEMPTS, MEDICAL_RECORD_LOCATION_TAG,
    NUMBER_OF_FORM_LABELS_TO_PRINT, PRINT_BASE_DELAY_MS, PRINT_DELAY_PER_LABEL_MS,
};
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::NonEmptyText;
use std::time::Duration;

/// Pause applied after each print job so a single label printer is not flooded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrintPacing {
    pub base: Duration,
    pub per_label: Duration,
}

impl PrintPacing {
    /// Pacing that never sleeps. Useful in tests.
    pub const NONE: PrintPacing = PrintPacing {
        base: Duration::ZERO,
        per_label: Duration::ZERO,
    };

    /// Total pause for a job of `count` labels.
    pub fn delay_for(&self, count: u32) -> Duration {
        self.base + self.per_label * count
    }
}

impl Default for PrintPacing {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(PRINT_BASE_DELAY_MS),
            per_label: Duration::from_millis(PRINT_DELAY_PER_LABEL_MS),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    form_label_count: u32,
    print_pacing: PrintPacing,
    max_identifier_attempts: u32,
    medical_record_location_tag: NonEmptyText,
    archives_location_tag: NonEmptyText,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`PaperRecordError::InvalidInput`] if `max_identifier_attempts` is zero or the
    /// two location tags are the same.
    pub fn new(
        form_label_count: u32,
        print_pacing: PrintPacing,
        max_identifier_attempts: u32,
        medical_record_location_tag: NonEmptyText,
        archives_location_tag: NonEmptyText,
    ) -> PaperRecordResult<Self> {
        if max_identifier_attempts == 0 {
            return Err(PaperRecordError::InvalidInput(
                "max_identifier_attempts must be at least 1".into(),
            ));
        }
        if medical_record_location_tag == archives_location_tag {
            return Err(PaperRecordError::InvalidInput(
                "medical record and archives location tags must differ".into(),
            ));
        }

        Ok(Self {
            form_label_count,
            print_pacing,
            max_identifier_attempts,
            medical_record_location_tag,
            archives_location_tag,
        })
    }

    pub fn form_label_count(&self) -> u32 {
        self.form_label_count
    }

    pub fn print_pacing(&self) -> PrintPacing {
        self.print_pacing
    }

    pub fn max_identifier_attempts(&self) -> u32 {
        self.max_identifier_attempts
    }

    pub fn medical_record_location_tag(&self) -> &NonEmptyText {
        &self.medical_record_location_tag
    }

    pub fn archives_location_tag(&self) -> &NonEmptyText {
        &self.archives_location_tag
    }

    /// Same configuration with a different pacing.
    pub fn with_print_pacing(mut self, print_pacing: PrintPacing) -> Self {
        self.print_pacing = print_pacing;
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        // Both tag constants are non-empty literals.
        let tag = |value: &str| NonEmptyText::new(value).expect("constant tag is non-empty");
        Self {
            form_label_count: NUMBER_OF_FORM_LABELS_TO_PRINT,
            print_pacing: PrintPacing::default(),
            max_identifier_attempts: MAX_IDENTIFIER_ATTEMPTS,
            medical_record_location_tag: tag(MEDICAL_RECORD_LOCATION_TAG),
            archives_location_tag: tag(ARCHIVES_LOCATION_TAG),
        }
    }
}

/// Parse an optional numeric setting.
///
/// `None` or a blank value yields `default`.
pub fn u32_from_env_value(name: &str, value: Option<String>, default: u32) -> PaperRecordResult<u32> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse::<u32>().map_err(|e| {
            PaperRecordError::InvalidInput(format!("{name} must be a non-negative integer: {e}"))
        }),
    }
}

/// Parse the print pacing from optional millisecond values.
///
/// Missing or blank values fall back to the defaults.
pub fn print_pacing_from_env_values(
    base_ms: Option<String>,
    per_label_ms: Option<String>,
) -> PaperRecordResult<PrintPacing> {
    let defaults = PrintPacing::default();
    let parse = |name: &str, value: Option<String>, default: Duration| {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            None => Ok(default),
            Some(v) => v.parse::<u64>().map(Duration::from_millis).map_err(|e| {
                PaperRecordError::InvalidInput(format!("{name} must be milliseconds: {e}"))
            }),
        }
    };

    Ok(PrintPacing {
        base: parse("print base delay", base_ms, defaults.base)?,
        per_label: parse("print delay per label", per_label_ms, defaults.per_label)?,
    })
}

/// Settings as optional raw strings, typically read from the environment by a binary.
#[derive(Clone, Debug, Default)]
pub struct CoreConfigValues {
    pub form_label_count: Option<String>,
    pub print_base_delay_ms: Option<String>,
    pub print_delay_per_label_ms: Option<String>,
    pub max_identifier_attempts: Option<String>,
}

impl CoreConfigValues {
    /// Resolve the values into a [`CoreConfig`], falling back to defaults for anything
    /// missing or blank.
    pub fn resolve(self) -> PaperRecordResult<CoreConfig> {
        let defaults = CoreConfig::default();
        CoreConfig::new(
            u32_from_env_value(
                "form label count",
                self.form_label_count,
                defaults.form_label_count,
            )?,
            print_pacing_from_env_values(self.print_base_delay_ms, self.print_delay_per_label_ms)?,
            u32_from_env_value(
                "max identifier attempts",
                self.max_identifier_attempts,
                defaults.max_identifier_attempts,
            )?,
            defaults.medical_record_location_tag,
            defaults.archives_location_tag,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing_matches_printer_throttle() {
        let pacing = PrintPacing::default();
        assert_eq!(pacing.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(pacing.delay_for(1), Duration::from_millis(600));
    }

    #[test]
    fn test_new_rejects_zero_attempts() {
        let result = CoreConfig::new(
            5,
            PrintPacing::NONE,
            0,
            NonEmptyText::new("A").unwrap(),
            NonEmptyText::new("B").unwrap(),
        );
        assert!(matches!(result, Err(PaperRecordError::InvalidInput(_))));
    }

    #[test]
    fn test_new_rejects_identical_tags() {
        let tag = NonEmptyText::new("Same").unwrap();
        let result = CoreConfig::new(5, PrintPacing::NONE, 3, tag.clone(), tag);
        assert!(result.is_err());
    }

    #[test]
    fn test_u32_from_env_value() {
        assert_eq!(u32_from_env_value("x", None, 7).unwrap(), 7);
        assert_eq!(u32_from_env_value("x", Some("  ".into()), 7).unwrap(), 7);
        assert_eq!(u32_from_env_value("x", Some("3".into()), 7).unwrap(), 3);
        assert!(u32_from_env_value("x", Some("three".into()), 7).is_err());
    }

    #[test]
    fn test_print_pacing_from_env_values() {
        let pacing = print_pacing_from_env_values(Some("0".into()), None).unwrap();
        assert_eq!(pacing.base, Duration::ZERO);
        assert_eq!(pacing.per_label, Duration::from_millis(PRINT_DELAY_PER_LABEL_MS));

        assert!(print_pacing_from_env_values(Some("-1".into()), None).is_err());
    }

    #[test]
    fn test_resolve_values() {
        let cfg = CoreConfigValues::default().resolve().unwrap();
        assert_eq!(cfg.form_label_count(), NUMBER_OF_FORM_LABELS_TO_PRINT);
        assert_eq!(cfg.max_identifier_attempts(), MAX_IDENTIFIER_ATTEMPTS);

        let cfg = CoreConfigValues {
            form_label_count: Some("2".into()),
            max_identifier_attempts: Some("4".into()),
            ..CoreConfigValues::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(cfg.form_label_count(), 2);
        assert_eq!(cfg.max_identifier_attempts(), 4);

        let zero_attempts = CoreConfigValues {
            max_identifier_attempts: Some("0".into()),
            ..CoreConfigValues::default()
        };
        assert!(zero_attempts.resolve().is_err());
    }
}

//! Validated text primitives shared across the paper record crates.
//!
//! Location names, void reasons and chart tracking numbers all arrive as free text from
//! callers. These wrappers guarantee the basic shape once at the edge so the core never
//! has to re-check it.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// An identifier contained whitespace or a line break
    #[error("Identifier must not contain whitespace: '{0}'")]
    Whitespace(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// An identifier value such as a chart tracking number or a primary patient identifier.
///
/// Identifiers are printed on labels and typed back in by archive staff, so they must be
/// non-empty and contain no whitespace at all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Creates a new `Identifier`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::Whitespace`] if any
    /// whitespace remains inside the value.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TextError::Whitespace(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Identifier::new(&s).map_err(serde::de::Error::custom)
    }
}

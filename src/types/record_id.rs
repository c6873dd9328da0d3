//! Record identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidInputError};

/// A validated record type name.
///
/// Type names are lowercase ASCII letters, digits, and underscores, and
/// must not start with an underscore (reserved for server-defined types
/// like `_user` are referenced through [`RecordType::reserved`]).
///
/// # Example
///
/// ```
/// use cirrus::RecordType;
///
/// let note = RecordType::new("note").unwrap();
/// assert_eq!(note.as_str(), "note");
/// assert!(RecordType::new("_internal").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordType(String);

impl RecordType {
    /// Create a new record type from a string, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid record type name.
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    /// Create a reserved (underscore-prefixed) record type.
    ///
    /// Reserved types name server-defined stores such as the `user`
    /// record type backing authentication.
    pub(crate) fn reserved(s: &str) -> Self {
        Self(s.to_string())
    }

    /// The server-defined user record type.
    pub fn user() -> Self {
        Self::reserved("user")
    }

    /// Returns the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), Error> {
        if s.is_empty() {
            return Err(InvalidInputError::RecordType {
                value: s.to_string(),
                reason: "must be non-empty".to_string(),
            }
            .into());
        }

        if s.starts_with('_') {
            return Err(InvalidInputError::RecordType {
                value: s.to_string(),
                reason: "leading underscore is reserved".to_string(),
            }
            .into());
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(InvalidInputError::RecordType {
                value: s.to_string(),
                reason: "must contain only lowercase letters, digits, and underscores".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RecordType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RecordType> for String {
    fn from(record_type: RecordType) -> Self {
        record_type.0
    }
}

impl AsRef<str> for RecordType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A fully-qualified record identifier.
///
/// A record is identified by `(record_type, id)`, printed and parsed as
/// `"<record_type>/<id>"`.
///
/// # Example
///
/// ```
/// use cirrus::RecordId;
///
/// let id = RecordId::parse("note/9a3c-01").unwrap();
/// assert_eq!(id.record_type().as_str(), "note");
/// assert_eq!(id.id(), "9a3c-01");
/// assert_eq!(id.to_string(), "note/9a3c-01");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId {
    record_type: RecordType,
    id: String,
}

impl RecordId {
    /// Create a record id from a type and an id string.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty or contains `/`.
    pub fn new(record_type: RecordType, id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        Self::validate_id(&id)?;
        Ok(Self { record_type, id })
    }

    /// Generate a record id with a fresh UUID v4.
    pub fn generate(record_type: RecordType) -> Self {
        Self {
            record_type,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Parse a `"<record_type>/<id>"` string.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        let (type_part, id_part) = s.split_once('/').ok_or_else(|| InvalidInputError::RecordId {
            value: s.to_string(),
            reason: "must have format '<record_type>/<id>'".to_string(),
        })?;

        // Server-assigned records may use reserved types like "user";
        // accept those on parse while still rejecting malformed names.
        let record_type = if let Some(rest) = type_part.strip_prefix('_') {
            RecordType::new(rest).map(|_| RecordType::reserved(type_part))?
        } else {
            RecordType::new(type_part)?
        };

        Self::validate_id(id_part)?;
        Ok(Self {
            record_type,
            id: id_part.to_string(),
        })
    }

    /// Returns the record type.
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// Returns the id part.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn validate_id(id: &str) -> Result<(), Error> {
        if id.is_empty() {
            return Err(InvalidInputError::RecordId {
                value: id.to_string(),
                reason: "id must be non-empty".to_string(),
            }
            .into());
        }
        if id.contains('/') {
            return Err(InvalidInputError::RecordId {
                value: id.to_string(),
                reason: "id must not contain '/'".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_record_type() {
        let rt = RecordType::new("delivery_note2").unwrap();
        assert_eq!(rt.as_str(), "delivery_note2");
    }

    #[test]
    fn rejects_uppercase_type() {
        assert!(RecordType::new("Note").is_err());
    }

    #[test]
    fn rejects_reserved_prefix() {
        assert!(RecordType::new("_user").is_err());
    }

    #[test]
    fn record_id_round_trips_through_display() {
        let id = RecordId::parse("note/abc-123").unwrap();
        assert_eq!(RecordId::parse(id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_accepts_reserved_type() {
        let id = RecordId::parse("_user/71b0").unwrap();
        assert_eq!(id.record_type().as_str(), "_user");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(RecordId::parse("note").is_err());
    }

    #[test]
    fn rejects_empty_id() {
        assert!(RecordId::parse("note/").is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        let rt = RecordType::new("note").unwrap();
        let a = RecordId::generate(rt.clone());
        let b = RecordId::generate(rt);
        assert_ne!(a, b);
    }
}

//! Role type for access control.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidInputError};

/// A named capability assignable to users.
///
/// Roles are opaque to the client; equality is by name. They appear in
/// ACL entries and in the auth container's role-management calls.
///
/// # Example
///
/// ```
/// use cirrus::Role;
///
/// let admin = Role::new("admin").unwrap();
/// assert_eq!(admin, Role::new("admin").unwrap());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    /// Create a new role from a name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidInputError::Role {
                value: name,
                reason: "must be non-empty".to_string(),
            }
            .into());
        }
        if name.chars().any(char::is_whitespace) {
            return Err(InvalidInputError::Role {
                value: name,
                reason: "must not contain whitespace".to_string(),
            }
            .into());
        }
        Ok(Self(name))
    }

    /// Returns the role name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_name() {
        assert_eq!(Role::new("editor").unwrap(), Role::new("editor").unwrap());
        assert_ne!(Role::new("editor").unwrap(), Role::new("viewer").unwrap());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(Role::new("").is_err());
    }

    #[test]
    fn rejects_whitespace() {
        assert!(Role::new("site admin").is_err());
    }
}

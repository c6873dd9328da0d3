//! Record access control.
//!
//! An [`Acl`] is a set of entries, each granting an access level to one
//! principal: the public, a named role, or a specific user. Each
//! principal has at most one effective entry, so setters are idempotent
//! and predicates never depend on enumeration order.

use serde_json::{Value as Json, json};

use crate::error::{Error, InvalidInputError};
use crate::types::Role;

/// The access level granted by an ACL entry.
///
/// Levels are ordered: `ReadWrite` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    NoAccess,
    Read,
    ReadWrite,
}

impl AccessLevel {
    fn wire_name(self) -> &'static str {
        match self {
            AccessLevel::NoAccess => "none",
            AccessLevel::Read => "read",
            AccessLevel::ReadWrite => "write",
        }
    }

    fn from_wire(s: &str) -> Result<Self, Error> {
        match s {
            "none" => Ok(AccessLevel::NoAccess),
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::ReadWrite),
            other => Err(InvalidInputError::Value {
                reason: format!("unknown access level '{}'", other),
            }
            .into()),
        }
    }
}

/// The principal an ACL entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Everyone, authenticated or not.
    Public,
    /// Users holding a named role.
    Role(Role),
    /// A specific user, by user record id.
    User(String),
}

/// One access grant.
#[derive(Debug, Clone, PartialEq)]
pub struct AclEntry {
    pub principal: Principal,
    pub level: AccessLevel,
}

/// A record's access control list.
///
/// # Example
///
/// ```
/// use cirrus::{AccessLevel, Acl};
/// use cirrus::record::Principal;
///
/// let mut acl = Acl::new();
/// acl.set_access(Principal::Public, AccessLevel::Read);
/// assert!(acl.has_public_read_access());
/// assert!(!acl.has_public_write_access());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acl {
    entries: Vec<AclEntry>,
}

impl Acl {
    /// Create an empty ACL (nothing granted).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or insert the entry for a principal.
    ///
    /// Calling this twice with the same principal leaves a single entry.
    pub fn set_access(&mut self, principal: Principal, level: AccessLevel) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.principal == principal)
        {
            Some(entry) => entry.level = level,
            None => self.entries.push(AclEntry { principal, level }),
        }
    }

    /// Returns the level granted to a principal, if an entry exists.
    pub fn level_for(&self, principal: &Principal) -> Option<AccessLevel> {
        self.entries
            .iter()
            .find(|entry| entry.principal == *principal)
            .map(|entry| entry.level)
    }

    fn grants(&self, principal: &Principal, wanted: AccessLevel) -> bool {
        self.level_for(principal)
            .is_some_and(|level| level >= wanted)
    }

    /// Returns the entries in insertion order.
    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    pub fn has_public_read_access(&self) -> bool {
        self.grants(&Principal::Public, AccessLevel::Read)
    }

    pub fn has_public_write_access(&self) -> bool {
        self.grants(&Principal::Public, AccessLevel::ReadWrite)
    }

    pub fn has_read_access_for_role(&self, role: &Role) -> bool {
        self.grants(&Principal::Role(role.clone()), AccessLevel::Read)
    }

    pub fn has_write_access_for_role(&self, role: &Role) -> bool {
        self.grants(&Principal::Role(role.clone()), AccessLevel::ReadWrite)
    }

    pub fn has_read_access_for_user(&self, user_id: &str) -> bool {
        self.grants(&Principal::User(user_id.to_string()), AccessLevel::Read)
    }

    pub fn has_write_access_for_user(&self, user_id: &str) -> bool {
        self.grants(&Principal::User(user_id.to_string()), AccessLevel::ReadWrite)
    }

    /// Serialize to the wire representation: an array of entries, each
    /// carrying a level and exactly one principal key.
    pub fn to_json(&self) -> Json {
        Json::Array(
            self.entries
                .iter()
                .map(|entry| {
                    let mut obj = serde_json::Map::new();
                    obj.insert("level".to_string(), json!(entry.level.wire_name()));
                    match &entry.principal {
                        Principal::Public => {
                            obj.insert("public".to_string(), json!(true));
                        }
                        Principal::Role(role) => {
                            obj.insert("role".to_string(), json!(role.name()));
                        }
                        Principal::User(user_id) => {
                            obj.insert("user_id".to_string(), json!(user_id));
                        }
                    }
                    Json::Object(obj)
                })
                .collect(),
        )
    }

    /// Deserialize from the wire representation.
    pub fn from_json(json: &Json) -> Result<Self, Error> {
        let items = json.as_array().ok_or_else(|| InvalidInputError::Value {
            reason: "ACL must be a JSON array".to_string(),
        })?;

        let mut acl = Acl::new();
        for item in items {
            let obj = item.as_object().ok_or_else(|| InvalidInputError::Value {
                reason: "ACL entry must be a JSON object".to_string(),
            })?;

            let level = obj
                .get("level")
                .and_then(Json::as_str)
                .ok_or_else(|| InvalidInputError::Value {
                    reason: "ACL entry missing level".to_string(),
                })
                .map_err(Error::from)
                .and_then(AccessLevel::from_wire)?;

            let principal = if obj.get("public").and_then(Json::as_bool) == Some(true) {
                Principal::Public
            } else if let Some(role) = obj.get("role").and_then(Json::as_str) {
                Principal::Role(Role::new(role)?)
            } else if let Some(user_id) = obj.get("user_id").and_then(Json::as_str) {
                Principal::User(user_id.to_string())
            } else {
                return Err(InvalidInputError::Value {
                    reason: "ACL entry missing principal".to_string(),
                }
                .into());
            };

            // Last entry wins for a duplicated principal
            acl.set_access(principal, level);
        }
        Ok(acl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> Role {
        Role::new(name).unwrap()
    }

    #[test]
    fn setters_are_idempotent() {
        let mut acl = Acl::new();
        acl.set_access(Principal::User("u1".to_string()), AccessLevel::Read);
        acl.set_access(Principal::User("u1".to_string()), AccessLevel::Read);
        assert_eq!(acl.entries().len(), 1);
        assert!(acl.has_read_access_for_user("u1"));
        assert!(!acl.has_write_access_for_user("u1"));
    }

    #[test]
    fn setter_replaces_existing_entry() {
        let mut acl = Acl::new();
        acl.set_access(Principal::Public, AccessLevel::ReadWrite);
        acl.set_access(Principal::Public, AccessLevel::NoAccess);
        assert_eq!(acl.entries().len(), 1);
        assert!(!acl.has_public_read_access());
    }

    #[test]
    fn write_implies_read() {
        let mut acl = Acl::new();
        acl.set_access(Principal::Role(role("editor")), AccessLevel::ReadWrite);
        assert!(acl.has_read_access_for_role(&role("editor")));
        assert!(acl.has_write_access_for_role(&role("editor")));
    }

    #[test]
    fn read_does_not_imply_write() {
        let mut acl = Acl::new();
        acl.set_access(Principal::Public, AccessLevel::Read);
        assert!(acl.has_public_read_access());
        assert!(!acl.has_public_write_access());
    }

    #[test]
    fn absent_principal_has_no_access() {
        let acl = Acl::new();
        assert!(!acl.has_read_access_for_user("nobody"));
        assert!(!acl.has_read_access_for_role(&role("ghost")));
    }

    #[test]
    fn wire_round_trip() {
        let mut acl = Acl::new();
        acl.set_access(Principal::Public, AccessLevel::Read);
        acl.set_access(Principal::Role(role("admin")), AccessLevel::ReadWrite);
        acl.set_access(Principal::User("u2".to_string()), AccessLevel::NoAccess);

        let parsed = Acl::from_json(&acl.to_json()).unwrap();
        assert_eq!(parsed, acl);
    }

    #[test]
    fn no_access_survives_round_trip() {
        let mut acl = Acl::new();
        acl.set_access(Principal::User("u3".to_string()), AccessLevel::NoAccess);
        let parsed = Acl::from_json(&acl.to_json()).unwrap();
        assert_eq!(
            parsed.level_for(&Principal::User("u3".to_string())),
            Some(AccessLevel::NoAccess)
        );
    }
}

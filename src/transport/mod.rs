//! Transport abstraction and wire payload types.
//!
//! Every operation in the library routes through [`Transport::send`]:
//! one action name, one JSON payload, one JSON response. The production
//! implementation is [`RestClient`]; tests substitute their own.

mod rest;

pub use rest::RestClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::Result;

// ============================================================================
// Action Names
// ============================================================================

/// auth:login
pub const AUTH_LOGIN: &str = "auth:login";

/// auth:signup
pub const AUTH_SIGNUP: &str = "auth:signup";

/// auth:logout
pub const AUTH_LOGOUT: &str = "auth:logout";

/// auth:password
pub const AUTH_PASSWORD: &str = "auth:password";

/// auth:reset_password
pub const AUTH_RESET_PASSWORD: &str = "auth:reset_password";

/// me
pub const ME: &str = "me";

/// role:assign
pub const ROLE_ASSIGN: &str = "role:assign";

/// role:revoke
pub const ROLE_REVOKE: &str = "role:revoke";

/// role:get
pub const ROLE_GET: &str = "role:get";

/// record:save
pub const RECORD_SAVE: &str = "record:save";

/// record:fetch
pub const RECORD_FETCH: &str = "record:fetch";

/// record:query
pub const RECORD_QUERY: &str = "record:query";

/// record:delete
pub const RECORD_DELETE: &str = "record:delete";

/// asset:put
pub const ASSET_PUT: &str = "asset:put";

// ============================================================================
// Transport seam
// ============================================================================

/// The single choke point every higher-level call routes through.
///
/// Implementations serialize the payload, dispatch the request, and
/// surface transport failures and structured server errors through the
/// crate [`Error`](crate::Error) type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an action with a JSON payload and return the JSON response.
    async fn send(&self, action: &str, payload: Json) -> Result<Json>;
}

/// Serialize a request struct into a JSON payload.
///
/// Payload structs are plain data; serialization cannot fail.
pub(crate) fn to_payload<T: Serialize>(request: &T) -> Json {
    serde_json::to_value(request).expect("payload serialization cannot fail")
}

/// Parse a JSON response into a typed response struct.
pub(crate) fn from_payload<T: serde::de::DeserializeOwned>(json: Json) -> Result<T> {
    serde_json::from_value(json).map_err(|e| {
        crate::error::InvalidInputError::Other {
            message: format!("malformed server response: {}", e),
        }
        .into()
    })
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for auth:login and auth:signup.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
}

/// Response from auth:login, auth:signup, and me.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// The authenticated user's record in wire form.
    pub profile: Json,
}

/// Request body for auth:password.
#[derive(Debug, Serialize)]
pub struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub password: &'a str,
}

/// Request body for auth:reset_password.
#[derive(Debug, Serialize)]
pub struct ResetPasswordRequest<'a> {
    pub user_id: &'a str,
    pub password: &'a str,
}

/// Request body for role:assign and role:revoke.
#[derive(Debug, Serialize)]
pub struct RoleMutationRequest<'a> {
    pub users: Vec<&'a str>,
    pub roles: Vec<&'a str>,
}

/// Request body for role:get.
#[derive(Debug, Serialize)]
pub struct RoleGetRequest<'a> {
    pub users: Vec<&'a str>,
}

/// Response from role:get: user id to ordered role names.
#[derive(Debug, Deserialize)]
pub struct RoleGetResponse {
    pub result: BTreeMap<String, Vec<String>>,
}

/// Request body for record:save.
#[derive(Debug, Serialize)]
pub struct RecordSaveRequest<'a> {
    pub database_id: &'a str,
    pub records: Vec<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic: Option<bool>,
}

/// Response from record:save and record:delete: one item per input,
/// index-aligned — either a record / id object or a
/// `{"$type":"error", ...}` item.
#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    pub result: Vec<Json>,
}

/// Request body for record:delete.
#[derive(Debug, Serialize)]
pub struct RecordDeleteRequest<'a> {
    pub database_id: &'a str,
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic: Option<bool>,
}

/// Request body for record:fetch.
#[derive(Debug, Serialize)]
pub struct RecordFetchRequest<'a> {
    pub database_id: &'a str,
    pub id: &'a str,
}

/// Response from record:fetch.
#[derive(Debug, Deserialize)]
pub struct RecordFetchResponse {
    #[serde(default)]
    pub result: Option<Json>,
}

/// Request body for record:query.
#[derive(Debug, Serialize)]
pub struct RecordQueryRequest<'a> {
    pub database_id: &'a str,
    pub query: Json,
}

/// Response from record:query.
#[derive(Debug, Deserialize)]
pub struct RecordQueryResponse {
    pub result: Vec<Json>,
    #[serde(default)]
    pub info: Option<QueryInfo>,
}

/// Query metadata attached to a record:query response.
#[derive(Debug, Deserialize)]
pub struct QueryInfo {
    #[serde(default)]
    pub count: Option<u64>,
}

/// Request body for asset:put.
#[derive(Debug, Serialize)]
pub struct AssetPutRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'a str>,
    /// Base64-encoded asset bytes.
    pub data: String,
}

/// Response from asset:put.
#[derive(Debug, Deserialize)]
pub struct AssetPutResponse {
    /// The stored asset in wire form, now carrying a download URL.
    pub result: Json,
}

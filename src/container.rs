//! The container: the entry point tying transport, auth, databases, and
//! pub/sub together.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::auth::AuthContainer;
use crate::auth::session::{SessionSubscribers, SharedSession};
use crate::database::{Database, DatabaseScope};
use crate::error::Error;
use crate::pubsub::PubsubContainer;
use crate::record::Asset;
use crate::transport::{
    ASSET_PUT, AssetPutRequest, AssetPutResponse, RestClient, Transport, from_payload, to_payload,
};
use crate::types::ServerUrl;

/// An API key identifying the client application.
///
/// # Security
///
/// Never logged or displayed in Debug output.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Create a new API key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

// Hide key value in Debug output
impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&"[REDACTED]").finish()
    }
}

/// Connection settings for a [`Container`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    server: ServerUrl,
    api_key: ApiKey,
}

impl ApiConfig {
    /// Create a configuration from a server endpoint and API key.
    ///
    /// The endpoint must be an absolute `https` URL (`http` is allowed
    /// for localhost).
    pub fn new(endpoint: impl AsRef<str>, api_key: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            server: ServerUrl::new(endpoint.as_ref())?,
            api_key: ApiKey::new(api_key),
        })
    }

    /// The configured server URL.
    pub fn server(&self) -> &ServerUrl {
        &self.server
    }
}

struct ContainerInner {
    transport: Arc<dyn Transport>,
    server: ServerUrl,
    api_key: ApiKey,
    session: SharedSession,
    subscribers: Arc<SessionSubscribers>,
}

/// The top-level client handle.
///
/// Owns the transport and the single active session. Cheap to clone:
/// clones share session state, so a login through one clone is visible
/// through all.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create a container for the given configuration.
    pub fn new(config: ApiConfig) -> Self {
        let session: SharedSession = Arc::new(RwLock::new(Default::default()));
        let transport = RestClient::new(
            config.server.clone(),
            config.api_key.clone(),
            Arc::clone(&session),
        );

        info!(server = %config.server, "Container created");
        Self {
            inner: Arc::new(ContainerInner {
                transport: Arc::new(transport),
                server: config.server,
                api_key: config.api_key,
                session,
                subscribers: Arc::new(SessionSubscribers::default()),
            }),
        }
    }

    /// The server this container talks to.
    pub fn server(&self) -> &ServerUrl {
        &self.inner.server
    }

    // ========================================================================
    // Sub-containers
    // ========================================================================

    /// Authentication operations and session state.
    pub fn auth(&self) -> AuthContainer {
        AuthContainer::new(
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.session),
            Arc::clone(&self.inner.subscribers),
        )
    }

    /// The public record database, shared across users.
    pub fn public_db(&self) -> Database {
        Database::new(DatabaseScope::Public, Arc::clone(&self.inner.transport))
    }

    /// The authenticated user's private record database.
    pub fn private_db(&self) -> Database {
        Database::new(DatabaseScope::Private, Arc::clone(&self.inner.transport))
    }

    /// Open a pub/sub connection to the server.
    ///
    /// The connection lives until the returned container is dropped or
    /// closed; channel subscriptions are per connection, not persisted
    /// server side.
    #[instrument(skip(self))]
    pub async fn connect_pubsub(&self) -> Result<PubsubContainer, Error> {
        let ws_url = self.inner.server.ws_url(self.inner.api_key.as_str());
        PubsubContainer::connect(&ws_url).await
    }

    // ========================================================================
    // Raw actions
    // ========================================================================

    /// Send a raw action with a JSON payload.
    ///
    /// Escape hatch for server actions the typed surface does not cover.
    #[instrument(skip(self, payload))]
    pub async fn make_request(&self, action: &str, payload: Json) -> Result<Json, Error> {
        self.inner.transport.send(action, payload).await
    }

    /// Invoke a named server-side lambda with JSON arguments.
    #[instrument(skip(self, args))]
    pub async fn lambda(&self, name: &str, args: Json) -> Result<Json, Error> {
        debug!(name, "Invoking lambda");
        self.inner
            .transport
            .send(name, serde_json::json!({ "args": args }))
            .await
    }

    // ========================================================================
    // Assets
    // ========================================================================

    /// Upload an asset's bytes, returning the stored asset with its
    /// server-assigned name and download URL.
    #[instrument(skip(self, asset, data), fields(name = %asset.name, size = data.len()))]
    pub async fn upload_asset(&self, asset: &Asset, data: &[u8]) -> Result<Asset, Error> {
        debug!("Uploading asset");
        let request = AssetPutRequest {
            name: &asset.name,
            content_type: asset.content_type.as_deref(),
            data: BASE64.encode(data),
        };
        let response = self
            .inner
            .transport
            .send(ASSET_PUT, to_payload(&request))
            .await?;
        let response: AssetPutResponse = from_payload(response)?;
        Asset::from_json(&response.result)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("server", &self.inner.server)
            .field("api_key", &self.inner.api_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_hides_value_in_debug() {
        let key = ApiKey::new("very-secret-key");
        let debug = format!("{:?}", key);
        assert!(!debug.contains("very-secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_rejects_invalid_endpoint() {
        assert!(ApiConfig::new("not a url", "key").is_err());
        assert!(ApiConfig::new("ftp://api.example.com", "key").is_err());
    }

    #[test]
    fn container_clones_share_state() {
        let config = ApiConfig::new("https://api.example.com", "key").unwrap();
        let container = Container::new(config);
        let clone = container.clone();
        assert!(Arc::ptr_eq(&container.inner, &clone.inner));
    }
}

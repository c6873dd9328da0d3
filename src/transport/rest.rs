//! HTTP transport implementation.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value as Json;
use tracing::{debug, instrument, trace};

use crate::auth::session::SharedSession;
use crate::container::ApiKey;
use crate::error::{Error, ServerError, WireErrorEnvelope};
use crate::types::ServerUrl;

use super::Transport;

/// HTTP client dispatching actions to the API server.
///
/// Every request is a JSON POST to the action's URL, carrying the API
/// key and, when a session is active, the access token. Error responses
/// are parsed from the `{status, error: {code, message, info}}` shape at
/// a single choke point.
pub struct RestClient {
    client: reqwest::Client,
    server: ServerUrl,
    api_key: ApiKey,
    session: SharedSession,
}

impl RestClient {
    /// Create a new client for the given server.
    pub fn new(server: ServerUrl, api_key: ApiKey, session: SharedSession) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cirrus/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            server,
            api_key,
            session,
        }
    }

    /// Returns the server URL this client is configured for.
    pub fn server(&self) -> &ServerUrl {
        &self.server
    }

    /// Create request headers: content type, API key, and the access
    /// token when a session is active.
    async fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.as_str()).expect("invalid api key characters"),
        );

        // The token is read per request: a concurrent logout between
        // issuing and completing a call is tolerated, not prevented.
        let token = {
            let session = self.session.read().await;
            session.access_token.as_ref().map(|t| t.as_str().to_string())
        };
        if let Some(token) = token {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).expect("invalid token characters"),
            );
        }
        headers
    }

    /// Handle a response, parsing the body or error.
    async fn handle_response(&self, response: reqwest::Response) -> Result<Json, Error> {
        let status = response.status();
        trace!(status = %status, "API response");

        if status.is_success() {
            let body = response.json::<Json>().await?;
            Ok(body)
        } else {
            Err(Error::Server(self.parse_error_response(response).await))
        }
    }

    /// Parse an error response body.
    async fn parse_error_response(&self, response: reqwest::Response) -> ServerError {
        let status = response.status().as_u16();

        match response.json::<WireErrorEnvelope>().await {
            Ok(envelope) => envelope.error.into(),
            Err(_) => ServerError::from_wire(10000, format!("HTTP {}", status), None),
        }
    }
}

#[async_trait]
impl Transport for RestClient {
    #[instrument(skip(self, payload), fields(server = %self.server))]
    async fn send(&self, action: &str, payload: Json) -> Result<Json, Error> {
        let url = self.server.action_url(action);
        debug!(action, "API request");
        trace!(?payload, "request payload");

        let response = self
            .client
            .post(&url)
            .headers(self.request_headers().await)
            .json(&payload)
            .send()
            .await?;

        self.handle_response(response).await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("server", &self.server)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionState;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[test]
    fn client_creation() {
        let server = ServerUrl::new("https://api.example.com").unwrap();
        let session = Arc::new(RwLock::new(SessionState::default()));
        let client = RestClient::new(server.clone(), ApiKey::new("key"), session);
        assert_eq!(client.server().as_str(), server.as_str());
    }

    #[test]
    fn debug_hides_nothing_but_api_key_is_redacted() {
        let server = ServerUrl::new("https://api.example.com").unwrap();
        let session = Arc::new(RwLock::new(SessionState::default()));
        let client = RestClient::new(server, ApiKey::new("super-secret"), session);
        let debug = format!("{:?}", client);
        assert!(!debug.contains("super-secret"));
    }
}

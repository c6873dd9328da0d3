//! Authentication and session management.

pub(crate) mod session;

pub use session::{SessionEvent, UserChanges};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::Error;
use crate::record::Record;
use crate::transport::{
    AUTH_LOGIN, AUTH_LOGOUT, AUTH_PASSWORD, AUTH_RESET_PASSWORD, AUTH_SIGNUP, AuthRequest,
    AuthResponse, ChangePasswordRequest, ME, ROLE_ASSIGN, ROLE_GET, ROLE_REVOKE,
    ResetPasswordRequest, RoleGetRequest, RoleGetResponse, RoleMutationRequest, Transport,
    from_payload, to_payload,
};
use crate::types::Role;

use session::{AccessToken, SessionEvent as Event, SessionSubscribers, SharedSession};

/// Authentication operations and session state for one container.
///
/// Obtained via [`Container::auth`](crate::Container::auth). Exactly one
/// session is active per container: `login*`/`signup*` set the current
/// user and access token, `logout` clears both, and every transition
/// notifies user-change subscribers.
#[derive(Clone)]
pub struct AuthContainer {
    transport: Arc<dyn Transport>,
    session: SharedSession,
    subscribers: Arc<SessionSubscribers>,
}

impl AuthContainer {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        session: SharedSession,
        subscribers: Arc<SessionSubscribers>,
    ) -> Self {
        Self {
            transport,
            session,
            subscribers,
        }
    }

    // ========================================================================
    // Session accessors
    // ========================================================================

    /// The currently authenticated user's record, if logged in.
    pub async fn current_user(&self) -> Option<Record> {
        self.session.read().await.current_user.clone()
    }

    /// The current access token, if logged in.
    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .access_token
            .as_ref()
            .map(|t| t.as_str().to_string())
    }

    /// Subscribe to session changes. Each subscriber receives events on
    /// its own channel; cancel or drop the subscription to detach.
    pub async fn subscribe_user_changes(&self) -> UserChanges {
        self.subscribers.subscribe().await
    }

    // ========================================================================
    // Login and signup
    // ========================================================================

    /// Authenticate with a username and password.
    #[instrument(skip(self, password))]
    pub async fn login_with_username(&self, username: &str, password: &str) -> Result<Record, Error> {
        info!("Logging in");
        self.authenticate(
            AUTH_LOGIN,
            AuthRequest {
                username: Some(username),
                email: None,
                password: Some(password),
            },
        )
        .await
    }

    /// Authenticate with an email address and password.
    #[instrument(skip(self, password))]
    pub async fn login_with_email(&self, email: &str, password: &str) -> Result<Record, Error> {
        info!("Logging in");
        self.authenticate(
            AUTH_LOGIN,
            AuthRequest {
                username: None,
                email: Some(email),
                password: Some(password),
            },
        )
        .await
    }

    /// Create an account with a username and password and log in.
    #[instrument(skip(self, password))]
    pub async fn signup_with_username(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Record, Error> {
        info!("Signing up");
        self.authenticate(
            AUTH_SIGNUP,
            AuthRequest {
                username: Some(username),
                email: None,
                password: Some(password),
            },
        )
        .await
    }

    /// Create an account with an email address and password and log in.
    #[instrument(skip(self, password))]
    pub async fn signup_with_email(&self, email: &str, password: &str) -> Result<Record, Error> {
        info!("Signing up");
        self.authenticate(
            AUTH_SIGNUP,
            AuthRequest {
                username: None,
                email: Some(email),
                password: Some(password),
            },
        )
        .await
    }

    /// Create an anonymous account and log in.
    #[instrument(skip(self))]
    pub async fn signup_anonymously(&self) -> Result<Record, Error> {
        info!("Signing up anonymously");
        self.authenticate(
            AUTH_SIGNUP,
            AuthRequest {
                username: None,
                email: None,
                password: None,
            },
        )
        .await
    }

    async fn authenticate(&self, action: &str, request: AuthRequest<'_>) -> Result<Record, Error> {
        let response = self.transport.send(action, to_payload(&request)).await?;
        let response: AuthResponse = from_payload(response)?;
        let user = Record::from_json(&response.profile)?;

        {
            let mut session = self.session.write().await;
            session.current_user = Some(user.clone());
            session.access_token = Some(AccessToken::new(response.access_token));
        }
        self.subscribers
            .notify(Event {
                user: Some(user.clone()),
            })
            .await;

        debug!(user = %user.record_id(), "Session established");
        Ok(user)
    }

    /// End the current session.
    ///
    /// Clears the current user and access token and notifies user-change
    /// subscribers with an empty session.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), Error> {
        info!("Logging out");
        self.transport.send(AUTH_LOGOUT, json!({})).await?;

        {
            let mut session = self.session.write().await;
            session.current_user = None;
            session.access_token = None;
        }
        self.subscribers.notify(Event { user: None }).await;
        Ok(())
    }

    /// Fetch the server's view of the current user, refreshing the
    /// session state.
    #[instrument(skip(self))]
    pub async fn whoami(&self) -> Result<Record, Error> {
        debug!("Fetching current user");
        let response = self.transport.send(ME, json!({})).await?;
        let response: AuthResponse = from_payload(response)?;
        let user = Record::from_json(&response.profile)?;

        {
            let mut session = self.session.write().await;
            session.current_user = Some(user.clone());
            session.access_token = Some(AccessToken::new(response.access_token));
        }
        Ok(user)
    }

    // ========================================================================
    // Passwords
    // ========================================================================

    /// Change the current user's password.
    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        info!("Changing password");
        let request = ChangePasswordRequest {
            old_password,
            password: new_password,
        };
        self.transport
            .send(AUTH_PASSWORD, to_payload(&request))
            .await?;
        Ok(())
    }

    /// Reset another user's password. Requires admin privileges on the
    /// server side.
    #[instrument(skip(self, new_password))]
    pub async fn admin_reset_password(
        &self,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        info!("Resetting password");
        let request = ResetPasswordRequest {
            user_id,
            password: new_password,
        };
        self.transport
            .send(AUTH_RESET_PASSWORD, to_payload(&request))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Roles
    // ========================================================================

    /// Fetch the roles held by each of the given users.
    ///
    /// Role order within a response is stable but not significant.
    #[instrument(skip(self))]
    pub async fn fetch_user_roles(
        &self,
        user_ids: &[&str],
    ) -> Result<BTreeMap<String, Vec<Role>>, Error> {
        debug!("Fetching user roles");
        let request = RoleGetRequest {
            users: user_ids.to_vec(),
        };
        let response = self.transport.send(ROLE_GET, to_payload(&request)).await?;
        let response: RoleGetResponse = from_payload(response)?;

        let mut result = BTreeMap::new();
        for (user_id, names) in response.result {
            let roles = names
                .into_iter()
                .map(Role::new)
                .collect::<Result<Vec<_>, _>>()?;
            result.insert(user_id, roles);
        }
        Ok(result)
    }

    /// Grant roles to users. Assigning an already-held role succeeds.
    #[instrument(skip(self))]
    pub async fn assign_user_roles(&self, user_ids: &[&str], roles: &[Role]) -> Result<(), Error> {
        debug!("Assigning user roles");
        let request = RoleMutationRequest {
            users: user_ids.to_vec(),
            roles: roles.iter().map(Role::name).collect(),
        };
        self.transport.send(ROLE_ASSIGN, to_payload(&request)).await?;
        Ok(())
    }

    /// Revoke roles from users. Revoking an unheld role succeeds.
    #[instrument(skip(self))]
    pub async fn revoke_user_roles(&self, user_ids: &[&str], roles: &[Role]) -> Result<(), Error> {
        debug!("Revoking user roles");
        let request = RoleMutationRequest {
            users: user_ids.to_vec(),
            roles: roles.iter().map(Role::name).collect(),
        };
        self.transport.send(ROLE_REVOKE, to_payload(&request)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AuthContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContainer").finish_non_exhaustive()
    }
}

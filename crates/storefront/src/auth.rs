//! Sign-up, sign-in and the stored bearer credential.
//!
//! A successful sign-in stores the backend's token response under the `user`
//! storage key and attaches the token to every later request. The cart
//! protocol does not change: requests keep carrying the session id, and the
//! backend may resolve the cart from the credential instead. Because the
//! authoritative cart can switch between the session's and the user's,
//! signing in or out invalidates the [`LocalCartCache`] and publishes a
//! [`ChangeEvent`].

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use cartwheel_core::{ChangeEvent, Email, EmailError, UserId};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::bus::UpdateBus;
use crate::cache::LocalCartCache;
use crate::error::{add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::remote::wire::JwtResponse;
use crate::remote::{ApiClient, RemoteError};
use crate::storage::{KeyValueStore, StorageError, keys};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username missing.
    #[error("username is required")]
    MissingUsername,

    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Wrong username or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The backend refused the registration (for example, a taken username).
    #[error("registration refused")]
    RegistrationRefused,

    #[error("backend error: {0}")]
    Remote(#[from] RemoteError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The signed-in user.
#[derive(Clone)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    token: SecretString,
}

impl AuthenticatedUser {
    fn from_response(response: JwtResponse) -> Self {
        Self {
            id: response.user_id(),
            username: response.username,
            email: response.email,
            roles: response.roles,
            token: SecretString::from(response.access_token),
        }
    }

    fn to_response(&self) -> JwtResponse {
        JwtResponse {
            access_token: self.token.expose_secret().to_string(),
            token_type: "Bearer".to_string(),
            id: self.id.as_i64(),
            username: self.username.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
        }
    }
}

impl fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Manages the client's credential.
///
/// Cheap to clone; clones share the signed-in state.
#[derive(Clone)]
pub struct AuthClient {
    api: ApiClient,
    store: Arc<dyn KeyValueStore>,
    bus: UpdateBus,
    cache: LocalCartCache,
    current: Arc<RwLock<Option<AuthenticatedUser>>>,
}

impl AuthClient {
    #[must_use]
    pub fn new(
        api: ApiClient,
        store: Arc<dyn KeyValueStore>,
        bus: UpdateBus,
        cache: LocalCartCache,
    ) -> Self {
        Self {
            api,
            store,
            bus,
            cache,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Load a stored credential and attach it to the API client.
    ///
    /// An unreadable credential is removed. Does not publish an event.
    ///
    /// # Errors
    ///
    /// Returns an error if client storage cannot be read.
    pub fn restore(&self) -> Result<Option<AuthenticatedUser>, AuthError> {
        let Some(raw) = self.store.get(keys::AUTH_USER)? else {
            return Ok(None);
        };

        match serde_json::from_str::<JwtResponse>(&raw) {
            Ok(response) => {
                let user = AuthenticatedUser::from_response(response);
                self.activate(&user);
                Ok(Some(user))
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable stored credential");
                self.store.remove(keys::AUTH_USER)?;
                Ok(None)
            }
        }
    }

    /// Register a new account. Does not sign in.
    ///
    /// # Errors
    ///
    /// Returns a validation error before contacting the backend, or
    /// [`AuthError::RegistrationRefused`] if the backend refuses.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<(), AuthError> {
        let username = validate_username(username)?;
        let email = Email::parse(email)?;
        validate_password(password.expose_secret())?;

        match self.api.sign_up(username, email.as_str(), password).await {
            Ok(()) => {
                info!("account registered");
                Ok(())
            }
            Err(RemoteError::Rejected(400 | 409)) => Err(AuthError::RegistrationRefused),
            Err(e) => Err(e.into()),
        }
    }

    /// Sign in and keep the credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if the backend refuses the
    /// username or password.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn sign_in(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticatedUser, AuthError> {
        let username = validate_username(username)?;
        if password.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let response = match self.api.sign_in(username, password).await {
            Ok(response) => response,
            Err(RemoteError::Rejected(400 | 401 | 403)) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        let user = AuthenticatedUser::from_response(response);
        let json = serde_json::to_string(&user.to_response()).map_err(|e| StorageError::Corrupt {
            key: keys::AUTH_USER.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(keys::AUTH_USER, &json)?;
        self.activate(&user);
        self.cache.invalidate();

        info!(user_id = %user.id, "signed in");
        add_breadcrumb("auth", "Signed in", None);
        self.bus.publish(ChangeEvent);
        Ok(user)
    }

    /// Forget the credential. Signing out while signed out is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if client storage cannot be written.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        let was_signed_in = self.write().take().is_some();
        self.store.remove(keys::AUTH_USER)?;
        self.api.set_bearer_token(None);
        clear_sentry_user();

        if was_signed_in {
            self.cache.invalidate();
            info!("signed out");
            add_breadcrumb("auth", "Signed out", None);
            self.bus.publish(ChangeEvent);
        }
        Ok(())
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<AuthenticatedUser> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn activate(&self, user: &AuthenticatedUser) {
        self.api.set_bearer_token(Some(user.token.clone()));
        set_sentry_user(&user.id, user.email.as_deref());
        *self.write() = Some(user.clone());
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<AuthenticatedUser>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_username(username: &str) -> Result<&str, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::MissingUsername);
    }
    Ok(username)
}

/// Validate password meets requirements.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

//! Broker Authentication
//!
//! Credential handling and the login handshake for the upstream session.
//!
//! Three credential modes are supported:
//!
//! - **Session token** (`ssid`): sent either as a `Cookie: ssid=...` handshake
//!   header or as a `login` event after the transport opens.
//! - **Email and password**: always sent as a `login` event.
//! - **None**: the session goes live unauthenticated and receives public data.

use tokio_tungstenite::tungstenite::http::header::{self, HeaderName};

use crate::infrastructure::upstream::messages::{LoginRequest, LoginResult};

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A credential field was empty.
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    /// The broker rejected the login.
    #[error("login rejected: {0}")]
    Rejected(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Broker credentials.
///
/// `Debug` and `Display` never print secrets.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// No credentials; public data only.
    #[default]
    None,
    /// Session token.
    SessionToken(String),
    /// Account email and password.
    EmailPassword {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
}

impl Credentials {
    /// Session-token credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty.
    pub fn session_token(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::EmptyField("session token"));
        }
        Ok(Self::SessionToken(token))
    }

    /// Email and password credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either field is empty.
    pub fn email_password(
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let email = email.into();
        let password = password.into();
        if email.is_empty() {
            return Err(AuthError::EmptyField("email"));
        }
        if password.is_empty() {
            return Err(AuthError::EmptyField("password"));
        }
        Ok(Self::EmailPassword { email, password })
    }

    /// Whether any credentials are configured.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Short mode label for logs.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SessionToken(_) => "session_token",
            Self::EmailPassword { .. } => "email_password",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SessionToken(_) => f.debug_tuple("SessionToken").field(&"[REDACTED]").finish(),
            Self::EmailPassword { email, .. } => f
                .debug_struct("EmailPassword")
                .field("email", email)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(mode={})", self.mode())
    }
}

/// How a session token reaches the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsidAuthStrategy {
    /// `Cookie: ssid=<token>` on the WebSocket handshake.
    #[default]
    Header,
    /// `login` event after the transport opens.
    LoginEvent,
}

// =============================================================================
// Authentication State
// =============================================================================

/// Authentication progress of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport open without credentials.
    Anonymous,
    /// `login` sent, awaiting the result.
    Authenticating,
    /// Credentials accepted (or attached to the handshake).
    Authenticated,
    /// Login rejected.
    Failed,
}

impl AuthState {
    /// Whether the connection carries credentials the broker accepted.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Whether a login result is pending.
    #[must_use]
    pub const fn is_authenticating(&self) -> bool {
        matches!(self, Self::Authenticating)
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Drives the login handshake for one session.
///
/// # Example
///
/// ```ignore
/// let mut auth = AuthHandler::new(Credentials::session_token("abc")?, SsidAuthStrategy::LoginEvent);
///
/// // On transport open
/// if let Some(login) = auth.on_connected() {
///     // send login.to_frame(&codec)
/// }
///
/// // On the `login` event
/// auth.on_login_result(&result)?;
/// assert!(auth.is_authenticated());
/// ```
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Credentials,
    strategy: SsidAuthStrategy,
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler.
    #[must_use]
    pub const fn new(credentials: Credentials, strategy: SsidAuthStrategy) -> Self {
        Self {
            credentials,
            strategy,
            state: AuthState::Disconnected,
        }
    }

    /// Current credentials.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Whether the current connection is authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Replace the credentials. Takes effect on the next connection.
    pub fn replace_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
        self.state = AuthState::Disconnected;
    }

    /// Headers to attach to the WebSocket handshake.
    #[must_use]
    pub fn handshake_headers(&self) -> Vec<(HeaderName, String)> {
        match (&self.credentials, self.strategy) {
            (Credentials::SessionToken(token), SsidAuthStrategy::Header) => {
                vec![(header::COOKIE, format!("ssid={token}"))]
            }
            _ => Vec::new(),
        }
    }

    /// Handle transport open. Returns the login to send, if one is needed.
    pub fn on_connected(&mut self) -> Option<LoginRequest> {
        match (&self.credentials, self.strategy) {
            (Credentials::None, _) => {
                self.state = AuthState::Anonymous;
                None
            }
            (Credentials::SessionToken(_), SsidAuthStrategy::Header) => {
                self.state = AuthState::Authenticated;
                None
            }
            (Credentials::SessionToken(ssid), SsidAuthStrategy::LoginEvent) => {
                self.state = AuthState::Authenticating;
                Some(LoginRequest::SessionToken { ssid: ssid.clone() })
            }
            (Credentials::EmailPassword { email, password }, _) => {
                self.state = AuthState::Authenticating;
                Some(LoginRequest::EmailPassword {
                    email: email.clone(),
                    password: password.clone(),
                })
            }
        }
    }

    /// Handle a `login` result.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when the broker refused the login.
    pub fn on_login_result(&mut self, result: &LoginResult) -> Result<(), AuthError> {
        if result.success {
            self.state = AuthState::Authenticated;
            Ok(())
        } else {
            self.state = AuthState::Failed;
            Err(AuthError::Rejected(
                result
                    .message
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }

    /// Reset for a new connection.
    pub const fn reset(&mut self) {
        self.state = AuthState::Disconnected;
    }
}

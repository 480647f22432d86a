//! Authentication lifecycle.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────┐ initialize ┌──────────────┐  restored   ┌───────────────┐
//! │ Unstarted │───────────>│ Initializing │────────────>│ Authenticated │
//! └───────────┘            └──────────────┘             └───────────────┘
//!                                 │ nothing / failed      │ sign_out ▲
//!                                 ↓                       ↓          │ ok
//!                         ┌─────────────────┐ sign_in ┌────────────────┐
//!                         │ Unauthenticated │────────>│ Authenticating │
//!                         └─────────────────┘<────────└────────────────┘
//!                                               failed
//! ```
//!
//! Any other transition is rejected with
//! [`ClientError::InvalidTransition`]. A second `sign_in` while one is
//! pending is rejected with [`ClientError::SignInInProgress`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{ClientError, Result};
use crate::identity::{IdentityHandle, IdentityProvider, LoginOptions};
use crate::types::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Initializing,
    Unauthenticated,
    Authenticating,
    Authenticated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Initializing => "initializing",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<IdentityHandle>,
    pub principal: Option<Principal>,
    pub authenticated: bool,
    pub initialized: bool,
}

struct Inner {
    state: SessionState,
    identity: Option<IdentityHandle>,
    last_error: Option<String>,
}

impl Inner {
    fn session(&self) -> Session {
        Session {
            principal: self.identity.as_ref().map(|i| i.principal.clone()),
            identity: self.identity.clone(),
            authenticated: self.state == SessionState::Authenticated,
            initialized: !matches!(
                self.state,
                SessionState::Unstarted | SessionState::Initializing
            ),
        }
    }

    fn invalid(&self, action: &'static str) -> ClientError {
        ClientError::InvalidTransition {
            from: self.state.as_str(),
            action,
        }
    }
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    options: LoginOptions,
    inner: RwLock<Inner>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, options: LoginOptions) -> Self {
        Self {
            provider,
            options,
            inner: RwLock::new(Inner {
                state: SessionState::Unstarted,
                identity: None,
                last_error: None,
            }),
        }
    }

    /// Restore a previously persisted identity.
    ///
    /// Always ends initialized: a failed or expired restore is simply "no
    /// session".
    pub async fn initialize(&self) -> Result<Session> {
        {
            let mut inner = self.inner.write().await;
            if inner.state != SessionState::Unstarted {
                return Err(inner.invalid("initialize"));
            }
            inner.state = SessionState::Initializing;
        }

        let restored = self.restore().await;

        let mut inner = self.inner.write().await;
        match restored {
            Ok(Some(identity)) => {
                info!(principal = %identity.principal, "Session restored");
                inner.identity = Some(identity);
                inner.state = SessionState::Authenticated;
            }
            Ok(None) => {
                inner.state = SessionState::Unauthenticated;
            }
            Err(e) => {
                warn!("Session restore failed, continuing signed out: {e}");
                inner.state = SessionState::Unauthenticated;
            }
        }
        Ok(inner.session())
    }

    async fn restore(&self) -> Result<Option<IdentityHandle>> {
        if !self.provider.is_authenticated().await? {
            return Ok(None);
        }
        match self.provider.identity().await? {
            Some(identity) if identity.is_expired() => {
                info!(principal = %identity.principal, "Persisted identity has expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Run the provider's sign-in flow.
    pub async fn sign_in(&self) -> Result<Session> {
        {
            let mut inner = self.inner.write().await;
            match inner.state {
                SessionState::Unauthenticated => {}
                SessionState::Authenticating => return Err(ClientError::SignInInProgress),
                _ => return Err(inner.invalid("sign in")),
            }
            inner.state = SessionState::Authenticating;
            inner.last_error = None;
        }

        let outcome = self.provider.login(&self.options).await;

        let mut inner = self.inner.write().await;
        match outcome {
            Ok(identity) => {
                info!(principal = %identity.principal, "Signed in");
                inner.identity = Some(identity);
                inner.state = SessionState::Authenticated;
                Ok(inner.session())
            }
            Err(e) => {
                let message = match e {
                    ClientError::Auth(message) => message,
                    other => other.to_string(),
                };
                warn!("Sign-in failed: {message}");
                inner.identity = None;
                inner.state = SessionState::Unauthenticated;
                inner.last_error = Some(message.clone());
                Err(ClientError::Auth(message))
            }
        }
    }

    /// Drop the local identity, then revoke it with the provider.
    pub async fn sign_out(&self) -> Result<Session> {
        let session = {
            let mut inner = self.inner.write().await;
            if inner.state != SessionState::Authenticated {
                return Err(inner.invalid("sign out"));
            }
            let previous = inner.identity.take();
            inner.state = SessionState::Unauthenticated;
            inner.last_error = None;
            if let Some(identity) = previous {
                info!(principal = %identity.principal, "Signed out");
            }
            inner.session()
        };

        if let Err(e) = self.provider.logout().await {
            warn!("Identity provider logout failed: {e}");
            self.inner.write().await.last_error = Some(e.to_string());
        }
        Ok(session)
    }

    pub async fn session(&self) -> Session {
        self.inner.read().await.session()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn principal(&self) -> Option<Principal> {
        self.inner
            .read()
            .await
            .identity
            .as_ref()
            .map(|i| i.principal.clone())
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }
}

//! Identity-provider boundary.
//!
//! The provider's federation flow is opaque to this crate: it either yields a
//! signed [`IdentityHandle`] or fails. Nothing here signs anything.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::Config;
use crate::errors::Result;
use crate::types::Principal;

/// Opaque signing capability for one principal.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityHandle {
    pub principal: Principal,
    /// Serialized delegation chain issued by the identity provider.
    pub delegation: Vec<u8>,
    /// Epoch seconds after which the delegation is no longer valid.
    pub expires_at: Option<i64>,
}

impl IdentityHandle {
    pub fn new(principal: Principal, delegation: Vec<u8>) -> Self {
        Self {
            principal,
            delegation,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

// The delegation is a bearer credential; keep it out of logs.
impl fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("principal", &self.principal)
            .field("delegation", &format_args!("<{} bytes>", self.delegation.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Options passed to [`IdentityProvider::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
    pub identity_provider_url: String,
    pub max_time_to_live_secs: u64,
}

impl From<&Config> for LoginOptions {
    fn from(config: &Config) -> Self {
        Self {
            identity_provider_url: config.identity_provider_url.clone(),
            max_time_to_live_secs: config.session_ttl_secs,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether a previously persisted identity is available.
    async fn is_authenticated(&self) -> Result<bool>;

    /// The persisted identity, if any.
    async fn identity(&self) -> Result<Option<IdentityHandle>>;

    /// Run the out-of-band sign-in flow. Suspends until the provider reports
    /// success or failure.
    async fn login(&self, options: &LoginOptions) -> Result<IdentityHandle>;

    /// Forget the persisted identity.
    async fn logout(&self) -> Result<()>;
}

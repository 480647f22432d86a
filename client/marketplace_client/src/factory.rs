//! Client construction and principal-scoped bindings.
//!
//! A [`Binding`] ties together everything that is only valid for one
//! identity: the RPC client signing as that identity, the read-through
//! cache and the resolved role. Every identity transition installs a brand
//! new binding into the [`BindingSlot`]:
//!
//! ```text
//!  epoch 0 (anonymous) ──sign-in──► epoch 1 (alice) ──sign-out──► epoch 2 (anonymous)
//! ```
//!
//! Operations snapshot the current binding when they start and write their
//! results into that snapshot only. A call that completes after a transition
//! therefore updates a binding nobody reads any more, and can never leak
//! into the new identity's state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{info, warn};

use crate::cache::LedgerCache;
use crate::errors::ClientError;
use crate::identity::IdentityHandle;
use crate::ledger::{Connector, LedgerClient};
use crate::roles::RoleState;
use crate::types::{Principal, Role};

pub struct Binding {
    epoch: u64,
    principal: Option<Principal>,
    client: Arc<dyn LedgerClient>,
    cache: LedgerCache,
    role: RwLock<RoleState>,
}

impl Binding {
    fn new(epoch: u64, client: Arc<dyn LedgerClient>) -> Self {
        Self {
            epoch,
            principal: client.principal().cloned(),
            client,
            cache: LedgerCache::new(),
            role: RwLock::new(RoleState::Unresolved),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn client(&self) -> &dyn LedgerClient {
        self.client.as_ref()
    }

    pub fn cache(&self) -> &LedgerCache {
        &self.cache
    }

    pub async fn role_state(&self) -> RoleState {
        self.role.read().await.clone()
    }

    pub async fn role(&self) -> Option<Role> {
        self.role.read().await.role()
    }

    pub(crate) async fn set_role_state(&self, state: RoleState) {
        *self.role.write().await = state;
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("epoch", &self.epoch)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Holder of the current [`Binding`].
pub struct BindingSlot {
    current: RwLock<Arc<Binding>>,
    next_epoch: AtomicU64,
}

impl BindingSlot {
    pub fn new(initial: Arc<dyn LedgerClient>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Binding::new(0, initial))),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Snapshot of the binding new calls must use.
    ///
    /// Waits while an identity transition holds the slot.
    pub async fn current(&self) -> Arc<Binding> {
        self.current.read().await.clone()
    }

    /// Hold the slot for the duration of an identity transition.
    pub(crate) async fn lock(&self) -> RwLockWriteGuard<'_, Arc<Binding>> {
        self.current.write().await
    }

    /// Install a fresh binding for `client` through a held slot guard.
    pub(crate) fn install(
        &self,
        guard: &mut RwLockWriteGuard<'_, Arc<Binding>>,
        client: Arc<dyn LedgerClient>,
    ) -> Arc<Binding> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let binding = Arc::new(Binding::new(epoch, client));
        **guard = binding.clone();
        binding
    }
}

/// Outcome of [`ClientFactory::build`].
pub struct BuiltClient {
    pub client: Arc<dyn LedgerClient>,
    /// Set when an authenticated client could not be built and the
    /// anonymous client was substituted.
    pub warning: Option<ClientError>,
}

/// Derives a [`LedgerClient`] for the current identity.
#[derive(Clone)]
pub struct ClientFactory {
    connector: Arc<dyn Connector>,
}

impl ClientFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn anonymous(&self) -> Arc<dyn LedgerClient> {
        self.connector.anonymous()
    }

    /// Build a client for `identity`, falling back to the anonymous client
    /// when there is no identity or the authenticated client cannot be built.
    pub fn build(&self, identity: Option<&IdentityHandle>) -> BuiltClient {
        let Some(identity) = identity else {
            return BuiltClient {
                client: self.connector.anonymous(),
                warning: None,
            };
        };

        let built = self.connector.authenticated(identity).and_then(|client| {
            if client.principal() == Some(&identity.principal) {
                Ok(client)
            } else {
                Err(ClientError::Config(format!(
                    "client bound to {:?}, expected {}",
                    client.principal().map(Principal::as_str),
                    identity.principal
                )))
            }
        });

        match built {
            Ok(client) => {
                info!(principal = %identity.principal, "Authenticated client ready");
                BuiltClient {
                    client,
                    warning: None,
                }
            }
            Err(e) => {
                warn!(principal = %identity.principal, "Falling back to anonymous client: {e}");
                BuiltClient {
                    client: self.connector.anonymous(),
                    warning: Some(e),
                }
            }
        }
    }
}

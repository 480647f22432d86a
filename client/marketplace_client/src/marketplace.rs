//! Root object wiring the session, client factory, role resolver and
//! orchestrator together.
//!
//! Identity flows one way:
//!
//! ```text
//! SessionManager ──► ClientFactory ──► BindingSlot ──► RoleResolver
//!                                          │
//!                                          └──► TransactionOrchestrator
//! ```
//!
//! Every transition (restore, sign-in, sign-out) installs a fresh
//! [`Binding`], which resets every dependent cache in one step, and then
//! re-runs role resolution for the new identity.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::factory::{Binding, BindingSlot, ClientFactory};
use crate::identity::{IdentityProvider, LoginOptions};
use crate::ledger::Connector;
use crate::orchestrator::TransactionOrchestrator;
use crate::roles::RoleResolver;
use crate::rpc::HttpConnector;
use crate::session::{Session, SessionManager};

pub struct Marketplace {
    sessions: SessionManager,
    factory: ClientFactory,
    slot: Arc<BindingSlot>,
    roles: RoleResolver,
    orchestrator: TransactionOrchestrator,
    config_warning: RwLock<Option<String>>,
}

impl Marketplace {
    pub fn new(
        config: &Config,
        provider: Arc<dyn IdentityProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let factory = ClientFactory::new(connector);
        let slot = Arc::new(BindingSlot::new(factory.anonymous()));
        let roles = RoleResolver::new(slot.clone());
        let orchestrator =
            TransactionOrchestrator::new(slot.clone(), roles.clone(), config.enable_dev_faucet);

        Self {
            sessions: SessionManager::new(provider, LoginOptions::from(config)),
            factory,
            slot,
            roles,
            orchestrator,
            config_warning: RwLock::new(None),
        }
    }

    /// Marketplace talking JSON-RPC to `config.rpc_url`.
    pub fn connect(config: &Config, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let connector = HttpConnector::new(config)?;
        Ok(Self::new(config, provider, Arc::new(connector)))
    }

    pub async fn initialize(&self) -> Result<Session> {
        let mut guard = self.slot.lock().await;
        let session = self.sessions.initialize().await?;
        let binding = self.install(&mut guard, &session).await;
        drop(guard);

        self.resolve(&binding).await;
        Ok(session)
    }

    /// Sign in through the identity provider.
    ///
    /// Calls issued while the flow is pending keep using the anonymous
    /// binding.
    ///
    /// A sign-out that takes the slot between login and install wins: the
    /// binding is only installed if the session still belongs to the
    /// principal that just logged in.
    pub async fn sign_in(&self) -> Result<Session> {
        let signed_in = self.sessions.sign_in().await?;

        let mut guard = self.slot.lock().await;
        let session = self.sessions.session().await;
        if !session.authenticated || session.principal != signed_in.principal {
            warn!(
                principal = ?signed_in.principal.as_ref().map(|p| p.as_str()),
                "Sign-in superseded before its binding was installed"
            );
            return Ok(session);
        }
        let binding = self.install(&mut guard, &session).await;
        drop(guard);

        self.resolve(&binding).await;
        Ok(session)
    }

    /// Sign out and discard every identity-dependent cache.
    ///
    /// The slot is held across the transition, so no new call can pick up
    /// the outgoing identity's client once sign-out has begun.
    pub async fn sign_out(&self) -> Result<Session> {
        let mut guard = self.slot.lock().await;
        let session = self.sessions.sign_out().await?;
        let binding = self.install(&mut guard, &session).await;
        drop(guard);

        self.resolve(&binding).await;
        Ok(session)
    }

    async fn install(
        &self,
        guard: &mut tokio::sync::RwLockWriteGuard<'_, Arc<Binding>>,
        session: &Session,
    ) -> Arc<Binding> {
        let built = self.factory.build(session.identity.as_ref());
        *self.config_warning.write().await = built.warning.map(|e| e.to_string());

        let binding = self.slot.install(guard, built.client);
        info!(
            epoch = binding.epoch(),
            principal = ?binding.principal().map(|p| p.as_str()),
            "Installed binding"
        );
        binding
    }

    async fn resolve(&self, binding: &Binding) {
        if let Err(e) = self.roles.resolve_binding(binding).await {
            warn!(epoch = binding.epoch(), "Role resolution deferred: {e}");
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }

    /// Binding new calls are issued against.
    pub async fn binding(&self) -> Arc<Binding> {
        self.slot.current().await
    }

    /// Set when the last transition could not build an authenticated client
    /// and fell back to the anonymous one.
    pub async fn config_warning(&self) -> Option<String> {
        self.config_warning.read().await.clone()
    }
}

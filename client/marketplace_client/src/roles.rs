//! Role resolution and capability gates.
//!
//! Resolution is two calls: a cheap `isUserRegistered` existence check, then
//! `getMyAccount` only for registered callers. The outcome is one of:
//!
//! | State           | Meaning                                            |
//! |-----------------|----------------------------------------------------|
//! | `Unresolved`    | nothing known yet (fresh binding, or last try failed) |
//! | `NotRegistered` | caller has no account (or is anonymous)            |
//! | `Registered`    | account fetched and cached                         |
//! | `Unreadable`    | registered, but the account fetch was rejected     |
//!
//! Capabilities are derived from the role alone, never from cached
//! financial data.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{ClientError, Result};
use crate::factory::{Binding, BindingSlot};
use crate::ledger::LedgerClient;
use crate::types::{LedgerResult, Principal, Role, RoleAccount};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleState {
    #[default]
    Unresolved,
    NotRegistered,
    Registered(RoleAccount),
    Unreadable(String),
}

impl RoleState {
    pub fn account(&self) -> Option<&RoleAccount> {
        match self {
            Self::Registered(account) => Some(account),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.account().map(|a| a.role)
    }

    /// Registered, whether or not the account could be read.
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered(_) | Self::Unreadable(_))
    }
}

/// What the resolved role allows the caller to attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_create_project: bool,
    pub can_apply_to_project: bool,
    pub can_approve_applicant: bool,
    pub can_deposit_to_escrow: bool,
    pub can_withdraw_escrow: bool,
    pub can_release_funds: bool,
    pub can_stake: bool,
    pub can_create_proposal: bool,
    pub can_vote: bool,
}

impl Capabilities {
    pub fn for_role(role: Option<Role>) -> Self {
        let requester = role == Some(Role::Requester);
        let provider = role == Some(Role::Provider);
        let registered = role.is_some();
        Self {
            can_create_project: requester,
            can_apply_to_project: provider,
            can_approve_applicant: requester,
            can_deposit_to_escrow: requester,
            can_withdraw_escrow: requester,
            can_release_funds: requester,
            can_stake: registered,
            can_create_proposal: registered,
            can_vote: registered,
        }
    }
}

/// Determine the role state of `principal` through `client`.
///
/// Performs no call for an anonymous caller.
pub async fn resolve_role(
    principal: Option<&Principal>,
    client: &dyn LedgerClient,
) -> Result<RoleState> {
    let Some(principal) = principal else {
        return Ok(RoleState::NotRegistered);
    };

    if !client.is_user_registered(principal).await? {
        debug!(%principal, "Caller is not registered");
        return Ok(RoleState::NotRegistered);
    }

    match client.get_my_account().await? {
        LedgerResult::Ok(account) if &account.principal == principal => {
            Ok(RoleState::Registered(account))
        }
        LedgerResult::Ok(account) => Ok(RoleState::Unreadable(format!(
            "account returned for {} instead of {principal}",
            account.principal
        ))),
        LedgerResult::Err(message) => Ok(RoleState::Unreadable(message)),
    }
}

/// Resolves and caches the caller's role on the current binding.
#[derive(Clone)]
pub struct RoleResolver {
    slot: Arc<BindingSlot>,
}

impl RoleResolver {
    pub fn new(slot: Arc<BindingSlot>) -> Self {
        Self { slot }
    }

    /// Re-run resolution for whoever is currently signed in.
    pub async fn resolve(&self) -> Result<RoleState> {
        let binding = self.slot.current().await;
        self.resolve_binding(&binding).await
    }

    /// Resolve `binding`'s principal and store the outcome on that binding.
    ///
    /// A transport failure leaves the binding `Unresolved`; a rejected
    /// account fetch leaves it `Unreadable` and is reported as
    /// [`ClientError::AccountUnreadable`].
    pub async fn resolve_binding(&self, binding: &Binding) -> Result<RoleState> {
        match resolve_role(binding.principal(), binding.client()).await {
            Ok(state) => {
                binding.set_role_state(state.clone()).await;
                match &state {
                    RoleState::Registered(account) => {
                        info!(principal = %account.principal, role = %account.role, epoch = binding.epoch(), "Role resolved");
                        binding.cache().clear_error().await;
                        Ok(state)
                    }
                    RoleState::Unreadable(message) => {
                        warn!(epoch = binding.epoch(), "Account unreadable: {message}");
                        binding.cache().set_error(message.clone()).await;
                        Err(ClientError::AccountUnreadable(message.clone()))
                    }
                    _ => Ok(state),
                }
            }
            Err(e) => {
                warn!(epoch = binding.epoch(), "Role resolution failed: {e}");
                binding.set_role_state(RoleState::Unresolved).await;
                binding.cache().set_error(e.to_string()).await;
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> RoleState {
        self.slot.current().await.role_state().await
    }

    pub async fn account(&self) -> Option<RoleAccount> {
        self.state().await.account().cloned()
    }

    pub async fn role(&self) -> Option<Role> {
        self.state().await.role()
    }

    pub async fn is_requester(&self) -> bool {
        self.role().await == Some(Role::Requester)
    }

    pub async fn is_provider(&self) -> bool {
        self.role().await == Some(Role::Provider)
    }

    pub async fn capabilities(&self) -> Capabilities {
        Capabilities::for_role(self.role().await)
    }
}

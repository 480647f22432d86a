//! Guarded marketplace operations.
//!
//! Every mutating operation runs the same four steps:
//!
//! 1. **Local checks**: role, non-empty input, non-zero amounts and
//!    cached balances. Advisory only; a failure returns
//!    [`ClientError::Precondition`] without any remote call. A check whose
//!    cached input is unknown is skipped and left to the backend.
//! 2. **Invocation** through the binding's [`LedgerClient`].
//! 3. **Interpretation**:
//!    - `{ok}` clears the binding's error and re-fetches exactly the
//!      affected cache entries;
//!    - `{err}` is returned verbatim as [`ClientError::Rejected`] and
//!      nothing cached is touched.
//! 4. **Transport failure**: the backend may or may not have applied the
//!    call, so the affected entries are re-fetched (or dropped when that
//!    fails too) instead of being trusted.
//!
//! | Operation            | Refreshes                                   |
//! |----------------------|---------------------------------------------|
//! | `create_project`     | projects, my projects                       |
//! | `apply_to_project`   | projects, applicants, my applications       |
//! | `approve_applicant`  | applicants, projects, my projects           |
//! | `deposit_to_escrow`  | escrow, balance                             |
//! | `withdraw_escrow`    | escrow, balance                             |
//! | `release_funds`      | escrow, projects, my projects               |
//! | `stake_tokens`       | stake, balance                              |
//! | `create_proposal`    | proposals                                   |
//! | `vote_on_proposal`   | proposals                                   |
//! | `register_user`      | role (re-resolved)                          |
//! | `faucet`             | balance                                     |
//!
//! Each operation snapshots the current [`Binding`] once and uses it for the
//! call and every follow-up refresh, so results always land in the cache of
//! the identity that issued the call.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::CacheEntry;
use crate::errors::{ClientError, PreconditionError, Result};
use crate::factory::{Binding, BindingSlot};
use crate::governance;
use crate::roles::{RoleResolver, RoleState};
use crate::types::{
    FinancialProject, LedgerResult, Principal, Profile, ProjectId, ProjectInput, Proposal,
    ProposalId, ProposalInput, ProposalStatus, RegistrationInput, Role, RoleAccount, Tokens,
};

#[derive(Clone)]
pub struct TransactionOrchestrator {
    slot: Arc<BindingSlot>,
    roles: RoleResolver,
    faucet_enabled: bool,
}

impl TransactionOrchestrator {
    pub fn new(slot: Arc<BindingSlot>, roles: RoleResolver, faucet_enabled: bool) -> Self {
        Self {
            slot,
            roles,
            faucet_enabled,
        }
    }

    /// Last error surfaced on the current binding.
    pub async fn last_error(&self) -> Option<String> {
        self.slot.current().await.cache().last_error().await
    }

    // ─────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────

    pub async fn create_project(&self, input: ProjectInput) -> Result<FinancialProject> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_role(&binding, Role::Requester).await?;
            require_text("title", &input.title)?;
            require_text("description", &input.description)?;
            require_amount(input.budget)?;

            self.submit(
                &binding,
                "createProject",
                binding.client().create_project(&input),
                &[CacheEntry::Projects, CacheEntry::MyProjects],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn apply_to_project(&self, id: ProjectId) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            let me = caller(&binding)?;
            require_role(&binding, Role::Provider).await?;
            if binding.cache().has_applied(id, me).await {
                return Err(PreconditionError::AlreadyApplied(id).into());
            }

            self.submit(
                &binding,
                "applyToProject",
                binding.client().apply_to_project(id),
                &[
                    CacheEntry::Projects,
                    CacheEntry::Applicants(id),
                    CacheEntry::MyApplications,
                ],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn approve_applicant(&self, id: ProjectId, applicant: &Principal) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            let me = caller(&binding)?;
            require_role(&binding, Role::Requester).await?;
            if let Some(project) = binding.cache().project(id).await {
                if &project.owner != me {
                    return Err(PreconditionError::NotProjectOwner(id).into());
                }
            }

            self.submit(
                &binding,
                "approveApplicant",
                binding.client().approve_applicant(id, applicant),
                &[
                    CacheEntry::Applicants(id),
                    CacheEntry::Projects,
                    CacheEntry::MyProjects,
                ],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    // ─────────────────────────────────────────────────────
    // Escrow
    // ─────────────────────────────────────────────────────

    pub async fn deposit_to_escrow(&self, id: ProjectId, amount: Tokens) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_role(&binding, Role::Requester).await?;
            require_amount(amount)?;
            require_balance(&binding, amount).await?;

            self.submit(
                &binding,
                "depositToEscrow",
                binding.client().deposit_to_escrow(id, amount),
                &[CacheEntry::Escrow(id), CacheEntry::Balance],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn withdraw_escrow(&self, id: ProjectId) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_role(&binding, Role::Requester).await?;
            if let Some(project) = binding.cache().project(id).await {
                if project.is_completed {
                    return Err(PreconditionError::ProjectCompleted(id).into());
                }
            }

            self.submit(
                &binding,
                "withdrawEscrow",
                binding.client().withdraw_escrow(id),
                &[CacheEntry::Escrow(id), CacheEntry::Balance],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn release_funds(&self, id: ProjectId, provider: &Principal) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_role(&binding, Role::Requester).await?;
            if binding.cache().escrow(id).await == Some(0) {
                return Err(PreconditionError::EmptyEscrow(id).into());
            }
            if let Some(project) = binding.cache().project(id).await {
                if project.is_completed {
                    return Err(PreconditionError::ProjectCompleted(id).into());
                }
                match &project.selected_provider {
                    None => return Err(PreconditionError::NoProviderSelected(id).into()),
                    Some(selected) if selected != provider => {
                        return Err(PreconditionError::ProviderMismatch(id).into())
                    }
                    Some(_) => {}
                }
            }

            self.submit(
                &binding,
                "releaseFunds",
                binding.client().release_funds(id, provider),
                &[
                    CacheEntry::Escrow(id),
                    CacheEntry::Projects,
                    CacheEntry::MyProjects,
                ],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    // ─────────────────────────────────────────────────────
    // Staking & governance
    // ─────────────────────────────────────────────────────

    pub async fn stake_tokens(&self, amount: Tokens) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_amount(amount)?;
            require_balance(&binding, amount).await?;

            self.submit(
                &binding,
                "stakeTokens",
                binding.client().stake_tokens(amount),
                &[CacheEntry::Stake, CacheEntry::Balance],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn create_proposal(&self, input: ProposalInput) -> Result<Proposal> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            require_text("title", &input.title)?;
            require_text("description", &input.description)?;
            if let Some(staked) = binding.cache().stake().await {
                let required = governance::min_proposal_stake(binding.role().await);
                if staked < required {
                    return Err(PreconditionError::InsufficientStake { staked, required }.into());
                }
            }

            self.submit(
                &binding,
                "createProposal",
                binding.client().create_proposal(&input),
                &[CacheEntry::Proposals],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    pub async fn vote_on_proposal(&self, id: ProposalId, support: bool) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            if binding.cache().stake().await == Some(0) {
                return Err(PreconditionError::InsufficientStake {
                    staked: 0,
                    required: 1,
                }
                .into());
            }
            if let Some(proposal) = binding.cache().proposal(id).await {
                if proposal.status_at(Utc::now().timestamp()) == ProposalStatus::Ended {
                    return Err(PreconditionError::ProposalClosed(id).into());
                }
            }

            self.submit(
                &binding,
                "voteOnProposal",
                binding.client().vote_on_proposal(id, support),
                &[CacheEntry::Proposals],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    /// Voting power of the caller from their resolved role and their stake
    /// as last returned by the backend (fetched if not cached yet).
    pub async fn voting_power(&self) -> Result<f64> {
        let binding = self.slot.current().await;
        let stake = match binding.cache().stake().await {
            Some(stake) => stake,
            None => record(&binding, self.fetch_stake(&binding).await).await?,
        };
        Ok(governance::voting_power(binding.role().await, stake))
    }

    // ─────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────

    /// Register the caller, then re-resolve their role.
    ///
    /// A failed re-resolution does not fail the registration; it is left on
    /// the binding's role state and in [`Self::last_error`].
    pub async fn register_user(&self, input: RegistrationInput) -> Result<RoleAccount> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            caller(&binding)?;
            self.submit(
                &binding,
                "registerUser",
                binding.client().register_user(&input),
                &[],
            )
            .await
        }
        .await;
        let account = record(&binding, outcome).await?;

        if let Err(e) = self.roles.resolve_binding(&binding).await {
            warn!("Role re-resolution after registration failed: {e}");
        }
        Ok(account)
    }

    /// Development faucet: credit the caller's balance.
    pub async fn faucet(&self, amount: Tokens) -> Result<()> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            if !self.faucet_enabled {
                return Err(PreconditionError::FaucetDisabled.into());
            }
            let me = caller(&binding)?.clone();
            require_amount(amount)?;

            self.submit(
                &binding,
                "addUserBalance",
                binding.client().add_user_balance(&me, amount),
                &[CacheEntry::Balance],
            )
            .await
        }
        .await;
        record(&binding, outcome).await
    }

    // ─────────────────────────────────────────────────────
    // Loaders
    // ─────────────────────────────────────────────────────

    pub async fn load_projects(&self) -> Result<Vec<FinancialProject>> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_projects(&binding).await).await
    }

    pub async fn load_my_projects(&self) -> Result<Vec<FinancialProject>> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_my_projects(&binding).await).await
    }

    pub async fn load_my_applications(&self) -> Result<Vec<FinancialProject>> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_my_applications(&binding).await).await
    }

    pub async fn load_applicants(&self, id: ProjectId) -> Result<Vec<Principal>> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_applicants(&binding, id).await).await
    }

    pub async fn load_escrow_balance(&self, id: ProjectId) -> Result<Tokens> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_escrow(&binding, id).await).await
    }

    pub async fn load_balance(&self) -> Result<Tokens> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_balance(&binding).await).await
    }

    pub async fn load_stake(&self) -> Result<Tokens> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_stake(&binding).await).await
    }

    pub async fn load_proposals(&self) -> Result<Vec<Proposal>> {
        let binding = self.slot.current().await;
        record(&binding, self.fetch_proposals(&binding).await).await
    }

    pub async fn load_profile(&self, principal: &Principal) -> Result<Profile> {
        let binding = self.slot.current().await;
        let outcome: Result<_> = async {
            let profile = binding.client().get_profile(principal).await?.into_result()?;
            binding
                .cache()
                .set_profile(principal.clone(), profile.clone())
                .await;
            Ok(profile)
        }
        .await;
        record(&binding, outcome).await
    }

    // ─────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────

    async fn submit<T>(
        &self,
        binding: &Binding,
        op: &'static str,
        call: impl Future<Output = Result<LedgerResult<T>>>,
        affected: &[CacheEntry],
    ) -> Result<T> {
        match call.await {
            Ok(LedgerResult::Ok(value)) => {
                info!(op, epoch = binding.epoch(), "Accepted by backend");
                self.refresh(binding, affected).await;
                Ok(value)
            }
            Ok(LedgerResult::Err(message)) => {
                warn!(op, epoch = binding.epoch(), "Rejected by backend: {message}");
                Err(ClientError::Rejected(message))
            }
            Err(e) => {
                warn!(op, epoch = binding.epoch(), "Transport failure, outcome unknown: {e}");
                self.refresh(binding, affected).await;
                Err(e)
            }
        }
    }

    /// Re-fetch `entries`; an entry that cannot be re-fetched is dropped.
    async fn refresh(&self, binding: &Binding, entries: &[CacheEntry]) {
        for entry in entries {
            let refreshed = match *entry {
                CacheEntry::Projects => self.fetch_projects(binding).await.map(drop),
                CacheEntry::MyProjects => self.fetch_my_projects(binding).await.map(drop),
                CacheEntry::MyApplications => self.fetch_my_applications(binding).await.map(drop),
                CacheEntry::Applicants(id) => self.fetch_applicants(binding, id).await.map(drop),
                CacheEntry::Escrow(id) => self.fetch_escrow(binding, id).await.map(drop),
                CacheEntry::Balance => self.fetch_balance(binding).await.map(drop),
                CacheEntry::Stake => self.fetch_stake(binding).await.map(drop),
                CacheEntry::Proposals => self.fetch_proposals(binding).await.map(drop),
            };
            if let Err(e) = refreshed {
                warn!(?entry, epoch = binding.epoch(), "Refresh failed, dropping entry: {e}");
                binding.cache().invalidate(*entry).await;
            }
        }
    }

    async fn fetch_projects(&self, binding: &Binding) -> Result<Vec<FinancialProject>> {
        let projects = binding.client().get_projects().await?;
        debug!(count = projects.len(), epoch = binding.epoch(), "Projects refreshed");
        binding.cache().set_projects(projects.clone()).await;
        Ok(projects)
    }

    async fn fetch_my_projects(&self, binding: &Binding) -> Result<Vec<FinancialProject>> {
        caller(binding)?;
        let projects = binding.client().get_my_client_projects().await?;
        binding.cache().set_my_projects(projects.clone()).await;
        Ok(projects)
    }

    async fn fetch_my_applications(&self, binding: &Binding) -> Result<Vec<FinancialProject>> {
        caller(binding)?;
        let projects = binding.client().get_my_creative_applications().await?;
        binding.cache().set_my_applications(projects.clone()).await;
        Ok(projects)
    }

    async fn fetch_applicants(&self, binding: &Binding, id: ProjectId) -> Result<Vec<Principal>> {
        let applicants = binding
            .client()
            .get_project_applicants(id)
            .await?
            .into_result()?;
        binding.cache().set_applicants(id, applicants.clone()).await;
        Ok(applicants)
    }

    async fn fetch_escrow(&self, binding: &Binding, id: ProjectId) -> Result<Tokens> {
        let balance = binding.client().get_escrow_balance(id).await?.into_result()?;
        debug!(project = id, balance, epoch = binding.epoch(), "Escrow refreshed");
        binding.cache().set_escrow(id, balance).await;
        Ok(balance)
    }

    async fn fetch_balance(&self, binding: &Binding) -> Result<Tokens> {
        let me = caller(binding)?;
        let balance = binding.client().get_user_balance(me).await?;
        binding.cache().set_balance(balance).await;
        Ok(balance)
    }

    async fn fetch_stake(&self, binding: &Binding) -> Result<Tokens> {
        let me = caller(binding)?;
        let stake = binding.client().get_user_stake(me).await?;
        binding.cache().set_stake(stake).await;
        Ok(stake)
    }

    async fn fetch_proposals(&self, binding: &Binding) -> Result<Vec<Proposal>> {
        let proposals = binding.client().get_all_proposals().await?;
        binding.cache().set_proposals(proposals.clone()).await;
        Ok(proposals)
    }
}

/// Mirror an operation's outcome into the binding's error slot.
async fn record<T>(binding: &Binding, outcome: Result<T>) -> Result<T> {
    match &outcome {
        Ok(_) => binding.cache().clear_error().await,
        Err(e) => binding.cache().set_error(e.to_string()).await,
    }
    outcome
}

fn caller(binding: &Binding) -> Result<&Principal> {
    binding
        .principal()
        .ok_or_else(|| PreconditionError::NotAuthenticated.into())
}

async fn require_role(binding: &Binding, required: Role) -> Result<()> {
    match binding.role_state().await {
        RoleState::NotRegistered => Err(ClientError::NotRegistered),
        state if state.role() == Some(required) => Ok(()),
        _ => Err(PreconditionError::WrongRole { required }.into()),
    }
}

fn require_text(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(PreconditionError::EmptyField(field).into())
    } else {
        Ok(())
    }
}

fn require_amount(amount: Tokens) -> Result<()> {
    if amount == 0 {
        Err(PreconditionError::ZeroAmount.into())
    } else {
        Ok(())
    }
}

async fn require_balance(binding: &Binding, requested: Tokens) -> Result<()> {
    match binding.cache().balance().await {
        Some(available) if requested > available => {
            Err(PreconditionError::InsufficientBalance {
                requested,
                available,
            }
            .into())
        }
        _ => Ok(()),
    }
}

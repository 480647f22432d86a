//! The remote ledger surface consumed by this crate.
//!
//! Every operation either completes with the backend's answer or fails at the
//! transport level:
//!
//! * `Ok(LedgerResult::Ok(_))`: backend accepted the call
//! * `Ok(LedgerResult::Err(_))`: backend rejected it (business rule)
//! * `Err(_)`: no answer was obtained; effect unknown

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::identity::IdentityHandle;
use crate::types::{
    FinancialProject, LedgerResult, Principal, Profile, ProjectId, ProjectInput, Proposal,
    ProposalId, ProposalInput, RegistrationInput, RoleAccount, Tokens,
};

/// RPC client bound to exactly one caller identity (or to none).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Principal this client signs as; `None` for the anonymous client.
    fn principal(&self) -> Option<&Principal>;

    // ── Accounts ─────────────────────────────────────────

    async fn is_user_registered(&self, principal: &Principal) -> Result<bool>;

    async fn get_my_account(&self) -> Result<LedgerResult<RoleAccount>>;

    async fn get_profile(&self, principal: &Principal) -> Result<LedgerResult<Profile>>;

    async fn register_user(&self, input: &RegistrationInput) -> Result<LedgerResult<RoleAccount>>;

    async fn get_user_balance(&self, principal: &Principal) -> Result<Tokens>;

    /// Development faucet.
    async fn add_user_balance(
        &self,
        principal: &Principal,
        amount: Tokens,
    ) -> Result<LedgerResult<()>>;

    // ── Projects ─────────────────────────────────────────

    async fn get_projects(&self) -> Result<Vec<FinancialProject>>;

    async fn get_my_client_projects(&self) -> Result<Vec<FinancialProject>>;

    async fn get_my_creative_applications(&self) -> Result<Vec<FinancialProject>>;

    async fn create_project(&self, input: &ProjectInput) -> Result<LedgerResult<FinancialProject>>;

    async fn apply_to_project(&self, id: ProjectId) -> Result<LedgerResult<()>>;

    async fn get_project_applicants(&self, id: ProjectId) -> Result<LedgerResult<Vec<Principal>>>;

    async fn approve_applicant(
        &self,
        id: ProjectId,
        applicant: &Principal,
    ) -> Result<LedgerResult<()>>;

    // ── Escrow ───────────────────────────────────────────

    async fn get_escrow_balance(&self, id: ProjectId) -> Result<LedgerResult<Tokens>>;

    async fn deposit_to_escrow(&self, id: ProjectId, amount: Tokens) -> Result<LedgerResult<()>>;

    async fn withdraw_escrow(&self, id: ProjectId) -> Result<LedgerResult<()>>;

    async fn release_funds(&self, id: ProjectId, provider: &Principal)
        -> Result<LedgerResult<()>>;

    // ── Staking & governance ─────────────────────────────

    async fn get_user_stake(&self, principal: &Principal) -> Result<Tokens>;

    async fn stake_tokens(&self, amount: Tokens) -> Result<LedgerResult<()>>;

    async fn get_all_proposals(&self) -> Result<Vec<Proposal>>;

    async fn create_proposal(&self, input: &ProposalInput) -> Result<LedgerResult<Proposal>>;

    async fn vote_on_proposal(&self, id: ProposalId, support: bool) -> Result<LedgerResult<()>>;
}

/// Builds [`LedgerClient`]s for a given identity.
pub trait Connector: Send + Sync {
    /// Client for unauthenticated, read-only use. Never fails.
    fn anonymous(&self) -> Arc<dyn LedgerClient>;

    /// Client signing as `identity`.
    fn authenticated(&self, identity: &IdentityHandle) -> Result<Arc<dyn LedgerClient>>;
}

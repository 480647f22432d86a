//! # Marketplace Client
//!
//! Client-side session, role-resolution and transaction layer for the
//! marketplace ledger backend. Presentation code drives everything through
//! one [`Marketplace`]:
//!
//! | Phase          | Entry point(s)                                                   |
//! |----------------|------------------------------------------------------------------|
//! | Startup        | [`Marketplace::initialize`]                                      |
//! | Identity       | [`Marketplace::sign_in`], [`Marketplace::sign_out`]              |
//! | Role gating    | [`RoleResolver::capabilities`], `is_requester`, `is_provider`    |
//! | Projects       | `create_project`, `apply_to_project`, `approve_applicant`        |
//! | Escrow         | `deposit_to_escrow`, `withdraw_escrow`, `release_funds`          |
//! | Governance     | `stake_tokens`, `create_proposal`, `vote_on_proposal`            |
//! | Reads          | `load_*` on [`TransactionOrchestrator`]                          |
//!
//! ## Architecture
//!
//! The backend is the only source of truth. Balances, applicant sets and
//! tallies shown to a user are either the literal answer of the last
//! successful call or the result of re-querying the backend after it; no
//! financial value is ever adjusted locally.
//!
//! State that depends on who is signed in hangs off a [`Binding`]. Replacing
//! the binding on every identity change is what guarantees that nothing
//! cached for one principal is ever shown to another.

mod cache;
mod config;
mod errors;
mod factory;
mod governance;
mod identity;
mod ledger;
mod marketplace;
mod orchestrator;
mod roles;
mod rpc;
mod session;
mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod testing;

#[cfg(test)]
mod test_escrow;
#[cfg(test)]
mod test_projects;
#[cfg(test)]
mod test_session_flow;

pub use cache::{CacheEntry, CacheState, LedgerCache};
pub use config::Config;
pub use errors::{ClientError, PreconditionError, Result};
pub use factory::{Binding, BindingSlot, BuiltClient, ClientFactory};
pub use governance::{min_proposal_stake, voting_multiplier, voting_power};
pub use identity::{IdentityHandle, IdentityProvider, LoginOptions};
pub use ledger::{Connector, LedgerClient};
pub use marketplace::Marketplace;
pub use orchestrator::TransactionOrchestrator;
pub use roles::{resolve_role, Capabilities, RoleResolver, RoleState};
pub use rpc::{HttpConnector, HttpLedgerClient};
pub use session::{Session, SessionManager, SessionState};
pub use types::{
    FinancialProject, LedgerResult, Principal, Profile, ProjectId, ProjectInput, Proposal,
    ProposalId, ProposalInput, ProposalStatus, ProviderInfo, RegistrationInput, RequesterInfo,
    Role, RoleAccount, RoleInfo, Tokens, VerificationStatus,
};

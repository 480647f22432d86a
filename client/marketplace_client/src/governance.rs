//! Role-dependent governance rules evaluated locally.
//!
//! These only steer the client away from calls that are obviously going to
//! be rejected. The backend applies its own thresholds and has the final say.

use crate::types::{Role, Tokens};

/// Minimum stake a Requester must hold to open a proposal.
pub const REQUESTER_MIN_PROPOSAL_STAKE: Tokens = 1_000;
/// Minimum stake a Provider must hold to open a proposal.
pub const PROVIDER_MIN_PROPOSAL_STAKE: Tokens = 500;
/// Minimum stake for callers without a resolved role.
pub const DEFAULT_MIN_PROPOSAL_STAKE: Tokens = 1_000;

pub fn voting_multiplier(role: Option<Role>) -> f64 {
    match role {
        Some(Role::Requester) => 1.5,
        Some(Role::Provider) => 1.2,
        None => 1.0,
    }
}

/// Voting power of `stake` tokens held by a caller with `role`.
pub fn voting_power(role: Option<Role>, stake: Tokens) -> f64 {
    stake as f64 * voting_multiplier(role)
}

pub fn min_proposal_stake(role: Option<Role>) -> Tokens {
    match role {
        Some(Role::Requester) => REQUESTER_MIN_PROPOSAL_STAKE,
        Some(Role::Provider) => PROVIDER_MIN_PROPOSAL_STAKE,
        None => DEFAULT_MIN_PROPOSAL_STAKE,
    }
}

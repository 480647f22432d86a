//! Client-wide error types.
//!
//! Failures fall into four families that callers must be able to tell apart:
//!
//! | Family        | Variants                                              | Backend effect   |
//! |---------------|-------------------------------------------------------|------------------|
//! | Local         | `Precondition`                                        | none, no call    |
//! | Rejection     | `Rejected`                                            | none             |
//! | Transport     | `Transport`, `Http`, `Json`, `Rpc`                    | unknown          |
//! | Configuration | `Config`                                              | none             |
//!
//! Registration and session errors (`NotRegistered`, `AccountUnreadable`,
//! `Auth`, `SignInInProgress`, `InvalidTransition`) are recoverable and never
//! touch the backend's financial state.

use thiserror::Error;

use crate::types::{ProjectId, ProposalId, Role};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// Well-formed `{err}` answer from the backend, carried verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Caller is not registered")]
    NotRegistered,

    #[error("Account is registered but could not be read: {0}")]
    AccountUnreadable(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Sign-in already in progress")]
    SignInInProgress,

    #[error("Invalid session transition: cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
}

impl ClientError {
    /// `true` when the failure happened before a `{ok}`/`{err}` answer was
    /// obtained, so the backend may or may not have applied the call.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http(_) | Self::Json(_) | Self::Rpc { .. }
        )
    }

    /// `true` for a backend business-rule rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Local, advisory checks that short-circuit an operation before any remote
/// call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("operation requires an authenticated session")]
    NotAuthenticated,

    #[error("operation requires the {required} role")]
    WrongRole { required: Role },

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("requested {requested} exceeds available balance {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("already applied to project {0}")]
    AlreadyApplied(ProjectId),

    #[error("caller does not own project {0}")]
    NotProjectOwner(ProjectId),

    #[error("project {0} is already completed")]
    ProjectCompleted(ProjectId),

    #[error("escrow for project {0} is empty")]
    EmptyEscrow(ProjectId),

    #[error("project {0} has no selected provider")]
    NoProviderSelected(ProjectId),

    #[error("funds for project {0} can only be released to its selected provider")]
    ProviderMismatch(ProjectId),

    #[error("staked {staked} is below the required {required}")]
    InsufficientStake { staked: u64, required: u64 },

    #[error("proposal {0} is no longer active")]
    ProposalClosed(ProposalId),

    #[error("the development faucet is disabled")]
    FaucetDisabled,
}

pub type Result<T> = std::result::Result<T, ClientError>;

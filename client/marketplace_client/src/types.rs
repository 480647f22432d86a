//! # Types
//!
//! Records exchanged with the marketplace backend.
//!
//! The client never constructs any of these on its own authority: accounts,
//! projects, proposals and balances are whatever the backend last returned.
//!
//! ## Optional fields on the wire
//!
//! The backend encodes optional values either as `null`, as an empty list
//! (`[]`) or as a singleton list (`[x]`). The [`opt`] helper converts all
//! three into [`Option`] at the deserialization boundary, so no other module
//! ever unwraps the list form.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{ClientError, Result};

pub type ProjectId = u64;
pub type ProposalId = u64;
/// Integer token amount.
pub type Tokens = u64;

/// Stable identifier of a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ─────────────────────────────────────────────────────────
// Result variant
// ─────────────────────────────────────────────────────────

/// `{ "ok": T }` or `{ "err": "message" }`, as returned by every mutating
/// backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerResult<T> {
    Ok(T),
    Err(String),
}

impl<T> LedgerResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Convert into a client [`Result`], mapping `{err}` onto
    /// [`ClientError::Rejected`] with the backend message untouched.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(message) => Err(ClientError::Rejected(message)),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────

/// Closed set of marketplace roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Requester,
    Provider,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requester => f.write_str("Requester"),
            Self::Provider => f.write_str("Provider"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterInfo {
    #[serde(default, with = "opt")]
    pub company: Option<String>,
    #[serde(default, with = "opt")]
    pub industry: Option<String>,
    #[serde(default, with = "opt")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    #[serde(default)]
    pub specializations: Vec<String>,
    #[serde(default, with = "opt")]
    pub experience: Option<String>,
    #[serde(default, with = "opt")]
    pub portfolio: Option<String>,
    #[serde(default, with = "opt")]
    pub hourly_rate: Option<Tokens>,
}

/// Role-specific payload attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleInfo {
    Requester(RequesterInfo),
    Provider(ProviderInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, with = "opt")]
    pub username: Option<String>,
    #[serde(default, with = "opt")]
    pub bio: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// Role-bearing account record, created server-side on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAccount {
    pub principal: Principal,
    pub role: Role,
    #[serde(default, with = "opt")]
    pub role_info: Option<RoleInfo>,
    #[serde(default, with = "opt")]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
}

/// Arguments to `registerUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInput {
    pub role: Role,
    #[serde(default, with = "opt")]
    pub role_info: Option<RoleInfo>,
    #[serde(default, with = "opt")]
    pub profile: Option<Profile>,
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialProject {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub budget: Tokens,
    pub owner: Principal,
    #[serde(default)]
    pub applicants: Vec<Principal>,
    #[serde(default, with = "opt")]
    pub selected_provider: Option<Principal>,
    #[serde(default)]
    pub is_completed: bool,
}

impl FinancialProject {
    pub fn has_applicant(&self, principal: &Principal) -> bool {
        self.applicants.iter().any(|p| p == principal)
    }
}

/// Arguments to `createProject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub title: String,
    pub description: String,
    pub budget: Tokens,
}

// ─────────────────────────────────────────────────────────
// Governance
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    pub description: String,
    pub proposer: Principal,
    /// Epoch seconds.
    pub voting_deadline: i64,
    pub votes_for: Tokens,
    pub votes_against: Tokens,
    #[serde(default)]
    pub is_executed: bool,
    #[serde(default)]
    pub is_active: bool,
}

/// Derived on every read; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Active,
    Ended,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

impl Proposal {
    pub fn status_at(&self, now: i64) -> ProposalStatus {
        if now < self.voting_deadline {
            ProposalStatus::Active
        } else {
            ProposalStatus::Ended
        }
    }

    pub fn status(&self) -> ProposalStatus {
        self.status_at(Utc::now().timestamp())
    }
}

/// Arguments to `createProposal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalInput {
    pub title: String,
    pub description: String,
    /// Length of the voting window in seconds.
    pub voting_period_secs: u64,
}

// ─────────────────────────────────────────────────────────
// Optional-field wire helper
// ─────────────────────────────────────────────────────────

/// `#[serde(with = "opt")]` for fields the backend encodes as `null`, `[]`,
/// `[x]` or a bare `x`. Serializes `None` as `[]` and `Some(x)` as `[x]`.
pub mod opt {
    use serde::de::{self, Deserializer};
    use serde::ser::{Serialize, Serializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire<T> {
        Seq(Vec<T>),
        One(T),
    }

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(value.iter())
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        match Option::<Wire<T>>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Wire::One(value)) => Ok(Some(value)),
            Some(Wire::Seq(mut values)) => match values.len() {
                0 | 1 => Ok(values.pop()),
                n => Err(de::Error::invalid_length(n, &"an optional value")),
            },
        }
    }
}

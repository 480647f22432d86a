//! Read-through cache of backend data for one binding.
//!
//! Every value stored here is the literal answer of a backend read (or of
//! the mutating call itself). Nothing is ever computed locally from an
//! assumed outcome: after a mutation the affected entries are re-fetched,
//! and if the re-fetch fails they are dropped rather than left stale.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{FinancialProject, Principal, Profile, ProjectId, Proposal, ProposalId, Tokens};

/// One refreshable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEntry {
    Projects,
    MyProjects,
    MyApplications,
    Applicants(ProjectId),
    Escrow(ProjectId),
    Balance,
    Stake,
    Proposals,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheState {
    pub projects: Option<Vec<FinancialProject>>,
    pub my_projects: Option<Vec<FinancialProject>>,
    pub my_applications: Option<Vec<FinancialProject>>,
    pub applicants: HashMap<ProjectId, Vec<Principal>>,
    pub escrow: HashMap<ProjectId, Tokens>,
    pub balance: Option<Tokens>,
    pub stake: Option<Tokens>,
    pub proposals: Option<Vec<Proposal>>,
    pub profiles: HashMap<Principal, Profile>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct LedgerCache {
    state: RwLock<CacheState>,
}

impl LedgerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> CacheState {
        self.state.read().await.clone()
    }

    // ── Reads ────────────────────────────────────────────

    pub async fn projects(&self) -> Option<Vec<FinancialProject>> {
        self.state.read().await.projects.clone()
    }

    pub async fn my_projects(&self) -> Option<Vec<FinancialProject>> {
        self.state.read().await.my_projects.clone()
    }

    pub async fn my_applications(&self) -> Option<Vec<FinancialProject>> {
        self.state.read().await.my_applications.clone()
    }

    /// Find a project in any cached project list.
    pub async fn project(&self, id: ProjectId) -> Option<FinancialProject> {
        let state = self.state.read().await;
        let found = [&state.projects, &state.my_projects, &state.my_applications]
            .into_iter()
            .flatten()
            .flat_map(|list| list.iter())
            .find(|p| p.id == id)
            .cloned();
        found
    }

    /// Whether any cached view records `principal` as an applicant of `id`.
    pub async fn has_applied(&self, id: ProjectId, principal: &Principal) -> bool {
        let state = self.state.read().await;
        let in_applicants = state
            .applicants
            .get(&id)
            .is_some_and(|list| list.contains(principal));
        let in_projects = [&state.projects, &state.my_projects]
            .into_iter()
            .flatten()
            .flat_map(|list| list.iter())
            .any(|p| p.id == id && p.has_applicant(principal));
        let in_my_applications = state
            .my_applications
            .as_ref()
            .is_some_and(|list| list.iter().any(|p| p.id == id));
        in_applicants || in_projects || in_my_applications
    }

    pub async fn applicants(&self, id: ProjectId) -> Option<Vec<Principal>> {
        self.state.read().await.applicants.get(&id).cloned()
    }

    pub async fn escrow(&self, id: ProjectId) -> Option<Tokens> {
        self.state.read().await.escrow.get(&id).copied()
    }

    pub async fn balance(&self) -> Option<Tokens> {
        self.state.read().await.balance
    }

    pub async fn stake(&self) -> Option<Tokens> {
        self.state.read().await.stake
    }

    pub async fn proposals(&self) -> Option<Vec<Proposal>> {
        self.state.read().await.proposals.clone()
    }

    pub async fn proposal(&self, id: ProposalId) -> Option<Proposal> {
        self.state
            .read()
            .await
            .proposals
            .as_ref()
            .and_then(|list| list.iter().find(|p| p.id == id).cloned())
    }

    pub async fn profile(&self, principal: &Principal) -> Option<Profile> {
        self.state.read().await.profiles.get(principal).cloned()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    // ── Writes ───────────────────────────────────────────

    pub async fn set_projects(&self, projects: Vec<FinancialProject>) {
        self.state.write().await.projects = Some(projects);
    }

    pub async fn set_my_projects(&self, projects: Vec<FinancialProject>) {
        self.state.write().await.my_projects = Some(projects);
    }

    pub async fn set_my_applications(&self, projects: Vec<FinancialProject>) {
        self.state.write().await.my_applications = Some(projects);
    }

    pub async fn set_applicants(&self, id: ProjectId, applicants: Vec<Principal>) {
        self.state.write().await.applicants.insert(id, applicants);
    }

    pub async fn set_escrow(&self, id: ProjectId, balance: Tokens) {
        self.state.write().await.escrow.insert(id, balance);
    }

    pub async fn set_balance(&self, balance: Tokens) {
        self.state.write().await.balance = Some(balance);
    }

    pub async fn set_stake(&self, stake: Tokens) {
        self.state.write().await.stake = Some(stake);
    }

    pub async fn set_proposals(&self, proposals: Vec<Proposal>) {
        self.state.write().await.proposals = Some(proposals);
    }

    pub async fn set_profile(&self, principal: Principal, profile: Profile) {
        self.state.write().await.profiles.insert(principal, profile);
    }

    pub async fn set_error(&self, message: impl Into<String>) {
        self.state.write().await.last_error = Some(message.into());
    }

    pub async fn clear_error(&self) {
        self.state.write().await.last_error = None;
    }

    /// Drop an entry so it cannot be displayed until re-fetched.
    pub async fn invalidate(&self, entry: CacheEntry) {
        let mut state = self.state.write().await;
        match entry {
            CacheEntry::Projects => state.projects = None,
            CacheEntry::MyProjects => state.my_projects = None,
            CacheEntry::MyApplications => state.my_applications = None,
            CacheEntry::Applicants(id) => {
                state.applicants.remove(&id);
            }
            CacheEntry::Escrow(id) => {
                state.escrow.remove(&id);
            }
            CacheEntry::Balance => state.balance = None,
            CacheEntry::Stake => state.stake = None,
            CacheEntry::Proposals => state.proposals = None,
        }
    }
}

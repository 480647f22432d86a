//! In-memory stand-ins for the backend and the identity provider.
//!
//! [`MemoryLedger`] applies a small version of the backend's business rules
//! (balances, escrow, staking, proposals) so that orchestrated flows can be
//! exercised end to end. It also lets a test:
//!
//! * inject a backend rejection or a transport failure into the next call of
//!   a given method ([`MemoryLedger::reject_next`], [`MemoryLedger::fail_next`]);
//! * suspend the next call of a method until released
//!   ([`MemoryLedger::hold`]), to interleave identity changes with in-flight
//!   calls;
//! * inspect the exact sequence of calls made ([`MemoryLedger::calls`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::config::Config;
use crate::errors::{ClientError, Result};
use crate::governance;
use crate::identity::{IdentityHandle, IdentityProvider, LoginOptions};
use crate::ledger::{Connector, LedgerClient};
use crate::marketplace::Marketplace;
use crate::session::Session;
use crate::types::{
    FinancialProject, LedgerResult, Principal, Profile, ProjectId, ProjectInput, Proposal,
    ProposalId, ProposalInput, RegistrationInput, Role, RoleAccount, Tokens, VerificationStatus,
};

/// Install a `tracing` subscriber for tests; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Principal, RoleAccount>,
    balances: HashMap<Principal, Tokens>,
    stakes: HashMap<Principal, Tokens>,
    projects: BTreeMap<ProjectId, FinancialProject>,
    escrow: HashMap<ProjectId, Tokens>,
    proposals: BTreeMap<ProposalId, Proposal>,
    voters: HashSet<(ProposalId, Principal)>,
    next_project_id: ProjectId,
    next_proposal_id: ProposalId,
}

impl LedgerState {
    fn balance(&self, principal: &Principal) -> Tokens {
        self.balances.get(principal).copied().unwrap_or(0)
    }

    fn role(&self, principal: &Principal) -> Option<Role> {
        self.accounts.get(principal).map(|a| a.role)
    }

    fn owned_project(
        &mut self,
        id: ProjectId,
        caller: &Principal,
    ) -> std::result::Result<&mut FinancialProject, String> {
        let project = self
            .projects
            .get_mut(&id)
            .ok_or_else(|| "ProjectNotFound".to_string())?;
        if &project.owner != caller {
            return Err("NotProjectOwner".to_string());
        }
        Ok(project)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    calls: Mutex<Vec<String>>,
    rejections: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

type Answer<T> = std::result::Result<T, String>;

fn answer<T>(outcome: Answer<T>) -> LedgerResult<T> {
    match outcome {
        Ok(value) => LedgerResult::Ok(value),
        Err(message) => LedgerResult::Err(message),
    }
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Client signing as `caller` (`None` for anonymous).
    pub fn client(self: &Arc<Self>, caller: Option<Principal>) -> Arc<dyn LedgerClient> {
        Arc::new(MemoryLedgerClient {
            ledger: self.clone(),
            caller,
        })
    }

    // ── Seeding ──────────────────────────────────────────

    pub async fn register(&self, principal: &Principal, role: Role) {
        self.state.lock().await.accounts.insert(
            principal.clone(),
            RoleAccount {
                principal: principal.clone(),
                role,
                role_info: None,
                profile: Some(Profile {
                    username: Some(principal.to_string()),
                    ..Default::default()
                }),
                verification_status: VerificationStatus::Pending,
            },
        );
    }

    pub async fn credit(&self, principal: &Principal, amount: Tokens) {
        *self
            .state
            .lock()
            .await
            .balances
            .entry(principal.clone())
            .or_default() += amount;
    }

    pub async fn insert_project(&self, project: FinancialProject) {
        let mut state = self.state.lock().await;
        state.next_project_id = state.next_project_id.max(project.id + 1);
        state.projects.insert(project.id, project);
    }

    pub async fn insert_proposal(&self, proposal: Proposal) {
        let mut state = self.state.lock().await;
        state.next_proposal_id = state.next_proposal_id.max(proposal.id + 1);
        state.proposals.insert(proposal.id, proposal);
    }

    pub async fn set_stake(&self, principal: &Principal, amount: Tokens) {
        self.state
            .lock()
            .await
            .stakes
            .insert(principal.clone(), amount);
    }

    // ── Inspection ───────────────────────────────────────

    pub async fn balance_of(&self, principal: &Principal) -> Tokens {
        self.state.lock().await.balance(principal)
    }

    pub async fn escrow_of(&self, id: ProjectId) -> Tokens {
        self.state.lock().await.escrow.get(&id).copied().unwrap_or(0)
    }

    pub async fn project(&self, id: ProjectId) -> Option<FinancialProject> {
        self.state.lock().await.projects.get(&id).cloned()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    /// Yield until `method` has been called at least `count` times.
    ///
    /// Returns `false` if that did not happen within a bounded number of
    /// scheduler turns.
    pub async fn wait_for_calls(&self, method: &str, count: usize) -> bool {
        for _ in 0..10_000 {
            if self.call_count(method).await >= count {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    // ── Fault injection ──────────────────────────────────

    /// Make the next `method` call answer `{err: message}`.
    pub async fn reject_next(&self, method: &str, message: &str) {
        self.rejections
            .lock()
            .await
            .insert(method.to_string(), message.to_string());
    }

    /// Make the next `method` call fail before producing an answer.
    pub async fn fail_next(&self, method: &str, message: &str) {
        self.failures
            .lock()
            .await
            .insert(method.to_string(), message.to_string());
    }

    /// Suspend the next `method` call until the returned handle is notified.
    pub async fn hold(&self, method: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .await
            .insert(method.to_string(), gate.clone());
        gate
    }

    /// Record the call, honour gates and injected failures.
    ///
    /// `Ok(Some(message))` means an injected rejection.
    async fn enter(&self, method: &str) -> Result<Option<String>> {
        self.calls.lock().await.push(method.to_string());

        let gate = self.gates.lock().await.remove(method);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(message) = self.failures.lock().await.remove(method) {
            return Err(ClientError::Transport(message));
        }
        Ok(self.rejections.lock().await.remove(method))
    }
}

struct MemoryLedgerClient {
    ledger: Arc<MemoryLedger>,
    caller: Option<Principal>,
}

impl MemoryLedgerClient {
    fn me(&self) -> Answer<&Principal> {
        self.caller
            .as_ref()
            .ok_or_else(|| "NotAuthenticated".to_string())
    }

    /// Run a mutating/rejectable method against the backend state.
    async fn answer<T>(
        &self,
        method: &str,
        apply: impl FnOnce(&mut LedgerState) -> Answer<T>,
    ) -> Result<LedgerResult<T>> {
        if let Some(message) = self.ledger.enter(method).await? {
            return Ok(LedgerResult::Err(message));
        }
        let mut state = self.ledger.state.lock().await;
        Ok(answer(apply(&mut state)))
    }

    /// Run a plain read.
    async fn read<T>(&self, method: &str, read: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        self.ledger.enter(method).await?;
        let state = self.ledger.state.lock().await;
        Ok(read(&state))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedgerClient {
    fn principal(&self) -> Option<&Principal> {
        self.caller.as_ref()
    }

    async fn is_user_registered(&self, principal: &Principal) -> Result<bool> {
        self.read("isUserRegistered", |s| s.accounts.contains_key(principal))
            .await
    }

    async fn get_my_account(&self) -> Result<LedgerResult<RoleAccount>> {
        let me = self.me().cloned();
        self.answer("getMyAccount", |s| {
            let me = me?;
            s.accounts
                .get(&me)
                .cloned()
                .ok_or_else(|| "NotRegistered".to_string())
        })
        .await
    }

    async fn get_profile(&self, principal: &Principal) -> Result<LedgerResult<Profile>> {
        self.answer("getProfile", |s| {
            s.accounts
                .get(principal)
                .and_then(|a| a.profile.clone())
                .ok_or_else(|| "ProfileNotFound".to_string())
        })
        .await
    }

    async fn register_user(&self, input: &RegistrationInput) -> Result<LedgerResult<RoleAccount>> {
        let me = self.me().cloned();
        self.answer("registerUser", |s| {
            let me = me?;
            if s.accounts.contains_key(&me) {
                return Err("AlreadyRegistered".to_string());
            }
            let account = RoleAccount {
                principal: me.clone(),
                role: input.role,
                role_info: input.role_info.clone(),
                profile: input.profile.clone(),
                verification_status: VerificationStatus::Pending,
            };
            s.accounts.insert(me, account.clone());
            Ok(account)
        })
        .await
    }

    async fn get_user_balance(&self, principal: &Principal) -> Result<Tokens> {
        self.read("getUserBalance", |s| s.balance(principal)).await
    }

    async fn add_user_balance(
        &self,
        principal: &Principal,
        amount: Tokens,
    ) -> Result<LedgerResult<()>> {
        self.answer("addUserBalance", |s| {
            *s.balances.entry(principal.clone()).or_default() += amount;
            Ok(())
        })
        .await
    }

    async fn get_projects(&self) -> Result<Vec<FinancialProject>> {
        self.read("getProjects", |s| s.projects.values().cloned().collect())
            .await
    }

    async fn get_my_client_projects(&self) -> Result<Vec<FinancialProject>> {
        let me = self.caller.clone();
        self.read("getMyClientProjects", |s| {
            s.projects
                .values()
                .filter(|p| Some(&p.owner) == me.as_ref())
                .cloned()
                .collect()
        })
        .await
    }

    async fn get_my_creative_applications(&self) -> Result<Vec<FinancialProject>> {
        let me = self.caller.clone();
        self.read("getMyCreativeApplications", |s| {
            s.projects
                .values()
                .filter(|p| me.as_ref().is_some_and(|me| p.has_applicant(me)))
                .cloned()
                .collect()
        })
        .await
    }

    async fn create_project(&self, input: &ProjectInput) -> Result<LedgerResult<FinancialProject>> {
        let me = self.me().cloned();
        self.answer("createProject", |s| {
            let me = me?;
            if s.role(&me) != Some(Role::Requester) {
                return Err("NotRequester".to_string());
            }
            if input.budget == 0 {
                return Err("InvalidBudget".to_string());
            }
            let id = s.next_project_id;
            s.next_project_id += 1;
            let project = FinancialProject {
                id,
                title: input.title.clone(),
                description: input.description.clone(),
                budget: input.budget,
                owner: me,
                applicants: Vec::new(),
                selected_provider: None,
                is_completed: false,
            };
            s.projects.insert(id, project.clone());
            Ok(project)
        })
        .await
    }

    async fn apply_to_project(&self, id: ProjectId) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("applyToProject", |s| {
            let me = me?;
            if s.role(&me) != Some(Role::Provider) {
                return Err("NotProvider".to_string());
            }
            let project = s
                .projects
                .get_mut(&id)
                .ok_or_else(|| "ProjectNotFound".to_string())?;
            if project.has_applicant(&me) {
                return Err("AlreadyApplied".to_string());
            }
            project.applicants.push(me);
            Ok(())
        })
        .await
    }

    async fn get_project_applicants(&self, id: ProjectId) -> Result<LedgerResult<Vec<Principal>>> {
        self.answer("getProjectApplicants", |s| {
            s.projects
                .get(&id)
                .map(|p| p.applicants.clone())
                .ok_or_else(|| "ProjectNotFound".to_string())
        })
        .await
    }

    async fn approve_applicant(
        &self,
        id: ProjectId,
        applicant: &Principal,
    ) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("approveApplicant", |s| {
            let me = me?;
            let project = s.owned_project(id, &me)?;
            if !project.has_applicant(applicant) {
                return Err("NotAnApplicant".to_string());
            }
            project.selected_provider = Some(applicant.clone());
            Ok(())
        })
        .await
    }

    async fn get_escrow_balance(&self, id: ProjectId) -> Result<LedgerResult<Tokens>> {
        self.answer("getEscrowBalance", |s| {
            if !s.projects.contains_key(&id) {
                return Err("ProjectNotFound".to_string());
            }
            Ok(s.escrow.get(&id).copied().unwrap_or(0))
        })
        .await
    }

    async fn deposit_to_escrow(&self, id: ProjectId, amount: Tokens) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("depositToEscrow", |s| {
            let me = me?;
            s.owned_project(id, &me)?;
            if amount == 0 {
                return Err("InvalidAmount".to_string());
            }
            let balance = s.balance(&me);
            if balance < amount {
                return Err("InsufficientBalance".to_string());
            }
            s.balances.insert(me, balance - amount);
            *s.escrow.entry(id).or_default() += amount;
            Ok(())
        })
        .await
    }

    async fn withdraw_escrow(&self, id: ProjectId) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("withdrawEscrow", |s| {
            let me = me?;
            if s.owned_project(id, &me)?.is_completed {
                return Err("ProjectCompleted".to_string());
            }
            let held = s.escrow.remove(&id).unwrap_or(0);
            if held == 0 {
                return Err("EmptyEscrow".to_string());
            }
            *s.balances.entry(me).or_default() += held;
            Ok(())
        })
        .await
    }

    async fn release_funds(
        &self,
        id: ProjectId,
        provider: &Principal,
    ) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("releaseFunds", |s| {
            let me = me?;
            let project = s.owned_project(id, &me)?;
            if project.selected_provider.as_ref() != Some(provider) {
                return Err("ProviderNotSelected".to_string());
            }
            let held = s.escrow.get(&id).copied().unwrap_or(0);
            if held == 0 {
                return Err("EmptyEscrow".to_string());
            }
            if let Some(project) = s.projects.get_mut(&id) {
                project.is_completed = true;
            }
            s.escrow.insert(id, 0);
            *s.balances.entry(provider.clone()).or_default() += held;
            Ok(())
        })
        .await
    }

    async fn get_user_stake(&self, principal: &Principal) -> Result<Tokens> {
        self.read("getUserStake", |s| {
            s.stakes.get(principal).copied().unwrap_or(0)
        })
        .await
    }

    async fn stake_tokens(&self, amount: Tokens) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("stakeTokens", |s| {
            let me = me?;
            if amount == 0 {
                return Err("InvalidAmount".to_string());
            }
            let balance = s.balance(&me);
            if balance < amount {
                return Err("InsufficientBalance".to_string());
            }
            s.balances.insert(me.clone(), balance - amount);
            *s.stakes.entry(me).or_default() += amount;
            Ok(())
        })
        .await
    }

    async fn get_all_proposals(&self) -> Result<Vec<Proposal>> {
        self.read("getAllProposals", |s| s.proposals.values().cloned().collect())
            .await
    }

    async fn create_proposal(&self, input: &ProposalInput) -> Result<LedgerResult<Proposal>> {
        let me = self.me().cloned();
        self.answer("createProposal", |s| {
            let me = me?;
            let staked = s.stakes.get(&me).copied().unwrap_or(0);
            if staked < governance::min_proposal_stake(s.role(&me)) {
                return Err("InsufficientStake".to_string());
            }
            let id = s.next_proposal_id;
            s.next_proposal_id += 1;
            let proposal = Proposal {
                id,
                title: input.title.clone(),
                description: input.description.clone(),
                proposer: me,
                voting_deadline: Utc::now().timestamp() + input.voting_period_secs as i64,
                votes_for: 0,
                votes_against: 0,
                is_executed: false,
                is_active: true,
            };
            s.proposals.insert(id, proposal.clone());
            Ok(proposal)
        })
        .await
    }

    async fn vote_on_proposal(&self, id: ProposalId, support: bool) -> Result<LedgerResult<()>> {
        let me = self.me().cloned();
        self.answer("voteOnProposal", |s| {
            let me = me?;
            let staked = s.stakes.get(&me).copied().unwrap_or(0);
            if staked == 0 {
                return Err("NoStake".to_string());
            }
            let weight = governance::voting_power(s.role(&me), staked) as Tokens;
            if s.voters.contains(&(id, me.clone())) {
                return Err("AlreadyVoted".to_string());
            }
            let proposal = s
                .proposals
                .get_mut(&id)
                .ok_or_else(|| "ProposalNotFound".to_string())?;
            if Utc::now().timestamp() >= proposal.voting_deadline {
                return Err("VotingClosed".to_string());
            }
            if support {
                proposal.votes_for += weight;
            } else {
                proposal.votes_against += weight;
            }
            s.voters.insert((id, me));
            Ok(())
        })
        .await
    }
}

/// [`Connector`] over a shared [`MemoryLedger`].
pub struct MemoryConnector {
    ledger: Arc<MemoryLedger>,
    refuse_identities: AtomicBool,
}

impl MemoryConnector {
    pub fn new(ledger: Arc<MemoryLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            refuse_identities: AtomicBool::new(false),
        })
    }

    /// Make every authenticated client construction fail.
    pub fn refuse_identities(&self, refuse: bool) {
        self.refuse_identities.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn anonymous(&self) -> Arc<dyn LedgerClient> {
        self.ledger.client(None)
    }

    fn authenticated(&self, identity: &IdentityHandle) -> Result<Arc<dyn LedgerClient>> {
        if self.refuse_identities.load(Ordering::SeqCst) {
            return Err(ClientError::Config(format!(
                "cannot reach backend as {}",
                identity.principal
            )));
        }
        if identity.delegation.is_empty() {
            return Err(ClientError::Config("identity carries no delegation".into()));
        }
        Ok(self.ledger.client(Some(identity.principal.clone())))
    }
}

// ─────────────────────────────────────────────────────────
// Identity provider
// ─────────────────────────────────────────────────────────

/// Scripted [`IdentityProvider`]: each `login` pops the next queued outcome.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    persisted: Mutex<Option<IdentityHandle>>,
    restore_failure: Mutex<Option<String>>,
    logins: Mutex<Vec<Answer<IdentityHandle>>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    logouts: AtomicUsize,
}

impl MemoryIdentityProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Identity to hand back on the next `initialize`.
    pub async fn persist(&self, identity: IdentityHandle) {
        *self.persisted.lock().await = Some(identity);
    }

    pub async fn fail_restore(&self, message: &str) {
        *self.restore_failure.lock().await = Some(message.to_string());
    }

    /// Queue the outcome of a future `login`.
    pub async fn push_login(&self, outcome: Answer<IdentityHandle>) {
        self.logins.lock().await.push(outcome);
    }

    /// Suspend the next `login` until the returned handle is notified.
    pub async fn hold_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().await = Some(gate.clone());
        gate
    }

    pub async fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn is_authenticated(&self) -> Result<bool> {
        if let Some(message) = self.restore_failure.lock().await.clone() {
            return Err(ClientError::Auth(message));
        }
        Ok(self.persisted.lock().await.is_some())
    }

    async fn identity(&self) -> Result<Option<IdentityHandle>> {
        Ok(self.persisted.lock().await.clone())
    }

    async fn login(&self, _options: &LoginOptions) -> Result<IdentityHandle> {
        let gate = self.login_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut logins = self.logins.lock().await;
        if logins.is_empty() {
            return Err(ClientError::Auth("no login scripted".into()));
        }
        match logins.remove(0) {
            Ok(identity) => {
                *self.persisted.lock().await = Some(identity.clone());
                Ok(identity)
            }
            Err(message) => Err(ClientError::Auth(message)),
        }
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        *self.persisted.lock().await = None;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────

/// Identity with a non-empty delegation for `name`.
pub fn identity(name: &str) -> IdentityHandle {
    IdentityHandle::new(Principal::from(name), name.as_bytes().to_vec())
}

/// Open project owned by `owner` with no applicants.
pub fn project_fixture(id: ProjectId, owner: &Principal) -> FinancialProject {
    FinancialProject {
        id,
        title: format!("Project {id}"),
        description: "Fixture project".to_string(),
        budget: 1_000,
        owner: owner.clone(),
        applicants: Vec::new(),
        selected_provider: None,
        is_completed: false,
    }
}

/// A [`Marketplace`] over in-memory collaborators, already initialized.
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub provider: Arc<MemoryIdentityProvider>,
    pub connector: Arc<MemoryConnector>,
    pub marketplace: Arc<Marketplace>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::new("memory://ledger", "marketplace")).await
    }

    pub async fn with_config(config: Config) -> Self {
        init_tracing();
        let ledger = MemoryLedger::new();
        let provider = MemoryIdentityProvider::new();
        let connector = MemoryConnector::new(ledger.clone());
        let marketplace = Arc::new(Marketplace::new(
            &config,
            provider.clone(),
            connector.clone(),
        ));
        // Nothing is persisted yet, so this always ends signed out.
        let _ = marketplace.initialize().await;
        Self {
            ledger,
            provider,
            connector,
            marketplace,
        }
    }

    /// Script a successful login for `name` and sign in.
    pub async fn sign_in_as(&self, name: &str) -> Result<Session> {
        self.provider.push_login(Ok(identity(name))).await;
        self.marketplace.sign_in().await
    }
}

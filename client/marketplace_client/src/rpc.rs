//! JSON-RPC client for the marketplace backend.
//!
//! Each [`LedgerClient`] method is one `POST` of a JSON-RPC 2.0 envelope:
//!
//! ```text
//! { "jsonrpc": "2.0", "id": 7, "method": "depositToEscrow",
//!   "params": { "serviceId": "...", "args": [3, 500] } }
//! ```
//!
//! ## Failure mapping
//!
//! * Network failure, non-2xx status, or a JSON-RPC `error` object are
//!   transport failures: the backend may or may not have run the call.
//! * A business rejection arrives inside `result` as `{"err": "..."}` and is
//!   returned to the caller as [`LedgerResult::Err`].
//!
//! No call is ever retried here. A failed operation is re-issued only when
//! the user asks for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::errors::{ClientError, Result};
use crate::identity::IdentityHandle;
use crate::ledger::{Connector, LedgerClient};
use crate::types::{
    FinancialProject, LedgerResult, Principal, Profile, ProjectId, ProjectInput, Proposal,
    ProposalId, ProposalInput, RegistrationInput, RoleAccount, Tokens,
};

/// Header carrying the caller's principal next to the bearer delegation.
pub const PRINCIPAL_HEADER: &str = "X-Principal";

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

// ─────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────

/// Builds [`HttpLedgerClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: Client,
    rpc_url: String,
    service_id: String,
}

impl HttpConnector {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            rpc_url: config.rpc_url.clone(),
            service_id: config.service_id.clone(),
        })
    }

    fn client(&self, caller: Option<Caller>) -> HttpLedgerClient {
        HttpLedgerClient {
            http: self.http.clone(),
            rpc_url: self.rpc_url.clone(),
            service_id: self.service_id.clone(),
            caller,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Connector for HttpConnector {
    fn anonymous(&self) -> Arc<dyn LedgerClient> {
        Arc::new(self.client(None))
    }

    fn authenticated(&self, identity: &IdentityHandle) -> Result<Arc<dyn LedgerClient>> {
        if identity.delegation.is_empty() {
            return Err(ClientError::Config(format!(
                "identity for {} carries no delegation",
                identity.principal
            )));
        }
        if identity.is_expired() {
            return Err(ClientError::Config(format!(
                "delegation for {} has expired",
                identity.principal
            )));
        }

        Ok(Arc::new(self.client(Some(Caller {
            principal: identity.principal.clone(),
            bearer: BASE64.encode(&identity.delegation),
        }))))
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Caller {
    principal: Principal,
    bearer: String,
}

#[derive(Debug)]
pub struct HttpLedgerClient {
    http: Client,
    rpc_url: String,
    service_id: String,
    caller: Option<Caller>,
    next_id: AtomicU64,
}

impl HttpLedgerClient {
    async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = build_request(id, method, &self.service_id, args);

        let mut request = self.http.post(&self.rpc_url).json(&body);
        if let Some(caller) = &self.caller {
            request = request
                .bearer_auth(&caller.bearer)
                .header(PRINCIPAL_HEADER, caller.principal.as_str());
        }

        debug!(method, id, "RPC call");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("{method}: HTTP {status}")));
        }

        let body: RpcResponse = response.json().await?;
        decode_response(method, body)
    }
}

fn build_request(id: u64, method: &str, service_id: &str, args: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": {
            "serviceId": service_id,
            "args": args,
        },
    })
}

fn decode_response<T: DeserializeOwned>(method: &str, body: RpcResponse) -> Result<T> {
    if let Some(err) = body.error {
        return Err(ClientError::Rpc {
            code: err.code,
            message: err.message,
        });
    }

    let result = body
        .result
        .ok_or_else(|| ClientError::Transport(format!("Empty result from {method}")))?;

    Ok(serde_json::from_value(result)?)
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn principal(&self) -> Option<&Principal> {
        self.caller.as_ref().map(|c| &c.principal)
    }

    async fn is_user_registered(&self, principal: &Principal) -> Result<bool> {
        self.call("isUserRegistered", json!([principal])).await
    }

    async fn get_my_account(&self) -> Result<LedgerResult<RoleAccount>> {
        self.call("getMyAccount", json!([])).await
    }

    async fn get_profile(&self, principal: &Principal) -> Result<LedgerResult<Profile>> {
        self.call("getProfile", json!([principal])).await
    }

    async fn register_user(&self, input: &RegistrationInput) -> Result<LedgerResult<RoleAccount>> {
        self.call("registerUser", json!([input])).await
    }

    async fn get_user_balance(&self, principal: &Principal) -> Result<Tokens> {
        self.call("getUserBalance", json!([principal])).await
    }

    async fn add_user_balance(
        &self,
        principal: &Principal,
        amount: Tokens,
    ) -> Result<LedgerResult<()>> {
        self.call("addUserBalance", json!([principal, amount])).await
    }

    async fn get_projects(&self) -> Result<Vec<FinancialProject>> {
        self.call("getProjects", json!([])).await
    }

    async fn get_my_client_projects(&self) -> Result<Vec<FinancialProject>> {
        self.call("getMyClientProjects", json!([])).await
    }

    async fn get_my_creative_applications(&self) -> Result<Vec<FinancialProject>> {
        self.call("getMyCreativeApplications", json!([])).await
    }

    async fn create_project(&self, input: &ProjectInput) -> Result<LedgerResult<FinancialProject>> {
        self.call("createProject", json!([input])).await
    }

    async fn apply_to_project(&self, id: ProjectId) -> Result<LedgerResult<()>> {
        self.call("applyToProject", json!([id])).await
    }

    async fn get_project_applicants(&self, id: ProjectId) -> Result<LedgerResult<Vec<Principal>>> {
        self.call("getProjectApplicants", json!([id])).await
    }

    async fn approve_applicant(
        &self,
        id: ProjectId,
        applicant: &Principal,
    ) -> Result<LedgerResult<()>> {
        self.call("approveApplicant", json!([id, applicant])).await
    }

    async fn get_escrow_balance(&self, id: ProjectId) -> Result<LedgerResult<Tokens>> {
        self.call("getEscrowBalance", json!([id])).await
    }

    async fn deposit_to_escrow(&self, id: ProjectId, amount: Tokens) -> Result<LedgerResult<()>> {
        self.call("depositToEscrow", json!([id, amount])).await
    }

    async fn withdraw_escrow(&self, id: ProjectId) -> Result<LedgerResult<()>> {
        self.call("withdrawEscrow", json!([id])).await
    }

    async fn release_funds(
        &self,
        id: ProjectId,
        provider: &Principal,
    ) -> Result<LedgerResult<()>> {
        self.call("releaseFunds", json!([id, provider])).await
    }

    async fn get_user_stake(&self, principal: &Principal) -> Result<Tokens> {
        self.call("getUserStake", json!([principal])).await
    }

    async fn stake_tokens(&self, amount: Tokens) -> Result<LedgerResult<()>> {
        self.call("stakeTokens", json!([amount])).await
    }

    async fn get_all_proposals(&self) -> Result<Vec<Proposal>> {
        self.call("getAllProposals", json!([])).await
    }

    async fn create_proposal(&self, input: &ProposalInput) -> Result<LedgerResult<Proposal>> {
        self.call("createProposal", json!([input])).await
    }

    async fn vote_on_proposal(&self, id: ProposalId, support: bool) -> Result<LedgerResult<()>> {
        self.call("voteOnProposal", json!([id, support])).await
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

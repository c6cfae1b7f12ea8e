//! Local stand-in for the payment gateway, mounted under `/sandbox` when
//! the server runs in sandbox mode.
//!
//! Speaks the same JSON API as the real gateway, so an unmodified
//! `GatewayWallet` can pay into the server's in-process ledger.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use agentpay::gateway_wallet::{BootstrapRequest, BootstrapResponse, WalletStatus};
use agentpay::sandbox::{SandboxLedger, SandboxWallet};
use agentpay::{Amount, PayError, SpendGuard, SpendPolicy, Wallet};
use dashmap::DashMap;
use serde::Deserialize;

/// A bootstrapped agent: its wallet and the guardrails it was provisioned
/// with.
struct AgentAccount {
    wallet: Arc<SandboxWallet>,
    guard: Arc<SpendGuard>,
}

pub struct SandboxGateway {
    ledger: Arc<SandboxLedger>,
    network: String,
    /// Agent accounts keyed by API key.
    accounts: DashMap<String, AgentAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub recipient: String,
    pub amount: Amount,
    pub asset: String,
    #[serde(default)]
    pub memo: Option<String>,
    /// Checked against the allowed categories when present.
    #[serde(default)]
    pub category: Option<String>,
}

impl SandboxGateway {
    pub fn new(ledger: Arc<SandboxLedger>, network: &str) -> Self {
        Self {
            ledger,
            network: network.to_string(),
            accounts: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<SandboxLedger> {
        &self.ledger
    }

    /// Provision the wallet for `key`. A repeat bootstrap returns the same
    /// wallet and keeps the guardrails and spending already on record.
    fn bootstrap_account(&self, key: &str, request: &BootstrapRequest) -> Arc<SandboxWallet> {
        self.accounts
            .entry(key.to_string())
            .or_insert_with(|| {
                let digest =
                    agentpay::crypto::mac_fields(b"sandbox-agent", &[request.agent_name.as_bytes()]);
                let address = format!("0x{}", &digest[..40]);
                tracing::info!(
                    agent = %request.agent_name,
                    address = %address,
                    max_spend = %request.max_spend,
                    "sandbox wallet created"
                );
                AgentAccount {
                    wallet: Arc::new(SandboxWallet::new(&address, &self.network, self.ledger.clone())),
                    guard: Arc::new(SpendGuard::new(SpendPolicy::new(
                        request.max_spend,
                        &request.allowed_categories,
                    ))),
                }
            })
            .wallet
            .clone()
    }

    fn account(&self, key: &str) -> Option<(Arc<SandboxWallet>, Arc<SpendGuard>)> {
        self.accounts
            .get(key)
            .map(|a| (a.wallet.clone(), a.guard.clone()))
    }
}

fn api_key(req: &HttpRequest) -> String {
    req.headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

fn policy_rejected(message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({
        "error": "policy_rejected",
        "message": message.to_string()
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sandbox")
            .route("/wallet/bootstrap", web::post().to(bootstrap))
            .route("/wallet/status", web::get().to(status))
            .route("/gate/pay", web::post().to(pay)),
    );
}

async fn bootstrap(
    req: HttpRequest,
    gateway: web::Data<SandboxGateway>,
    body: web::Json<BootstrapRequest>,
) -> HttpResponse {
    let wallet = gateway.bootstrap_account(&api_key(&req), &body);
    HttpResponse::Ok().json(BootstrapResponse {
        address: wallet.address().to_string(),
    })
}

async fn status(req: HttpRequest, gateway: web::Data<SandboxGateway>) -> HttpResponse {
    let address = gateway
        .account(&api_key(&req))
        .map(|(w, _)| w.address().to_string());
    HttpResponse::Ok().json(WalletStatus {
        status: if address.is_some() { "ready" } else { "uninitialized" }.to_string(),
        address,
    })
}

async fn pay(
    req: HttpRequest,
    gateway: web::Data<SandboxGateway>,
    body: web::Json<PayRequest>,
) -> HttpResponse {
    let Some((wallet, guard)) = gateway.account(&api_key(&req)) else {
        return policy_rejected("wallet not bootstrapped");
    };

    let reserved = match body.category.as_deref() {
        Some(category) => guard.reserve(category, body.amount),
        None => guard.reserve_amount(body.amount),
    };
    let reservation = match reserved {
        Ok(r) => r,
        Err(PayError::PolicyRejected(why)) => {
            tracing::warn!(address = %wallet.address(), reason = %why, "sandbox payment refused");
            return policy_rejected(why);
        }
        Err(e) => return policy_rejected(e),
    };

    match wallet
        .pay(&body.recipient, body.amount, &body.asset, body.memo.as_deref())
        .await
    {
        Ok(proof) => {
            reservation.commit();
            HttpResponse::Ok().json(proof)
        }
        Err(e) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": "payment_failed",
            "message": e.to_string()
        })),
    }
}

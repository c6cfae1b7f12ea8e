//! [`Wallet`] backed by a remote payment gateway.
//!
//! The gateway holds the keys and submits transactions; this side only
//! speaks its JSON API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::amount::Amount;
use crate::error::PayError;
use crate::proof::PaymentProof;
use crate::wallet::Wallet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRequest {
    pub agent_name: String,
    pub max_spend: Amount,
    pub allowed_categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest<'a> {
    recipient: &'a str,
    amount: Amount,
    asset: &'a str,
    network: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub status: String,
    #[serde(default)]
    pub address: Option<String>,
}

pub struct GatewayWallet {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    network: String,
}

impl GatewayWallet {
    /// `base_url` must be an absolute http(s) URL.
    pub fn new(base_url: &str, api_key: Option<String>, network: &str) -> Result<Self, PayError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| PayError::Config(format!("invalid gateway url '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(PayError::Config(format!(
                "gateway url must be http(s), got '{}'",
                base_url.scheme()
            )));
        }
        // Url::join drops the last path segment unless it ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PayError::Http(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            network: network.to_string(),
        })
    }

    /// Provision (or fetch) the agent's wallet and register its policy.
    pub async fn bootstrap(&self, request: &BootstrapRequest) -> Result<BootstrapResponse, PayError> {
        let resp = self
            .authed(self.http.post(self.endpoint("wallet/bootstrap")?))
            .json(request)
            .send()
            .await
            .map_err(|e| PayError::Http(format!("gateway bootstrap failed: {e}")))?;
        Self::parse(resp, "bootstrap").await
    }

    pub async fn status(&self) -> Result<WalletStatus, PayError> {
        let resp = self
            .authed(self.http.get(self.endpoint("wallet/status")?))
            .send()
            .await
            .map_err(|e| PayError::Http(format!("gateway status failed: {e}")))?;
        Self::parse(resp, "status").await
    }

    fn endpoint(&self, path: &str) -> Result<Url, PayError> {
        self.base_url
            .join(path)
            .map_err(|e| PayError::Config(format!("invalid gateway path '{path}': {e}")))
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, PayError> {
        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            // The gateway refuses payments outside the bootstrapped policy.
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            if body["error"] == "policy_rejected" {
                let message = body["message"].as_str().unwrap_or("refused by gateway policy");
                return Err(PayError::PolicyRejected(format!("gateway {what}: {message}")));
            }
            return Err(PayError::Http(format!("gateway {what}: authentication failed")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PayError::Http(format!("gateway {what}: authentication failed")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(PayError::Http(format!("gateway {what} returned {status}: {snippet}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| PayError::Http(format!("gateway {what} response parse failed: {e}")))
    }
}

impl Wallet for GatewayWallet {
    async fn pay(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &str,
        memo: Option<&str>,
    ) -> Result<PaymentProof, PayError> {
        let body = PayRequest {
            recipient,
            amount,
            asset,
            network: &self.network,
            memo,
        };
        let endpoint = self
            .endpoint("gate/pay")
            .map_err(|e| PayError::WalletPaymentFailed(e.to_string()))?;

        let resp = self
            .authed(self.http.post(endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| PayError::WalletPaymentFailed(format!("gateway unreachable: {e}")))?;

        let proof: PaymentProof = Self::parse(resp, "pay").await.map_err(|e| match e {
            PayError::PolicyRejected(_) => e,
            other => PayError::WalletPaymentFailed(other.to_string()),
        })?;

        tracing::info!(
            tx_ref = %proof.tx_ref,
            recipient = %recipient,
            amount = %amount,
            "gateway payment submitted"
        );
        Ok(proof)
    }
}

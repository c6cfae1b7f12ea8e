use std::time::Duration;

use crate::constants::{NetworkConfig, DEFAULT_MAX_RETRIES};
use crate::decision::RejectReason;
use crate::error::PayError;
use crate::policy::SpendGuard;
use crate::proof::PaymentProof;
use crate::wallet::Wallet;
use crate::wire;

/// Final response of [`AutoPayClient::send`] plus every payment made on the
/// way to it.
#[derive(Debug)]
pub struct PaidResponse {
    pub response: reqwest::Response,
    pub payments: Vec<PaymentProof>,
}

/// HTTP client that resolves `402 Payment Required` by paying and retrying.
///
/// Each 402 is answered by at most one payment, and only while the retry
/// budget lasts. Spend limits are enforced locally through a [`SpendGuard`]
/// before the wallet is ever contacted.
pub struct AutoPayClient<W: Wallet> {
    http: reqwest::Client,
    wallet: W,
    config: NetworkConfig,
    retry_backoff: Duration,
}

impl<W: Wallet> AutoPayClient<W> {
    pub fn new(wallet: W, config: NetworkConfig) -> Result<Self, PayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PayError::Http(format!("failed to build http client: {e}")))?;
        Ok(Self::with_http_client(http, wallet, config))
    }

    pub fn with_http_client(http: reqwest::Client, wallet: W, config: NetworkConfig) -> Self {
        Self {
            http,
            wallet,
            config,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Pause before re-presenting a proof the service could not confirm yet.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub async fn get(&self, url: &str, guard: &SpendGuard) -> Result<PaidResponse, PayError> {
        self.send(reqwest::Method::GET, url, None, guard, DEFAULT_MAX_RETRIES)
            .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        guard: &SpendGuard,
    ) -> Result<PaidResponse, PayError> {
        self.send(reqwest::Method::POST, url, Some(body), guard, DEFAULT_MAX_RETRIES)
            .await
    }

    /// Perform a request, paying for it if the service demands payment.
    ///
    /// Returns the first non-402 response, or the last 402 unchanged when
    /// the budget runs out, the terms are unreadable or name another
    /// network, or the wallet fails. A policy refusal before any payment is
    /// the only payment-side `Err`; after one, the last 402 comes back with
    /// the payments made.
    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
        guard: &SpendGuard,
        retries: u32,
    ) -> Result<PaidResponse, PayError> {
        let mut retries_remaining = retries;
        let mut payments: Vec<PaymentProof> = Vec::new();
        // Proof (and the memo it pays) attached to the next attempt.
        let mut presented: Option<(PaymentProof, Option<String>)> = None;

        loop {
            let response = self
                .execute(method.clone(), url, body, presented.as_ref())
                .await?;

            if response.status() != reqwest::StatusCode::PAYMENT_REQUIRED || retries_remaining == 0 {
                return Ok(PaidResponse { response, payments });
            }

            let terms = wire::challenge_terms_from_headers(
                |name| response.headers().get(name).and_then(|v| v.to_str().ok()),
                self.config.asset_decimals,
            );
            let Some(terms) = terms else {
                tracing::warn!(url = %url, "402 without usable payment terms");
                return Ok(PaidResponse { response, payments });
            };

            if terms.reason == Some(RejectReason::NotYetConfirmed) && presented.is_some() {
                // Paid already; the service just cannot see it yet.
                retries_remaining -= 1;
                tracing::info!(url = %url, retries_remaining, "payment not yet confirmed, re-presenting proof");
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }

            if let Some(network) = terms.network.as_deref() {
                if !network.trim().eq_ignore_ascii_case(&self.config.network) {
                    tracing::warn!(
                        url = %url,
                        challenge_network = %network,
                        wallet_network = %self.config.network,
                        "402 asks for payment on another network"
                    );
                    return Ok(PaidResponse { response, payments });
                }
            }

            let category = terms.category();
            let reservation = match guard.reserve(&category, terms.price) {
                Ok(r) => r,
                // Money already moved in this call; hand back its proofs.
                Err(e) if !payments.is_empty() => {
                    tracing::warn!(url = %url, error = %e, paid = payments.len(), "further payment refused by policy");
                    return Ok(PaidResponse { response, payments });
                }
                Err(e) => return Err(e),
            };

            let asset = terms.asset.as_deref().unwrap_or(&self.config.asset);
            tracing::info!(
                url = %url,
                resource = %terms.resource_id,
                price = %terms.price,
                recipient = %terms.recipient,
                "auto-paying for resource"
            );

            let proof = match self
                .wallet
                .pay(&terms.recipient, terms.price, asset, terms.memo.as_deref())
                .await
            {
                Ok(proof) => proof,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "auto-payment failed");
                    drop(reservation);
                    return Ok(PaidResponse { response, payments });
                }
            };
            reservation.commit();

            tracing::info!(tx_ref = %proof.tx_ref, "payment sent, retrying request");
            payments.push(proof.clone());
            presented = Some((proof, terms.memo));
            retries_remaining -= 1;
        }
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
        presented: Option<&(PaymentProof, Option<String>)>,
    ) -> Result<reqwest::Response, PayError> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some((proof, memo)) = presented {
            for (name, value) in wire::proof_headers(proof, memo.as_deref()) {
                request = request.header(name, value);
            }
        }
        request
            .send()
            .await
            .map_err(|e| PayError::Http(format!("request failed: {e}")))
    }
}

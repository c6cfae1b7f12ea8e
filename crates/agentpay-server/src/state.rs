use std::sync::Arc;

use agentpay::{ChallengeIssuer, NetworkConfig, PaymentVerifier, RevenueSplitter};

use crate::config::ResourceCatalog;

/// Shared application state for the resource server.
///
/// Generic over the ledger oracle and the payout wallet so tests and the
/// sandbox binary can run on in-process collaborators.
pub struct AppState<O, W> {
    pub issuer: ChallengeIssuer,
    pub verifier: PaymentVerifier<O>,
    pub catalog: ResourceCatalog,
    /// Account named as `recipient` in every challenge.
    pub recipient: String,
    pub splitter: RevenueSplitter,
    /// Wallet holding received funds; `None` disables settlement payouts.
    pub payout_wallet: Option<Arc<W>>,
    pub network: NetworkConfig,
    /// Bearer token for /metrics (not the memo secret).
    pub metrics_token: Option<Vec<u8>>,
    pub public_metrics: bool,
}

impl<O, W> AppState<O, W> {
    pub fn new(
        issuer: ChallengeIssuer,
        verifier: PaymentVerifier<O>,
        catalog: ResourceCatalog,
        recipient: &str,
        splitter: RevenueSplitter,
    ) -> Self {
        let network = issuer.config().clone();
        Self {
            issuer,
            verifier,
            catalog,
            recipient: recipient.to_string(),
            splitter,
            payout_wallet: None,
            network,
            metrics_token: None,
            public_metrics: false,
        }
    }

    pub fn with_payout_wallet(mut self, wallet: Arc<W>) -> Self {
        self.payout_wallet = Some(wallet);
        self
    }

    pub fn with_metrics_access(mut self, token: Option<Vec<u8>>, public: bool) -> Self {
        self.metrics_token = token;
        self.public_metrics = public;
        self
    }
}

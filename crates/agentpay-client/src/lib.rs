//! agentpay client SDK for agents buying 402-gated resources.
//!
//! Wraps [`AutoPayClient`] so a request that comes back
//! `402 Payment Required` is paid for (within a [`SpendPolicy`]) and
//! retried with the proof attached.
//!
//! # Quick Example
//!
//! ```no_run
//! use agentpay_client::{policy_from_args, AutoPayClient, GatewayWallet, NetworkConfig, SpendGuard};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let wallet = GatewayWallet::new("http://localhost:4021/sandbox", None, "base").unwrap();
//! let client = AutoPayClient::new(wallet, NetworkConfig::default()).unwrap();
//! let guard = SpendGuard::new(policy_from_args("1.00", "weather", 6).unwrap());
//!
//! let paid = client
//!     .get("http://localhost:4021/resources/weather-v1", &guard)
//!     .await
//!     .unwrap();
//! for proof in &paid.payments {
//!     println!("paid via tx: {}", proof.tx_ref);
//! }
//! # }
//! ```

pub use agentpay::gateway_wallet::{BootstrapRequest, BootstrapResponse, WalletStatus};
pub use agentpay::{
    Amount, AutoPayClient, GatewayWallet, NetworkConfig, PaidResponse, PayError, PaymentProof,
    SpendGuard, SpendPolicy, Wallet,
};
pub use agentpay::policy::ANY_CATEGORY;

/// Build a [`SpendPolicy`] from a decimal ceiling and a comma-separated
/// category list. An empty list allows nothing.
pub fn policy_from_args(
    max_spend: &str,
    categories: &str,
    decimals: u32,
) -> Result<SpendPolicy, PayError> {
    let max_spend = Amount::parse(max_spend, decimals)?;
    Ok(SpendPolicy::new(max_spend, split_categories(categories)))
}

pub fn split_categories(categories: &str) -> Vec<String> {
    categories
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

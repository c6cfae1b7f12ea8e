//! HTTP 402 pay-per-request protocol.
//!
//! A service answers an unpaid request with `402 Payment Required` and a
//! [`PaymentChallenge`]. The client pays through a [`Wallet`], retries with a
//! [`PaymentProof`], and the service's [`PaymentVerifier`] grants access only
//! after a [`LedgerOracle`] confirms the transfer. Each transaction reference
//! buys access at most once. Settled revenue is divided by the
//! [`RevenueSplitter`].
//!
//! # Quick example (client)
//!
//! ```no_run
//! use agentpay::{Amount, AutoPayClient, GatewayWallet, NetworkConfig, SpendGuard, SpendPolicy};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), agentpay::PayError> {
//! let wallet = GatewayWallet::new("https://gateway.example", None, "base")?;
//! let client = AutoPayClient::new(wallet, NetworkConfig::default())?;
//! let guard = SpendGuard::new(SpendPolicy::new("1.00".parse::<Amount>()?, ["weather"]));
//!
//! let paid = client.get("https://api.example.com/resources/weather-v1", &guard).await?;
//! println!("{} after {} payment(s)", paid.response.status(), paid.payments.len());
//! # Ok(())
//! # }
//! ```

// Core types
pub mod amount;
pub mod constants;
pub mod decision;
pub mod error;
pub mod proof;

// Protocol components
pub mod challenge;
pub mod crypto;
pub mod ledger;
pub mod policy;
pub mod replay_store;
pub mod split;
pub mod verifier;
pub mod wallet;
pub mod wire;

// In-process ledger and wallet
pub mod sandbox;

// Network-facing implementations
#[cfg(feature = "full")]
pub mod client;
#[cfg(feature = "full")]
pub mod evm_oracle;
#[cfg(feature = "full")]
pub mod gateway_wallet;

// Re-exports
pub use amount::Amount;
pub use challenge::{resource_category, ChallengeIssuer, PaymentChallenge};
pub use constants::*;
pub use decision::{Decision, RejectReason};
pub use error::PayError;
pub use ledger::{LedgerOracle, LedgerStatus, LedgerTransfer};
pub use policy::{Reservation, SpendGuard, SpendPolicy};
pub use proof::PaymentProof;
pub use replay_store::{InMemoryReplayStore, ReplayStore};
pub use split::{settle, PayeeRole, RevenueSplit, RevenueSplitter, SettlementReport, Transfer};
pub use verifier::PaymentVerifier;
pub use wallet::Wallet;

#[cfg(feature = "full")]
pub use client::{AutoPayClient, PaidResponse};
#[cfg(feature = "full")]
pub use evm_oracle::EvmLedgerOracle;
#[cfg(feature = "full")]
pub use gateway_wallet::GatewayWallet;
#[cfg(feature = "full")]
pub use replay_store::SqliteReplayStore;

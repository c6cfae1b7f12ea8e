use thiserror::Error;

use crate::amount::Amount;

/// Errors returned by agentpay operations.
///
/// Verification rejections are not errors: [`PaymentVerifier::verify`](crate::verifier::PaymentVerifier::verify)
/// returns them as [`Decision::Rejected`](crate::decision::Decision::Rejected).
#[derive(Debug, Error)]
pub enum PayError {
    #[error("invalid challenge input: {0}")]
    InvalidChallengeInput(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("payment blocked by spend policy: {0}")]
    PolicyRejected(String),

    #[error("wallet payment failed: {0}")]
    WalletPaymentFailed(String),

    #[error("partial settlement: {failed_role} transfer failed after {} completed transfer(s): {reason}", .completed.len())]
    PartialSettlement {
        completed: Vec<crate::split::Transfer>,
        failed_role: crate::split::PayeeRole,
        failed_amount: Amount,
        reason: String,
    },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("replay store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

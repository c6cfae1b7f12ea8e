//! The ledger oracle seam: whatever can say whether a transaction reference
//! is real, final, and moved the claimed funds.

use std::future::Future;
use std::sync::Arc;

use crate::amount::Amount;
use crate::error::PayError;
use crate::proof::PaymentProof;

/// A transfer as the ledger recorded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransfer {
    pub tx_ref: String,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    /// Unix seconds at which the ledger included the transfer.
    pub timestamp: u64,
}

/// What the oracle knows about a transaction reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Final, successful, and carrying this transfer.
    Confirmed(LedgerTransfer),
    /// Known but not final yet.
    Pending,
    /// Unknown, reverted, or not a transfer of the expected asset.
    Invalid(String),
}

/// External ledger oracle.
///
/// `Err` means the oracle itself failed (RPC down, malformed response); the
/// verifier treats that as "not yet confirmed", never as "invalid".
pub trait LedgerOracle: Send + Sync {
    fn confirm(
        &self,
        proof: &PaymentProof,
    ) -> impl Future<Output = Result<LedgerStatus, PayError>> + Send;
}

impl<O: LedgerOracle> LedgerOracle for Arc<O> {
    fn confirm(
        &self,
        proof: &PaymentProof,
    ) -> impl Future<Output = Result<LedgerStatus, PayError>> + Send {
        (**self).confirm(proof)
    }
}

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Evidence of a completed payment, produced by a wallet and presented by
/// the client on retry. Self-reported: nothing here is trusted until the
/// ledger oracle confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub tx_ref: String,
    pub payer: String,
    pub amount: Amount,
    pub asset: String,
    pub network: String,
    pub recipient: String,
}

/// Account identifiers compare ASCII case-insensitively (EVM checksum case).
pub fn same_account(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

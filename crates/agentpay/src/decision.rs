use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a proof was not accepted. These are expected outcomes, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Recipient, asset or network differ, or the amount is short.
    TermsMismatch,
    /// Presented outside the challenge's validity window.
    ChallengeExpired,
    /// The transaction reference has already bought access once.
    ReplayedProof,
    /// Not final yet, or the oracle could not answer in time. Retryable.
    NotYetConfirmed,
    /// Unknown, reverted, or disagrees with the proof's claims. Final.
    InvalidTransaction,
}

impl RejectReason {
    /// Stable wire code carried in the `x-agentpay-reason` header.
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::TermsMismatch => "terms_mismatch",
            RejectReason::ChallengeExpired => "challenge_expired",
            RejectReason::ReplayedProof => "replayed_proof",
            RejectReason::NotYetConfirmed => "not_yet_confirmed",
            RejectReason::InvalidTransaction => "invalid_transaction",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "terms_mismatch" => Some(RejectReason::TermsMismatch),
            "challenge_expired" => Some(RejectReason::ChallengeExpired),
            "replayed_proof" => Some(RejectReason::ReplayedProof),
            "not_yet_confirmed" => Some(RejectReason::NotYetConfirmed),
            "invalid_transaction" => Some(RejectReason::InvalidTransaction),
            _ => None,
        }
    }

    /// Whether presenting the same proof again later can still succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, RejectReason::NotYetConfirmed)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of [`PaymentVerifier::verify`](crate::verifier::PaymentVerifier::verify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    #[serde(rename_all = "camelCase")]
    Granted { payer: String, tx_ref: String },
    Rejected { reason: RejectReason },
}

impl Decision {
    pub fn rejected(reason: RejectReason) -> Self {
        Decision::Rejected { reason }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Decision::Granted { .. } => None,
            Decision::Rejected { reason } => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for reason in [
            RejectReason::TermsMismatch,
            RejectReason::ChallengeExpired,
            RejectReason::ReplayedProof,
            RejectReason::NotYetConfirmed,
            RejectReason::InvalidTransaction,
        ] {
            assert_eq!(RejectReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(RejectReason::from_code("nope"), None);
    }

    #[test]
    fn test_only_not_yet_confirmed_is_retryable() {
        assert!(RejectReason::NotYetConfirmed.is_retryable());
        assert!(!RejectReason::ReplayedProof.is_retryable());
        assert!(!RejectReason::InvalidTransaction.is_retryable());
    }

    #[test]
    fn test_decision_json() {
        let granted = Decision::Granted {
            payer: "0xP".to_string(),
            tx_ref: "0xT1".to_string(),
        };
        let v = serde_json::to_value(&granted).unwrap();
        assert_eq!(v["decision"], "granted");
        assert_eq!(v["txRef"], "0xT1");

        let rejected = Decision::rejected(RejectReason::ReplayedProof);
        let v = serde_json::to_value(&rejected).unwrap();
        assert_eq!(v["decision"], "rejected");
        assert_eq!(v["reason"], "replayed_proof");
        assert_eq!(rejected.reject_reason(), Some(RejectReason::ReplayedProof));
    }
}

//! HTTP wire format: header names, the 402 body, and conversions between
//! headers and protocol values.
//!
//! Functions here take header lookups as closures so the same codec serves
//! both the reqwest client and the actix server.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::challenge::{resource_category, PaymentChallenge};
use crate::decision::RejectReason;
use crate::proof::PaymentProof;

pub const HEADER_PRICE: &str = "x-agentpay-price";
pub const HEADER_RECIPIENT: &str = "x-agentpay-recipient";
pub const HEADER_MODEL_ID: &str = "x-agentpay-model-id";
pub const HEADER_NETWORK: &str = "x-agentpay-network";
pub const HEADER_ASSET: &str = "x-agentpay-asset";
pub const HEADER_MEMO: &str = "x-agentpay-memo";
pub const HEADER_EXPIRES: &str = "x-agentpay-expires";
pub const HEADER_CATEGORY: &str = "x-agentpay-category";
pub const HEADER_REASON: &str = "x-agentpay-reason";
/// Base64 JSON of the full challenge.
pub const HEADER_CHALLENGE: &str = "x-agentpay-challenge";

pub const HEADER_TX: &str = "x-agentpay-tx";
pub const HEADER_PAYER: &str = "x-agentpay-payer";
/// Base64 JSON of the full proof. Optional; see [`proof_from_headers`].
pub const HEADER_PROOF: &str = "x-agentpay-proof";

/// Body of every 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub challenge: PaymentChallenge,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl PaymentRequiredBody {
    pub fn new(challenge: PaymentChallenge, reason: Option<RejectReason>) -> Self {
        Self {
            error: "payment_required".to_string(),
            challenge,
            reason,
        }
    }
}

/// Challenge terms as a client reads them off a 402.
///
/// Only price, recipient and resource id are required; everything else
/// falls back to the client's defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeTerms {
    pub resource_id: String,
    pub price: Amount,
    pub recipient: String,
    pub network: Option<String>,
    pub asset: Option<String>,
    pub memo: Option<String>,
    pub expires_at: Option<u64>,
    pub category: Option<String>,
    pub reason: Option<RejectReason>,
}

impl ChallengeTerms {
    /// Explicit category, or one derived from the resource id.
    pub fn category(&self) -> String {
        self.category
            .clone()
            .unwrap_or_else(|| resource_category(&self.resource_id))
    }
}

/// Headers carried by a 402 response for `challenge`.
pub fn challenge_headers(
    challenge: &PaymentChallenge,
    decimals: u32,
    reason: Option<RejectReason>,
) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        (HEADER_PRICE, challenge.price.to_decimal_string(decimals)),
        (HEADER_RECIPIENT, challenge.recipient.clone()),
        (HEADER_MODEL_ID, challenge.resource_id.clone()),
        (HEADER_NETWORK, challenge.network.clone()),
        (HEADER_ASSET, challenge.asset.clone()),
        (HEADER_MEMO, challenge.memo.clone()),
        (HEADER_EXPIRES, challenge.expires_at.to_string()),
    ];
    if let Some(category) = &challenge.category {
        headers.push((HEADER_CATEGORY, category.clone()));
    }
    if let Some(reason) = reason {
        headers.push((HEADER_REASON, reason.code().to_string()));
    }
    if let Some(encoded) = encode_json_header(challenge) {
        headers.push((HEADER_CHALLENGE, encoded));
    }
    headers
}

/// Read challenge terms from a 402's headers. `None` when the required
/// terms are missing or malformed.
pub fn challenge_terms_from_headers<'a, F>(lookup: F, decimals: u32) -> Option<ChallengeTerms>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let non_empty = |name: &str| {
        lookup(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let price = Amount::parse(&non_empty(HEADER_PRICE)?, decimals).ok()?;
    if price.is_zero() {
        return None;
    }

    Some(ChallengeTerms {
        resource_id: non_empty(HEADER_MODEL_ID)?,
        price,
        recipient: non_empty(HEADER_RECIPIENT)?,
        network: non_empty(HEADER_NETWORK),
        asset: non_empty(HEADER_ASSET),
        memo: non_empty(HEADER_MEMO),
        expires_at: non_empty(HEADER_EXPIRES).and_then(|v| v.parse().ok()),
        category: non_empty(HEADER_CATEGORY),
        reason: non_empty(HEADER_REASON).and_then(|v| RejectReason::from_code(&v)),
    })
}

/// Headers a client attaches when retrying with `proof`.
pub fn proof_headers(proof: &PaymentProof, memo: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        (HEADER_TX, proof.tx_ref.clone()),
        (HEADER_PAYER, proof.payer.clone()),
    ];
    if let Some(memo) = memo {
        headers.push((HEADER_MEMO, memo.to_string()));
    }
    if let Some(encoded) = encode_json_header(proof) {
        headers.push((HEADER_PROOF, encoded));
    }
    headers
}

/// What a server finds on a retried request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedProof {
    pub proof: PaymentProof,
    pub memo: Option<String>,
}

/// Read a presented proof from request headers.
///
/// `x-agentpay-tx` and `x-agentpay-payer` are required. If `x-agentpay-proof`
/// is present its claims are used, provided they agree with those two
/// headers; otherwise the claims default to `challenge`'s terms. Either way
/// the verifier checks every claim against the ledger.
pub fn proof_from_headers<'a, F>(lookup: F, challenge: &PaymentChallenge) -> Option<PresentedProof>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let tx_ref = lookup(HEADER_TX).map(str::trim).filter(|v| !v.is_empty())?;
    let payer = lookup(HEADER_PAYER).map(str::trim).filter(|v| !v.is_empty())?;
    let memo = lookup(HEADER_MEMO)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let proof = match lookup(HEADER_PROOF).and_then(decode_json_header::<PaymentProof>) {
        Some(p) if p.tx_ref.trim() == tx_ref && p.payer.trim() == payer => p,
        Some(_) => return None,
        None => PaymentProof {
            tx_ref: tx_ref.to_string(),
            payer: payer.to_string(),
            amount: challenge.price,
            asset: challenge.asset.clone(),
            network: challenge.network.clone(),
            recipient: challenge.recipient.clone(),
        },
    };

    Some(PresentedProof { proof, memo })
}

/// Memo echoed on a request, if any.
pub fn memo_from_headers<'a, F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    lookup(HEADER_MEMO)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whether a request carries payment headers at all.
pub fn has_payment_headers<'a, F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<&'a str>,
{
    lookup(HEADER_TX).is_some_and(|v| !v.trim().is_empty())
}

pub fn encode_json_header<T: Serialize>(value: &T) -> Option<String> {
    let json = serde_json::to_vec(value).ok()?;
    Some(base64::engine::general_purpose::STANDARD.encode(json))
}

pub fn decode_json_header<T: for<'de> Deserialize<'de>>(header_value: &str) -> Option<T> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header_value.trim())
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

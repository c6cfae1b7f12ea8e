//! Payment challenges and the issuer that mints them.
//!
//! A memo has the shape `ap1.<issued_at>.<seq>.<mac>`. The MAC covers every
//! term of the challenge, so a server can rebuild and authenticate a
//! challenge from the memo a client echoes back without keeping state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::constants::{unix_now, NetworkConfig};
use crate::crypto;
use crate::error::PayError;

const MEMO_VERSION: &str = "ap1";
const MEMO_MAC_HEX_LEN: usize = 32;

/// A structured demand for payment, immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub resource_id: String,
    pub price: Amount,
    pub asset: String,
    pub recipient: String,
    pub network: String,
    pub memo: String,
    pub issued_at: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl PaymentChallenge {
    /// Whether `now` falls inside `[issued_at, expires_at]`.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        self.issued_at <= now && now <= self.expires_at
    }

    /// The explicit category if the server sent one, otherwise one derived
    /// from the resource id.
    pub fn effective_category(&self) -> String {
        self.category
            .clone()
            .unwrap_or_else(|| resource_category(&self.resource_id))
    }
}

/// Derive a category by stripping a trailing `-v<digits>` version suffix:
/// `weather-v1` is in category `weather`.
pub fn resource_category(resource_id: &str) -> String {
    match resource_id.rsplit_once("-v") {
        Some((base, version))
            if !base.is_empty()
                && !version.is_empty()
                && version.chars().all(|c| c.is_ascii_digit()) =>
        {
            base.to_string()
        }
        _ => resource_id.to_string(),
    }
}

/// Mints [`PaymentChallenge`]s. Pure construction: no I/O, no shared state
/// beyond a sequence counter.
pub struct ChallengeIssuer {
    secret: Vec<u8>,
    config: NetworkConfig,
    seq: AtomicU64,
}

impl ChallengeIssuer {
    /// `secret` keys the memo MAC; every server instance that verifies this
    /// issuer's challenges must share it.
    pub fn new(secret: impl Into<Vec<u8>>, config: NetworkConfig) -> Self {
        Self {
            secret: secret.into(),
            config,
            seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Issue a challenge valid from now for the configured TTL.
    pub fn issue(
        &self,
        resource_id: &str,
        price: Amount,
        recipient: &str,
        network: &str,
    ) -> Result<PaymentChallenge, PayError> {
        self.issue_at(resource_id, price, recipient, network, unix_now())
    }

    /// Same as [`issue`](Self::issue) with an explicit clock reading.
    pub fn issue_at(
        &self,
        resource_id: &str,
        price: Amount,
        recipient: &str,
        network: &str,
        now: u64,
    ) -> Result<PaymentChallenge, PayError> {
        if resource_id.trim().is_empty() {
            return Err(PayError::InvalidChallengeInput(
                "resource id must not be empty".to_string(),
            ));
        }
        if price.is_zero() {
            return Err(PayError::InvalidChallengeInput(
                "price must be positive".to_string(),
            ));
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Ok(self.build(resource_id, price, recipient, network, now, seq))
    }

    /// Rebuild a challenge from an echoed memo plus the server's own terms.
    ///
    /// Returns `None` if the memo is malformed or its MAC does not cover
    /// exactly these terms.
    pub fn reconstruct(
        &self,
        memo: &str,
        resource_id: &str,
        price: Amount,
        recipient: &str,
        network: &str,
    ) -> Option<PaymentChallenge> {
        let (issued_at, seq, _) = parse_memo(memo)?;
        let challenge = PaymentChallenge {
            memo: memo.to_string(),
            ..self.build(resource_id, price, recipient, network, issued_at, seq)
        };
        self.authenticate(&challenge).then_some(challenge)
    }

    /// Check that `challenge` was minted by this issuer and not altered since.
    pub fn authenticate(&self, challenge: &PaymentChallenge) -> bool {
        let Some((issued_at, seq, mac)) = parse_memo(&challenge.memo) else {
            return false;
        };
        if mac.len() != MEMO_MAC_HEX_LEN
            || issued_at != challenge.issued_at
            || challenge.expires_at != issued_at.saturating_add(self.config.challenge_ttl_secs)
        {
            return false;
        }
        let price = challenge.price.minor_units().to_string();
        let issued = issued_at.to_string();
        let seq = seq.to_string();
        crypto::verify_mac_fields(
            &self.secret,
            &[
                challenge.resource_id.as_bytes(),
                price.as_bytes(),
                challenge.asset.as_bytes(),
                challenge.recipient.as_bytes(),
                challenge.network.as_bytes(),
                issued.as_bytes(),
                seq.as_bytes(),
            ],
            mac,
        )
    }

    fn build(
        &self,
        resource_id: &str,
        price: Amount,
        recipient: &str,
        network: &str,
        issued_at: u64,
        seq: u64,
    ) -> PaymentChallenge {
        let price_units = price.minor_units().to_string();
        let issued = issued_at.to_string();
        let seq_str = seq.to_string();
        let mac = crypto::mac_fields(
            &self.secret,
            &[
                resource_id.as_bytes(),
                price_units.as_bytes(),
                self.config.asset.as_bytes(),
                recipient.as_bytes(),
                network.as_bytes(),
                issued.as_bytes(),
                seq_str.as_bytes(),
            ],
        );

        PaymentChallenge {
            resource_id: resource_id.to_string(),
            price,
            asset: self.config.asset.clone(),
            recipient: recipient.to_string(),
            network: network.to_string(),
            memo: format!(
                "{MEMO_VERSION}.{issued_at}.{seq}.{}",
                &mac[..MEMO_MAC_HEX_LEN]
            ),
            issued_at,
            expires_at: issued_at.saturating_add(self.config.challenge_ttl_secs),
            category: None,
        }
    }
}

fn parse_memo(memo: &str) -> Option<(u64, u64, &str)> {
    let mut parts = memo.split('.');
    if parts.next()? != MEMO_VERSION {
        return None;
    }
    let issued_at = parts.next()?.parse().ok()?;
    let seq = parts.next()?.parse().ok()?;
    let mac = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((issued_at, seq, mac))
}

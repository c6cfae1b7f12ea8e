//! Revenue splitting and settlement.
//!
//! Shares are integer basis points over minor units. Author and affiliate
//! cuts are floored; the platform takes whatever is left, so the three cuts
//! always sum to the gross amount.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::constants::{AFFILIATE_SHARE_BPS, AUTHOR_SHARE_BPS};
use crate::error::PayError;
use crate::proof::{same_account, PaymentProof};
use crate::wallet::Wallet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeRole {
    Author,
    Affiliate,
    Platform,
}

impl PayeeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PayeeRole::Author => "author",
            PayeeRole::Affiliate => "affiliate",
            PayeeRole::Platform => "platform",
        }
    }
}

impl fmt::Display for PayeeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cut of a split, bound to the account it is owed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payee {
    pub role: PayeeRole,
    pub recipient: String,
    pub amount: Amount,
}

/// An exact division of one settled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    pub gross: Amount,
    pub author: Payee,
    pub affiliate: Option<Payee>,
    pub platform: Payee,
}

impl RevenueSplit {
    pub fn author_cut(&self) -> Amount {
        self.author.amount
    }

    /// Zero when no affiliate took part.
    pub fn affiliate_cut(&self) -> Amount {
        self.affiliate.as_ref().map_or(Amount::ZERO, |a| a.amount)
    }

    pub fn platform_cut(&self) -> Amount {
        self.platform.amount
    }

    /// Zero every cut owed to `account` and return their sum. The payout
    /// wallet keeps those cuts instead of paying itself.
    pub fn retain_cuts_for(&mut self, account: &str) -> Amount {
        let mut retained = Amount::ZERO;
        let payees = std::iter::once(&mut self.author)
            .chain(self.affiliate.as_mut())
            .chain(std::iter::once(&mut self.platform));
        for payee in payees {
            if same_account(&payee.recipient, account) {
                retained = retained.checked_add(payee.amount).unwrap_or(retained);
                payee.amount = Amount::ZERO;
            }
        }
        retained
    }

    /// Payees in settlement order, skipping zero cuts.
    pub fn payees(&self) -> impl Iterator<Item = &Payee> {
        std::iter::once(&self.author)
            .chain(self.affiliate.as_ref())
            .chain(std::iter::once(&self.platform))
            .filter(|p| !p.amount.is_zero())
    }
}

/// A transfer executed during settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub role: PayeeRole,
    pub recipient: String,
    pub amount: Amount,
    pub proof: PaymentProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub transfers: Vec<Transfer>,
}

impl SettlementReport {
    pub fn total(&self) -> Amount {
        self.transfers
            .iter()
            .fold(Amount::ZERO, |acc, t| acc.checked_add(t.amount).unwrap_or(acc))
    }
}

/// Computes splits against a fixed platform account.
#[derive(Debug, Clone)]
pub struct RevenueSplitter {
    platform_address: String,
}

impl RevenueSplitter {
    pub fn new(platform_address: impl Into<String>) -> Self {
        Self {
            platform_address: platform_address.into(),
        }
    }

    pub fn platform_address(&self) -> &str {
        &self.platform_address
    }

    /// Author 80%, affiliate 5% if present, platform the remainder.
    pub fn split(
        &self,
        amount: Amount,
        author_address: &str,
        affiliate_address: Option<&str>,
    ) -> Result<RevenueSplit, PayError> {
        if amount.is_zero() {
            return Err(PayError::InvalidAmount(
                "split amount must be positive".to_string(),
            ));
        }

        let author_cut = amount.share_bps(AUTHOR_SHARE_BPS);
        let affiliate_cut = match affiliate_address {
            Some(_) => amount.share_bps(AFFILIATE_SHARE_BPS),
            None => Amount::ZERO,
        };
        // Shares sum to less than 100%, so this cannot underflow.
        let platform_cut = amount.saturating_sub(author_cut).saturating_sub(affiliate_cut);

        Ok(RevenueSplit {
            gross: amount,
            author: Payee {
                role: PayeeRole::Author,
                recipient: author_address.to_string(),
                amount: author_cut,
            },
            affiliate: affiliate_address.map(|addr| Payee {
                role: PayeeRole::Affiliate,
                recipient: addr.to_string(),
                amount: affiliate_cut,
            }),
            platform: Payee {
                role: PayeeRole::Platform,
                recipient: self.platform_address.clone(),
                amount: platform_cut,
            },
        })
    }
}

/// Pay out every non-zero cut of `split` through `wallet`, in order.
///
/// If the first transfer fails nothing moved and the error is
/// `WalletPaymentFailed`. A failure after at least one success is
/// `PartialSettlement`, carrying the transfers that did go through.
pub async fn settle<W: Wallet>(
    split: &RevenueSplit,
    wallet: &W,
    asset: &str,
) -> Result<SettlementReport, PayError> {
    let mut completed: Vec<Transfer> = Vec::new();

    for payee in split.payees() {
        match wallet.pay(&payee.recipient, payee.amount, asset, None).await {
            Ok(proof) => {
                tracing::info!(
                    role = %payee.role,
                    recipient = %payee.recipient,
                    amount = %payee.amount,
                    tx_ref = %proof.tx_ref,
                    "settlement transfer completed"
                );
                completed.push(Transfer {
                    role: payee.role,
                    recipient: payee.recipient.clone(),
                    amount: payee.amount,
                    proof,
                });
            }
            Err(e) if completed.is_empty() => {
                tracing::warn!(role = %payee.role, error = %e, "settlement failed before any transfer");
                return Err(match e {
                    PayError::WalletPaymentFailed(_) => e,
                    other => PayError::WalletPaymentFailed(other.to_string()),
                });
            }
            Err(e) => {
                tracing::error!(
                    role = %payee.role,
                    completed = completed.len(),
                    error = %e,
                    "settlement partially applied"
                );
                return Err(PayError::PartialSettlement {
                    completed,
                    failed_role: payee.role,
                    failed_amount: payee.amount,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(SettlementReport {
        transfers: completed,
    })
}

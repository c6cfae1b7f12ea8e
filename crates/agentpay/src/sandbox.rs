//! In-process ledger and wallet for local development and tests.
//!
//! A [`SandboxWallet`] writes every payment into a shared [`SandboxLedger`],
//! which then answers oracle queries for those transactions. Nothing leaves
//! the process.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;

use crate::amount::Amount;
use crate::constants::unix_now;
use crate::crypto;
use crate::error::PayError;
use crate::ledger::{LedgerOracle, LedgerStatus, LedgerTransfer};
use crate::proof::PaymentProof;
use crate::wallet::Wallet;

#[derive(Default)]
pub struct SandboxLedger {
    entries: DashMap<String, (LedgerTransfer, bool)>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl SandboxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer; `finalized = false` leaves it pending.
    pub fn record(&self, transfer: LedgerTransfer, finalized: bool) {
        self.entries
            .insert(transfer.tx_ref.to_ascii_lowercase(), (transfer, finalized));
    }

    /// Mark a pending transfer final. Returns `false` if unknown.
    pub fn finalize(&self, tx_ref: &str) -> bool {
        match self.entries.get_mut(&tx_ref.to_ascii_lowercase()) {
            Some(mut entry) => {
                entry.1 = true;
                true
            }
            None => false,
        }
    }

    /// While offline, every query fails as an oracle fault.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    pub fn transfers(&self) -> Vec<LedgerTransfer> {
        self.entries.iter().map(|e| e.value().0.clone()).collect()
    }
}

impl LedgerOracle for SandboxLedger {
    async fn confirm(&self, proof: &PaymentProof) -> Result<LedgerStatus, PayError> {
        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(PayError::Ledger("sandbox ledger offline".to_string()));
        }

        Ok(match self.entries.get(&proof.tx_ref.to_ascii_lowercase()) {
            None => LedgerStatus::Invalid("transaction not found".to_string()),
            Some(entry) if !entry.1 => LedgerStatus::Pending,
            Some(entry) => LedgerStatus::Confirmed(entry.0.clone()),
        })
    }
}

/// Wallet that settles into a [`SandboxLedger`].
pub struct SandboxWallet {
    address: String,
    network: String,
    ledger: Arc<SandboxLedger>,
    seq: AtomicU64,
    calls: AtomicUsize,
    finalize_immediately: AtomicBool,
    fail_on_call: Mutex<Option<usize>>,
}

impl SandboxWallet {
    pub fn new(address: &str, network: &str, ledger: Arc<SandboxLedger>) -> Self {
        Self {
            address: address.to_string(),
            network: network.to_string(),
            ledger,
            seq: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            finalize_immediately: AtomicBool::new(true),
            fail_on_call: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of `pay` calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When `false`, new payments land pending until
    /// [`SandboxLedger::finalize`] is called.
    pub fn set_finalize_immediately(&self, finalize: bool) {
        self.finalize_immediately.store(finalize, Ordering::SeqCst);
    }

    /// Make the `n`th call (1-based, counted from wallet creation) fail.
    pub fn fail_on_call(&self, n: Option<usize>) {
        if let Ok(mut slot) = self.fail_on_call.lock() {
            *slot = n;
        }
    }
}

impl Wallet for SandboxWallet {
    async fn pay(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &str,
        _memo: Option<&str>,
    ) -> Result<PaymentProof, PayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let should_fail = self
            .fail_on_call
            .lock()
            .map(|slot| *slot == Some(call))
            .unwrap_or(false);
        if should_fail {
            return Err(PayError::WalletPaymentFailed(format!(
                "sandbox wallet refused call {call}"
            )));
        }
        if amount.is_zero() {
            return Err(PayError::WalletPaymentFailed(
                "refusing zero-value transfer".to_string(),
            ));
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let tx_ref = format!(
            "0x{}",
            crypto::mac_fields(b"sandbox-tx", &[self.address.as_bytes(), &seq.to_be_bytes()])
        );

        self.ledger.record(
            LedgerTransfer {
                tx_ref: tx_ref.clone(),
                from: self.address.clone(),
                to: recipient.to_string(),
                amount,
                timestamp: unix_now(),
            },
            self.finalize_immediately.load(Ordering::SeqCst),
        );

        tracing::debug!(tx_ref = %tx_ref, to = %recipient, amount = %amount, "sandbox payment recorded");

        Ok(PaymentProof {
            tx_ref,
            payer: self.address.clone(),
            amount,
            asset: asset.to_string(),
            network: self.network.clone(),
            recipient: recipient.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wallet_payment_is_visible_to_ledger() {
        let ledger = Arc::new(SandboxLedger::new());
        let wallet = SandboxWallet::new("0xPAYER", "base", ledger.clone());

        let proof = wallet
            .pay("0xAB", Amount::from_minor_units(10_000), "USDC", None)
            .await
            .unwrap();
        assert_eq!(proof.tx_ref.len(), 66);

        match ledger.confirm(&proof).await.unwrap() {
            LedgerStatus::Confirmed(t) => {
                assert_eq!(t.from, "0xPAYER");
                assert_eq!(t.to, "0xAB");
                assert_eq!(t.amount, Amount::from_minor_units(10_000));
            }
            other => panic!("expected confirmed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_until_finalized() {
        let ledger = Arc::new(SandboxLedger::new());
        let wallet = SandboxWallet::new("0xPAYER", "base", ledger.clone());
        wallet.set_finalize_immediately(false);

        let proof = wallet
            .pay("0xAB", Amount::from_minor_units(1), "USDC", None)
            .await
            .unwrap();
        assert_eq!(ledger.confirm(&proof).await.unwrap(), LedgerStatus::Pending);
        assert!(ledger.finalize(&proof.tx_ref));
        assert!(matches!(
            ledger.confirm(&proof).await.unwrap(),
            LedgerStatus::Confirmed(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_offline() {
        let ledger = SandboxLedger::new();
        let proof = PaymentProof {
            tx_ref: "0xmissing".to_string(),
            payer: "0xP".to_string(),
            amount: Amount::from_minor_units(1),
            asset: "USDC".to_string(),
            network: "base".to_string(),
            recipient: "0xAB".to_string(),
        };
        assert!(matches!(
            ledger.confirm(&proof).await.unwrap(),
            LedgerStatus::Invalid(_)
        ));
        ledger.set_offline(true);
        assert!(ledger.confirm(&proof).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection_counts_calls() {
        let ledger = Arc::new(SandboxLedger::new());
        let wallet = SandboxWallet::new("0xPAYER", "base", ledger.clone());
        wallet.fail_on_call(Some(2));

        assert!(wallet.pay("0xA", Amount::from_minor_units(1), "USDC", None).await.is_ok());
        assert!(matches!(
            wallet.pay("0xA", Amount::from_minor_units(1), "USDC", None).await,
            Err(PayError::WalletPaymentFailed(_))
        ));
        assert!(wallet.pay("0xA", Amount::from_minor_units(1), "USDC", None).await.is_ok());
        assert_eq!(wallet.calls(), 3);
        assert_eq!(ledger.transfers().len(), 2);
    }
}

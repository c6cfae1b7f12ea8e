use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::amount::Amount;
use crate::challenge::PaymentChallenge;
use crate::constants::{unix_now, DEFAULT_CONFIRMATION_TIMEOUT_SECS, LEDGER_CLOCK_SKEW_SECS};
use crate::decision::{Decision, RejectReason};
use crate::ledger::{LedgerOracle, LedgerStatus};
use crate::proof::{same_account, PaymentProof};
use crate::replay_store::{InMemoryReplayStore, ReplayStore};

/// The trust boundary: turns a payment proof into an access decision.
///
/// Access is granted only after the ledger oracle confirms the transfer, and
/// each transaction reference is granted at most once.
pub struct PaymentVerifier<O> {
    oracle: O,
    /// Pluggable store for consumed transaction references.
    replay_store: Arc<dyn ReplayStore>,
    /// Per-txRef mutex held across replay check, oracle call and record.
    tx_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    confirmation_timeout: Duration,
    /// Maximum accepted proof amount (None = no limit).
    max_amount: Option<Amount>,
    /// How long consumed references are kept by the cleanup task (0 = forever).
    retention_secs: u64,
}

impl<O> PaymentVerifier<O> {
    /// Create a verifier with an in-memory replay store.
    ///
    /// # Warning
    /// The in-memory store forgets consumed proofs on restart. For
    /// production, chain `.with_replay_store(sqlite_store)`.
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            replay_store: Arc::new(InMemoryReplayStore::new()),
            tx_locks: Arc::new(DashMap::new()),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            max_amount: None,
            retention_secs: 0,
        }
    }

    pub fn with_replay_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.replay_store = store;
        self
    }

    /// Bound each oracle round-trip; on expiry the attempt is `NotYetConfirmed`.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Reject proofs above `max` as a terms mismatch.
    pub fn with_max_amount(mut self, max: Amount) -> Self {
        self.max_amount = Some(max);
        self
    }

    /// Let the cleanup task drop consumed references older than `secs`.
    /// Must exceed the challenge TTL plus twice [`LEDGER_CLOCK_SKEW_SECS`],
    /// or a purged transfer is still recent enough to pay for a live
    /// challenge.
    pub fn with_retention(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    pub fn replay_store(&self) -> &Arc<dyn ReplayStore> {
        &self.replay_store
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Whether `tx_ref` has already bought access.
    pub fn is_consumed(&self, tx_ref: &str) -> bool {
        self.replay_store
            .is_consumed(&tx_ref.trim().to_ascii_lowercase())
    }

    /// Start a background task that reclaims idle per-txRef locks (and, with
    /// a retention set, old consumed references) every 60 seconds.
    pub fn start_cleanup(&self) {
        let store = Arc::clone(&self.replay_store);
        let tx_locks = Arc::clone(&self.tx_locks);
        let retention_secs = self.retention_secs;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if retention_secs > 0 {
                    let purged = store.purge_older_than(retention_secs);
                    if purged > 0 {
                        tracing::info!(purged, "purged expired replay records");
                    }
                }

                // Both checks matter: strong_count catches a clone handed out
                // but not yet locked, try_lock catches a held guard.
                let before = tx_locks.len();
                tx_locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
                let removed = before - tx_locks.len();
                if removed > 0 {
                    tracing::debug!(removed, "cleaned up idle tx locks");
                }
            }
        });
    }

    /// Maximum number of concurrently tracked tx locks.
    const MAX_TX_LOCKS: usize = 100_000;

    fn tx_lock(&self, key: &str) -> Option<Arc<Mutex<()>>> {
        if self.tx_locks.len() >= Self::MAX_TX_LOCKS && !self.tx_locks.contains_key(key) {
            return None;
        }
        Some(
            self.tx_locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        )
    }
}

impl<O: LedgerOracle> PaymentVerifier<O> {
    /// Verify `proof` against `challenge` at the current time.
    pub async fn verify(&self, proof: &PaymentProof, challenge: &PaymentChallenge) -> Decision {
        self.verify_at(proof, challenge, unix_now()).await
    }

    /// Verify with an explicit clock reading.
    ///
    /// Steps short-circuit in order: terms, freshness, replay, ledger. The
    /// replay check, the oracle call and the final record run under one
    /// per-txRef lock, so concurrent presentations of one proof are granted
    /// at most once.
    pub async fn verify_at(
        &self,
        proof: &PaymentProof,
        challenge: &PaymentChallenge,
        now: u64,
    ) -> Decision {
        // 1. Terms
        if let Some(mismatch) = self.terms_mismatch(proof, challenge) {
            tracing::info!(
                tx_ref = %proof.tx_ref,
                memo = %challenge.memo,
                mismatch,
                "payment rejected: terms mismatch"
            );
            return Decision::rejected(RejectReason::TermsMismatch);
        }

        // 2. Freshness
        if !challenge.is_fresh_at(now) {
            tracing::info!(
                tx_ref = %proof.tx_ref,
                memo = %challenge.memo,
                now,
                expires_at = challenge.expires_at,
                "payment rejected: challenge expired"
            );
            return Decision::rejected(RejectReason::ChallengeExpired);
        }

        let key = proof.tx_ref.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Decision::rejected(RejectReason::InvalidTransaction);
        }

        let Some(lock) = self.tx_lock(&key) else {
            tracing::warn!("too many in-flight verifications, deferring");
            return Decision::rejected(RejectReason::NotYetConfirmed);
        };
        let _guard = lock.lock().await;

        // 3. Replay
        if self.replay_store.is_consumed(&key) {
            tracing::warn!(
                tx_ref = %proof.tx_ref,
                payer = %proof.payer,
                "replayed proof rejected"
            );
            return Decision::rejected(RejectReason::ReplayedProof);
        }

        // 4. Ledger
        let status =
            match tokio::time::timeout(self.confirmation_timeout, self.oracle.confirm(proof)).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    tracing::warn!(tx_ref = %proof.tx_ref, error = %e, "ledger oracle fault");
                    return Decision::rejected(RejectReason::NotYetConfirmed);
                }
                Err(_) => {
                    tracing::warn!(
                        tx_ref = %proof.tx_ref,
                        timeout_ms = self.confirmation_timeout.as_millis() as u64,
                        "ledger oracle timed out"
                    );
                    return Decision::rejected(RejectReason::NotYetConfirmed);
                }
            };

        let transfer = match status {
            LedgerStatus::Confirmed(t) => t,
            LedgerStatus::Pending => {
                tracing::info!(tx_ref = %proof.tx_ref, "payment not yet final");
                return Decision::rejected(RejectReason::NotYetConfirmed);
            }
            LedgerStatus::Invalid(why) => {
                tracing::warn!(tx_ref = %proof.tx_ref, reason = %why, "ledger rejected transaction");
                return Decision::rejected(RejectReason::InvalidTransaction);
            }
        };

        // The proof's own fields are claims; the ledger's record must back them.
        if transfer.amount != proof.amount
            || !same_account(&transfer.to, &proof.recipient)
            || !same_account(&transfer.from, &proof.payer)
        {
            tracing::warn!(
                tx_ref = %proof.tx_ref,
                claimed_amount = %proof.amount,
                ledger_amount = %transfer.amount,
                "ledger transfer disagrees with proof"
            );
            return Decision::rejected(RejectReason::InvalidTransaction);
        }

        // A transfer older than its challenge paid for something else.
        if transfer.timestamp.saturating_add(LEDGER_CLOCK_SKEW_SECS) < challenge.issued_at {
            tracing::warn!(
                tx_ref = %proof.tx_ref,
                transferred_at = transfer.timestamp,
                issued_at = challenge.issued_at,
                "ledger transfer predates challenge"
            );
            return Decision::rejected(RejectReason::InvalidTransaction);
        }

        // 5. Record
        if !self.replay_store.try_consume(&key) {
            // Another process sharing the store got there first.
            tracing::warn!(tx_ref = %proof.tx_ref, "replay race lost at commit");
            return Decision::rejected(RejectReason::ReplayedProof);
        }

        tracing::info!(
            tx_ref = %proof.tx_ref,
            payer = %proof.payer,
            amount = %proof.amount,
            resource = %challenge.resource_id,
            "payment verified"
        );

        Decision::Granted {
            payer: proof.payer.clone(),
            tx_ref: proof.tx_ref.clone(),
        }
    }

    fn terms_mismatch(
        &self,
        proof: &PaymentProof,
        challenge: &PaymentChallenge,
    ) -> Option<&'static str> {
        if !same_account(&proof.recipient, &challenge.recipient) {
            return Some("recipient");
        }
        if !proof.asset.eq_ignore_ascii_case(&challenge.asset) {
            return Some("asset");
        }
        if !proof.network.eq_ignore_ascii_case(&challenge.network) {
            return Some("network");
        }
        if proof.amount < challenge.price {
            return Some("amount below price");
        }
        if self.max_amount.is_some_and(|max| proof.amount > max) {
            return Some("amount above cap");
        }
        None
    }
}

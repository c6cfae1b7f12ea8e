//! Background revenue settlement after a granted payment.

use std::sync::Arc;

use agentpay::{settle, Amount, PayError, ReplayStore, RevenueSplitter, SettlementReport, Wallet};

use crate::config::CatalogEntry;
use crate::metrics::SETTLEMENTS;
use crate::middleware::GrantedPayment;

/// Split `amount` for `resource` and pay out every cut.
///
/// `payout_address` is the account the wallet pays from. It stands in as
/// author when the resource names none, and cuts owed to it stay put.
pub async fn run_settlement<W: Wallet>(
    wallet: &W,
    splitter: &RevenueSplitter,
    resource: &CatalogEntry,
    payout_address: &str,
    amount: Amount,
    asset: &str,
) -> Result<SettlementReport, PayError> {
    let author = resource.author.as_deref().unwrap_or(payout_address);
    let mut split = splitter.split(amount, author, resource.affiliate.as_deref())?;
    let retained = split.retain_cuts_for(payout_address);
    if !retained.is_zero() {
        tracing::debug!(resource = %resource.id, retained = %retained, "cuts owed to the payout account kept");
    }
    settle(&split, wallet, asset).await
}

/// Mark settlement transfers as spent so none can be presented as a payment.
fn consume_transfers<'a>(
    replay_store: &dyn ReplayStore,
    tx_refs: impl Iterator<Item = &'a str>,
) {
    for tx_ref in tx_refs {
        if !replay_store.try_consume(tx_ref) {
            tracing::warn!(tx_ref = %tx_ref, "settlement transfer already recorded as consumed");
        }
    }
}

/// Run [`run_settlement`] for `payment` on a background task, logging and
/// counting the outcome. The request that paid is never held up by payouts.
pub fn spawn_settlement<W: Wallet + 'static>(
    wallet: Arc<W>,
    splitter: RevenueSplitter,
    replay_store: Arc<dyn ReplayStore>,
    resource: CatalogEntry,
    payout_address: String,
    payment: GrantedPayment,
) {
    tokio::spawn(async move {
        let tx_ref = payment.tx_ref;
        let outcome = run_settlement(
            wallet.as_ref(),
            &splitter,
            &resource,
            &payout_address,
            payment.proof.amount,
            &payment.challenge.asset,
        )
        .await;

        match outcome {
            Ok(report) => {
                consume_transfers(
                    replay_store.as_ref(),
                    report.transfers.iter().map(|t| t.proof.tx_ref.as_str()),
                );
                SETTLEMENTS.with_label_values(&["success"]).inc();
                tracing::info!(
                    tx_ref = %tx_ref,
                    resource = %resource.id,
                    transfers = report.transfers.len(),
                    total = %report.total(),
                    "settlement complete"
                );
            }
            Err(PayError::PartialSettlement {
                completed,
                failed_role,
                failed_amount,
                reason,
            }) => {
                consume_transfers(
                    replay_store.as_ref(),
                    completed.iter().map(|t| t.proof.tx_ref.as_str()),
                );
                SETTLEMENTS.with_label_values(&["partial"]).inc();
                tracing::error!(
                    tx_ref = %tx_ref,
                    resource = %resource.id,
                    completed = completed.len(),
                    failed_role = %failed_role,
                    failed_amount = %failed_amount,
                    reason = %reason,
                    "settlement partially applied; manual reconciliation needed"
                );
            }
            Err(e) => {
                SETTLEMENTS.with_label_values(&["failed"]).inc();
                tracing::error!(tx_ref = %tx_ref, resource = %resource.id, error = %e, "settlement failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceCatalogBuilder;
    use agentpay::sandbox::{SandboxLedger, SandboxWallet};
    use agentpay::PayeeRole;

    #[tokio::test]
    async fn test_settlement_keeps_author_cut_without_author() {
        let ledger = Arc::new(SandboxLedger::new());
        let wallet = SandboxWallet::new("0xSERVER", "base", ledger.clone());
        let catalog = ResourceCatalogBuilder::new(6)
            .resource("weather-v1", "0.01", None)
            .unwrap()
            .build();
        let resource = catalog.get("weather-v1").unwrap();

        let report = run_settlement(
            &wallet,
            &RevenueSplitter::new("0xPLATFORM"),
            resource,
            "0xSERVER",
            resource.price,
            "USDC",
        )
        .await
        .unwrap();

        assert_eq!(report.transfers.len(), 1);
        assert_eq!(report.transfers[0].role, PayeeRole::Platform);
        assert_eq!(report.transfers[0].recipient, "0xPLATFORM");
        assert_eq!(report.transfers[0].amount, Amount::from_minor_units(2_000));
        assert!(ledger.transfers().iter().all(|t| t.to != "0xSERVER"));
    }

    #[tokio::test]
    async fn test_settlement_never_pays_its_own_account() {
        let ledger = Arc::new(SandboxLedger::new());
        let wallet = SandboxWallet::new("0xSERVER", "base", ledger.clone());
        let catalog = ResourceCatalogBuilder::new(6)
            .resource("weather-v1", "0.01", None)
            .unwrap()
            .build();
        let resource = catalog.get("weather-v1").unwrap();

        let report = run_settlement(
            &wallet,
            &RevenueSplitter::new("0xserver"),
            resource,
            "0xSERVER",
            resource.price,
            "USDC",
        )
        .await
        .unwrap();

        assert!(report.transfers.is_empty());
        assert_eq!(wallet.calls(), 0);
    }

    #[test]
    fn test_settlement_transfers_are_consumed() {
        let store = agentpay::InMemoryReplayStore::new();
        consume_transfers(&store, ["0xAA", "0xBB"].into_iter());
        assert!(store.is_consumed("0xaa"));
        assert!(store.is_consumed("0xbb"));
        // Already consumed is tolerated.
        consume_transfers(&store, ["0xAA"].into_iter());
        assert_eq!(store.len(), 2);
    }
}

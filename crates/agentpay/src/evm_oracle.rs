//! Ledger oracle for EVM chains: reads receipts over JSON-RPC and decodes the
//! ERC-20 `Transfer` log of the settlement asset.

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use alloy::sol;

use crate::amount::Amount;
use crate::constants::NetworkConfig;
use crate::error::PayError;
use crate::ledger::{LedgerOracle, LedgerStatus, LedgerTransfer};
use crate::proof::PaymentProof;

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

pub struct EvmLedgerOracle<P> {
    provider: P,
    asset_contract: Address,
    /// Blocks including the inclusion block; 1 = mined is final enough.
    confirmations: u64,
}

impl<P: Provider> EvmLedgerOracle<P> {
    pub fn new(provider: P, asset_contract: Address, confirmations: u64) -> Self {
        Self {
            provider,
            asset_contract,
            confirmations: confirmations.max(1),
        }
    }

    pub fn from_config(provider: P, config: &NetworkConfig) -> Result<Self, PayError> {
        let asset_contract: Address = config.asset_contract.parse().map_err(|e| {
            PayError::Config(format!(
                "invalid asset contract '{}': {e}",
                config.asset_contract
            ))
        })?;
        Ok(Self::new(provider, asset_contract, config.confirmations))
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn lookup(&self, proof: &PaymentProof) -> Result<LedgerStatus, PayError> {
        let Ok(hash) = proof.tx_ref.trim().parse::<TxHash>() else {
            return Ok(LedgerStatus::Invalid(format!(
                "'{}' is not a transaction hash",
                proof.tx_ref
            )));
        };

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| PayError::Ledger(format!("receipt lookup failed: {e}")))?;

        let Some(receipt) = receipt else {
            // Mempool transactions have no receipt yet.
            let known = self
                .provider
                .get_transaction_by_hash(hash)
                .await
                .map_err(|e| PayError::Ledger(format!("transaction lookup failed: {e}")))?;
            return Ok(match known {
                Some(_) => LedgerStatus::Pending,
                None => LedgerStatus::Invalid("transaction not found".to_string()),
            });
        };

        if !receipt.status() {
            return Ok(LedgerStatus::Invalid("transaction reverted".to_string()));
        }

        let Some(mined_in) = receipt.block_number else {
            return Ok(LedgerStatus::Pending);
        };
        if self.confirmations > 1 {
            let head = self
                .provider
                .get_block_number()
                .await
                .map_err(|e| PayError::Ledger(format!("block number lookup failed: {e}")))?;
            if head.saturating_sub(mined_in) + 1 < self.confirmations {
                return Ok(LedgerStatus::Pending);
            }
        }

        let block = self
            .provider
            .get_block_by_number(mined_in.into())
            .await
            .map_err(|e| PayError::Ledger(format!("block lookup failed: {e}")))?;
        let Some(block) = block else {
            return Ok(LedgerStatus::Pending);
        };

        let transfers: Vec<(Address, Address, U256)> = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.asset_contract)
            .filter_map(|log| log.log_decode::<Transfer>().ok())
            .map(|decoded| {
                let event = decoded.inner.data;
                (event.from, event.to, event.value)
            })
            .collect();

        // Prefer the transfer to the claimed recipient when a tx moves
        // tokens more than once.
        let chosen = transfers
            .iter()
            .find(|(_, to, _)| to.to_string().eq_ignore_ascii_case(proof.recipient.trim()))
            .or_else(|| transfers.first());

        let Some(&(from, to, value)) = chosen else {
            return Ok(LedgerStatus::Invalid(
                "no transfer of the settlement asset".to_string(),
            ));
        };
        let Ok(units) = u64::try_from(value) else {
            return Ok(LedgerStatus::Invalid("transfer value out of range".to_string()));
        };

        Ok(LedgerStatus::Confirmed(LedgerTransfer {
            tx_ref: proof.tx_ref.clone(),
            from: from.to_string(),
            to: to.to_string(),
            amount: Amount::from_minor_units(units),
            timestamp: block.header.timestamp,
        }))
    }
}

impl<P: Provider> LedgerOracle for EvmLedgerOracle<P> {
    async fn confirm(&self, proof: &PaymentProof) -> Result<LedgerStatus, PayError> {
        let status = self.lookup(proof).await;
        if let Err(e) = &status {
            tracing::warn!(tx_ref = %proof.tx_ref, error = %e, "evm oracle query failed");
        }
        status
    }
}

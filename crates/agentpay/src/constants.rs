/// Default settlement network identifier (Base L2).
pub const DEFAULT_NETWORK: &str = "base";

/// Default settlement asset symbol.
pub const DEFAULT_ASSET: &str = "USDC";

/// USDC has 6 decimal places.
pub const ASSET_DECIMALS: u32 = 6;

/// Native USDC contract on Base mainnet.
pub const DEFAULT_ASSET_CONTRACT: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// Default public RPC endpoint for Base mainnet.
pub const RPC_URL: &str = "https://mainnet.base.org";

/// Challenge lifetime in seconds.
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;

/// Upper bound on a single oracle confirmation round-trip.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 10;

/// Blocks (including the inclusion block) before a transfer counts as final.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default retry budget for [`AutoPayClient`](crate::client::AutoPayClient).
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Largest `ASSET_DECIMALS` accepted from the environment.
pub const MAX_ASSET_DECIMALS: u32 = 18;

/// Tolerated drift between the ledger's clock and ours when checking that a
/// transfer does not predate its challenge.
pub const LEDGER_CLOCK_SKEW_SECS: u64 = 60;

/// Revenue shares in basis points.
pub const AUTHOR_SHARE_BPS: u64 = 8_000;
pub const AFFILIATE_SHARE_BPS: u64 = 500;
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Runtime network configuration. Decouples the protocol components from
/// compile-time constants so the same code can settle on another ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network: String,
    pub asset: String,
    pub asset_decimals: u32,
    /// Token contract backing `asset` (EVM ledgers only).
    pub asset_contract: String,
    pub rpc_url: String,
    pub challenge_ttl_secs: u64,
    pub confirmations: u64,
}

impl Default for NetworkConfig {
    /// Defaults to USDC on Base.
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            asset: DEFAULT_ASSET.to_string(),
            asset_decimals: ASSET_DECIMALS,
            asset_contract: DEFAULT_ASSET_CONTRACT.to_string(),
            rpc_url: RPC_URL.to_string(),
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            confirmations: DEFAULT_CONFIRMATIONS,
        }
    }
}

impl NetworkConfig {
    /// Overlay `NETWORK`, `ASSET`, `ASSET_DECIMALS`, `ASSET_CONTRACT`, `RPC_URL`,
    /// `CHALLENGE_TTL_SECS` and `CONFIRMATIONS` from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|s| !s.trim().is_empty());

        Self {
            network: var("NETWORK").unwrap_or(defaults.network),
            asset: var("ASSET").unwrap_or(defaults.asset),
            asset_decimals: decimals_or_default(var("ASSET_DECIMALS").as_deref()),
            asset_contract: var("ASSET_CONTRACT").unwrap_or(defaults.asset_contract),
            rpc_url: var("RPC_URL").unwrap_or(defaults.rpc_url),
            challenge_ttl_secs: var("CHALLENGE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.challenge_ttl_secs),
            confirmations: var("CONFIRMATIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.confirmations),
        }
    }
}

fn decimals_or_default(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else {
        return ASSET_DECIMALS;
    };
    match raw.trim().parse::<u32>() {
        Ok(d) if d <= MAX_ASSET_DECIMALS => d,
        _ => {
            tracing::warn!(
                value = raw,
                max = MAX_ASSET_DECIMALS,
                default = ASSET_DECIMALS,
                "ignoring ASSET_DECIMALS"
            );
            ASSET_DECIMALS
        }
    }
}

/// Current unix time in seconds.
///
/// On clock error returns 0, which makes every challenge look not-yet-valid
/// rather than eternally fresh.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch");
            0
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_are_capped() {
        assert_eq!(decimals_or_default(None), ASSET_DECIMALS);
        assert_eq!(decimals_or_default(Some("18")), 18);
        assert_eq!(decimals_or_default(Some(" 0 ")), 0);
        assert_eq!(decimals_or_default(Some("19")), ASSET_DECIMALS);
        assert_eq!(decimals_or_default(Some("40")), ASSET_DECIMALS);
        assert_eq!(decimals_or_default(Some("six")), ASSET_DECIMALS);
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use agentpay::{resource_category, Amount, NetworkConfig, PayError};
use serde::{Deserialize, Serialize};

/// One priced resource as written in the resources file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedResource {
    pub id: String,
    /// Human-readable price such as `"0.01"` or `"$0.01"`.
    pub price: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Account owed the author cut. Defaults to the server's recipient.
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub affiliate: Option<String>,
    /// Returned to the caller once payment is granted.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

/// A resource with its price parsed into minor units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub price: Amount,
    pub description: Option<String>,
    pub category: String,
    #[serde(skip)]
    pub author: Option<String>,
    #[serde(skip)]
    pub affiliate: Option<String>,
    #[serde(skip)]
    pub content: Option<serde_json::Value>,
}

/// All priced resources, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ResourceCatalog {
    /// Load a JSON array of [`PricedResource`]s.
    pub fn load(path: &Path, decimals: u32) -> Result<Self, PayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PayError::Config(format!("cannot read {}: {e}", path.display())))?;
        let resources: Vec<PricedResource> = serde_json::from_str(&raw)?;
        resources
            .into_iter()
            .try_fold(ResourceCatalogBuilder::new(decimals), |b, r| b.add(r))
            .map(ResourceCatalogBuilder::build)
    }

    /// The built-in `weather-v1` demo at 0.01.
    pub fn demo(decimals: u32) -> Self {
        let builder = ResourceCatalogBuilder::new(decimals).add(PricedResource {
            id: "weather-v1".to_string(),
            price: "0.01".to_string(),
            description: Some("Current weather report".to_string()),
            category: None,
            author: None,
            affiliate: None,
            content: Some(serde_json::json!({
                "location": "San Francisco",
                "conditions": "fog",
                "temperatureC": 14
            })),
        });
        match builder {
            Ok(b) => b.build(),
            Err(e) => {
                tracing::error!(error = %e, "demo catalog failed to build");
                Self::default()
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for a [`ResourceCatalog`] with several priced resources.
pub struct ResourceCatalogBuilder {
    decimals: u32,
    entries: BTreeMap<String, CatalogEntry>,
}

impl ResourceCatalogBuilder {
    pub fn new(decimals: u32) -> Self {
        Self {
            decimals,
            entries: BTreeMap::new(),
        }
    }

    /// Register a resource (e.g. `resource("weather-v1", "$0.01", Some("..."))`).
    pub fn resource(
        self,
        id: &str,
        price: &str,
        description: Option<&str>,
    ) -> Result<Self, PayError> {
        self.add(PricedResource {
            id: id.to_string(),
            price: price.to_string(),
            description: description.map(String::from),
            category: None,
            author: None,
            affiliate: None,
            content: None,
        })
    }

    pub fn add(mut self, resource: PricedResource) -> Result<Self, PayError> {
        let id = resource.id.trim().to_string();
        if id.is_empty() || id.contains('/') {
            return Err(PayError::Config(format!(
                "invalid resource id '{}'",
                resource.id
            )));
        }
        if self.entries.contains_key(&id) {
            return Err(PayError::Config(format!("duplicate resource id '{id}'")));
        }
        let price = Amount::parse(&resource.price, self.decimals)?;
        if price.is_zero() {
            return Err(PayError::Config(format!("resource '{id}' has zero price")));
        }

        let category = resource
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| resource_category(&id));
        self.entries.insert(
            id.clone(),
            CatalogEntry {
                id,
                price,
                description: resource.description,
                category,
                author: resource.author,
                affiliate: resource.affiliate,
                content: resource.content,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> ResourceCatalog {
        ResourceCatalog {
            entries: self.entries,
        }
    }
}

/// Runtime configuration for the resource server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    /// Keys challenge memos. Every instance behind one hostname must share it.
    pub memo_secret: Vec<u8>,
    /// Account that receives client payments.
    pub recipient: String,
    /// Account that receives the platform cut.
    pub platform_address: String,
    /// In-process ledger and wallets instead of a real chain.
    pub sandbox: bool,
    pub replay_db_path: Option<String>,
    pub replay_retention_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub resources_path: Option<String>,
    /// Payment gateway used for settlement payouts.
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub metrics_token: Option<Vec<u8>>,
    pub public_metrics: bool,
    pub network: NetworkConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

const SANDBOX_RECIPIENT: &str = "0x00000000000000000000000000000000000a0402";
const SANDBOX_PLATFORM: &str = "0x00000000000000000000000000000000000f1a75";

/// Raise a non-zero replay retention to the shortest one under which a
/// purged transfer can no longer pay for a live challenge. 0 keeps records
/// forever.
pub fn retention_floor(requested_secs: u64, challenge_ttl_secs: u64) -> u64 {
    if requested_secs == 0 {
        return 0;
    }
    let floor = challenge_ttl_secs
        .saturating_add(2 * agentpay::LEDGER_CLOCK_SKEW_SECS)
        .saturating_add(1);
    if requested_secs < floor {
        tracing::warn!(
            requested = requested_secs,
            floor,
            "AGENTPAY_REPLAY_RETENTION_SECS below challenge TTL plus clock skew; raising it"
        );
        return floor;
    }
    requested_secs
}

impl ServerConfig {
    /// Read configuration from the environment. Exits the process if a
    /// required setting is missing.
    pub fn from_env() -> Self {
        let sandbox = env_flag("AGENTPAY_SANDBOX");

        let memo_secret = match env_var("AGENTPAY_MEMO_SECRET") {
            Some(s) => s.into_bytes(),
            None if sandbox => {
                tracing::warn!(
                    "AGENTPAY_MEMO_SECRET unset; using a fixed sandbox secret. \
                     DO NOT use this in production!"
                );
                b"agentpay-sandbox-memo-secret".to_vec()
            }
            None => {
                tracing::error!(
                    "AGENTPAY_MEMO_SECRET is required. \
                     Set it to a secure random value (e.g. `openssl rand -hex 32`). \
                     For local development only, set AGENTPAY_SANDBOX=true."
                );
                std::process::exit(1);
            }
        };

        let recipient = match env_var("AGENTPAY_RECIPIENT") {
            Some(r) => r,
            None if sandbox => SANDBOX_RECIPIENT.to_string(),
            None => {
                tracing::error!("AGENTPAY_RECIPIENT is required outside sandbox mode");
                std::process::exit(1);
            }
        };

        let platform_address = match env_var("AGENTPAY_PLATFORM_ADDRESS") {
            Some(p) => p,
            None if sandbox => SANDBOX_PLATFORM.to_string(),
            None => {
                tracing::error!("AGENTPAY_PLATFORM_ADDRESS is required outside sandbox mode");
                std::process::exit(1);
            }
        };

        let allowed_origins: Vec<String> = env_var("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let parse_or = |name: &str, default: u64| {
            env_var(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        let network = NetworkConfig::from_env();
        let replay_retention_secs = retention_floor(
            parse_or("AGENTPAY_REPLAY_RETENTION_SECS", 0),
            network.challenge_ttl_secs,
        );

        Self {
            port: env_var("PORT").and_then(|p| p.parse().ok()).unwrap_or(4021),
            rate_limit_rpm: parse_or("RATE_LIMIT_RPM", 60),
            allowed_origins,
            memo_secret,
            recipient,
            platform_address,
            sandbox,
            replay_db_path: env_var("AGENTPAY_REPLAY_DB"),
            replay_retention_secs,
            confirmation_timeout_secs: parse_or(
                "AGENTPAY_CONFIRMATION_TIMEOUT_SECS",
                agentpay::DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            ),
            resources_path: env_var("AGENTPAY_RESOURCES"),
            gateway_url: env_var("AGENTPAY_GATEWAY_URL"),
            gateway_api_key: env_var("AGENTPAY_GATEWAY_API_KEY"),
            metrics_token: env_var("METRICS_TOKEN").map(String::into_bytes),
            public_metrics: env_flag("AGENTPAY_PUBLIC_METRICS"),
            network,
        }
    }

    /// The configured catalog, or the demo catalog when no file is set.
    pub fn catalog(&self) -> Result<ResourceCatalog, PayError> {
        match &self.resources_path {
            Some(path) => ResourceCatalog::load(Path::new(path), self.network.asset_decimals),
            None => Ok(ResourceCatalog::demo(self.network.asset_decimals)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_catalog_has_weather() {
        let catalog = ResourceCatalog::demo(6);
        let entry = catalog.get("weather-v1").unwrap();
        assert_eq!(entry.price, Amount::from_minor_units(10_000));
        assert_eq!(entry.category, "weather");
        assert!(entry.content.is_some());
    }

    #[test]
    fn test_retention_never_shorter_than_a_challenge_lifetime() {
        assert_eq!(retention_floor(0, 300), 0);
        assert_eq!(retention_floor(1, 300), 421);
        assert_eq!(retention_floor(86_400, 300), 86_400);
    }

    #[test]
    fn test_builder_multiple_resources() {
        let catalog = ResourceCatalogBuilder::new(6)
            .resource("weather-v1", "$0.01", Some("weather"))
            .unwrap()
            .resource("db-query", "0.05", None)
            .unwrap()
            .resource("premium-v2", "1", None)
            .unwrap()
            .build();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("db-query").unwrap().price, Amount::from_minor_units(50_000));
        assert_eq!(catalog.get("db-query").unwrap().category, "db-query");
        assert_eq!(catalog.get("premium-v2").unwrap().category, "premium");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_builder_rejects_bad_resources() {
        assert!(ResourceCatalogBuilder::new(6).resource("", "0.01", None).is_err());
        assert!(ResourceCatalogBuilder::new(6).resource("a/b", "0.01", None).is_err());
        assert!(ResourceCatalogBuilder::new(6).resource("x", "free", None).is_err());
        assert!(ResourceCatalogBuilder::new(6).resource("x", "0", None).is_err());
        assert!(ResourceCatalogBuilder::new(6)
            .resource("x", "0.01", None)
            .unwrap()
            .resource("x", "0.02", None)
            .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "weather-v1", "price": "0.01", "author": "0xAUTHOR", "affiliate": "0xAFF"},
                {"id": "news", "price": "$0.002", "category": "media", "description": "headlines"}
            ]"#,
        )
        .unwrap();

        let catalog = ResourceCatalog::load(&path, 6).unwrap();
        let weather = catalog.get("weather-v1").unwrap();
        assert_eq!(weather.author.as_deref(), Some("0xAUTHOR"));
        assert_eq!(weather.affiliate.as_deref(), Some("0xAFF"));
        let news = catalog.get("news").unwrap();
        assert_eq!(news.price, Amount::from_minor_units(2_000));
        assert_eq!(news.category, "media");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(ResourceCatalog::load(&path, 6), Err(PayError::Serde(_))));
        assert!(matches!(
            ResourceCatalog::load(&dir.path().join("absent.json"), 6),
            Err(PayError::Config(_))
        ));
    }

    #[test]
    fn test_catalog_entry_json_hides_payout_fields() {
        let catalog = ResourceCatalog::demo(6);
        let v = serde_json::to_value(catalog.get("weather-v1").unwrap()).unwrap();
        assert_eq!(v["id"], "weather-v1");
        assert_eq!(v["price"], "10000");
        assert!(v.get("author").is_none());
        assert!(v.get("content").is_none());
    }
}

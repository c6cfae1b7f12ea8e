//! agentpay resource server: gates HTTP resources behind 402 payments.
//!
//! Unpaid requests get a challenge; paid retries are verified against the
//! ledger exactly once, and granted payments are split and paid out in the
//! background.
//!
//! # Modules
//!
//! - [`config`]: server configuration and the priced-resource catalog ([`ResourceCatalogBuilder`](config::ResourceCatalogBuilder))
//! - [`middleware`]: payment gate ([`require_payment`](middleware::require_payment))
//! - [`routes`]: health, metrics, catalog and gated resource handlers
//! - [`settlement`]: background revenue split and payout
//! - [`sandbox_gateway`]: local gateway API for sandbox mode
//! - [`metrics`]: Prometheus metrics for requests, verifications and settlements

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod sandbox_gateway;
pub mod settlement;
pub mod state;

pub use config::{CatalogEntry, PricedResource, ResourceCatalog, ResourceCatalogBuilder, ServerConfig};
pub use error::ServerError;
pub use middleware::{payment_required_response, require_payment, GrantedPayment};
pub use state::AppState;

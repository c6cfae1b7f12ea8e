//! CLI definition for agentpay-client.

use clap::{Parser, Subcommand};

/// Fetch 402-gated resources, paying through a gateway wallet.
#[derive(Parser, Debug)]
#[command(name = "agentpay-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the payment gateway (the server's `/sandbox` in sandbox mode).
    #[arg(long, env = "AGENTPAY_GATEWAY_URL")]
    pub gateway_url: String,

    /// API key sent to the gateway as `X-API-Key`.
    #[arg(long, env = "AGENTPAY_GATEWAY_API_KEY")]
    pub api_key: Option<String>,

    /// Cumulative spend ceiling for this run, e.g. `0.50`.
    #[arg(long, env = "AGENTPAY_MAX_SPEND", default_value = "1.00")]
    pub max_spend: String,

    /// Comma-separated categories the agent may pay for (`*` for any).
    #[arg(long, env = "AGENTPAY_ALLOWED_CATEGORIES", default_value = "*")]
    pub categories: String,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Register this agent with the gateway and print its wallet address.
    Bootstrap {
        #[arg(long, default_value = "agentpay-client")]
        agent_name: String,
    },
    /// Show the gateway wallet status.
    Status,
    /// Request a URL, paying if the service answers 402.
    Fetch {
        url: String,
        /// JSON body; switches the request to POST.
        #[arg(long)]
        json: Option<String>,
        /// Paid retries allowed before giving up.
        #[arg(long, default_value_t = agentpay::DEFAULT_MAX_RETRIES)]
        retries: u32,
    },
}

//! agentpay-client CLI entry point.

mod cli;

use agentpay_client::{
    policy_from_args, split_categories, AutoPayClient, BootstrapRequest, GatewayWallet,
    NetworkConfig, PayError, SpendGuard,
};
use clap::Parser;
use cli::{Cli, ClientCommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "agentpay-client failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), PayError> {
    let network = NetworkConfig::from_env();
    let policy = policy_from_args(&cli.max_spend, &cli.categories, network.asset_decimals)?;
    let wallet = GatewayWallet::new(&cli.gateway_url, cli.api_key.clone(), &network.network)?;

    match cli.command {
        ClientCommand::Bootstrap { agent_name } => {
            let resp = wallet
                .bootstrap(&BootstrapRequest {
                    agent_name,
                    max_spend: policy.max_spend,
                    allowed_categories: split_categories(&cli.categories),
                })
                .await?;
            println!("{}", resp.address);
        }
        ClientCommand::Status => {
            let status = wallet.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ClientCommand::Fetch { url, json, retries } => {
            let body = json
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?;
            let method = if body.is_some() {
                reqwest::Method::POST
            } else {
                reqwest::Method::GET
            };

            let decimals = network.asset_decimals;
            let client = AutoPayClient::new(wallet, network)?;
            let guard = SpendGuard::new(policy);
            let paid = client
                .send(method, &url, body.as_ref(), &guard, retries)
                .await?;

            for proof in &paid.payments {
                tracing::info!(
                    tx_ref = %proof.tx_ref,
                    amount = %proof.amount.to_decimal_string(decimals),
                    recipient = %proof.recipient,
                    "paid"
                );
            }
            tracing::info!(
                status = %paid.response.status(),
                spent = %guard.spent().to_decimal_string(decimals),
                remaining = %guard.remaining().to_decimal_string(decimals),
                "request finished"
            );

            let status = paid.response.status();
            let text = paid
                .response
                .text()
                .await
                .map_err(|e| PayError::Http(format!("failed to read response body: {e}")))?;
            println!("{text}");
            if !status.is_success() {
                return Err(PayError::Http(format!("{url} answered {status}")));
            }
        }
    }

    Ok(())
}

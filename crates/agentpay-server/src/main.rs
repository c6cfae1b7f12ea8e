use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};
use alloy::providers::ProviderBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentpay::replay_store::{InMemoryReplayStore, ReplayStore, SqliteReplayStore};
use agentpay::sandbox::{SandboxLedger, SandboxWallet};
use agentpay::{
    ChallengeIssuer, EvmLedgerOracle, GatewayWallet, LedgerOracle, PaymentVerifier,
    RevenueSplitter, Wallet,
};
use agentpay_server::config::{ResourceCatalog, ServerConfig};
use agentpay_server::sandbox_gateway::{self, SandboxGateway};
use agentpay_server::{routes, AppState};

fn build_cors(origins: &[String]) -> Cors {
    let payment_headers = vec![
        "content-type",
        "authorization",
        agentpay::wire::HEADER_TX,
        agentpay::wire::HEADER_PAYER,
        agentpay::wire::HEADER_MEMO,
        agentpay::wire::HEADER_PROOF,
    ];
    if origins.is_empty() {
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| {
                        // Match http://localhost or http://localhost:PORT exactly
                        o == "http://localhost" || o.starts_with("http://localhost:")
                    })
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allowed_headers(payment_headers)
            .expose_any_header()
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allowed_headers(payment_headers)
            .expose_any_header()
            .max_age(3600)
    }
}

fn open_replay_store(config: &ServerConfig) -> Arc<dyn ReplayStore> {
    match &config.replay_db_path {
        Some(path) => match SqliteReplayStore::open(path) {
            Ok(store) => {
                tracing::info!(path = %path, "using SQLite replay store");
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(path = %path, error = %e, "failed to open replay database");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!(
                "AGENTPAY_REPLAY_DB unset; consumed proofs are kept in memory and \
                 forgotten on restart"
            );
            Arc::new(InMemoryReplayStore::new())
        }
    }
}

fn load_catalog(config: &ServerConfig) -> ResourceCatalog {
    match config.catalog() {
        Ok(catalog) if !catalog.is_empty() => catalog,
        Ok(_) => {
            tracing::error!("resource catalog is empty");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load resource catalog");
            std::process::exit(1);
        }
    }
}

fn build_verifier<O>(oracle: O, config: &ServerConfig) -> PaymentVerifier<O> {
    PaymentVerifier::new(oracle)
        .with_replay_store(open_replay_store(config))
        .with_confirmation_timeout(Duration::from_secs(config.confirmation_timeout_secs))
        .with_retention(config.replay_retention_secs)
}

fn build_state<O, W>(config: &ServerConfig, oracle: O) -> AppState<O, W> {
    AppState::new(
        ChallengeIssuer::new(config.memo_secret.clone(), config.network.clone()),
        build_verifier(oracle, config),
        load_catalog(config),
        &config.recipient,
        RevenueSplitter::new(config.platform_address.clone()),
    )
    .with_metrics_access(config.metrics_token.clone(), config.public_metrics)
}

async fn serve<O, W>(
    config: ServerConfig,
    state: AppState<O, W>,
    sandbox: Option<web::Data<SandboxGateway>>,
) -> std::io::Result<()>
where
    O: LedgerOracle + 'static,
    W: Wallet + 'static,
{
    state.verifier.start_cleanup();

    tracing::info!("agentpay server listening at http://localhost:{}", config.port);
    tracing::info!(
        "Endpoints: GET /health, GET /metrics, GET /resources, GET|POST /resources/{{id}}"
    );
    for entry in state.catalog.entries() {
        tracing::info!(
            resource = %entry.id,
            price = %entry.price.to_decimal_string(state.network.asset_decimals),
            asset = %state.network.asset,
            "priced resource"
        );
    }
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limiter config"))?;

    let state = web::Data::new(state);
    let cors_origins = config.allowed_origins.clone();

    HttpServer::new(move || {
        let app = App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(web::JsonConfig::default().limit(65_536))
            .app_data(state.clone())
            .configure(routes::configure::<O, W>);
        match &sandbox {
            Some(gateway) => app
                .app_data(gateway.clone())
                .configure(sandbox_gateway::configure),
            None => app,
        }
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    if config.sandbox {
        tracing::warn!("SANDBOX MODE: payments settle on an in-process ledger, not a chain");
        let ledger = Arc::new(SandboxLedger::new());
        let payout = Arc::new(SandboxWallet::new(
            &config.recipient,
            &config.network.network,
            ledger.clone(),
        ));
        let gateway = web::Data::new(SandboxGateway::new(ledger.clone(), &config.network.network));
        tracing::info!(
            "Sandbox gateway at http://localhost:{}/sandbox (use as AGENTPAY_GATEWAY_URL)",
            config.port
        );

        let state = build_state(&config, ledger).with_payout_wallet(payout);
        return serve(config, state, Some(gateway)).await;
    }

    let provider = match config.network.rpc_url.parse() {
        Ok(url) => ProviderBuilder::new().connect_http(url),
        Err(e) => {
            tracing::error!(rpc_url = %config.network.rpc_url, error = %e, "invalid RPC_URL");
            std::process::exit(1);
        }
    };
    let oracle = match EvmLedgerOracle::from_config(provider, &config.network) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to configure ledger oracle");
            std::process::exit(1);
        }
    };

    let mut state: AppState<_, GatewayWallet> = build_state(&config, oracle);
    match &config.gateway_url {
        Some(url) => match GatewayWallet::new(url, config.gateway_api_key.clone(), &config.network.network) {
            Ok(wallet) => state = state.with_payout_wallet(Arc::new(wallet)),
            Err(e) => {
                tracing::error!(error = %e, "invalid AGENTPAY_GATEWAY_URL");
                std::process::exit(1);
            }
        },
        None => tracing::warn!("AGENTPAY_GATEWAY_URL unset; revenue splits will not be paid out"),
    }

    serve(config, state, None).await
}

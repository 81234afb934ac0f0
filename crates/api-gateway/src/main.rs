//! api-gateway: single entry point that forwards client requests to named
//! backend services, retrying transient failures.

mod config;
mod dispatch;
mod proxy;
mod registry;
mod server;
mod stats;

use config::GatewayConfig;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| "api-gateway.toml".to_string());

    let listen_override = args
        .iter()
        .position(|a| a == "--listen")
        .and_then(|i| args.get(i + 1).cloned());

    // Load configuration
    let mut config = GatewayConfig::load(&config_path)?;

    // CLI overrides take precedence over TOML and env vars
    if let Some(address) = listen_override {
        config.server.listen_address = address;
    }

    // Build the tokio runtime first; the gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // OTLP export is optional and falls back to fmt-only
        let tracing_guard = gateway_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            otlp_export = tracing_guard.exporting(),
            "Starting api-gateway"
        );

        run(config).await
    })
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    // A malformed service address stops startup here rather than per request
    let state = AppState::new(config)?;

    let registry = state.dispatcher.registry();
    if registry.is_empty() {
        tracing::warn!("No services configured; every dispatch will return 404");
    }
    for name in registry.names() {
        tracing::info!(service = name, "Registered backend service");
    }

    let policy = state.executor.policy();
    tracing::info!(
        services = registry.len(),
        max_attempts = policy.max_attempts,
        retry_delay_ms = policy.delay.as_millis() as u64,
        idempotency = ?policy.idempotency,
        "Route registry ready"
    );

    server::run(state).await
}

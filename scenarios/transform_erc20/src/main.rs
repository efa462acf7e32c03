// scenarios/transform_erc20/src/main.rs

use common::{load_config, transform_erc20_flow, ProviderEngine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env (RPC_URL)
    let cfg = load_config();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = match ProviderEngine::connect(&cfg) {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!("scenario failed: {err:#}");
            std::process::exit(1);
        }
    };

    // Any failure inside the flow is handled here, once: log it, release
    // the provider engine, exit non-zero.
    match transform_erc20_flow(&engine).await {
        Ok(()) => engine.stop(),
        Err(err) => {
            tracing::error!("scenario failed: {err:#}");
            engine.stop();
            std::process::exit(1);
        }
    }
}

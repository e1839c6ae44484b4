use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use bemfa_bridge::config;
use bemfa_bridge::integration::BemfaIntegration;
use bemfa_bridge::state::EntityStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bemfa_bridge=debug")),
        )
        .init();

    tracing::info!("Starting bemfa-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Config path: first arg, then env, then the conventional file name
    let config_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BEMFA_CONFIG").ok())
        .unwrap_or_else(|| "bemfa.yaml".to_string())
        .into();
    let config = config::load_config(&config_path)?;

    let store = Arc::new(EntityStore::new(256));
    let integration = BemfaIntegration::setup(config, store.clone()).await?;
    integration.clone().start_poller();

    // Narrate state changes until ctrl-c
    let mut events = store.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let changed = event.old_state.as_ref().map(|o| o.state.as_str())
                        != Some(event.new_state.state.as_str());
                    if changed {
                        tracing::info!(
                            entity = %event.new_state.entity_id,
                            state = %event.new_state.state,
                            "state changed"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "state event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    integration.shutdown();

    Ok(())
}

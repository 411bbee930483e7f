use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use rfihub::{
    auth::jwt::JwtService, config::AppConfig, db, default_channel, state::AppState, Dispatcher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "dispatcher",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        poll_seconds = config.dispatch_poll_seconds,
        "loaded rfihub configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let jwt = JwtService::from_config(&config)?;
    let poll_interval = Duration::from_secs(config.dispatch_poll_seconds);

    let state = Arc::new(AppState::new(pool, config, jwt));
    let dispatcher = Dispatcher::new(state, default_channel(), poll_interval);

    tokio::select! {
        _ = dispatcher.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("dispatcher received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;

use rfihub::{
    config::AppConfig,
    db,
    schema::{client_access_tokens, refresh_tokens},
};

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-tokens") => purge_tokens()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance purge-tokens");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance purge-tokens");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Deletes client links and refresh tokens that can never validate again
/// (expired or revoked). Validation already rejects them; this keeps the
/// tables from growing without bound.
fn purge_tokens() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded rfihub configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let now = Utc::now().naive_utc();

    let client_links = diesel::delete(
        client_access_tokens::table.filter(
            client_access_tokens::expires_at
                .le(now)
                .or(client_access_tokens::revoked_at.is_not_null()),
        ),
    )
    .execute(&mut conn)
    .context("failed to purge client access tokens")?;

    let refresh = diesel::delete(
        refresh_tokens::table.filter(
            refresh_tokens::expires_at
                .le(now)
                .or(refresh_tokens::revoked_at.is_not_null()),
        ),
    )
    .execute(&mut conn)
    .context("failed to purge refresh tokens")?;

    println!("Purged {client_links} client links and {refresh} refresh tokens.");
    Ok(())
}

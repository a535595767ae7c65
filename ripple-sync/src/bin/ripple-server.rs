//! Standalone feed authority.
//!
//! Configuration via environment:
//! - `RIPPLE_BIND` — listen address (default `127.0.0.1:3030`)
//! - `RIPPLE_SECRET` — HMAC secret for proof tokens (required)
//! - `RIPPLE_USERS` — path to a JSON user store (default `users.json`,
//!   skipped when the file does not exist)

use std::sync::Arc;

use ripple_sync::{AuthConfig, Authenticator, FeedServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let bind_addr =
        std::env::var("RIPPLE_BIND").unwrap_or_else(|_| "127.0.0.1:3030".to_string());
    let secret = std::env::var("RIPPLE_SECRET")
        .map_err(|_| "RIPPLE_SECRET must be set to the proof-token signing secret")?;
    let users_path = std::env::var("RIPPLE_USERS").unwrap_or_else(|_| "users.json".to_string());

    let auth = Arc::new(Authenticator::new(AuthConfig::new(secret.into_bytes())));
    match auth.load_users(&users_path).await {
        Ok(count) => log::info!("user store {users_path}: {count} users"),
        Err(e) => log::warn!("starting with an empty user store ({users_path}: {e})"),
    }

    let config = ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    };
    let server = FeedServer::bind(config, auth).await?;
    log::info!("ripple feed authority on {}", server.local_addr()?);
    server.run().await?;
    Ok(())
}

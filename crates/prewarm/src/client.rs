use reqwest::Client;
use tracing::debug;

use crate::config::FetcherConfig;
use crate::error::{PrebufferError, Result};

/// Create the HTTP client shared by every channel fetch task.
pub fn create_client(config: &FetcherConfig) -> Result<Client> {
    let mut client_builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    debug!(
        user_agent = %config.user_agent,
        pool_max_idle_per_host = config.pool_max_idle_per_host,
        "Building pre-buffer HTTP client"
    );
    client_builder.build().map_err(PrebufferError::from)
}

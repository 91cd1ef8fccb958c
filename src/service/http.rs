use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use reqwest::Client;

pub const DEFAULT_USER_AGENT: &str = concat!("siteaudit/", env!("CARGO_PKG_VERSION"));

/// Factory for the crawler's HTTP client. Redirects are not followed
/// automatically; the fetcher records the chain itself.
pub fn create_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .user_agent(user_agent.to_string())
        .gzip(true)
        .build()
        .context("Failed to build HTTP client")
}

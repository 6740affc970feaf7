use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connect phase never waits longer than this, even with a larger request timeout
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Truncates a string to at most `max_length` bytes, adding `...` to the end if it was truncated.
///
/// Backs off to the previous char boundary so multibyte codepoints are never split.
pub fn truncate_string(string: &impl ToString, max_length: usize) -> String {
    let string = string.to_string();
    if string.len() <= max_length {
        return string;
    }

    let mut cut = max_length.saturating_sub(3);
    while !string.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}...", &string[..cut])
}

/// Default `User-Agent`, e.g. `channel-sweeper/0.1.0 (+https://github.com/...)`
#[must_use]
pub fn default_user_agent() -> String {
    format!(
        "{}/{} (+{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY")
    )
}

/// Builds the HTTP client used for probing.
///
/// `timeout` bounds the whole request, body included. Redirects are followed with reqwest's
/// default policy.
///
/// # Errors
/// Errors when the user agent is not a valid header value or the TLS backend fails to initialize
pub fn init_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("Parsing User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
        .timeout(timeout)
        .build()
        .context("Building HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal!");
        ct.cancel();
    });
}

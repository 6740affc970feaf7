use std::{fmt, time::Duration};

use reqwest::{Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::util::truncate_string;
use inspect::{Inspection, read_prefix};
use rules::{ProbeRules, RelayEndpoint};

mod inspect;
pub mod rules;

/// Longest diagnostic carried over from an unexpected request error
const DIAGNOSTIC_MAX_LEN: usize = 50;

/// Why a stream was judged dead
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    /// Either the connect cap or the whole-request budget ran out, reqwest doesn't say which
    #[error("timeout")]
    Timeout,
    #[error("connection failed: {0}")]
    ConnectionFailure(String),
    #[error("status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("content indicates stream is unavailable: {0}")]
    ContentIndicatesUnavailable(String),
    #[error("malformed stream URL: {0}")]
    MalformedInput(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl ProbeFailure {
    fn from_request(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }

        // reqwest's own message only says "error sending request", the cause is at the bottom
        let mut cause: &dyn std::error::Error = err;
        while let Some(source) = cause.source() {
            cause = source;
        }

        if err.is_connect() {
            Self::ConnectionFailure(truncate_string(&cause, DIAGNOSTIC_MAX_LEN))
        } else {
            Self::Other(truncate_string(&cause, DIAGNOSTIC_MAX_LEN))
        }
    }
}

/// Outcome of classifying one stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Alive { reason: String },
    Dead(ProbeFailure),
}

impl Verdict {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Alive { .. })
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Alive { reason } => reason.clone(),
            Self::Dead(failure) => failure.to_string(),
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Alive { .. } => None,
            Self::Dead(failure) => Some(failure),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive { reason } => write!(f, "valid ({reason})"),
            Self::Dead(failure) => write!(f, "invalid ({failure})"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeMethod {
    #[default]
    Get,
    /// Status and final URL only, no body inspection
    Head,
}

/// Per-request limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBudget {
    pub timeout: Duration,
    /// Body bytes inspected on relay responses
    pub inspect_bytes: usize,
    /// Body bytes inspected on direct manifest responses
    pub manifest_inspect_bytes: usize,
    pub method: ProbeMethod,
}

impl Default for ProbeBudget {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            inspect_bytes: 4096,
            manifest_inspect_bytes: 2048,
            method: ProbeMethod::Get,
        }
    }
}

/// How a URL gets inspected. Picked by [`Classifier::strategy_for`], first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy<'a> {
    Opaque,
    Relay(&'a RelayEndpoint),
    Manifest(Url),
    Direct(Url),
}

/// Decides whether a stream URL is still alive.
///
/// Never errors: network failures and malformed input come back as [`Verdict::Dead`].
#[derive(Debug, Clone)]
pub struct Classifier {
    client: reqwest::Client,
    rules: ProbeRules,
    budget: ProbeBudget,
}

impl Classifier {
    /// `client` should carry the same timeout as `budget`, see [`crate::util::init_http_client`]
    #[must_use]
    pub fn new(client: reqwest::Client, rules: ProbeRules, budget: ProbeBudget) -> Self {
        Self {
            client,
            rules,
            budget,
        }
    }

    /// # Errors
    /// Returns [`ProbeFailure::MalformedInput`] for empty, unparsable or non-HTTP URLs
    pub fn strategy_for(&self, stream_url: &str) -> Result<Strategy<'_>, ProbeFailure> {
        let stream_url = stream_url.trim();
        if stream_url.is_empty() {
            return Err(ProbeFailure::MalformedInput("empty stream URL".into()));
        }

        if self.rules.is_opaque(stream_url) {
            return Ok(Strategy::Opaque);
        }

        let url = Url::parse(stream_url).map_err(|e| ProbeFailure::MalformedInput(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProbeFailure::MalformedInput(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }

        if let Some(relay) = self.rules.relay_for(&url) {
            return Ok(Strategy::Relay(relay));
        }

        if self.rules.is_manifest(&url) {
            Ok(Strategy::Manifest(url))
        } else {
            Ok(Strategy::Direct(url))
        }
    }

    /// Classifies one stream. `license` is only recorded in the trace span.
    #[instrument(skip(self))]
    pub async fn classify(&self, stream_url: &str, license: Option<&str>) -> Verdict {
        let verdict = match self.strategy_for(stream_url) {
            Err(failure) => Verdict::Dead(failure),
            Ok(Strategy::Opaque) => Verdict::Alive {
                reason: "resolved by consuming application".into(),
            },
            Ok(Strategy::Relay(relay)) => self.probe_relay(relay, stream_url.trim()).await,
            Ok(Strategy::Manifest(url)) => self.probe_manifest(url).await,
            Ok(Strategy::Direct(url)) => self.probe_direct(url).await,
        };

        debug!("{verdict}");
        verdict
    }

    async fn send(&self, url: impl reqwest::IntoUrl) -> Result<Response, ProbeFailure> {
        let req = match self.budget.method {
            ProbeMethod::Get => self.client.get(url),
            ProbeMethod::Head => self.client.head(url),
        };

        req.send()
            .await
            .map_err(|e| ProbeFailure::from_request(&e))
    }

    /// Fetches `url` and reads up to `limit` body bytes.
    ///
    /// With `tolerate_body_errors`, a broken body is inspected as far as it got instead of
    /// failing the probe.
    async fn inspect(
        &self,
        url: impl reqwest::IntoUrl,
        limit: usize,
        tolerate_body_errors: bool,
    ) -> Result<Inspection, ProbeFailure> {
        let response = self.send(url).await?;
        let status = response.status();
        let final_url = response.url().as_str().to_lowercase();

        let prefix = match self.budget.method {
            ProbeMethod::Head => Vec::new(),
            ProbeMethod::Get => match read_prefix(response, limit).await {
                (prefix, None) => prefix,
                (prefix, Some(e)) if tolerate_body_errors => {
                    debug!("Body read stopped early: {e}");
                    prefix
                }
                (_, Some(e)) => return Err(ProbeFailure::from_request(&e)),
            },
        };

        Ok(Inspection {
            status,
            final_url,
            prefix,
        })
    }

    async fn probe_relay(&self, relay: &RelayEndpoint, stream_url: &str) -> Verdict {
        let proxied = relay.proxied_url(stream_url);
        debug!("Probing through relay: {proxied}");

        match self.inspect(proxied, self.budget.inspect_bytes, true).await {
            Ok(inspection) => inspection.judge_relay(&self.rules.sentinel()),
            Err(failure) => Verdict::Dead(failure),
        }
    }

    async fn probe_manifest(&self, url: Url) -> Verdict {
        match self
            .inspect(url, self.budget.manifest_inspect_bytes, false)
            .await
        {
            Ok(inspection) => inspection.judge_manifest(&self.rules.sentinel()),
            Err(failure) => Verdict::Dead(failure),
        }
    }

    async fn probe_direct(&self, url: Url) -> Verdict {
        match self.inspect(url, 0, false).await {
            Ok(inspection) => inspection.judge_direct(),
            Err(failure) => Verdict::Dead(failure),
        }
    }
}

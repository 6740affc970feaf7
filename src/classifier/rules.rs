use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// A third-party service that resolves a protected source URL into a playable one.
///
/// Stream URLs whose host contains any of `domains` are probed through `base` instead of
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub base: String,
    pub domains: Vec<String>,
}

impl RelayEndpoint {
    fn serves(&self, host: &str) -> bool {
        self.domains
            .iter()
            .map(|domain| domain.trim().to_lowercase())
            .any(|domain| !domain.is_empty() && host.contains(&domain))
    }

    /// `<base>?<percent-encoded stream URL>`
    #[must_use]
    pub fn proxied_url(&self, stream_url: &str) -> String {
        format!("{}?{}", self.base, urlencoding::encode(stream_url))
    }
}

/// Data the classifier routes on. New domains or extensions go here, not in the algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeRules {
    /// Schemes only the playback app understands, e.g. `zappr`
    pub opaque_schemes: Vec<String>,
    /// Checked in order, first match wins
    pub relays: Vec<RelayEndpoint>,
    /// Path suffixes of directly playable manifests
    pub manifest_extensions: Vec<String>,
    /// Substrings that mark a manifest anywhere in the URL
    pub manifest_markers: Vec<String>,
    /// Token whose presence in a body or final URL proves the stream is dead
    pub sentinel: String,
}

impl Default for ProbeRules {
    fn default() -> Self {
        Self {
            opaque_schemes: vec!["zappr".into()],
            relays: vec![
                RelayEndpoint {
                    base: "https://vercel-api.zappr.stream/api".into(),
                    domains: vec!["mediapolis.rai.it".into(), "akamaized.net".into()],
                },
                RelayEndpoint {
                    base: "https://cloudflare-api.zappr.stream/api".into(),
                    domains: vec![
                        "viamotionhsi.netplus.ch".into(),
                        "dailymotion.com".into(),
                        "cloudfront.net".into(),
                    ],
                },
            ],
            manifest_extensions: vec![".m3u8".into(), ".mpd".into(), ".isml".into()],
            manifest_markers: vec![".m3u8".into()],
            sentinel: "video_no_available".into(),
        }
    }
}

impl ProbeRules {
    /// Reads rules from a JSON file. Omitted keys fall back to [`ProbeRules::default`].
    ///
    /// # Errors
    /// Errors when the file is unreadable or not valid JSON
    #[instrument]
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Reading probe rules {}", path.display()))?;

        serde_json::from_slice(&raw)
            .with_context(|| format!("Parsing probe rules {}", path.display()))
    }

    #[must_use]
    pub fn is_opaque(&self, stream_url: &str) -> bool {
        let Some((scheme, _)) = stream_url.split_once("://") else {
            return false;
        };

        self.opaque_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    #[must_use]
    pub fn relay_for(&self, url: &Url) -> Option<&RelayEndpoint> {
        let host = url.host_str()?.to_lowercase();
        self.relays.iter().find(|relay| relay.serves(&host))
    }

    #[must_use]
    pub fn is_manifest(&self, url: &Url) -> bool {
        let path = url.path().to_lowercase();
        let full = url.as_str().to_lowercase();

        self.manifest_extensions
            .iter()
            .any(|ext| path.ends_with(&ext.to_lowercase()))
            || self
                .manifest_markers
                .iter()
                .any(|marker| full.contains(&marker.to_lowercase()))
    }

    /// Lower-cased sentinel, ready to compare against lower-cased content
    #[must_use]
    pub fn sentinel(&self) -> String {
        self.sentinel.to_lowercase()
    }
}

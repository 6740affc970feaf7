use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result, ensure};
use tracing::instrument;

use crate::catalog::{Channel, Selection};

/// Community-maintained list the local catalog is compared against
pub const ZAPPR_CHANNELS_URL: &str =
    "https://raw.githubusercontent.com/ZapprTV/channels/main/channels.json";

pub const REFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads a reference channel list
///
/// # Errors
/// Errors on network failure, non-success status or a body that is not a channel list
#[instrument(skip(client))]
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<Channel>> {
    let res = client
        .get(url)
        .timeout(REFERENCE_TIMEOUT)
        .send()
        .await
        .context("Fetching reference channel list")?;

    ensure!(
        res.status().is_success(),
        "Reference list answered with status {}",
        res.status()
    );

    res.json::<Vec<Channel>>()
        .await
        .context("Parsing reference channel list")
}

/// How a local catalog differs from a reference list, restricted to a selection
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Comparison {
    /// Reference ids that the local catalog lacks
    pub missing_locally: Vec<String>,
    /// `(id, local URL, reference URL)` for channels present on both sides
    pub url_changed: Vec<(String, String, String)>,
}

#[must_use]
pub fn compare(local: &[Channel], reference: &[Channel], selection: &Selection) -> Comparison {
    let local_by_id = local
        .iter()
        .map(|c| (c.id.to_lowercase(), c))
        .collect::<HashMap<_, _>>();

    let mut comparison = Comparison::default();
    for theirs in reference.iter().filter(|c| selection.contains(c)) {
        let id = theirs.id.to_lowercase();
        match local_by_id.get(&id) {
            None => comparison.missing_locally.push(id),
            Some(ours) if ours.stream_url != theirs.stream_url => comparison.url_changed.push((
                id,
                ours.stream_url.clone(),
                theirs.stream_url.clone(),
            )),
            Some(_) => {}
        }
    }

    comparison
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    fn channel(id: &str, url: &str) -> Channel {
        Channel {
            id: id.into(),
            name: id.to_uppercase(),
            stream_url: url.into(),
            ..Channel::default()
        }
    }

    #[test]
    fn compare_reports_missing_and_changed() {
        let local = vec![channel("rai1", "zappr://rai1"), channel("la7", "zappr://la7")];
        let reference = vec![
            channel("Rai1", "zappr://rai1"),
            channel("la7", "https://d15umi5iaezxgx.cloudfront.net/LA7/DRM/DASH/Live.mpd"),
            channel("rai2", "zappr://rai2"),
            channel("bbc-one", "https://bbc.example/one.m3u8"),
        ];

        let cmp = compare(&local, &reference, &Selection::italian());
        assert_eq!(cmp.missing_locally, vec!["rai2".to_string()]);
        assert_eq!(cmp.url_changed.len(), 1);
        assert_eq!(cmp.url_changed[0].0, "la7");
    }

    #[tokio::test]
    async fn fetch_parses_the_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "rai1", "name": "Rai 1", "logo": null, "streamUrl": "zappr://rai1", "license": "clearkey" }
            ])))
            .mount(&server)
            .await;

        let channels = fetch(&reqwest::Client::new(), &format!("{}/channels.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].license.as_deref(), Some("clearkey"));
    }

    #[tokio::test]
    async fn fetch_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(
            fetch(&reqwest::Client::new(), &format!("{}/channels.json", server.uri()))
                .await
                .is_err()
        );
    }
}

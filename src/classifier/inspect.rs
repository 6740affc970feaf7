use reqwest::{Response, StatusCode};
use tokio_stream::StreamExt;

use super::{ProbeFailure, Verdict};
use crate::util::truncate_string;

/// Statuses a relay may answer with for a live stream
const RELAY_OK_STATUSES: [u16; 5] = [200, 301, 302, 307, 308];
/// Statuses a direct stream or manifest may answer with
const DIRECT_OK_STATUSES: [u16; 3] = [200, 301, 302];
/// Words that, next to "error", mark a relay body as a failure page
const RELAY_FAILURE_WORDS: [&str; 3] = ["unavailable", "not found", "404"];

/// Reads at most `limit` bytes of the body, stopping as soon as the limit is passed.
///
/// A `limit` of 0 stops at the first non-empty chunk. On a read error, whatever arrived before
/// it is returned alongside the error.
pub(super) async fn read_prefix(
    response: Response,
    limit: usize,
) -> (Vec<u8>, Option<reqwest::Error>) {
    let mut prefix = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                prefix.extend_from_slice(&chunk);
                if prefix.len() > limit {
                    break;
                }
            }
            Err(e) => return (prefix, Some(e)),
        }
    }

    prefix.truncate(limit);
    (prefix, None)
}

/// What came back from one probe request
#[derive(Debug)]
pub(super) struct Inspection {
    pub status: StatusCode,
    /// Lower-cased URL after redirects
    pub final_url: String,
    pub prefix: Vec<u8>,
}

impl Inspection {
    /// Lower-cased text of the first `n` bytes of the body
    fn text(&self, n: usize) -> String {
        let end = n.min(self.prefix.len());
        String::from_utf8_lossy(&self.prefix[..end]).to_lowercase()
    }

    pub fn judge_relay(&self, sentinel: &str) -> Verdict {
        let body = self.text(usize::MAX);
        if body.contains(sentinel) || self.final_url.contains(sentinel) {
            return Verdict::Dead(ProbeFailure::ContentIndicatesUnavailable(format!(
                "relay answered `{sentinel}`"
            )));
        }

        let head = self.text(1000);
        if head.contains("error") && RELAY_FAILURE_WORDS.iter().any(|w| head.contains(w)) {
            return Verdict::Dead(ProbeFailure::ContentIndicatesUnavailable(format!(
                "error page: {}",
                truncate_string(&head.trim(), 150)
            )));
        }

        let code = self.status.as_u16();
        if RELAY_OK_STATUSES.contains(&code) {
            if self.final_url.contains("error") {
                return Verdict::Dead(ProbeFailure::ContentIndicatesUnavailable(format!(
                    "redirected to an error URL: {}",
                    truncate_string(&self.final_url, 100)
                )));
            }
            return Verdict::Alive {
                reason: format!("status {code}, relay resolved"),
            };
        }

        if self.status == StatusCode::NOT_FOUND || self.status.is_server_error() {
            return Verdict::Dead(ProbeFailure::UnexpectedStatus(self.status));
        }

        // Unusual statuses are not proof of failure on their own
        if self.text(500).contains("error") {
            Verdict::Dead(ProbeFailure::UnexpectedStatus(self.status))
        } else {
            Verdict::Alive {
                reason: format!("status {code}, no error in content"),
            }
        }
    }

    pub fn judge_manifest(&self, sentinel: &str) -> Verdict {
        if !DIRECT_OK_STATUSES.contains(&self.status.as_u16()) {
            return Verdict::Dead(ProbeFailure::UnexpectedStatus(self.status));
        }

        let body = self.text(usize::MAX);
        if body.contains(sentinel) || (body.contains("error") && body.contains("not found")) {
            return Verdict::Dead(ProbeFailure::ContentIndicatesUnavailable(format!(
                "manifest body: {}",
                truncate_string(&body.trim(), 100)
            )));
        }

        Verdict::Alive {
            reason: format!("status {}", self.status.as_u16()),
        }
    }

    pub fn judge_direct(&self) -> Verdict {
        if DIRECT_OK_STATUSES.contains(&self.status.as_u16()) {
            Verdict::Alive {
                reason: format!("status {}", self.status.as_u16()),
            }
        } else {
            Verdict::Dead(ProbeFailure::UnexpectedStatus(self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "video_no_available";

    fn inspection(status: u16, final_url: &str, body: &str) -> Inspection {
        Inspection {
            status: StatusCode::from_u16(status).unwrap(),
            final_url: final_url.to_lowercase(),
            prefix: body.as_bytes().to_vec(),
        }
    }

    fn assert_dead(verdict: &Verdict) {
        assert!(!verdict.is_valid(), "expected dead, got {verdict}");
    }

    fn assert_alive(verdict: &Verdict) {
        assert!(verdict.is_valid(), "expected alive, got {verdict}");
    }

    #[test]
    fn relay_sentinel_in_body_or_url() {
        assert_dead(&inspection(200, "https://cdn/x.m3u8", r#"{"e":"VIDEO_NO_AVAILABLE"}"#).judge_relay(SENTINEL));
        assert_dead(&inspection(200, "https://cdn/video_no_available.mp4", "").judge_relay(SENTINEL));
    }

    #[test]
    fn relay_error_page_needs_a_second_word() {
        assert_dead(&inspection(200, "https://cdn/x", "Error: channel unavailable").judge_relay(SENTINEL));
        assert_dead(&inspection(200, "https://cdn/x", "<h1>error 404</h1>").judge_relay(SENTINEL));
        // "error" alone within a live manifest is not enough
        assert_alive(&inspection(200, "https://cdn/x", "#EXTM3U\n#EXT-X-ERROR-TOLERANCE").judge_relay(SENTINEL));
    }

    #[test]
    fn relay_error_words_past_first_kilobyte_are_ignored() {
        let body = format!("{}error not found", "#".repeat(1000));
        assert_alive(&inspection(200, "https://cdn/x", &body).judge_relay(SENTINEL));
    }

    #[test]
    fn relay_statuses() {
        assert_alive(&inspection(307, "https://cdn/x", "").judge_relay(SENTINEL));
        assert_dead(&inspection(302, "https://cdn/error.html", "").judge_relay(SENTINEL));
        assert_dead(&inspection(404, "https://cdn/x", "").judge_relay(SENTINEL));
        assert_dead(&inspection(502, "https://cdn/x", "").judge_relay(SENTINEL));
    }

    #[test]
    fn relay_unusual_status_is_permissive() {
        assert_alive(&inspection(403, "https://cdn/x", "forbidden").judge_relay(SENTINEL));
        assert_dead(&inspection(403, "https://cdn/x", "an error occurred").judge_relay(SENTINEL));
    }

    #[test]
    fn manifest_rules() {
        assert_alive(&inspection(200, "https://cdn/x.m3u8", "#EXTM3U\n#EXT-X-VERSION:3").judge_manifest(SENTINEL));
        assert_dead(&inspection(200, "https://cdn/x.m3u8", "Error: Not Found").judge_manifest(SENTINEL));
        assert_dead(&inspection(403, "https://cdn/x.m3u8", "#EXTM3U").judge_manifest(SENTINEL));

        let not_found = inspection(404, "https://cdn/x.m3u8", "");
        assert!(not_found.judge_manifest(SENTINEL).reason().contains("404"));
    }

    #[test]
    fn direct_rules() {
        assert_alive(&inspection(301, "https://cdn/x", "").judge_direct());
        assert_dead(&inspection(307, "https://cdn/x", "").judge_direct());
        assert_dead(&inspection(410, "https://cdn/x", "").judge_direct());
    }
}

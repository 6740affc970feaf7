use std::{path::Path, sync::LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{instrument, warn};

use crate::catalog::Channel;

static TVG_LOGO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"tvg-logo="([^"]+)""#).unwrap());
static SLUG_STRIP_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SLUG_COLLAPSE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_-]+").unwrap());

/// Turns a display name into a catalog id, e.g. `"Rai 1 HD"` -> `"rai-1-hd"`
#[must_use]
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = SLUG_STRIP_REGEX.replace_all(&lower, "");
    SLUG_COLLAPSE_REGEX
        .replace_all(&stripped, "-")
        .trim_matches('-')
        .to_string()
}

/// Display name of an `#EXTINF` line: everything after the first comma that is not inside a
/// quoted attribute value
fn extinf_title(line: &str) -> Option<&str> {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                let title = line[i + 1..].trim();
                return (!title.is_empty()).then_some(title);
            }
            _ => {}
        }
    }

    None
}

/// Parses an extended M3U playlist into catalog channels
#[must_use]
pub fn parse(playlist: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<Channel> = None;

    for (line_no, line) in playlist.lines().enumerate() {
        let line = line.trim();

        if line.starts_with("#EXTINF") {
            let name = extinf_title(line).unwrap_or("Unknown").to_string();
            pending = Some(Channel {
                id: slugify(&name),
                logo: TVG_LOGO_REGEX
                    .captures(line)
                    .map(|c| c[1].to_string()),
                name,
                ..Channel::default()
            });
        } else if !line.is_empty() && !line.starts_with('#') {
            let Some(mut channel) = pending.take() else {
                warn!("Line {}: stream URL without #EXTINF, skipping", line_no + 1);
                continue;
            };
            channel.stream_url = line.to_string();
            channels.push(channel);
        }
    }

    channels
}

/// Reads an M3U file from disk. Invalid UTF-8 is replaced rather than rejected.
///
/// # Errors
/// Errors when the file cannot be read
#[instrument]
pub async fn read_playlist(path: &Path) -> Result<Vec<Channel>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Reading playlist {}", path.display()))?;

    Ok(parse(&String::from_utf8_lossy(&raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_matches_catalog_ids() {
        assert_eq!(slugify("Rai 1"), "rai-1");
        assert_eq!(slugify("  Canale 5 (HD)! "), "canale-5-hd");
        assert_eq!(slugify("Food_Network -- Italia"), "food-network-italia");
        assert_eq!(slugify("Più Tv"), "più-tv");
    }

    #[test]
    fn parses_extinf_pairs() {
        let playlist = indoc::indoc! {r#"
            #EXTM3U
            #EXTINF:-1 tvg-id="rai1.it" tvg-logo="https://logo.example/rai1.png" group-title="Generalisti",Rai 1
            https://example.com/rai1/index.m3u8

            #EXTINF:-1 tvg-name="Tg, Notizie",TG Notizie 24
            #EXTVLCOPT:http-user-agent=Mozilla
            https://example.com/tg.m3u8
            #EXTINF:-1 tvg-id="x"
            zappr://nameless
        "#};

        let channels = parse(playlist);
        assert_eq!(channels.len(), 3);

        assert_eq!(channels[0].id, "rai-1");
        assert_eq!(channels[0].name, "Rai 1");
        assert_eq!(
            channels[0].logo.as_deref(),
            Some("https://logo.example/rai1.png")
        );
        assert_eq!(channels[0].stream_url, "https://example.com/rai1/index.m3u8");

        assert_eq!(channels[1].name, "TG Notizie 24");
        assert_eq!(channels[1].logo, None);

        assert_eq!(channels[2].name, "Unknown");
        assert_eq!(channels[2].id, "unknown");
    }

    #[test]
    fn url_without_extinf_is_skipped() {
        let channels = parse("#EXTM3U\nhttps://orphan.example/live.m3u8\n");
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn lossy_decoding_of_bad_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.m3u");
        let mut raw = b"#EXTINF:-1,Caf\xe9 TV\n".to_vec();
        raw.extend_from_slice(b"https://cafe.example/live.m3u8\n");
        tokio::fs::write(&path, raw).await.unwrap();

        let channels = read_playlist(&path).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].stream_url, "https://cafe.example/live.m3u8");
    }
}

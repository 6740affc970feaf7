use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Italian channel ids the maintenance runs have historically been scoped to
pub const ITALIAN_CHANNEL_IDS: &[&str] = &[
    "rai1",
    "rai2",
    "rai3",
    "rai4",
    "rai5",
    "raimovie",
    "raiyoyo",
    "raipremium",
    "rete4",
    "canale5",
    "italia1",
    "la7",
    "tv8",
    "nove",
    "20mediaset",
    "iris",
    "realtime",
    "topcrime",
    "focus",
    "dmax",
    "giallo",
    "mediaset_extra",
    "boing",
    "cartoonito",
    "super",
    "k2",
    "frisbee",
    "food_network",
];

/// One catalog entry.
///
/// Unknown fields survive a load / save cycle untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which channels a run should look at
#[derive(Debug, Clone, Default)]
pub enum Selection {
    #[default]
    All,
    /// Only channels whose lower-cased id is in the set
    Ids(HashSet<String>),
}

impl Selection {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Ids(
            ids.into_iter()
                .map(|id| id.as_ref().trim().to_lowercase())
                .filter(|id| !id.is_empty())
                .collect(),
        )
    }

    #[must_use]
    pub fn italian() -> Self {
        Self::from_ids(ITALIAN_CHANNEL_IDS)
    }

    #[must_use]
    pub fn contains(&self, channel: &Channel) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&channel.id.to_lowercase()),
        }
    }
}

/// Reads a catalog file
///
/// # Errors
/// Errors when the file is missing, unreadable or is not a JSON list of channels
#[instrument]
pub async fn load(path: &Path) -> Result<Vec<Channel>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Reading catalog {}", path.display()))?;

    let channels = serde_json::from_slice::<Vec<Channel>>(&raw)
        .with_context(|| format!("Parsing catalog {}", path.display()))?;
    debug!("Loaded {} channels", channels.len());

    Ok(channels)
}

/// Writes a catalog file as pretty-printed JSON
///
/// # Errors
/// Errors when the file cannot be written
#[instrument(skip(channels))]
pub async fn save(path: &Path, channels: &[Channel]) -> Result<()> {
    write_json(path, &channels).await
}

/// Pretty-prints any serializable value into `path`, with a trailing newline
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value).context("Serializing JSON")?;
    body.push(b'\n');

    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Writing {}", path.display()))
}

/// Where [`backup`] puts the copy of `path`: `channels.json` -> `channels.json.backup`
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    path.with_file_name(name)
}

/// Copies `path` next to itself before it gets overwritten. An older backup is replaced.
///
/// # Errors
/// Errors when the copy fails
#[instrument]
pub async fn backup(path: &Path) -> Result<PathBuf> {
    let target = backup_path(path);
    tokio::fs::copy(path, &target)
        .await
        .with_context(|| format!("Backing up {} to {}", path.display(), target.display()))?;

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_keeps_unknown_fields_and_omits_missing_license() {
        let raw = r#"{
            "id": "rai1",
            "name": "Rai 1",
            "logo": null,
            "streamUrl": "zappr://rai1",
            "lcn": 1
        }"#;
        let channel: Channel = serde_json::from_str(raw).unwrap();
        assert_eq!(channel.stream_url, "zappr://rai1");
        assert_eq!(channel.extra["lcn"], 1);

        let out = serde_json::to_value(&channel).unwrap();
        assert_eq!(out["lcn"], 1);
        assert!(out["logo"].is_null());
        assert!(out.get("license").is_none());
    }

    #[test]
    fn unknown_fields_keep_their_order() {
        let raw = r#"{"lcn": 1, "zeta": true, "id": "rai1", "name": "Rai 1", "streamUrl": "zappr://rai1", "alpha": 2}"#;
        let channel: Channel = serde_json::from_str(raw).unwrap();
        assert_eq!(
            channel.extra.keys().collect::<Vec<_>>(),
            ["lcn", "zeta", "alpha"]
        );

        let out = serde_json::to_string(&channel).unwrap();
        let at = |key: &str| out.find(&format!("\"{key}\"")).unwrap();
        assert!(at("streamUrl") < at("lcn"));
        assert!(at("lcn") < at("zeta"));
        assert!(at("zeta") < at("alpha"));
    }

    #[test]
    fn sparse_records_still_load() {
        let channels: Vec<Channel> = serde_json::from_str(r#"[{"name": "Nameless"}]"#).unwrap();
        assert_eq!(channels[0].id, "");
        assert_eq!(channels[0].stream_url, "");
    }

    #[test]
    fn selection_matches_ids_case_insensitively() {
        let selection = Selection::from_ids(["Rai1", " la7 ", ""]);
        let rai1 = Channel {
            id: "RAI1".into(),
            ..Channel::default()
        };
        let other = Channel {
            id: "bbc-one".into(),
            ..Channel::default()
        };

        assert!(selection.contains(&rai1));
        assert!(!selection.contains(&other));
        assert!(Selection::All.contains(&other));
        assert!(Selection::italian().contains(&Channel {
            id: "mediaset_extra".into(),
            ..Channel::default()
        }));
    }

    #[test]
    fn backup_lives_next_to_the_catalog() {
        assert_eq!(
            backup_path(Path::new("/data/channels.json")),
            PathBuf::from("/data/channels.json.backup")
        );
    }

    #[tokio::test]
    async fn missing_catalog_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(err.to_string().contains("Reading catalog"));
    }

    #[tokio::test]
    async fn save_then_backup_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let channels = vec![Channel {
            id: "la7".into(),
            name: "La7".into(),
            stream_url: "zappr://la7/live".into(),
            license: Some("clearkey".into()),
            ..Channel::default()
        }];

        save(&path, &channels).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.ends_with('\n'));
        assert!(written.contains("  \"streamUrl\": \"zappr://la7/live\""));

        let copy = backup(&path).await.unwrap();
        assert_eq!(load(&copy).await.unwrap(), channels);
    }
}

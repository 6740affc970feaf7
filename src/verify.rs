use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    catalog::{self, Channel, Selection},
    classifier::{Classifier, Verdict},
    util::truncate_string,
};

const INTERRUPTED: &str = "Verification interrupted, catalog left untouched";

/// Replacement URLs to try, per lower-cased channel id, when the current one is dead
pub type Alternatives = HashMap<String, Vec<String>>;

/// Known replacement sources for the main Italian channels, tried in order
const ITALIAN_ALTERNATIVES: &[(&str, &[&str])] = &[
    (
        "rai1",
        &[
            "https://mediapolis.rai.it/relinker/relinkerServlet.htm?cont=2606803",
            "https://viamotionhsi.netplus.ch/live/eds/rai1/browser-HLS8/rai1.m3u8",
        ],
    ),
    (
        "rai2",
        &[
            "https://mediapolis.rai.it/relinker/relinkerServlet.htm?cont=308718",
            "https://viamotionhsi.netplus.ch/live/eds/rai2/browser-HLS8/rai2.m3u8",
        ],
    ),
    (
        "rai3",
        &[
            "https://mediapolis.rai.it/relinker/relinkerServlet.htm?cont=308719",
            "https://viamotionhsi.netplus.ch/live/eds/rai3/browser-HLS8/rai3.m3u8",
        ],
    ),
    (
        "la7",
        &[
            "https://d15umi5iaezxgx.cloudfront.net/LA7/DRM/DASH/Live.mpd",
            "zappr://la7/live",
        ],
    ),
];

/// Built-in alternatives used with the Italian preset
#[must_use]
pub fn italian_alternatives() -> Alternatives {
    ITALIAN_ALTERNATIVES
        .iter()
        .map(|(id, urls)| {
            let urls = urls.iter().map(ToString::to_string).collect();
            ((*id).to_string(), urls)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub catalog: PathBuf,
    pub selection: Selection,
    /// Pause after every probe, keeps the relays happy
    pub delay: Duration,
    pub alternatives: Alternatives,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedChannel {
    pub id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacedUrl {
    pub id: String,
    pub previous: String,
    pub current: String,
    pub reason: String,
}

/// Outcome of one verification run, also written out by `--report`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub checked_at: DateTime<Utc>,
    pub catalog: PathBuf,
    pub total: usize,
    pub checked: usize,
    pub kept: usize,
    pub removed: Vec<RemovedChannel>,
    pub replaced: Vec<ReplacedUrl>,
    pub written: bool,
}

impl RunReport {
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = indoc::formatdoc!(
            "
            Checked {checked} of {total} channels
              kept:     {kept}
              removed:  {removed}
              replaced: {replaced}
            ",
            checked = self.checked,
            total = self.total,
            kept = self.kept,
            removed = self.removed.len(),
            replaced = self.replaced.len(),
        );

        for r in &self.removed {
            out.push_str(&format!("  - {} ({}): {}\n", r.name, r.id, r.reason));
        }
        for r in &self.replaced {
            out.push_str(&format!("  ~ {}: {} -> {}\n", r.id, r.previous, r.current));
        }

        if self.written {
            out.push_str(&format!("Catalog updated: {}\n", self.catalog.display()));
        } else {
            out.push_str("Catalog not modified\n");
        }
        out
    }
}

/// Reads an alternatives file: `{ "rai1": ["https://...", ...], ... }`
///
/// # Errors
/// Errors when the file is unreadable or not such a JSON object
#[instrument]
pub async fn load_alternatives(path: &Path) -> Result<Alternatives> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Reading alternatives {}", path.display()))?;

    let parsed = serde_json::from_slice::<Alternatives>(&raw)
        .with_context(|| format!("Parsing alternatives {}", path.display()))?;

    Ok(parsed
        .into_iter()
        .map(|(id, urls)| (id.to_lowercase(), urls))
        .collect())
}

async fn pause(delay: Duration, ct: &CancellationToken) -> Result<()> {
    select! {
        biased;
        () = ct.cancelled() => bail!(INTERRUPTED),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

async fn classify(
    classifier: &Classifier,
    stream_url: &str,
    license: Option<&str>,
    ct: &CancellationToken,
) -> Result<Verdict> {
    select! {
        biased;
        () = ct.cancelled() => bail!(INTERRUPTED),
        verdict = classifier.classify(stream_url, license) => Ok(verdict),
    }
}

/// Tries each candidate other than the current URL, returning the first live one
async fn find_alternative(
    classifier: &Classifier,
    channel: &Channel,
    candidates: &[String],
    delay: Duration,
    ct: &CancellationToken,
) -> Result<Option<(String, Verdict)>> {
    for candidate in candidates.iter().filter(|c| **c != channel.stream_url) {
        pause(delay, ct).await?;

        let verdict = classify(classifier, candidate, channel.license.as_deref(), ct).await?;
        if verdict.is_valid() {
            return Ok(Some((candidate.clone(), verdict)));
        }
        debug!("Alternative {candidate} for {} is {verdict}", channel.id);
    }

    Ok(None)
}

/// Probes the selected channels one at a time, drops dead ones and rewrites the catalog.
///
/// The catalog is only touched after every probe finished: backup first, then overwrite.
/// Unselected channels are kept as-is and the catalog order is preserved.
///
/// # Errors
/// Errors when the catalog cannot be read or written, or when `ct` is cancelled
#[instrument(skip_all, fields(catalog = %options.catalog.display()))]
pub async fn run(
    classifier: &Classifier,
    options: &VerifyOptions,
    ct: &CancellationToken,
) -> Result<RunReport> {
    let mut channels = catalog::load(&options.catalog).await?;
    let total = channels.len();
    let checked = channels
        .iter()
        .filter(|c| options.selection.contains(c))
        .count();
    info!("{checked} of {total} channels selected for verification");

    let pb = indicatif::ProgressBar::new(checked as u64);
    pb.set_style(
        indicatif::ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
        )
        .context("Building progress bar style")?,
    );

    let mut keep = Vec::with_capacity(total);
    let mut removed = Vec::new();
    let mut replaced = Vec::new();

    for channel in &mut channels {
        if !options.selection.contains(channel) {
            keep.push(true);
            continue;
        }

        pb.set_message(channel.name.clone());
        let verdict = classify(
            classifier,
            &channel.stream_url,
            channel.license.as_deref(),
            ct,
        )
        .await?;

        pb.suspend(|| {
            let url = truncate_string(&channel.stream_url, 75);
            if verdict.is_valid() {
                info!("{} ({}) {url}: {verdict}", channel.name, channel.id);
            } else {
                warn!("{} ({}) {url}: {verdict}", channel.name, channel.id);
            }
        });

        let mut alive = verdict.is_valid();
        if !alive {
            let candidates = options
                .alternatives
                .get(&channel.id.to_lowercase())
                .map_or(&[][..], Vec::as_slice);

            if let Some((url, found)) =
                find_alternative(classifier, channel, candidates, options.delay, ct).await?
            {
                pb.suspend(|| info!("{} ({}) replaced by {url}", channel.name, channel.id));
                replaced.push(ReplacedUrl {
                    id: channel.id.clone(),
                    previous: std::mem::replace(&mut channel.stream_url, url.clone()),
                    current: url,
                    reason: found.reason(),
                });
                alive = true;
            } else {
                removed.push(RemovedChannel {
                    id: channel.id.clone(),
                    name: channel.name.clone(),
                    reason: verdict.reason(),
                });
            }
        }

        keep.push(alive);
        pb.inc(1);
        pause(options.delay, ct).await?;
    }
    pb.finish_and_clear();

    let retained = channels
        .into_iter()
        .zip(keep)
        .filter_map(|(channel, keep)| keep.then_some(channel))
        .collect::<Vec<_>>();

    let changed = !removed.is_empty() || !replaced.is_empty();
    let written = changed && !options.dry_run;
    if written {
        let backup = catalog::backup(&options.catalog).await?;
        info!("Backed up original catalog to {}", backup.display());
        catalog::save(&options.catalog, &retained).await?;
    } else if options.dry_run {
        info!("Dry run, not writing the catalog");
    } else {
        info!("Nothing to remove or replace, catalog left as is");
    }

    let report = RunReport {
        checked_at: Utc::now(),
        catalog: options.catalog.clone(),
        total,
        checked,
        kept: retained.len(),
        removed,
        replaced,
        written,
    };

    if let Some(path) = &options.report {
        catalog::write_json(path, &report).await?;
        info!("Report written to {}", path.display());
    }

    Ok(report)
}

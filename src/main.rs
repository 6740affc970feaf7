#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Result, ensure};
use catalog::Selection;
use clap::{Parser, Subcommand, ValueEnum};
use classifier::{Classifier, ProbeBudget, ProbeMethod, rules::ProbeRules};
use reference::{REFERENCE_TIMEOUT, ZAPPR_CHANNELS_URL};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use util::{default_user_agent, init_http_client, spawn_ct_watcher, truncate_string};
use verify::{Alternatives, VerifyOptions};

pub mod catalog;
pub mod classifier;
pub mod m3u;
pub mod reference;
pub mod util;
pub mod verify;

/// Maintains an IPTV channel catalog: converts playlists, compares against a reference list and
/// prunes channels whose streams are dead
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    probe: ProbeArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ProbeArgs {
    /// Per-request timeout in seconds, body included
    #[arg(long, global = true, env = "SWEEPER_TIMEOUT_SECS", default_value_t = 12)]
    timeout_secs: u64,

    /// Body bytes inspected on relay responses
    #[arg(long, global = true, env = "SWEEPER_INSPECT_BYTES", default_value_t = 4096)]
    inspect_bytes: usize,

    /// Body bytes inspected on direct manifest responses
    #[arg(
        long,
        global = true,
        env = "SWEEPER_MANIFEST_INSPECT_BYTES",
        default_value_t = 2048
    )]
    manifest_inspect_bytes: usize,

    /// Probe with HEAD requests, skipping body inspection
    #[arg(long, global = true, env = "SWEEPER_FAST")]
    fast: bool,

    /// User-Agent sent with every request [default: channel-sweeper/<version>]
    #[arg(long, global = true, env = "SWEEPER_USER_AGENT")]
    user_agent: Option<String>,

    /// JSON file overriding the built-in probe rules (relays, schemes, extensions, sentinel)
    #[arg(long, global = true, env = "SWEEPER_RULES")]
    rules: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct SelectionArgs {
    /// Only look at these channel ids, comma separated
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Only look at a built-in set of channel ids
    #[arg(long, value_enum, conflicts_with = "only")]
    preset: Option<Preset>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    Italian,
}

impl SelectionArgs {
    fn selection(&self) -> Selection {
        self.selection_or(Selection::All)
    }

    /// `fallback` applies when neither `--only` nor `--preset` was given
    fn selection_or(&self, fallback: Selection) -> Selection {
        match self.preset {
            Some(Preset::Italian) => Selection::italian(),
            None if self.only.is_empty() => fallback,
            None => Selection::from_ids(&self.only),
        }
    }

    /// Built-in alternatives of the preset, overridden per channel by `file`
    async fn alternatives(&self, file: Option<&Path>) -> Result<Alternatives> {
        let mut alternatives = match self.preset {
            Some(Preset::Italian) => verify::italian_alternatives(),
            None => Alternatives::new(),
        };

        if let Some(path) = file {
            alternatives.extend(verify::load_alternatives(path).await?);
        }
        Ok(alternatives)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Converts an M3U playlist into a channel catalog
    Convert {
        playlist: PathBuf,

        #[arg(short, long, default_value = "channels.json")]
        output: PathBuf,
    },

    /// Downloads the reference channel list and compares it with the local catalog
    Reference {
        #[arg(long, default_value = ZAPPR_CHANNELS_URL)]
        url: String,

        /// Where to keep a copy of the downloaded list
        #[arg(long, default_value = "zappr_channels.json")]
        save: PathBuf,

        /// Don't keep a copy of the downloaded list
        #[arg(long)]
        no_save: bool,

        /// Local catalog to compare against
        #[arg(long)]
        compare: Option<PathBuf>,

        /// Report every downloaded channel. Without this, `--only` or `--preset`, only the
        /// Italian preset is reported
        #[arg(long, conflicts_with_all = ["only", "preset"])]
        all: bool,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Probes every selected channel, removes dead ones and rewrites the catalog
    Verify {
        #[arg(default_value = "channels.json")]
        catalog: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Pause between probes in milliseconds
        #[arg(long, env = "SWEEPER_DELAY_MS", default_value_t = 400)]
        delay_ms: u64,

        /// JSON map of channel id to replacement URLs tried when the current one is dead.
        /// Entries override the built-in ones of `--preset`
        #[arg(long)]
        alternatives: Option<PathBuf>,

        /// Write a JSON report of the run here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Probe and report without touching the catalog
        #[arg(long)]
        dry_run: bool,
    },

    /// Classifies a single stream URL
    Check {
        url: String,

        #[arg(long)]
        license: Option<String>,
    },
}

impl ProbeArgs {
    fn budget(&self) -> Result<ProbeBudget> {
        ensure!(self.timeout_secs > 0, "--timeout-secs must be at least 1");

        Ok(ProbeBudget {
            timeout: Duration::from_secs(self.timeout_secs),
            inspect_bytes: self.inspect_bytes,
            manifest_inspect_bytes: self.manifest_inspect_bytes,
            method: if self.fast {
                ProbeMethod::Head
            } else {
                ProbeMethod::Get
            },
        })
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(default_user_agent)
    }

    async fn classifier(&self) -> Result<Classifier> {
        let budget = self.budget()?;
        let rules = match &self.rules {
            Some(path) => ProbeRules::load(path).await?,
            None => ProbeRules::default(),
        };

        let client = init_http_client(&self.user_agent(), budget.timeout)?;
        Ok(Classifier::new(client, rules, budget))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    match args.command {
        Command::Convert { playlist, output } => {
            let channels = m3u::read_playlist(&playlist).await?;
            if channels.is_empty() {
                warn!("No channels found in {}", playlist.display());
            }
            catalog::save(&output, &channels).await?;
            info!(
                "Wrote {} with {} channels",
                output.display(),
                channels.len()
            );
        }

        Command::Reference {
            url,
            save,
            no_save,
            compare,
            all,
            selection,
        } => {
            let client = init_http_client(&args.probe.user_agent(), REFERENCE_TIMEOUT)?;
            let reference = reference::fetch(&client, &url).await?;
            info!("Downloaded {} channels from {url}", reference.len());

            if !no_save {
                catalog::save(&save, &reference).await?;
                info!("Saved reference list to {}", save.display());
            }

            let selection = if all {
                Selection::All
            } else {
                selection.selection_or(Selection::italian())
            };
            let matching = reference
                .iter()
                .filter(|c| selection.contains(c))
                .collect::<Vec<_>>();
            println!("{} matching channels:", matching.len());
            for c in &matching {
                println!("  {} ({})", c.name, c.id);
                println!("    URL: {}", truncate_string(&c.stream_url, 100));
                println!("    License: {}", c.license.as_deref().unwrap_or("N/A"));
            }

            if let Some(local_path) = compare {
                let local = catalog::load(&local_path).await?;
                let diff = reference::compare(&local, &reference, &selection);

                println!("\nMissing from {}:", local_path.display());
                for id in &diff.missing_locally {
                    println!("  + {id}");
                }
                println!("Stream URL differs:");
                for (id, ours, theirs) in &diff.url_changed {
                    println!("  ~ {id}: {ours} -> {theirs}");
                }
            }
        }

        Command::Verify {
            catalog,
            selection,
            delay_ms,
            alternatives,
            report,
            dry_run,
        } => {
            let classifier = args.probe.classifier().await?;
            let alternatives = selection.alternatives(alternatives.as_deref()).await?;

            let ct = CancellationToken::new();
            spawn_ct_watcher(ct.clone());

            let options = VerifyOptions {
                catalog,
                selection: selection.selection(),
                delay: Duration::from_millis(delay_ms),
                alternatives,
                dry_run,
                report,
            };
            let report = verify::run(&classifier, &options, &ct).await?;
            print!("{}", report.summary());
        }

        Command::Check { url, license } => {
            let classifier = args.probe.classifier().await?;
            let verdict = classifier.classify(&url, license.as_deref()).await;
            println!("{verdict}");

            if !verdict.is_valid() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

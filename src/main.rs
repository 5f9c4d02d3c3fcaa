use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, info, warn};

use simwatch::channel::Notice;
use simwatch::config::{HostSettings, Settings};
use simwatch::data::model::{Dataset, DatasetSummary};
use simwatch::params::{self, PatchOptions};
use simwatch::registry::Registry;
use simwatch::remote;

/// Watch simulation outputs on a remote host and report every refresh.
#[derive(Parser, Debug)]
#[command(name = "simwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file, created on first run
    #[arg(short, long, value_name = "FILE", default_value = "simwatch.json")]
    config: PathBuf,

    /// Watch through ssh on this destination instead of the configured host
    #[arg(long, value_name = "USER@HOST")]
    ssh: Option<String>,

    /// Poll interval in milliseconds
    #[arg(short, long, value_name = "MS")]
    interval: Option<u64>,

    /// Exit after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Debug verbosity level (0=warn, 1=info, 2=debug, 3=trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "1")]
    debug: u8,

    /// Parameter card to patch on the host before watching
    #[arg(long, value_name = "REMOTE")]
    card: Option<String>,

    /// Where to upload the patched card; defaults to the card itself
    #[arg(long, value_name = "REMOTE", requires = "card")]
    card_output: Option<String>,

    /// Parameter to change in the card (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment, requires = "card")]
    set: Vec<(String, String)>,

    /// Append parameters the card does not define yet
    #[arg(long, requires = "card")]
    insert_missing: bool,

    /// Shell command to run on the host once the card is uploaded
    #[arg(long, value_name = "COMMAND", requires = "card")]
    then: Option<String>,

    /// Remote files to watch; defaults to the most recently used one
    #[arg(value_name = "PATH")]
    paths: Vec<String>,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.debug {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG still wins
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut settings = Settings::load(&cli.config)?;
    if let Some(destination) = cli.ssh.clone() {
        settings.host = HostSettings::Ssh {
            destination,
            port: None,
            identity: None,
        };
    }
    if let Some(ms) = cli.interval {
        settings.poll_interval_ms = ms;
    }

    if let Some(card) = &cli.card {
        patch_remote_card(&cli, &settings, card)?;
        if cli.paths.is_empty() {
            return Ok(());
        }
    }

    let paths = if cli.paths.is_empty() {
        settings
            .data_path_history
            .most_recent()
            .map(str::to_string)
            .into_iter()
            .collect()
    } else {
        cli.paths
    };
    if paths.is_empty() {
        bail!("nothing to watch; pass a remote path");
    }

    let mut registry = Registry::new(settings);
    let mut plot = registry.add_sink("Plot 1");
    for path in &paths {
        let id = registry.open_channel()?;
        registry.retarget(id, &[plot.id()])?;
        if let Err(e) = registry.set_path(id, path) {
            debug!("{id}: first refresh failed: {e:#}");
        }
    }
    if let Err(e) = registry.settings().save(&cli.config) {
        warn!("Could not save settings: {e:#}");
    }

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while deadline.map_or(true, |d| Instant::now() < d) {
        match registry.notices().recv_timeout(Duration::from_millis(200)) {
            Ok(notice) => report(&notice),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if plot.pump() {
            for (id, dataset) in plot.datasets() {
                debug!("{}: {id} holds {}", plot.name(), describe(dataset));
            }
        }
    }

    registry.shutdown();
    plot.pump();
    info!("Done");
    Ok(())
}

/// Download `card`, apply `--set` values and upload the result, then run
/// the `--then` command.
fn patch_remote_card(cli: &Cli, settings: &Settings, card: &str) -> Result<()> {
    let host = remote::connect(&settings.host);
    let staging = settings.staging_dir.join("params");

    let (template, mut values) = params::fetch_card(host.as_ref(), card, &staging)?;
    for (key, value) in &cli.set {
        match values.get(key) {
            Some(old) => info!("{key}: {old} -> {value}"),
            None if cli.insert_missing => info!("{key}: new, {value}"),
            None => warn!("{key} is not in {card}; pass --insert-missing to add it"),
        }
        values.set(key, value);
    }

    let options = PatchOptions {
        insert_missing: cli.insert_missing,
        ..PatchOptions::default()
    };
    let target = cli.card_output.as_deref().unwrap_or(card);
    params::upload_card(host.as_ref(), &template, &values, &options, target, &staging)?;
    println!("{target}: {} parameters written", values.len());

    if let Some(command) = &cli.then {
        let output = host.execute(command)?;
        print!("{}", output.stdout);
        if output.status != Some(0) {
            bail!("{command:?} failed: {}", output.stderr.trim());
        }
    }
    Ok(())
}

fn report(notice: &Notice) {
    match notice {
        Notice::Updated { channel, path, summary } => {
            println!("{channel}: {path}: {}", summarize(summary));
        }
        Notice::Failed { channel, path, transient, message } => {
            let kind = if *transient { "will retry" } else { "kept previous data" };
            println!("{channel}: {path}: {message} ({kind})");
        }
    }
}

fn summarize(summary: &DatasetSummary) -> String {
    if let Some((w, h)) = summary.image_size {
        return format!("{} image {w}x{h}", summary.kind);
    }
    let range = match summary.value_range {
        Some((lo, hi)) => format!(", y in [{lo:.4e}, {hi:.4e}]"),
        None => String::new(),
    };
    format!(
        "{} table, {} rows, columns {}{range}",
        summary.kind,
        summary.rows,
        summary.columns.join(", ")
    )
}

fn describe(dataset: &Dataset) -> String {
    match dataset {
        Dataset::Series { x, ys, .. } => format!("{} series over {}", ys.len(), x.name),
        Dataset::Image { image, opacity, .. } => {
            format!("{}x{} image at opacity {opacity:.2}", image.width, image.height)
        }
    }
}

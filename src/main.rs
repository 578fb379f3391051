mod catalog;
mod config;
mod db;
mod error;
mod http;
mod models;
mod pipeline;
mod resolver;
mod selection;
mod session;
mod tags;
mod transcode;

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    catalog::ScanOptions,
    config::AppConfig,
    pipeline::Pipeline,
    resolver::{ArchiveLayout, HttpProbe},
    tags::Id3Writer,
    transcode::Ffmpeg,
};

/// Download recent episodes of a Mediathek talk show as tagged MP3 files.
#[derive(Parser)]
#[command(name = "mediathek-grabber", version, long_about = None)]
struct Cli {
    /// Answer the episode prompt up front, e.g. "1, 4, 5"
    #[arg(short, long)]
    select: Option<String>,

    /// Resolve the archive URLs and print them without downloading
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Config ───────────────────────────────────────────────────────────────
    let config = AppConfig::from_env()?;

    // ── Logging ──────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mediathek_grabber=info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    info!("Visiting {}", config.show_url);

    // ── Scan ─────────────────────────────────────────────────────────────────
    let scan = catalog::scan(ScanOptions {
        show_url: &config.show_url,
        max_episodes: config.max_episodes,
        proxy: config.proxy.as_deref(),
        timeout: Duration::from_secs(config.request_timeout_secs),
    })
    .await;
    let store = match scan {
        Ok(store) => store,
        Err(e) if e.is_environment_failure() => {
            error!("{e}");
            anyhow::bail!("The scraper encountered an issue. Please retry.");
        }
        Err(e) => return Err(anyhow::Error::from(e).context("scan show page")),
    };
    if store.is_empty() {
        info!("No episodes listed on {}", config.show_url);
        return Ok(());
    }

    // ── Selection ────────────────────────────────────────────────────────────
    let selected = {
        let mut stdout = std::io::stdout().lock();
        selection::print_listing(&store, &mut stdout)?;
        match cli.select.as_deref() {
            Some(answer) => {
                let indices = selection::parse_selection(answer).ok_or_else(|| {
                    anyhow::anyhow!("--select {answer:?} contains no episode numbers")
                })?;
                selection::select(&store, &indices)
            }
            None => {
                let mut stdin = std::io::stdin().lock();
                selection::prompt_selection(&store, &mut stdin, &mut stdout)?
            }
        }
    };
    info!("{} episode(s) selected", selected.len());

    // ── Resolve ──────────────────────────────────────────────────────────────
    let probe = HttpProbe::new(
        config.proxy.as_deref(),
        Duration::from_secs(config.probe_timeout_secs),
    )?;
    let layout = ArchiveLayout::from_config(&config);
    let resolved =
        session::resolve_all(&selected, &probe, &layout, config.search_window()).await;

    if cli.dry_run {
        for (record, url) in &resolved {
            println!("{}\t{url}", record.broadcast_date);
        }
        return Ok(());
    }
    if resolved.is_empty() {
        info!("Nothing to download");
        return Ok(());
    }

    // ── Acquire ──────────────────────────────────────────────────────────────
    let pipeline = Pipeline {
        client: http::download_client(
            config.proxy.as_deref(),
            Duration::from_secs(config.probe_timeout_secs),
        )?,
        db: db::connect(&config.manifest_path).await?,
        transcoder: Ffmpeg::new(&config.ffmpeg_path, &config.audio_bitrate),
        tag_writer: Id3Writer,
        output_dir: PathBuf::from(&config.output_dir),
        show_prefix: config.show_prefix(),
        show_title: config.show_title(),
    };
    let summary = pipeline.run_batch(&resolved).await;
    info!(
        "Done: {} acquired, {} already present, {} failed",
        summary.acquired, summary.skipped, summary.failed
    );

    Ok(())
}

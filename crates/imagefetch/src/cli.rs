//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use imagefetch_service::caching::{CacheVariant, ResourceKey};
use imagefetch_service::config::Config;
use imagefetch_service::download::DownloadService;
use imagefetch_service::metrics;
use imagefetch_service::{FetchResult, ImageFetcher};

use crate::logging;

/// imagefetch commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch thumbnails of one or more images.
    ///
    /// All images are fetched concurrently. Repeated URLs are only transferred once.
    Fetch {
        /// The URLs of the images, `http`, `https` and `file` URLs are supported.
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Write the thumbnails as PNG files into this directory.
        #[arg(long, short, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Show where an image is cached on disk.
    Locate {
        /// The URL of the image.
        #[arg(value_name = "URL")]
        url: String,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "imagefetch", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded at this point, the runtime is only created below.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        if let Err(err) = metrics::configure_statsd(&config.metrics.prefix, statsd, BTreeMap::new())
        {
            tracing::error!("Failed to configure metrics: {:?}", err);
        }
    }

    match cli.command {
        Command::Fetch { urls, output } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("imagefetch-worker")
                .enable_all()
                .build()
                .context("failed to create the runtime")?;
            runtime.block_on(fetch(&config, &urls, output.as_deref()))
        }
        Command::Locate { url } => locate(&config, &url),
    }
}

async fn fetch(config: &Config, urls: &[String], output: Option<&Path>) -> Result<()> {
    let transport = DownloadService::new(config).context("failed to create the downloader")?;
    let fetcher = ImageFetcher::new(config, transport, tokio::runtime::Handle::current())
        .context("failed to create the fetcher")?;

    let results = fetch_all(&fetcher, urls).await;

    if let Some(dir) = output {
        std::fs::create_dir_all(dir).context("failed to create the output directory")?;
    }

    let mut failures = 0;
    for (idx, (url, result)) in urls.iter().zip(results).enumerate() {
        match result {
            Ok(image) => {
                println!("{url}: {}x{}", image.width(), image.height());
                if let Some(dir) = output {
                    let path = dir.join(format!("thumbnail-{idx}.png"));
                    image
                        .save_with_format(&path, image::ImageFormat::Png)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
            }
            Err(err) => {
                failures += 1;
                println!("{url}: {err}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images failed to fetch", urls.len());
    }
    Ok(())
}

/// Fetches all `urls` concurrently, returning the results in the same order.
async fn fetch_all(fetcher: &ImageFetcher, urls: &[String]) -> Vec<FetchResult> {
    let results = join_all(urls.iter().map(|url| fetcher.fetch_image(url))).await;
    tracing::debug!("Fetched {} images", results.len());
    results
}

fn locate(config: &Config, url: &str) -> Result<()> {
    let key = ResourceKey::parse(url)?;
    let cache_dir = config
        .cache_dir
        .as_deref()
        .context("no cache_dir configured")?;

    for (name, variant) in [
        ("full", CacheVariant::Full),
        ("thumbnail", CacheVariant::Thumbnail),
    ] {
        let path = cache_dir.join(key.cache_name(variant));
        let status = if path.is_file() { "cached" } else { "missing" };
        println!("{name}: {} ({status})", path.display());
    }

    Ok(())
}

//! Stripeio CLI
//!
//! Uploads a local file RAID-style across the configured backends, or
//! downloads a previously stored file by id. Exit code 0 on success,
//! non-zero with a diagnostic otherwise.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stripeio_catalog::MetadataCatalog;
use stripeio_common::{Config, FileId, RaidLevel};
use stripeio_driver::DriverRegistry;
use stripeio_engine::RaidEngine;
use stripeio_scheduler::{spawn_health_probe, HealthProbeConfig, RaidScheduler};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stripeio")]
#[command(about = "RAID over remote storage backends")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "stripeio.toml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a local file across the backends
    Upload {
        /// RAID level (0, 1, 5, or 10)
        #[arg(short, long)]
        level: u8,
        /// File to upload
        input: PathBuf,
    },
    /// Fetch a stored file by id
    Download {
        /// File id printed by a previous upload
        file_id: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// List stored files
    Files,
    /// Show backend health and usage
    Drivers,
}

struct Services {
    registry: Arc<DriverRegistry>,
    scheduler: Arc<RaidScheduler>,
    catalog: Arc<MetadataCatalog>,
    config: Config,
}

async fn bootstrap(config_path: &PathBuf) -> Result<Services> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let registry = Arc::new(
        DriverRegistry::from_config(&config.drivers).context("building driver registry")?,
    );
    registry.connect_all().await;

    let catalog = Arc::new(
        MetadataCatalog::open(&config.engine.metadata_dir)
            .await
            .context("opening metadata catalog")?,
    );
    let scheduler = Arc::new(RaidScheduler::new(Arc::clone(&registry)));
    spawn_health_probe(
        Arc::clone(&scheduler),
        Arc::clone(&catalog),
        HealthProbeConfig::default(),
    );

    Ok(Services {
        registry,
        scheduler,
        catalog,
        config,
    })
}

impl Services {
    fn engine(&self, level: RaidLevel) -> Result<RaidEngine> {
        RaidEngine::new(
            level,
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.catalog),
            &self.config.engine,
        )
        .context("creating engine")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let services = bootstrap(&args.config).await?;

    match args.command {
        Commands::Upload { level, input } => {
            let level = RaidLevel::from_code(level)?;
            let data = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let name = input
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload");

            let engine = services.engine(level)?;
            let started = Instant::now();
            let file_id = engine.write(name, &data).await?;
            let secs = started.elapsed().as_secs_f64();

            info!(%file_id, bytes = data.len(), "upload complete");
            println!("{file_id}");
            eprintln!(
                "uploaded {} bytes as {level} in {secs:.2}s ({:.2} MB/s)",
                data.len(),
                data.len() as f64 / secs.max(f64::EPSILON) / (1024.0 * 1024.0)
            );
        }
        Commands::Download { file_id, out } => {
            let file_id = FileId::new_unchecked(file_id);
            let meta = services.catalog.get(&file_id).await?;

            let engine = services.engine(meta.raid_level)?;
            let started = Instant::now();
            let data = engine.read(&file_id).await?;
            let secs = started.elapsed().as_secs_f64();

            tokio::fs::create_dir_all(&out).await?;
            let target = out.join(&meta.file_name);
            tokio::fs::write(&target, &data)
                .await
                .with_context(|| format!("writing {}", target.display()))?;
            println!("{}", target.display());
            eprintln!(
                "downloaded {} bytes in {secs:.2}s ({:.2} MB/s)",
                data.len(),
                data.len() as f64 / secs.max(f64::EPSILON) / (1024.0 * 1024.0)
            );
        }
        Commands::Files => {
            let mut ids = services.catalog.file_ids().await;
            ids.sort();
            for id in ids {
                let meta = services.catalog.get(&id).await?;
                println!(
                    "{id}\t{}\t{} bytes\t{}",
                    meta.file_name, meta.file_size, meta.raid_level
                );
            }
        }
        Commands::Drivers => {
            for (name, driver) in services.registry.iter() {
                let available = driver.is_available().await;
                let usage = driver.get_usage().await.ok();
                let metrics = services.scheduler.metrics_for(name);
                let (used, total) = usage.unwrap_or((0, 0));
                let success = metrics.as_ref().map_or(1.0, |m| m.success_rate());
                println!(
                    "{name}\tavailable={available}\tused={used}\ttotal={total}\tsuccess={success:.2}"
                );
            }
        }
    }

    Ok(())
}

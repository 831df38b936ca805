//! kindle-accessible: replace glyphs Kindle cannot render (braille, runes,
//! Hangul on older devices) with pre-rendered images that keep the original
//! text as alt text.
//!
//! `kindle-accessible book.epub` writes `book-v-accessible-kindle.epub` next
//! to the input.

mod preview;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use accessible_browser::{ChromeSurface, LaunchOptions};
use accessible_core::config::AccessibilityConfig;
use accessible_core::session::{ConversionSession, TimeoutPolicy, WorkflowDriver};
use accessible_epub::EpubPackage;
use accessible_transforms::ImageReplacement;

const OUTPUT_SUFFIX: &str = "-v-accessible-kindle.epub";

#[derive(Parser)]
#[command(
    name = "kindle-accessible",
    version,
    about = "Make EPUB content Kindle cannot display readable by turning it into images"
)]
struct Cli {
    /// EPUB to convert
    #[arg(required_unless_present = "dump_config")]
    input: Option<PathBuf>,

    /// Output file (default: <input stem>-v-accessible-kindle.epub)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file, JSON or TOML by extension
    #[arg(long)]
    config: Option<PathBuf>,

    /// JPEG quality for generated images (1-100, default 70)
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Seconds to wait for a page to load (0 = no limit)
    #[arg(long)]
    load_timeout: Option<u64>,

    /// Seconds to wait for one element to rasterize (0 = no limit)
    #[arg(long)]
    raster_timeout: Option<u64>,

    /// Skip pages that time out instead of aborting
    #[arg(long)]
    skip_timeouts: bool,

    /// Write every generated image and an index.html gallery here
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Dump effective merged config as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

fn read_config_file(path: &Path) -> Option<AccessibilityConfig> {
    if !path.exists() {
        return None;
    }
    match AccessibilityConfig::from_path(path) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            None
        }
    }
}

/// Defaults, then the global config, then `./.kindle-accessible.toml`, then
/// `--config`. Each file present replaces the previous one entirely.
fn load_config(explicit: Option<&Path>) -> Result<AccessibilityConfig> {
    let mut config = AccessibilityConfig::default();

    // 1. Global config: ~/.config/kindle-accessible/config.toml
    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("kindle-accessible").join("config.toml");
        if let Some(parsed) = read_config_file(&global_path) {
            config = parsed;
        }
    }

    // 2. Project-local config
    if let Some(parsed) = read_config_file(Path::new(".kindle-accessible.toml")) {
        config = parsed;
    }

    // 3. Explicit --config must load
    if let Some(path) = explicit {
        config = AccessibilityConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
    }

    Ok(config)
}

/// Apply CLI flags on top of the loaded config.
fn apply_cli_overrides(config: &mut AccessibilityConfig, cli: &Cli) {
    if let Some(quality) = cli.jpeg_quality {
        config.render.jpeg_quality = quality;
    }
    if let Some(seconds) = cli.load_timeout {
        config.render.page_load_timeout_secs = seconds;
    }
    if let Some(seconds) = cli.raster_timeout {
        config.render.rasterize_timeout_secs = seconds;
    }
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    input.with_file_name(format!("{}{}", stem, OUTPUT_SUFFIX))
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(cli.config.as_deref()).map(|mut config| {
        apply_cli_overrides(&mut config, &cli);
        config
    });

    // Handle --dump-config
    if cli.dump_config {
        let dumped = config.and_then(|c| c.to_toml().map_err(anyhow::Error::from));
        match dumped {
            Ok(s) => {
                println!("{}", s);
                process::exit(0);
            }
            Err(e) => {
                eprintln!("Error serializing config: {:#}", e);
                process::exit(1);
            }
        }
    }

    let result = config.and_then(|config| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start the async runtime")?;
        runtime.block_on(run_conversion(&cli, config))
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run_conversion(cli: &Cli, config: AccessibilityConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let input = cli.input.as_deref().context("No input EPUB given")?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input));

    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let mut package = EpubPackage::open(&bytes)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let pages = package.pages().to_vec();
    let asset_dir = package.choose_asset_dir(&config.render.asset_dir_name);
    info!(
        "Converting {} → {} ({} page(s), assets in {})",
        input.display(),
        output.display(),
        pages.len(),
        asset_dir
    );

    let workdir = tempfile::tempdir().context("Failed to create a working directory")?;
    package
        .extract_to(workdir.path())
        .context("Failed to extract the EPUB")?;

    let options = LaunchOptions {
        viewport_width: config.render.viewport_width,
        viewport_height: config.render.viewport_height,
        ..LaunchOptions::default()
    };
    let surface = ChromeSurface::launch(workdir.path(), &options)
        .await
        .context("Failed to start the browser")?;

    let mut session = ConversionSession::new(
        pages,
        asset_dir,
        config.css.post.clone(),
        config.css.pre.clone(),
    );
    let mut driver = WorkflowDriver::new(surface, ImageReplacement::from_config(&config))
        .with_load_timeout(config.render.page_load_timeout_secs);
    driver.set_progress_reporter(Box::new(|frac, msg| {
        if frac < 1.0 {
            info!("[{:3.0}%] {}", frac * 100.0, msg);
        } else {
            info!("Done!");
        }
    }));

    let policy = if cli.skip_timeouts {
        TimeoutPolicy::Skip
    } else {
        TimeoutPolicy::Abort
    };
    let outcome = driver.run(&mut session, &package, policy).await;

    let mut surface = driver.into_surface();
    if let Err(e) = surface.close().await {
        warn!("{}", e);
    }
    let summary = outcome.context("Conversion failed")?;
    for page in &summary.skipped {
        warn!("Skipped {} after a timeout; it is left unconverted", page);
    }

    if let Some(dir) = &cli.preview_dir {
        if !session.produced_images().is_empty() {
            let index = preview::write_gallery(dir, session.produced_images())?;
            info!("Preview written to {}", index.display());
        }
    }

    let image_count = session.produced_images().len();
    match session.finish(&mut package).context("Failed to repackage the EPUB")? {
        Some(bytes) => {
            std::fs::write(&output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(
                "Wrote {} ({} image(s) from {} page(s))",
                output.display(),
                image_count,
                summary.converted
            );
        }
        None => warn!(
            "No element matched any rule; {} was not written",
            output.display()
        ),
    }

    Ok(())
}

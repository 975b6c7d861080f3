use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use facewatch::enroll::GalleryBuilder;
use facewatch::gallery::{self, Gallery};
use facewatch::recognize::Recognizer;
use facewatch::{config, Annotator, FrameSink, FrameSource};
use facewatch_vision::{Camera, DirectorySink, OnnxProvider, VideoFile};
use log::{error, info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facewatch")]
#[command(version, about = "Enroll faces from a labeled dataset and identify them in video")]
struct Cli {
    /// Config file (defaults to $FACEWATCH_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a gallery from a dataset directory of per-person subdirectories
    Enroll {
        /// Dataset root
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// Gallery file to write
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Identify faces in a webcam or video stream
    Recognize {
        #[arg(short, long, value_enum, default_value_t = Source::Webcam)]
        source: Source,
        /// Video file, required with `--source video`
        #[arg(short, long)]
        video: Option<PathBuf>,
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        /// Maximum match distance; lower is stricter
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Write annotated frames here instead of opening a window
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Summarise the contents of a gallery file
    List {
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also save it to the config path
        #[arg(long)]
        write: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Webcam,
    Video,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg_path = cli.config.as_deref();
    let mut cfg = config::load_config(cfg_path)?;

    match cli.command {
        Commands::Enroll { dataset, output } => {
            if let Some(dataset) = dataset {
                cfg.dataset = dataset;
            }
            let output = output.unwrap_or_else(|| cfg.gallery.clone());
            enroll(&cfg, &output)
        }
        Commands::Recognize {
            source,
            video,
            gallery,
            tolerance,
            output_dir,
        } => {
            if let Some(gallery) = gallery {
                cfg.gallery = gallery;
            }
            if let Some(tolerance) = tolerance {
                cfg.tolerance = tolerance;
            }
            cfg.validate()?;
            recognize(&cfg, source, video.as_deref(), output_dir.as_deref())
        }
        Commands::List { gallery, json } => {
            list(gallery.as_deref().unwrap_or(&cfg.gallery), json)
        }
        Commands::Config { write } => {
            print!("{}", toml::to_string_pretty(&cfg)?);
            if write {
                config::save_config(&cfg, cfg_path)?;
                info!(
                    "Config written to {}",
                    cfg_path.unwrap_or(&config::CONFIG_PATH).display()
                );
            }
            Ok(())
        }
    }
}

fn enroll(cfg: &config::Config, output: &Path) -> Result<()> {
    if !cfg.dataset.is_dir() {
        anyhow::bail!("Dataset directory '{}' not found.", cfg.dataset.display());
    }

    let mut provider = OnnxProvider::new(&cfg.provider_settings())
        .context("Failed to initialize face recognition models")?;
    let enrollment = GalleryBuilder::new(&mut provider).build(&cfg.dataset);

    for (name, count) in &enrollment.report.per_person {
        println!("{:>6}  {}", count, name);
    }
    if !enrollment.report.skipped.is_empty() {
        warn!("Skipped {} file(s)", enrollment.report.skipped.len());
    }
    enrollment.save(output)
}

fn recognize(
    cfg: &config::Config,
    source: Source,
    video: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<()> {
    // Reject a bad source selection before loading anything
    let video = match (source, video) {
        (Source::Video, None) => anyhow::bail!("--video is required with --source video"),
        (Source::Video, Some(path)) if !path.is_file() => {
            anyhow::bail!("Video file not found at {}", path.display())
        }
        (Source::Video, Some(path)) => Some(path),
        (Source::Webcam, _) => None,
    };

    let known = load_gallery(&cfg.gallery)?;
    info!("Loaded {} known faces.", known.len());

    let mut provider = OnnxProvider::new(&cfg.provider_settings())
        .context("Failed to initialize face recognition models")?;
    let annotator = Annotator::load(&cfg.font);
    let mut recognizer = Recognizer::new(&mut provider, &known, cfg.stream_settings(), annotator)?;

    let mut sink: Box<dyn FrameSink> = match output_dir {
        Some(dir) => Box::new(DirectorySink::create(dir)?),
        None => window_sink()?,
    };

    let mut frames: Box<dyn FrameSource> = match video {
        Some(path) => {
            info!("Processing video file: {}...", path.display());
            Box::new(
                VideoFile::open(path)
                    .with_context(|| format!("Could not open video file {}", path.display()))?,
            )
        }
        None => {
            info!("Starting webcam feed from {}...", cfg.camera);
            Box::new(Camera::open(&cfg.camera).context("Could not open webcam")?)
        }
    };

    let summary = recognizer.run(frames.as_mut(), sink.as_mut());
    info!(
        "Stopped after {} frames ({} analysed): {:?}",
        summary.frames, summary.processed, summary.stop
    );
    Ok(())
}

#[cfg(feature = "window")]
fn window_sink() -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(facewatch_vision::WindowSink::new(
        "facewatch - press q to quit",
    )))
}

#[cfg(not(feature = "window"))]
fn window_sink() -> Result<Box<dyn FrameSink>> {
    anyhow::bail!("built without the `window` feature; pass --output-dir")
}

fn load_gallery(path: &Path) -> Result<Gallery> {
    match gallery::load(path) {
        Ok(g) if g.is_empty() => {
            anyhow::bail!("Gallery {} is empty. Run 'enroll' first.", path.display())
        }
        Ok(g) => Ok(g),
        Err(e) => {
            error!("{}", e);
            anyhow::bail!("Cannot proceed without known face encodings. Run 'enroll' first.")
        }
    }
}

#[derive(Serialize)]
struct GallerySummary<'a> {
    path: &'a Path,
    entries: usize,
    dimension: Option<usize>,
    people: std::collections::BTreeMap<&'a str, usize>,
}

fn list(path: &Path, json: bool) -> Result<()> {
    let known = gallery::load(path)?;
    let summary = GallerySummary {
        path,
        entries: known.len(),
        dimension: known.dimension(),
        people: known.counts(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}: {} entries", path.display(), summary.entries);
    if let Some(dim) = summary.dimension {
        println!("embedding length: {}", dim);
    }
    for (name, count) in &summary.people {
        println!("{:>6}  {}", count, name);
    }
    Ok(())
}

//! FADE CLI - fog density metric with reference parity checking

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fade_parity::parity::{load_npy, report, Comparator, ReferenceArchive};
use fade_parity::utils::tensor_utils::random_image;
use fade_parity::{Fade, ParityConfig, VERSION};

/// FADE - fog density metric with reference parity checking
#[derive(Parser, Debug)]
#[command(name = "fade")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the variables of a reference archive
    Inspect {
        /// Reference archive (npy directory, .safetensors or .npy)
        archive: PathBuf,
    },

    /// Run FADE on an image and check its intermediates
    Run {
        /// Image as a (height, width, channels) .npy array
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Reference archive to check against
        #[arg(short, long)]
        archive: Option<PathBuf>,

        /// Absolute comparison tolerance
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// Patch edge length in pixels
        #[arg(long)]
        patch_size: Option<usize>,

        /// Use a random 256x256 image instead of reading one
        #[arg(long)]
        synthetic: bool,

        /// Seed for the synthetic image
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Compare every variable of one archive against another
    Diff {
        /// Archive holding the computed values
        computed: PathBuf,

        /// Reference archive
        reference: PathBuf,

        /// Absolute comparison tolerance
        #[arg(short, long)]
        tolerance: Option<f64>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Tracing subscriber already set");
    }
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb
}

fn load_comparator(path: &Path, config: &ParityConfig) -> Comparator {
    let pb = create_progress_bar("Loading reference archive...");
    let comparator = Comparator::with_config(path, config.comparator_config(true));
    if comparator.is_available() {
        pb.finish_with_message("Reference archive loaded");
    } else {
        pb.finish_with_message("Reference archive unavailable, all comparisons will fail");
    }
    comparator
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("FADE v{}", VERSION);

    let mut config = match &cli.config {
        Some(path) => ParityConfig::load(path).context("Failed to load config")?,
        None => ParityConfig::default(),
    };

    match cli.command {
        Commands::Inspect { archive } => {
            let archive = ReferenceArchive::load(&archive)?;
            println!("\n=== Variables in {:?} ===", archive.source().unwrap_or(Path::new("")));
            for variable in archive.describe()? {
                for line in report::variable_lines(&variable) {
                    println!("{}", line);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            image,
            archive,
            tolerance,
            patch_size,
            synthetic,
            seed,
        } => {
            if let Some(path) = image {
                config.image = path;
            }
            if let Some(path) = archive {
                config.archive = path;
            }
            if let Some(tol) = tolerance {
                config.tolerance = tol;
            }
            if let Some(ps) = patch_size {
                config.patch_size = ps;
            }
            config.validate()?;

            let device = Device::Cpu;
            let image = if synthetic {
                info!("Using synthetic 256x256 image (seed {})", seed);
                random_image(256, 256, seed, &device)?
            } else {
                let npy = load_npy(&config.image)
                    .with_context(|| format!("Failed to load image {:?}", config.image))?;
                npy.to_tensor(&device)?
            };
            info!("Image shape: {:?}", image.dims());

            let comparator = load_comparator(&config.archive, &config);
            let fade = Fade::new(config.patch_size).with_comparator(comparator);

            let output = fade.evaluate(&image)?;
            println!("\nFADE score: {}", output.score);

            if output.parity_passed() {
                Ok(ExitCode::SUCCESS)
            } else {
                warn!("Some intermediates differ from the reference");
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Diff {
            computed,
            reference,
            tolerance,
        } => {
            if let Some(tol) = tolerance {
                config.tolerance = tol;
            }
            config.validate()?;

            let computed = ReferenceArchive::load(&computed)?;
            let comparator = load_comparator(&reference, &config);

            let batch = comparator.compare_all(
                computed.iter().map(|(name, array)| (name, &array.tensor)),
            )?;

            Ok(if batch.all_passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

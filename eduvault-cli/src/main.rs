//! EduVault CLI
//!
//! Certificate trust scoring from collaborator outputs (image, OCR text,
//! parsed PDF, embedding) plus issuer registry maintenance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use eduvault_core::{compute_phash, compute_region_phash, TrustConfig};
use eduvault_registry::{builtin_baselines, IssuerRegistry};
use eduvault_runtime::{VerificationInput, VerificationReport, Verifier};
use eduvault_signals::PdfDocument;

#[derive(Parser)]
#[command(name = "eduvault")]
#[command(author, version, about = "EduVault: multi-signal certificate trust scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// Tuning file (TOML); built-in defaults when omitted
    #[arg(long, global = true, env = "EDUVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Issuer registry database (overrides the configured path)
    #[arg(long, global = true, env = "EDUVAULT_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one certificate
    Verify {
        /// Rasterised certificate image
        #[arg(short, long)]
        image: PathBuf,

        /// OCR text extracted from the certificate
        #[arg(short, long)]
        text: Option<PathBuf>,

        /// Parsed PDF document (JSON)
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// Feature-extractor embedding (JSON array)
        #[arg(long)]
        embedding: Option<PathBuf>,

        /// Anomaly model (overrides the configured path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Maintain the issuer baseline registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Print the perceptual hash of an image
    Hash {
        #[arg(short, long)]
        image: PathBuf,

        /// Hash the logo crop instead of the full image
        #[arg(long)]
        logo: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Create the baseline table
    Init,
    /// Upsert the built-in issuer baselines
    Seed,
    /// List every stored baseline
    List,
    /// Delete one baseline
    Remove { issuer_id: String },
    /// Delete every unknown_<n> placeholder
    PurgeUnknown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.registry.path = db;
    }

    match cli.command {
        Commands::Verify {
            image,
            text,
            pdf,
            embedding,
            model,
            json,
        } => {
            if let Some(model) = model {
                config.anomaly.model_path = model;
            }
            run_verify(&config, &image, text, pdf, embedding, json).await?;
        }
        Commands::Registry { action } => {
            run_registry(&config, action)?;
        }
        Commands::Hash { image, logo } => {
            run_hash(&config, &image, logo)?;
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TrustConfig> {
    match path {
        Some(path) => TrustConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(TrustConfig::default()),
    }
}

fn open_registry(config: &TrustConfig) -> Result<IssuerRegistry> {
    let path = &config.registry.path;
    IssuerRegistry::open(path).with_context(|| format!("opening registry {}", path.display()))
}

async fn run_verify(
    config: &TrustConfig,
    image: &Path,
    text: Option<PathBuf>,
    pdf: Option<PathBuf>,
    embedding: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let bytes = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let mut input = VerificationInput::from_image_bytes(bytes)?;

    if let Some(path) = text {
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        // blank OCR output means no text was found
        if !text.trim().is_empty() {
            input = input.with_text(text);
        }
    }
    if let Some(path) = pdf {
        input = input.with_pdf(PdfDocument::load(&path)?);
    }
    if let Some(path) = embedding {
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let vector: Vec<f32> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing embedding {}", path.display()))?;
        input = input.with_embedding(vector);
    }

    let registry = Arc::new(open_registry(config)?);
    let verifier = Verifier::from_config(config, registry)?;
    let report = verifier.verify(input).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report)?;
    }

    Ok(())
}

fn print_report(report: &VerificationReport) -> Result<()> {
    let aggregate = &report.aggregate;
    println!("🎓 EduVault verification {}\n", report.run_id);

    for (key, value) in report.to_flat_map()? {
        println!("   {:<34} {}", key, value);
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Trust score: {:.1} / 100  →  {}",
        aggregate.trust_score, aggregate.final_verdict
    );
    Ok(())
}

fn run_registry(config: &TrustConfig, action: RegistryAction) -> Result<()> {
    let registry = open_registry(config)?;

    match action {
        RegistryAction::Init => {
            registry.init()?;
            println!("✅ Registry ready at {}", config.registry.path.display());
        }
        RegistryAction::Seed => {
            let count = registry.seed(&builtin_baselines())?;
            println!("✅ Seeded {} baselines", count);
        }
        RegistryAction::List => {
            let records = registry.list()?;
            if records.is_empty() {
                println!("Registry is empty");
            }
            for record in records {
                println!("{:<24} {}  {}", record.issuer_id, record.phash, record.issuer_name);
            }
        }
        RegistryAction::Remove { issuer_id } => {
            if registry.remove(&issuer_id)? {
                println!("🗑️  Removed {}", issuer_id);
            } else {
                println!("⚠️  No baseline named {}", issuer_id);
            }
        }
        RegistryAction::PurgeUnknown => {
            let count = registry.purge_unknown()?;
            println!("🗑️  Removed {} unknown placeholder(s)", count);
        }
    }

    Ok(())
}

fn run_hash(config: &TrustConfig, path: &Path, logo: bool) -> Result<()> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    let hash = if logo {
        compute_region_phash(&image, &config.detector.logo_crop)?
    } else {
        compute_phash(&image)?
    };
    println!("{}", hash);
    Ok(())
}

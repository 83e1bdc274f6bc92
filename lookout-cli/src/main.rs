// Lookout Command Line Interface
// Replay recorded scenes and manage the local face and memory stores

mod replay;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lookout_core::{FileStore, KeyValueStore};
use lookout_eye::faces::Person;
use lookout_eye::{EyeConfig, FaceStore, MemoryLedger};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookout")]
#[command(about = "Lookout perception engine - tracking, fusion and face memory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory for faces, memory and settings
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines detection script through the perception loop
    Replay {
        /// Script file, one frame per line
        #[arg(long, short)]
        script: PathBuf,

        /// Frames per second (overrides configuration)
        #[arg(long)]
        fps: Option<u32>,

        /// Write each synthetic frame as a PNG into this directory
        #[arg(long)]
        frames_out: Option<PathBuf>,
    },

    /// Face identity store
    #[command(subcommand)]
    Faces(FaceCommands),

    /// Memory ledger
    #[command(subcommand)]
    Memory(MemoryCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum FaceCommands {
    /// List known people
    List,

    /// Find the closest known person for an embedding
    Match {
        /// Comma-separated embedding values
        #[arg(long, short)]
        embedding: String,

        /// Maximum distance (defaults to the configured threshold)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Add an embedding to a person
    Enroll {
        #[arg(long, short)]
        name: String,

        /// Comma-separated embedding values
        #[arg(long, short)]
        embedding: String,
    },

    /// Forget one person, or everyone when no name is given
    Forget {
        #[arg(long, short)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Print label counts and novelty history
    Show,
    /// Erase the ledger
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Persist the effective configuration to the data directory
    Save,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&data_dir)
            .with_context(|| format!("Cannot open data directory {}", data_dir.display()))?,
    );
    debug!("Using data directory {}", data_dir.display());

    let config = load_config(cli.config.as_ref(), store.as_ref())?;

    match cli.command {
        Commands::Replay {
            script,
            fps,
            frames_out,
        } => {
            let content = std::fs::read_to_string(&script)
                .with_context(|| format!("Cannot read script {}", script.display()))?;
            let frames = replay::parse_script(&content)?;
            if frames.is_empty() {
                bail!("Script {} has no frames", script.display());
            }

            let mut config = config;
            if let Some(fps) = fps {
                config.fusion.target_fps = fps;
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid --fps: {}", e))?;
            }
            replay::run(frames, config, store, frames_out).await?;
        }
        Commands::Faces(command) => run_faces(command, &config, store)?,
        Commands::Memory(command) => run_memory(command, &config, store)?,
        Commands::Config(command) => match command {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Save => {
                config.save_settings(store.as_ref())?;
                info!("Settings saved");
                println!("Settings saved to {}", data_dir.display());
            }
        },
    }

    Ok(())
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|mut p| {
            p.push(".lookout");
            p
        })
        .unwrap_or_else(|| PathBuf::from("./.lookout"))
}

/// File configuration when given, otherwise saved settings; environment
/// overrides apply on top of either.
fn load_config(path: Option<&PathBuf>, store: &dyn KeyValueStore) -> anyhow::Result<EyeConfig> {
    let config = match path {
        Some(path) => EyeConfig::from_file(path)
            .with_context(|| format!("Cannot load configuration {}", path.display()))?,
        None => EyeConfig::load_settings(store)?,
    };
    let config = config.with_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn parse_embedding(raw: &str) -> anyhow::Result<Vec<f32>> {
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .with_context(|| format!("Invalid embedding value '{}'", s))
        })
        .collect::<anyhow::Result<Vec<f32>>>()?;
    if values.is_empty() {
        bail!("Embedding is empty");
    }
    Ok(values)
}

fn person_summary(person: &Person) -> serde_json::Value {
    json!({
        "name": person.name,
        "seen": person.seen,
        "last_seen": person.last_seen.to_rfc3339(),
        "embeddings": person.embeddings.len(),
    })
}

fn run_faces(
    command: FaceCommands,
    config: &EyeConfig,
    store: Arc<dyn KeyValueStore>,
) -> anyhow::Result<()> {
    let faces = FaceStore::new(store, config.faces.max_embeddings);

    match command {
        FaceCommands::List => {
            let people: Vec<_> = faces.people()?.iter().map(person_summary).collect();
            println!("{}", serde_json::to_string_pretty(&people)?);
        }
        FaceCommands::Match {
            embedding,
            threshold,
        } => {
            let embedding = parse_embedding(&embedding)?;
            let threshold = threshold.unwrap_or(config.faces.match_threshold);
            match faces.match_embedding(&embedding, threshold)? {
                Some(found) => println!("{}", serde_json::to_string(&found)?),
                None => println!("{}", json!({ "name": null })),
            }
        }
        FaceCommands::Enroll { name, embedding } => {
            let embedding = parse_embedding(&embedding)?;
            let person = faces.upsert(&name, &embedding)?;
            println!("{}", person_summary(&person));
        }
        FaceCommands::Forget { name } => match name {
            Some(name) => {
                if !faces.forget(&name)? {
                    bail!("No face named '{}'", name);
                }
                println!("Forgot {}", name);
            }
            None => {
                faces.forget_all()?;
                println!("Forgot all faces");
            }
        },
    }
    Ok(())
}

fn run_memory(
    command: MemoryCommands,
    config: &EyeConfig,
    store: Arc<dyn KeyValueStore>,
) -> anyhow::Result<()> {
    let mut ledger = MemoryLedger::new(store, config.novelty.history_len);
    match command {
        MemoryCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&ledger.snapshot()?)?);
        }
        MemoryCommands::Clear => {
            ledger.clear()?;
            println!("Memory cleared");
        }
    }
    Ok(())
}

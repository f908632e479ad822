// ============================================================================
// VIGIL CLI
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use vigil_engine::{
    init_logging, Engine, EngineConfig, TrackingAllocator, VigilError, VigilResult, ENGINE_NAME,
    ENGINE_VERSION,
};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator;

// ----------------------------------------------------------------------------
// Arguments
// ----------------------------------------------------------------------------

/// In-process performance observability engine
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vigil.toml", env = "VIGIL_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "VIGIL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "VIGIL_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect and store snapshots until interrupted
    Run,

    /// Collect one snapshot and print it as JSON
    Snapshot {
        /// Pretty-print the JSON
        #[arg(short, long)]
        pretty: bool,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

fn handle_validate(config_path: &Path, verbose: bool) -> VigilResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = EngineConfig::load(config_path)?;
    println!("Configuration is valid");

    if verbose {
        println!();
        match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => println!("Failed to serialize: {}", e),
        }
    }

    println!("Summary:");
    println!("  service:        {}", config.service.name);
    println!("  data dir:       {}", config.service.data_dir.display());
    println!("  sync interval:  {}", humantime::format_duration(config.collection.sync_interval));
    println!("  retention:      {}", humantime::format_duration(config.collection.retention));
    println!("  sampling rate:  1/{}", config.effective_sampling_rate());
    println!("  profile dir:    {}", config.profile_dir().display());
    Ok(())
}

fn handle_generate_config(output: Option<&Path>) -> VigilResult<()> {
    let config_str = EngineConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str).map_err(VigilError::Io)?;
            println!("Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }
    Ok(())
}

fn handle_version() {
    println!("{} v{}", ENGINE_NAME, ENGINE_VERSION);
    println!("  target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
}

async fn handle_snapshot(config: EngineConfig, pretty: bool) -> AnyhowResult<()> {
    let engine = Engine::new(config)?;

    // CPU percentages need two refreshes
    engine.collect();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    let snapshot = engine.collect();

    let json = if pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{}", json);
    Ok(())
}

// ----------------------------------------------------------------------------
// Entry Point
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Some(Commands::Validate { verbose }) => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config_found = cli.config.exists();
    let config = if config_found {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EngineConfig::default()
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    if !config_found {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    match cli.command {
        Some(Commands::Snapshot { pretty }) => handle_snapshot(config, pretty).await?,
        Some(Commands::Run) | None => {
            info!("{} v{}", ENGINE_NAME, ENGINE_VERSION);
            let engine = Engine::new(config)?;
            engine.run().await?;
        }
        Some(Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. }) => {}
    }

    Ok(())
}

mod decode;
mod info;

use std::io::stderr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tlm::{MissionConfig, Mode};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::info::Format;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Mission configuration (JSON). The built-in geometry is used if not provided.
    #[arg(short, long, global = true, value_name = "path")]
    mission: Option<PathBuf>,

    /// Operating mode used to select mode-filtered element positions.
    #[arg(long, global = true, value_parser = parse_mode)]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a telemetry recording.
    ///
    /// By default the input is a sequence of minor frames as written by an upstream frame
    /// synchronizer. Use --symbols for a raw stream of tagged bit symbols.
    ///
    /// Once the input is exhausted the last value of every decoded element is written along
    /// with the synchronization status.
    Decode {
        /// Element catalog (JSON).
        #[arg(short, long, value_name = "path")]
        catalog: PathBuf,

        /// Input is a symbol stream rather than minor frames.
        #[arg(long)]
        symbols: bool,

        /// Symbols per buffer read from a symbol stream.
        #[arg(long, default_value = "4096")]
        chunk_size: usize,

        /// Minor frame index of the first frame, for recordings that start mid-cycle on
        /// spacecraft without a usable counter.
        #[arg(long, value_name = "idx")]
        minor_frame_idx: Option<usize>,

        /// Also write every update of these elements as they are decoded.
        #[arg(short, long, value_delimiter = ',', value_name = "csv")]
        watch: Vec<String>,

        #[arg(short, long, default_value = "text")]
        format: Format,

        input: PathBuf,
    },
    /// List the elements in a catalog along with the triggers they fire on.
    Elements {
        /// Element catalog (JSON).
        #[arg(short, long, value_name = "path")]
        catalog: PathBuf,

        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Show where the slots of a sub-commutated group are carried in the minor frames.
    Subcom {
        /// Group key, e.g. DS.
        group: String,

        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Write the mission configuration in effect as JSON.
    Mission,
}

fn parse_mode(s: &str) -> Result<Mode> {
    match s {
        "engineering" => Ok(Mode::Engineering),
        "science" => Ok(Mode::Science),
        _ => bail!("expected engineering or science"),
    }
}

fn load_mission(path: Option<&PathBuf>, mode: Option<Mode>) -> Result<MissionConfig> {
    let mut mission = match path {
        Some(path) => MissionConfig::from_path(path)
            .with_context(|| format!("loading mission config from {path:?}"))?,
        None => MissionConfig::default(),
    };
    if let Some(mode) = mode {
        mission = mission.with_mode(mode);
    }
    mission.validate().context("invalid mission config")?;
    Ok(mission)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TLM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let mission = load_mission(cli.mission.as_ref(), cli.mode)?;

    match &cli.command {
        Commands::Decode {
            catalog,
            symbols,
            chunk_size,
            minor_frame_idx,
            watch,
            format,
            input,
        } => {
            if *symbols && *chunk_size == 0 {
                bail!("--chunk-size must be greater than zero");
            }
            let opts = decode::Opts {
                symbols: *symbols,
                chunk_size: *chunk_size,
                minor_frame_idx: *minor_frame_idx,
                watch: watch.clone(),
            };
            decode::decode(mission, catalog, input, &opts, format)
        }
        Commands::Elements { catalog, format } => info::elements(&mission, catalog, format),
        Commands::Subcom { group, format } => info::subcom(&mission, group, format),
        Commands::Mission => info::mission(&mission),
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use scalar_wave_modeller::config::{Config, Preset};
use scalar_wave_modeller::{CancelToken, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a run stopped by Ctrl-C; its output is complete up to the stop.
const EXIT_CANCELLED: u8 = 130;

/// Simulate a damped 2D wave and write its frames (and probe audio) to disk
#[derive(Parser)]
#[command(name = "scalar-wave-modeller")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in configuration
    #[arg(short, long, value_enum)]
    preset: Option<Preset>,

    /// Mono 16-bit 44100 Hz WAV used as forcing (selects the audio preset by default)
    input: Option<PathBuf>,

    /// Directory for frames and audio
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the number of frames
    #[arg(short, long)]
    frames: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match (&cli.config, cli.preset) {
        (Some(path), _) => {
            let path = path.to_string_lossy();
            Config::from_file(&path)?
        }
        (None, Some(preset)) => Config::preset(preset),
        (None, None) if cli.input.is_some() => Config::preset(Preset::Audio),
        (None, None) => Config::preset(Preset::Realtime),
    };

    if let Some(input) = &cli.input {
        config.set_forcing_input(input.clone());
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(frames) = cli.frames {
        config.schedule.frames = Some(frames);
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<RunOutcome> {
    let config = load_config(cli)?;
    config.log_summary();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let runner = config.build(cancel)?;
    let (report, _frames) = runner.run()?;
    Ok(report.outcome)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::SignalExhausted) => {
            warn!("forcing signal ran out before the last scheduled frame");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Cancelled) => {
            warn!("interrupted, output truncated");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resampler_host::audio::decode_wav;
use resampler_host::config::HostConfig;
use resampler_host::engine::binding::ProcessBinding;
use resampler_host::error::ErrorCode;
use resampler_host::render::{build, RenderItem};
use resampler_host::{Dispatcher, InvokeContext};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "resampler_cli",
    about = "Describe and drive voice resampling engines from the command line"
)]
struct Cli {
    /// Host configuration file (defaults to ./resampler_host.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the engine's metadata as JSON
    Describe {
        #[arg(long)]
        engine: String,
    },
    /// Render one note and write the resulting waveform
    Render {
        #[arg(long)]
        engine: String,
        /// Render item as inline JSON or a path to a JSON file
        #[arg(long)]
        item: String,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the argument vector a process engine would receive
    Args {
        #[arg(long)]
        item: String,
        /// Executable name placed in argv[0]
        #[arg(long, default_value = "resampler")]
        engine: String,
    },
}

#[derive(Serialize)]
struct RenderSummary {
    engine: String,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<f64>,
}

#[derive(Serialize)]
struct FailureReport {
    engine: String,
    code: i32,
    message: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HostConfig::load_from_file(path),
        None => HostConfig::load(),
    };

    match cli.command {
        Commands::Describe { engine } => run_describe(&config, &engine),
        Commands::Render {
            engine,
            item,
            output,
            timeout_ms,
        } => run_render(&config, &engine, &item, output, timeout_ms),
        Commands::Args { item, engine } => run_args(&config, &engine, &item),
    }
}

fn run_describe(config: &HostConfig, engine: &str) -> Result<ExitCode> {
    let dispatcher = Dispatcher::from_config(config)?;
    match dispatcher.describe(engine) {
        Ok(info) => {
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(ExitCode::from(0))
        }
        Err(err) => report_failure(engine, &err),
    }
}

fn run_render(
    config: &HostConfig,
    engine: &str,
    item: &str,
    output: Option<PathBuf>,
    timeout_ms: Option<u64>,
) -> Result<ExitCode> {
    let dispatcher = Dispatcher::from_config(config)?;
    let item = load_item(item)?;
    let ctx = match timeout_ms {
        Some(ms) => InvokeContext::new().with_timeout(Some(Duration::from_millis(ms))),
        None => dispatcher.default_context(),
    };

    let bytes = match dispatcher.render_with(engine, &item, &ctx) {
        Ok(bytes) => bytes,
        Err(err) => return report_failure(engine, &err),
    };

    if let Some(path) = &output {
        fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    }

    let decoded = decode_wav(&bytes).ok();
    let summary = RenderSummary {
        engine: engine.to_string(),
        bytes: bytes.len(),
        output,
        sample_rate: decoded.as_ref().map(|audio| audio.sample_rate),
        channels: decoded.as_ref().map(|audio| audio.channels),
        duration_ms: decoded.as_ref().map(|audio| audio.duration_ms()),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(ExitCode::from(0))
}

fn run_args(config: &HostConfig, engine: &str, item: &str) -> Result<ExitCode> {
    let item = load_item(item)?;
    let input = build(&item)?;
    let binding = ProcessBinding::new(engine, config.process.to_options());
    let mut argv = vec![engine.to_string()];
    argv.extend(binding.arguments(&input));
    println!("{}", serde_json::to_string(&argv)?);
    Ok(ExitCode::from(0))
}

fn load_item(item: &str) -> Result<RenderItem> {
    let path = Path::new(item);
    let json = if path.is_file() {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    } else {
        item.to_string()
    };
    serde_json::from_str(&json).context("parsing render item JSON")
}

fn report_failure(engine: &str, err: &resampler_host::EngineError) -> Result<ExitCode> {
    let report = FailureReport {
        engine: engine.to_string(),
        code: err.code(),
        message: err.message(),
    };
    eprintln!("{}", serde_json::to_string(&report)?);
    Ok(ExitCode::from(1))
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Import from docfiler-core
use docfiler_core::{Dispatcher, DocumentProcessor, FilerConfig};

// Import CLI utilities
use docfiler::ConfigLocator;

#[derive(Parser)]
#[command(name = "docfiler")]
#[command(about = "Watch an intake folder and file scanned documents by order, job and dealer")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (YAML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the input directory from the config
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Override the output root from the config
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Override the number of workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Print the default configuration as YAML and exit
    #[arg(long)]
    show_config: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the input directory and file documents until interrupted (default)
    Watch,
    /// Extract and plan one document, print the result as JSON, move nothing
    Inspect {
        /// Document to inspect
        file: PathBuf,
    },
    /// Validate the effective configuration and print it as YAML
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json);

    if args.show_config {
        print!("{}", FilerConfig::default().to_yaml()?);
        return Ok(());
    }

    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Watch) {
        Command::CheckConfig => {
            config.validate()?;
            print!("{}", config.to_yaml()?);
            Ok(())
        }
        Command::Inspect { file } => inspect(&config, file),
        Command::Watch => {
            config.validate()?;
            watch(config)
        }
    }
}

fn init_logging(json: bool) {
    // Default: warn for dependencies, info for our crates (one line per document)
    // Use RUST_LOG=docfiler_core=debug for settle/dedup/retry detail
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,docfiler=info,docfiler_core=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Locate and parse the config, then apply CLI overrides
fn load_config(args: &Args) -> Result<FilerConfig> {
    let locator = ConfigLocator::from_env(args.config.clone());
    let (source, mut config) = locator.load()?;
    info!(%source, "Configuration loaded");

    if let Some(input) = &args.input {
        config.input_dir = input.clone();
    }
    if let Some(output) = &args.output {
        config.output_root = output.clone();
    }
    if let Some(workers) = args.workers {
        config.workers.count = workers;
    }
    Ok(config)
}

/// Read-only: nothing is moved and no directories are created
fn inspect(config: &FilerConfig, file: PathBuf) -> Result<()> {
    config.validate()?;
    if !file.is_file() {
        anyhow::bail!("{} is not a file", file.display());
    }
    let processor = create_processor(config)?;
    let inspection = processor.inspect(&file)?;
    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(())
}

fn watch(config: FilerConfig) -> Result<()> {
    let processor = Arc::new(create_processor(&config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let summary = runtime.block_on(async move {
        let dispatcher = Dispatcher::new(config, processor);
        dispatcher.run(shutdown_signal()).await
    })?;

    info!(
        relocated = summary.relocated,
        parked = summary.parked,
        "Shut down cleanly"
    );
    Ok(())
}

/// Create DocumentProcessor with the poppler + tesseract backends
fn create_processor(config: &FilerConfig) -> Result<DocumentProcessor> {
    let processor = DocumentProcessor::new_cli(config)?;
    processor.check_backends().with_context(|| {
        format!(
            "install poppler-utils and tesseract, or point backends.rasterizer.program / \
             backends.ocr.program at them (currently {} / {})",
            config.backends.rasterizer.program, config.backends.ocr.program
        )
    })?;
    Ok(processor)
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

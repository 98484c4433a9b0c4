use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use s2s_ingest::app::{App, FetchOptions, ProgressSink};
use s2s_ingest::archive::{ArchiveClient, RetrievalRequest};
use s2s_ingest::cds::{CdsApiClient, CdsCredentials};
use s2s_ingest::config::ConfigLoader;
use s2s_ingest::domain::{Provider, Resolution, TimeWindow};
use s2s_ingest::ecmwf::{EcmwfCredentials, EcmwfWebApiClient};
use s2s_ingest::error::IngestError;
use s2s_ingest::output::{ConsoleProgress, JsonOutput, OutputMode};
use s2s_ingest::source::SourceSpec;

#[cfg(feature = "netcdf")]
type Reader = s2s_ingest::fragment::NetcdfFragmentReader;
#[cfg(not(feature = "netcdf"))]
type Reader = s2s_ingest::fragment::UnsupportedFragmentReader;

#[derive(Parser)]
#[command(name = "s2s-ingest")]
#[command(about = "Ingest ERA5 and S2S forecast archives into daily Zarr partitions")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download, harmonize and partition every pending window")]
    Fetch(FetchArgs),
    #[command(about = "Show the date selector and status of each window")]
    Plan(TargetArgs),
    #[command(about = "Count persisted partitions per window")]
    Status(TargetArgs),
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// `era5` or an S2S center (ecmwf, ncep, ukmo, cma, ...).
    #[arg(long)]
    provider: String,

    /// Grid spacing in degrees, used verbatim in partition names.
    #[arg(long, default_value = "1.5")]
    resolution: String,

    #[arg(long)]
    config: Option<String>,

    /// Restrict to these `YYYY-MM` windows.
    #[arg(long = "window")]
    windows: Vec<String>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::UnknownProvider(_)
        | IngestError::InvalidResolution(_)
        | IngestError::ResolutionTooFine(_)
        | IngestError::InvalidWindow(_)
        | IngestError::MissingConfig
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::Configuration(_)
        | IngestError::MissingCredentials(_) => 2,
        IngestError::ArchiveHttp(_)
        | IngestError::ArchiveStatus { .. }
        | IngestError::ArchiveRequest { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => {
            let (spec, windows, config) = resolve_target(&args.target)?;
            let options = FetchOptions {
                dry_run: args.dry_run,
            };
            if spec.is_reanalysis() && !args.dry_run {
                let archive = CdsApiClient::new(CdsCredentials::discover()?)?;
                run_fetch(App::new(config, archive, Reader::default()), &spec, &windows, options, output_mode)
            } else if !args.dry_run {
                let archive = EcmwfWebApiClient::new(EcmwfCredentials::discover()?)?;
                run_fetch(App::new(config, archive, Reader::default()), &spec, &windows, options, output_mode)
            } else {
                run_fetch(App::new(config, NopArchive, Reader::default()), &spec, &windows, options, output_mode)
            }
        }
        Commands::Plan(args) => {
            let (spec, windows, config) = resolve_target(&args)?;
            let app = App::new(config, NopArchive, Reader::default());
            let windows = app.windows(&spec, &windows)?;
            let result = app.plan(&spec, &windows, sink_for(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_plan(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    for plan in &result.windows {
                        println!(
                            "{} {:?} {}{}",
                            plan.window,
                            plan.status,
                            plan.selector,
                            if plan.is_exception { " (gap-filled)" } else { "" }
                        );
                    }
                    Ok(())
                }
            }
        }
        Commands::Status(args) => {
            let (spec, windows, config) = resolve_target(&args)?;
            let app = App::new(config, NopArchive, Reader::default());
            let windows = app.windows(&spec, &windows)?;
            let result = app.status(&spec, &windows, sink_for(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    for entry in &result.windows {
                        let mark = if entry.complete { "complete" } else { "incomplete" };
                        println!(
                            "{} {}/{} partitions {mark}",
                            entry.window, entry.partitions, entry.expected_days
                        );
                    }
                    Ok(())
                }
            }
        }
    }
}

fn resolve_target(
    args: &TargetArgs,
) -> miette::Result<(SourceSpec, Vec<TimeWindow>, s2s_ingest::config::ResolvedConfig)> {
    let provider: Provider = args.provider.parse()?;
    let resolution: Resolution = args.resolution.parse()?;
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let spec = SourceSpec::from_config(provider, resolution, &config)?;
    let windows = args
        .windows
        .iter()
        .map(|window| window.parse::<TimeWindow>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((spec, windows, config))
}

fn run_fetch<A: ArchiveClient>(
    app: App<A, Reader>,
    spec: &SourceSpec,
    windows: &[TimeWindow],
    options: FetchOptions,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let windows = app.windows(spec, windows)?;
    let result = app.fetch(spec, &windows, options, sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_fetch(&result).into_diagnostic(),
        OutputMode::Interactive => {
            for window in &result.windows {
                println!(
                    "{} {} ({} partitions)",
                    window.window,
                    window.action,
                    window.partitions.len()
                );
            }
            println!(
                "{} {}deg: {} of {} windows fetched",
                result.provider,
                result.resolution,
                result.fetched(),
                result.windows.len()
            );
            Ok(())
        }
    }
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &ConsoleProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

/// Stands in for the archive where nothing is downloaded.
struct NopArchive;

impl ArchiveClient for NopArchive {
    fn retrieve(&self, request: &RetrievalRequest, _destination: &Path) -> Result<(), IngestError> {
        Err(IngestError::ArchiveHttp(format!(
            "archive client not configured for {}",
            request.dataset
        )))
    }
}

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mdbench::config::{ConfigLoader, ResolvedConfig};
use mdbench::dataset::{Md17, pipeline};
use mdbench::domain::Dataset;
use mdbench::error::MdError;
use mdbench::fetch::HttpArchiveFetcher;
use mdbench::output::{
    InfoResult, JsonOutput, ListResult, OutputMode, SubsetResult, TextOutput,
};
use mdbench::pipeline::{OutcomeStatus, ProgressSink, RunReport};
use mdbench::registry::Registry;
use mdbench::subset::CreateSubset;

#[derive(Parser)]
#[command(name = "mdbench")]
#[command(about = "Download MD17 molecular dynamics datasets into local atomistic stores")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// Directory holding the `<dataset>.db` stores.
    #[arg(long, global = true)]
    dbdir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download and convert a dataset")]
    Fetch(FetchArgs),
    #[command(about = "List registry datasets")]
    List,
    #[command(about = "Show a converted store")]
    Info(InfoArgs),
    #[command(about = "Print selected records of a converted store")]
    Subset(SubsetArgs),
}

#[derive(Args)]
struct FetchArgs {
    dataset: String,

    /// Convert every registry dataset into this dataset's store.
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct InfoArgs {
    dataset: String,
}

#[derive(Args)]
struct SubsetArgs {
    dataset: String,

    #[arg(required = true)]
    indices: Vec<usize>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<MdError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &MdError) -> u8 {
    match error {
        MdError::UnknownDataset(_) | MdError::DatasetNotFound(_) => 2,
        MdError::Fetch { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dbdir) = cli.dbdir {
        config = config.with_dbdir(dbdir);
    }

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, &config, output_mode),
        Commands::List => run_list(&config, output_mode).map(|()| ExitCode::SUCCESS),
        Commands::Info(args) => run_info(args, &config, output_mode).map(|()| ExitCode::SUCCESS),
        Commands::Subset(args) => {
            run_subset(args, &config, output_mode).map(|()| ExitCode::SUCCESS)
        }
    }
}

fn run_fetch(
    args: FetchArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let dataset = args.dataset.parse::<Dataset>()?;
    let fetcher = HttpArchiveFetcher::with_timeout(config.timeout)?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let report = pipeline(config, fetcher).run(dataset, args.all, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_fetch(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_fetch(&report),
    }
    Ok(ExitCode::from(fetch_exit_code(&report)))
}

fn fetch_exit_code(report: &RunReport) -> u8 {
    if report.success() {
        return 0;
    }
    let fetch_failed = report
        .outcomes
        .iter()
        .any(|outcome| matches!(outcome.status, OutcomeStatus::FetchFailed { .. }));
    if fetch_failed { 3 } else { 1 }
}

fn run_list(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let registry = Registry::new(config.base_url.clone());
    let result = ListResult::new(&registry, &config.dbdir);
    match output_mode {
        OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_list(&result),
    }
    Ok(())
}

fn run_info(
    args: InfoArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let dataset = args.dataset.parse::<Dataset>()?;
    let handle = Md17::open(config, dataset)?;
    let result = InfoResult::new(&handle);
    match output_mode {
        OutputMode::Json => JsonOutput::print_info(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_info(&result),
    }
    Ok(())
}

fn run_subset(
    args: SubsetArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let dataset = args.dataset.parse::<Dataset>()?;
    let handle = Md17::open(config, dataset)?;
    let view = handle.create_subset(&args.indices)?;
    let result = SubsetResult::collect(dataset.name(), &args.indices, &view)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_subset(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_subset(&result),
    }
    Ok(())
}

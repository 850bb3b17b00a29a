mod cli;

use clap::Parser;
use cli::{AuditArgs, Cli, Command, RunArgs};
use curator_core::classifier::{ClassificationGate, ClassifierConfig, ClassifierError};
use curator_core::{
    audit, move_redundant, print_audit, print_run_summary, progress, write_report, AuditReport,
    BatchOrchestrator, CatApiClient, CuratorConfig, HttpDownloader, LocalStorage, RunReport,
};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type CliResult = Result<(), Box<dyn Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = load_config(cli.config.as_deref()).and_then(|config| match &cli.command {
        Command::Run(args) => run(config, args),
        Command::Audit(args) => run_audit(config, args),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "curator failed");
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CuratorConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => CuratorConfig::load(path)?,
        None => CuratorConfig::load_or_default()?,
    };
    Ok(config)
}

fn storage_for(config: &CuratorConfig) -> LocalStorage {
    LocalStorage::new(
        config.dataset_root.clone(),
        config.pending_dir.clone(),
        config.confirmed_dir.clone(),
        config.normalized_extensions(),
    )
}

fn run(mut config: CuratorConfig, args: &RunArgs) -> CliResult {
    args.apply(&mut config);
    config.validate()?;

    let extensions = config.normalized_extensions();
    let storage = storage_for(&config);
    let source = CatApiClient::new(&config.source, extensions)?;
    let downloader = HttpDownloader::new(&config.source)?;
    let gate = load_gate(&config.classifier)?;
    info!(
        members = gate.member_count(),
        tie_breakers = gate.tie_breaker_count(),
        "classification gate ready"
    );

    let dataset_root = config.dataset_root.clone();
    let report_path = config.report_path.clone();
    info!(dataset = %dataset_root.display(), "starting curation run");

    let mut orchestrator = BatchOrchestrator::new(config, &source, &downloader, &gate, &storage)
        .with_progress(progress::styled_bar());
    let stats = orchestrator.run()?;

    print_run_summary(&stats);
    if let Some(path) = report_path {
        write_report(&RunReport::new(dataset_root, stats), &path)?;
        println!("Run report written to {}", path.display());
    }
    Ok(())
}

fn run_audit(mut config: CuratorConfig, args: &AuditArgs) -> CliResult {
    args.apply(&mut config);
    let storage = storage_for(&config);

    let progress_bar = progress::styled_bar();
    let summary = audit(&storage, args.threading(), &progress_bar)?;
    progress_bar.finish_with_message("Audit complete");

    print_audit(&summary);

    if let Some(target) = &args.target {
        let stats = move_redundant(&summary, target, &progress::styled_bar())?;
        println!(
            "Duplicate files moved to {} ({})",
            target.display(),
            stats.moved
        );
    }

    if let Some(path) = &args.report {
        write_report(&AuditReport::new(config.dataset_root.clone(), summary), path)?;
        println!("Audit report written to {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "classification")]
fn load_gate(config: &ClassifierConfig) -> Result<ClassificationGate, ClassifierError> {
    curator_core::load_gate(config)
}

#[cfg(not(feature = "classification"))]
fn load_gate(config: &ClassifierConfig) -> Result<ClassificationGate, ClassifierError> {
    error!("built without the `classification` feature; no inference backend available");
    Err(ClassifierError::ModelNotFound(config.models_dir.clone()))
}

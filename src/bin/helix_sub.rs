use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use helix_submitter::config::{ConfigLoader, ResolvedConfig};
use helix_submitter::domain::{Alias, BoxId, ObjectType};
use helix_submitter::enums::EnumHttpClient;
use helix_submitter::error::HelixError;
use helix_submitter::footprint::SystemDiskMonitor;
use helix_submitter::orchestrator::{Orchestrator, RunOptions};
use helix_submitter::output::{CheckResult, JsonOutput};
use helix_submitter::registry::HttpRegistryApi;
use helix_submitter::scheduler::SystemScheduler;
use helix_submitter::store::FileStore;
use helix_submitter::transfer::{SystemTransferClient, TransferClient};

#[derive(Parser)]
#[command(name = "helix-sub")]
#[command(about = "Re-entrant submission pipeline for archiving data objects to a remote registry")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "One full pipeline pass for an object type and box")]
    Run(RunArgs),
    #[command(about = "Verify one alias's encryption chain and advance or roll back")]
    CheckEncryption(AliasArgs),
    #[command(about = "Verify one alias's uploads and advance or roll back")]
    CheckUpload(AliasArgs),
    #[command(about = "Register assembled objects with the remote registry")]
    Register(TypeBoxArgs),
    #[command(about = "Send a submitted object's files through the pipeline again")]
    Reopen(AliasArgs),
    #[command(about = "Transfer artifact files to a box's staging area (used by upload jobs)")]
    PutArtifacts(PutArtifactsArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    object_type: ObjectType,

    #[arg(long = "box")]
    box_id: BoxId,

    #[arg(long)]
    cleanup: bool,
}

#[derive(Args)]
struct TypeBoxArgs {
    #[arg(long)]
    object_type: ObjectType,

    #[arg(long = "box")]
    box_id: BoxId,
}

#[derive(Args)]
struct AliasArgs {
    #[arg(long)]
    object_type: ObjectType,

    #[arg(long = "box")]
    box_id: BoxId,

    #[arg(long)]
    alias: Alias,
}

#[derive(Args)]
struct PutArtifactsArgs {
    #[arg(long = "box")]
    box_id: BoxId,

    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(helix) = report.downcast_ref::<HelixError>() {
            return ExitCode::from(map_exit_code(helix));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HelixError) -> u8 {
    match error {
        HelixError::MissingConfig
        | HelixError::UnknownBox(_)
        | HelixError::RecordNotFound(_) => 2,
        HelixError::RegistryHttp(_)
        | HelixError::RegistryStatus { .. }
        | HelixError::RegistryAuth { .. }
        | HelixError::EnumHttp(_)
        | HelixError::EnumStatus { .. }
        | HelixError::Transfer(_)
        | HelixError::Scheduler(_)
        | HelixError::JobLaunch { .. } => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Run(args) => {
            let orchestrator = build_orchestrator(&config, &args.box_id)?;
            let options = RunOptions {
                cleanup: args.cleanup,
            };
            let report = orchestrator
                .run_pipeline(args.object_type, &args.box_id, &options)
                .into_diagnostic()?;
            JsonOutput::print_run(&report).into_diagnostic()?;
            Ok(())
        }
        Commands::CheckEncryption(args) => {
            let orchestrator = build_orchestrator(&config, &args.box_id)?;
            let status = orchestrator
                .check_encryption(args.object_type, &args.box_id, &args.alias)
                .into_diagnostic()?;
            JsonOutput::print_check(&CheckResult {
                alias: args.alias.to_string(),
                status: status.to_string(),
            })
            .into_diagnostic()?;
            Ok(())
        }
        Commands::CheckUpload(args) => {
            let orchestrator = build_orchestrator(&config, &args.box_id)?;
            let status = orchestrator
                .check_upload(args.object_type, &args.box_id, &args.alias)
                .into_diagnostic()?;
            JsonOutput::print_check(&CheckResult {
                alias: args.alias.to_string(),
                status: status.to_string(),
            })
            .into_diagnostic()?;
            Ok(())
        }
        Commands::Register(args) => {
            let orchestrator = build_orchestrator(&config, &args.box_id)?;
            let stage = orchestrator.register(args.object_type, &args.box_id, &RunOptions::default());
            JsonOutput::print_stage(&stage).into_diagnostic()?;
            Ok(())
        }
        Commands::Reopen(args) => {
            let orchestrator = build_orchestrator(&config, &args.box_id)?;
            orchestrator
                .reopen(args.object_type, &args.box_id, &args.alias)
                .into_diagnostic()?;
            JsonOutput::print_check(&CheckResult {
                alias: args.alias.to_string(),
                status: "ENCRYPT".to_string(),
            })
            .into_diagnostic()?;
            Ok(())
        }
        Commands::PutArtifacts(args) => {
            let box_config = config.box_config(&args.box_id).into_diagnostic()?;
            let client = SystemTransferClient::new(
                &config.transfer_binary,
                config.transfer_remote_host.clone(),
            );
            client
                .put(&args.files, &box_config.staging_path)
                .into_diagnostic()?;
            Ok(())
        }
    }
}

fn build_orchestrator(
    config: &ResolvedConfig,
    box_id: &BoxId,
) -> miette::Result<Orchestrator> {
    let box_config = config.box_config(box_id).into_diagnostic()?;

    let store = FileStore::new(config.store_root.clone());
    let scheduler = SystemScheduler::new(
        &config.scheduler_submit_binary,
        &config.scheduler_accounting_binary,
    );
    let transfer = SystemTransferClient::new(
        &config.transfer_binary,
        config.transfer_remote_host.clone(),
    );
    let enums = EnumHttpClient::new(&config.enum_service_url).into_diagnostic()?;
    let registry = HttpRegistryApi::new(&box_config.api_url).into_diagnostic()?;

    Ok(Orchestrator::new(
        Arc::new(store),
        Arc::new(scheduler),
        Arc::new(SystemDiskMonitor),
        Arc::new(transfer),
        Arc::new(enums),
        Arc::new(registry),
        config.clone(),
    ))
}

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use paper_record_core::config::CoreConfigValues;
use paper_record_core::constants::DEFAULT_SNAPSHOT_FILENAME;
use paper_record_core::labels::{PlainTextLabelRenderer, SpoolDirPrinter};
use paper_record_core::patients::{IdentifierKind, PatientRegistry};
use paper_record_core::snapshot::{Workspace, WorkspaceSnapshot};
use paper_record_core::{
    CoreConfig, LocationId, PaperRecordId, PaperRecordMergeRequestId, PaperRecordRequest,
    PaperRecordRequestId, PaperRecordService, PatientId, PersonId,
};
use paper_record_types::{Identifier, NonEmptyText};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "paper-records")]
#[command(about = "Paper medical record tracking CLI")]
struct Cli {
    /// Workspace snapshot file
    #[arg(long, env = "PAPER_RECORDS_SNAPSHOT", default_value = DEFAULT_SNAPSHOT_FILENAME)]
    file: PathBuf,
    /// Directory label print jobs are spooled to
    #[arg(long, env = "PAPER_RECORDS_SPOOL_DIR", default_value = "labels")]
    spool_dir: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a location to the location tree
    AddLocation {
        /// Location name
        name: String,
        /// Parent location name
        #[arg(long)]
        parent: Option<String>,
        /// Tag the location as a medical record location
        #[arg(long)]
        medical_records: bool,
        /// Tag the location as an archives room
        #[arg(long)]
        archives: bool,
    },
    /// Register a patient with a primary identifier
    RegisterPatient {
        /// Patient display name
        name: String,
        /// Primary identifier
        primary_identifier: String,
    },
    /// Request a patient's paper record at a location
    Request {
        /// Patient primary identifier
        patient: String,
        /// Any location belonging to the facility that owns the chart
        location: String,
        /// Where the chart should be sent
        request_location: String,
        /// Staff member making the request (UUID)
        #[arg(long)]
        by: Uuid,
    },
    /// List open or assigned requests
    List {
        /// List assigned requests instead of open ones
        #[arg(long)]
        assigned: bool,
        /// Restrict to a medical record location
        #[arg(long)]
        location: Option<String>,
    },
    /// Assign open requests and print their labels
    Assign {
        /// Staff member taking the requests (UUID)
        assignee: Uuid,
        /// Location of the label printer
        location: String,
        /// Request ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Mark a request as sent
    Sent {
        /// Request id
        id: u64,
    },
    /// Cancel a request
    Cancel {
        /// Request id
        id: u64,
    },
    /// Mark a sent request as returned
    Returned {
        /// Request id
        id: u64,
    },
    /// Mark two paper records for merging
    Merge {
        /// Paper record to keep
        preferred: u64,
        /// Paper record to fold into the preferred one
        not_preferred: u64,
        /// Staff member requesting the merge (UUID)
        #[arg(long)]
        by: Uuid,
    },
    /// Confirm that a merge has been done physically
    ConfirmMerge {
        /// Merge request id
        id: u64,
    },
    /// Cancel pending requests for existing charts older than a number of hours
    ExpirePull {
        /// Age in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Cancel pending requests for charts still to be made older than a number of hours
    ExpireCreate {
        /// Age in hours
        #[arg(long, default_value_t = 72)]
        hours: i64,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paper_record_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use --help for usage information");
        return Ok(());
    };

    let cfg = Arc::new(core_config_from_env()?);
    std::fs::create_dir_all(&cli.spool_dir)
        .with_context(|| format!("creating spool directory {}", cli.spool_dir.display()))?;

    let workspace = WorkspaceSnapshot::load(&cli.file)?.into_workspace()?;
    let service = workspace.service(
        cfg.clone(),
        Arc::new(PlainTextLabelRenderer),
        Arc::new(SpoolDirPrinter::new(&cli.spool_dir)),
    );

    if let Err(e) = run(command, &workspace, &service, &cfg) {
        tracing::error!("command failed: {:?}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    workspace.snapshot()?.save(&cli.file)?;
    Ok(())
}

fn core_config_from_env() -> anyhow::Result<CoreConfig> {
    let env = |name: &str| std::env::var(name).ok();
    let cfg = CoreConfigValues {
        form_label_count: env("PAPER_RECORDS_FORM_LABEL_COUNT"),
        print_base_delay_ms: env("PAPER_RECORDS_PRINT_BASE_DELAY_MS"),
        print_delay_per_label_ms: env("PAPER_RECORDS_PRINT_DELAY_PER_LABEL_MS"),
        max_identifier_attempts: env("PAPER_RECORDS_MAX_IDENTIFIER_ATTEMPTS"),
    }
    .resolve()?;
    Ok(cfg)
}

fn run(
    command: Commands,
    workspace: &Workspace,
    service: &PaperRecordService,
    cfg: &CoreConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::AddLocation {
            name,
            parent,
            medical_records,
            archives,
        } => {
            let mut tags = Vec::new();
            if medical_records {
                tags.push(cfg.medical_record_location_tag().to_string());
            }
            if archives {
                tags.push(cfg.archives_location_tag().to_string());
            }
            let parent = parent.map(LocationId::new).transpose()?;
            workspace
                .locations
                .add_location(LocationId::new(&name)?, parent, tags)?;
            println!("Added location: {}", name);
        }
        Commands::RegisterPatient {
            name,
            primary_identifier,
        } => {
            let id = workspace
                .registry
                .register_patient(NonEmptyText::new(&name)?, Identifier::new(&primary_identifier)?)?;
            println!("Registered patient {} with ID: {}", name, id);
        }
        Commands::Request {
            patient,
            location,
            request_location,
            by,
        } => {
            let patient = patient_by_primary_identifier(workspace, &patient)?;
            let requests = service.request_paper_record(
                patient,
                &LocationId::new(&location)?,
                &LocationId::new(&request_location)?,
                PersonId::from_uuid(by),
            )?;
            for request in &requests {
                println!("{}", describe_request(service, request)?);
            }
        }
        Commands::List { assigned, location } => {
            let location = location.map(LocationId::new).transpose()?;
            let (to_pull, to_create) = if assigned {
                (
                    service.assigned_requests_to_pull(location.as_ref())?,
                    service.assigned_requests_to_create(location.as_ref())?,
                )
            } else {
                (
                    service.open_requests_to_pull(location.as_ref())?,
                    service.open_requests_to_create(location.as_ref())?,
                )
            };
            if to_pull.is_empty() && to_create.is_empty() {
                println!("No requests found.");
            }
            for request in &to_pull {
                println!("pull   {}", describe_request(service, request)?);
            }
            for request in &to_create {
                println!("create {}", describe_request(service, request)?);
            }
        }
        Commands::Assign {
            assignee,
            location,
            ids,
        } => {
            let ids: Vec<PaperRecordRequestId> =
                ids.into_iter().map(PaperRecordRequestId::new).collect();
            let report = service.assign_requests(
                &ids,
                PersonId::from_uuid(assignee),
                &LocationId::new(&location)?,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Sent { id } => {
            let request = service.mark_request_sent(PaperRecordRequestId::new(id))?;
            println!("{}", describe_request(service, &request)?);
        }
        Commands::Cancel { id } => {
            let request = service.mark_request_cancelled(PaperRecordRequestId::new(id))?;
            println!("{}", describe_request(service, &request)?);
        }
        Commands::Returned { id } => {
            let request = service.mark_request_returned(PaperRecordRequestId::new(id))?;
            println!("{}", describe_request(service, &request)?);
        }
        Commands::Merge {
            preferred,
            not_preferred,
            by,
        } => {
            let merge = service.mark_paper_records_for_merge(
                PaperRecordId::new(preferred),
                PaperRecordId::new(not_preferred),
                PersonId::from_uuid(by),
            )?;
            println!(
                "Merge request {}: {} into {} ({})",
                merge.id, merge.not_preferred_paper_record, merge.preferred_paper_record, merge.status
            );
        }
        Commands::ConfirmMerge { id } => {
            let merge = service.mark_paper_records_as_merged(PaperRecordMergeRequestId::new(id))?;
            println!("Merge request {} is {}", merge.id, merge.status);
        }
        Commands::ExpirePull { hours } => {
            let expired = service.expire_pending_pull_requests(Utc::now() - Duration::hours(hours))?;
            println!("Expired {} pull request(s)", expired.len());
        }
        Commands::ExpireCreate { hours } => {
            let expired =
                service.expire_pending_create_requests(Utc::now() - Duration::hours(hours))?;
            println!("Expired {} create request(s)", expired.len());
        }
    }
    Ok(())
}

fn patient_by_primary_identifier(workspace: &Workspace, value: &str) -> anyhow::Result<PatientId> {
    let identifier = Identifier::new(value)?;
    let patients = workspace
        .registry
        .patients_with_identifier(&identifier, IdentifierKind::Primary)?;
    match patients.as_slice() {
        [patient] => Ok(*patient),
        [] => anyhow::bail!("no patient with primary identifier {}", value),
        _ => anyhow::bail!("more than one patient with primary identifier {}", value),
    }
}

fn describe_request(
    service: &PaperRecordService,
    request: &PaperRecordRequest,
) -> anyhow::Result<String> {
    let identifier = service
        .get_paper_record(request.paper_record)?
        .map(|record| format!("{} @ {}", record.identifier, record.record_location))
        .unwrap_or_else(|| format!("record {}", request.paper_record));
    Ok(format!(
        "Request {}: {} -> {} [{}]",
        request.id, identifier, request.request_location, request.status
    ))
}

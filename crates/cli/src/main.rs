//! Ferry CLI - operator interface to the Ferry daemon

mod output;
mod rpc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rpc::RpcClient;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9640";

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry recovery job orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, global = true, env = "FERRY_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage recovery jobs
    #[command(subcommand)]
    Jobs(JobsCommand),

    /// Request a run of a job
    Run {
        job_id: String,

        #[arg(short, long, value_enum, default_value_t = Mode::Full)]
        mode: Mode,
    },

    /// Cancel an executing run
    Cancel { run_id: String },

    /// Show the phase log of a run
    Logs {
        run_id: String,

        /// Print captured remote output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List recent runs of a job
    Runs {
        job_id: String,

        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Show a job's current status and last run
    Status { job_id: String },

    /// Runs finished during the last N hours
    Report {
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Manage the host directory
    #[command(subcommand)]
    Hosts(HostsCommand),
}

#[derive(Subcommand)]
enum JobsCommand {
    List,
    Show { job_id: String },
    Create(CreateJobArgs),
    Delete { job_id: String },
}

#[derive(Args)]
struct CreateJobArgs {
    #[arg(long)]
    name: String,
    /// Source host reference
    #[arg(long)]
    source: String,
    /// Intermediary (backup store) host reference
    #[arg(long)]
    intermediary: String,
    /// Destination host reference
    #[arg(long)]
    destination: String,
    #[arg(long)]
    workload_id: u32,
    #[arg(long, value_enum)]
    kind: Kind,
    /// Cron expression (5 fields) for full runs
    #[arg(long)]
    schedule: Option<String>,
    /// Cron expression (5 fields) for backup-only runs
    #[arg(long)]
    backup_schedule: Option<String>,
    #[arg(long, default_value_t = 0)]
    max_retries: u32,
    #[arg(long, default_value_t = 15)]
    retry_delay_minutes: u32,
    #[arg(long)]
    notify_each_run: bool,
    /// Create the job disabled for scheduling
    #[arg(long)]
    inactive: bool,
    /// Transfer options as a JSON object
    #[arg(long)]
    options: Option<String>,
}

#[derive(Subcommand)]
enum HostsCommand {
    List,
    Add(AddHostArgs),
}

#[derive(Args)]
struct AddHostArgs {
    host_ref: String,
    hostname: String,
    #[arg(long, default_value_t = 22)]
    port: u16,
    #[arg(long, default_value = "root")]
    user: String,
    #[arg(long)]
    key: Option<String>,
    /// Datastore exposed by an intermediary
    #[arg(long)]
    datastore: Option<String>,
    /// Roles this host may play
    #[arg(long = "role", value_enum, required = true)]
    roles: Vec<Role>,
    #[arg(long)]
    offline: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Full,
    BackupOnly,
    RestoreOnly,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::BackupOnly => "backup-only",
            Mode::RestoreOnly => "restore-only",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Container,
    #[value(alias = "vm")]
    FullVirtualization,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Container => "CONTAINER",
            Kind::FullVirtualization => "FULL_VIRTUALIZATION",
        }
    }
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum Role {
    Source,
    Intermediary,
    Destination,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ROUTE")]
    route: String,
    #[tabled(rename = "WORKLOAD")]
    workload: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "SCHEDULE")]
    schedule: String,
    #[tabled(rename = "BACKUP")]
    backup: String,
    #[tabled(rename = "RESTORE")]
    restore: String,
}

impl JobRow {
    fn from_value(job: &Value) -> Self {
        let active = job["is_active"].as_bool().unwrap_or(false);
        Self {
            id: output::text(job, "id"),
            name: output::text(job, "name"),
            route: format!(
                "{} > {} > {}",
                output::text(job, "source_host_ref"),
                output::text(job, "intermediary_host_ref"),
                output::text(job, "destination_host_ref")
            ),
            workload: format!(
                "{} ({})",
                output::text(job, "workload_id"),
                output::text(job, "workload_kind")
            ),
            status: if active {
                output::text(job, "current_status")
            } else {
                "INACTIVE".to_string()
            },
            schedule: output::text(job, "schedule"),
            backup: output::duration(job, "last_backup_duration_ms"),
            restore: output::duration(job, "last_restore_duration_ms"),
        }
    }
}

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "SEQ")]
    sequence: String,
    #[tabled(rename = "RUN ID")]
    run_id: String,
    #[tabled(rename = "MODE")]
    mode: String,
    #[tabled(rename = "TRIGGER")]
    trigger: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: String,
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "FAILURE")]
    failure: String,
}

impl RunRow {
    fn from_value(run: &Value) -> Self {
        Self {
            sequence: output::text(run, "sequence"),
            run_id: output::text(run, "run_id"),
            mode: output::text(run, "mode"),
            trigger: output::text(run, "trigger"),
            status: output::text(run, "status"),
            attempts: output::text(run, "attempts"),
            started: output::timestamp(run, "started_at"),
            duration: output::duration(run, "duration_ms"),
            failure: output::text(run, "failure"),
        }
    }
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "REF")]
    host_ref: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "ROLES")]
    roles: String,
    #[tabled(rename = "DATASTORE")]
    datastore: String,
    #[tabled(rename = "ONLINE")]
    online: String,
}

impl HostRow {
    fn from_value(host: &Value) -> Self {
        let caps = &host["capabilities"];
        let roles: Vec<&str> = ["source", "intermediary", "destination"]
            .into_iter()
            .filter(|role| caps[*role].as_bool().unwrap_or(false))
            .collect();
        Self {
            host_ref: output::text(host, "host_ref"),
            address: format!(
                "{}@{}:{}",
                output::text(host, "ssh_user"),
                output::text(host, "hostname"),
                output::text(host, "ssh_port")
            ),
            roles: roles.join(","),
            datastore: output::text(host, "datastore"),
            online: output::text(host, "is_online"),
        }
    }
}

fn create_job_params(args: CreateJobArgs) -> Result<Value> {
    let options: Value = match args.options {
        Some(raw) => serde_json::from_str(&raw).context("Invalid JSON in --options")?,
        None => json!({}),
    };
    Ok(json!({
        "name": args.name,
        "source_host_ref": args.source,
        "intermediary_host_ref": args.intermediary,
        "destination_host_ref": args.destination,
        "workload_id": args.workload_id,
        "workload_kind": args.kind.as_str(),
        "options": options,
        "is_active": !args.inactive,
        "schedule": args.schedule,
        "backup_schedule": args.backup_schedule,
        "max_retries": args.max_retries,
        "retry_delay_minutes": args.retry_delay_minutes,
        "notify_on_each_run": args.notify_each_run,
    }))
}

fn add_host_params(args: AddHostArgs) -> Value {
    json!({
        "host_ref": args.host_ref,
        "hostname": args.hostname,
        "ssh_port": args.port,
        "ssh_user": args.user,
        "ssh_key_path": args.key,
        "datastore": args.datastore,
        "source_capable": args.roles.contains(&Role::Source),
        "intermediary_capable": args.roles.contains(&Role::Intermediary),
        "destination_capable": args.roles.contains(&Role::Destination),
        "is_online": !args.offline,
    })
}

fn rows<T>(list: &Value, map: impl Fn(&Value) -> T) -> Vec<T> {
    list.as_array()
        .map(|items| items.iter().map(map).collect())
        .unwrap_or_default()
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = RpcClient::new(cli.rpc_url);

    match cli.command {
        Commands::Jobs(JobsCommand::List) => {
            let result = client.call("job.list.v1", json!({})).await?;
            let jobs = rows(&result["jobs"], JobRow::from_value);
            if jobs.is_empty() {
                println!("{}", "No jobs configured".yellow());
            } else {
                println!("{}", Table::new(jobs));
            }
        }

        Commands::Jobs(JobsCommand::Show { job_id }) => {
            let job = client.call("job.get.v1", json!({ "job_id": job_id })).await?;
            print_json(&job)?;
        }

        Commands::Jobs(JobsCommand::Create(args)) => {
            let job = client.call("job.create.v1", create_job_params(args)?).await?;
            println!(
                "{}",
                format!("✓ Job {} created", output::text(&job, "id"))
                    .green()
                    .bold()
            );
        }

        Commands::Jobs(JobsCommand::Delete { job_id }) => {
            client
                .call("job.delete.v1", json!({ "job_id": job_id }))
                .await?;
            println!("{}", format!("✓ Job {} deleted", job_id).green().bold());
        }

        Commands::Run { job_id, mode } => {
            let decision = client
                .call(
                    "run.request.v1",
                    json!({ "job_id": job_id, "mode": mode.as_str() }),
                )
                .await?;
            match decision["decision"].as_str() {
                Some("accepted") => println!(
                    "{} run {}",
                    "✓ Accepted".green().bold(),
                    output::text(&decision, "run_id")
                ),
                _ => println!(
                    "{} ({})",
                    "✗ Rejected".red().bold(),
                    output::text(&decision, "reason")
                ),
            }
        }

        Commands::Cancel { run_id } => {
            let result = client
                .call("run.cancel.v1", json!({ "run_id": run_id }))
                .await?;
            if result["cancelled"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Run {} cancelling", run_id).green().bold());
            } else {
                println!("{}", format!("Run {} already finished", run_id).yellow());
            }
        }

        Commands::Logs { run_id, verbose } => {
            let result = client.call("run.log.v1", json!({ "run_id": run_id })).await?;
            let entries = result["entries"].as_array().cloned().unwrap_or_default();
            if entries.is_empty() {
                println!("{}", "No log entries".yellow());
            }
            for entry in &entries {
                println!(
                    "{} #{} {:<12} {} {} {}",
                    output::timestamp(entry, "started_at").dimmed(),
                    output::text(entry, "attempt"),
                    output::text(entry, "phase"),
                    output::status(&output::text(entry, "status")),
                    output::duration(entry, "duration_ms"),
                    output::text(entry, "message"),
                );
                if let Some(error) = entry["error"].as_str() {
                    println!("    {} {}", "error:".red(), error);
                }
                if verbose {
                    if let Some(captured) = entry["captured_output"].as_str() {
                        for line in captured.lines() {
                            println!("    {}", line.dimmed());
                        }
                    }
                }
            }
        }

        Commands::Runs { job_id, limit } => {
            let result = client
                .call("run.list.v1", json!({ "job_id": job_id, "limit": limit }))
                .await?;
            let runs = rows(&result["runs"], RunRow::from_value);
            if runs.is_empty() {
                println!("{}", "No runs yet".yellow());
            } else {
                println!("{}", Table::new(runs));
            }
        }

        Commands::Status { job_id } => {
            let status = client
                .call("job.status.v1", json!({ "job_id": job_id }))
                .await?;
            println!(
                "{} {}",
                output::text(&status, "name").cyan().bold(),
                format!("({})", output::text(&status, "job_id")).dimmed()
            );
            println!();
            println!(
                "  {} {}",
                "Status:".bold(),
                output::status(&output::text(&status, "current_status"))
            );
            println!("  {} {}", "Active:".bold(), output::text(&status, "is_active"));
            println!(
                "  {} {}",
                "Successful runs:".bold(),
                output::text(&status, "run_count")
            );
            println!(
                "  {} {}",
                "Failed attempts:".bold(),
                output::text(&status, "error_count")
            );
            println!(
                "  {} {}",
                "Consecutive failures:".bold(),
                output::text(&status, "consecutive_failure_count")
            );
            println!(
                "  {} {}",
                "Last backup:".bold(),
                output::timestamp(&status, "last_backup_at")
            );
            println!(
                "  {} {}",
                "Last restore:".bold(),
                output::timestamp(&status, "last_restore_at")
            );
            println!(
                "  {} {}",
                "Last artifact:".bold(),
                output::text(&status, "last_artifact_ref")
            );
            if let Some(error) = status["last_error"].as_str() {
                println!("  {} {}", "Last error:".bold(), error.red());
            }
            if status["last_run"].is_object() {
                println!();
                println!("{}", Table::new([RunRow::from_value(&status["last_run"])]));
            }
        }

        Commands::Report { hours } => {
            let since = chrono::Utc::now().timestamp_millis() - hours.max(0) * 3_600_000;
            let result = client
                .call("run.report.v1", json!({ "since": since }))
                .await?;
            let runs = rows(&result["runs"], RunRow::from_value);
            println!(
                "{}",
                format!("{} run(s) finished in the last {}h", runs.len(), hours)
                    .cyan()
                    .bold()
            );
            if !runs.is_empty() {
                println!("{}", Table::new(runs));
            }
        }

        Commands::Hosts(HostsCommand::List) => {
            let result = client.call("host.list.v1", json!({})).await?;
            let hosts = rows(&result["hosts"], HostRow::from_value);
            if hosts.is_empty() {
                println!("{}", "No hosts registered".yellow());
            } else {
                println!("{}", Table::new(hosts));
            }
        }

        Commands::Hosts(HostsCommand::Add(args)) => {
            let host = client.call("host.upsert.v1", add_host_params(args)).await?;
            println!(
                "{}",
                format!("✓ Host {} saved", output::text(&host, "host_ref"))
                    .green()
                    .bold()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn test_run_mode_parsing() {
        let cli = parse(&["ferry", "run", "job-1", "--mode", "backup-only"]);
        match cli.command {
            Commands::Run { job_id, mode } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(mode.as_str(), "backup-only");
            }
            _ => panic!("expected run command"),
        }
        assert_eq!(cli.rpc_url, DEFAULT_RPC_URL);

        assert!(Cli::try_parse_from(["ferry", "run", "job-1", "--mode", "sideways"]).is_err());
    }

    #[test]
    fn test_create_job_params() {
        let cli = parse(&[
            "ferry",
            "jobs",
            "create",
            "--name",
            "web",
            "--source",
            "pve-a",
            "--intermediary",
            "pbs",
            "--destination",
            "pve-b",
            "--workload-id",
            "101",
            "--kind",
            "vm",
            "--schedule",
            "0 2 * * *",
            "--options",
            r#"{"compression":"gzip"}"#,
        ]);
        let Commands::Jobs(JobsCommand::Create(args)) = cli.command else {
            panic!("expected jobs create");
        };
        let params = create_job_params(args).unwrap();
        assert_eq!(params["workload_kind"], "FULL_VIRTUALIZATION");
        assert_eq!(params["is_active"], true);
        assert_eq!(params["schedule"], "0 2 * * *");
        assert!(params["backup_schedule"].is_null());
        assert_eq!(params["options"]["compression"], "gzip");
    }

    #[test]
    fn test_add_host_roles() {
        let cli = parse(&[
            "ferry",
            "hosts",
            "add",
            "pbs",
            "pbs.lan",
            "--role",
            "intermediary",
            "--datastore",
            "backups",
        ]);
        let Commands::Hosts(HostsCommand::Add(args)) = cli.command else {
            panic!("expected hosts add");
        };
        let params = add_host_params(args);
        assert_eq!(params["source_capable"], false);
        assert_eq!(params["intermediary_capable"], true);
        assert_eq!(params["ssh_port"], 22);
        assert_eq!(params["datastore"], "backups");
    }

    #[test]
    fn test_job_row_marks_inactive() {
        let row = JobRow::from_value(&json!({
            "id": "job-1",
            "name": "web",
            "source_host_ref": "pve-a",
            "intermediary_host_ref": "pbs",
            "destination_host_ref": "pve-b",
            "workload_id": 101,
            "workload_kind": "CONTAINER",
            "is_active": false,
            "current_status": "IDLE",
            "schedule": null,
            "last_backup_duration_ms": 65_000,
            "last_restore_duration_ms": null
        }));
        assert_eq!(row.route, "pve-a > pbs > pve-b");
        assert_eq!(row.workload, "101 (CONTAINER)");
        assert_eq!(row.status, "INACTIVE");
        assert_eq!(row.backup, "1m 05s");
        assert_eq!(row.restore, "-");
    }
}

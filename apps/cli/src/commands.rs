//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use trustline_core::import::TenantImport;
use trustline_core::orchestrator::{
    Command as RunCommand, CommandResponse, ProgressReporter, Stage, StageStatus, TraceEntry,
};
use trustline_core::service::{ActionResult, TrustlineService};
use trustline_shared::{AppConfig, init_config, load_config, load_config_from};
use trustline_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Trustline: verified storefront answers and trust-gated growth.
#[derive(Parser)]
#[command(
    name = "trustline",
    version,
    about = "Find knowledge gaps, publish verified answers, and gate growth on trust.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.trustline/trustline.toml).
    #[arg(long, global = true, env = "TRUSTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path, overriding `[database].path`.
    #[arg(long, global = true, env = "TRUSTLINE_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import a tenant snapshot (claims, questions, products, audience).
    Import {
        /// JSON file to import.
        file: PathBuf,
    },

    /// Run an orchestrated command for a tenant.
    Run {
        /// Tenant domain.
        #[arg(long)]
        tenant: String,

        /// trust_audit, fix_gaps, launch_referral, launch_referral_live, or status.
        command: String,

        /// Free text passed to the run (campaign name for referrals).
        text: Option<String>,
    },

    /// List recommendations in priority order.
    Recs {
        #[arg(long)]
        tenant: String,
    },

    /// Generate a draft for a recommendation.
    Draft {
        #[arg(long)]
        tenant: String,
        /// Recommendation id.
        #[arg(long)]
        id: String,
    },

    /// Approve a drafted recommendation.
    Approve {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
    },

    /// Publish an approved recommendation through the safety gate.
    Publish {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
    },

    /// Show the most recent receipts, newest first.
    Receipts {
        #[arg(long)]
        tenant: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Campaign management.
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },

    /// Record that a customer has already been referred.
    MarkReferred {
        #[arg(long)]
        tenant: String,
        /// Customer address.
        #[arg(long)]
        address: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Campaign subcommands.
#[derive(Subcommand)]
pub(crate) enum CampaignAction {
    /// List campaigns for a tenant.
    List {
        #[arg(long)]
        tenant: String,
    },
    /// Approve a READY campaign.
    Approve {
        #[arg(long)]
        tenant: String,
        /// Campaign id.
        #[arg(long)]
        id: String,
    },
    /// Execute an APPROVED campaign. Trust is checked again first.
    Execute {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays JSON.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "trustline=info",
        1 => "trustline=debug",
        _ => "trustline=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        db,
        command,
        ..
    } = cli;

    if let Command::Config { action } = command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config.as_deref(), db.as_deref()),
        };
    }

    let service = open_service(config.as_deref(), db.as_deref()).await?;

    match command {
        Command::Import { file } => cmd_import(&service, &file).await,
        Command::Run {
            tenant,
            command,
            text,
        } => cmd_run(&service, &tenant, &command, text).await,
        Command::Recs { tenant } => print_json(&service.list_recommendations(&tenant).await?),
        Command::Draft { tenant, id } => report(service.draft(&tenant, &id).await?),
        Command::Approve { tenant, id } => report(service.approve(&tenant, &id).await?),
        Command::Publish { tenant, id } => report(service.publish(&tenant, &id).await?),
        Command::Receipts { tenant, limit } => {
            print_json(&service.list_receipts(&tenant, limit).await?)
        }
        Command::Campaign { action } => match action {
            CampaignAction::List { tenant } => print_json(&service.list_campaigns(&tenant).await?),
            CampaignAction::Approve { tenant, id } => {
                report(service.approve_campaign(&tenant, &id).await?)
            }
            CampaignAction::Execute { tenant, id } => {
                report(service.execute_campaign(&tenant, &id).await?)
            }
        },
        Command::MarkReferred { tenant, address } => {
            report(service.mark_referred(&tenant, &address).await?)
        }
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>, db: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.database.path = db.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn open_service(config_path: Option<&Path>, db: Option<&Path>) -> Result<TrustlineService> {
    let config = resolve_config(config_path, db)?;
    let db_path = PathBuf::from(&config.database.path);
    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", db_path.display()))?;
    Ok(TrustlineService::new(storage, config)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print an action result; refusals still print, then exit non-zero.
fn report(result: ActionResult) -> Result<()> {
    print_json(&result)?;
    if result.ok {
        Ok(())
    } else {
        Err(eyre!(
            "action refused: {}",
            result.error.as_deref().unwrap_or("unknown")
        ))
    }
}

async fn cmd_import(service: &TrustlineService, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("cannot read {}", file.display()))?;
    let import = TenantImport::from_json(&raw)?;

    info!(file = %file.display(), "importing tenant snapshot");
    let summary = service.import(&import).await?;
    print_json(&summary)
}

async fn cmd_run(
    service: &TrustlineService,
    tenant: &str,
    command: &str,
    text: Option<String>,
) -> Result<()> {
    let command = RunCommand::from_str(command)?;
    info!(tenant, %command, "running command");

    let reporter = CliProgress::new();
    let response = service.run_command(tenant, command, text, &reporter).await?;

    print_json(&response)?;
    eprintln!();
    eprintln!("  {}", response.summary_text);
    eprintln!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner that follows the orchestrator stages.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(format!("{stage}..."));
    }

    fn stage_done(&self, entry: &TraceEntry) {
        let mark = match entry.status {
            StageStatus::Ok => "ok",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "FAILED",
        };
        self.spinner.println(format!(
            "  {:<10} {:<8} {} ({} ms)",
            entry.stage.as_str(),
            mark,
            entry.summary,
            entry.elapsed_ms
        ));
    }

    fn done(&self, _response: &CommandResponse) {
        self.spinner.finish_and_clear();
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>, db: Option<&Path>) -> Result<()> {
    let config = resolve_config(path, db)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

use clap::{Parser, Subcommand};
use colored::Colorize;
use m365sync::config::ConfigManager;
use m365sync::reconcile::RunSummary;
use m365sync::{cmd, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "m365sync",
    about = "Reconcile Microsoft 365 mailboxes against retention, archive and permission policy",
    version,
    long_about = "Bulk reconciliation of Exchange Online mailboxes\n\n\
                  Assigns a retention policy and enables archives on every eligible mailbox,\n\
                  and keeps shared mailbox FullAccess grants in line with permission groups.\n\
                  Every run is a dry run unless --dry-run false is given."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assign the retention policy and enable archives on eligible mailboxes
    Compliance(cmd::compliance::ComplianceArgs),

    /// Sync shared mailbox FullAccess grants from permission groups
    Permissions(cmd::permissions::PermissionsArgs),

    /// Manage tenant configurations
    #[command(subcommand)]
    Tenant(TenantCommands),
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// Add a new tenant configuration
    Add(cmd::tenant::TenantAddArgs),

    /// List all configured tenants
    List(cmd::tenant::TenantListArgs),

    /// Switch the active tenant
    Switch(cmd::tenant::TenantSwitchArgs),

    /// Remove a tenant configuration
    Remove(cmd::tenant::TenantRemoveArgs),
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("m365sync=debug")
    } else if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        let level = ConfigManager::new()
            .and_then(|c| c.load_config())
            .map(|c| c.log_level)
            .unwrap_or_default();
        let level = if level.is_empty() { "warn".to_string() } else { level };
        EnvFilter::new(format!("m365sync={}", level))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Exit code for a finished run
fn exit_code(summary: &RunSummary) -> i32 {
    if summary.has_permanent_failures() {
        1
    } else {
        0
    }
}

async fn run() -> error::Result<i32> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Compliance(args) => {
            let summary = cmd::compliance::run(args).await?;
            return Ok(exit_code(&summary));
        }
        Commands::Permissions(args) => {
            let summary = cmd::permissions::run(args).await?;
            return Ok(exit_code(&summary));
        }
        Commands::Tenant(tenant_cmd) => match tenant_cmd {
            TenantCommands::Add(args) => cmd::tenant::add(args).await?,
            TenantCommands::List(args) => cmd::tenant::list(args).await?,
            TenantCommands::Switch(args) => cmd::tenant::switch(args).await?,
            TenantCommands::Remove(args) => cmd::tenant::remove(args).await?,
        },
    }

    Ok(0)
}

//! Shared mailbox FullAccess sync from MBX-FA-* permission groups

use crate::cmd::{self, progress, RunArgs};
use crate::config::ConfigManager;
use crate::error::Result;
use crate::graph::session::TenantSession;
use crate::reconcile::differ::plan_permission_targets;
use crate::reconcile::{
    DirectorySource, MutationExecutor, PermissionReconciler, ProgressReporter, ReferenceData,
    RunSummary,
};
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct PermissionsArgs {
    /// Display-name prefix of permission groups (default from config)
    #[arg(long)]
    pub group_prefix: Option<String>,

    /// Grant FullAccess without Outlook auto-mapping
    #[arg(long)]
    pub no_auto_mapping: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn run(args: PermissionsArgs) -> Result<RunSummary> {
    println!("{} shared mailbox permissions...", "Reconciling".cyan().bold());

    let config_manager = ConfigManager::new()?;
    let mut settings = cmd::load_settings(&config_manager)?;
    if let Some(prefix) = args.group_prefix {
        settings.group_prefix = prefix;
    }
    if args.no_auto_mapping {
        settings.auto_mapping = false;
    }
    settings.validate()?;
    let tenant = config_manager.resolve_tenant(args.run.tenant.as_deref())?;

    println!("→ Tenant: {}", tenant.name.cyan().bold());
    println!("→ Group prefix: {}", settings.group_prefix.bold());

    let scheduler = args.run.scheduler(&settings);
    cmd::print_mode(args.run.dry_run, &scheduler);

    if !args.run.dry_run
        && !args.run.yes
        && !cmd::confirm_live_run("add and remove FullAccess permissions", &tenant.name)?
    {
        return Ok(RunSummary::new(false));
    }

    let session = TenantSession::connect(&config_manager, &tenant).await?;

    let spinner = progress::create_spinner("Loading permission groups and shared mailboxes...");
    let loaded = async {
        let groups = session.groups_with_prefix(&settings.group_prefix).await?;
        let reference = ReferenceData::load_permissions(&session, &groups).await?;
        let shared = session.shared_mailboxes().await?;
        Ok::<_, crate::error::Error>((groups, reference, shared))
    }
    .await;
    let (groups, reference, shared) = match loaded {
        Ok(loaded) => {
            progress::finish_spinner_success(
                &spinner,
                &format!(
                    "{} groups, {} shared mailboxes",
                    loaded.0.len(),
                    loaded.2.len()
                ),
            );
            loaded
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Reference data could not be loaded");
            return Err(e.into_fetch_error("permission reference data"));
        }
    };

    let targets = plan_permission_targets(&groups, &shared, &settings.group_prefix);

    let executor = MutationExecutor::from_settings(&session, &settings, args.run.dry_run);
    let reconciler = PermissionReconciler::new(&session, &reference, executor)
        .auto_mapping(settings.auto_mapping);

    let mut reporter = ProgressReporter::new(
        targets.len(),
        settings.progress_interval,
        "Reconciling permissions",
    );
    Ok(scheduler.run(&reconciler, &targets, &mut reporter).await)
}

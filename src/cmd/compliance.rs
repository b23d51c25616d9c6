//! Mailbox compliance reconciliation: retention policy + archive enablement

use crate::cmd::{self, progress, RunArgs};
use crate::config::ConfigManager;
use crate::error::Result;
use crate::graph::session::TenantSession;
use crate::reconcile::model::normalize;
use crate::reconcile::{
    ComplianceReconciler, DirectorySource, EligibilityEvaluator, LicenseRules, MailboxTarget,
    MutationExecutor, ProgressReporter, ReferenceData, RunSummary,
};
use clap::Args;
use colored::Colorize;
use std::collections::HashSet;

#[derive(Args, Debug)]
pub struct ComplianceArgs {
    /// Retention policy every eligible mailbox should carry
    #[arg(long, default_value = "Default MRM Policy")]
    pub policy_name: String,

    /// Group whose members skip archive enablement (default from config)
    #[arg(long)]
    pub exempt_group: Option<String>,

    /// Only reconcile these mailboxes (repeatable)
    #[arg(long = "mailbox", value_name = "UPN")]
    pub mailboxes: Vec<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn run(args: ComplianceArgs) -> Result<RunSummary> {
    println!("{} mailbox compliance...", "Reconciling".cyan().bold());

    let config_manager = ConfigManager::new()?;
    let mut settings = cmd::load_settings(&config_manager)?;
    if let Some(group) = args.exempt_group {
        settings.exempt_group = group;
    }
    let tenant = config_manager.resolve_tenant(args.run.tenant.as_deref())?;

    println!("→ Tenant: {}", tenant.name.cyan().bold());
    println!("→ Retention policy: {}", args.policy_name.bold());
    println!("→ Exempt group: {}", settings.exempt_group);

    let scheduler = args.run.scheduler(&settings);
    cmd::print_mode(args.run.dry_run, &scheduler);

    if !args.run.dry_run
        && !args.run.yes
        && !cmd::confirm_live_run("assign retention policies and enable archives", &tenant.name)?
    {
        return Ok(RunSummary::new(false));
    }

    let session = TenantSession::connect(&config_manager, &tenant).await?;

    let spinner = progress::create_spinner("Loading licenses and exempt group...");
    let reference = match ReferenceData::load_compliance(&session, &settings.exempt_group).await {
        Ok(reference) => {
            progress::finish_spinner_success(&spinner, "Reference data loaded");
            reference
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Reference data could not be loaded");
            return Err(e);
        }
    };

    let spinner = progress::create_spinner("Enumerating mailboxes...");
    let mailboxes = match session.mailboxes().await {
        Ok(mailboxes) => {
            progress::finish_spinner_success(&spinner, &format!("{} mailboxes", mailboxes.len()));
            mailboxes
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Mailbox enumeration failed");
            return Err(e);
        }
    };
    let targets = select_mailboxes(mailboxes, &args.mailboxes);

    let evaluator = EligibilityEvaluator::new(LicenseRules::from_settings(&settings), &args.policy_name);
    let executor = MutationExecutor::from_settings(&session, &settings, args.run.dry_run);
    let reconciler = ComplianceReconciler::new(&reference, evaluator, executor)
        .archive_requires_retention(settings.archive_requires_retention);

    let mut reporter = ProgressReporter::new(
        targets.len(),
        settings.progress_interval,
        "Reconciling mailboxes",
    );
    Ok(scheduler.run(&reconciler, &targets, &mut reporter).await)
}

/// Restrict the run to the named mailboxes; an empty filter keeps everything
fn select_mailboxes(mailboxes: Vec<MailboxTarget>, filter: &[String]) -> Vec<MailboxTarget> {
    if filter.is_empty() {
        return mailboxes;
    }

    let wanted: HashSet<String> = filter.iter().map(|m| normalize(m)).collect();
    let selected: Vec<MailboxTarget> = mailboxes
        .into_iter()
        .filter(|m| {
            wanted.contains(&m.key())
                || m.primary_smtp
                    .as_deref()
                    .is_some_and(|smtp| wanted.contains(&normalize(smtp)))
        })
        .collect();

    let found: HashSet<String> = selected
        .iter()
        .flat_map(|m| [Some(m.key()), m.primary_smtp.as_deref().map(normalize)])
        .flatten()
        .collect();
    for name in wanted.difference(&found) {
        println!("{} Mailbox '{}' not found", "!".yellow(), name);
    }

    selected
}

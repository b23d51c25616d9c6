pub mod compliance;
pub mod permissions;
pub mod progress;
pub mod tenant;

use crate::config::{ConfigManager, ReconcileSettings};
use crate::error::Result;
use crate::reconcile::BatchScheduler;
use clap::Args;
use colored::Colorize;

/// Options shared by both reconciliation commands
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Simulate instead of mutate; pass `--dry-run false` to apply changes
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dry_run: bool,

    /// Worker pool size (1 = sequential, in input order)
    #[arg(long, conflicts_with = "parallel")]
    pub concurrency: Option<usize>,

    /// Run in parallel with the configured pool size
    #[arg(long)]
    pub parallel: bool,

    /// Targets per batch in parallel mode
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Tenant to run against (default: active tenant)
    #[arg(long)]
    pub tenant: Option<String>,

    /// Skip confirmation prompt for live runs
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl RunArgs {
    pub fn scheduler(&self, settings: &ReconcileSettings) -> BatchScheduler {
        let concurrency = match (self.concurrency, self.parallel) {
            (Some(n), _) => n,
            (None, true) => settings.parallel_concurrency,
            (None, false) => 1,
        };
        BatchScheduler::new(concurrency, self.batch_size.unwrap_or(settings.batch_size))
    }
}

/// Load config and validate the reconcile settings
pub(crate) fn load_settings(config_manager: &ConfigManager) -> Result<ReconcileSettings> {
    let config = config_manager.load_config()?;
    config.reconcile.validate()?;
    Ok(config.reconcile)
}

pub(crate) fn print_mode(dry_run: bool, scheduler: &BatchScheduler) {
    if dry_run {
        println!("\n{}", "DRY RUN - No changes will be made".yellow().bold());
    } else {
        println!("\n{}", "LIVE RUN - Changes will be applied".red().bold());
    }
    if scheduler.concurrency() > 1 {
        println!("{} Parallel: {} workers", "→".cyan(), scheduler.concurrency());
    } else {
        println!("{} Sequential", "→".cyan());
    }
}

/// Ask before a live run; returns false if the operator declines
pub(crate) fn confirm_live_run(what: &str, tenant: &str) -> Result<bool> {
    use std::io::{self, Write};

    println!(
        "\n{} This will {} in tenant '{}'",
        "⚠".yellow().bold(),
        what,
        tenant
    );
    print!("\nContinue? [y/N]: ");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    if !response.trim().eq_ignore_ascii_case("y") {
        println!("{}", "Cancelled.".yellow());
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_dry_run_is_the_default() {
        let harness = Harness::parse_from(["m365sync"]);
        assert!(harness.run.dry_run);

        let harness = Harness::parse_from(["m365sync", "--dry-run", "false"]);
        assert!(!harness.run.dry_run);
    }

    #[test]
    fn test_scheduler_selection() {
        let settings = ReconcileSettings::default();

        let sequential = Harness::parse_from(["m365sync"]).run.scheduler(&settings);
        assert_eq!(sequential.concurrency(), 1);

        let parallel = Harness::parse_from(["m365sync", "--parallel"]).run.scheduler(&settings);
        assert_eq!(parallel.concurrency(), 10);

        let explicit = Harness::parse_from(["m365sync", "--concurrency", "4"])
            .run
            .scheduler(&settings);
        assert_eq!(explicit.concurrency(), 4);
    }
}

use crate::config::{ConfigManager, TenantConfig};
use crate::error::Result;
use crate::graph::auth::Resource;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct TenantAddArgs {
    /// Tenant name
    name: String,

    /// Tenant ID (Entra ID tenant ID or primary domain)
    #[arg(long)]
    tenant_id: String,

    /// Client ID (Application ID) of the app registration
    #[arg(long)]
    client_id: String,

    /// Client secret for the client credentials flow
    #[arg(long, env = "M365SYNC_CLIENT_SECRET")]
    client_secret: Option<String>,

    /// Tenant description
    #[arg(long)]
    description: Option<String>,

    /// Make this the active tenant
    #[arg(long)]
    activate: bool,
}

#[derive(Args, Debug)]
pub struct TenantListArgs {
    /// Show detailed information
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
pub struct TenantSwitchArgs {
    /// Tenant name to switch to
    name: String,
}

#[derive(Args, Debug)]
pub struct TenantRemoveArgs {
    /// Tenant name to remove
    name: String,
}

pub async fn add(args: TenantAddArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;

    if args.client_secret.is_none() {
        println!(
            "{} No client secret given; unattended runs will fail until one is added",
            "!".yellow()
        );
    }

    let tenant = TenantConfig {
        name: args.name.clone(),
        tenant_id: args.tenant_id,
        client_id: args.client_id,
        client_secret: args.client_secret,
        description: args.description,
    };

    config_manager.add_tenant(tenant)?;
    println!("{} Tenant '{}' added", "✓".green(), args.name);

    if args.activate || config_manager.get_active_tenant()?.is_none() {
        config_manager.set_active_tenant(&args.name)?;
        println!("{} Active tenant is now '{}'", "→".cyan(), args.name);
    }

    println!(
        "\n{} Run {} to preview the compliance reconciliation",
        "→".cyan(),
        "m365sync compliance --policy-name <policy>".bold()
    );

    Ok(())
}

pub async fn list(args: TenantListArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let tenants = config_manager.load_tenants()?;
    let config = config_manager.load_config()?;

    if tenants.is_empty() {
        println!("{} No tenants configured", "!".yellow());
        println!(
            "\n{} Run {} to add a tenant",
            "→".cyan(),
            "m365sync tenant add".bold()
        );
        return Ok(());
    }

    println!("\n{}", "Configured Tenants:".bold());
    println!("{}", "─".repeat(60));

    for tenant in &tenants {
        let is_current = config
            .current_tenant
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(&tenant.name));
        let marker = if is_current {
            "●".green()
        } else {
            "○".dimmed()
        };

        println!("\n{} {}", marker, tenant.name.bold());

        if args.verbose {
            println!("  Tenant ID:    {}", tenant.tenant_id);
            println!("  Client ID:    {}", tenant.client_id);
            println!(
                "  Secret:       {}",
                if tenant.client_secret.is_some() {
                    "configured".green()
                } else {
                    "missing".yellow()
                }
            );

            if let Some(desc) = &tenant.description {
                println!("  Description:  {}", desc);
            }

            for resource in [Resource::Graph, Resource::Exchange] {
                match config_manager.load_token(&tenant.name, resource.cache_key()) {
                    Ok(token) => println!(
                        "  {:<13} {} (expires: {})",
                        format!("{} token:", resource.cache_key()),
                        "cached".green(),
                        token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                    ),
                    Err(_) => println!(
                        "  {:<13} {}",
                        format!("{} token:", resource.cache_key()),
                        "none".dimmed()
                    ),
                }
            }
        }
    }

    println!("\n{}", "─".repeat(60));
    println!("{} {} tenant(s) total", "→".cyan(), tenants.len());

    if let Some(current) = &config.current_tenant {
        println!("{} Active: {}", "→".cyan(), current.bold());
    }

    Ok(())
}

pub async fn switch(args: TenantSwitchArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    config_manager.set_active_tenant(&args.name)?;

    println!("{} Switched to tenant '{}'", "✓".green(), args.name);

    Ok(())
}

pub async fn remove(args: TenantRemoveArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    config_manager.remove_tenant(&args.name)?;

    println!("{} Tenant '{}' removed", "✓".green(), args.name);

    Ok(())
}

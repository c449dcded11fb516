//! Tripdesk platform administration.
//!
//! Super-admin console over the same JSON state file the operator console
//! uses: tenant lifecycle, impersonation, credit invoice confirmation,
//! subscriptions, usage rates, platform statistics and audit verification.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tripdesk_billing::{NewSubscription, PaymentConfirmation};
use tripdesk_core::{AppConfig, Money};
use tripdesk_engine::Tripdesk;
use tripdesk_platform::{Actor, AuditFilter};

#[derive(Parser)]
#[command(name = "tripdesk-admin", about = "Tripdesk platform administration", version)]
struct Cli {
    /// JSON state file (defaults to storage.state_path)
    #[arg(long, env = "TRIPDESK_STATE", global = true)]
    state: Option<String>,

    /// Super admin email the command runs as
    #[arg(long = "as-user", visible_alias = "as", env = "TRIPDESK_ADMIN", global = true)]
    admin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the first super admin account
    Bootstrap {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    /// Tenant organizations
    Orgs {
        #[command(subcommand)]
        action: OrgsAction,
    },
    /// Credit invoices and balance adjustments
    Billing {
        #[command(subcommand)]
        action: BillingAction,
    },
    /// Monthly credit subscriptions
    Subscriptions {
        #[command(subcommand)]
        action: SubscriptionAction,
    },
    /// Per-unit usage pricing
    Rates {
        #[command(subcommand)]
        action: RateAction,
    },
    /// Platform-wide statistics
    Stats,
    /// Tamper-evident audit trail
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum OrgsAction {
    /// List every organization with usage counts
    List,
    /// Show one organization
    Show {
        #[arg(long)]
        org: String,
    },
    /// Make an organization read-only
    Suspend {
        #[arg(long)]
        org: String,
        #[arg(long)]
        reason: String,
    },
    /// Lift a suspension or cancellation
    Reactivate {
        #[arg(long)]
        org: String,
        #[arg(long)]
        reason: String,
    },
    /// Close an organization
    Cancel {
        #[arg(long)]
        org: String,
        #[arg(long)]
        reason: String,
    },
    /// Act as an organization's admin (audited)
    Impersonate {
        #[arg(long)]
        org: String,
    },
}

#[derive(Subcommand)]
enum BillingAction {
    /// Credit invoices awaiting payment
    Pending,
    /// Confirm a transfer and credit the organization
    MarkPaid {
        #[arg(long)]
        invoice: Uuid,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Void an unpaid credit invoice
    Cancel {
        #[arg(long)]
        invoice: Uuid,
    },
    /// Manually grant (positive) or remove (negative) credits
    Adjust {
        #[arg(long)]
        org: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
enum SubscriptionAction {
    List,
    Create {
        #[arg(long)]
        org: String,
        #[arg(long)]
        plan: String,
        /// Credits granted each period
        #[arg(long)]
        monthly_credits: String,
        /// Billed each period; 0 for a free plan
        #[arg(long, default_value = "0")]
        price: String,
    },
    /// Stop renewing at the end of the current period
    Cancel {
        #[arg(long)]
        subscription: Uuid,
    },
}

#[derive(Subcommand)]
enum RateAction {
    List,
    /// Set the price per unit from a date on, closing the previous rate
    Set {
        /// Defaults to billing.itinerary_item_type
        #[arg(long)]
        item_type: Option<String>,
        #[arg(long)]
        price: String,
        /// RFC 3339; defaults to now
        #[arg(long)]
        valid_from: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Recompute the hash chain
    Verify,
    /// Recent entries, newest first
    Trail {
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "tripdesk=info".into()))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(state) = cli.state {
        config.storage.state_path = state;
    }
    config.validate()?;

    let state_path = config.storage.state_path.clone();
    let desk = Tripdesk::load(config, &state_path)?;
    let admin = || -> anyhow::Result<Actor> {
        let email = cli
            .admin
            .as_deref()
            .context("no admin: pass --as-user <email> or set TRIPDESK_ADMIN")?;
        Ok(desk.actor_by_email(email)?)
    };

    match cli.command {
        Commands::Bootstrap {
            email,
            first_name,
            last_name,
        } => cmd_bootstrap(&desk, &email, &first_name, &last_name)?,
        Commands::Orgs { action } => cmd_orgs(&desk, &admin()?, action)?,
        Commands::Billing { action } => cmd_billing(&desk, &admin()?, action)?,
        Commands::Subscriptions { action } => cmd_subscriptions(&desk, &admin()?, action)?,
        Commands::Rates { action } => cmd_rates(&desk, &admin()?, action)?,
        Commands::Stats => cmd_stats(&desk, &admin()?)?,
        Commands::Audit { action } => cmd_audit(&desk, &admin()?, action)?,
    }

    desk.save(&state_path)?;
    Ok(())
}

fn platform_money(desk: &Tripdesk, amount: &str) -> anyhow::Result<Money> {
    Ok(Money::parse(amount, desk.config().billing.currency)?)
}

fn org_id(desk: &Tripdesk, admin: &Actor, subdomain: &str) -> anyhow::Result<Uuid> {
    Ok(desk.find_organization(admin, subdomain)?.id)
}

fn label<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "?".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Bootstrap / tenants
// ---------------------------------------------------------------------------

fn cmd_bootstrap(desk: &Tripdesk, email: &str, first_name: &str, last_name: &str) -> anyhow::Result<()> {
    let user = desk.bootstrap_super_admin(email, first_name, last_name)?;
    println!("Super admin created");
    println!("  ID:     {}", user.id);
    println!("  Email:  {}", user.email);
    Ok(())
}

fn cmd_orgs(desk: &Tripdesk, admin: &Actor, action: OrgsAction) -> anyhow::Result<()> {
    match action {
        OrgsAction::List => {
            let tenants = desk.list_tenants(admin)?;
            println!("{} organization(s)", tenants.len());
            for row in tenants {
                let credits = row
                    .credit_balance
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<20} {:<10} users={:<3} quotes={:<4} bookings={:<4} credits={}",
                    row.organization.subdomain,
                    label(&row.organization.status),
                    row.users,
                    row.quotes,
                    row.bookings,
                    credits
                );
            }
        }
        OrgsAction::Show { org } => {
            let org = desk.find_organization(admin, &org)?;
            println!("{} ({})", org.name, org.id);
            println!("  Subdomain:  {}", org.subdomain);
            println!("  Status:     {}", label(&org.status));
            println!("  Currency:   {}", org.default_currency);
            println!("  Contact:    {}", org.contact_email);
            println!("  Created:    {}", org.created_at.format("%Y-%m-%d"));
        }
        OrgsAction::Suspend { org, reason } => {
            let result = desk.suspend_organization(admin, org_id(desk, admin, &org)?, &reason)?;
            println!(
                "{}: {} -> {}",
                org,
                label(&result.previous_status),
                label(&result.new_status)
            );
        }
        OrgsAction::Reactivate { org, reason } => {
            let result = desk.reactivate_organization(admin, org_id(desk, admin, &org)?, &reason)?;
            println!(
                "{}: {} -> {}",
                org,
                label(&result.previous_status),
                label(&result.new_status)
            );
        }
        OrgsAction::Cancel { org, reason } => {
            let cancelled = desk.cancel_organization(admin, org_id(desk, admin, &org)?, &reason)?;
            println!("{} is {}", cancelled.subdomain, label(&cancelled.status));
        }
        OrgsAction::Impersonate { org } => {
            let imp = desk.impersonate(admin, org_id(desk, admin, &org)?)?;
            println!("Impersonating {}", imp.organization.name);
            println!("  User:   {} ({})", imp.target.email, imp.target.id);
            println!("  Role:   {}", label(&imp.target.role));
            println!("Run operator commands with: tripdesk --as {}", imp.target.email);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

fn cmd_billing(desk: &Tripdesk, admin: &Actor, action: BillingAction) -> anyhow::Result<()> {
    match action {
        BillingAction::Pending => {
            let pending = desk.pending_credit_invoices(admin)?;
            println!("{} pending invoice(s)", pending.len());
            for invoice in pending {
                println!(
                    "  {}  {:<18} {:<12} {:>14}  due {}",
                    invoice.id,
                    invoice.invoice_number,
                    label(&invoice.kind),
                    invoice.total.to_string(),
                    invoice.due_at.format("%Y-%m-%d")
                );
            }
        }
        BillingAction::MarkPaid {
            invoice,
            method,
            reference,
            notes,
        } => {
            let paid = desk.mark_credit_invoice_paid(
                admin,
                invoice,
                PaymentConfirmation {
                    method,
                    reference,
                    notes,
                },
            )?;
            println!("{} marked paid", paid.invoice_number);
            println!("  Credited:  {}", paid.credits_to_add);
        }
        BillingAction::Cancel { invoice } => {
            let cancelled = desk.cancel_credit_invoice(admin, invoice)?;
            println!("{} cancelled", cancelled.invoice_number);
        }
        BillingAction::Adjust { org, amount, reason } => {
            let amount = platform_money(desk, &amount)?;
            let tx = desk.adjust_credits(admin, org_id(desk, admin, &org)?, amount, &reason)?;
            println!("Adjusted {}: {} -> {}", org, tx.balance_before, tx.balance_after);
        }
    }
    Ok(())
}

fn cmd_subscriptions(desk: &Tripdesk, admin: &Actor, action: SubscriptionAction) -> anyhow::Result<()> {
    match action {
        SubscriptionAction::List => {
            for sub in desk.subscriptions(admin)? {
                println!(
                    "  {}  {:<12} {:<10} credits={} price={} renews {}{}",
                    sub.id,
                    sub.plan,
                    label(&sub.status),
                    sub.monthly_credits,
                    sub.price,
                    sub.current_period_end.format("%Y-%m-%d"),
                    if sub.cancel_at_period_end { " (ending)" } else { "" }
                );
            }
        }
        SubscriptionAction::Create {
            org,
            plan,
            monthly_credits,
            price,
        } => {
            let (sub, invoice) = desk.create_subscription(
                admin,
                org_id(desk, admin, &org)?,
                NewSubscription {
                    plan,
                    monthly_credits: platform_money(desk, &monthly_credits)?,
                    price: platform_money(desk, &price)?,
                },
                Utc::now(),
            )?;
            println!("Subscription {} created", sub.id);
            println!("  Plan:     {}", sub.plan);
            println!("  Credits:  {} per period", sub.monthly_credits);
            println!("  Renews:   {}", sub.current_period_end.format("%Y-%m-%d"));
            if let Some(invoice) = invoice {
                println!("  Invoice:  {} for {}", invoice.invoice_number, invoice.total);
            }
        }
        SubscriptionAction::Cancel { subscription } => {
            let sub = desk.cancel_subscription(admin, subscription)?;
            println!(
                "Subscription {} ends {}",
                sub.id,
                sub.current_period_end.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}

fn cmd_rates(desk: &Tripdesk, admin: &Actor, action: RateAction) -> anyhow::Result<()> {
    match action {
        RateAction::List => {
            for rate in desk.usage_rates(admin)? {
                let until = rate
                    .valid_until
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "open".to_string());
                println!(
                    "  {:<24} {:>14}  {} .. {}",
                    rate.item_type,
                    rate.price_per_unit.to_string(),
                    rate.valid_from.format("%Y-%m-%d %H:%M"),
                    until
                );
            }
        }
        RateAction::Set {
            item_type,
            price,
            valid_from,
        } => {
            let item_type = item_type.unwrap_or_else(|| desk.config().billing.itinerary_item_type.clone());
            let rate = desk.set_usage_rate(
                admin,
                &item_type,
                platform_money(desk, &price)?,
                valid_from.unwrap_or_else(Utc::now),
            )?;
            println!(
                "{} costs {} from {}",
                rate.item_type,
                rate.price_per_unit,
                rate.valid_from.format("%Y-%m-%d %H:%M")
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

fn cmd_stats(desk: &Tripdesk, admin: &Actor) -> anyhow::Result<()> {
    let stats = desk.platform_stats(admin)?;
    println!("Platform statistics ({})", stats.generated_at.format("%Y-%m-%d %H:%M"));
    println!("  Organizations:     {}", stats.total_organizations);
    println!("    active:          {}", stats.organizations.active);
    println!("    trial:           {}", stats.organizations.trial);
    println!("    suspended:       {}", stats.organizations.suspended);
    println!("    cancelled:       {}", stats.organizations.cancelled);
    println!("  Users:             {}", stats.users);
    println!("  Credits held:      {}", stats.credits_outstanding);
    println!("  Pending invoices:  {}", stats.pending_invoice_total);
    println!("  Paid revenue:      {}", stats.paid_revenue);
    for (status, count) in stats.quotes_by_status {
        println!("  Quotes {:<10} {}", label(&status), count);
    }
    Ok(())
}

fn cmd_audit(desk: &Tripdesk, admin: &Actor, action: AuditAction) -> anyhow::Result<()> {
    match action {
        AuditAction::Verify => {
            let chain = desk.verify_audit(admin)?;
            println!("  Events:   {}", chain.total_events);
            println!("  Valid:    {}", chain.valid_events);
            println!("  Intact:   {}", chain.chain_intact);
            if !chain.tampered_sequences.is_empty() {
                println!("  Tampered: {:?}", chain.tampered_sequences);
            }
            if !chain.chain_intact {
                anyhow::bail!("audit chain broken");
            }
        }
        AuditAction::Trail { org, action, limit } => {
            let organization_id = org.map(|o| org_id(desk, admin, &o)).transpose()?;
            let entries = desk.audit_trail(
                admin,
                AuditFilter {
                    organization_id,
                    action,
                    limit: Some(limit),
                    ..Default::default()
                },
            )?;
            for entry in entries {
                let org = entry.organization_id.map(|o| o.to_string()).unwrap_or_else(|| "platform".to_string());
                println!(
                    "  #{:<6} {}  {:<24} {:<18} {}  org={}",
                    entry.sequence,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.action,
                    entry.resource_type,
                    entry.resource_id,
                    org
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_negative_adjustment() {
        let cli = Cli::try_parse_from([
            "tripdesk-admin",
            "--as",
            "root@tripdesk.example",
            "billing",
            "adjust",
            "--org",
            "sunway",
            "--amount",
            "-25.00",
            "--reason",
            "goodwill reversal",
        ])
        .unwrap();
        match cli.command {
            Commands::Billing {
                action: BillingAction::Adjust { amount, .. },
            } => assert_eq!(amount, "-25.00"),
            _ => panic!("expected billing adjust"),
        }
    }

    #[test]
    fn test_cli_parses_rate_with_start() {
        let cli = Cli::try_parse_from([
            "tripdesk-admin",
            "rates",
            "set",
            "--price",
            "60",
            "--valid-from",
            "2026-01-01T00:00:00Z",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Rates {
                action: RateAction::Set { valid_from: Some(_), .. }
            }
        ));
    }
}

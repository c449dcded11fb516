//! Tripdesk operator console.
//!
//! Every command loads the JSON state file, runs one operation as the staff
//! member named by `--as` and saves the state back. `public` serves the
//! customer quote link without a login and `sweep` runs the maintenance pass,
//! once or on an interval.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tripdesk_core::{AppConfig, Currency, Money};
use tripdesk_engine::{BookingTerms, GenerateItinerary, SignupRequest, SweepReport, Tripdesk};
use tripdesk_finance::{
    AgentStatus, BillTo, BillToKind, ClientFilter, ClientSource, ClientUpdate, Commission, Customer, CustomerRequest,
    InvoiceItem, NewAgent, NewClient, NewCustomerRequest, NewInvoice, NewInvoicePayment, NewPayment, NewQuote,
    NewSupplier, NewSupplierInvoice, NewSupplierPayment, PayablesFilter, SupplierKind,
};
use tripdesk_platform::validation::{CityNights, ItineraryRequest, TourType};
use tripdesk_platform::{Actor, AuditFilter, NewMember};
use tripdesk_pricing::catalog::ItemFilter;
use tripdesk_pricing::{ChildSlab, ItemKind, NewItem, Party, QuoteDay, SeasonalRate};

#[derive(Parser)]
#[command(name = "tripdesk", about = "Tripdesk travel operator console", version)]
struct Cli {
    /// JSON state file (defaults to storage.state_path)
    #[arg(long, env = "TRIPDESK_STATE", global = true)]
    state: Option<String>,

    /// Email of the staff member the command runs as
    #[arg(long = "as-user", visible_alias = "as", env = "TRIPDESK_AS_USER", global = true)]
    as_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new operator organization and its admin
    Signup(SignupArgs),
    /// Show the acting user's organization
    Org,
    /// Team members
    Team {
        #[command(subcommand)]
        action: TeamAction,
    },
    /// Hotels, tours and transfers available for itineraries
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Itinerary generation and the quote lifecycle
    Quote {
        #[command(subcommand)]
        action: QuoteAction,
    },
    /// Bookings, payments and supplier costs
    Booking {
        #[command(subcommand)]
        action: BookingAction,
    },
    /// Customer invoices (receivables)
    Invoice {
        #[command(subcommand)]
        action: InvoiceAction,
    },
    /// Suppliers and their bills (payables)
    Supplier {
        #[command(subcommand)]
        action: SupplierAction,
    },
    /// Sub-agents and their commission ledgers
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// The client register
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Inbound trip enquiries
    Request {
        #[command(subcommand)]
        action: RequestAction,
    },
    /// Conversion, revenue and destination figures
    Analytics,
    /// Prepaid platform credits
    Credits {
        #[command(subcommand)]
        action: CreditsAction,
    },
    /// The organization's audit trail
    Audit {
        #[arg(long)]
        action: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Customer-facing quote link
    Public {
        #[command(subcommand)]
        action: PublicAction,
    },
    /// Expire quotes, flag overdue invoices and roll subscriptions
    Sweep {
        /// Keep running every sweep.interval_secs
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Args)]
struct SignupArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    subdomain: String,
    #[arg(long)]
    contact_email: String,
    #[arg(long)]
    currency: Option<Currency>,
    /// Start on a trial instead of an active plan
    #[arg(long)]
    trial: bool,
    #[arg(long)]
    admin_email: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
}

#[derive(Subcommand)]
enum TeamAction {
    /// List team members
    List,
    /// Invite a member
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// org_admin or org_user
        #[arg(long, default_value = "org_user")]
        role: String,
    },
    /// Change a member's role
    Role {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        role: String,
    },
    /// Block a member from signing in
    Disable {
        #[arg(long)]
        user: Uuid,
    },
    /// Restore a disabled member
    Enable {
        #[arg(long)]
        user: Uuid,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List inventory
    List {
        #[arg(long)]
        kind: Option<ItemKind>,
        #[arg(long)]
        city: Option<String>,
        /// Include deactivated items
        #[arg(long)]
        all: bool,
    },
    /// Add an inventory item
    Add {
        #[arg(long)]
        kind: ItemKind,
        #[arg(long)]
        name: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        stars: Option<u8>,
        /// Base price in the organization currency, e.g. 120.50
        #[arg(long)]
        price: String,
    },
    /// Change an item's base price
    Price {
        #[arg(long)]
        item: Uuid,
        #[arg(long)]
        price: String,
    },
    /// Add a seasonal rate to an item
    Season {
        #[arg(long)]
        item: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        start: NaiveDate,
        /// Inclusive
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        price: String,
        #[arg(long, default_value = "0")]
        min_nights: u32,
    },
    /// Withdraw an item from new itineraries
    Deactivate {
        #[arg(long)]
        item: Uuid,
    },
    /// Show child discount slabs, or replace them from a JSON file
    ChildSlabs {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum QuoteAction {
    /// Draft and price a quote from an itinerary request (charges credits)
    Generate {
        /// Comma-separated CITY:NIGHTS, e.g. "Istanbul:2,Cappadocia:1"
        #[arg(long)]
        cities: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        adults: u32,
        /// Comma-separated child ages
        #[arg(long)]
        children: Option<String>,
        #[arg(long, default_value = "4")]
        hotel_category: u8,
        /// SIC or PRIVATE
        #[arg(long, default_value = "SIC")]
        tour_type: TourType,
        #[arg(long)]
        special_requests: Option<String>,
        #[command(flatten)]
        customer: CustomerArgs,
        #[arg(long)]
        agent: Option<Uuid>,
        /// Client register entry the quote is for
        #[arg(long)]
        client: Option<Uuid>,
        /// Retrying with the same id returns the original quote
        #[arg(long)]
        itinerary: Option<Uuid>,
    },
    /// Create an empty quote to price by hand
    Create {
        #[command(flatten)]
        customer: CustomerArgs,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        adults: u32,
        #[arg(long)]
        children: Option<String>,
        #[arg(long)]
        agent: Option<Uuid>,
        #[arg(long)]
        valid_until: Option<NaiveDate>,
    },
    /// Replace a draft's days from a JSON file and reprice it
    Price {
        #[arg(long)]
        quote: Uuid,
        #[arg(long)]
        days_file: PathBuf,
    },
    Send {
        #[arg(long)]
        quote: Uuid,
    },
    Accept {
        #[arg(long)]
        quote: Uuid,
    },
    Reject {
        #[arg(long)]
        quote: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Extend validity
    Revise {
        #[arg(long)]
        quote: Uuid,
        #[arg(long)]
        valid_until: NaiveDate,
    },
    Show {
        #[arg(long)]
        quote: Uuid,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Count quotes per status
    Pipeline,
    /// Link a quote to a client, or clear the link
    Client {
        #[arg(long)]
        quote: Uuid,
        #[arg(long)]
        client: Option<Uuid>,
    },
}

#[derive(Args)]
struct CustomerArgs {
    #[arg(long)]
    customer_name: String,
    #[arg(long)]
    customer_email: String,
    #[arg(long)]
    customer_phone: Option<String>,
}

impl CustomerArgs {
    fn into_customer(self) -> Customer {
        Customer {
            name: self.customer_name,
            email: self.customer_email,
            phone: self.customer_phone,
        }
    }
}

#[derive(Subcommand)]
enum BookingAction {
    /// Book a sent or accepted quote
    Create {
        #[arg(long)]
        quote: Uuid,
        #[arg(long)]
        deposit: Option<String>,
        #[arg(long)]
        deposit_due: Option<NaiveDate>,
        #[arg(long)]
        balance_due: Option<NaiveDate>,
    },
    /// Record a customer payment
    Pay {
        #[arg(long)]
        booking: Uuid,
        /// deposit, balance, refund or other
        #[arg(long, default_value = "balance")]
        kind: String,
        #[arg(long)]
        amount: String,
        #[command(flatten)]
        payment: PaymentArgs,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Void a recorded payment
    Void {
        #[arg(long)]
        payment: Uuid,
    },
    Start {
        #[arg(long)]
        booking: Uuid,
    },
    Complete {
        #[arg(long)]
        booking: Uuid,
    },
    Cancel {
        #[arg(long)]
        booking: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Attach a supplier cost line
    Cost {
        #[arg(long)]
        booking: Uuid,
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        supplier: Option<Uuid>,
        #[arg(long)]
        service_date: Option<NaiveDate>,
    },
    /// Remove a cost line
    Uncost {
        #[arg(long)]
        booking: Uuid,
        #[arg(long)]
        line: Uuid,
    },
    /// Revenue against supplier costs
    Margin {
        #[arg(long)]
        booking: Uuid,
    },
    /// Booking with its payments and cost lines
    Show {
        #[arg(long)]
        booking: Uuid,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Summary,
}

#[derive(Args)]
struct PaymentArgs {
    #[arg(long, default_value = "bank_transfer")]
    method: String,
    #[arg(long)]
    reference: Option<String>,
    /// Defaults to today
    #[arg(long)]
    paid_on: Option<NaiveDate>,
    /// Idempotency key; a retry with the same key is not recorded twice
    #[arg(long)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum InvoiceAction {
    /// Draft an invoice for a booking's full value
    FromBooking {
        #[arg(long)]
        booking: Uuid,
        #[arg(long, default_value = "0")]
        tax_bps: i64,
        #[arg(long, default_value = "14")]
        due_in_days: i64,
    },
    /// Draft a free-form invoice
    Create {
        #[arg(long)]
        bill_to: String,
        #[arg(long)]
        bill_to_email: Option<String>,
        /// Bill an agent instead of a customer
        #[arg(long)]
        agent: Option<Uuid>,
        /// DESCRIPTION:QTY:UNIT_PRICE, repeatable
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        #[arg(long, default_value = "0")]
        tax_bps: i64,
        #[arg(long)]
        discount: Option<String>,
        #[arg(long)]
        due: NaiveDate,
        #[arg(long)]
        booking: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Replace a draft invoice's lines
    Items {
        #[arg(long)]
        invoice: Uuid,
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        #[arg(long, default_value = "0")]
        tax_bps: i64,
        #[arg(long)]
        discount: Option<String>,
    },
    Send {
        #[arg(long)]
        invoice: Uuid,
    },
    Pay {
        #[arg(long)]
        invoice: Uuid,
        #[arg(long)]
        amount: String,
        #[command(flatten)]
        payment: PaymentArgs,
    },
    Cancel {
        #[arg(long)]
        invoice: Uuid,
    },
    Show {
        #[arg(long)]
        invoice: Uuid,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Summary,
}

#[derive(Subcommand)]
enum SupplierAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        kind: SupplierKind,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        currency: Option<Currency>,
        #[arg(long, default_value = "30")]
        terms_days: u32,
    },
    List,
    Deactivate {
        #[arg(long)]
        supplier: Uuid,
    },
    /// Record a supplier's bill
    Bill {
        #[arg(long)]
        supplier: Uuid,
        #[arg(long)]
        number: String,
        #[arg(long)]
        date: NaiveDate,
        /// Defaults to the supplier's payment terms
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long)]
        subtotal: String,
        #[arg(long)]
        tax: Option<String>,
        /// Booking the bill relates to
        #[arg(long)]
        booking: Option<Uuid>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Pay a supplier bill
    Pay {
        #[arg(long)]
        bill: Uuid,
        #[arg(long)]
        amount: String,
        #[command(flatten)]
        payment: PaymentArgs,
    },
    CancelBill {
        #[arg(long)]
        bill: Uuid,
    },
    /// Outstanding bills with due-date buckets
    Payables {
        #[arg(long)]
        supplier: Option<Uuid>,
        #[arg(long)]
        overdue: bool,
        #[arg(long)]
        currency: Option<Currency>,
        /// Defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    Add {
        #[arg(long)]
        company: String,
        #[arg(long)]
        contact: String,
        #[arg(long)]
        email: String,
        /// Percentage commission in basis points (1000 = 10%)
        #[arg(long, conflicts_with = "fixed")]
        commission_bps: Option<i64>,
        /// Fixed commission per booking
        #[arg(long)]
        fixed: Option<String>,
        #[arg(long)]
        currency: Option<Currency>,
    },
    List,
    Activate {
        #[arg(long)]
        agent: Uuid,
    },
    Deactivate {
        #[arg(long)]
        agent: Uuid,
    },
    /// Post a payment, refund or adjustment to an agent ledger
    Record {
        #[arg(long)]
        agent: Uuid,
        /// payment, refund, adjustment or commission
        #[arg(long)]
        kind: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        description: String,
    },
    Statement {
        #[arg(long)]
        agent: Uuid,
    },
    Balances,
}

#[derive(Subcommand)]
enum ClientAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        nationality: Option<String>,
        /// direct, agent, website or referral
        #[arg(long, default_value = "direct")]
        source: ClientSource,
        #[arg(long)]
        agent: Option<Uuid>,
        /// Comma-separated
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List {
        #[arg(long)]
        source: Option<ClientSource>,
        #[arg(long)]
        agent: Option<Uuid>,
        /// Matches name, email or phone
        #[arg(long)]
        search: Option<String>,
    },
    Show {
        #[arg(long)]
        client: Uuid,
    },
    Update {
        #[arg(long)]
        client: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        nationality: Option<String>,
        /// Replaces the tag list
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a client with no quotes or requests
    Remove {
        #[arg(long)]
        client: Uuid,
    },
}

#[derive(Subcommand)]
enum RequestAction {
    /// Log a customer's trip enquiry
    Submit {
        /// Comma-separated CITY:NIGHTS
        #[arg(long)]
        cities: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        adults: u32,
        #[arg(long)]
        children: Option<String>,
        #[arg(long, default_value = "4")]
        hotel_category: u8,
        #[arg(long, default_value = "SIC")]
        tour_type: TourType,
        #[arg(long)]
        special_requests: Option<String>,
        #[command(flatten)]
        customer: CustomerArgs,
        #[arg(long)]
        client: Option<Uuid>,
        #[arg(long)]
        agent: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Show {
        #[arg(long)]
        request: Uuid,
    },
    /// Generate the itinerary and draft quote (charges credits once)
    Quote {
        #[arg(long)]
        request: Uuid,
    },
    Confirm {
        #[arg(long)]
        request: Uuid,
    },
    Complete {
        #[arg(long)]
        request: Uuid,
    },
    Cancel {
        #[arg(long)]
        request: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reprice every draft quote against current inventory
    Recalculate,
}

#[derive(Subcommand)]
enum CreditsAction {
    Balance,
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Request a credit top-up invoice
    Buy {
        #[arg(long)]
        amount: String,
    },
    Invoices,
}

#[derive(Subcommand)]
enum PublicAction {
    View {
        #[arg(long)]
        token: String,
        /// Caller identity used for rate limiting
        #[arg(long, default_value = "cli")]
        client: String,
    },
    Accept {
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "cli")]
        client: String,
    },
    Reject {
        #[arg(long)]
        token: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, default_value = "cli")]
        client: String,
    },
}

/// The acting staff member and their organization.
struct Session<'a> {
    desk: &'a Tripdesk,
    actor: Actor,
    org: Uuid,
    currency: Currency,
}

impl<'a> Session<'a> {
    fn open(desk: &'a Tripdesk, email: Option<&str>) -> anyhow::Result<Self> {
        let email = email.context("no acting user: pass --as-user <email> or set TRIPDESK_AS_USER")?;
        let actor = desk.actor_by_email(email)?;
        let org = actor.home_org()?;
        let currency = desk.organization(&actor, org)?.default_currency;
        Ok(Self {
            desk,
            actor,
            org,
            currency,
        })
    }

    fn money(&self, amount: &str) -> anyhow::Result<Money> {
        Ok(Money::parse(amount, self.currency)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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

    if let Commands::Sweep { watch } = cli.command {
        return cmd_sweep(config, watch).await;
    }

    let state_path = config.storage.state_path.clone();
    let desk = Tripdesk::load(config, &state_path)?;
    let as_user = cli.as_user.as_deref();
    let session = || Session::open(&desk, as_user);

    match cli.command {
        Commands::Signup(args) => cmd_signup(&desk, args)?,
        Commands::Public { action } => cmd_public(&desk, action)?,
        Commands::Org => cmd_org(&session()?)?,
        Commands::Team { action } => cmd_team(&session()?, action)?,
        Commands::Catalog { action } => cmd_catalog(&session()?, action)?,
        Commands::Quote { action } => cmd_quote(&session()?, action)?,
        Commands::Booking { action } => cmd_booking(&session()?, action)?,
        Commands::Invoice { action } => cmd_invoice(&session()?, action)?,
        Commands::Supplier { action } => cmd_supplier(&session()?, action)?,
        Commands::Agent { action } => cmd_agent(&session()?, action)?,
        Commands::Client { action } => cmd_client(&session()?, action)?,
        Commands::Request { action } => cmd_request(&session()?, action)?,
        Commands::Analytics => cmd_analytics(&session()?)?,
        Commands::Credits { action } => cmd_credits(&session()?, action)?,
        Commands::Audit { action, limit } => cmd_audit(&session()?, action, limit)?,
        Commands::Sweep { .. } => {}
    }

    desk.save(&state_path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The wire name of a status or kind enum.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "?".to_string(),
    }
}

/// Parse a snake_case status or kind name into its enum.
fn parse_label<T: DeserializeOwned>(what: &str, value: &str) -> anyhow::Result<T> {
    let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized)).with_context(|| format!("unknown {what} '{value}'"))
}

fn parse_city_nights(input: &str) -> anyhow::Result<Vec<CityNights>> {
    input.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (city, nights) = part
                .split_once(':')
                .with_context(|| format!("expected CITY:NIGHTS, got '{part}'"))?;
            let nights = nights
                .trim()
                .parse()
                .with_context(|| format!("invalid nights in '{part}'"))?;
            Ok(CityNights {
                city: city.trim().to_string(),
                nights,
            })
        })
        .collect()
}

fn parse_ages(ages: Option<&str>) -> anyhow::Result<Vec<u32>> {
    let Some(ages) = ages else {
        return Ok(Vec::new());
    };
    ages.split(',')
        .filter(|a| !a.trim().is_empty())
        .map(|a| a.trim().parse().with_context(|| format!("invalid child age '{a}'")))
        .collect()
}

/// `DESCRIPTION:QTY:UNIT_PRICE`; the description may itself contain colons.
fn parse_items(items: &[String], currency: Currency) -> anyhow::Result<Vec<InvoiceItem>> {
    items
        .iter()
        .map(|item| {
            let mut parts = item.rsplitn(3, ':');
            let (Some(price), Some(quantity), Some(description)) = (parts.next(), parts.next(), parts.next()) else {
                bail!("expected DESCRIPTION:QTY:UNIT_PRICE, got '{item}'");
            };
            Ok(InvoiceItem {
                description: description.trim().to_string(),
                quantity: quantity
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid quantity in '{item}'"))?,
                unit_price: Money::parse(price, currency)?,
            })
        })
        .collect()
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ---------------------------------------------------------------------------
// Signup / organization / team
// ---------------------------------------------------------------------------

fn cmd_signup(desk: &Tripdesk, args: SignupArgs) -> anyhow::Result<()> {
    let signup = desk.signup_operator(SignupRequest {
        organization_name: args.name,
        subdomain: args.subdomain,
        contact_email: args.contact_email,
        default_currency: args.currency,
        trial: args.trial,
        admin_email: args.admin_email,
        admin_first_name: args.first_name,
        admin_last_name: args.last_name,
    })?;

    println!("Organization created");
    println!("  ID:         {}", signup.organization.id);
    println!("  Name:       {}", signup.organization.name);
    println!("  Subdomain:  {}", signup.organization.subdomain);
    println!("  Status:     {}", label(&signup.organization.status));
    println!("  Currency:   {}", signup.organization.default_currency);
    println!("  Admin:      {} ({})", signup.admin.email, signup.admin.id);
    println!("  Credits:    {}", signup.credit_account.balance);
    if let Some(bonus) = signup.bonus {
        println!("  Bonus:      {}", bonus.amount);
    }
    Ok(())
}

fn cmd_org(s: &Session) -> anyhow::Result<()> {
    let org = s.desk.organization(&s.actor, s.org)?;
    println!("{} ({})", org.name, org.id);
    println!("  Subdomain:  {}", org.subdomain);
    println!("  Status:     {}", label(&org.status));
    println!("  Currency:   {}", org.default_currency);
    println!("  Contact:    {}", org.contact_email);
    Ok(())
}

fn cmd_team(s: &Session, action: TeamAction) -> anyhow::Result<()> {
    match action {
        TeamAction::List => {
            for user in s.desk.team(&s.actor, s.org)? {
                println!(
                    "  {}  {:<32} {:<10} {:<9} {} {}",
                    user.id,
                    user.email,
                    label(&user.role),
                    label(&user.status),
                    user.first_name,
                    user.last_name
                );
            }
        }
        TeamAction::Add {
            email,
            first_name,
            last_name,
            role,
        } => {
            let user = s.desk.add_team_member(
                &s.actor,
                s.org,
                NewMember {
                    email,
                    first_name,
                    last_name,
                    role: parse_label("role", &role)?,
                },
            )?;
            println!("Member added: {} ({}) as {}", user.email, user.id, label(&user.role));
        }
        TeamAction::Role { user, role } => {
            let user = s.desk.change_member_role(&s.actor, user, parse_label("role", &role)?)?;
            println!("{} is now {}", user.email, label(&user.role));
        }
        TeamAction::Disable { user } => {
            let user = s.desk.disable_member(&s.actor, user)?;
            println!("{} disabled", user.email);
        }
        TeamAction::Enable { user } => {
            let user = s.desk.enable_member(&s.actor, user)?;
            println!("{} enabled", user.email);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

fn cmd_catalog(s: &Session, action: CatalogAction) -> anyhow::Result<()> {
    match action {
        CatalogAction::List { kind, city, all } => {
            let filter = ItemFilter {
                kind,
                city,
                include_inactive: all,
            };
            for item in s.desk.inventory(&s.actor, s.org, &filter)? {
                let stars = item.stars.map(|n| format!("{n}*")).unwrap_or_default();
                println!(
                    "  {}  {:<10} {:<28} {:<14} {:>3} {:>14}{}",
                    item.id,
                    label(&item.kind),
                    item.name,
                    item.city,
                    stars,
                    item.base_price.to_string(),
                    if item.active { "" } else { "  (inactive)" }
                );
            }
        }
        CatalogAction::Add {
            kind,
            name,
            city,
            stars,
            price,
        } => {
            let item = s.desk.add_inventory_item(
                &s.actor,
                s.org,
                NewItem {
                    kind,
                    name,
                    city,
                    stars,
                    base_price: s.money(&price)?,
                },
            )?;
            println!("Item added: {} ({}) at {}", item.name, item.id, item.base_price);
        }
        CatalogAction::Price { item, price } => {
            let item = s.desk.update_item_price(&s.actor, item, s.money(&price)?)?;
            println!("{} now {}", item.name, item.base_price);
        }
        CatalogAction::Season {
            item,
            name,
            start,
            end,
            price,
            min_nights,
        } => {
            let item = s.desk.add_item_season(
                &s.actor,
                item,
                SeasonalRate {
                    name,
                    start,
                    end,
                    price: s.money(&price)?,
                    min_stay_nights: min_nights,
                },
            )?;
            println!("{} has {} seasonal rate(s)", item.name, item.seasons.len());
        }
        CatalogAction::Deactivate { item } => {
            let item = s.desk.deactivate_item(&s.actor, item)?;
            println!("{} deactivated", item.name);
        }
        CatalogAction::ChildSlabs { file } => {
            if let Some(file) = file {
                let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
                let slabs: Vec<ChildSlab> = serde_json::from_str(&raw)?;
                s.desk.set_child_slabs(&s.actor, s.org, slabs)?;
            }
            print_json(&s.desk.child_slabs(&s.actor, s.org)?)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

fn print_quote_line(quote: &tripdesk_finance::Quote) {
    println!(
        "  {}  {:<16} {:<10} {:<28} {:>14}  valid until {}",
        quote.id,
        quote.quote_number,
        label(&quote.status),
        quote.destination,
        quote.total.to_string(),
        quote.valid_until
    );
}

fn cmd_quote(s: &Session, action: QuoteAction) -> anyhow::Result<()> {
    match action {
        QuoteAction::Generate {
            cities,
            start,
            adults,
            children,
            hotel_category,
            tour_type,
            special_requests,
            customer,
            agent,
            client,
            itinerary,
        } => {
            let quote = s.desk.generate_itinerary(
                &s.actor,
                s.org,
                GenerateItinerary {
                    request: ItineraryRequest {
                        city_nights: parse_city_nights(&cities)?,
                        start_date: start,
                        adults,
                        children_ages: parse_ages(children.as_deref())?,
                        hotel_category,
                        tour_type,
                        special_requests,
                    },
                    customer: customer.into_customer(),
                    agent_id: agent,
                    client_id: client,
                    itinerary_id: itinerary,
                },
            )?;
            println!("Quote generated");
            println!("  ID:       {}", quote.id);
            println!("  Number:   {}", quote.quote_number);
            println!("  Days:     {}", quote.days.len());
            println!("  Total:    {}", quote.total);
            println!("  Token:    {}", quote.public_token);
            let account = s.desk.credit_account(&s.actor, s.org)?;
            println!("  Credits:  {}", account.balance);
        }
        QuoteAction::Create {
            customer,
            destination,
            start,
            end,
            adults,
            children,
            agent,
            valid_until,
        } => {
            let quote = s.desk.create_quote(
                &s.actor,
                s.org,
                NewQuote {
                    created_by: s.actor.user_id,
                    customer: customer.into_customer(),
                    destination,
                    start_date: start,
                    end_date: end,
                    party: Party {
                        adults,
                        children_ages: parse_ages(children.as_deref())?,
                    },
                    agent_id: agent,
                    currency: s.currency,
                    valid_until,
                },
            )?;
            println!("Quote {} created ({})", quote.quote_number, quote.id);
        }
        QuoteAction::Price { quote, days_file } => {
            let raw = std::fs::read_to_string(&days_file)
                .with_context(|| format!("reading {}", days_file.display()))?;
            let days: Vec<QuoteDay> = serde_json::from_str(&raw)?;
            let quote = s.desk.price_quote(&s.actor, quote, days)?;
            println!("{} priced at {}", quote.quote_number, quote.total);
        }
        QuoteAction::Send { quote } => {
            let quote = s.desk.send_quote(&s.actor, quote)?;
            println!("{} sent; public token {}", quote.quote_number, quote.public_token);
        }
        QuoteAction::Accept { quote } => {
            let quote = s.desk.accept_quote(&s.actor, quote)?;
            println!("{} accepted", quote.quote_number);
        }
        QuoteAction::Reject { quote, reason } => {
            let quote = s.desk.reject_quote(&s.actor, quote, reason)?;
            println!("{} rejected", quote.quote_number);
        }
        QuoteAction::Revise { quote, valid_until } => {
            let quote = s.desk.revise_quote(&s.actor, quote, valid_until)?;
            println!("{} valid until {}", quote.quote_number, quote.valid_until);
        }
        QuoteAction::Show { quote } => print_json(&s.desk.get_quote(&s.actor, quote)?)?,
        QuoteAction::List { status } => {
            let status = status.map(|st| parse_label("quote status", &st)).transpose()?;
            for quote in s.desk.list_quotes(&s.actor, s.org, status)? {
                print_quote_line(&quote);
            }
        }
        QuoteAction::Pipeline => {
            for (status, count) in s.desk.quote_pipeline(&s.actor, s.org)? {
                println!("  {:<10} {}", label(&status), count);
            }
        }
        QuoteAction::Client { quote, client } => {
            let quote = s.desk.assign_quote_client(&s.actor, quote, client)?;
            match quote.client_id {
                Some(client) => println!("{} linked to client {}", quote.quote_number, client),
                None => println!("{} has no client", quote.quote_number),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Clients / customer requests / analytics
// ---------------------------------------------------------------------------

fn parse_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| t.split(',').map(|tag| tag.trim().to_string()).filter(|tag| !tag.is_empty()).collect())
        .unwrap_or_default()
}

fn cmd_client(s: &Session, action: ClientAction) -> anyhow::Result<()> {
    match action {
        ClientAction::Add {
            name,
            email,
            phone,
            country,
            nationality,
            source,
            agent,
            tags,
            notes,
        } => {
            let client = s.desk.add_client(
                &s.actor,
                s.org,
                NewClient {
                    agent_id: agent,
                    name,
                    email,
                    phone,
                    country,
                    nationality,
                    source,
                    tags: parse_tags(tags.as_deref()),
                    notes,
                },
            )?;
            println!("Client {} added ({})", client.name, client.id);
        }
        ClientAction::List { source, agent, search } => {
            let register = s.desk.list_clients(
                &s.actor,
                s.org,
                &ClientFilter {
                    source,
                    agent_id: agent,
                    search,
                },
            )?;
            for entry in &register.clients {
                println!(
                    "  {}  {:<28} {:<9} quotes {:<3} requests {:<3} spent {}",
                    entry.client.id,
                    entry.client.name,
                    label(&entry.client.source),
                    entry.total_quotes,
                    entry.total_requests,
                    entry.total_spent
                );
            }
            let c = &register.counts;
            println!(
                "Total {}: direct {}, agent {}, website {}, referral {}",
                c.total, c.direct, c.agent, c.website, c.referral
            );
        }
        ClientAction::Show { client } => print_json(&s.desk.get_client(&s.actor, client)?)?,
        ClientAction::Update {
            client,
            name,
            email,
            phone,
            country,
            nationality,
            tags,
            notes,
        } => {
            let client = s.desk.update_client(
                &s.actor,
                client,
                ClientUpdate {
                    name,
                    email,
                    phone,
                    country,
                    nationality,
                    tags: tags.as_deref().map(|t| parse_tags(Some(t))),
                    notes,
                },
            )?;
            println!("Client {} updated", client.name);
        }
        ClientAction::Remove { client } => {
            let client = s.desk.remove_client(&s.actor, client)?;
            println!("Client {} removed", client.name);
        }
    }
    Ok(())
}

fn print_request_line(request: &CustomerRequest) {
    println!(
        "  {}  {:<14} {:<10} {:<24} {} {}",
        request.id,
        request.reference,
        label(&request.status),
        request.customer.name,
        request.itinerary.start_date,
        request.quote_id.map(|q| q.to_string()).unwrap_or_default()
    );
}

fn cmd_request(s: &Session, action: RequestAction) -> anyhow::Result<()> {
    match action {
        RequestAction::Submit {
            cities,
            start,
            adults,
            children,
            hotel_category,
            tour_type,
            special_requests,
            customer,
            client,
            agent,
            notes,
        } => {
            let request = s.desk.submit_customer_request(
                &s.actor,
                s.org,
                NewCustomerRequest {
                    customer: customer.into_customer(),
                    itinerary: ItineraryRequest {
                        city_nights: parse_city_nights(&cities)?,
                        start_date: start,
                        adults,
                        children_ages: parse_ages(children.as_deref())?,
                        hotel_category,
                        tour_type,
                        special_requests,
                    },
                    client_id: client,
                    agent_id: agent,
                    notes,
                },
            )?;
            println!("Request {} received ({})", request.reference, request.id);
        }
        RequestAction::List { status } => {
            let status = status.map(|st| parse_label("request status", &st)).transpose()?;
            let (requests, stats) = s.desk.list_customer_requests(&s.actor, s.org, status)?;
            for request in &requests {
                print_request_line(request);
            }
            println!(
                "Total {}: pending {}, quoted {}, confirmed {}, completed {}, cancelled {}",
                stats.total, stats.pending, stats.quoted, stats.confirmed, stats.completed, stats.cancelled
            );
        }
        RequestAction::Show { request } => print_json(&s.desk.get_customer_request(&s.actor, request)?)?,
        RequestAction::Quote { request } => {
            let (request, quote) = s.desk.quote_customer_request(&s.actor, request)?;
            println!("{} quoted as {} at {}", request.reference, quote.quote_number, quote.total);
        }
        RequestAction::Confirm { request } => {
            let request = s.desk.confirm_customer_request(&s.actor, request)?;
            println!("{} confirmed", request.reference);
        }
        RequestAction::Complete { request } => {
            let request = s.desk.complete_customer_request(&s.actor, request)?;
            println!("{} completed", request.reference);
        }
        RequestAction::Cancel { request, reason } => {
            let request = s.desk.cancel_customer_request(&s.actor, request, reason)?;
            println!("{} cancelled", request.reference);
        }
        RequestAction::Recalculate => {
            let report = s.desk.recalculate_customer_requests(&s.actor, s.org)?;
            println!("Repriced {} of {} draft quotes", report.updated, report.total);
            for e in &report.errors {
                println!("  error: {e}");
            }
        }
    }
    Ok(())
}

fn cmd_analytics(s: &Session) -> anyhow::Result<()> {
    let a = s.desk.organization_analytics(&s.actor, s.org)?;
    println!("Quotes:      {} ({} open, {} accepted, {} rejected)", a.total_quotes, a.open_quotes, a.accepted_quotes, a.rejected_quotes);
    println!("Bookings:    {}", a.total_bookings);
    println!("Conversion:  {}.{:02}%", a.conversion_rate_bps / 100, a.conversion_rate_bps % 100);
    println!("Revenue:     {} ({} collected)", a.booked_revenue, a.collected);
    println!("Travellers:  {}", a.travellers_booked);
    println!("Top destinations");
    for d in &a.top_destinations {
        println!("  {:<32} quotes {:<4} accepted {:<4} {}", d.destination, d.quotes, d.accepted, d.total_value);
    }
    println!("Monthly revenue");
    for m in &a.monthly_revenue {
        println!("  {}  {:<4} {}", m.month, m.bookings, m.revenue);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

fn cmd_booking(s: &Session, action: BookingAction) -> anyhow::Result<()> {
    match action {
        BookingAction::Create {
            quote,
            deposit,
            deposit_due,
            balance_due,
        } => {
            let booking = s.desk.create_booking_from_quote(
                &s.actor,
                quote,
                BookingTerms {
                    deposit_amount: deposit.as_deref().map(|d| s.money(d)).transpose()?,
                    deposit_due,
                    balance_due_date: balance_due,
                },
            )?;
            println!("Booking created");
            println!("  ID:       {}", booking.id);
            println!("  Number:   {}", booking.booking_number);
            println!("  Total:    {}", booking.total);
            println!("  Deposit:  {}", booking.deposit_amount);
        }
        BookingAction::Pay {
            booking,
            kind,
            amount,
            payment,
            notes,
        } => {
            let (booking, recorded) = s.desk.record_booking_payment(
                &s.actor,
                booking,
                NewPayment {
                    kind: parse_label("payment kind", &kind)?,
                    amount: s.money(&amount)?,
                    method: payment.method,
                    reference: payment.reference,
                    paid_on: payment.paid_on.unwrap_or_else(today),
                    notes,
                    recorded_by: s.actor.user_id,
                    idempotency_key: payment.key,
                },
            )?;
            println!(
                "Payment {} of {} recorded; {} is {}",
                recorded.id,
                recorded.amount,
                booking.booking_number,
                label(&booking.status)
            );
        }
        BookingAction::Void { payment } => {
            let (booking, voided) = s.desk.void_booking_payment(&s.actor, payment)?;
            println!(
                "Payment {} voided; {} is {}",
                voided.id,
                booking.booking_number,
                label(&booking.status)
            );
        }
        BookingAction::Start { booking } => {
            let booking = s.desk.start_booking(&s.actor, booking)?;
            println!("{} in progress", booking.booking_number);
        }
        BookingAction::Complete { booking } => {
            let booking = s.desk.complete_booking(&s.actor, booking)?;
            println!("{} completed", booking.booking_number);
        }
        BookingAction::Cancel { booking, reason } => {
            let booking = s.desk.cancel_booking(&s.actor, booking, &reason)?;
            println!("{} cancelled", booking.booking_number);
        }
        BookingAction::Cost {
            booking,
            description,
            amount,
            supplier,
            service_date,
        } => {
            let line = s.desk.add_booking_cost(
                &s.actor,
                booking,
                supplier,
                &description,
                service_date,
                s.money(&amount)?,
            )?;
            println!("Cost line {} added: {}", line.id, line.amount);
        }
        BookingAction::Uncost { booking, line } => {
            let line = s.desk.remove_booking_cost(&s.actor, booking, line)?;
            println!("Cost line {} removed", line.id);
        }
        BookingAction::Margin { booking } => {
            let margin = s.desk.booking_margin(&s.actor, booking)?;
            println!("  Total:    {}", margin.total);
            println!("  Costs:    {}", margin.costs);
            println!("  Margin:   {} ({}.{:02}%)", margin.margin, margin.margin_bps / 100, (margin.margin_bps % 100).abs());
        }
        BookingAction::Show { booking } => {
            print_json(&serde_json::json!({
                "booking": s.desk.get_booking(&s.actor, booking)?,
                "payments": s.desk.booking_payments(&s.actor, booking)?,
                "costs": s.desk.booking_costs(&s.actor, booking)?,
            }))?;
        }
        BookingAction::List { status } => {
            let status = status.map(|st| parse_label("booking status", &st)).transpose()?;
            for booking in s.desk.list_bookings(&s.actor, s.org, status)? {
                println!(
                    "  {}  {:<16} {:<16} {:<24} {:>14}  {}",
                    booking.id,
                    booking.booking_number,
                    label(&booking.status),
                    booking.customer.name,
                    booking.total.to_string(),
                    booking.start_date
                );
            }
        }
        BookingAction::Summary => print_json(&s.desk.booking_summary(&s.actor, s.org)?)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Receivables
// ---------------------------------------------------------------------------

fn cmd_invoice(s: &Session, action: InvoiceAction) -> anyhow::Result<()> {
    match action {
        InvoiceAction::FromBooking {
            booking,
            tax_bps,
            due_in_days,
        } => {
            let invoice = s.desk.invoice_booking(&s.actor, booking, tax_bps, due_in_days)?;
            println!("Invoice {} drafted ({}) for {}", invoice.invoice_number, invoice.id, invoice.total);
        }
        InvoiceAction::Create {
            bill_to,
            bill_to_email,
            agent,
            items,
            tax_bps,
            discount,
            due,
            booking,
            notes,
        } => {
            let invoice = s.desk.create_invoice(
                &s.actor,
                s.org,
                NewInvoice {
                    booking_id: booking,
                    bill_to: BillTo {
                        kind: if agent.is_some() {
                            BillToKind::Agent
                        } else {
                            BillToKind::Customer
                        },
                        id: agent,
                        name: bill_to,
                        email: bill_to_email,
                        address: None,
                    },
                    currency: s.currency,
                    items: parse_items(&items, s.currency)?,
                    tax_rate_bps: tax_bps,
                    discount: discount.as_deref().map(|d| s.money(d)).transpose()?.unwrap_or(Money::zero(s.currency)),
                    issued_on: today(),
                    due_on: due,
                    notes,
                    terms: None,
                },
            )?;
            println!("Invoice {} drafted ({}) for {}", invoice.invoice_number, invoice.id, invoice.total);
        }
        InvoiceAction::Items {
            invoice,
            items,
            tax_bps,
            discount,
        } => {
            let invoice = s.desk.update_invoice_items(
                &s.actor,
                invoice,
                parse_items(&items, s.currency)?,
                tax_bps,
                discount.as_deref().map(|d| s.money(d)).transpose()?.unwrap_or(Money::zero(s.currency)),
            )?;
            println!("{} now totals {}", invoice.invoice_number, invoice.total);
        }
        InvoiceAction::Send { invoice } => {
            let invoice = s.desk.send_invoice(&s.actor, invoice)?;
            println!("{} sent, due {}", invoice.invoice_number, invoice.due_on);
        }
        InvoiceAction::Pay {
            invoice,
            amount,
            payment,
        } => {
            let invoice = s.desk.record_invoice_payment(
                &s.actor,
                invoice,
                NewInvoicePayment {
                    amount: s.money(&amount)?,
                    method: payment.method,
                    reference: payment.reference,
                    paid_on: payment.paid_on.unwrap_or_else(today),
                    recorded_by: s.actor.user_id,
                    idempotency_key: payment.key,
                },
            )?;
            println!(
                "{} is {}; balance due {}",
                invoice.invoice_number,
                label(&invoice.status),
                invoice.balance_due
            );
        }
        InvoiceAction::Cancel { invoice } => {
            let invoice = s.desk.cancel_invoice(&s.actor, invoice)?;
            println!("{} cancelled", invoice.invoice_number);
        }
        InvoiceAction::Show { invoice } => print_json(&s.desk.get_invoice(&s.actor, invoice)?)?,
        InvoiceAction::List { status } => {
            let status = status.map(|st| parse_label("invoice status", &st)).transpose()?;
            for invoice in s.desk.list_invoices(&s.actor, s.org, status)? {
                println!(
                    "  {}  {:<16} {:<14} {:<24} {:>14} {:>14}  due {}",
                    invoice.id,
                    invoice.invoice_number,
                    label(&invoice.status),
                    invoice.bill_to.name,
                    invoice.total.to_string(),
                    invoice.balance_due.to_string(),
                    invoice.due_on
                );
            }
        }
        InvoiceAction::Summary => print_json(&s.desk.receivables_summary(&s.actor, s.org)?)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Payables
// ---------------------------------------------------------------------------

fn supplier_currency(s: &Session, supplier_id: Uuid) -> anyhow::Result<Currency> {
    s.desk
        .list_suppliers(&s.actor, s.org)?
        .into_iter()
        .find(|supplier| supplier.id == supplier_id)
        .map(|supplier| supplier.currency)
        .with_context(|| format!("supplier {supplier_id} not found"))
}

fn bill_currency(s: &Session, bill_id: Uuid) -> anyhow::Result<Currency> {
    let payables = s.desk.payables(&s.actor, s.org, &PayablesFilter::default(), today())?;
    payables
        .invoices
        .into_iter()
        .find(|bill| bill.id == bill_id)
        .map(|bill| bill.total.currency)
        .with_context(|| format!("no open supplier bill {bill_id}"))
}

fn cmd_supplier(s: &Session, action: SupplierAction) -> anyhow::Result<()> {
    match action {
        SupplierAction::Add {
            name,
            kind,
            email,
            currency,
            terms_days,
        } => {
            let supplier = s.desk.add_supplier(
                &s.actor,
                s.org,
                NewSupplier {
                    name,
                    kind,
                    email,
                    currency: currency.unwrap_or(s.currency),
                    payment_terms_days: terms_days,
                },
            )?;
            println!("Supplier {} added ({})", supplier.name, supplier.id);
        }
        SupplierAction::List => {
            for supplier in s.desk.list_suppliers(&s.actor, s.org)? {
                println!(
                    "  {}  {:<28} {:<10} {} net {}{}",
                    supplier.id,
                    supplier.name,
                    label(&supplier.kind),
                    supplier.currency,
                    supplier.payment_terms_days,
                    if supplier.active { "" } else { "  (inactive)" }
                );
            }
        }
        SupplierAction::Deactivate { supplier } => {
            let supplier = s.desk.deactivate_supplier(&s.actor, supplier)?;
            println!("{} deactivated", supplier.name);
        }
        SupplierAction::Bill {
            supplier,
            number,
            date,
            due,
            subtotal,
            tax,
            booking,
            description,
        } => {
            let currency = supplier_currency(s, supplier)?;
            let bill = s.desk.record_supplier_invoice(
                &s.actor,
                NewSupplierInvoice {
                    supplier_id: supplier,
                    invoice_number: number,
                    invoice_date: date,
                    due_date: due,
                    subtotal: Money::parse(&subtotal, currency)?,
                    tax: match tax {
                        Some(tax) => Money::parse(&tax, currency)?,
                        None => Money::zero(currency),
                    },
                    reference: booking,
                    description,
                },
            )?;
            println!("Bill {} recorded ({}) for {}, due {}", bill.invoice_number, bill.id, bill.total, bill.due_date);
        }
        SupplierAction::Pay { bill, amount, payment } => {
            let currency = bill_currency(s, bill)?;
            let bill = s.desk.record_supplier_payment(
                &s.actor,
                bill,
                NewSupplierPayment {
                    amount: Money::parse(&amount, currency)?,
                    method: payment.method,
                    reference: payment.reference,
                    paid_on: payment.paid_on.unwrap_or_else(today),
                    recorded_by: s.actor.user_id,
                    idempotency_key: payment.key,
                },
            )?;
            println!(
                "{} is {}; paid {} of {}",
                bill.invoice_number,
                label(&bill.status),
                bill.amount_paid,
                bill.total
            );
        }
        SupplierAction::CancelBill { bill } => {
            let bill = s.desk.cancel_supplier_invoice(&s.actor, bill)?;
            println!("{} cancelled", bill.invoice_number);
        }
        SupplierAction::Payables {
            supplier,
            overdue,
            currency,
            as_of,
        } => {
            let filter = PayablesFilter {
                supplier_id: supplier,
                overdue_only: overdue,
                currency,
            };
            print_json(&s.desk.payables(&s.actor, s.org, &filter, as_of.unwrap_or_else(today))?)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

fn cmd_agent(s: &Session, action: AgentAction) -> anyhow::Result<()> {
    match action {
        AgentAction::Add {
            company,
            contact,
            email,
            commission_bps,
            fixed,
            currency,
        } => {
            let currency = currency.unwrap_or(s.currency);
            let commission = match (commission_bps, fixed) {
                (Some(bps), None) => Commission::Percentage { bps },
                (None, Some(amount)) => Commission::Fixed {
                    amount: Money::parse(&amount, currency)?,
                },
                _ => bail!("pass exactly one of --commission-bps or --fixed"),
            };
            let agent = s.desk.add_agent(
                &s.actor,
                s.org,
                NewAgent {
                    company_name: company,
                    contact_person: contact,
                    email,
                    commission,
                    currency,
                },
            )?;
            println!("Agent {} added ({})", agent.company_name, agent.id);
        }
        AgentAction::List => {
            for agent in s.desk.list_agents(&s.actor, s.org)? {
                let commission = match agent.commission {
                    Commission::Percentage { bps } => format!("{}.{:02}%", bps / 100, bps % 100),
                    Commission::Fixed { amount } => amount.to_string(),
                };
                println!(
                    "  {}  {:<28} {:<24} {:<10} {}",
                    agent.id,
                    agent.company_name,
                    agent.email,
                    commission,
                    label(&agent.status)
                );
            }
        }
        AgentAction::Activate { agent } => {
            let agent = s.desk.set_agent_status(&s.actor, agent, AgentStatus::Active)?;
            println!("{} active", agent.company_name);
        }
        AgentAction::Deactivate { agent } => {
            let agent = s.desk.set_agent_status(&s.actor, agent, AgentStatus::Inactive)?;
            println!("{} inactive", agent.company_name);
        }
        AgentAction::Record {
            agent,
            kind,
            amount,
            reference,
            description,
        } => {
            let currency = s
                .desk
                .list_agents(&s.actor, s.org)?
                .into_iter()
                .find(|a| a.id == agent)
                .map(|a| a.currency)
                .with_context(|| format!("agent {agent} not found"))?;
            let entry = s.desk.record_agent_transaction(
                &s.actor,
                agent,
                parse_label("transaction kind", &kind)?,
                Money::parse(&amount, currency)?,
                reference,
                &description,
            )?;
            println!("Posted {} {}; balance {}", label(&entry.kind), entry.amount, entry.running_balance);
        }
        AgentAction::Statement { agent } => {
            for entry in s.desk.agent_statement(&s.actor, agent)? {
                println!(
                    "  {}  {:<11} {:>14} {:>14}  {}",
                    entry.transaction_date,
                    label(&entry.kind),
                    entry.amount.to_string(),
                    entry.running_balance.to_string(),
                    entry.description
                );
            }
        }
        AgentAction::Balances => print_json(&s.desk.agent_balances(&s.actor, s.org)?)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credits / audit
// ---------------------------------------------------------------------------

fn cmd_credits(s: &Session, action: CreditsAction) -> anyhow::Result<()> {
    match action {
        CreditsAction::Balance => {
            let account = s.desk.credit_account(&s.actor, s.org)?;
            println!("  Balance:    {}", account.balance);
            println!("  Purchased:  {}", account.total_purchased);
            println!("  Spent:      {}", account.total_spent);
        }
        CreditsAction::History { limit, offset } => {
            for tx in s.desk.credit_history(&s.actor, s.org, limit, offset)? {
                println!(
                    "  {}  {:<10} {:>14} {:>14}  {}",
                    tx.created_at.format("%Y-%m-%d %H:%M"),
                    label(&tx.kind),
                    tx.amount.to_string(),
                    tx.balance_after.to_string(),
                    tx.description
                );
            }
        }
        CreditsAction::Buy { amount } => {
            let amount = Money::parse(&amount, s.desk.config().billing.currency)?;
            let invoice = s.desk.purchase_credits(&s.actor, s.org, amount)?;
            println!("Credit invoice issued");
            println!("  Number:   {}", invoice.invoice_number);
            println!("  Amount:   {}", invoice.amount);
            println!("  Tax:      {}", invoice.tax_amount);
            println!("  Total:    {}", invoice.total);
            println!("  Credits:  {} once paid", invoice.credits_to_add);
            println!("  Due:      {}", invoice.due_at.format("%Y-%m-%d"));
        }
        CreditsAction::Invoices => {
            for invoice in s.desk.credit_invoices(&s.actor, s.org)? {
                println!(
                    "  {}  {:<18} {:<12} {:<9} {:>14}",
                    invoice.id,
                    invoice.invoice_number,
                    label(&invoice.kind),
                    label(&invoice.status),
                    invoice.total.to_string()
                );
            }
        }
    }
    Ok(())
}

fn cmd_audit(s: &Session, action: Option<String>, limit: usize) -> anyhow::Result<()> {
    let entries = s.desk.audit_trail(
        &s.actor,
        AuditFilter {
            organization_id: Some(s.org),
            action,
            limit: Some(limit),
            ..Default::default()
        },
    )?;
    for entry in entries {
        println!(
            "  #{:<6} {}  {:<24} {:<18} {}",
            entry.sequence,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            entry.resource_type,
            entry.resource_id
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public quote link
// ---------------------------------------------------------------------------

fn cmd_public(desk: &Tripdesk, action: PublicAction) -> anyhow::Result<()> {
    let now = Utc::now();
    let quote = match action {
        PublicAction::View { token, client } => desk.public_view(&token, &client, now)?,
        PublicAction::Accept { token, client } => desk.public_accept(&token, &client, now)?,
        PublicAction::Reject { token, reason, client } => desk.public_reject(&token, reason, &client, now)?,
    };
    print_json(&quote)
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

fn sweep_once(config: &AppConfig) -> anyhow::Result<SweepReport> {
    let path = &config.storage.state_path;
    let desk = Tripdesk::load(config.clone(), path)?;
    let report = desk.sweep(Utc::now());
    desk.save(path)?;
    Ok(report)
}

fn print_sweep(report: &SweepReport) {
    println!("Sweep finished");
    println!("  Quotes expired:          {}", report.quotes_expired);
    println!("  Invoices overdue:        {}", report.invoices_overdue);
    println!("  Subscriptions renewed:   {}", report.subscriptions_renewed);
    println!("  Subscriptions cancelled: {}", report.subscriptions_cancelled);
    println!("  Subscriptions past due:  {}", report.subscriptions_past_due);
    println!("  Subscription invoices:   {}", report.subscription_invoices);
}

async fn cmd_sweep(config: AppConfig, watch: bool) -> anyhow::Result<()> {
    if !watch {
        print_sweep(&sweep_once(&config)?);
        return Ok(());
    }

    let interval_secs = config.sweep.interval_secs.max(1);
    info!(interval_secs, state = %config.storage.state_path, "Sweeper started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // reload every tick so commands run in between are not overwritten
                match sweep_once(&config) {
                    Ok(report) if !report.is_empty() => print_sweep(&report),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Sweeper stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_city_nights() {
        let cities = parse_city_nights("Istanbul:2, Cappadocia:1").unwrap();
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[1].city, "Cappadocia");
        assert_eq!(cities[1].nights, 1);
        assert!(parse_city_nights("Istanbul").is_err());
    }

    #[test]
    fn test_parse_items_keeps_colons_in_description() {
        let items = parse_items(&["Transfer: airport:2:35.50".to_string()], Currency::Eur).unwrap();
        assert_eq!(items[0].description, "Transfer: airport");
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_price, Money::new(3_550, Currency::Eur));
    }

    #[test]
    fn test_parse_label_accepts_dashes() {
        let status: tripdesk_finance::BookingStatus = parse_label("booking status", "deposit-received").unwrap();
        assert_eq!(status, tripdesk_finance::BookingStatus::DepositReceived);
        assert!(parse_label::<tripdesk_finance::BookingStatus>("booking status", "lost").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "tripdesk",
            "--as",
            "boss@sunway.example",
            "quote",
            "generate",
            "--cities",
            "Istanbul:2",
            "--start",
            "2026-05-01",
            "--adults",
            "2",
            "--customer-name",
            "Jane",
            "--customer-email",
            "jane@example.com",
        ])
        .unwrap();
        assert_eq!(cli.as_user.as_deref(), Some("boss@sunway.example"));
        assert!(matches!(cli.command, Commands::Quote { action: QuoteAction::Generate { .. } }));
    }

    #[test]
    fn test_client_cli_parses_source() {
        let cli = Cli::try_parse_from(["tripdesk", "client", "add", "--name", "Ayse", "--source", "referral"]).unwrap();
        match cli.command {
            Commands::Client {
                action: ClientAction::Add { source, .. },
            } => assert_eq!(source, ClientSource::Referral),
            _ => panic!("expected client add"),
        }
        assert!(Cli::try_parse_from(["tripdesk", "client", "add", "--name", "Ayse", "--source", "walk-in"]).is_err());
        assert_eq!(parse_tags(Some("vip, ,repeat")), vec!["vip".to_string(), "repeat".to_string()]);
    }
}

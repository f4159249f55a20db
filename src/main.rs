// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use seller_queue::cli::{Cli, Command};
use seller_queue::{budget, db, history, queue, stats, tenant, Config, TenantContext};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let default_filter = if cli.verbose { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut conn = db::open_database(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized: {}", config.database_path.display());
        }
        Command::AddLogin { login, password } => {
            let store = resolve_store(&cli.store, &config)?;
            let tenant = tenant::register_login(&conn, &login, store.store_id(), &password)?;
            println!(
                "✓ Login {} -> store {}",
                tenant.login().unwrap_or_default(),
                tenant.store_id()
            );
        }
        Command::Import { csv } => {
            let store = resolve_store(&cli.store, &config)?;
            println!("📂 Loading roster from {}...", csv.display());
            let entries = db::load_roster(&csv)?;
            let summary = db::import_roster(&conn, &store, &entries)?;
            println!("✓ Inserted: {} sellers", summary.inserted);
            println!("✓ Skipped duplicates: {}", summary.duplicates);
            if summary.skipped_blank > 0 {
                println!("✓ Skipped blank rows: {}", summary.skipped_blank);
            }
        }
        Command::AddSeller { name } => {
            let store = resolve_store(&cli.store, &config)?;
            let seller = db::add_seller(&conn, &store, &name)?;
            println!("✓ Registered {} ({})", seller.name, seller.status.label());
        }
        Command::RemoveSeller { name } => {
            let store = resolve_store(&cli.store, &config)?;
            let seller = db::get_seller(&conn, &store, &name)?
                .with_context(|| format!("Seller not found: {}", name))?;
            queue::remove_seller(&mut conn, &store, &seller.id)?;
            println!("✓ Removed {}", seller.name);
        }
        Command::List => {
            let store = resolve_store(&cli.store, &config)?;
            print_sellers(&conn, &store)?;
        }
        Command::Act { action, seller, description } => {
            let store = resolve_store(&cli.store, &config)?;
            let transition = queue::perform(&mut conn, &store, action, &seller, description.as_deref())?;
            println!("✓ {}: {}", transition.action.label(), transition.seller.name);
            if transition.service_counted {
                println!("✓ Service counted ({} total)", transition.seller.service_count);
            }
            print_sellers(&conn, &store)?;
        }
        Command::Renumber => {
            let store = resolve_store(&cli.store, &config)?;
            let changed = queue::renumber_queue(&mut conn, &store)?;
            println!("✓ Renumbered queue ({} positions changed)", changed);
        }
        Command::History { seller, limit } => {
            let store = resolve_store(&cli.store, &config)?;
            let entries = match seller {
                Some(name) => history::list_for_seller(&conn, &store, &name)?,
                None => history::list(&conn, &store)?,
            };
            for entry in entries.iter().take(limit) {
                println!(
                    "{}  {:<20} {:<20} {}",
                    entry.timestamp.format("%d/%m/%Y %H:%M:%S"),
                    entry.seller_name,
                    entry.action.label(),
                    entry.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::Budgets => {
            let store = resolve_store(&cli.store, &config)?;
            for b in budget::list_budgets(&conn, &store)? {
                println!(
                    "{}  {:<20} {}",
                    b.timestamp.format("%d/%m/%Y %H:%M:%S"),
                    b.seller_name,
                    b.description
                );
            }
        }
        Command::Daily { date } => {
            let store = resolve_store(&cli.store, &config)?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            println!("📊 Services on {}", date);
            for row in stats::daily_overview(&conn, &store, date)? {
                println!("{:<20} {:>4}  {}", row.seller_name, row.service_count, row.status.label());
            }
        }
        Command::Monthly { year, month } => {
            let store = resolve_store(&cli.store, &config)?;
            let (current_year, current_month) = stats::year_month(Utc::now().date_naive());
            let year = year.unwrap_or(current_year);
            let month = month.unwrap_or(current_month);
            println!("📊 Services in {}-{:02}", year, month);
            for total in stats::monthly_report(&conn, &store, year, month)? {
                println!("{:<20} {:>5}", total.seller_name, total.total);
            }
        }
        Command::Tui => {
            let store = resolve_store(&cli.store, &config)?;
            run_ui_mode(conn, store)?;
        }
    }

    Ok(())
}

fn resolve_store(flag: &Option<String>, config: &Config) -> Result<TenantContext> {
    let store = match (flag, &config.default_store) {
        (Some(store), _) => store,
        (None, Some(store)) => store,
        (None, None) => bail!("No store selected: pass --store or set default_store in the config"),
    };
    Ok(TenantContext::new(store)?)
}

fn print_sellers(conn: &Connection, store: &TenantContext) -> Result<()> {
    let sellers = db::list_sellers(conn, store)?;
    println!("\n🏬 Store {} ({} sellers)", store.store_id(), sellers.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for seller in sellers {
        let position = seller
            .queue_position
            .map(|p| format!("{:>3}", p))
            .unwrap_or_else(|| "  -".to_string());
        println!(
            "{}  {:<20} {:<14} {:>4} services",
            position,
            seller.name,
            seller.status.label(),
            seller.service_count
        );
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(conn: Connection, store: TenantContext) -> Result<()> {
    let mut app = ui::App::new(conn, store)?;
    ui::run_ui(&mut app)?;

    println!("\n✅ Dashboard closed");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_conn: Connection, _store: TenantContext) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin seller-queue-server --features server");
    std::process::exit(1);
}

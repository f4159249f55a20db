use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{QueueError, Result};
use crate::tenant::TenantContext;

// ============================================================================
// SELLER STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerStatus {
    /// Waiting in the round-robin queue (has a position)
    Queued,

    /// Currently serving a customer
    InService,

    /// Not taking customers
    OutOfQueue,
}

impl SellerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellerStatus::Queued => "queued",
            SellerStatus::InService => "in_service",
            SellerStatus::OutOfQueue => "out_of_queue",
        }
    }

    /// Human readable label for dashboards
    pub fn label(&self) -> &'static str {
        match self {
            SellerStatus::Queued => "In queue",
            SellerStatus::InService => "In service",
            SellerStatus::OutOfQueue => "Out of queue",
        }
    }
}

impl fmt::Display for SellerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SellerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SellerStatus::Queued),
            "in_service" => Ok(SellerStatus::InService),
            "out_of_queue" => Ok(SellerStatus::OutOfQueue),
            other => Err(format!("unknown seller status: {}", other)),
        }
    }
}

impl ToSql for SellerStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SellerStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// SELLER
// ============================================================================

/// A member of the sales staff of one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seller {
    /// Stable identity (UUID)
    pub id: String,

    pub store_id: String,

    pub name: String,

    pub status: SellerStatus,

    /// Lifetime number of completed services
    pub service_count: i64,

    /// Dense 1..N rank, only set while `status == Queued`
    pub queue_position: Option<i64>,
}

const SELLER_COLUMNS: &str = "id, store_id, name, status, service_count, queue_position";

fn seller_from_row(row: &Row<'_>) -> rusqlite::Result<Seller> {
    Ok(Seller {
        id: row.get(0)?,
        store_id: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        service_count: row.get(4)?,
        queue_position: row.get(5)?,
    })
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // In-memory databases answer "memory" and stay that way
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "journal mode set");

    // ==========================================================================
    // Sellers (one row per seller per store)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sellers (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            name TEXT NOT NULL COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'out_of_queue',
            service_count INTEGER NOT NULL DEFAULT 0,
            queue_position INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (store_id, name)
        )",
        [],
    )?;

    // ==========================================================================
    // History (append-only audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            store_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            seller_name TEXT NOT NULL,
            action TEXT NOT NULL,
            description TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Daily statistics (one row per seller per day)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_stats (
            store_id TEXT NOT NULL,
            seller_name TEXT NOT NULL COLLATE NOCASE,
            stat_date TEXT NOT NULL,
            service_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (store_id, seller_name, stat_date)
        )",
        [],
    )?;

    // ==========================================================================
    // Budgets (quotes handed out during a service)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS budgets (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            store_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            seller_name TEXT NOT NULL,
            description TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Logins (login name -> store)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS logins (
            login TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            password_sha256 TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sellers_queue ON sellers(store_id, status, queue_position)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_store ON history(store_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_daily_stats_date ON daily_stats(store_id, stat_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_budgets_store ON budgets(store_id, seq)",
        [],
    )?;

    Ok(())
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

// ============================================================================
// SELLER QUERIES
// ============================================================================

/// Register a new seller; starts out of the queue
pub fn add_seller(conn: &Connection, tenant: &TenantContext, name: &str) -> Result<Seller> {
    let name = name.trim();
    if name.is_empty() {
        return Err(QueueError::EmptyName);
    }

    let seller = Seller {
        id: uuid::Uuid::new_v4().to_string(),
        store_id: tenant.store_id().to_string(),
        name: name.to_string(),
        status: SellerStatus::OutOfQueue,
        service_count: 0,
        queue_position: None,
    };

    let result = conn.execute(
        "INSERT INTO sellers (id, store_id, name, status, service_count, queue_position)
         VALUES (?1, ?2, ?3, ?4, 0, NULL)",
        params![seller.id, seller.store_id, seller.name, seller.status],
    );

    match result {
        Ok(_) => {
            debug!(store = tenant.store_id(), seller = name, "seller registered");
            Ok(seller)
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(QueueError::DuplicateSeller(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete the seller row. Callers renumber the queue afterwards.
pub(crate) fn delete_seller(conn: &Connection, tenant: &TenantContext, id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM sellers WHERE store_id = ?1 AND id = ?2",
        params![tenant.store_id(), id],
    )?;
    Ok(())
}

/// Look up a seller by name (case-insensitive)
pub fn get_seller(conn: &Connection, tenant: &TenantContext, name: &str) -> Result<Option<Seller>> {
    let sql = format!(
        "SELECT {} FROM sellers WHERE store_id = ?1 AND name = ?2",
        SELLER_COLUMNS
    );
    let seller = conn
        .query_row(&sql, params![tenant.store_id(), name.trim()], seller_from_row)
        .optional()?;
    Ok(seller)
}

pub fn get_seller_by_id(conn: &Connection, tenant: &TenantContext, id: &str) -> Result<Option<Seller>> {
    let sql = format!(
        "SELECT {} FROM sellers WHERE store_id = ?1 AND id = ?2",
        SELLER_COLUMNS
    );
    let seller = conn
        .query_row(&sql, params![tenant.store_id(), id], seller_from_row)
        .optional()?;
    Ok(seller)
}

pub(crate) fn require_seller(conn: &Connection, tenant: &TenantContext, name: &str) -> Result<Seller> {
    get_seller(conn, tenant, name)?.ok_or_else(|| QueueError::SellerNotFound(name.trim().to_string()))
}

/// All sellers of the store: queued ones by position, then the rest by name
pub fn list_sellers(conn: &Connection, tenant: &TenantContext) -> Result<Vec<Seller>> {
    let sql = format!(
        "SELECT {} FROM sellers
         WHERE store_id = ?1
         ORDER BY queue_position IS NULL, queue_position, name",
        SELLER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let sellers = stmt
        .query_map([tenant.store_id()], seller_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sellers)
}

/// Queued sellers ordered by their current position (ties by name)
pub fn queued_sellers(conn: &Connection, tenant: &TenantContext) -> Result<Vec<Seller>> {
    let sql = format!(
        "SELECT {} FROM sellers
         WHERE store_id = ?1 AND status = ?2
         ORDER BY queue_position IS NULL, queue_position, name",
        SELLER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let sellers = stmt
        .query_map(params![tenant.store_id(), SellerStatus::Queued], seller_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sellers)
}

/// Highest queue position in use, 0 for an empty queue
pub fn max_queue_position(conn: &Connection, tenant: &TenantContext) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(queue_position) FROM sellers WHERE store_id = ?1 AND status = ?2",
        params![tenant.store_id(), SellerStatus::Queued],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}

pub(crate) fn set_status(
    conn: &Connection,
    tenant: &TenantContext,
    id: &str,
    status: SellerStatus,
    position: Option<i64>,
) -> Result<()> {
    conn.execute(
        "UPDATE sellers SET status = ?1, queue_position = ?2 WHERE store_id = ?3 AND id = ?4",
        params![status, position, tenant.store_id(), id],
    )?;
    Ok(())
}

pub(crate) fn set_position(conn: &Connection, tenant: &TenantContext, id: &str, position: i64) -> Result<()> {
    conn.execute(
        "UPDATE sellers SET queue_position = ?1 WHERE store_id = ?2 AND id = ?3",
        params![position, tenant.store_id(), id],
    )?;
    Ok(())
}

/// Move every queued seller except `except_id` one place back
pub(crate) fn shift_queue_back(conn: &Connection, tenant: &TenantContext, except_id: &str) -> Result<usize> {
    let shifted = conn.execute(
        "UPDATE sellers
         SET queue_position = COALESCE(queue_position, 0) + 1
         WHERE store_id = ?1 AND status = ?2 AND id != ?3",
        params![tenant.store_id(), SellerStatus::Queued, except_id],
    )?;
    Ok(shifted)
}

/// Clear stale positions left on sellers that are not queued
pub(crate) fn clear_stale_positions(conn: &Connection, tenant: &TenantContext) -> Result<usize> {
    let cleared = conn.execute(
        "UPDATE sellers SET queue_position = NULL
         WHERE store_id = ?1 AND status != ?2 AND queue_position IS NOT NULL",
        params![tenant.store_id(), SellerStatus::Queued],
    )?;
    Ok(cleared)
}

pub fn count_sellers(conn: &Connection, tenant: &TenantContext) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sellers WHERE store_id = ?1",
        [tenant.store_id()],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// ROSTER IMPORT
// ============================================================================

/// One line of a roster CSV (`name` column)
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    #[serde(alias = "Name", alias = "nome")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped_blank: usize,
}

pub fn load_roster(csv_path: &Path) -> Result<Vec<RosterEntry>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;

    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let entry: RosterEntry = result?;
        entries.push(entry);
    }

    Ok(entries)
}

/// Register every roster entry; existing names are skipped, not updated
pub fn import_roster(conn: &Connection, tenant: &TenantContext, entries: &[RosterEntry]) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for entry in entries {
        match add_seller(conn, tenant, &entry.name) {
            Ok(_) => summary.inserted += 1,
            Err(QueueError::DuplicateSeller(_)) => summary.duplicates += 1,
            Err(QueueError::EmptyName) => summary.skipped_blank += 1,
            Err(e) => return Err(e),
        }
    }

    info!(
        store = tenant.store_id(),
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "roster imported"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup() -> (Connection, TenantContext) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        (conn, TenantContext::new("prime").unwrap())
    }

    #[test]
    fn test_setup_is_idempotent() {
        let (conn, _) = setup();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_add_seller_starts_out_of_queue() {
        let (conn, tenant) = setup();

        let seller = add_seller(&conn, &tenant, "  Ana  ").unwrap();

        assert_eq!(seller.name, "Ana");
        assert_eq!(seller.status, SellerStatus::OutOfQueue);
        assert_eq!(seller.queue_position, None);
        assert_eq!(seller.service_count, 0);
        assert_eq!(get_seller(&conn, &tenant, "ana").unwrap(), Some(seller));
    }

    #[test]
    fn test_duplicate_names_are_case_insensitive() {
        let (conn, tenant) = setup();
        add_seller(&conn, &tenant, "Ana").unwrap();

        let err = add_seller(&conn, &tenant, "ANA").unwrap_err();
        assert!(matches!(err, QueueError::DuplicateSeller(name) if name == "ANA"));
        assert_eq!(count_sellers(&conn, &tenant).unwrap(), 1);
    }

    #[test]
    fn test_same_name_in_two_stores() {
        let (conn, tenant) = setup();
        let other = TenantContext::new("julio").unwrap();

        add_seller(&conn, &tenant, "Ana").unwrap();
        add_seller(&conn, &other, "Ana").unwrap();

        assert_eq!(count_sellers(&conn, &tenant).unwrap(), 1);
        assert_eq!(count_sellers(&conn, &other).unwrap(), 1);
    }

    #[test]
    fn test_blank_name_rejected() {
        let (conn, tenant) = setup();
        assert!(matches!(add_seller(&conn, &tenant, "   "), Err(QueueError::EmptyName)));
    }

    #[test]
    fn test_list_orders_queue_first() {
        let (conn, tenant) = setup();
        let zoe = add_seller(&conn, &tenant, "Zoe").unwrap();
        add_seller(&conn, &tenant, "Bruno").unwrap();
        let carla = add_seller(&conn, &tenant, "Carla").unwrap();

        set_status(&conn, &tenant, &zoe.id, SellerStatus::Queued, Some(2)).unwrap();
        set_status(&conn, &tenant, &carla.id, SellerStatus::Queued, Some(1)).unwrap();

        let names: Vec<String> = list_sellers(&conn, &tenant)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Carla", "Zoe", "Bruno"]);
        assert_eq!(max_queue_position(&conn, &tenant).unwrap(), 2);
    }

    #[test]
    fn test_max_position_of_empty_queue() {
        let (conn, tenant) = setup();
        assert_eq!(max_queue_position(&conn, &tenant).unwrap(), 0);
    }

    #[test]
    fn test_import_roster_counts_duplicates() {
        let (conn, tenant) = setup();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name").unwrap();
        writeln!(file, "Ana").unwrap();
        writeln!(file, "Bruno").unwrap();
        writeln!(file, "ana").unwrap();
        writeln!(file, " ").unwrap();

        let entries = load_roster(file.path()).unwrap();
        assert_eq!(entries.len(), 4);

        let summary = import_roster(&conn, &tenant, &entries).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                inserted: 2,
                duplicates: 1,
                skipped_blank: 1
            }
        );
        assert_eq!(count_sellers(&conn, &tenant).unwrap(), 2);
    }
}

// History Logger - append-only audit trail of queue transitions
// Rows are never updated or deleted by the engine.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::tenant::TenantContext;

// ============================================================================
// ACTION TAGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AddedToQueue,
    MovedToService,
    /// Back to the end of the queue after a service
    ReturnedToQueue,
    /// Back to the head of the queue after a service
    FirstInLine,
    MovedOutOfQueue,
    ReenteredQueue,
    LeftQueue,
    BudgetCreated,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::AddedToQueue,
        Action::MovedToService,
        Action::ReturnedToQueue,
        Action::FirstInLine,
        Action::MovedOutOfQueue,
        Action::ReenteredQueue,
        Action::LeftQueue,
        Action::BudgetCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::AddedToQueue => "added_to_queue",
            Action::MovedToService => "moved_to_service",
            Action::ReturnedToQueue => "returned_to_queue",
            Action::FirstInLine => "first_in_line",
            Action::MovedOutOfQueue => "moved_out_of_queue",
            Action::ReenteredQueue => "reentered_queue",
            Action::LeftQueue => "left_queue",
            Action::BudgetCreated => "budget_created",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::AddedToQueue => "Added to Queue",
            Action::MovedToService => "Moved to Service",
            Action::ReturnedToQueue => "Returned to Queue",
            Action::FirstInLine => "First in Line",
            Action::MovedOutOfQueue => "Moved out of Queue",
            Action::ReenteredQueue => "Re-entered Queue",
            Action::LeftQueue => "Left Queue",
            Action::BudgetCreated => "Budget Created",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown history action: {}", s))
    }
}

impl ToSql for Action {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Action {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// HISTORY ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub store_id: String,
    pub timestamp: DateTime<Utc>,
    pub seller_name: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        store_id: row.get(1)?,
        timestamp: row.get(2)?,
        seller_name: row.get(3)?,
        action: row.get(4)?,
        description: row.get(5)?,
    })
}

/// Append one history row
pub fn append(
    conn: &Connection,
    tenant: &TenantContext,
    seller_name: &str,
    action: Action,
    description: Option<&str>,
) -> Result<HistoryEntry> {
    let entry = HistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        store_id: tenant.store_id().to_string(),
        timestamp: Utc::now(),
        seller_name: seller_name.to_string(),
        action,
        description: description.map(str::to_string),
    };

    conn.execute(
        "INSERT INTO history (id, store_id, created_at, seller_name, action, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.store_id,
            entry.timestamp,
            entry.seller_name,
            entry.action,
            entry.description,
        ],
    )?;

    Ok(entry)
}

/// Whole store history, newest first
pub fn list(conn: &Connection, tenant: &TenantContext) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, created_at, seller_name, action, description
         FROM history
         WHERE store_id = ?1
         ORDER BY seq DESC",
    )?;

    let entries = stmt
        .query_map([tenant.store_id()], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

/// History of one seller, newest first
pub fn list_for_seller(conn: &Connection, tenant: &TenantContext, seller_name: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, created_at, seller_name, action, description
         FROM history
         WHERE store_id = ?1 AND seller_name = ?2 COLLATE NOCASE
         ORDER BY seq DESC",
    )?;

    let entries = stmt
        .query_map(params![tenant.store_id(), seller_name.trim()], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn count(conn: &Connection, tenant: &TenantContext) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM history WHERE store_id = ?1",
        [tenant.store_id()],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    #[test]
    fn test_action_tags_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("movido_para_atendimento".parse::<Action>().is_err());
    }

    #[test]
    fn test_append_and_list_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let tenant = TenantContext::new("prime").unwrap();

        append(&conn, &tenant, "Ana", Action::AddedToQueue, None).unwrap();
        append(&conn, &tenant, "Ana", Action::MovedToService, None).unwrap();
        append(&conn, &tenant, "Bruno", Action::LeftQueue, Some("lunch")).unwrap();

        let entries = list(&conn, &tenant).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, Action::LeftQueue);
        assert_eq!(entries[0].description.as_deref(), Some("lunch"));
        assert_eq!(entries[2].action, Action::AddedToQueue);

        let ana = list_for_seller(&conn, &tenant, "ana").unwrap();
        assert_eq!(ana.len(), 2);
        assert_eq!(ana[0].action, Action::MovedToService);
    }

    #[test]
    fn test_history_is_scoped_to_store() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let prime = TenantContext::new("prime").unwrap();
        let julio = TenantContext::new("julio").unwrap();

        append(&conn, &prime, "Ana", Action::AddedToQueue, None).unwrap();

        assert_eq!(count(&conn, &prime).unwrap(), 1);
        assert_eq!(count(&conn, &julio).unwrap(), 0);
        assert!(list(&conn, &julio).unwrap().is_empty());
    }
}

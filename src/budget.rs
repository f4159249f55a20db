// Budget (quote) records handed out during a service.
// Created only through `queue::create_budget`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub store_id: String,
    pub timestamp: DateTime<Utc>,
    pub seller_name: String,
    pub description: String,
}

pub(crate) fn insert(
    conn: &Connection,
    tenant: &TenantContext,
    seller_name: &str,
    description: &str,
) -> Result<Budget> {
    let budget = Budget {
        id: uuid::Uuid::new_v4().to_string(),
        store_id: tenant.store_id().to_string(),
        timestamp: Utc::now(),
        seller_name: seller_name.to_string(),
        description: description.to_string(),
    };

    conn.execute(
        "INSERT INTO budgets (id, store_id, created_at, seller_name, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            budget.id,
            budget.store_id,
            budget.timestamp,
            budget.seller_name,
            budget.description,
        ],
    )?;

    Ok(budget)
}

/// All budgets of the store, newest first
pub fn list_budgets(conn: &Connection, tenant: &TenantContext) -> Result<Vec<Budget>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, created_at, seller_name, description
         FROM budgets
         WHERE store_id = ?1
         ORDER BY seq DESC",
    )?;

    let budgets = stmt
        .query_map([tenant.store_id()], |row| {
            Ok(Budget {
                id: row.get(0)?,
                store_id: row.get(1)?,
                timestamp: row.get(2)?,
                seller_name: row.get(3)?,
                description: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(budgets)
}

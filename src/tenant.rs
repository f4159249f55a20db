// Tenant context and login directory
//
// Every query is scoped by the `TenantContext` passed in by the caller;
// nothing in the library keeps a "current store" around.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{QueueError, Result};

/// Request-scoped store identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTenant")]
pub struct TenantContext {
    store_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    login: Option<String>,
}

/// Unchecked wire form; goes through `TenantContext::new`
#[derive(Deserialize)]
struct RawTenant {
    store_id: String,
    #[serde(default)]
    login: Option<String>,
}

impl TryFrom<RawTenant> for TenantContext {
    type Error = QueueError;

    fn try_from(raw: RawTenant) -> Result<Self> {
        let tenant = TenantContext::new(&raw.store_id)?;
        Ok(match raw.login {
            Some(login) => tenant.with_login(&login),
            None => tenant,
        })
    }
}

impl TenantContext {
    /// Store ids are lowercase ASCII letters, digits and `_`
    pub fn new(store_id: &str) -> Result<Self> {
        let store_id = store_id.trim();
        let valid = !store_id.is_empty()
            && store_id.len() <= 64
            && store_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if !valid {
            return Err(QueueError::InvalidStoreId(store_id.to_string()));
        }

        Ok(TenantContext {
            store_id: store_id.to_string(),
            login: None,
        })
    }

    pub fn with_login(mut self, login: &str) -> Self {
        self.login = Some(login.to_string());
        self
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }
}

/// Normalize a login identifier: `afonsopena@store.com` -> `afonsopena`
pub fn login_name(identifier: &str) -> String {
    identifier
        .trim()
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn password_digest(login: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", login, password));
    format!("{:x}", hasher.finalize())
}

/// Create or replace the login that maps to `store_id`
pub fn register_login(conn: &Connection, identifier: &str, store_id: &str, password: &str) -> Result<TenantContext> {
    let login = login_name(identifier);
    if login.is_empty() {
        return Err(QueueError::UnknownLogin(identifier.to_string()));
    }
    let tenant = TenantContext::new(store_id)?.with_login(&login);

    conn.execute(
        "INSERT INTO logins (login, store_id, password_sha256) VALUES (?1, ?2, ?3)
         ON CONFLICT (login) DO UPDATE SET store_id = excluded.store_id,
                                           password_sha256 = excluded.password_sha256",
        params![login, tenant.store_id(), password_digest(&login, password)],
    )?;

    info!(login = %login, store = tenant.store_id(), "login registered");
    Ok(tenant)
}

/// Resolve a login + password to the store it belongs to
pub fn authenticate(conn: &Connection, identifier: &str, password: &str) -> Result<TenantContext> {
    let login = login_name(identifier);

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT store_id, password_sha256 FROM logins WHERE login = ?1",
            [&login],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (store_id, digest) = match row {
        Some(row) => row,
        None => {
            warn!(login = %login, "login not registered");
            return Err(QueueError::UnknownLogin(login));
        }
    };

    if digest != password_digest(&login, password) {
        warn!(login = %login, "password mismatch");
        return Err(QueueError::InvalidCredentials(login));
    }

    Ok(TenantContext::new(&store_id)?.with_login(&login))
}

/// All registered `(login, store_id)` pairs
pub fn list_logins(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT login, store_id FROM logins ORDER BY login")?;
    let logins = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(logins)
}

use thiserror::Error;

use crate::db::SellerStatus;
use crate::history::Action;

/// Errors raised by the queue engine, the stores and the identity layer.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Seller not found: {0}")]
    SellerNotFound(String),

    #[error("Seller already registered: {0}")]
    DuplicateSeller(String),

    #[error("Seller name must not be empty")]
    EmptyName,

    #[error("A description is required for {0}")]
    EmptyDescription(Action),

    #[error("Cannot apply {action} to {seller}: seller is {from}")]
    InvalidTransition {
        seller: String,
        from: SellerStatus,
        action: Action,
    },

    #[error("Unknown login: {0}")]
    UnknownLogin(String),

    #[error("Invalid credentials for {0}")]
    InvalidCredentials(String),

    #[error("Invalid store id: {0:?}")]
    InvalidStoreId(String),

    #[error("Invalid period: {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// True for errors caused by the request rather than by storage.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            QueueError::Database(_) | QueueError::Csv(_) | QueueError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

// Seller Queue - Core Library
// Exposes all modules for use in the CLI, the API server and tests

pub mod error;
pub mod config;
pub mod tenant;
pub mod db;
pub mod history;
pub mod budget;
pub mod stats;
pub mod queue;
pub mod cli;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{QueueError, Result};
pub use config::Config;
pub use tenant::{authenticate, login_name, register_login, TenantContext};
pub use db::{
    Seller, SellerStatus, RosterEntry, ImportSummary,
    setup_database, open_database, add_seller, get_seller, get_seller_by_id,
    list_sellers, queued_sellers, load_roster, import_roster,
};
pub use history::{Action, HistoryEntry};
pub use budget::{Budget, list_budgets};
pub use stats::{DailyStat, DailyOverviewRow, MonthlyTotal};
pub use queue::{
    Placement, QueueAction, Table, Transition, perform,
    add_to_queue, move_to_service, return_to_queue, move_out_of_queue,
    reenter_queue, leave_queue, create_budget, renumber_queue, remove_seller,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

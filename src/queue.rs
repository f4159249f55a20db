// Queue Engine - status transitions and queue position bookkeeping
//
// Every transition runs inside one IMMEDIATE transaction:
//   status update -> position assignment -> renumber -> history -> stats
// A failure at any step rolls the whole transition back, and the write lock
// taken up front serializes the read-max-then-write position assignment.

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::budget::{self, Budget};
use crate::db::{self, Seller, SellerStatus};
use crate::error::{QueueError, Result};
use crate::history::{self, Action};
use crate::stats;
use crate::tenant::TenantContext;

// ============================================================================
// TYPES
// ============================================================================

/// Where a seller re-enters the queue after a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    First,
    Last,
}

/// Tables a transition can change (used for change notification)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sellers,
    History,
    DailyStats,
    Budgets,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Sellers => "sellers",
            Table::History => "history",
            Table::DailyStats => "daily_stats",
            Table::Budgets => "budgets",
        }
    }
}

/// Outcome of a committed transition
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    /// Seller state after the transition
    pub seller: Seller,
    pub action: Action,
    pub history_id: String,
    pub service_counted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    pub touched: Vec<Table>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    QueueLast,
    QueueFirst,
    Service,
    Out,
}

struct Step<'a> {
    seller: &'a str,
    action: Action,
    allowed_from: &'static [SellerStatus],
    target: Target,
    description: Option<&'a str>,
    counts_service: bool,
    creates_budget: bool,
}

fn normalize_description(description: Option<&str>) -> Option<&str> {
    description.map(str::trim).filter(|d| !d.is_empty())
}

// ============================================================================
// TRANSITION DRIVER
// ============================================================================

fn apply(conn: &mut Connection, tenant: &TenantContext, step: Step<'_>, today: NaiveDate) -> Result<Transition> {
    let description = normalize_description(step.description);
    if step.creates_budget && description.is_none() {
        return Err(QueueError::EmptyDescription(step.action));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let seller = db::require_seller(&tx, tenant, step.seller)?;
    if !step.allowed_from.contains(&seller.status) {
        return Err(QueueError::InvalidTransition {
            seller: seller.name,
            from: seller.status,
            action: step.action,
        });
    }

    let mut touched = vec![Table::Sellers, Table::History];

    let budget = match (step.creates_budget, description) {
        (true, Some(text)) => {
            touched.push(Table::Budgets);
            Some(budget::insert(&tx, tenant, &seller.name, text)?)
        }
        _ => None,
    };

    match step.target {
        Target::QueueLast => {
            let position = db::max_queue_position(&tx, tenant)? + 1;
            db::set_status(&tx, tenant, &seller.id, SellerStatus::Queued, Some(position))?;
        }
        Target::QueueFirst => {
            let shifted = db::shift_queue_back(&tx, tenant, &seller.id)?;
            debug!(store = tenant.store_id(), shifted, "queue shifted for first-in-line");
            db::set_status(&tx, tenant, &seller.id, SellerStatus::Queued, Some(1))?;
        }
        Target::Service => {
            db::set_status(&tx, tenant, &seller.id, SellerStatus::InService, None)?;
        }
        Target::Out => {
            db::set_status(&tx, tenant, &seller.id, SellerStatus::OutOfQueue, None)?;
        }
    }

    renumber(&tx, tenant)?;

    let entry = history::append(&tx, tenant, &seller.name, step.action, description)?;

    if step.counts_service {
        stats::record_service(&tx, tenant, &seller.name, today)?;
        touched.push(Table::DailyStats);
    }

    let updated = db::get_seller_by_id(&tx, tenant, &seller.id)?
        .ok_or_else(|| QueueError::SellerNotFound(seller.name.clone()))?;

    tx.commit()?;

    info!(
        store = tenant.store_id(),
        seller = %updated.name,
        action = %step.action,
        from = %seller.status,
        to = %updated.status,
        position = ?updated.queue_position,
        "queue transition applied"
    );

    Ok(Transition {
        seller: updated,
        action: step.action,
        history_id: entry.id,
        service_counted: step.counts_service,
        budget,
        touched,
    })
}

/// Rewrite positions of queued sellers to 1..N, keeping their order.
/// Returns how many rows changed.
fn renumber(conn: &Connection, tenant: &TenantContext) -> Result<usize> {
    let mut changed = db::clear_stale_positions(conn, tenant)?;

    let queued = db::queued_sellers(conn, tenant)?;
    for (index, seller) in queued.iter().enumerate() {
        let position = index as i64 + 1;
        if seller.queue_position != Some(position) {
            db::set_position(conn, tenant, &seller.id, position)?;
            changed += 1;
        }
    }

    Ok(changed)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// out_of_queue -> queued, at the end of the queue
pub fn add_to_queue(conn: &mut Connection, tenant: &TenantContext, seller: &str) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::AddedToQueue,
        allowed_from: &[SellerStatus::OutOfQueue],
        target: Target::QueueLast,
        description: None,
        counts_service: false,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// queued -> in_service
pub fn move_to_service(conn: &mut Connection, tenant: &TenantContext, seller: &str) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::MovedToService,
        allowed_from: &[SellerStatus::Queued],
        target: Target::Service,
        description: None,
        counts_service: false,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// in_service -> queued, at the head or the end. Counts a completed service.
pub fn return_to_queue(
    conn: &mut Connection,
    tenant: &TenantContext,
    seller: &str,
    placement: Placement,
    description: Option<&str>,
) -> Result<Transition> {
    let (action, target) = match placement {
        Placement::First => (Action::FirstInLine, Target::QueueFirst),
        Placement::Last => (Action::ReturnedToQueue, Target::QueueLast),
    };
    let step = Step {
        seller,
        action,
        allowed_from: &[SellerStatus::InService],
        target,
        description,
        counts_service: true,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// in_service -> out_of_queue. Counts a completed service.
pub fn move_out_of_queue(
    conn: &mut Connection,
    tenant: &TenantContext,
    seller: &str,
    description: Option<&str>,
) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::MovedOutOfQueue,
        allowed_from: &[SellerStatus::InService],
        target: Target::Out,
        description,
        counts_service: true,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// out_of_queue -> queued, at the end of the queue
pub fn reenter_queue(conn: &mut Connection, tenant: &TenantContext, seller: &str) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::ReenteredQueue,
        allowed_from: &[SellerStatus::OutOfQueue],
        target: Target::QueueLast,
        description: None,
        counts_service: false,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// queued -> out_of_queue
pub fn leave_queue(
    conn: &mut Connection,
    tenant: &TenantContext,
    seller: &str,
    description: Option<&str>,
) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::LeftQueue,
        allowed_from: &[SellerStatus::Queued],
        target: Target::Out,
        description,
        counts_service: false,
        creates_budget: false,
    };
    apply(conn, tenant, step, today())
}

/// Record a budget for a seller in service and send them to the end of the
/// queue. Counts a completed service.
pub fn create_budget(
    conn: &mut Connection,
    tenant: &TenantContext,
    seller: &str,
    description: &str,
) -> Result<Transition> {
    let step = Step {
        seller,
        action: Action::BudgetCreated,
        allowed_from: &[SellerStatus::InService],
        target: Target::QueueLast,
        description: Some(description),
        counts_service: true,
        creates_budget: true,
    };
    apply(conn, tenant, step, today())
}

// ============================================================================
// ACTION DISPATCH (CLI / API / TUI)
// ============================================================================

/// Queue operation selected by name from an outer surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum QueueAction {
    Add,
    Serve,
    ReturnLast,
    ReturnFirst,
    Out,
    Reenter,
    Leave,
    Budget,
}

impl QueueAction {
    pub const ALL: [QueueAction; 8] = [
        QueueAction::Add,
        QueueAction::Serve,
        QueueAction::ReturnLast,
        QueueAction::ReturnFirst,
        QueueAction::Out,
        QueueAction::Reenter,
        QueueAction::Leave,
        QueueAction::Budget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Add => "add",
            QueueAction::Serve => "serve",
            QueueAction::ReturnLast => "return-last",
            QueueAction::ReturnFirst => "return-first",
            QueueAction::Out => "out",
            QueueAction::Reenter => "reenter",
            QueueAction::Leave => "leave",
            QueueAction::Budget => "budget",
        }
    }

    /// Statuses this action can start from
    pub fn allowed_from(&self) -> SellerStatus {
        match self {
            QueueAction::Add | QueueAction::Reenter => SellerStatus::OutOfQueue,
            QueueAction::Serve | QueueAction::Leave => SellerStatus::Queued,
            QueueAction::ReturnLast
            | QueueAction::ReturnFirst
            | QueueAction::Out
            | QueueAction::Budget => SellerStatus::InService,
        }
    }
}

impl std::str::FromStr for QueueAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        QueueAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown queue action: {}", s))
    }
}

/// Run the operation named by `action`
pub fn perform(
    conn: &mut Connection,
    tenant: &TenantContext,
    action: QueueAction,
    seller: &str,
    description: Option<&str>,
) -> Result<Transition> {
    match action {
        QueueAction::Add => add_to_queue(conn, tenant, seller),
        QueueAction::Serve => move_to_service(conn, tenant, seller),
        QueueAction::ReturnLast => return_to_queue(conn, tenant, seller, Placement::Last, description),
        QueueAction::ReturnFirst => return_to_queue(conn, tenant, seller, Placement::First, description),
        QueueAction::Out => move_out_of_queue(conn, tenant, seller, description),
        QueueAction::Reenter => reenter_queue(conn, tenant, seller),
        QueueAction::Leave => leave_queue(conn, tenant, seller, description),
        QueueAction::Budget => create_budget(conn, tenant, seller, description.unwrap_or_default()),
    }
}

/// Repair pass: rewrite queued positions to 1..N
pub fn renumber_queue(conn: &mut Connection, tenant: &TenantContext) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let changed = renumber(&tx, tenant)?;
    tx.commit()?;

    if changed > 0 {
        info!(store = tenant.store_id(), changed, "queue renumbered");
    }
    Ok(changed)
}

/// Delete a seller; the queue closes the gap they leave behind
pub fn remove_seller(conn: &mut Connection, tenant: &TenantContext, seller_id: &str) -> Result<Seller> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let seller = db::get_seller_by_id(&tx, tenant, seller_id)?
        .ok_or_else(|| QueueError::SellerNotFound(seller_id.to_string()))?;
    db::delete_seller(&tx, tenant, seller_id)?;
    if seller.status == SellerStatus::Queued {
        renumber(&tx, tenant)?;
    }

    tx.commit()?;

    info!(store = tenant.store_id(), seller = %seller.name, "seller removed");
    Ok(seller)
}

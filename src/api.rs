// Seller Queue - REST API
//
// Routes are scoped by the session token a login returns. Every response
// uses the `{success, data, error}` envelope. Committed transitions are
// published on the change feed so dashboards refetch instead of polling.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::budget::{self, Budget};
use crate::db::{self, Seller};
use crate::error::QueueError;
use crate::history::{self, HistoryEntry};
use crate::queue::{self, QueueAction, Table, Transition};
use crate::stats::{self, DailyOverviewRow, MonthlyTotal};
use crate::tenant::{self, TenantContext};

// ============================================================================
// CHANGE FEED
// ============================================================================

/// A table of one store changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub store_id: String,
    pub table: Table,
}

/// Broadcast of committed changes, shared by every SSE subscriber
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, tenant: &TenantContext, tables: &[Table]) {
        for table in tables {
            let change = Change {
                store_id: tenant.store_id().to_string(),
                table: *table,
            };
            // No subscribers is not an error
            if self.sender.send(change).is_err() {
                debug!(store = tenant.store_id(), table = table.as_str(), "no change subscribers");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

// ============================================================================
// STATE AND ENVELOPE
// ============================================================================

/// A logged-in client
#[derive(Debug, Clone)]
struct Session {
    tenant: TenantContext,
    issued_at: Instant,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    session_ttl: Duration,
    feed: ChangeFeed,
}

impl AppState {
    pub fn new(conn: Connection, session_ttl: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            session_ttl,
            feed: ChangeFeed::default(),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>, ApiError> {
        self.sessions
            .lock()
            .map_err(|_| ApiError::internal("session lock poisoned"))
    }

    fn open_session(&self, tenant: TenantContext) -> Result<String, ApiError> {
        let token = uuid::Uuid::new_v4().to_string();
        let ttl = self.session_ttl;
        let mut sessions = self.sessions()?;

        let before = sessions.len();
        sessions.retain(|_, session| session.issued_at.elapsed() < ttl);
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "expired sessions evicted");
        }

        sessions.insert(
            token.clone(),
            Session {
                tenant,
                issued_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Tenant of a live session; an expired one is dropped on sight
    fn session_tenant(&self, token: &str) -> Result<TenantContext, ApiError> {
        let mut sessions = self.sessions()?;
        let session = sessions
            .get(token)
            .ok_or_else(|| ApiError::unauthorized("unknown session"))?;

        if session.issued_at.elapsed() >= self.session_ttl {
            sessions.remove(token);
            return Err(ApiError::unauthorized("session expired"));
        }
        Ok(session.tenant.clone())
    }

    /// Resolve the bearer token of a request to its tenant
    fn tenant(&self, headers: &HeaderMap) -> Result<TenantContext, ApiError> {
        let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        self.session_tenant(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::SellerNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::DuplicateSeller(_) | QueueError::InvalidTransition { .. } => StatusCode::CONFLICT,
            QueueError::UnknownLogin(_) | QueueError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            QueueError::EmptyName
            | QueueError::EmptyDescription(_)
            | QueueError::InvalidStoreId(_)
            | QueueError::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
            QueueError::Database(_) | QueueError::Csv(_) | QueueError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if err.is_client_error() {
            debug!(error = %err, "request rejected");
            Self::new(status, err.to_string())
        } else {
            error!(error = %err, "storage failure");
            // Storage details stay in the log
            Self::new(status, "storage error")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::err(self.message))).into_response()
    }
}

// ============================================================================
// REQUEST / RESPONSE BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub store_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NewSeller {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub seller: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenumberResponse {
    pub changed: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub seller: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub rows: Vec<DailyOverviewRow>,
}

#[derive(Debug, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub totals: Vec<MonthlyTotal>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/login
async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let tenant = {
        let conn = state.conn()?;
        tenant::authenticate(&conn, &body.login, &body.password)?
    };

    let store_id = tenant.store_id().to_string();
    let token = state.open_session(tenant)?;

    info!(store = %store_id, "session opened");
    ok(LoginResponse { token, store_id })
}

/// POST /api/logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<()> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    match state.sessions()?.remove(token) {
        Some(session) => {
            info!(store = session.tenant.store_id(), "session closed");
            ok(())
        }
        None => Err(ApiError::unauthorized("unknown session")),
    }
}

/// GET /api/sellers
async fn list_sellers(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<Seller>> {
    let tenant = state.tenant(&headers)?;
    let conn = state.conn()?;
    ok(db::list_sellers(&conn, &tenant)?)
}

/// POST /api/sellers
async fn create_seller(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewSeller>,
) -> Result<(StatusCode, Json<ApiResponse<Seller>>), ApiError> {
    let tenant = state.tenant(&headers)?;
    let seller = {
        let conn = state.conn()?;
        db::add_seller(&conn, &tenant, &body.name)?
    };
    state.feed.publish(&tenant, &[Table::Sellers]);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(seller))))
}

/// DELETE /api/sellers/:id
async fn delete_seller(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Seller> {
    let tenant = state.tenant(&headers)?;
    let seller = {
        let mut conn = state.conn()?;
        queue::remove_seller(&mut conn, &tenant, &id)?
    };
    state.feed.publish(&tenant, &[Table::Sellers]);
    ok(seller)
}

/// POST /api/queue/:action
async fn queue_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(action): Path<String>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<Transition> {
    let tenant = state.tenant(&headers)?;
    let action: QueueAction = action
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::NOT_FOUND, e))?;

    let transition = {
        let mut conn = state.conn()?;
        queue::perform(&mut conn, &tenant, action, &body.seller, body.description.as_deref())?
    };
    state.feed.publish(&tenant, &transition.touched);
    ok(transition)
}

/// POST /api/queue/renumber
async fn renumber(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<RenumberResponse> {
    let tenant = state.tenant(&headers)?;
    let changed = {
        let mut conn = state.conn()?;
        queue::renumber_queue(&mut conn, &tenant)?
    };
    if changed > 0 {
        state.feed.publish(&tenant, &[Table::Sellers]);
    }
    ok(RenumberResponse { changed })
}

/// GET /api/history?seller=&limit=
async fn list_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<HistoryEntry>> {
    let tenant = state.tenant(&headers)?;
    let conn = state.conn()?;
    let mut entries = match &query.seller {
        Some(name) => history::list_for_seller(&conn, &tenant, name)?,
        None => history::list(&conn, &tenant)?,
    };
    if let Some(limit) = query.limit {
        entries.truncate(limit);
    }
    ok(entries)
}

/// GET /api/budgets
async fn list_budgets(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<Budget>> {
    let tenant = state.tenant(&headers)?;
    let conn = state.conn()?;
    ok(budget::list_budgets(&conn, &tenant)?)
}

/// GET /api/stats/daily?date=YYYY-MM-DD
async fn daily_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DailyQuery>,
) -> ApiResult<DailyReport> {
    let tenant = state.tenant(&headers)?;
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let conn = state.conn()?;
    let rows = stats::daily_overview(&conn, &tenant, date)?;
    ok(DailyReport { date, rows })
}

/// GET /api/stats/monthly?year=&month=
async fn monthly_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MonthlyQuery>,
) -> ApiResult<MonthlyReport> {
    let tenant = state.tenant(&headers)?;
    let (current_year, current_month) = stats::year_month(Utc::now().date_naive());
    let year = query.year.unwrap_or(current_year);
    let month = query.month.unwrap_or(current_month);
    let conn = state.conn()?;
    let totals = stats::monthly_report(&conn, &tenant, year, month)?;
    ok(MonthlyReport { year, month, totals })
}

/// GET /api/events - change notifications for the caller's store.
/// The stream ends at the first event after its session is logged out
/// or expires.
async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, ApiError> {
    let tenant = state.tenant(&headers)?;
    let store_id = tenant.store_id().to_string();
    let token = bearer_token(&headers).unwrap_or_default().to_string();
    let sessions = state.clone();

    let stream = BroadcastStream::new(state.feed.subscribe())
        .take_while(move |_| sessions.session_tenant(&token).is_ok())
        .filter_map(move |result| match result {
            Ok(change) if change.store_id == store_id => {
                let data = serde_json::to_string(&change).unwrap_or_default();
                Some(Ok(Event::default().event("change").data(data)))
            }
            // Lagged receivers miss events; clients refetch on the next one
            _ => None,
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("")))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/sellers", get(list_sellers).post(create_seller))
        .route("/sellers/:id", delete(delete_seller))
        .route("/queue/renumber", post(renumber))
        .route("/queue/:action", post(queue_action))
        .route("/history", get(list_history))
        .route("/budgets", get(list_budgets))
        .route("/stats/daily", get(daily_report))
        .route("/stats/monthly", get(monthly_report))
        .route("/events", get(events))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use grain_core::admin::{
    execute_admin_action, AdminAction, AdminError, AdminRequest, AdminResponse, PgRoleStore,
    RoleStore,
};
use grain_core::analytics::AnalyticsOptions;
use grain_core::auth::{bearer_token, SessionProvider, SupabaseAuth};
use grain_core::composer::compose_dashboard;
use grain_core::domain::{DashboardSnapshot, Session};
use grain_core::repository::{PgRepository, PriceRepository, RestRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = grain_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pg: Option<PgRepository> = match settings.require_database_url() {
        Ok(db_url) => match grain_core::storage::connect(db_url).await {
            Ok(pool) => match grain_core::storage::migrate(&pool).await {
                Ok(()) => Some(PgRepository::new(pool)),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; continuing without database");
                    None
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; continuing without database");
                None
            }
        },
        Err(_) => {
            tracing::warn!("DATABASE_URL missing; continuing without database");
            None
        }
    };

    let rest = match RestRepository::from_settings(&settings) {
        Ok(rest) => Some(rest),
        Err(e) => {
            tracing::warn!(error = %e, "store REST endpoint not configured");
            None
        }
    };

    let auth: Option<Arc<dyn SessionProvider>> = match SupabaseAuth::from_settings(&settings) {
        Ok(auth) => Some(Arc::new(auth)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "auth provider not configured; starting API in degraded mode");
            None
        }
    };

    let roles: Option<Arc<dyn RoleStore>> = pg
        .as_ref()
        .map(|repo| Arc::new(PgRoleStore::new(repo.pool().clone())) as Arc<dyn RoleStore>);

    // Prefer the REST table service so the caller's row-level policies apply.
    let store = match (rest, pg) {
        (Some(rest), _) => Some(Store::Rest(rest)),
        (None, Some(pg)) => Some(Store::Postgres(pg)),
        (None, None) => {
            tracing::error!("no price store configured; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        store,
        auth,
        roles,
        opts: Arc::new(AnalyticsOptions::from_env()),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/dashboard", get(get_dashboard))
        .route("/admin/users", get(admin_users).post(admin_users))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Store>,
    auth: Option<Arc<dyn SessionProvider>>,
    roles: Option<Arc<dyn RoleStore>>,
    opts: Arc<AnalyticsOptions>,
}

#[derive(Debug, Clone)]
enum Store {
    Postgres(PgRepository),
    Rest(RestRepository),
}

impl Store {
    fn for_session(&self, session: &Session) -> Box<dyn PriceRepository> {
        match self {
            Store::Postgres(repo) => Box::new(repo.clone()),
            Store::Rest(repo) => Box::new(repo.for_session(session)),
        }
    }
}

/// JSON error body `{ "error": "..." }` with a matching status.
#[derive(Debug)]
struct ApiError {
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

    fn unavailable(what: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, format!("{what} is not configured"))
    }

    fn internal(err: anyhow::Error) -> Self {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        if let AdminError::Store(_) = err {
            tracing::error!(error = %err, "admin action failed");
        }
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

async fn resolve_session(state: &AppState, headers: &HeaderMap) -> Result<Option<Session>, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let Some(token) = bearer_token(header) else {
        return Ok(None);
    };

    let auth = state
        .auth
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("auth provider"))?;
    match auth.resolve(token).await {
        Ok(Some(session)) => Ok(Some(session)),
        Ok(None) => {
            tracing::debug!("bearer rejected by auth provider; treating caller as anonymous");
            Ok(None)
        }
        Err(e) => Err(ApiError::internal(e)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct DashboardQuery {
    now: Option<String>,
}

async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let Some(session) = resolve_session(&state, &headers).await? else {
        return Ok(Json(DashboardSnapshot::empty()));
    };

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("price store"))?;

    let now = grain_core::time::resolve_now(query.now.as_deref(), chrono::Utc::now())
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("{e:#}")))?;

    let repo = store.for_session(&session);
    let snapshot = compose_dashboard(&*repo, Some(&session), now, &state.opts).await;
    Ok(Json(snapshot))
}

#[derive(Debug, Default, Deserialize)]
struct AdminQuery {
    action: Option<String>,
    user_id: Option<Uuid>,
    role: Option<String>,
}

async fn admin_users(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdminResponse>, ApiError> {
    let action = AdminAction::parse(query.action.as_deref())?;

    let session = resolve_session(&state, &headers)
        .await?
        .ok_or(AdminError::Unauthorized)?;

    let mut request = if body.is_empty() {
        AdminRequest::default()
    } else {
        serde_json::from_slice::<AdminRequest>(&body)
            .map_err(|e| AdminError::BadRequest(format!("invalid request body: {e}")))?
    };
    request.user_id = request.user_id.or(query.user_id);
    request.role = request.role.or(query.role);

    let roles = state
        .roles
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("role store"))?;

    let response = execute_admin_action(&**roles, &session, action, request).await?;
    Ok(Json(response))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &grain_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tokio::sync::Semaphore;

use arbiter_agent::pipeline::ChatContext;
use arbiter_agent::provider::LlmProvider;
use arbiter_conversations::ConversationStore;
use arbiter_core::config::ArbiterConfig;
use arbiter_core::types::TierTable;
use arbiter_cost::{BudgetAlerts, CostEngine, LogAlertSink, PriceTable, TokenLedger, UsageStore};
use arbiter_kv::KvStore;
use arbiter_sessions::SessionManager;
use arbiter_users::{CredentialVault, UserStore};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ArbiterConfig,
    pub db: Arc<Mutex<Connection>>,
    pub kv: Arc<KvStore>,
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionManager>,
    pub conversations: ConversationStore,
    pub cost: CostEngine,
    pub ledger: TokenLedger,
    pub provider: Arc<dyn LlmProvider>,
    /// Caps concurrent Argon2 work across register/login.
    pub kdf_permits: Semaphore,
}

impl AppState {
    /// Wire every subsystem onto one SQLite connection and the shared KV
    /// store. The provider is injected so tests can script the upstream.
    pub fn new(
        config: ArbiterConfig,
        conn: Connection,
        provider: Arc<dyn LlmProvider>,
    ) -> anyhow::Result<Self> {
        arbiter_users::db::init_db(&conn)?;
        arbiter_conversations::db::init_db(&conn)?;
        arbiter_cost::db::init_db(&conn)?;

        let db = Arc::new(Mutex::new(conn));
        let kv = Arc::new(KvStore::new());

        let users = Arc::new(UserStore::new(Arc::clone(&db)));
        let vault = Arc::new(CredentialVault::new(config.auth.memory)?);
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&kv),
            Arc::clone(&users),
            vault,
            config.auth.days,
        ));

        let usage = Arc::new(UsageStore::new(Arc::clone(&db)));
        let alerts = BudgetAlerts::new(
            Arc::clone(&kv),
            config.budget.alert_thresholds()?,
            Box::new(LogAlertSink),
        );
        let cost = CostEngine::new(
            PriceTable::builtin(),
            Arc::clone(&usage),
            alerts,
            config.budget.daily,
        );

        Ok(Self {
            conversations: ConversationStore::new(Arc::clone(&db)),
            ledger: TokenLedger::new(usage),
            cost,
            sessions,
            users,
            kv,
            db,
            provider,
            kdf_permits: Semaphore::new(config.auth.parallel.max(1)),
            config,
        })
    }
}

impl ChatContext for AppState {
    fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    fn cost(&self) -> &CostEngine {
        &self.cost
    }

    fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    fn tiers(&self) -> &TierTable {
        &self.config.tiers
    }

    fn model(&self) -> &str {
        &self.config.upstream.model
    }

    fn upstream_deadline(&self) -> Duration {
        Duration::from_secs(self.config.upstream.timeout)
    }

    fn saturation_limit(&self) -> u64 {
        self.config.budget.saturation
    }
}

/// Assemble the full Axum router: routes, the per-IP limiter in front of
/// the API surface, tracing, and CORS when an origin is configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/auth/register", post(crate::http::auth::register))
        .route("/api/auth/login", post(crate::http::auth::login))
        .route("/api/auth/logout", post(crate::http::auth::logout))
        .route("/api/auth/me", get(crate::http::auth::me))
        .route("/api/chat", post(crate::http::chat::chat))
        .route("/api/chat/history", get(crate::http::chat::history))
        .route("/api/chat/stats", get(crate::http::chat::stats))
        .route("/api/conversations", get(crate::http::conversations::list))
        .route(
            "/api/conversations/{id}",
            get(crate::http::conversations::get_one)
                .patch(crate::http::conversations::rename)
                .delete(crate::http::conversations::remove),
        )
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::middleware::ip_limit,
        ));

    let mut router = Router::new()
        .merge(api)
        .route("/health", get(crate::http::health::health))
        .with_state(Arc::clone(&state))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    if let Some(origin) = state.config.server.origin.as_deref() {
        if let Ok(origin) = origin.parse::<axum::http::HeaderValue>() {
            router = router.layer(
                tower_http::cors::CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([
                        axum::http::Method::GET,
                        axum::http::Method::POST,
                        axum::http::Method::PATCH,
                        axum::http::Method::DELETE,
                    ])
                    .allow_headers([axum::http::header::CONTENT_TYPE]),
            );
        }
    }

    router
}

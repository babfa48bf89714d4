//! Axum-based HTTP gateway with body limits, timeouts and the session gate.
//!
//! Public routes: `/health`, `/api/auth/register`, `/api/auth/login`.
//! Every other route takes a [`Session`] extractor, so the session gate
//! runs before the handler body.

use crate::auth::{
    spawn_sweeper, Clock, GateRejection, MemoryRevocationStore, RevocationStore, Session,
    SessionGate, SqliteRevocationStore, SystemClock, TokenIssuer, TokenVerifier,
};
use crate::config::{Config, RevocationBackend};
use crate::notes::{InvalidNote, NoteStore, NoteUpdate};
use crate::users::UserStore;
use anyhow::{Context, Result};
use axum::{
    extract::{FromRef, Path, State},
    http::{header, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size. JSON escaping can grow each content byte to
/// six (`\u0001`), so 64KB of note content needs up to 384KB, plus envelope.
pub const MAX_BODY_SIZE: usize = 6 * 65_536 + 8 * 1024;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub notes: Arc<NoteStore>,
    pub issuer: Arc<TokenIssuer>,
    pub gate: Arc<SessionGate>,
    /// Whether new user registration is allowed.
    pub allow_registration: bool,
}

impl FromRef<AppState> for Arc<SessionGate> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.gate)
    }
}

/// Open stores under `config.storage.data_dir` and wire the auth core.
///
/// Fails on configuration errors (missing signing secret, zero TTL) before
/// anything is opened.
pub fn build_state(config: &Config, clock: Arc<dyn Clock>) -> Result<AppState> {
    config.validate()?;
    let key = config.signing_key()?;

    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let users = Arc::new(
        UserStore::new(
            &data_dir.join("users.db"),
            Some(config.auth.password_hash_iterations),
        )?
        .with_user_limit(config.auth.max_users),
    );
    let notes = Arc::new(NoteStore::new(&data_dir.join("notes.db"))?);

    let revocations: Arc<dyn RevocationStore> = match config.auth.revocation_backend {
        RevocationBackend::Sqlite => {
            let path = data_dir.join("revocations.db");
            let store = SqliteRevocationStore::open(&path)?;
            tracing::info!("Revocation store initialized at {}", path.display());
            Arc::new(store)
        }
        RevocationBackend::Memory => {
            tracing::warn!("In-memory revocation store; logouts are forgotten on restart");
            Arc::new(MemoryRevocationStore::new())
        }
    };

    let issuer = TokenIssuer::new(key.clone(), config.auth.token_ttl_secs, clock.clone())?;
    let verifier = TokenVerifier::new(
        key,
        revocations,
        clock,
        Duration::from_millis(config.auth.revocation_timeout_ms),
    );

    Ok(AppState {
        users,
        notes,
        issuer: Arc::new(issuer),
        gate: Arc::new(SessionGate::new(Arc::new(verifier))),
        allow_registration: config.auth.allow_registration,
    })
}

/// Build the router with middleware.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/register", post(handle_auth_register))
        .route("/api/auth/login", post(handle_auth_login))
        .route("/api/auth/logout", post(handle_auth_logout))
        .route("/api/auth/me", get(handle_auth_me))
        .route(
            "/api/notes",
            get(handle_notes_list).post(handle_notes_create),
        )
        .route(
            "/api/notes/{note_id}",
            get(handle_notes_get)
                .put(handle_notes_update)
                .delete(handle_notes_delete),
        )
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until Ctrl+C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = build_state(&config, clock.clone())?;

    // ── Periodic revocation sweep ────────────────────────────
    if config.auth.sweep_interval_secs > 0 {
        let store = Arc::clone(state.gate.verifier().store());
        spawn_sweeper(
            store,
            clock,
            Duration::from_secs(config.auth.sweep_interval_secs),
        );
        tracing::info!(
            interval = config.auth.sweep_interval_secs,
            "Revocation sweeper started"
        );
    }

    let host = &config.gateway.host;
    let addr: SocketAddr = format!("{host}:{}", config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();

    println!("📝 notekeep listening on http://{host}:{actual_port}");
    println!("  GET  /health                — health check");
    if config.auth.allow_registration {
        println!("  POST /api/auth/register     — create new user account");
    }
    println!("  POST /api/auth/login        — authenticate and get a bearer token");
    println!("  POST /api/auth/logout       — revoke the presented token");
    println!("  GET  /api/auth/me           — current user info");
    println!("  GET  /api/notes             — list notes");
    println!("  POST /api/notes             — create a note");
    println!("  GET|PUT|DELETE /api/notes/:id");
    println!("  Press Ctrl+C to stop.\n");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gateway");
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Concrete return type for handlers (avoids `impl IntoResponse` inference issues).
type ApiResponse = (StatusCode, Json<serde_json::Value>);

type JsonBody<T> = Result<Json<T>, axum::extract::rejection::JsonRejection>;

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(serde_json::json!({"error": message.into()})))
}

fn bad_body(e: &axum::extract::rejection::JsonRejection) -> ApiResponse {
    error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {e}"))
}

/// GET /health: always public
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

// ── Auth ────────────────────────────────────────────────────────────

/// Request body for user registration.
#[derive(Deserialize)]
struct AuthRegisterBody {
    username: String,
    password: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Request body for login.
#[derive(Deserialize)]
struct AuthLoginBody {
    username: String,
    password: String,
}

/// POST /api/auth/register: create a new user account.
async fn handle_auth_register(
    State(state): State<AppState>,
    body: JsonBody<AuthRegisterBody>,
) -> ApiResponse {
    if !state.allow_registration {
        return error_response(StatusCode::FORBIDDEN, "Registration is disabled");
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return bad_body(&e),
    };

    let users = Arc::clone(&state.users);
    let result = run_blocking(move || {
        users.register(&body.username, &body.password, body.display_name.as_deref())
    })
    .await;

    match result {
        Ok(user_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "status": "registered",
                "user_id": user_id,
            })),
        ),
        Err(e) if e.downcast_ref::<rusqlite::Error>().is_some() || e.is::<JoinError>() => {
            tracing::warn!("Registration failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Registration failed")
        }
        Err(e) => {
            let msg = e.to_string();
            let status = if msg.contains("already taken") {
                StatusCode::CONFLICT
            } else if msg.contains("user limit") {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::BAD_REQUEST
            };
            error_response(status, msg)
        }
    }
}

/// POST /api/auth/login: authenticate and get a bearer token.
async fn handle_auth_login(
    State(state): State<AppState>,
    body: JsonBody<AuthLoginBody>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return bad_body(&e),
    };

    let users = Arc::clone(&state.users);
    let user = match run_blocking(move || users.authenticate(&body.username, &body.password)).await
    {
        Ok(u) => u,
        Err(_) => {
            return error_response(StatusCode::UNAUTHORIZED, "Invalid username or password");
        }
    };

    match state.issuer.issue(&user.id) {
        Ok(issued) => {
            tracing::info!(user_id = %user.id, "User logged in");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "authenticated",
                    "token": issued.token,
                    "token_type": "Bearer",
                    "expires_at": issued.claims.exp,
                    "user_id": user.id,
                    "username": user.username,
                })),
            )
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Token issuance failed: {e}"),
        ),
    }
}

/// POST /api/auth/logout: revoke the token this request was admitted with.
async fn handle_auth_logout(
    State(state): State<AppState>,
    session: Session,
) -> Result<ApiResponse, GateRejection> {
    state.gate.logout(&session).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({"status": "logged_out"})),
    ))
}

/// GET /api/auth/me: current user info.
async fn handle_auth_me(State(state): State<AppState>, session: Session) -> ApiResponse {
    let users = Arc::clone(&state.users);
    let user_id = session.user_id().to_owned();
    match run_blocking(move || users.get_user(&user_id)).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "user_id": user.id,
                "username": user.username,
                "display_name": user.display_name,
                "created_at": user.created_at,
                "token_expires_at": session.expires_at(),
            })),
        ),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => {
            tracing::warn!("User lookup failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "User lookup failed")
        }
    }
}

// ── Notes ───────────────────────────────────────────────────────────

/// Request body for note creation.
#[derive(Deserialize)]
struct NoteCreateBody {
    title: String,
    #[serde(default)]
    content: String,
}

/// Request body for note updates; absent fields are left unchanged.
#[derive(Deserialize)]
struct NoteUpdateBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

fn note_store_error(e: &anyhow::Error) -> ApiResponse {
    if let Some(invalid) = e.downcast_ref::<InvalidNote>() {
        return error_response(StatusCode::BAD_REQUEST, invalid.to_string());
    }
    tracing::warn!("Note store failure: {e}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Note storage failed")
}

fn note_not_found() -> ApiResponse {
    error_response(StatusCode::NOT_FOUND, "Note not found")
}

/// Run a note store call on the blocking pool with the caller's user id.
async fn with_notes<T, F>(state: &AppState, session: &Session, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&NoteStore, &str) -> Result<T> + Send + 'static,
{
    let notes = Arc::clone(&state.notes);
    let user_id = session.user_id().to_owned();
    run_blocking(move || op(&*notes, user_id.as_str())).await
}

/// GET /api/notes: list the caller's notes.
async fn handle_notes_list(State(state): State<AppState>, session: Session) -> ApiResponse {
    match with_notes(&state, &session, |notes, user_id| notes.list(user_id)).await {
        Ok(notes) => (StatusCode::OK, Json(serde_json::json!({"notes": notes}))),
        Err(e) => note_store_error(&e),
    }
}

/// POST /api/notes: create a note.
async fn handle_notes_create(
    State(state): State<AppState>,
    session: Session,
    body: JsonBody<NoteCreateBody>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return bad_body(&e),
    };

    let created = with_notes(&state, &session, move |notes, user_id| {
        notes.create(user_id, &body.title, &body.content)
    })
    .await;
    match created {
        Ok(note) => (StatusCode::CREATED, Json(serde_json::json!({"note": note}))),
        Err(e) => note_store_error(&e),
    }
}

/// GET /api/notes/:note_id
async fn handle_notes_get(
    State(state): State<AppState>,
    session: Session,
    Path(note_id): Path<String>,
) -> ApiResponse {
    match with_notes(&state, &session, move |notes, user_id| notes.get(user_id, &note_id)).await {
        Ok(Some(note)) => (StatusCode::OK, Json(serde_json::json!({"note": note}))),
        Ok(None) => note_not_found(),
        Err(e) => note_store_error(&e),
    }
}

/// PUT /api/notes/:note_id
async fn handle_notes_update(
    State(state): State<AppState>,
    session: Session,
    Path(note_id): Path<String>,
    body: JsonBody<NoteUpdateBody>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return bad_body(&e),
    };
    let update = NoteUpdate {
        title: body.title,
        content: body.content,
    };

    let updated = with_notes(&state, &session, move |notes, user_id| {
        notes.update(user_id, &note_id, update)
    })
    .await;
    match updated {
        Ok(Some(note)) => (StatusCode::OK, Json(serde_json::json!({"note": note}))),
        Ok(None) => note_not_found(),
        Err(e) => note_store_error(&e),
    }
}

/// DELETE /api/notes/:note_id
async fn handle_notes_delete(
    State(state): State<AppState>,
    session: Session,
    Path(note_id): Path<String>,
) -> ApiResponse {
    match with_notes(&state, &session, move |notes, user_id| notes.delete(user_id, &note_id)).await
    {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({"status": "deleted"}))),
        Ok(false) => note_not_found(),
        Err(e) => note_store_error(&e),
    }
}

/// Run synchronous store work (SQLite, PBKDF2) on the blocking pool so it
/// never stalls the workers driving revocation lookups.
async fn run_blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op).await?
}

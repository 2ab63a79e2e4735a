//! Route topology. Every mutating or tenant-scoped handler resolves its
//! own `AuthedUser` (or, for agent endpoints, its own bearer/mTLS check)
//! rather than relying on a blanket auth layer — `health_guard` is the
//! only thing applied globally, since maintenance mode has to reject
//! agent and WebSocket traffic too, not just the authenticated REST API.

use std::time::Duration;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::routing::{get, patch, post};
use axum::{middleware, Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{agents, alerts, audit, auth, devices, remote, webhooks, ws};
use crate::middleware::health_guard;
use crate::state::AppState;

/// Liveness: the process is up and serving, regardless of dependency or
/// maintenance-mode state — `health_guard` is what actually rejects traffic
/// during maintenance.
async fn health() -> &'static str {
    "ok"
}

/// Readiness: can this instance actually serve traffic right now. Checked
/// separately from `/health` so an orchestrator stops routing to a replica
/// whose database connection has dropped, or that's mid-startup/shutdown,
/// without restarting the process itself.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(reason) = state.is_operational() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "ready": false, "reason": reason })));
    }
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "ready": false, "reason": e.to_string() }))),
    }
}

fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/enroll", post(agents::enroll))
        .route("/devices/:device_id/heartbeat", post(agents::heartbeat))
        .route("/devices/:device_id/commands/:command_id/result", post(agents::post_command_result))
        .route("/renew-cert", post(agents::renew_cert))
}

fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(devices::list))
        .route("/:device_id", get(devices::get).patch(devices::patch).delete(devices::delete))
        .route("/:device_id/status", post(devices::set_status))
        .route("/:device_id/maintenance/toggle", post(devices::toggle_maintenance))
        .route("/:device_id/commands", post(devices::issue_command))
        .route("/:device_id/commands/:command_id", get(devices::get_command))
        .route("/commands/bulk", post(devices::bulk_command))
        .route("/fanout", post(devices::fanout))
}

fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id/rules", get(alerts::list_rules).post(alerts::create_rule))
        .route("/rules/:rule_id/enabled", patch(alerts::set_rule_enabled))
        .route("/rules/:rule_id", axum::routing::delete(alerts::delete_rule))
        .route("/orgs/:org_id/alerts", get(alerts::list_alerts))
        .route("/alerts/:alert_id/transition", post(alerts::transition_alert))
        .route("/orgs/:org_id/channels", get(alerts::list_channels).post(alerts::create_channel))
        .route("/orgs/:org_id/policies", get(alerts::list_policies).post(alerts::create_policy))
}

fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id", get(webhooks::list))
        .route("/", post(webhooks::create))
        .route("/:webhook_id/status", post(webhooks::set_status))
        .route("/:webhook_id", axum::routing::delete(webhooks::delete))
        .route("/:webhook_id/test", post(webhooks::test_send))
}

fn remote_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(remote::create))
        .route("/:session_id", get(remote::get))
        .route("/:session_id/offer", post(remote::offer))
        .route("/:session_id/answer", post(remote::answer))
        .route("/:session_id/ice", post(remote::ice))
        .route("/:session_id/end", post(remote::end))
        .route("/transfers", post(remote::download))
        .route("/transfers/:transfer_id/cancel", post(remote::cancel_transfer))
        .route("/transfers/:transfer_id/progress", post(remote::progress))
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/mfa/setup", post(auth::mfa_setup))
        .route("/mfa/verify", post(auth::mfa_verify))
        .route("/mfa/enable", post(auth::mfa_enable))
}

fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id", get(audit::list_for_org))
        .route("/orgs/:org_id/export", get(audit::export))
        .route("/verify", get(audit::verify_chain))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            state
                .config
                .cors_allowed_origin
                .parse()
                .unwrap_or_else(|_| "*".parse().unwrap()),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest(
            "/api/v1",
            Router::new()
                .nest("/agents", agent_routes())
                .nest("/devices", device_routes())
                .nest("/alerts", alert_routes())
                .nest("/webhooks", webhook_routes())
                .nest("/remote", remote_routes())
                .nest("/auth", auth_routes())
                .nest("/audit", audit_routes())
                .route("/ws/agents/:agent_id", get(ws::agent_socket))
                .route("/ws/remote/:session_id", get(ws::remote_socket)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), health_guard))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

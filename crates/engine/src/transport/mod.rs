// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the attendance engine.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::EngineState;

/// Build the axum `Router` with every engine route.
///
/// Authorization is per-endpoint rather than a blanket middleware layer:
/// each handler resolves the principal and checks the role it needs,
/// since routes split between Student and Teacher callers rather than
/// sharing one bearer check.
pub fn build_router(state: Arc<EngineState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Session management (teacher)
        .route("/api/v1/sessions", post(http::create_session).get(http::list_sessions))
        .route("/api/v1/sessions/{id}", get(http::get_session))
        .route("/api/v1/sessions/{id}/end", post(http::end_session))
        // Rotating QR controls (teacher)
        .route("/api/v1/sessions/{id}/late-entry/start", post(http::start_late_entry))
        .route("/api/v1/sessions/{id}/late-entry/stop", post(http::stop_late_entry))
        .route("/api/v1/sessions/{id}/late-entry/rotate", post(http::rotate_late_entry))
        .route("/api/v1/sessions/{id}/early-leave/start", post(http::start_early_leave))
        .route("/api/v1/sessions/{id}/early-leave/stop", post(http::stop_early_leave))
        .route("/api/v1/sessions/{id}/early-leave/rotate", post(http::rotate_early_leave))
        // Chain controls (teacher)
        .route("/api/v1/sessions/{id}/chains/entry/seed", post(http::seed_entry))
        .route("/api/v1/sessions/{id}/chains/entry/reseed", post(http::reseed_entry))
        .route("/api/v1/sessions/{id}/chains/entry/stalled", get(http::detect_stalled_entry))
        .route("/api/v1/sessions/{id}/chains/exit/seed", post(http::seed_exit))
        .route("/api/v1/sessions/{id}/chains/exit/reseed", post(http::reseed_exit))
        .route("/api/v1/sessions/{id}/chains/exit/stalled", get(http::detect_stalled_exit))
        // Scan pipeline (student)
        .route("/api/v1/sessions/{id}/join", post(http::join))
        .route("/api/v1/sessions/{id}/scan/chain", post(http::scan_chain))
        .route("/api/v1/sessions/{id}/scan/exit-chain", post(http::scan_exit_chain))
        .route("/api/v1/sessions/{id}/scan/late-entry", post(http::scan_late_entry))
        .route("/api/v1/sessions/{id}/scan/early-leave", post(http::scan_early_leave))
        // Dashboard (teacher)
        .route("/api/v1/sessions/{id}/attendance", get(http::get_attendance))
        .route("/api/v1/sessions/{id}/realtime/negotiate", get(http::realtime_negotiate))
        // Realtime WebSocket
        .route("/ws/{session_id}", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

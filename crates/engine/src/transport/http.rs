// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the attendance engine: session lifecycle, rotating QR
//! controls, chain controls, the scan pipeline, and the dashboard reads.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::attendance::{AttendanceRecord, EntryStatus, FinalStatus};
use crate::domain::chain::{Chain, ChainPhase, ChainState};
use crate::domain::session::{GeofenceConstraint, Session, SessionConstraints, SessionStatus};
use crate::domain::token::{ConsumeOutcome, CreateTokenRequest, TokenType};
use crate::domain::{now_unix, ChainId, SessionId, TokenId, UserId};
use crate::error::AttnError;
use crate::state::EngineState;
use crate::transport::auth::{self, Principal, Role};
use crate::validation::audit::{ScanFlow, ScanLogEntry, ScanResult};
use crate::validation::geo::{self, Gps, LocationOutcome};
use crate::validation::rate_limit::RateLimitOutcome;

const ROTATING_TTL_SECS: i64 = 60;

fn err_response(err: AttnError, message: impl Into<String>) -> Response {
    err.log("http");
    let (status, body) = err.to_http_response(message);
    (status, body).into_response()
}

// -- Wire types --------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub start_at: i64,
    pub end_at: i64,
    pub late_cutoff_minutes: i64,
    pub exit_window_minutes: i64,
    pub status: SessionStatus,
    pub constraints: Option<SessionConstraints>,
    pub late_entry_active: bool,
    pub early_leave_active: bool,
    pub created_at: i64,
    pub ended_at: Option<i64>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.session_id.0,
            class_id: s.class_id,
            teacher_id: s.teacher_id.0,
            start_at: s.start_at,
            end_at: s.end_at,
            late_cutoff_minutes: s.late_cutoff_minutes,
            exit_window_minutes: s.exit_window_minutes,
            status: s.status,
            constraints: s.constraints,
            late_entry_active: s.late_entry_active,
            early_leave_active: s.early_leave_active,
            created_at: s.created_at,
            ended_at: s.ended_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub qr_payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub class_id: String,
    pub start_at: i64,
    pub end_at: i64,
    pub late_cutoff_minutes: i64,
    #[serde(default)]
    pub exit_window_minutes: Option<i64>,
    #[serde(default)]
    pub constraints: Option<ApiConstraints>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConstraints {
    #[serde(default)]
    pub geofence: Option<GeofenceConstraint>,
    #[serde(default)]
    pub wifi_allowlist: Vec<String>,
}

impl From<ApiConstraints> for SessionConstraints {
    fn from(c: ApiConstraints) -> Self {
        Self { geofence: c.geofence, wifi_allowlist: c.wifi_allowlist }
    }
}

/// `POST /api/v1/sessions` — teacher creates a session.
pub async fn create_session(
    State(state): State<Arc<EngineState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let principal = match auth::resolve_principal(&headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }

    let session = match state.sessions.create(crate::domain::session::CreateSessionRequest {
        teacher_id: principal.user_id,
        class_id: req.class_id,
        start_at: req.start_at,
        end_at: req.end_at,
        late_cutoff_minutes: req.late_cutoff_minutes,
        exit_window_minutes: req.exit_window_minutes,
        constraints: req.constraints.map(SessionConstraints::from),
    }) {
        Ok(s) => s,
        Err(e) => return err_response(e, "could not create session"),
    };

    let qr_payload = match crate::domain::session::session_qr_payload(&session) {
        Ok(p) => p,
        Err(e) => return err_response(e, "could not encode session QR"),
    };

    Json(CreateSessionResponse { session: session.into(), qr_payload }).into_response()
}

/// `GET /api/v1/sessions/{id}` — dashboard + student read.
pub async fn get_session(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&SessionId::from(session_id)) {
        Some(s) => Json(SessionResponse::from(s)).into_response(),
        None => err_response(AttnError::NotFound, "session not found"),
    }
}

/// `GET /api/v1/sessions` — list-by-teacher, scoped to the calling principal.
pub async fn list_sessions(State(state): State<Arc<EngineState>>, headers: HeaderMap) -> Response {
    let principal = match auth::resolve_principal(&headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    let sessions: Vec<SessionResponse> =
        state.sessions.list_by_teacher(&principal.user_id).into_iter().map(Into::into).collect();
    Json(sessions).into_response()
}

/// `POST /api/v1/sessions/{id}/end` — teacher ends the session.
pub async fn end_session(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match auth::resolve_principal(&headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    if let Err(e) = auth::validate_shared_secret(&headers, state.config.shared_secret.as_deref()) {
        return err_response(e, "invalid shared secret");
    }
    match state.sessions.end(&SessionId::from(session_id), &principal.user_id, &state.attendance) {
        Ok(s) => Json(SessionResponse::from(s)).into_response(),
        Err(e) => err_response(e, "could not end session"),
    }
}

// -- Rotating QR controls -----------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatingTokenResponse {
    pub token_id: String,
    pub exp: i64,
}

async fn start_rotating(
    state: &Arc<EngineState>,
    headers: &HeaderMap,
    session_id: SessionId,
    token_type: TokenType,
) -> Response {
    let principal = match auth::resolve_principal(headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    if let Err(e) = auth::validate_shared_secret(headers, state.config.shared_secret.as_deref()) {
        return err_response(e, "invalid shared secret");
    }
    let token = match state.tokens.create(CreateTokenRequest {
        session_id: session_id.clone(),
        token_type,
        ttl_seconds: ROTATING_TTL_SECS,
        single_use: true,
        chain_id: None,
        issued_to: None,
        seq: 0,
    }) {
        Ok(t) => t,
        Err(e) => return err_response(e, "could not mint rotating token"),
    };
    state.tokens.cache_rotating(&token);

    let update_result = match token_type {
        TokenType::LateEntry => {
            state.sessions.update_late_entry_status(&session_id, true, Some(token.token_id.clone()))
        }
        TokenType::EarlyLeave => {
            state.sessions.update_early_leave_status(&session_id, true, Some(token.token_id.clone()))
        }
        _ => return err_response(AttnError::InvalidRequest, "not a rotating token type"),
    };
    if let Err(e) = update_result {
        return err_response(e, "could not update session rotation state");
    }

    Json(RotatingTokenResponse { token_id: token.token_id.0, exp: token.exp }).into_response()
}

async fn stop_rotating(
    state: &Arc<EngineState>,
    headers: &HeaderMap,
    session_id: SessionId,
    is_late: bool,
) -> Response {
    let principal = match auth::resolve_principal(headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    if let Err(e) = auth::validate_shared_secret(headers, state.config.shared_secret.as_deref()) {
        return err_response(e, "invalid shared secret");
    }
    let Some(session) = state.sessions.get(&session_id) else {
        return err_response(AttnError::NotFound, "session not found");
    };
    let current =
        if is_late { session.current_late_token_id.clone() } else { session.current_early_token_id.clone() };
    if let Some(token_id) = current {
        state.tokens.revoke(&session_id, &token_id);
    }
    let result = if is_late {
        state.sessions.update_late_entry_status(&session_id, false, None)
    } else {
        state.sessions.update_early_leave_status(&session_id, false, None)
    };
    match result {
        Ok(s) => Json(SessionResponse::from(s)).into_response(),
        Err(e) => err_response(e, "could not stop rotation"),
    }
}

async fn rotate(
    state: &Arc<EngineState>,
    headers: &HeaderMap,
    session_id: SessionId,
    token_type: TokenType,
) -> Response {
    let principal = match auth::resolve_principal(headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    if let Err(e) = auth::validate_shared_secret(headers, state.config.shared_secret.as_deref()) {
        return err_response(e, "invalid shared secret");
    }
    let Some(session) = state.sessions.get(&session_id) else {
        return err_response(AttnError::NotFound, "session not found");
    };
    let is_late = matches!(token_type, TokenType::LateEntry);
    let active = if is_late { session.late_entry_active } else { session.early_leave_active };
    if !active {
        return err_response(AttnError::InvalidRequest, "rotation is not active");
    }
    let current = if is_late { session.current_late_token_id } else { session.current_early_token_id };
    if let Some(ref old) = current {
        state.tokens.revoke(&session_id, old);
    }

    let token = match state.tokens.create(CreateTokenRequest {
        session_id: session_id.clone(),
        token_type,
        ttl_seconds: ROTATING_TTL_SECS,
        single_use: true,
        chain_id: None,
        issued_to: None,
        seq: 0,
    }) {
        Ok(t) => t,
        Err(e) => return err_response(e, "could not mint rotating token"),
    };
    state.tokens.cache_rotating(&token);

    let update_result = if is_late {
        state.sessions.update_late_entry_status(&session_id, true, Some(token.token_id.clone()))
    } else {
        state.sessions.update_early_leave_status(&session_id, true, Some(token.token_id.clone()))
    };
    if let Err(e) = update_result {
        return err_response(e, "could not update session rotation state");
    }

    Json(RotatingTokenResponse { token_id: token.token_id.0, exp: token.exp }).into_response()
}

pub async fn start_late_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    start_rotating(&state, &headers, SessionId::from(session_id), TokenType::LateEntry).await
}

pub async fn stop_late_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    stop_rotating(&state, &headers, SessionId::from(session_id), true).await
}

pub async fn rotate_late_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    rotate(&state, &headers, SessionId::from(session_id), TokenType::LateEntry).await
}

pub async fn start_early_leave(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    start_rotating(&state, &headers, SessionId::from(session_id), TokenType::EarlyLeave).await
}

pub async fn stop_early_leave(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    stop_rotating(&state, &headers, SessionId::from(session_id), false).await
}

pub async fn rotate_early_leave(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    rotate(&state, &headers, SessionId::from(session_id), TokenType::EarlyLeave).await
}

// -- Chain controls ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub k: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSeedResponse {
    pub chains: Vec<ChainSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub chain_id: String,
    pub index: u32,
    pub baton_token_id: String,
    pub holder: String,
}

async fn seed_or_reseed(
    state: &Arc<EngineState>,
    headers: &HeaderMap,
    session_id: SessionId,
    phase: ChainPhase,
    k: usize,
    is_reseed: bool,
) -> Response {
    let principal = match auth::resolve_principal(headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    if let Err(e) = auth::validate_shared_secret(headers, state.config.shared_secret.as_deref()) {
        return err_response(e, "invalid shared secret");
    }

    let eligible = match phase {
        ChainPhase::Entry => state.roster.entry_eligible(&session_id),
        ChainPhase::Exit => state.attendance.exit_eligible(&session_id),
    };

    let result = if is_reseed {
        state.chains.reseed_chains(&session_id, phase, k, &eligible, &state.tokens)
    } else {
        state.chains.seed_chains(&session_id, phase, k, &eligible, &state.tokens)
    };

    match result {
        Ok(created) => {
            let chains = created
                .into_iter()
                .map(|(chain, token)| ChainSummary {
                    chain_id: chain.chain_id.0,
                    index: chain.index,
                    baton_token_id: token.token_id.0,
                    holder: chain.last_holder.0,
                })
                .collect();
            Json(ChainSeedResponse { chains }).into_response()
        }
        Err(e) => err_response(e, "could not seed chains"),
    }
}

pub async fn seed_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SeedRequest>,
) -> Response {
    seed_or_reseed(&state, &headers, SessionId::from(session_id), ChainPhase::Entry, req.k, false).await
}

pub async fn seed_exit(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SeedRequest>,
) -> Response {
    seed_or_reseed(&state, &headers, SessionId::from(session_id), ChainPhase::Exit, req.k, false).await
}

pub async fn reseed_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SeedRequest>,
) -> Response {
    seed_or_reseed(&state, &headers, SessionId::from(session_id), ChainPhase::Entry, req.k, true).await
}

pub async fn reseed_exit(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SeedRequest>,
) -> Response {
    seed_or_reseed(&state, &headers, SessionId::from(session_id), ChainPhase::Exit, req.k, true).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalledResponse {
    pub chain_ids: Vec<String>,
}

async fn detect_stalled_for(
    state: &Arc<EngineState>,
    headers: &HeaderMap,
    session_id: SessionId,
    phase: ChainPhase,
) -> Response {
    let principal = match auth::resolve_principal(headers) {
        Ok(p) => p,
        Err(e) => return err_response(e, "unauthenticated"),
    };
    if let Err(e) = auth::require_role(&principal, Role::Teacher) {
        return err_response(e, "teacher role required");
    }
    let stalled = state.chains.detect_stalled(&session_id, phase, state.config.stall_after_secs);
    if !stalled.is_empty() {
        let chain_ids: Vec<ChainId> = stalled.iter().map(|c| c.chain_id.clone()).collect();
        state.realtime.stall_alert(&session_id, chain_ids);
    }
    Json(StalledResponse { chain_ids: stalled.into_iter().map(|c| c.chain_id.0).collect() })
        .into_response()
}

pub async fn detect_stalled_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    detect_stalled_for(&state, &headers, SessionId::from(session_id), ChainPhase::Entry).await
}

pub async fn detect_stalled_exit(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    detect_stalled_for(&state, &headers, SessionId::from(session_id), ChainPhase::Exit).await
}

// -- Scan pipeline ---------------------------------------------------------------
//
// Every scan flow runs the same seven steps: resolve the
// principal, require the student role, fetch the session and require it is
// ACTIVE, rate-limit, validate location, run the flow-specific domain
// operation, and append a ScanLog row with the final result. A failure at
// any step after principal resolution is attributable to a scanner and is
// logged; a failure resolving the principal itself is not (there is no
// `scannerId` to log it under).

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub device_fingerprint: String,
    #[serde(default)]
    pub gps: Option<Gps>,
    #[serde(default)]
    pub bssid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub token_id: String,
    pub device_fingerprint: String,
    #[serde(default)]
    pub gps: Option<Gps>,
    #[serde(default)]
    pub bssid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub joined: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainScanResponse {
    pub chain_id: String,
    pub last_holder: String,
    pub last_seq: u64,
    pub successor_token_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMarkResponse {
    pub student_id: String,
    pub entry_status: Option<EntryStatus>,
    pub exit_verified: bool,
    pub early_leave_at: Option<i64>,
}

/// Everything steps 1-5 need to know about the inbound request, gathered
/// once so the logging closure and the anti-cheat check share one copy.
struct ScanInputs {
    session_id: SessionId,
    flow: ScanFlow,
    token_id: Option<TokenId>,
    device_fingerprint: String,
    ip: String,
    bssid: Option<String>,
    gps: Option<Gps>,
    user_agent: Option<String>,
}

fn user_agent_of(headers: &HeaderMap) -> Option<String> {
    headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_owned)
}

/// Map a pipeline failure to its `ScanResult` for the audit log.
fn scan_result_for(err: &AttnError) -> ScanResult {
    match err {
        AttnError::RateLimited => ScanResult::RateLimited,
        AttnError::GeofenceViolation | AttnError::WifiViolation => ScanResult::LocationViolation,
        AttnError::SessionEnded => ScanResult::SessionEnded,
        AttnError::ExpiredToken
        | AttnError::TokenAlreadyUsed
        | AttnError::NotFound
        | AttnError::InvalidRequest
        | AttnError::IneligibleStudent => ScanResult::TokenInvalid,
        AttnError::Forbidden => ScanResult::Forbidden,
        AttnError::Unauthorized => ScanResult::Unauthorized,
        _ => ScanResult::Internal,
    }
}

#[allow(clippy::too_many_arguments)]
fn append_scan_log(
    state: &EngineState,
    inputs: &ScanInputs,
    scanner_id: UserId,
    holder_id: Option<UserId>,
    result: ScanResult,
    error: Option<&AttnError>,
) {
    state.scan_logs.append(
        &inputs.session_id,
        ScanLogEntry {
            flow: inputs.flow,
            token_id: inputs.token_id.clone(),
            holder_id,
            scanner_id,
            device_fingerprint: inputs.device_fingerprint.clone(),
            ip: inputs.ip.clone(),
            bssid: inputs.bssid.clone(),
            gps: inputs.gps,
            user_agent: inputs.user_agent.clone(),
            result,
            error: error.map(|e| e.as_str().to_owned()),
            scanned_at: now_unix(),
        },
    );
}

/// Anti-cheat gating. Device is checked before IP, and a single logical
/// increment happens only when both pass; geofence and Wi-Fi checks
/// combine conjunctively.
fn anti_cheat_check(
    state: &EngineState,
    session: &Session,
    device_fingerprint: &str,
    ip: &str,
    gps: Option<Gps>,
    bssid: Option<&str>,
) -> Result<(), AttnError> {
    match state.rate_limiter.check(device_fingerprint, ip) {
        RateLimitOutcome::Allowed => {}
        RateLimitOutcome::DeviceLimited | RateLimitOutcome::IpLimited => {
            return Err(AttnError::RateLimited)
        }
    }
    match geo::validate_location(session.constraints.as_ref(), gps, bssid) {
        LocationOutcome::Valid => Ok(()),
        LocationOutcome::GeofenceViolation | LocationOutcome::MissingGps => {
            Err(AttnError::GeofenceViolation)
        }
        LocationOutcome::WifiViolation | LocationOutcome::MissingBssid => {
            Err(AttnError::WifiViolation)
        }
    }
}

/// Steps 1-5 of the Scan Pipeline. Returns the resolved principal and
/// session on success; on failure, the failure response has already been
/// logged (when a scanner identity was available) and is returned directly
/// so the caller can propagate it without duplicating that bookkeeping.
fn run_scan_preamble(
    state: &EngineState,
    headers: &HeaderMap,
    inputs: &ScanInputs,
) -> Result<(Principal, Session), Response> {
    let principal = auth::resolve_principal(headers).map_err(|e| err_response(e, "unauthenticated"))?;

    let reject = |state: &EngineState, principal: &Principal, e: AttnError| -> Response {
        append_scan_log(state, inputs, principal.user_id.clone(), None, scan_result_for(&e), Some(&e));
        err_response(e, "scan rejected")
    };

    if let Err(e) = auth::require_role(&principal, Role::Student) {
        return Err(reject(state, &principal, e));
    }
    let Some(session) = state.sessions.get(&inputs.session_id) else {
        return Err(reject(state, &principal, AttnError::NotFound));
    };
    if session.status != SessionStatus::Active {
        return Err(reject(state, &principal, AttnError::SessionEnded));
    }
    if let Err(e) = anti_cheat_check(
        state,
        &session,
        &inputs.device_fingerprint,
        &inputs.ip,
        inputs.gps,
        inputs.bssid.as_deref(),
    ) {
        return Err(reject(state, &principal, e));
    }

    Ok((principal, session))
}

/// `POST /api/v1/sessions/{id}/join` — a student joins the session,
/// becoming eligible for ENTRY-phase chain seeding.
pub async fn join(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<JoinRequest>,
) -> Response {
    let inputs = ScanInputs {
        session_id: SessionId::from(session_id),
        flow: ScanFlow::Join,
        token_id: None,
        device_fingerprint: req.device_fingerprint,
        ip: addr.ip().to_string(),
        bssid: req.bssid,
        gps: req.gps,
        user_agent: user_agent_of(&headers),
    };

    let (principal, _session) = match run_scan_preamble(&state, &headers, &inputs) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };

    state.roster.join(&inputs.session_id, &principal.user_id);
    append_scan_log(&state, &inputs, principal.user_id, None, ScanResult::Success, None);

    Json(JoinResponse { joined: true }).into_response()
}

fn emit_chain_and_attendance(state: &EngineState, chain: &Chain, flow: ScanFlow) {
    state.realtime.chain_update(
        &chain.session_id,
        chain.chain_id.clone(),
        chain.phase,
        chain.last_holder.clone(),
        chain.last_seq,
        ChainState::Active,
    );
    let (entry_status, exit_verified) = match flow {
        ScanFlow::EntryChain => (Some(EntryStatus::PresentEntry), None),
        ScanFlow::ExitChain => (None, Some(true)),
        _ => (None, None),
    };
    state.realtime.attendance_update(
        &chain.session_id,
        chain.last_holder.clone(),
        entry_status,
        exit_verified,
        None,
    );
}

/// Shared body for `scanChain` and `scanExitChain` — both drive
/// `Chain::process_chain_scan`, differing only in the `ScanFlow` tag.
async fn scan_chain_flow(
    state: Arc<EngineState>,
    session_id: String,
    addr: SocketAddr,
    headers: HeaderMap,
    req: ScanRequest,
    flow: ScanFlow,
) -> Response {
    let inputs = ScanInputs {
        session_id: SessionId::from(session_id),
        flow,
        token_id: Some(TokenId::from(req.token_id)),
        device_fingerprint: req.device_fingerprint,
        ip: addr.ip().to_string(),
        bssid: req.bssid,
        gps: req.gps,
        user_agent: user_agent_of(&headers),
    };

    let (principal, _session) = match run_scan_preamble(&state, &headers, &inputs) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };

    let Some(token_id) = inputs.token_id.clone() else {
        return err_response(AttnError::InvalidRequest, "missing tokenId");
    };
    match state.chains.process_chain_scan(
        &inputs.session_id,
        &token_id,
        &principal.user_id,
        &state.tokens,
        &state.attendance,
    ) {
        Ok(result) => {
            emit_chain_and_attendance(&state, &result.chain, flow);
            append_scan_log(
                &state,
                &inputs,
                principal.user_id,
                Some(result.chain.last_holder.clone()),
                ScanResult::Success,
                None,
            );
            Json(ChainScanResponse {
                chain_id: result.chain.chain_id.0,
                last_holder: result.chain.last_holder.0,
                last_seq: result.chain.last_seq,
                successor_token_id: result.successor_token.token_id.0,
            })
            .into_response()
        }
        Err(e) => {
            append_scan_log(&state, &inputs, principal.user_id, None, scan_result_for(&e), Some(&e));
            err_response(e, "scan failed")
        }
    }
}

pub async fn scan_chain(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    scan_chain_flow(state, session_id, addr, headers, req, ScanFlow::EntryChain).await
}

pub async fn scan_exit_chain(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    scan_chain_flow(state, session_id, addr, headers, req, ScanFlow::ExitChain).await
}

/// Shared body for `scanLateEntry` and `scanEarlyLeave` — both consume the
/// *current* rotating token by id and delegate to Attendance; rotation
/// itself is a separate teacher-triggered operation.
async fn scan_rotating_flow(
    state: Arc<EngineState>,
    session_id: String,
    addr: SocketAddr,
    headers: HeaderMap,
    req: ScanRequest,
    flow: ScanFlow,
    expected_type: TokenType,
) -> Response {
    let inputs = ScanInputs {
        session_id: SessionId::from(session_id),
        flow,
        token_id: Some(TokenId::from(req.token_id)),
        device_fingerprint: req.device_fingerprint,
        ip: addr.ip().to_string(),
        bssid: req.bssid,
        gps: req.gps,
        user_agent: user_agent_of(&headers),
    };

    let (principal, _session) = match run_scan_preamble(&state, &headers, &inputs) {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };

    let Some(token_id) = inputs.token_id.clone() else {
        append_scan_log(
            &state,
            &inputs,
            principal.user_id,
            None,
            ScanResult::TokenInvalid,
            Some(&AttnError::InvalidRequest),
        );
        return err_response(AttnError::InvalidRequest, "missing tokenId");
    };
    let consume_result = match state.tokens.consume(&inputs.session_id, &token_id) {
        Ok((outcome, consumed)) => match outcome {
            ConsumeOutcome::Success => match consumed {
                Some(token) if token.token_type == expected_type => Ok(()),
                Some(_) => Err(AttnError::InvalidRequest),
                None => Err(AttnError::Internal),
            },
            ConsumeOutcome::AlreadyUsed => Err(AttnError::TokenAlreadyUsed),
            ConsumeOutcome::Expired => Err(AttnError::ExpiredToken),
            ConsumeOutcome::Revoked => Err(AttnError::ExpiredToken),
            ConsumeOutcome::NotFound => Err(AttnError::NotFound),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = consume_result {
        append_scan_log(&state, &inputs, principal.user_id, None, scan_result_for(&e), Some(&e));
        return err_response(e, "scan failed");
    }

    let mark_result = match flow {
        ScanFlow::LateEntry => {
            state.attendance.mark_entry(&inputs.session_id, &principal.user_id, EntryStatus::LateEntry)
        }
        ScanFlow::EarlyLeave => state.attendance.mark_early_leave(&inputs.session_id, &principal.user_id),
        _ => Err(AttnError::Internal),
    };

    match mark_result {
        Ok(record) => {
            state.realtime.attendance_update(
                &inputs.session_id,
                principal.user_id.clone(),
                record.entry_status,
                Some(record.exit_verified),
                record.early_leave_at,
            );
            let response = AttendanceMarkResponse {
                student_id: principal.user_id.as_str().to_owned(),
                entry_status: record.entry_status,
                exit_verified: record.exit_verified,
                early_leave_at: record.early_leave_at,
            };
            append_scan_log(&state, &inputs, principal.user_id, None, ScanResult::Success, None);
            Json(response).into_response()
        }
        Err(e) => {
            append_scan_log(&state, &inputs, principal.user_id, None, scan_result_for(&e), Some(&e));
            err_response(e, "could not record attendance")
        }
    }
}

pub async fn scan_late_entry(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    scan_rotating_flow(state, session_id, addr, headers, req, ScanFlow::LateEntry, TokenType::LateEntry)
        .await
}

pub async fn scan_early_leave(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Response {
    scan_rotating_flow(state, session_id, addr, headers, req, ScanFlow::EarlyLeave, TokenType::EarlyLeave)
        .await
}

// -- Dashboard -----------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    pub entry_status: Option<EntryStatus>,
    pub entry_at: Option<i64>,
    pub exit_verified: bool,
    pub exit_verified_at: Option<i64>,
    pub early_leave_at: Option<i64>,
    pub final_status: Option<FinalStatus>,
}

fn attendance_row(student_id: UserId, record: AttendanceRecord) -> AttendanceRow {
    AttendanceRow {
        student_id: student_id.0,
        entry_status: record.entry_status,
        entry_at: record.entry_at,
        exit_verified: record.exit_verified,
        exit_verified_at: record.exit_verified_at,
        early_leave_at: record.early_leave_at,
        final_status: record.final_status,
    }
}

/// `GET /api/v1/sessions/{id}/attendance` — dashboard read.
pub async fn get_attendance(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from(session_id);
    let rows: Vec<AttendanceRow> = state
        .attendance
        .get_all(&session_id)
        .into_iter()
        .map(|(student_id, record)| attendance_row(student_id, record))
        .collect();
    Json(rows).into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /api/v1/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "running" })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeNegotiateResponse {
    pub ws_url: String,
}

/// `GET /api/v1/sessions/{id}/realtime/negotiate` — the channel descriptor
/// the transport understands.
pub async fn realtime_negotiate(Path(session_id): Path<String>) -> impl IntoResponse {
    Json(RealtimeNegotiateResponse { ws_url: format!("/ws/{session_id}") })
}

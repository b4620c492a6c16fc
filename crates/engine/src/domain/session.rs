// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records and rotating-token bookkeeping.
//!
//! `get` reads through a short in-process cache, the same write-through
//! pattern `TokenStore` uses for rotating tokens — every mutating
//! operation below invalidates it before returning.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::attendance::AttendanceStore;
use crate::domain::{now_unix, SessionId, TokenId, UserId};
use crate::error::AttnError;
use crate::storage::{CasTable, StorageError};

const SESSION_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceConstraint {
    pub lat: f64,
    pub lon: f64,
    pub radius_meters: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConstraints {
    pub geofence: Option<GeofenceConstraint>,
    pub wifi_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub class_id: String,
    pub teacher_id: UserId,
    pub start_at: i64,
    pub end_at: i64,
    pub late_cutoff_minutes: i64,
    pub exit_window_minutes: i64,
    pub status: SessionStatus,
    pub owner_transfer: bool,
    pub constraints: Option<SessionConstraints>,
    pub late_entry_active: bool,
    pub current_late_token_id: Option<TokenId>,
    pub early_leave_active: bool,
    pub current_early_token_id: Option<TokenId>,
    pub created_at: i64,
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub teacher_id: UserId,
    pub class_id: String,
    pub start_at: i64,
    pub end_at: i64,
    pub late_cutoff_minutes: i64,
    pub exit_window_minutes: Option<i64>,
    pub constraints: Option<SessionConstraints>,
}

struct CachedSession {
    session: Session,
    cached_at: Instant,
}

pub struct SessionStore {
    rows: CasTable<SessionId, Session>,
    cache: RwLock<HashMap<SessionId, CachedSession>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self { rows: CasTable::new(), cache: RwLock::new(HashMap::new()) }
    }

    pub fn create(&self, req: CreateSessionRequest) -> Result<Session, AttnError> {
        if req.class_id.trim().is_empty() {
            return Err(AttnError::InvalidRequest);
        }
        let session_id = SessionId::from(Uuid::new_v4().to_string());
        let session = Session {
            session_id: session_id.clone(),
            class_id: req.class_id,
            teacher_id: req.teacher_id,
            start_at: req.start_at,
            end_at: req.end_at,
            late_cutoff_minutes: req.late_cutoff_minutes,
            exit_window_minutes: req.exit_window_minutes.unwrap_or(10),
            status: SessionStatus::Active,
            owner_transfer: true,
            constraints: req.constraints,
            late_entry_active: false,
            current_late_token_id: None,
            early_leave_active: false,
            current_early_token_id: None,
            created_at: now_unix(),
            ended_at: None,
        };
        self.rows.create_if_absent(session_id, session.clone()).map_err(storage_to_attn)?;
        Ok(session)
    }

    /// Read through the 60s cache; a miss falls through to storage and
    /// repopulates it.
    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        if let Some(session) = self.cached(session_id) {
            return Some(session);
        }
        let (session, _) = self.rows.get(session_id)?;
        self.cache_insert(session.clone());
        Some(session)
    }

    pub fn list_by_teacher(&self, teacher_id: &UserId) -> Vec<Session> {
        self.rows
            .scan(|_, session| &session.teacher_id == teacher_id)
            .into_iter()
            .map(|(_, session, _)| session)
            .collect()
    }

    /// Every ACTIVE session — used by the background stall ticker, which
    /// has no per-session subscription list to consult.
    pub fn list_active(&self) -> Vec<Session> {
        self.rows
            .scan(|_, session| session.status == SessionStatus::Active)
            .into_iter()
            .map(|(_, session, _)| session)
            .collect()
    }

    /// Ends the session and finalizes every attendance record under it.
    pub fn end(
        &self,
        session_id: &SessionId,
        teacher_id: &UserId,
        attendance: &AttendanceStore,
    ) -> Result<Session, AttnError> {
        let (mut session, version) = self.rows.get(session_id).ok_or(AttnError::NotFound)?;
        if &session.teacher_id != teacher_id {
            return Err(AttnError::Forbidden);
        }
        if session.status != SessionStatus::Active {
            return Err(AttnError::SessionEnded);
        }

        session.status = SessionStatus::Ended;
        session.ended_at = Some(now_unix());
        session.late_entry_active = false;
        session.early_leave_active = false;

        self.rows
            .put_if_version(session_id, session.clone(), &version)
            .map_err(storage_to_attn)?;
        self.invalidate(session_id);

        attendance.compute_final_status(session_id)?;
        Ok(session)
    }

    pub fn update_late_entry_status(
        &self,
        session_id: &SessionId,
        active: bool,
        token_id: Option<TokenId>,
    ) -> Result<Session, AttnError> {
        self.update(session_id, |session| {
            session.late_entry_active = active;
            session.current_late_token_id = token_id;
        })
    }

    pub fn update_early_leave_status(
        &self,
        session_id: &SessionId,
        active: bool,
        token_id: Option<TokenId>,
    ) -> Result<Session, AttnError> {
        self.update(session_id, |session| {
            session.early_leave_active = active;
            session.current_early_token_id = token_id;
        })
    }

    fn update(
        &self,
        session_id: &SessionId,
        apply: impl Fn(&mut Session),
    ) -> Result<Session, AttnError> {
        loop {
            let (mut session, version) = self.rows.get(session_id).ok_or(AttnError::NotFound)?;
            apply(&mut session);
            match self.rows.put_if_version(session_id, session.clone(), &version) {
                Ok(_) => {
                    self.invalidate(session_id);
                    return Ok(session);
                }
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(storage_to_attn(e)),
            }
        }
    }

    fn cached(&self, session_id: &SessionId) -> Option<Session> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let entry = cache.get(session_id)?;
        if entry.cached_at.elapsed().as_secs() >= SESSION_CACHE_TTL_SECS {
            return None;
        }
        Some(entry.session.clone())
    }

    fn cache_insert(&self, session: Session) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(session.session_id.clone(), CachedSession { session, cached_at: Instant::now() });
    }

    fn invalidate(&self, session_id: &SessionId) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(session_id);
    }
}

/// The base64-encoded `{type:"SESSION", sessionId, classId}` QR payload
/// handed to the teacher when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionQrPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "classId")]
    class_id: &'a str,
}

pub fn session_qr_payload(session: &Session) -> Result<String, AttnError> {
    let payload = SessionQrPayload {
        kind: "SESSION",
        session_id: session.session_id.as_str(),
        class_id: &session.class_id,
    };
    let json = serde_json::to_vec(&payload).map_err(|_| AttnError::Internal)?;
    Ok(STANDARD.encode(json))
}

fn storage_to_attn(err: StorageError) -> AttnError {
    match err {
        StorageError::NotFound => AttnError::NotFound,
        StorageError::Conflict => AttnError::Conflict,
        StorageError::Internal(_) => AttnError::StorageError,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

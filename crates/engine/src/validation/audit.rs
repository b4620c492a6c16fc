// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only scan audit log.
//!
//! Row keys are `zero-padded-seconds + '_' + random-suffix` so that rows
//! sort in time order even when several writers land in the same
//! partition during the same second.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{now_unix, SessionId, TokenId, UserId};
use crate::storage::CasTable;
use crate::validation::geo::Gps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanFlow {
    EntryChain,
    ExitChain,
    LateEntry,
    EarlyLeave,
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResult {
    Success,
    RateLimited,
    LocationViolation,
    TokenInvalid,
    Unauthorized,
    Forbidden,
    SessionEnded,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub flow: ScanFlow,
    pub token_id: Option<TokenId>,
    pub holder_id: Option<UserId>,
    pub scanner_id: UserId,
    pub device_fingerprint: String,
    pub ip: String,
    pub bssid: Option<String>,
    pub gps: Option<Gps>,
    pub user_agent: Option<String>,
    pub result: ScanResult,
    pub error: Option<String>,
    pub scanned_at: i64,
}

pub struct ScanLogStore {
    rows: CasTable<(SessionId, String), ScanLogEntry>,
}

impl Default for ScanLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanLogStore {
    pub fn new() -> Self {
        Self { rows: CasTable::new() }
    }

    /// Always succeeds from the caller's point of view: the audit trail
    /// is never allowed to fail a scan it is merely recording.
    pub fn append(&self, session_id: &SessionId, entry: ScanLogEntry) -> String {
        let row_key = next_row_key();
        self.rows.put_unconditional((session_id.clone(), row_key.clone()), entry);
        row_key
    }

    pub fn list_for_session(&self, session_id: &SessionId) -> Vec<ScanLogEntry> {
        let mut rows = self.rows.scan(|(sid, _), _| sid == session_id);
        rows.sort_by(|(a, ..), (b, ..)| a.1.cmp(&b.1));
        rows.into_iter().map(|(_, entry, _)| entry).collect()
    }
}

fn next_row_key() -> String {
    let seconds = now_unix().max(0);
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("{seconds:020}_{suffix:06}")
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;

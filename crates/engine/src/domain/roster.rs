// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session roster: the set of students who have joined a session.
//!
//! Joining is the `JOIN` scan flow (a student scans the teacher's Session
//! QR). Entry-phase chain seeding draws its eligible pool from here; exit
//! eligibility is derived from `AttendanceStore` instead, so this store
//! only ever answers "who has joined".

use std::collections::HashSet;
use std::sync::RwLock;

use crate::domain::{SessionId, UserId};

/// Owns the joined-student set per session. A `HashSet` keyed by session
/// rather than a `CasTable` row, since membership is add-only and never
/// individually versioned — there is no per-student record to race on.
pub struct RosterStore {
    joined: RwLock<std::collections::HashMap<SessionId, HashSet<UserId>>>,
}

impl Default for RosterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterStore {
    pub fn new() -> Self {
        Self { joined: RwLock::new(std::collections::HashMap::new()) }
    }

    /// Record a student as joined. Idempotent — joining twice is a no-op.
    pub fn join(&self, session_id: &SessionId, student_id: &UserId) {
        let mut joined = self.joined.write().unwrap_or_else(|e| e.into_inner());
        joined.entry(session_id.clone()).or_default().insert(student_id.clone());
    }

    pub fn has_joined(&self, session_id: &SessionId, student_id: &UserId) -> bool {
        let joined = self.joined.read().unwrap_or_else(|e| e.into_inner());
        joined.get(session_id).is_some_and(|set| set.contains(student_id))
    }

    /// Every student who has joined this session — the ENTRY-phase
    /// eligibility pool.
    pub fn entry_eligible(&self, session_id: &SessionId) -> Vec<UserId> {
        let joined = self.joined.read().unwrap_or_else(|e| e.into_inner());
        joined.get(session_id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }
}

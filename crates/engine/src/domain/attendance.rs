// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-student attendance records and final-status computation.
//!
//! Every mutation here is a field-disjoint merge so that entry, exit, and
//! early-leave updates commute regardless of arrival order — the decision
//! table in `compute_final_status` depends on that commutativity.

use serde::{Deserialize, Serialize};

use crate::domain::{now_unix, SessionId, UserId};
use crate::error::AttnError;
use crate::storage::CasTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    PresentEntry,
    LateEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Present,
    Late,
    LeftEarly,
    EarlyLeave,
    Absent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub entry_status: Option<EntryStatus>,
    pub entry_at: Option<i64>,
    pub exit_verified: bool,
    pub exit_verified_at: Option<i64>,
    pub early_leave_at: Option<i64>,
    pub final_status: Option<FinalStatus>,
}

/// Owns the `Attendance` table, keyed `(sessionId, studentId)`.
pub struct AttendanceStore {
    rows: CasTable<(SessionId, UserId), AttendanceRecord>,
}

impl Default for AttendanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttendanceStore {
    pub fn new() -> Self {
        Self { rows: CasTable::new() }
    }

    pub fn get(&self, session_id: &SessionId, student_id: &UserId) -> Option<AttendanceRecord> {
        let key = (session_id.clone(), student_id.clone());
        self.rows.get(&key).map(|(record, _)| record)
    }

    pub fn get_all(&self, session_id: &SessionId) -> Vec<(UserId, AttendanceRecord)> {
        self.rows
            .scan(|(sid, _), _| sid == session_id)
            .into_iter()
            .map(|((_, student_id), record, _)| (student_id, record))
            .collect()
    }

    /// The EXIT-phase eligibility pool: students who entered
    /// (present or late) and have not already left early.
    pub fn exit_eligible(&self, session_id: &SessionId) -> Vec<UserId> {
        self.get_all(session_id)
            .into_iter()
            .filter(|(_, record)| record.entry_status.is_some() && record.early_leave_at.is_none())
            .map(|(student_id, _)| student_id)
            .collect()
    }

    /// Upsert `entryStatus`/`entryAt`. Retries on CAS conflict since this
    /// is a merge, not a single-use consume — losing a race here just
    /// means applying the merge against a newer base.
    pub fn mark_entry(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
        status: EntryStatus,
    ) -> Result<AttendanceRecord, AttnError> {
        self.merge(session_id, student_id, |record| {
            record.entry_status = Some(status);
            record.entry_at = Some(now_unix());
        })
    }

    pub fn mark_exit_verified(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
    ) -> Result<AttendanceRecord, AttnError> {
        self.merge(session_id, student_id, |record| {
            record.exit_verified = true;
            record.exit_verified_at = Some(now_unix());
        })
    }

    pub fn mark_early_leave(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
    ) -> Result<AttendanceRecord, AttnError> {
        self.merge(session_id, student_id, |record| {
            record.early_leave_at = Some(now_unix());
        })
    }

    /// Compute and persist `finalStatus` for every record under a session.
    /// Called once, at session end.
    pub fn compute_final_status(&self, session_id: &SessionId) -> Result<(), AttnError> {
        for (student_id, _) in self.get_all(session_id) {
            self.merge(session_id, &student_id, |record| {
                record.final_status = Some(final_status_for(record));
            })?;
        }
        Ok(())
    }

    fn merge(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
        apply: impl Fn(&mut AttendanceRecord),
    ) -> Result<AttendanceRecord, AttnError> {
        let key = (session_id.clone(), student_id.clone());
        loop {
            match self.rows.get(&key) {
                Some((mut record, version)) => {
                    apply(&mut record);
                    match self.rows.put_if_version(&key, record.clone(), &version) {
                        Ok(_) => return Ok(record),
                        Err(crate::storage::StorageError::Conflict) => continue,
                        Err(crate::storage::StorageError::NotFound) => continue,
                        Err(crate::storage::StorageError::Internal(_)) => {
                            return Err(AttnError::StorageError)
                        }
                    }
                }
                None => {
                    let mut record = AttendanceRecord::default();
                    apply(&mut record);
                    match self.rows.create_if_absent(key.clone(), record.clone()) {
                        Ok(_) => return Ok(record),
                        Err(_) => continue,
                    }
                }
            }
        }
    }
}

/// Pure decision table — see the priority order documented alongside it.
fn final_status_for(record: &AttendanceRecord) -> FinalStatus {
    if record.early_leave_at.is_some() {
        return FinalStatus::EarlyLeave;
    }
    match (record.entry_status, record.exit_verified) {
        (Some(EntryStatus::PresentEntry), true) => FinalStatus::Present,
        (Some(EntryStatus::PresentEntry), false) => FinalStatus::LeftEarly,
        (Some(EntryStatus::LateEntry), true) => FinalStatus::Late,
        (Some(EntryStatus::LateEntry), false) => FinalStatus::LeftEarly,
        (None, _) => FinalStatus::Absent,
    }
}

#[cfg(test)]
#[path = "attendance_tests.rs"]
mod tests;

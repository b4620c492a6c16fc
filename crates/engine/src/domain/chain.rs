// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Baton-passing chain orchestration: seeding, processing a scan, stall
//! detection, and reseeding.
//!
//! This is the one component that reaches across `Token` and `Attendance`
//! — it owns no storage of its own business data beyond the `Chains`
//! table, and never duplicates the atomicity `TokenStore::consume`
//! already guarantees.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::domain::attendance::{AttendanceStore, EntryStatus};
use crate::domain::token::{ConsumeOutcome, CreateTokenRequest, Token, TokenStore, TokenType};
use crate::domain::{now_unix, ChainId, SessionId, UserId};
use crate::error::AttnError;
use crate::storage::{CasTable, StorageError};

const BATON_TTL_SECS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainPhase {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainState {
    Active,
    Stalled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub session_id: SessionId,
    pub chain_id: ChainId,
    pub phase: ChainPhase,
    pub index: u32,
    pub state: ChainState,
    pub last_holder: UserId,
    pub last_seq: u64,
    pub last_at: i64,
    pub created_at: i64,
}

/// Outcome of delegating a consumed baton into Attendance + a successor
/// mint. Returned to the Scan Pipeline so it can build the realtime
/// message without re-deriving any of this state.
#[derive(Debug, Clone)]
pub struct ChainScanResult {
    pub chain: Chain,
    pub successor_token: Token,
}

pub struct ChainStore {
    rows: CasTable<(SessionId, ChainId), Chain>,
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore {
    pub fn new() -> Self {
        Self { rows: CasTable::new() }
    }

    /// Seed `k` fresh chains for `phase`, one per uniformly randomly chosen
    /// eligible student. `eligible` must already reflect phase-specific
    /// eligibility (see `entry_eligible_students` / `exit_eligible_students`
    /// helpers below) — this function only does the selection and chain
    /// construction.
    pub fn seed_chains(
        &self,
        session_id: &SessionId,
        phase: ChainPhase,
        k: usize,
        eligible: &[UserId],
        tokens: &TokenStore,
    ) -> Result<Vec<(Chain, Token)>, AttnError> {
        if eligible.len() < k {
            return Err(AttnError::InsufficientStudents);
        }
        let index = self.next_index(session_id, phase);
        let selected = random_k_subset(eligible, k);
        self.create_chains_for(session_id, phase, index, &selected, tokens)
    }

    /// Identical to seeding except the index continues from the current
    /// max and stalled chains are left in place for audit.
    pub fn reseed_chains(
        &self,
        session_id: &SessionId,
        phase: ChainPhase,
        k: usize,
        eligible: &[UserId],
        tokens: &TokenStore,
    ) -> Result<Vec<(Chain, Token)>, AttnError> {
        self.seed_chains(session_id, phase, k, eligible, tokens)
    }

    fn create_chains_for(
        &self,
        session_id: &SessionId,
        phase: ChainPhase,
        index: u32,
        selected: &[UserId],
        tokens: &TokenStore,
    ) -> Result<Vec<(Chain, Token)>, AttnError> {
        let token_type = match phase {
            ChainPhase::Entry => TokenType::Chain,
            ChainPhase::Exit => TokenType::ExitChain,
        };
        let mut created = Vec::with_capacity(selected.len());
        for holder in selected {
            let chain_id = ChainId::from(uuid::Uuid::new_v4().to_string());
            let now = now_unix();
            let chain = Chain {
                session_id: session_id.clone(),
                chain_id: chain_id.clone(),
                phase,
                index,
                state: ChainState::Active,
                last_holder: holder.clone(),
                last_seq: 0,
                last_at: now,
                created_at: now,
            };
            let baton = tokens.create(CreateTokenRequest {
                session_id: session_id.clone(),
                token_type,
                ttl_seconds: BATON_TTL_SECS,
                single_use: true,
                chain_id: Some(chain_id.clone()),
                issued_to: Some(holder.clone()),
                seq: 0,
            })?;
            self.rows
                .create_if_absent((session_id.clone(), chain_id), chain.clone())
                .map_err(storage_to_attn)?;
            created.push((chain, baton));
        }
        Ok(created)
    }

    /// Drive a single scan through Token consume, Attendance mark,
    /// successor mint, and the chain's own bookkeeping update.
    pub fn process_chain_scan(
        &self,
        session_id: &SessionId,
        token_id: &crate::domain::TokenId,
        scanner_id: &UserId,
        tokens: &TokenStore,
        attendance: &AttendanceStore,
    ) -> Result<ChainScanResult, AttnError> {
        let (outcome, consumed) = tokens.consume(session_id, token_id)?;
        let consumed = match outcome {
            ConsumeOutcome::Success => consumed.ok_or(AttnError::Internal)?,
            ConsumeOutcome::AlreadyUsed => return Err(AttnError::TokenAlreadyUsed),
            ConsumeOutcome::Expired => return Err(AttnError::ExpiredToken),
            ConsumeOutcome::Revoked => return Err(AttnError::ExpiredToken),
            ConsumeOutcome::NotFound => return Err(AttnError::NotFound),
        };

        let (chain_id, holder) = match (&consumed.chain_id, &consumed.issued_to) {
            (Some(chain_id), Some(holder)) => (chain_id.clone(), holder.clone()),
            _ => return Err(AttnError::InvalidRequest),
        };

        match consumed.token_type {
            TokenType::Chain => {
                attendance.mark_entry(session_id, &holder, EntryStatus::PresentEntry)?;
            }
            TokenType::ExitChain => {
                attendance.mark_exit_verified(session_id, &holder)?;
            }
            _ => return Err(AttnError::InvalidRequest),
        }

        let successor = tokens.create(CreateTokenRequest {
            session_id: session_id.clone(),
            token_type: consumed.token_type,
            ttl_seconds: BATON_TTL_SECS,
            single_use: true,
            chain_id: Some(chain_id.clone()),
            issued_to: Some(scanner_id.clone()),
            seq: consumed.seq + 1,
        })?;

        let chain = self.update_baton_holder(session_id, &chain_id, scanner_id, successor.seq);
        let Some(chain) = chain else {
            tracing::warn!(
                chain_id = chain_id.as_str(),
                "chain record missing after successful token consume"
            );
            return Ok(ChainScanResult {
                chain: Chain {
                    session_id: session_id.clone(),
                    chain_id,
                    phase: phase_for(consumed.token_type),
                    index: 0,
                    state: ChainState::Active,
                    last_holder: scanner_id.clone(),
                    last_seq: successor.seq,
                    last_at: now_unix(),
                    created_at: now_unix(),
                },
                successor_token: successor,
            });
        };
        Ok(ChainScanResult { chain, successor_token: successor })
    }

    /// A missing chain here is a soft error — the token is already
    /// consumed and must not be rolled back.
    fn update_baton_holder(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
        new_holder: &UserId,
        new_seq: u64,
    ) -> Option<Chain> {
        let key = (session_id.clone(), chain_id.clone());
        loop {
            let (mut chain, version) = self.rows.get(&key)?;
            chain.last_holder = new_holder.clone();
            chain.last_seq = new_seq;
            chain.last_at = now_unix();
            match self.rows.put_if_version(&key, chain.clone(), &version) {
                Ok(_) => return Some(chain),
                Err(StorageError::Conflict) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Transition ACTIVE chains whose `lastAt` is older than `threshold_secs`
    /// to STALLED. Idempotent — already-STALLED chains are untouched on
    /// repeated calls.
    pub fn detect_stalled(
        &self,
        session_id: &SessionId,
        phase: ChainPhase,
        threshold_secs: i64,
    ) -> Vec<Chain> {
        let now = now_unix();
        let candidates = self.rows.scan(|(sid, _), chain| {
            sid == session_id
                && chain.phase == phase
                && chain.state == ChainState::Active
                && now - chain.last_at > threshold_secs
        });

        let mut stalled = Vec::new();
        for (key, mut chain, version) in candidates {
            chain.state = ChainState::Stalled;
            if self.rows.put_if_version(&key, chain.clone(), &version).is_ok() {
                stalled.push(chain);
            }
        }
        stalled
    }

    fn next_index(&self, session_id: &SessionId, phase: ChainPhase) -> u32 {
        self.rows
            .scan(|(sid, _), chain| sid == session_id && chain.phase == phase)
            .into_iter()
            .map(|(_, chain, _)| chain.index)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
    }

    pub fn list_for_session(&self, session_id: &SessionId, phase: ChainPhase) -> Vec<Chain> {
        self.rows
            .scan(|(sid, _), chain| sid == session_id && chain.phase == phase)
            .into_iter()
            .map(|(_, chain, _)| chain)
            .collect()
    }
}

fn phase_for(token_type: TokenType) -> ChainPhase {
    match token_type {
        TokenType::ExitChain => ChainPhase::Exit,
        _ => ChainPhase::Entry,
    }
}

/// Fisher–Yates over a copy of `pool`, truncated to `k`. `k <= pool.len()`
/// must already be verified by the caller.
fn random_k_subset(pool: &[UserId], k: usize) -> Vec<UserId> {
    let mut shuffled = pool.to_vec();
    shuffled.shuffle(&mut rand::rng());
    shuffled.truncate(k);
    shuffled
}

fn storage_to_attn(err: StorageError) -> AttnError {
    match err {
        StorageError::NotFound => AttnError::NotFound,
        StorageError::Conflict => AttnError::Conflict,
        StorageError::Internal(_) => AttnError::StorageError,
    }
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background stall-detector ticker.
//!
//! Promotes `Chain::detect_stalled` — also callable on-demand by teachers —
//! to a periodic task: a `tokio::spawn` loop selecting between
//! `shutdown.cancelled()` and an interval tick with
//! `MissedTickBehavior::Skip`.

use std::sync::Arc;

use crate::domain::chain::ChainPhase;
use crate::state::EngineState;

/// Spawn the stall ticker. Iterates every ACTIVE session's ENTRY and EXIT
/// chains each tick and queues a `stallAlert` for any newly-stalled batch.
pub fn spawn_stall_ticker(state: Arc<EngineState>) {
    let interval = state.config.stall_tick_interval();
    let threshold_secs = state.config.stall_after_secs;

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            for session in state.sessions.list_active() {
                for phase in [ChainPhase::Entry, ChainPhase::Exit] {
                    let stalled = state.chains.detect_stalled(&session.session_id, phase, threshold_secs);
                    if stalled.is_empty() {
                        continue;
                    }
                    tracing::warn!(
                        session_id = %session.session_id,
                        phase = ?phase,
                        count = stalled.len(),
                        "chains stalled"
                    );
                    let chain_ids = stalled.into_iter().map(|c| c.chain_id).collect();
                    state.realtime.stall_alert(&session.session_id, chain_ids);
                }
            }
        }
    });
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared engine state: one store per component, composed behind an `Arc`
//! and handed to every HTTP handler via axum's `State` extractor.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::domain::attendance::AttendanceStore;
use crate::domain::chain::ChainStore;
use crate::domain::roster::RosterStore;
use crate::domain::session::SessionStore;
use crate::domain::token::TokenStore;
use crate::realtime::RealtimeSink;
use crate::validation::audit::ScanLogStore;
use crate::validation::rate_limit::RateLimiter;

/// Owns every component's storage table plus the per-process caches and
/// rate-limit counters — the only global state the engine carries,
/// initialized at start-up and torn down at shutdown.
pub struct EngineState {
    pub config: EngineConfig,
    pub shutdown: CancellationToken,
    pub sessions: SessionStore,
    pub tokens: TokenStore,
    pub chains: ChainStore,
    pub attendance: AttendanceStore,
    pub roster: RosterStore,
    pub scan_logs: ScanLogStore,
    pub rate_limiter: RateLimiter,
    pub realtime: RealtimeSink,
}

impl EngineState {
    pub fn new(config: EngineConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            sessions: SessionStore::new(),
            tokens: TokenStore::new(),
            chains: ChainStore::new(),
            attendance: AttendanceStore::new(),
            roster: RosterStore::new(),
            scan_logs: ScanLogStore::new(),
            rate_limiter: RateLimiter::new(),
            realtime: RealtimeSink::new(),
        }
    }
}

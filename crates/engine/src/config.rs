// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the attendance engine server.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "ATTEND_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8900, env = "ATTEND_PORT")]
    pub port: u16,

    /// Shared secret protecting teacher-only admin endpoints
    /// (seed/reseed/end). If unset, those endpoints are unauthenticated
    /// beyond the per-request principal envelope.
    #[arg(long, env = "ATTEND_SHARED_SECRET")]
    pub shared_secret: Option<String>,

    /// Stall-detector tick interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "ATTEND_STALL_TICK_MS")]
    pub stall_tick_ms: u64,

    /// Chain lastAt age, in seconds, past which an ACTIVE chain is STALLED.
    #[arg(long, default_value_t = 90, env = "ATTEND_STALL_AFTER_SECS")]
    pub stall_after_secs: i64,

    /// NATS server URL. When set (and the `nats` feature is built), realtime
    /// messages are additionally published to `{subject-prefix}.events`.
    #[arg(long, env = "ATTEND_NATS_URL")]
    pub nats_url: Option<String>,

    /// Subject prefix used for the optional NATS realtime bridge.
    #[arg(long, default_value = "attend", env = "ATTEND_NATS_PREFIX")]
    pub nats_prefix: String,
}

impl EngineConfig {
    pub fn stall_tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stall_tick_ms)
    }
}

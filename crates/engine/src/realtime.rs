// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime event sink for dashboards.
//!
//! Delivery is at-most-once, best-effort: `emit` only ever appends to an
//! in-process `broadcast` channel and never returns an error the caller
//! could use to roll back the domain mutation that produced the message.
//! The optional NATS bridge (`nats_bridge::run`) gives external dashboards
//! a way to subscribe without polling; its publish failures are logged as
//! warnings and never propagate.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::attendance::EntryStatus;
use crate::domain::chain::{ChainPhase, ChainState};
use crate::domain::{ChainId, SessionId, UserId};

/// One realtime message: `{target, arguments[0], groupName}`, flattened
/// into a single serializable envelope for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum RealtimeMessage {
    AttendanceUpdate {
        #[serde(skip)]
        group: String,
        student_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        entry_status: Option<EntryStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_verified: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        early_leave_at: Option<i64>,
    },
    ChainUpdate {
        #[serde(skip)]
        group: String,
        chain_id: ChainId,
        phase: ChainPhase,
        last_holder: UserId,
        last_seq: u64,
        state: ChainState,
    },
    StallAlert {
        #[serde(skip)]
        group: String,
        chain_ids: Vec<ChainId>,
    },
}

impl RealtimeMessage {
    /// `groupName = "session:" + sessionId` — the channel a
    /// `/ws/{sessionId}` subscriber filters on.
    pub fn group(&self) -> &str {
        match self {
            Self::AttendanceUpdate { group, .. }
            | Self::ChainUpdate { group, .. }
            | Self::StallAlert { group, .. } => group,
        }
    }
}

fn group_name(session_id: &SessionId) -> String {
    format!("session:{session_id}")
}

/// In-process broadcast sink plus an optional external bridge. Messages
/// are not ordered across groups; within a group, `broadcast` preserves
/// send order for every live subscriber.
pub struct RealtimeSink {
    tx: broadcast::Sender<RealtimeMessage>,
}

impl Default for RealtimeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.tx.subscribe()
    }

    /// Emit a message; a failure here (no subscribers) is never an error
    /// to the caller — this is an at-most-once, best-effort sink.
    fn emit(&self, message: RealtimeMessage) {
        let _ = self.tx.send(message);
    }

    pub fn attendance_update(
        &self,
        session_id: &SessionId,
        student_id: UserId,
        entry_status: Option<EntryStatus>,
        exit_verified: Option<bool>,
        early_leave_at: Option<i64>,
    ) {
        self.emit(RealtimeMessage::AttendanceUpdate {
            group: group_name(session_id),
            student_id,
            entry_status,
            exit_verified,
            early_leave_at,
        });
    }

    pub fn chain_update(
        &self,
        session_id: &SessionId,
        chain_id: ChainId,
        phase: ChainPhase,
        last_holder: UserId,
        last_seq: u64,
        state: ChainState,
    ) {
        self.emit(RealtimeMessage::ChainUpdate {
            group: group_name(session_id),
            chain_id,
            phase,
            last_holder,
            last_seq,
            state,
        });
    }

    pub fn stall_alert(&self, session_id: &SessionId, chain_ids: Vec<ChainId>) {
        self.emit(RealtimeMessage::StallAlert { group: group_name(session_id), chain_ids });
    }
}

/// Optional NATS bridge: republish every broadcast message to
/// `{prefix}.events` as JSON so external dashboards can subscribe without
/// polling the HTTP API.
#[cfg(feature = "nats")]
pub mod nats_bridge {
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, warn};

    use super::RealtimeMessage;

    pub async fn connect(url: &str) -> anyhow::Result<async_nats::Client> {
        let client = async_nats::ConnectOptions::new().retry_on_initial_connect().connect(url).await?;
        Ok(client)
    }

    pub async fn run(
        client: async_nats::Client,
        prefix: String,
        mut rx: broadcast::Receiver<RealtimeMessage>,
        shutdown: CancellationToken,
    ) {
        let subject = format!("{prefix}.events");
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Ok(message) => {
                            if let Ok(json) = serde_json::to_vec(&message) {
                                if let Err(e) = client.publish(subject.clone(), json.into()).await {
                                    warn!(err = %e, "NATS publish of realtime event failed");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("realtime NATS bridge lagged {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

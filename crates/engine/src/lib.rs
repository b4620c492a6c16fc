// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attend-engine: anti-cheat classroom attendance protocol server.

pub mod config;
pub mod domain;
pub mod error;
pub mod realtime;
pub mod stall;
pub mod state;
pub mod storage;
pub mod transport;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::state::EngineState;
use crate::stall::spawn_stall_ticker;
use crate::transport::build_router;

/// Run the attendance engine until shutdown.
pub async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    #[cfg(feature = "nats")]
    let nats_url = config.nats_url.clone();
    #[cfg(feature = "nats")]
    let nats_prefix = config.nats_prefix.clone();

    let state = Arc::new(EngineState::new(config, shutdown.clone()));

    spawn_stall_ticker(Arc::clone(&state));

    #[cfg(feature = "nats")]
    if let Some(url) = nats_url {
        let client = crate::realtime::nats_bridge::connect(&url).await?;
        let rx = state.realtime.subscribe();
        let bridge_shutdown = shutdown.clone();
        tokio::spawn(crate::realtime::nats_bridge::run(client, nats_prefix, rx, bridge_shutdown));
    }

    tracing::info!("attend-engine listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the attendance engine's HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::sync::Arc;

use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;

use attend_engine::config::EngineConfig;
use attend_engine::state::EngineState;
use attend_engine::transport::build_router;

fn test_config() -> EngineConfig {
    EngineConfig {
        host: "127.0.0.1".into(),
        port: 0,
        shared_secret: None,
        stall_tick_ms: 10_000,
        stall_after_secs: 90,
        nats_url: None,
        nats_prefix: "attend".into(),
    }
}

fn test_state() -> Arc<EngineState> {
    Arc::new(EngineState::new(test_config(), CancellationToken::new()))
}

fn test_server(state: Arc<EngineState>) -> TestServer {
    let router = build_router(state);
    TestServer::new(router).expect("failed to create test server")
}

fn principal_header(user_id: &str, email: &str) -> String {
    let payload = serde_json::json!({
        "userId": user_id,
        "userDetails": email,
        "identityProvider": "aad",
    });
    STANDARD.encode(serde_json::to_vec(&payload).expect("serialize"))
}

fn teacher_header() -> String {
    principal_header("teacher-1", "ms@vtc.edu.hk")
}

fn student_header(id: &str) -> String {
    principal_header(id, &format!("{id}@stu.edu.hk"))
}

#[tokio::test]
async fn health_returns_running() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    Ok(())
}

#[tokio::test]
async fn create_session_requires_teacher_role() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server
        .post("/api/v1/sessions")
        .add_header("x-principal", student_header("s1"))
        .json(&serde_json::json!({
            "classId": "CS101",
            "startAt": 1000,
            "endAt": 5000,
            "lateCutoffMinutes": 10,
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn create_session_rejects_missing_principal() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server
        .post("/api/v1/sessions")
        .json(&serde_json::json!({
            "classId": "CS101",
            "startAt": 1000,
            "endAt": 5000,
            "lateCutoffMinutes": 10,
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    Ok(())
}

async fn create_session(server: &TestServer) -> serde_json::Value {
    let resp = server
        .post("/api/v1/sessions")
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({
            "classId": "CS101",
            "startAt": 1000,
            "endAt": 9_999_999_999i64,
            "lateCutoffMinutes": 10,
        }))
        .await;
    resp.assert_status_ok();
    resp.json()
}

#[tokio::test]
async fn create_session_returns_qr_payload_and_is_listed() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let created = create_session(&server).await;
    assert!(created["qrPayload"].as_str().is_some());
    assert_eq!(created["classId"], "CS101");

    let resp = server.get("/api/v1/sessions").add_header("x-principal", teacher_header()).await;
    resp.assert_status_ok();
    let sessions: Vec<serde_json::Value> = resp.json();
    assert_eq!(sessions.len(), 1);
    Ok(())
}

#[tokio::test]
async fn join_then_entry_chain_scan_marks_present() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    let join_resp = server
        .post(&format!("/api/v1/sessions/{session_id}/join"))
        .add_header("x-principal", student_header("alice"))
        .json(&serde_json::json!({ "deviceFingerprint": "dev-alice" }))
        .await;
    join_resp.assert_status_ok();

    let seed_resp = server
        .post(&format!("/api/v1/sessions/{session_id}/chains/entry/seed"))
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({ "k": 1 }))
        .await;
    seed_resp.assert_status_ok();
    let seeded: serde_json::Value = seed_resp.json();
    let chains = seeded["chains"].as_array().expect("chains array");
    assert_eq!(chains.len(), 1);
    let baton_token_id = chains[0]["batonTokenId"].as_str().expect("batonTokenId").to_owned();

    let scan_resp = server
        .post(&format!("/api/v1/sessions/{session_id}/scan/chain"))
        .add_header("x-principal", student_header("alice"))
        .json(&serde_json::json!({
            "tokenId": baton_token_id,
            "deviceFingerprint": "dev-alice",
        }))
        .await;
    scan_resp.assert_status_ok();
    let scanned: serde_json::Value = scan_resp.json();
    assert_eq!(scanned["lastHolder"], "alice");

    let attendance_resp =
        server.get(&format!("/api/v1/sessions/{session_id}/attendance")).await;
    attendance_resp.assert_status_ok();
    let rows: Vec<serde_json::Value> = attendance_resp.json();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["entryStatus"], "PRESENT_ENTRY");
    Ok(())
}

#[tokio::test]
async fn reusing_a_consumed_chain_token_is_rejected() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    server
        .post(&format!("/api/v1/sessions/{session_id}/join"))
        .add_header("x-principal", student_header("alice"))
        .json(&serde_json::json!({ "deviceFingerprint": "dev-alice" }))
        .await
        .assert_status_ok();

    let seeded: serde_json::Value = server
        .post(&format!("/api/v1/sessions/{session_id}/chains/entry/seed"))
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({ "k": 1 }))
        .await
        .json();
    let baton_token_id =
        seeded["chains"][0]["batonTokenId"].as_str().expect("batonTokenId").to_owned();

    server
        .post(&format!("/api/v1/sessions/{session_id}/scan/chain"))
        .add_header("x-principal", student_header("alice"))
        .json(&serde_json::json!({ "tokenId": baton_token_id, "deviceFingerprint": "dev-alice" }))
        .await
        .assert_status_ok();

    // Second scan of the same (now-consumed) baton must fail.
    let retry = server
        .post(&format!("/api/v1/sessions/{session_id}/scan/chain"))
        .add_header("x-principal", student_header("bob"))
        .json(&serde_json::json!({ "tokenId": baton_token_id, "deviceFingerprint": "dev-bob" }))
        .await;
    retry.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = retry.json();
    assert_eq!(body["error"]["code"], "TOKEN_ALREADY_USED");
    Ok(())
}

#[tokio::test]
async fn rotating_late_entry_token_is_single_use() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    let started: serde_json::Value = server
        .post(&format!("/api/v1/sessions/{session_id}/late-entry/start"))
        .add_header("x-principal", teacher_header())
        .await
        .json();
    let token_id = started["tokenId"].as_str().expect("tokenId").to_owned();

    server
        .post(&format!("/api/v1/sessions/{session_id}/scan/late-entry"))
        .add_header("x-principal", student_header("carol"))
        .json(&serde_json::json!({ "tokenId": token_id, "deviceFingerprint": "dev-carol" }))
        .await
        .assert_status_ok();

    let second = server
        .post(&format!("/api/v1/sessions/{session_id}/scan/late-entry"))
        .add_header("x-principal", student_header("dave"))
        .json(&serde_json::json!({ "tokenId": token_id, "deviceFingerprint": "dev-dave" }))
        .await;
    second.assert_status(axum::http::StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn join_without_gps_violates_an_active_geofence() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server
        .post("/api/v1/sessions")
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({
            "classId": "CS101",
            "startAt": 1000,
            "endAt": 9_999_999_999i64,
            "lateCutoffMinutes": 10,
            "constraints": {
                "geofence": { "lat": 22.28, "lon": 114.17, "radiusMeters": 100 },
                "wifiAllowlist": [],
            },
        }))
        .await;
    resp.assert_status_ok();
    let created: serde_json::Value = resp.json();
    let session_id = created["sessionId"].as_str().expect("sessionId").to_owned();

    let join_resp = server
        .post(&format!("/api/v1/sessions/{session_id}/join"))
        .add_header("x-principal", student_header("erin"))
        .json(&serde_json::json!({ "deviceFingerprint": "dev-erin" }))
        .await;
    join_resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = join_resp.json();
    assert_eq!(body["error"]["code"], "GEOFENCE_VIOLATION");
    Ok(())
}

#[tokio::test]
async fn device_rate_limit_blocks_the_eleventh_scan_in_a_window() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    for i in 0..10 {
        let resp = server
            .post(&format!("/api/v1/sessions/{session_id}/join"))
            .add_header("x-principal", student_header(&format!("student-{i}")))
            .json(&serde_json::json!({ "deviceFingerprint": "shared-device" }))
            .await;
        resp.assert_status_ok();
    }

    let eleventh = server
        .post(&format!("/api/v1/sessions/{session_id}/join"))
        .add_header("x-principal", student_header("student-10"))
        .json(&serde_json::json!({ "deviceFingerprint": "shared-device" }))
        .await;
    eleventh.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn ending_a_session_finalizes_attendance_status() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    for student in ["grace", "henry"] {
        server
            .post(&format!("/api/v1/sessions/{session_id}/join"))
            .add_header("x-principal", student_header(student))
            .json(&serde_json::json!({ "deviceFingerprint": format!("dev-{student}") }))
            .await
            .assert_status_ok();
    }

    let entry_seeded: serde_json::Value = server
        .post(&format!("/api/v1/sessions/{session_id}/chains/entry/seed"))
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({ "k": 2 }))
        .await
        .json();
    let entry_chains = entry_seeded["chains"].as_array().expect("chains array");
    assert_eq!(entry_chains.len(), 2);

    // Both students scan their own entry baton straight to PRESENT_ENTRY.
    for chain in entry_chains {
        let holder = chain["holder"].as_str().expect("holder").to_owned();
        let token_id = chain["batonTokenId"].as_str().expect("batonTokenId").to_owned();
        server
            .post(&format!("/api/v1/sessions/{session_id}/scan/chain"))
            .add_header("x-principal", student_header(&holder))
            .json(&serde_json::json!({ "tokenId": token_id, "deviceFingerprint": format!("dev-{holder}") }))
            .await
            .assert_status_ok();
    }

    let exit_seeded: serde_json::Value = server
        .post(&format!("/api/v1/sessions/{session_id}/chains/exit/seed"))
        .add_header("x-principal", teacher_header())
        .json(&serde_json::json!({ "k": 2 }))
        .await
        .json();
    let exit_chains = exit_seeded["chains"].as_array().expect("chains array");
    assert_eq!(exit_chains.len(), 2);

    // Only grace completes the exit chain; henry's baton is left unscanned,
    // so he leaves without exit verification — S6-style LEFT_EARLY.
    let grace_exit = exit_chains
        .iter()
        .find(|chain| chain["holder"] == "grace")
        .expect("grace has an exit chain");
    server
        .post(&format!("/api/v1/sessions/{session_id}/scan/exit-chain"))
        .add_header("x-principal", student_header("grace"))
        .json(&serde_json::json!({
            "tokenId": grace_exit["batonTokenId"],
            "deviceFingerprint": "dev-grace",
        }))
        .await
        .assert_status_ok();

    let end_resp = server
        .post(&format!("/api/v1/sessions/{session_id}/end"))
        .add_header("x-principal", teacher_header())
        .await;
    end_resp.assert_status_ok();
    let ended: serde_json::Value = end_resp.json();
    assert_eq!(ended["status"], "ENDED");

    let attendance_resp =
        server.get(&format!("/api/v1/sessions/{session_id}/attendance")).await;
    let rows: Vec<serde_json::Value> = attendance_resp.json();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let expected = if row["studentId"] == "grace" { "PRESENT" } else { "LEFT_EARLY" };
        assert_eq!(row["finalStatus"], expected);
    }
    Ok(())
}

#[tokio::test]
async fn stalled_chains_are_reported_on_demand() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let session = create_session(&server).await;
    let session_id = session["sessionId"].as_str().expect("sessionId").to_owned();

    let resp = server
        .get(&format!("/api/v1/sessions/{session_id}/chains/entry/stalled"))
        .add_header("x-principal", teacher_header())
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["chainIds"].as_array().expect("chainIds").len(), 0);
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use base64::Engine as _;

use super::*;

fn create_req(teacher: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        teacher_id: UserId::from(teacher),
        class_id: "COMP101".into(),
        start_at: now_unix(),
        end_at: now_unix() + 3600,
        late_cutoff_minutes: 10,
        exit_window_minutes: None,
        constraints: None,
    }
}

#[test]
fn create_defaults_exit_window_and_starts_active() {
    let store = SessionStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    assert_eq!(session.exit_window_minutes, 10);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(!session.late_entry_active);
}

#[test]
fn create_rejects_blank_class_id() {
    let store = SessionStore::new();
    let mut req = create_req("teacher-1");
    req.class_id = "   ".into();
    assert_eq!(store.create(req).unwrap_err(), AttnError::InvalidRequest);
}

#[test]
fn get_serves_from_cache_after_first_read() {
    let store = SessionStore::new();
    let created = store.create(create_req("teacher-1")).expect("create");
    let first = store.get(&created.session_id).expect("first read");
    let second = store.get(&created.session_id).expect("cached read");
    assert_eq!(first.session_id, second.session_id);
}

#[test]
fn end_requires_the_owning_teacher() {
    let store = SessionStore::new();
    let attendance = AttendanceStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    let err = store
        .end(&session.session_id, &UserId::from("teacher-2"), &attendance)
        .unwrap_err();
    assert_eq!(err, AttnError::Forbidden);
}

#[test]
fn end_is_not_repeatable() {
    let store = SessionStore::new();
    let attendance = AttendanceStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    let teacher = UserId::from("teacher-1");
    store.end(&session.session_id, &teacher, &attendance).expect("first end");
    let err = store.end(&session.session_id, &teacher, &attendance).unwrap_err();
    assert_eq!(err, AttnError::SessionEnded);
}

#[test]
fn end_finalizes_attendance_and_clears_rotation_flags() {
    let store = SessionStore::new();
    let attendance = AttendanceStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    store
        .update_late_entry_status(&session.session_id, true, Some(TokenId::from("tok-1")))
        .expect("start late entry");

    let teacher = UserId::from("teacher-1");
    let ended = store.end(&session.session_id, &teacher, &attendance).expect("end");
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(!ended.late_entry_active);
    assert!(ended.ended_at.is_some());
}

#[test]
fn update_late_entry_status_invalidates_cache_and_persists() {
    let store = SessionStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    store.get(&session.session_id).expect("warm cache");

    let updated = store
        .update_late_entry_status(&session.session_id, true, Some(TokenId::from("tok-1")))
        .expect("update");
    assert!(updated.late_entry_active);

    let refetched = store.get(&session.session_id).expect("refetch");
    assert!(refetched.late_entry_active);
    assert_eq!(refetched.current_late_token_id, Some(TokenId::from("tok-1")));
}

#[test]
fn list_by_teacher_only_returns_their_sessions() {
    let store = SessionStore::new();
    store.create(create_req("teacher-1")).expect("create 1");
    store.create(create_req("teacher-2")).expect("create 2");

    let sessions = store.list_by_teacher(&UserId::from("teacher-1"));
    assert_eq!(sessions.len(), 1);
}

#[test]
fn list_active_excludes_ended_sessions() {
    let store = SessionStore::new();
    let attendance = AttendanceStore::new();
    let keep_active = store.create(create_req("teacher-1")).expect("create 1");
    let to_end = store.create(create_req("teacher-1")).expect("create 2");
    store.end(&to_end.session_id, &UserId::from("teacher-1"), &attendance).expect("end");

    let active = store.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].session_id, keep_active.session_id);
}

#[test]
fn session_qr_payload_encodes_type_session_id_and_class_id() {
    let store = SessionStore::new();
    let session = store.create(create_req("teacher-1")).expect("create");
    let payload = session_qr_payload(&session).expect("encode");

    let decoded = base64::engine::general_purpose::STANDARD.decode(payload).expect("decode");
    let json: serde_json::Value = serde_json::from_slice(&decoded).expect("parse");
    assert_eq!(json["type"], "SESSION");
    assert_eq!(json["classId"], "COMP101");
}

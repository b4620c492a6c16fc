// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sid() -> SessionId {
    SessionId::from("s1")
}

#[test]
fn mark_entry_creates_a_record_when_absent() {
    let store = AttendanceStore::new();
    let student = UserId::from("alice");
    let record = store.mark_entry(&sid(), &student, EntryStatus::PresentEntry).expect("mark");
    assert_eq!(record.entry_status, Some(EntryStatus::PresentEntry));
    assert!(record.entry_at.is_some());
    assert!(!record.exit_verified);
}

#[test]
fn marks_commute_regardless_of_arrival_order() {
    let store_a = AttendanceStore::new();
    let student = UserId::from("bob");
    store_a.mark_entry(&sid(), &student, EntryStatus::PresentEntry).expect("entry");
    store_a.mark_exit_verified(&sid(), &student).expect("exit");

    let store_b = AttendanceStore::new();
    store_b.mark_exit_verified(&sid(), &student).expect("exit");
    store_b.mark_entry(&sid(), &student, EntryStatus::PresentEntry).expect("entry");

    let a = store_a.get(&sid(), &student).expect("a");
    let b = store_b.get(&sid(), &student).expect("b");
    assert_eq!(a.entry_status, b.entry_status);
    assert_eq!(a.exit_verified, b.exit_verified);
}

#[test]
fn get_all_only_returns_rows_for_the_requested_session() {
    let store = AttendanceStore::new();
    store
        .mark_entry(&SessionId::from("s1"), &UserId::from("a"), EntryStatus::PresentEntry)
        .expect("a");
    store
        .mark_entry(&SessionId::from("s2"), &UserId::from("b"), EntryStatus::PresentEntry)
        .expect("b");

    let rows = store.get_all(&SessionId::from("s1"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, UserId::from("a"));
}

#[test]
fn final_status_matches_the_priority_table() {
    assert_eq!(
        final_status_for(&AttendanceRecord {
            entry_status: Some(EntryStatus::PresentEntry),
            exit_verified: true,
            ..Default::default()
        }),
        FinalStatus::Present
    );
    assert_eq!(
        final_status_for(&AttendanceRecord {
            entry_status: Some(EntryStatus::PresentEntry),
            exit_verified: false,
            ..Default::default()
        }),
        FinalStatus::LeftEarly
    );
    assert_eq!(
        final_status_for(&AttendanceRecord {
            entry_status: Some(EntryStatus::LateEntry),
            exit_verified: true,
            ..Default::default()
        }),
        FinalStatus::Late
    );
    assert_eq!(
        final_status_for(&AttendanceRecord {
            entry_status: Some(EntryStatus::LateEntry),
            exit_verified: false,
            ..Default::default()
        }),
        FinalStatus::LeftEarly
    );
    assert_eq!(final_status_for(&AttendanceRecord::default()), FinalStatus::Absent);
    assert_eq!(
        final_status_for(&AttendanceRecord {
            entry_status: Some(EntryStatus::PresentEntry),
            exit_verified: true,
            early_leave_at: Some(123),
            ..Default::default()
        }),
        FinalStatus::EarlyLeave
    );
}

#[test]
fn exit_eligible_excludes_absent_and_early_leave_students() {
    let store = AttendanceStore::new();
    store.mark_entry(&sid(), &UserId::from("a"), EntryStatus::PresentEntry).expect("a entry");
    store.mark_entry(&sid(), &UserId::from("b"), EntryStatus::LateEntry).expect("b entry");
    store.mark_early_leave(&sid(), &UserId::from("b")).expect("b early leave");

    let mut eligible = store.exit_eligible(&sid());
    eligible.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(eligible, vec![UserId::from("a")]);
}

#[test]
fn compute_final_status_populates_every_record_in_the_session() {
    let store = AttendanceStore::new();
    // S6 scenario: A present+exit, B late+exit, C present+no-exit, D early-leave.
    store.mark_entry(&sid(), &UserId::from("a"), EntryStatus::PresentEntry).expect("a entry");
    store.mark_exit_verified(&sid(), &UserId::from("a")).expect("a exit");

    store.mark_entry(&sid(), &UserId::from("b"), EntryStatus::LateEntry).expect("b entry");
    store.mark_exit_verified(&sid(), &UserId::from("b")).expect("b exit");

    store.mark_entry(&sid(), &UserId::from("c"), EntryStatus::PresentEntry).expect("c entry");

    store.mark_early_leave(&sid(), &UserId::from("d")).expect("d early leave");

    store.compute_final_status(&sid()).expect("finalize");

    let get = |id: &str| store.get(&sid(), &UserId::from(id)).expect("record");
    assert_eq!(get("a").final_status, Some(FinalStatus::Present));
    assert_eq!(get("b").final_status, Some(FinalStatus::Late));
    assert_eq!(get("c").final_status, Some(FinalStatus::LeftEarly));
    assert_eq!(get("d").final_status, Some(FinalStatus::EarlyLeave));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn tenth_device_event_is_accepted_eleventh_is_rejected() {
    let limiter = RateLimiter::new();
    for _ in 0..10 {
        assert_eq!(limiter.check("device-1", "1.1.1.1"), RateLimitOutcome::Allowed);
    }
    assert_eq!(limiter.check("device-1", "1.1.1.1"), RateLimitOutcome::DeviceLimited);
}

#[test]
fn window_reset_admits_a_fresh_ten_after_it_elapses() {
    let limiter = RateLimiter::new();
    for _ in 0..10 {
        limiter.check("device-1", "1.1.1.1");
    }
    assert_eq!(limiter.check("device-1", "1.1.1.1"), RateLimitOutcome::DeviceLimited);

    // Force the window to have elapsed instead of sleeping in the test.
    let mut devices = limiter.devices.lock().expect("lock");
    devices.get_mut("device-1").expect("entry").window_start -= WINDOW_SECS;
    drop(devices);

    assert_eq!(limiter.check("device-1", "1.1.1.1"), RateLimitOutcome::Allowed);
}

#[test]
fn ip_limit_is_independent_of_device_limit() {
    let limiter = RateLimiter::new();
    for i in 0..50 {
        let device = format!("device-{i}");
        assert_eq!(limiter.check(&device, "shared-ip"), RateLimitOutcome::Allowed);
    }
    assert_eq!(limiter.check("device-new", "shared-ip"), RateLimitOutcome::IpLimited);
}

#[test]
fn failed_checks_do_not_increment_either_counter() {
    let limiter = RateLimiter::new();
    for _ in 0..10 {
        limiter.check("device-1", "1.1.1.1");
    }
    // Device is now at the cap; repeated rejected attempts must not push
    // the count past it, and must not touch the IP counter either.
    for _ in 0..5 {
        assert_eq!(limiter.check("device-1", "1.1.1.1"), RateLimitOutcome::DeviceLimited);
    }
    let devices = limiter.devices.lock().expect("lock");
    assert_eq!(devices.get("device-1").expect("entry").count, 10);
    drop(devices);

    let ips = limiter.ips.lock().expect("lock");
    assert_eq!(ips.get("1.1.1.1").expect("entry").count, 10);
}

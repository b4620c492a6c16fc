// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local sliding-window rate limiting.
//!
//! Plain `std::sync::Mutex<HashMap<..>>` rather than a caching crate —
//! eviction is implicit (a window that has elapsed is simply overwritten
//! on next touch) and a process restart resetting the counters is an
//! accepted tradeoff, not a bug to guard against.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::now_unix;

const DEVICE_LIMIT: u32 = 10;
const IP_LIMIT: u32 = 50;
const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    DeviceLimited,
    IpLimited,
}

struct Window {
    count: u32,
    window_start: i64,
}

pub struct RateLimiter {
    devices: Mutex<HashMap<String, Window>>,
    ips: Mutex<HashMap<String, Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { devices: Mutex::new(HashMap::new()), ips: Mutex::new(HashMap::new()) }
    }

    /// Device limit is checked first; a single logical step increments
    /// both counters only when both checks pass (spec §4.5 — do not
    /// double-increment on a failed check).
    pub fn check(&self, device_fingerprint: &str, ip: &str) -> RateLimitOutcome {
        if !Self::peek(&self.devices, device_fingerprint, DEVICE_LIMIT) {
            return RateLimitOutcome::DeviceLimited;
        }
        if !Self::peek(&self.ips, ip, IP_LIMIT) {
            return RateLimitOutcome::IpLimited;
        }
        Self::increment(&self.devices, device_fingerprint);
        Self::increment(&self.ips, ip);
        RateLimitOutcome::Allowed
    }

    fn peek(map: &Mutex<HashMap<String, Window>>, key: &str, limit: u32) -> bool {
        let map = map.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(key) {
            Some(window) if now_unix() - window.window_start < WINDOW_SECS => {
                window.count < limit
            }
            _ => true,
        }
    }

    fn increment(map: &Mutex<HashMap<String, Window>>, key: &str) {
        let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
        let now = now_unix();
        map.entry(key.to_owned())
            .and_modify(|window| {
                if now - window.window_start >= WINDOW_SECS {
                    window.count = 1;
                    window.window_start = now;
                } else {
                    window.count += 1;
                }
            })
            .or_insert(Window { count: 1, window_start: now });
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;

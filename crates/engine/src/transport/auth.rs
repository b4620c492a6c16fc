// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Principal envelope decoding and role derivation.
//!
//! The source parses a base64-JSON identity envelope at the edge; this is
//! a strict, `serde`-derived decode rather than an ad hoc dynamic lookup.
//! Callers supply the envelope base64 in the `X-Principal` header.

use std::collections::HashSet;

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::domain::UserId;
use crate::error::AttnError;

const PRINCIPAL_HEADER: &str = "x-principal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
}

#[derive(Debug, Deserialize)]
struct PrincipalEnvelope {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "userDetails")]
    user_details: String,
    #[serde(rename = "identityProvider")]
    #[allow(dead_code)]
    identity_provider: String,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
    pub roles: HashSet<Role>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Derive the role set from an email by case-insensitive, suffix-exact
/// domain match. `mail.stu.edu.hk` does not match `@stu.edu.hk` — the
/// match is against the full domain suffix, not an arbitrary substring.
pub fn derive_roles(email: &str) -> HashSet<Role> {
    let lower = email.to_lowercase();
    let mut roles = HashSet::new();
    if lower.ends_with("@stu.edu.hk") {
        roles.insert(Role::Student);
    }
    if lower.ends_with("@vtc.edu.hk") {
        roles.insert(Role::Teacher);
    }
    roles
}

/// Decode and validate the principal envelope from request headers.
/// Missing or undecodable envelopes are `UNAUTHENTICATED` (mapped to
/// `AttnError::Unauthorized`).
pub fn resolve_principal(headers: &HeaderMap) -> Result<Principal, AttnError> {
    let raw = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AttnError::Unauthorized)?;

    let decoded = STANDARD.decode(raw).map_err(|_| AttnError::Unauthorized)?;
    let envelope: PrincipalEnvelope =
        serde_json::from_slice(&decoded).map_err(|_| AttnError::Unauthorized)?;

    if envelope.user_id.trim().is_empty() {
        return Err(AttnError::Unauthorized);
    }

    let roles = derive_roles(&envelope.user_details);
    Ok(Principal { user_id: UserId::from(envelope.user_id), email: envelope.user_details, roles })
}

/// Require the principal to hold `role`; mismatch is `FORBIDDEN`.
pub fn require_role(principal: &Principal, role: Role) -> Result<(), AttnError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(AttnError::Forbidden)
    }
}

/// Constant-time string comparison, used by the optional shared-secret
/// check protecting teacher-only admin endpoints.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate the optional `ATTEND_SHARED_SECRET` bearer token. When no
/// secret is configured, every request passes — the principal envelope's
/// role check is the remaining gate.
pub fn validate_shared_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AttnError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let header =
        headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(AttnError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(AttnError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(AttnError::Unauthorized)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

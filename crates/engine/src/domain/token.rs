// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle: mint, read, validate, atomically consume, and revoke.
//!
//! No business rules beyond lifecycle live here — this component does not
//! know about chains or attendance. Single-use consumption is made atomic
//! by predicating the write on the version tag read alongside the token;
//! a CAS loss is reported as `AlreadyUsed` and is never retried (retrying a
//! lost CAS would reopen the race it just lost).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};

use crate::domain::{now_unix, ChainId, SessionId, TokenId, UserId};
use crate::error::AttnError;
use crate::storage::{CasTable, StorageError};

/// Rotating-token cache TTL — strictly less than the 60s rotation period so
/// a cached read can never outlive the token it describes.
const ROTATING_CACHE_TTL_SECS: u64 = 55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Chain,
    ExitChain,
    LateEntry,
    EarlyLeave,
    Session,
}

impl TokenType {
    /// Only rotating token types are cached in-process; chain batons are
    /// short-lived, single-use, and security-sensitive, so they are never
    /// cached.
    fn is_rotating(self) -> bool {
        matches!(self, Self::LateEntry | Self::EarlyLeave)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Active,
    Used,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_id: TokenId,
    pub session_id: SessionId,
    pub token_type: TokenType,
    pub chain_id: Option<ChainId>,
    pub issued_to: Option<UserId>,
    pub seq: u64,
    pub exp: i64,
    pub status: TokenStatus,
    pub single_use: bool,
    pub created_at: i64,
    pub used_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateOutcome {
    Valid,
    Expired,
    Used,
    Revoked,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Success,
    AlreadyUsed,
    Expired,
    Revoked,
    NotFound,
}

/// Parameters for minting a new token, grouped so `create` doesn't grow an
/// unwieldy positional argument list.
#[derive(Debug, Clone)]
pub struct CreateTokenRequest {
    pub session_id: SessionId,
    pub token_type: TokenType,
    pub ttl_seconds: i64,
    pub single_use: bool,
    pub chain_id: Option<ChainId>,
    pub issued_to: Option<UserId>,
    pub seq: u64,
}

struct CachedToken {
    token: Token,
    cached_at: Instant,
}

/// Owns the `Tokens` table and the rotating-token read cache.
pub struct TokenStore {
    rows: CasTable<(SessionId, TokenId), Token>,
    rotating_cache: RwLock<HashMap<(SessionId, TokenId), CachedToken>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self { rows: CasTable::new(), rotating_cache: RwLock::new(HashMap::new()) }
    }

    /// Mint a new token. `tokenId` is drawn from a CSPRNG (256 random bits,
    /// URL-safe base64 without padding); generation failure is fatal to the
    /// request.
    pub fn create(&self, req: CreateTokenRequest) -> Result<Token, AttnError> {
        let token_id = generate_token_id()?;
        let now = now_unix();
        let token = Token {
            token_id: token_id.clone(),
            session_id: req.session_id.clone(),
            token_type: req.token_type,
            chain_id: req.chain_id,
            issued_to: req.issued_to,
            seq: req.seq,
            exp: now + req.ttl_seconds,
            status: TokenStatus::Active,
            single_use: req.single_use,
            created_at: now,
            used_at: None,
        };

        self.rows
            .create_if_absent((req.session_id, token_id), token.clone())
            .map_err(storage_to_attn)?;
        Ok(token)
    }

    /// Not-found is a normal, non-error result.
    pub fn get(&self, session_id: &SessionId, token_id: &TokenId) -> Option<Token> {
        if let Some(cached) = self.cached_rotating(session_id, token_id) {
            return Some(cached);
        }
        let key = (session_id.clone(), token_id.clone());
        self.rows.get(&key).map(|(token, _)| token)
    }

    pub fn validate(&self, session_id: &SessionId, token_id: &TokenId) -> ValidateOutcome {
        let Some(token) = self.get(session_id, token_id) else {
            return ValidateOutcome::NotFound;
        };
        match token.status {
            TokenStatus::Revoked => ValidateOutcome::Revoked,
            TokenStatus::Used => ValidateOutcome::Used,
            TokenStatus::Active if token.exp <= now_unix() => ValidateOutcome::Expired,
            TokenStatus::Active => ValidateOutcome::Valid,
        }
    }

    /// Atomically consume a token: read current state, verify ACTIVE and
    /// unexpired, then conditionally write `{status: USED}` predicated on
    /// the version tag observed at read time.
    pub fn consume(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
    ) -> Result<(ConsumeOutcome, Option<Token>), AttnError> {
        let key = (session_id.clone(), token_id.clone());
        let Some((token, version)) = self.rows.get(&key) else {
            return Ok((ConsumeOutcome::NotFound, None));
        };

        match token.status {
            TokenStatus::Used => return Ok((ConsumeOutcome::AlreadyUsed, None)),
            TokenStatus::Revoked => return Ok((ConsumeOutcome::Revoked, None)),
            TokenStatus::Active => {}
        }
        if token.exp <= now_unix() {
            return Ok((ConsumeOutcome::Expired, None));
        }

        let mut consumed = token.clone();
        consumed.status = TokenStatus::Used;
        consumed.used_at = Some(now_unix());

        match self.rows.put_if_version(&key, consumed.clone(), &version) {
            Ok(_) => {
                self.invalidate_rotating(session_id, token_id);
                Ok((ConsumeOutcome::Success, Some(consumed)))
            }
            Err(StorageError::Conflict) => Ok((ConsumeOutcome::AlreadyUsed, None)),
            Err(e @ StorageError::Internal(_)) => Err(storage_to_attn(e)),
            Err(StorageError::NotFound) => Ok((ConsumeOutcome::NotFound, None)),
        }
    }

    /// Idempotent: a missing token is treated as success.
    pub fn revoke(&self, session_id: &SessionId, token_id: &TokenId) {
        let key = (session_id.clone(), token_id.clone());
        if let Some((mut token, _)) = self.rows.get(&key) {
            token.status = TokenStatus::Revoked;
            self.rows.put_unconditional(key.clone(), token);
            self.invalidate_rotating(session_id, token_id);
        }
    }

    /// Cache a freshly-minted or freshly-rotated rotating token so repeated
    /// validates during its display window avoid a storage round trip.
    pub fn cache_rotating(&self, token: &Token) {
        if !token.token_type.is_rotating() {
            return;
        }
        let key = (token.session_id.clone(), token.token_id.clone());
        let mut cache = self.rotating_cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, CachedToken { token: token.clone(), cached_at: Instant::now() });
    }

    fn cached_rotating(&self, session_id: &SessionId, token_id: &TokenId) -> Option<Token> {
        let key = (session_id.clone(), token_id.clone());
        let cache = self.rotating_cache.read().unwrap_or_else(|e| e.into_inner());
        let entry = cache.get(&key)?;
        if entry.cached_at.elapsed().as_secs() >= ROTATING_CACHE_TTL_SECS {
            return None;
        }
        Some(entry.token.clone())
    }

    fn invalidate_rotating(&self, session_id: &SessionId, token_id: &TokenId) {
        let key = (session_id.clone(), token_id.clone());
        let mut cache = self.rotating_cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(&key);
    }
}

fn generate_token_id() -> Result<TokenId, AttnError> {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.try_fill_bytes(&mut buf).map_err(|e| {
        tracing::error!(err = %e, "CSPRNG failure while minting token id");
        AttnError::Internal
    })?;
    Ok(TokenId(URL_SAFE_NO_PAD.encode(buf)))
}

fn storage_to_attn(err: StorageError) -> AttnError {
    match err {
        StorageError::NotFound => AttnError::NotFound,
        StorageError::Conflict => AttnError::Conflict,
        StorageError::Internal(_) => AttnError::StorageError,
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;

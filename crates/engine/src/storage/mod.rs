// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage contract: create-if-absent, get-by-key with a version tag,
//! unconditional put, conditional put (CAS), and filtered scan.
//!
//! The engine treats the physical storage engine as an external
//! collaborator — only these semantics are in scope.
//! `CasTable` is the one in-process implementation used by tests and the
//! default binary; a real deployment backs it with a document store whose
//! ETag maps directly onto `VersionTag`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Opaque optimistic-concurrency cookie returned on read, accepted on
/// conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTag(String);

impl VersionTag {
    fn initial() -> Self {
        Self("1".to_owned())
    }

    fn next(&self) -> Self {
        let n: u64 = self.0.parse().unwrap_or(0);
        Self((n + 1).to_string())
    }
}

/// Storage-layer failure modes. `NotFound` and `Conflict` are expected,
/// recoverable outcomes the caller branches on; `Internal` is a genuine
/// backend failure and propagates as `AttnError::StorageError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Conflict,
    Internal(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Conflict => write!(f, "precondition failed"),
            Self::Internal(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

struct Row<V> {
    value: V,
    version: VersionTag,
}

/// A single logical table: key-value storage with CAS semantics.
///
/// Generic over any hashable key and cloneable value so each domain
/// component (`Tokens`, `Chains`, `Attendance`, ...) gets its own table
/// without repeating the locking and versioning machinery.
pub struct CasTable<K, V> {
    rows: RwLock<HashMap<K, Row<V>>>,
}

impl<K, V> Default for CasTable<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self { rows: RwLock::new(HashMap::new()) }
    }
}

impl<K, V> CasTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value and its version tag. Absence is a normal,
    /// non-error result.
    pub fn get(&self, key: &K) -> Option<(V, VersionTag)> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.get(key).map(|row| (row.value.clone(), row.version.clone()))
    }

    /// Insert a new row, failing with `Conflict` if one already exists.
    pub fn create_if_absent(&self, key: K, value: V) -> Result<VersionTag, StorageError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        if rows.contains_key(&key) {
            return Err(StorageError::Conflict);
        }
        let version = VersionTag::initial();
        rows.insert(key, Row { value, version: version.clone() });
        Ok(version)
    }

    /// Overwrite unconditionally, creating the row if absent.
    pub fn put_unconditional(&self, key: K, value: V) -> VersionTag {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let version = match rows.get(&key) {
            Some(row) => row.version.next(),
            None => VersionTag::initial(),
        };
        rows.insert(key, Row { value, version: version.clone() });
        version
    }

    /// Overwrite only if the stored version tag matches `expected`. A
    /// mismatch or a missing row is reported as `Conflict` — the caller
    /// must not retry a CAS loss, only surface it.
    pub fn put_if_version(
        &self,
        key: &K,
        value: V,
        expected: &VersionTag,
    ) -> Result<VersionTag, StorageError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        match rows.get(key) {
            Some(row) if &row.version == expected => {
                let version = row.version.next();
                rows.insert(key.clone(), Row { value, version: version.clone() });
                Ok(version)
            }
            Some(_) => Err(StorageError::Conflict),
            None => Err(StorageError::Conflict),
        }
    }

    /// Scan all rows matching a predicate over the key and value.
    pub fn scan(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<(K, V, VersionTag)> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.iter()
            .filter(|(k, row)| predicate(k, &row.value))
            .map(|(k, row)| (k.clone(), row.value.clone(), row.version.clone()))
            .collect()
    }

    /// Remove a row unconditionally. Missing is not an error.
    pub fn remove(&self, key: &K) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.remove(key);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

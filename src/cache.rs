//! Plan caching and Automatic Persisted Queries (spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::Digest;
use sha2::Sha256;
use tracing::trace;

use crate::error::CacheError;
use crate::plan::QueryPlan;

/// The sentinel message clients key their "send me the full query next time"
/// retry off (spec.md §6). Must match exactly.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PersistedQueryNotFound";

fn sha256_hex(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A client-supplied request, optionally carrying an APQ hash instead of (or
/// alongside) the full query text (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct PersistedQueryRequest {
    pub query: Option<String>,
    pub sha256_hash: Option<String>,
    pub operation_name: Option<String>,
}

/// A cached, already-planned operation keyed by query text (or its APQ
/// hash).
pub trait PlanCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<Vec<QueryPlan>>>;
    fn insert(&self, key: String, plans: Arc<Vec<QueryPlan>>);
}

/// A [`PlanCache`] that never caches — every request replans from scratch.
#[derive(Debug, Default)]
pub struct NoCache;

impl PlanCache for NoCache {
    fn get(&self, _key: &str) -> Option<Arc<Vec<QueryPlan>>> {
        None
    }

    fn insert(&self, _key: String, _plans: Arc<Vec<QueryPlan>>) {}
}

/// An in-memory [`PlanCache`] keyed by exact query text or APQ hash.
#[derive(Default)]
pub struct InMemoryPlanCache {
    plans: RwLock<HashMap<String, Arc<Vec<QueryPlan>>>>,
}

impl InMemoryPlanCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanCache for InMemoryPlanCache {
    fn get(&self, key: &str) -> Option<Arc<Vec<QueryPlan>>> {
        self.plans.read().get(key).cloned()
    }

    fn insert(&self, key: String, plans: Arc<Vec<QueryPlan>>) {
        self.plans.write().insert(key, plans);
    }
}

/// Resolves a [`PersistedQueryRequest`] into concrete query text, tracking
/// the hash-to-text registry Automatic Persisted Queries needs (spec.md
/// §4.6). `plans` still goes through a [`PlanCache`] keyed by the resolved
/// text so identical queries plan once regardless of how they arrived.
pub struct AutomaticPersistedQueryRegistry {
    texts: RwLock<HashMap<String, String>>,
}

impl AutomaticPersistedQueryRegistry {
    pub fn new() -> Self {
        Self {
            texts: RwLock::new(HashMap::new()),
        }
    }

    /// spec.md §4.6 APQ resolution:
    /// - hash + query: verify the hash matches, register, return the query.
    /// - hash only: look up a previously registered query or fail with
    ///   [`CacheError::PersistedQueryNotFound`] using the exact sentinel text.
    /// - query only: pass through untouched, no APQ bookkeeping.
    pub fn resolve(&self, request: &PersistedQueryRequest) -> Result<String, CacheError> {
        match (&request.query, &request.sha256_hash) {
            (Some(query), Some(hash)) => {
                let computed = sha256_hex(query);
                if &computed != hash {
                    return Err(CacheError::Plan(crate::error::PlanError::Validation(
                        format!("sha256Hash {hash} does not match query text"),
                    )));
                }
                self.texts.write().insert(hash.clone(), query.clone());
                trace!(hash = %hash, "registered persisted query");
                Ok(query.clone())
            }
            (None, Some(hash)) => self
                .texts
                .read()
                .get(hash)
                .cloned()
                .ok_or(CacheError::PersistedQueryNotFound),
            (Some(query), None) => Ok(query.clone()),
            (None, None) => Err(CacheError::Plan(crate::error::PlanError::EmptyDocument)),
        }
    }
}

impl Default for AutomaticPersistedQueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ties together APQ hash resolution and plan caching: the value clients
/// actually send the gateway facade (spec.md §4.6).
pub fn cache_key(query_text: &str) -> String {
    sha256_hex(query_text)
}

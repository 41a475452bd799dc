//! Result Cache
//!
//! Formatted answers keyed by (tenant, user, access scope, normalized
//! question). A user whose territory changes misses their old entries. Entries
//! live for a fixed TTL and are not invalidated when the underlying data is
//! refreshed: an answer may be up to one TTL stale.
//!
//! The map is sharded, so unrelated keys never contend on one lock.

use crate::format::FormattedResult;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub user_id: String,
    /// Display form of the access predicate, e.g. `tenant=nestle AND asm_code='ASM-N01'`.
    pub scope: String,
    pub question: String,
}

impl CacheKey {
    pub fn new(tenant_id: &str, user_id: &str, scope: &str, question: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            scope: scope.to_string(),
            question: normalize_question(question),
        }
    }
}

/// Case-folded, trimmed question text.
pub fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    answer: FormattedResult,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry for the key; expired entries are dropped, never returned.
    pub fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        scope: &str,
        question: &str,
    ) -> Option<FormattedResult> {
        let key = CacheKey::new(tenant_id, user_id, scope, question);
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired(now) {
                debug!(tenant = tenant_id, user = user_id, "Cache hit");
                return Some(entry.answer.clone());
            }
        }
        // The read guard is released before taking the shard write lock.
        if self
            .entries
            .remove_if(&key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            debug!(tenant = tenant_id, user = user_id, "Cache entry expired");
        }
        None
    }

    pub fn put(
        &self,
        tenant_id: &str,
        user_id: &str,
        scope: &str,
        question: &str,
        answer: FormattedResult,
    ) {
        self.put_with_ttl(tenant_id, user_id, scope, question, answer, self.ttl);
    }

    pub fn put_with_ttl(
        &self,
        tenant_id: &str,
        user_id: &str,
        scope: &str,
        question: &str,
        answer: FormattedResult,
        ttl: Duration,
    ) {
        if self.entries.len() >= self.max_entries {
            self.evict();
        }
        self.entries.insert(
            CacheKey::new(tenant_id, user_id, scope, question),
            CacheEntry {
                answer,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drops expired entries, then the oldest tenth if still full.
    fn evict(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < self.max_entries {
            return;
        }

        let mut ages: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().inserted_at))
            .collect();
        ages.sort_by(|a, b| a.1.cmp(&b.1));
        let to_remove = (self.max_entries / 10).max(1);
        for (key, _) in ages.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

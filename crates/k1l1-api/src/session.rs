use std::collections::HashMap;
use std::sync::Arc;

use k1l1_core::{ExclusionSet, RankError, WordId};
use parking_lot::Mutex;
use ulid::Ulid;

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Longest client-supplied session token accepted.
pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Default)]
struct SessionEntry {
    excluded: ExclusionSet,
    last_used: u64,
}

#[derive(Debug, Default)]
struct SessionTable {
    entries: HashMap<String, SessionEntry>,
    clock: u64,
}

impl SessionTable {
    fn touch(&mut self, session_id: &str) -> &mut SessionEntry {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.entry(session_id.to_string()).or_default();
        entry.last_used = clock;
        entry
    }

    fn evict_over(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(session_id, _)| session_id.clone())
            else {
                return;
            };
            self.entries.remove(&oldest);
            tracing::debug!(session_id = %oldest, "evicted least recently used session");
        }
    }
}

/// Per-session excluded-opponent sets, shared across request handlers.
///
/// Requests without a session token get a throwaway set, so one caller's
/// rejected opponents never leak into another caller's match-ups.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    table: Arc<Mutex<SessionTable>>,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { table: Arc::new(Mutex::new(SessionTable::default())), capacity: capacity.max(1) }
    }

    /// Resume `session_id`, or start a fresh session when none is given.
    ///
    /// # Errors
    /// Returns [`RankError::Validation`] when the supplied token is blank or too long.
    pub fn open(&self, session_id: Option<&str>) -> Result<String, RankError> {
        let session_id = match session_id {
            Some(raw) => validate_session_id(raw)?.to_string(),
            None => Ulid::new().to_string(),
        };

        let mut table = self.table.lock();
        table.touch(&session_id);
        table.evict_over(self.capacity);
        Ok(session_id)
    }

    /// Run `f` against the exclusion set of `session_id`.
    ///
    /// Without a token `f` sees an empty set that is dropped afterwards.
    ///
    /// # Errors
    /// Returns [`RankError::Validation`] when the supplied token is blank or too long.
    pub fn with_exclusions<T, F>(&self, session_id: Option<&str>, f: F) -> Result<T, RankError>
    where
        F: FnOnce(&mut ExclusionSet) -> T,
    {
        let Some(raw) = session_id else {
            let mut scratch = ExclusionSet::new();
            return Ok(f(&mut scratch));
        };
        let session_id = validate_session_id(raw)?;

        let mut table = self.table.lock();
        let result = f(&mut table.touch(session_id).excluded);
        table.evict_over(self.capacity);
        Ok(result)
    }

    #[must_use]
    pub fn excluded_ids(&self, session_id: &str) -> Vec<WordId> {
        self.table
            .lock()
            .entries
            .get(session_id)
            .map(|entry| entry.excluded.iter().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_session_id(raw: &str) -> Result<&str, RankError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RankError::Validation("session_id MUST be non-empty".to_string()));
    }
    if trimmed.len() > MAX_SESSION_ID_LEN {
        return Err(RankError::Validation(format!(
            "session_id MUST be at most {MAX_SESSION_ID_LEN} bytes"
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test IDs: TSESS-001
    #[test]
    fn sessions_keep_separate_exclusion_sets() {
        let registry = SessionRegistry::default();
        let alice = registry.open(None).unwrap_or_else(|err| panic!("open failed: {err}"));
        let bob = registry.open(None).unwrap_or_else(|err| panic!("open failed: {err}"));
        assert_ne!(alice, bob);

        registry
            .with_exclusions(Some(&alice), |excluded| excluded.insert(WordId(7)))
            .unwrap_or_else(|err| panic!("exclusion update failed: {err}"));

        assert_eq!(registry.excluded_ids(&alice), vec![WordId(7)]);
        assert!(registry.excluded_ids(&bob).is_empty());
    }

    // Test IDs: TSESS-002
    #[test]
    fn anonymous_exclusions_are_request_scoped() {
        let registry = SessionRegistry::default();
        let first = registry
            .with_exclusions(None, |excluded| excluded.insert(WordId(3)))
            .unwrap_or_else(|err| panic!("exclusion update failed: {err}"));
        let second = registry
            .with_exclusions(None, |excluded| excluded.insert(WordId(3)))
            .unwrap_or_else(|err| panic!("exclusion update failed: {err}"));

        assert!(first);
        assert!(second);
        assert!(registry.is_empty());
    }

    // Test IDs: TSESS-003
    #[test]
    fn least_recently_used_session_is_evicted_over_capacity() {
        let registry = SessionRegistry::new(2);
        for session_id in ["a", "b"] {
            registry
                .open(Some(session_id))
                .unwrap_or_else(|err| panic!("open failed: {err}"));
        }
        registry
            .with_exclusions(Some("a"), |excluded| excluded.insert(WordId(1)))
            .unwrap_or_else(|err| panic!("exclusion update failed: {err}"));
        registry.open(Some("c")).unwrap_or_else(|err| panic!("open failed: {err}"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.excluded_ids("a"), vec![WordId(1)]);
        assert!(registry.excluded_ids("b").is_empty());
    }

    // Test IDs: TSESS-004
    #[test]
    fn blank_or_oversized_session_ids_are_rejected() {
        let registry = SessionRegistry::default();
        assert!(registry.open(Some("  ")).is_err());
        assert!(registry.open(Some(&"s".repeat(MAX_SESSION_ID_LEN + 1))).is_err());
        assert!(registry.with_exclusions(Some(""), |_| ()).is_err());
    }
}

//! Last-write-wins conflict resolution
//!
//! Local and remote copies of an entity collection are merged record by
//! record. The newer copy of a record wins in full; field-level differences
//! are captured for the audit log but never block the merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use tether_core::{
    Clock, ConflictEntry, ConflictRecord, EntityKind, EntityRecord, MAX_CONFLICTS_PER_RECORD,
    UserId,
};
use tether_storage::{ListStore, RecordStore, keys};

use crate::error::SyncResult;

/// Configuration for the conflict resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Divergent rows kept per conflict record
    pub max_conflicts_per_record: usize,
    /// Conflict records kept in the audit log; oldest are dropped first
    pub max_history: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_conflicts_per_record: MAX_CONFLICTS_PER_RECORD,
            max_history: 100,
        }
    }
}

impl ResolverConfig {
    pub fn with_max_conflicts_per_record(mut self, max: usize) -> Self {
        self.max_conflicts_per_record = max;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }
}

/// Result of merging two collections
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Winner set, newest first, ties by id ascending
    pub records: Vec<EntityRecord>,
    /// One entry per shared id whose fields differ, ordered by id
    pub conflicts: Vec<ConflictEntry>,
}

/// Merge two collections of the same entity type
///
/// Records present on one side only pass through. For a shared id the copy
/// with the later timestamp wins; on equal timestamps the remote copy wins.
/// An id repeated within one side collapses to its newest row (the last
/// one on a timestamp tie) before the two sides are compared.
pub fn lww_merge(local: &[EntityRecord], remote: &[EntityRecord]) -> MergeOutcome {
    let mut merged = newest_by_id(local);
    let mut conflicts = Vec::new();

    for (id, theirs) in newest_by_id(remote) {
        let winner = match merged.get(id) {
            Some(ours) => {
                if ours.diverges_from(theirs) {
                    conflicts.push(ConflictEntry {
                        id: theirs.id.clone(),
                        local: (*ours).clone(),
                        remote: theirs.clone(),
                    });
                }
                if ours.timestamp > theirs.timestamp {
                    *ours
                } else {
                    theirs
                }
            }
            None => theirs,
        };
        merged.insert(id, winner);
    }

    let mut records: Vec<EntityRecord> = merged.into_values().cloned().collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

    // Remote ids are visited in key order, so conflicts are already sorted
    MergeOutcome { records, conflicts }
}

fn newest_by_id(records: &[EntityRecord]) -> BTreeMap<&str, &EntityRecord> {
    let mut newest: BTreeMap<&str, &EntityRecord> = BTreeMap::new();
    for record in records {
        let stale = newest
            .get(record.id.as_str())
            .is_some_and(|kept| kept.timestamp > record.timestamp);
        if stale {
            debug!(id = %record.id, "Dropping stale duplicate row");
            continue;
        }
        newest.insert(record.id.as_str(), record);
    }
    newest
}

/// Persisted, bounded audit log of conflict records
pub struct ConflictLog {
    records: ListStore<ConflictRecord>,
    max_history: usize,
}

impl ConflictLog {
    pub fn new(store: Arc<dyn RecordStore>, user: &UserId, max_history: usize) -> Self {
        Self {
            records: ListStore::new(store, keys::conflicts(user)),
            max_history,
        }
    }

    /// Append a record, dropping the oldest ones beyond the history limit
    pub async fn append(&self, record: ConflictRecord) -> SyncResult<()> {
        let max = self.max_history;
        self.records
            .mutate(|records| {
                records.push(record);
                if records.len() > max {
                    let excess = records.len() - max;
                    records.drain(..excess);
                }
            })
            .await?;
        Ok(())
    }

    /// Conflict records, newest first
    pub async fn history(&self) -> SyncResult<Vec<ConflictRecord>> {
        let mut records = self.records.load().await?;
        records.reverse();
        Ok(records)
    }

    pub async fn clear(&self) -> SyncResult<()> {
        self.records.clear().await?;
        Ok(())
    }
}

/// Merges collections and keeps the conflict audit log
pub struct ConflictResolver {
    log: ConflictLog,
    config: ResolverConfig,
    clock: Arc<dyn Clock>,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        user: &UserId,
        config: ResolverConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log: ConflictLog::new(store, user, config.max_history),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Merge and return the winner set
    pub async fn merge(
        &self,
        entity: &EntityKind,
        local: &[EntityRecord],
        remote: &[EntityRecord],
    ) -> Vec<EntityRecord> {
        self.merge_detailed(entity, local, remote).await.records
    }

    /// Merge and return the winner set together with the divergent rows
    ///
    /// Never fails: if the conflict record cannot be persisted the merge
    /// result is still returned.
    #[instrument(skip(self, local, remote), fields(local = local.len(), remote = remote.len()))]
    pub async fn merge_detailed(
        &self,
        entity: &EntityKind,
        local: &[EntityRecord],
        remote: &[EntityRecord],
    ) -> MergeOutcome {
        let outcome = lww_merge(local, remote);

        if !outcome.conflicts.is_empty() {
            let record = ConflictRecord::new(
                entity.clone(),
                outcome.conflicts.clone(),
                self.clock.now(),
                self.config.max_conflicts_per_record,
            );
            debug!(conflicts = record.count, "Divergent records found");
            if let Err(e) = self.log.append(record).await {
                warn!(error = %e, "Failed to persist conflict record");
            }
        }

        outcome
    }

    /// Conflict audit history, newest first
    pub async fn history(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.log.history().await
    }

    pub async fn clear_history(&self) -> SyncResult<()> {
        self.log.clear().await
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use tether_core::ManualClock;
    use tether_storage::InMemoryRecordStore;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, minute, 0).unwrap()
    }

    fn rec(id: &str, value: i64, ts: DateTime<Utc>) -> EntityRecord {
        EntityRecord::new(id, ts).with_field("value", value)
    }

    fn resolver(store: Arc<InMemoryRecordStore>) -> ConflictResolver {
        ConflictResolver::new(
            store,
            &UserId::new("alice").unwrap(),
            ResolverConfig::default(),
            Arc::new(ManualClock::new(t(30))),
        )
    }

    #[test]
    fn test_newer_wins() {
        let local = [rec("1", 5, t(0))];
        let remote = [rec("1", 7, t(1))];
        let outcome = lww_merge(&local, &remote);
        assert_eq!(outcome.records, vec![rec("1", 7, t(1))]);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].id, "1");

        let outcome = lww_merge(&remote, &local);
        assert_eq!(outcome.records, vec![rec("1", 7, t(1))]);
    }

    #[test]
    fn test_equal_timestamp_remote_wins() {
        let outcome = lww_merge(&[rec("1", 5, t(0))], &[rec("1", 9, t(0))]);
        assert_eq!(outcome.records[0].field("value"), Some(&9.into()));
    }

    #[test]
    fn test_one_sided_records_pass_through_sorted() {
        let local = [rec("b", 1, t(5)), rec("a", 1, t(5))];
        let remote = [rec("c", 1, t(9))];
        let outcome = lww_merge(&local, &remote);
        let ids: Vec<_> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_duplicate_ids_within_one_side_collapse_to_newest() {
        let remote = [rec("1", 5, t(2)), rec("1", 9, t(4)), rec("1", 7, t(1))];
        let outcome = lww_merge(&[], &remote);
        assert_eq!(outcome.records, vec![rec("1", 9, t(4))]);
        assert!(outcome.conflicts.is_empty());

        let local = [rec("2", 1, t(0)), rec("2", 3, t(6))];
        let outcome = lww_merge(&local, &[rec("2", 3, t(6))]);
        assert_eq!(outcome.records, vec![rec("2", 3, t(6))]);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_timestamp_only_difference_is_not_a_conflict() {
        let outcome = lww_merge(&[rec("1", 5, t(0))], &[rec("1", 5, t(3))]);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.records[0].timestamp, t(3));
    }

    #[tokio::test]
    async fn test_conflicts_are_logged_and_capped() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = ConflictResolver::new(
            store,
            &UserId::new("alice").unwrap(),
            ResolverConfig::default().with_max_conflicts_per_record(2),
            Arc::new(ManualClock::new(t(30))),
        );

        let local: Vec<_> = (0..5).map(|i| rec(&i.to_string(), 1, t(0))).collect();
        let remote: Vec<_> = (0..5).map(|i| rec(&i.to_string(), 2, t(1))).collect();
        resolver.merge(&EntityKind::MoodEntry, &local, &remote).await;

        let history = resolver.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].count, 5);
        assert_eq!(history[0].conflicts.len(), 2);
        assert_eq!(history[0].at, t(30));
    }

    #[tokio::test]
    async fn test_history_is_bounded_newest_first() {
        let store = Arc::new(InMemoryRecordStore::new());
        let log = ConflictLog::new(store, &UserId::new("alice").unwrap(), 3);
        for minute in 0..5 {
            log.append(ConflictRecord::new(EntityKind::Compulsion, vec![], t(minute), 20))
                .await
                .unwrap();
        }
        let ats: Vec<_> = log.history().await.unwrap().iter().map(|r| r.at).collect();
        assert_eq!(ats, vec![t(4), t(3), t(2)]);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_fail_merge() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_fail_writes(true);
        let resolver = resolver(store);

        let merged = resolver
            .merge(&EntityKind::MoodEntry, &[rec("1", 5, t(0))], &[rec("1", 7, t(1))])
            .await;
        assert_eq!(merged, vec![rec("1", 7, t(1))]);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let resolver = resolver(Arc::new(InMemoryRecordStore::new()));
        resolver
            .merge(&EntityKind::MoodEntry, &[rec("1", 5, t(0))], &[rec("1", 7, t(1))])
            .await;
        resolver.clear_history().await.unwrap();
        assert!(resolver.history().await.unwrap().is_empty());
    }
}

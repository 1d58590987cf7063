//! In-memory history store for tests.
//!
//! Mirrors the Postgres semantics the driver relies on: row locks scoped to
//! a transaction and skipped when held, inserts visible only after commit,
//! and a unique build id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::build::NewPipelineBuild;
use crate::models::legacy::HistoryGroup;
use crate::store::{HistoryStore, LockOutcome, RecordTransaction};

#[derive(Debug, Clone)]
pub struct LegacyRow {
    pub record_id: i64,
    pub group: HistoryGroup,
    pub version: i64,
    pub data: String,
}

#[derive(Default)]
struct State {
    legacy: Vec<LegacyRow>,
    builds: BTreeMap<i64, NewPipelineBuild>,
    locks: HashSet<i64>,
    insert_attempts: usize,
    committed_inserts: HashMap<i64, usize>,
    failing_inserts: HashSet<i64>,
    failing_groups: HashSet<HistoryGroup>,
    groups_unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryHistoryStore {
    pub fn new(legacy: Vec<LegacyRow>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                legacy,
                ..State::default()
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Insert a target row as if an earlier run had committed it.
    pub fn seed_build(&self, row: NewPipelineBuild) {
        self.state().builds.insert(row.id, row);
    }

    pub fn build(&self, id: i64) -> Option<NewPipelineBuild> {
        self.state().builds.get(&id).cloned()
    }

    pub fn build_ids(&self) -> Vec<i64> {
        self.state().builds.keys().copied().collect()
    }

    pub fn insert_attempts(&self) -> usize {
        self.state().insert_attempts
    }

    pub fn committed_inserts(&self, id: i64) -> usize {
        self.state().committed_inserts.get(&id).copied().unwrap_or(0)
    }

    /// Simulate another process holding the row lock.
    pub fn hold_lock(&self, id: i64) {
        self.state().locks.insert(id);
    }

    pub fn release_lock(&self, id: i64) {
        self.state().locks.remove(&id);
    }

    pub fn is_locked(&self, id: i64) -> bool {
        self.state().locks.contains(&id)
    }

    pub fn fail_insert(&self, id: i64) {
        self.state().failing_inserts.insert(id);
    }

    pub fn fail_candidates(&self, group: HistoryGroup) {
        self.state().failing_groups.insert(group);
    }

    pub fn fail_groups(&self) {
        self.state().groups_unavailable = true;
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn list_groups(&self) -> Result<Vec<HistoryGroup>, StoreError> {
        let state = self.state();
        if state.groups_unavailable {
            return Err(StoreError::Unavailable("pipeline_history_old".to_string()));
        }

        let mut groups: Vec<HistoryGroup> = state
            .legacy
            .iter()
            .map(|row| row.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        // Postgres sorts NULL last in ascending order.
        groups.sort_by_key(|g| {
            (
                g.application_id,
                g.pipeline_id,
                g.environment_id,
                g.branch.is_none(),
                g.branch.clone(),
            )
        });
        Ok(groups)
    }

    async fn list_candidates(
        &self,
        group: &HistoryGroup,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let state = self.state();
        if state.failing_groups.contains(group) {
            return Err(StoreError::Unavailable(format!("candidates of {group}")));
        }

        let mut rows: Vec<&LegacyRow> = state.legacy.iter().filter(|r| &r.group == group).collect();
        rows.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then(b.record_id.cmp(&a.record_id))
        });
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|r| r.record_id)
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            locks: Vec::new(),
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    locks: Vec<i64>,
    pending: Vec<NewPipelineBuild>,
}

impl MemoryTransaction {
    fn release(&mut self) {
        self.pending.clear();
        let mut state = self.state.lock().unwrap();
        for id in self.locks.drain(..) {
            state.locks.remove(&id);
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl RecordTransaction for MemoryTransaction {
    async fn try_lock(&mut self, record_id: i64) -> Result<LockOutcome, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if state.locks.contains(&record_id) {
            return Ok(LockOutcome::Contended);
        }
        let Some(data) = state
            .legacy
            .iter()
            .find(|r| r.record_id == record_id)
            .map(|r| r.data.clone())
        else {
            return Ok(LockOutcome::Contended);
        };
        state.locks.insert(record_id);
        self.locks.push(record_id);
        Ok(LockOutcome::Acquired(data))
    }

    async fn build_exists(&mut self, build_id: i64) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state.builds.contains_key(&build_id) || self.pending.iter().any(|r| r.id == build_id))
    }

    async fn insert_build(&mut self, row: &NewPipelineBuild) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.insert_attempts += 1;
        if state.failing_inserts.contains(&row.id)
            || state.builds.contains_key(&row.id)
            || self.pending.iter().any(|r| r.id == row.id)
        {
            return Err(StoreError::Conflict(row.id));
        }
        drop(state);
        self.pending.push(row.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(row) = self.pending.iter().find(|r| state.builds.contains_key(&r.id)) {
                let id = row.id;
                drop(state);
                self.release();
                return Err(StoreError::Conflict(id));
            }
            for row in self.pending.drain(..) {
                *state.committed_inserts.entry(row.id).or_default() += 1;
                state.builds.insert(row.id, row);
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryHistoryStore {
        MemoryHistoryStore::new(vec![LegacyRow {
            record_id: 1,
            group: HistoryGroup {
                application_id: 1,
                pipeline_id: 2,
                environment_id: 3,
                branch: None,
            },
            version: 1,
            data: "{}".to_string(),
        }])
    }

    #[tokio::test]
    async fn dropping_an_open_transaction_releases_its_lock() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.try_lock(1).await.unwrap(), LockOutcome::Acquired(_)));
        assert!(store.is_locked(1));

        drop(tx);

        assert!(!store.is_locked(1));
        let mut next = store.begin().await.unwrap();
        assert!(matches!(next.try_lock(1).await.unwrap(), LockOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn held_lock_is_contended() {
        let store = store();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(matches!(first.try_lock(1).await.unwrap(), LockOutcome::Acquired(_)));
        assert!(matches!(second.try_lock(1).await.unwrap(), LockOutcome::Contended));
        first.rollback().await.unwrap();
        assert!(matches!(second.try_lock(1).await.unwrap(), LockOutcome::Acquired(_)));
    }
}

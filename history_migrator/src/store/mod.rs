//! Store seams used by the migration driver.
//!
//! [`HistoryStore`] covers the run-level queries; every record is handled
//! inside its own [`RecordTransaction`], which also scopes the row lock.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::build::NewPipelineBuild;
use crate::models::legacy::HistoryGroup;

/// Result of the non-blocking lock attempt on a legacy row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock held until commit/rollback; carries the raw JSON snapshot.
    Acquired(String),
    /// Another transaction holds the row.
    Contended,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Distinct (application, pipeline, environment, branch) units, ascending.
    async fn list_groups(&self) -> Result<Vec<HistoryGroup>, StoreError>;

    /// Record ids of `group`, highest version first, at most `limit`.
    async fn list_candidates(
        &self,
        group: &HistoryGroup,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError>;

    /// Open a transaction dedicated to one record.
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, StoreError>;
}

#[async_trait]
pub trait RecordTransaction: Send {
    async fn try_lock(&mut self, record_id: i64) -> Result<LockOutcome, StoreError>;

    async fn build_exists(&mut self, build_id: i64) -> Result<bool, StoreError>;

    async fn insert_build(&mut self, row: &NewPipelineBuild) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

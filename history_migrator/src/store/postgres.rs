//! Postgres-backed history store (diesel-async + deadpool).

use async_trait::async_trait;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};

use crate::error::StoreError;
use crate::models::build::NewPipelineBuild;
use crate::models::legacy::HistoryGroup;
use crate::services::{build_service, history_service};
use crate::store::{HistoryStore, LockOutcome, RecordTransaction};

pub type DieselPool = Pool<AsyncPgConnection>;

type Tx = AnsiTransactionManager;

/// Build the connection pool shared by all migration workers.
pub fn build_pool(database_url: &str, max_size: usize) -> anyhow::Result<DieselPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
}

pub struct PgHistoryStore {
    pool: DieselPool,
}

impl PgHistoryStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn list_groups(&self) -> Result<Vec<HistoryGroup>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(history_service::list_groups(&mut conn).await?)
    }

    async fn list_candidates(
        &self,
        group: &HistoryGroup,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(history_service::list_candidates(&mut conn, group, limit).await?)
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, StoreError> {
        let mut conn = self.connection().await?;
        <Tx as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut *conn).await?;
        Ok(Box::new(PgRecordTransaction {
            conn: Some(conn),
            open: true,
        }))
    }
}

/// One pooled connection with an open transaction.
///
/// Dropping it while still open detaches the connection from the pool and
/// closes it, so the server rolls back and releases the row lock.
struct PgRecordTransaction {
    conn: Option<Object<AsyncPgConnection>>,
    open: bool,
}

impl PgRecordTransaction {
    fn conn(&mut self) -> Result<&mut AsyncPgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Unavailable("record transaction closed".to_string()))
    }
}

impl Drop for PgRecordTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Record transaction dropped while open, closing its connection");
            drop(Object::take(conn));
        }
    }
}

#[async_trait]
impl RecordTransaction for PgRecordTransaction {
    async fn try_lock(&mut self, record_id: i64) -> Result<LockOutcome, StoreError> {
        Ok(match history_service::lock_record(self.conn()?, record_id).await? {
            Some(raw) => LockOutcome::Acquired(raw),
            None => LockOutcome::Contended,
        })
    }

    async fn build_exists(&mut self, build_id: i64) -> Result<bool, StoreError> {
        Ok(build_service::build_exists(self.conn()?, build_id).await?)
    }

    async fn insert_build(&mut self, row: &NewPipelineBuild) -> Result<(), StoreError> {
        build_service::insert_build(self.conn()?, row).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Ok(());
        }
        <Tx as TransactionManager<AsyncPgConnection>>::commit_transaction(self.conn()?).await?;
        self.open = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Ok(());
        }
        <Tx as TransactionManager<AsyncPgConnection>>::rollback_transaction(self.conn()?).await?;
        self.open = false;
        Ok(())
    }
}

//! Reads and writes against the normalized pipeline_build table.

use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::BigInt;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::StoreError;
use crate::models::build::NewPipelineBuild;
use crate::schema::pipeline_build;

/// Number of target rows carrying this build id.
pub fn exists_query(build_id: i64) -> pipeline_build::BoxedQuery<'static, Pg, BigInt> {
    pipeline_build::table
        .filter(pipeline_build::id.eq(build_id))
        .count()
        .into_boxed()
}

/// Check whether a build with this id was already migrated.
pub async fn build_exists(conn: &mut AsyncPgConnection, build_id: i64) -> QueryResult<bool> {
    let count: i64 = exists_query(build_id).get_result(conn).await?;

    Ok(count > 0)
}

/// Insert a reconstructed build. A duplicate id maps to [`StoreError::Conflict`].
pub async fn insert_build(
    conn: &mut AsyncPgConnection,
    row: &NewPipelineBuild,
) -> Result<(), StoreError> {
    match diesel::insert_into(pipeline_build::table)
        .values(row)
        .execute(conn)
        .await
    {
        Ok(_) => {
            tracing::debug!(build_id = row.id, version = row.version, "Pipeline build inserted");
            Ok(())
        }
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(StoreError::Conflict(row.id))
        }
        Err(e) => Err(StoreError::Query(e)),
    }
}

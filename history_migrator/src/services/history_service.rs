//! Queries over the deprecated pipeline_history_old table.

use diesel::dsl;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::legacy::HistoryGroup;
use crate::schema::pipeline_history_old;

type GroupColumns = (BigInt, BigInt, BigInt, Nullable<Text>);

type LockQuery = dsl::SkipLocked<
    dsl::ForUpdate<
        dsl::Select<
            dsl::Filter<
                pipeline_history_old::table,
                dsl::Eq<pipeline_history_old::pipeline_build_id, i64>,
            >,
            pipeline_history_old::data,
        >,
    >,
>;

/// Distinct migration units, ascending on every grouping column.
pub fn groups_query() -> pipeline_history_old::BoxedQuery<'static, Pg, GroupColumns> {
    pipeline_history_old::table
        .select((
            pipeline_history_old::application_id,
            pipeline_history_old::pipeline_id,
            pipeline_history_old::environment_id,
            pipeline_history_old::vcs_changes_branch,
        ))
        .distinct()
        .order((
            pipeline_history_old::application_id.asc(),
            pipeline_history_old::pipeline_id.asc(),
            pipeline_history_old::environment_id.asc(),
            pipeline_history_old::vcs_changes_branch.asc(),
        ))
        .into_boxed()
}

/// Record ids of one unit, newest version first.
///
/// A unit without branch matches rows whose branch IS NULL.
pub fn candidates_query(
    group: &HistoryGroup,
    limit: i64,
) -> pipeline_history_old::BoxedQuery<'_, Pg, BigInt> {
    let query = pipeline_history_old::table
        .filter(pipeline_history_old::application_id.eq(group.application_id))
        .filter(pipeline_history_old::pipeline_id.eq(group.pipeline_id))
        .filter(pipeline_history_old::environment_id.eq(group.environment_id))
        .into_boxed();

    let query = match &group.branch {
        Some(branch) => query.filter(pipeline_history_old::vcs_changes_branch.eq(branch.as_str())),
        None => query.filter(pipeline_history_old::vcs_changes_branch.is_null()),
    };

    query
        .select(pipeline_history_old::pipeline_build_id)
        .order((
            pipeline_history_old::version.desc(),
            pipeline_history_old::pipeline_build_id.desc(),
        ))
        .limit(limit)
}

/// Snapshot of one row under `FOR UPDATE SKIP LOCKED`.
pub fn lock_query(record_id: i64) -> LockQuery {
    pipeline_history_old::table
        .filter(pipeline_history_old::pipeline_build_id.eq(record_id))
        .select(pipeline_history_old::data)
        .for_update()
        .skip_locked()
}

/// List every distinct migration unit in a stable order.
pub async fn list_groups(conn: &mut AsyncPgConnection) -> QueryResult<Vec<HistoryGroup>> {
    let rows = groups_query()
        .load::<(i64, i64, i64, Option<String>)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(
            |(application_id, pipeline_id, environment_id, branch)| HistoryGroup {
                application_id,
                pipeline_id,
                environment_id,
                branch,
            },
        )
        .collect())
}

/// Select the most recent record ids of a unit.
pub async fn list_candidates(
    conn: &mut AsyncPgConnection,
    group: &HistoryGroup,
    limit: i64,
) -> QueryResult<Vec<i64>> {
    candidates_query(group, limit).load::<i64>(conn).await
}

/// Lock a legacy row for the current transaction and read its snapshot.
///
/// A row held by another migration run comes back as `None` immediately
/// instead of blocking.
pub async fn lock_record(
    conn: &mut AsyncPgConnection,
    record_id: i64,
) -> QueryResult<Option<String>> {
    lock_query(record_id)
        .get_result::<String>(conn)
        .await
        .optional()
}

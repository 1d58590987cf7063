//! Diesel table definitions for pipeline history migration.
//!
//! Tables: pipeline_history_old (deprecated JSON snapshots, read-only here)
//! and pipeline_build (normalized target). The DDL for both is owned by the
//! main API's schema migrations.

diesel::table! {
    pipeline_history_old (pipeline_build_id) {
        pipeline_build_id -> Int8,
        application_id -> Int8,
        pipeline_id -> Int8,
        environment_id -> Int8,
        vcs_changes_branch -> Nullable<Varchar>,
        version -> Int8,
        data -> Text,
    }
}

diesel::table! {
    pipeline_build (id) {
        id -> Int8,
        pipeline_id -> Int8,
        build_number -> Int8,
        version -> Int8,
        status -> Varchar,
        args -> Jsonb,
        start -> Nullable<Timestamptz>,
        application_id -> Int8,
        environment_id -> Int8,
        done -> Nullable<Timestamptz>,
        manual_trigger -> Bool,
        triggered_by -> Nullable<Int8>,
        parent_pipeline_build_id -> Nullable<Int8>,
        vcs_changes_branch -> Nullable<Varchar>,
        vcs_changes_hash -> Nullable<Varchar>,
        vcs_changes_author -> Nullable<Varchar>,
        scheduled_trigger -> Bool,
        stages -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(pipeline_history_old, pipeline_build,);

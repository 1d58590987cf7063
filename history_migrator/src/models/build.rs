//! pipeline_build — A normalized build reconstructed from legacy history.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::legacy::null_as_default;
use crate::schema::pipeline_build;

/// Job status the legacy engine wrote for a failed action.
pub const STATUS_FAIL: &str = "Fail";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build {
    pub id: i64,
    pub pipeline_id: i64,
    pub application_id: i64,
    pub environment_id: i64,
    pub version: i64,
    pub build_number: i64,
    pub status: String,
    pub parameters: Vec<Parameter>,
    pub start: Option<DateTime<Utc>>,
    pub done: Option<DateTime<Utc>>,
    pub trigger: BuildTrigger,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildTrigger {
    pub manual_trigger: bool,
    pub scheduled_trigger: bool,
    pub vcs_branch: Option<String>,
    pub vcs_hash: Option<String>,
    pub vcs_author: Option<String>,
    pub triggered_by: Option<i64>,
    pub parent_build_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,
    pub status: StageStatus,
    pub jobs: Vec<Job>,
}

impl Stage {
    /// A stage fails as soon as one of its jobs failed.
    pub fn derived_status(jobs: &[Job]) -> StageStatus {
        if jobs.iter().any(|job| job.status == STATUS_FAIL) {
            StageStatus::Fail
        } else {
            StageStatus::Success
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub action_name: String,
    pub enabled: bool,
    pub pipeline_action_id: i64,
    pub parameters: Vec<Parameter>,
    pub status: String,
    pub start: Option<DateTime<Utc>>,
    pub done: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
}

/// Target row; `args` and `stages` hold the JSON encoding of the build's
/// parameters and stages.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pipeline_build)]
pub struct NewPipelineBuild {
    pub id: i64,
    pub pipeline_id: i64,
    pub build_number: i64,
    pub version: i64,
    pub status: String,
    pub args: serde_json::Value,
    pub start: Option<DateTime<Utc>>,
    pub application_id: i64,
    pub environment_id: i64,
    pub done: Option<DateTime<Utc>>,
    pub manual_trigger: bool,
    pub triggered_by: Option<i64>,
    pub parent_pipeline_build_id: Option<i64>,
    pub vcs_changes_branch: Option<String>,
    pub vcs_changes_hash: Option<String>,
    pub vcs_changes_author: Option<String>,
    pub scheduled_trigger: bool,
    pub stages: serde_json::Value,
}

impl NewPipelineBuild {
    pub fn from_build(build: &Build) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: build.id,
            pipeline_id: build.pipeline_id,
            build_number: build.build_number,
            version: build.version,
            status: build.status.clone(),
            args: serde_json::to_value(&build.parameters)?,
            start: build.start,
            application_id: build.application_id,
            environment_id: build.environment_id,
            done: build.done,
            manual_trigger: build.trigger.manual_trigger,
            triggered_by: build.trigger.triggered_by,
            parent_pipeline_build_id: build.trigger.parent_build_id,
            vcs_changes_branch: build.trigger.vcs_branch.clone(),
            vcs_changes_hash: build.trigger.vcs_hash.clone(),
            vcs_changes_author: build.trigger.vcs_author.clone(),
            scheduled_trigger: build.trigger.scheduled_trigger,
            stages: serde_json::to_value(&build.stages)?,
        })
    }
}

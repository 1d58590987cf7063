//! Rebuilds the stage/job structure of a legacy snapshot.
//!
//! Stage and job entries are projected field by field from the untyped tree;
//! every missing or mistyped field is reported instead of defaulted.

use serde_json::{Map, Value};

use crate::error::{ParameterDecodeError, ReconstructionError, RecordError};
use crate::models::build::{Build, BuildTrigger, Job, Parameter, Stage, StageStatus};
use crate::models::legacy::{parse_legacy_time, BuildSkeleton};

pub fn reconstruct(skeleton: &BuildSkeleton, tree: &Value) -> Result<Build, RecordError> {
    let mut stages: Vec<Stage> = skeleton
        .stages
        .iter()
        .map(|stage| Stage {
            id: stage.id,
            name: stage.name.clone(),
            status: StageStatus::Success,
            jobs: Vec::new(),
        })
        .collect();

    if let Some(Value::Array(entries)) = tree.get("stages") {
        for (index, entry) in entries.iter().enumerate() {
            merge_stage_entry(&mut stages, index, entry)?;
        }
    }

    for stage in &mut stages {
        stage.status = Stage::derived_status(&stage.jobs);
    }

    let parameters =
        decode_parameters(tree.get("parameters")).map_err(|source| ParameterDecodeError {
            context: format!("build {}", skeleton.id),
            source,
        })?;

    let trigger = &skeleton.trigger;
    let parent = skeleton
        .previous_pipeline_build
        .as_ref()
        .or(trigger.parent_pipeline_build.as_ref());

    Ok(Build {
        id: skeleton.id,
        pipeline_id: skeleton.pipeline.id,
        application_id: skeleton.application.id,
        environment_id: skeleton.environment.id,
        version: skeleton.version,
        build_number: skeleton.build_number,
        status: skeleton.status.clone(),
        parameters,
        start: skeleton.start.as_deref().and_then(parse_legacy_time),
        done: skeleton.done.as_deref().and_then(parse_legacy_time),
        trigger: BuildTrigger {
            manual_trigger: trigger.manual_trigger,
            scheduled_trigger: trigger.scheduled_trigger,
            vcs_branch: trigger.vcs_branch.clone(),
            vcs_hash: trigger.vcs_hash.clone(),
            vcs_author: trigger.vcs_author.clone(),
            triggered_by: trigger.triggered_by.as_ref().map(|u| u.id).filter(|id| *id > 0),
            parent_build_id: parent.map(|b| b.id).filter(|id| *id > 0),
        },
        stages,
    })
}

/// Decode a parameter list that is either inline JSON or a JSON document
/// embedded as a string. Absent and null lists are empty, and a null entry
/// decodes to an empty parameter.
pub fn decode_parameters(value: Option<&Value>) -> Result<Vec<Parameter>, serde_json::Error> {
    let encoded = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(embedded)) if embedded.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(embedded)) => embedded.clone(),
        Some(inline) => serde_json::to_string(inline)?,
    };

    let parameters: Option<Vec<Option<Parameter>>> = serde_json::from_str(&encoded)?;
    Ok(parameters
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

fn merge_stage_entry(stages: &mut [Stage], index: usize, entry: &Value) -> Result<(), RecordError> {
    let invalid = |reason: &str| ReconstructionError::InvalidStageEntry {
        index,
        reason: reason.to_string(),
    };

    let entry = entry.as_object().ok_or_else(|| invalid("not an object"))?;
    let stage_id = integer(entry, "id").map_err(|reason| invalid(&reason))?;

    let stage = stages
        .iter_mut()
        .find(|stage| stage.id == stage_id)
        .ok_or(ReconstructionError::StageNotFound { stage_id })?;

    let jobs: &[Value] = match entry.get("builds") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(jobs)) => jobs,
        Some(_) => return Err(invalid("`builds` is not a list").into()),
    };

    stage.jobs = jobs
        .iter()
        .enumerate()
        .map(|(job_index, job)| decode_job(stage_id, job_index, job))
        .collect::<Result<_, _>>()?;

    Ok(())
}

fn decode_job(stage_id: i64, index: usize, entry: &Value) -> Result<Job, RecordError> {
    let invalid = |reason: String| ReconstructionError::InvalidJobEntry {
        stage_id,
        index,
        reason,
    };

    let entry = entry
        .as_object()
        .ok_or_else(|| invalid("not an object".to_string()))?;

    let id = integer(entry, "id").map_err(invalid)?;
    let status = text(entry, "status").map_err(invalid)?;
    let action_name = text(entry, "action_name").map_err(invalid)?;
    let pipeline_action_id = integer(entry, "pipeline_action_id").map_err(invalid)?;

    let parameters = decode_parameters(entry.get("args")).map_err(|source| ParameterDecodeError {
        context: format!("job {id} of stage {stage_id}"),
        source,
    })?;

    Ok(Job {
        id,
        action_name: action_name.to_string(),
        // Never persisted by the legacy format.
        enabled: true,
        pipeline_action_id,
        parameters,
        status: status.to_string(),
        start: timestamp(entry, "start"),
        done: timestamp(entry, "done"),
    })
}

fn integer(entry: &Map<String, Value>, key: &str) -> Result<i64, String> {
    match entry.get(key) {
        None | Some(Value::Null) => Err(format!("missing `{key}`")),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| format!("`{key}` is not an integer")),
    }
}

fn text<'a>(entry: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    match entry.get(key) {
        None | Some(Value::Null) => Err(format!("missing `{key}`")),
        Some(value) => value
            .as_str()
            .ok_or_else(|| format!("`{key}` is not a string")),
    }
}

fn timestamp(entry: &Map<String, Value>, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    entry.get(key)?.as_str().and_then(parse_legacy_time)
}

//! pipeline_history_old — Typed projections of the legacy build snapshot.
//!
//! Only the stable, scalar part of the snapshot is decoded here. The stage
//! and job payloads changed shape across releases and are projected from the
//! untyped document by the reconstructor instead.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One migration unit: the distinct grouping attributes of legacy rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryGroup {
    pub application_id: i64,
    pub pipeline_id: i64,
    pub environment_id: i64,
    pub branch: Option<String>,
}

impl fmt::Display for HistoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app={} pip={} env={} branch={}",
            self.application_id,
            self.pipeline_id,
            self.environment_id,
            self.branch.as_deref().unwrap_or("<none>")
        )
    }
}

/// Scalar fields of a legacy pipeline build snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSkeleton {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_number: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    pub pipeline: LegacyRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub application: LegacyRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment: LegacyRef,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub done: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trigger: LegacyTrigger,
    #[serde(default)]
    pub previous_pipeline_build: Option<LegacyRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stages: Vec<LegacyStage>,
}

/// Any nested legacy object of which only the identity matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyTrigger {
    #[serde(default, deserialize_with = "null_as_default")]
    pub scheduled_trigger: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub manual_trigger: bool,
    #[serde(default)]
    pub triggered_by: Option<LegacyRef>,
    #[serde(default)]
    pub parent_pipeline_build: Option<LegacyRef>,
    #[serde(default)]
    pub vcs_branch: Option<String>,
    #[serde(default)]
    pub vcs_hash: Option<String>,
    #[serde(default)]
    pub vcs_author: Option<String>,
}

/// Stage header as declared by the pipeline at build time.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyStage {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Treats an explicit JSON `null` like a missing key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a legacy timestamp.
///
/// Snapshots were written with RFC 3339 timestamps; rows touched by SQL
/// carry the Postgres text form instead. The zero time written for builds
/// that never started, and anything unparsable, yield `None`.
pub fn parse_legacy_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|t| t.and_utc())
        })
        .ok()?;

    (parsed.year() > 1).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_rfc3339_timestamps() {
        let t = parse_legacy_time("2016-11-08T14:03:27.123456789+01:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2016-11-08T13:03:27.123456789+00:00");
    }

    #[test]
    fn parses_postgres_text_timestamps() {
        let t = parse_legacy_time("2016-11-08 14:03:27.5+01").unwrap();
        assert_eq!(t.timestamp(), 1_478_610_207);
        assert!(parse_legacy_time("2016-11-08 14:03:27").is_some());
    }

    #[test]
    fn zero_and_garbage_timestamps_are_absent() {
        assert_eq!(parse_legacy_time("0001-01-01T00:00:00Z"), None);
        assert_eq!(parse_legacy_time("t0"), None);
        assert_eq!(parse_legacy_time(""), None);
    }

    #[test]
    fn skeleton_tolerates_nulls_and_missing_keys() {
        let skeleton: BuildSkeleton = serde_json::from_str(
            r#"{"id": 7, "pipeline": {"id": 3}, "status": null, "trigger": null, "stages": null}"#,
        )
        .unwrap();

        assert_eq!(skeleton.id, 7);
        assert_eq!(skeleton.pipeline.id, 3);
        assert_eq!(skeleton.application.id, 0);
        assert!(skeleton.status.is_empty());
        assert!(!skeleton.trigger.manual_trigger);
        assert!(skeleton.stages.is_empty());
    }

    #[test]
    fn group_display_marks_missing_branch() {
        let group = HistoryGroup {
            application_id: 1,
            pipeline_id: 2,
            environment_id: 3,
            branch: None,
        };
        assert_eq!(group.to_string(), "app=1 pip=2 env=3 branch=<none>");
    }
}

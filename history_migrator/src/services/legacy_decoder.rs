//! Legacy snapshot decoding: typed skeleton plus the untyped document.
//!
//! The snapshot is parsed once into a [`serde_json::Value`]. Identity fields
//! are checked explicitly, the stable scalars are projected into a
//! [`BuildSkeleton`], and the whole tree is kept for the reconstructor.

use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::models::legacy::BuildSkeleton;

#[derive(Debug, Clone)]
pub struct LegacyRecord {
    pub skeleton: BuildSkeleton,
    pub tree: Value,
}

/// Shape of the top-level `stages` key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StagesField<'a> {
    Missing,
    Null,
    Entries(&'a [Value]),
}

impl LegacyRecord {
    pub fn stages(&self) -> StagesField<'_> {
        match self.tree.get("stages") {
            None => StagesField::Missing,
            Some(Value::Array(entries)) => StagesField::Entries(entries),
            // Anything else was rejected by `decode`.
            Some(_) => StagesField::Null,
        }
    }
}

pub fn decode(raw: &str) -> Result<LegacyRecord, DecodeError> {
    let tree: Value = serde_json::from_str(raw).map_err(DecodeError::Json)?;
    let Some(object) = tree.as_object() else {
        return Err(DecodeError::NotAnObject);
    };

    require_id(object.get("id"), "id")?;
    require_id(object.get("pipeline").and_then(|p| p.get("id")), "pipeline.id")?;

    match object.get("stages") {
        None | Some(Value::Null) | Some(Value::Array(_)) => {}
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "stages",
                expected: "a list or null",
            })
        }
    }

    let skeleton = BuildSkeleton::deserialize(&tree).map_err(DecodeError::Skeleton)?;

    Ok(LegacyRecord { skeleton, tree })
}

fn require_id(value: Option<&Value>, field: &'static str) -> Result<i64, DecodeError> {
    match value {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(v) => v.as_i64().ok_or(DecodeError::InvalidField {
            field,
            expected: "an integer",
        }),
    }
}

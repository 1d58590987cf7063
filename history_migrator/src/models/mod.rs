//! Pipeline history data models — legacy snapshot projections and the
//! normalized build they are migrated into.

pub mod build;
pub mod legacy;

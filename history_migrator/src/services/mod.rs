//! Pipeline history migration services.

pub mod build_reconstructor;
pub mod build_service;
pub mod history_service;
pub mod legacy_decoder;
pub mod migration_service;

//! Umbrella crate: re-exports the workspace services for integration tests.

pub use common;
pub use coordinator;
pub use face_service;
pub use telemetry;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod state;

pub use config::FaceServiceConfig;
pub use error::PipelineError;
pub use state::FaceServiceState;

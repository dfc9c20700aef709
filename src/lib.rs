pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use api::error::{ErrorKind, WorkflowError};
pub use config::WorkflowConfig;
pub use models::{Step, UploadFile, UploadStep};
pub use services::controller::{AnalysisOutcome, UploadOutcome, UploadWorkflowController};
pub use services::renderer::{ConsoleRenderer, EffectSink, RecordingSink, TracingSink};
pub use services::transport::{HttpTransport, Transport, TransportResponse};
pub use services::workflow_state::{Effect, Phase, WorkflowState};

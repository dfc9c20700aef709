pub mod controller;
pub mod progress;
pub mod renderer;
pub mod transport;
pub mod workflow_state;

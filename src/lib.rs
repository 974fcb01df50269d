pub mod anthropic;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod persistence;
pub mod quota;
pub mod recover;
pub mod server;
pub mod stages;
pub mod telemetry;
pub mod ui;

pub use error::RoadmapperError;

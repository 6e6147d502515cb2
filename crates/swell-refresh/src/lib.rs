//! Refresh pipeline and HTTP trigger surface for SwellSync.

pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod trigger;

pub use error::TriggerError;
pub use orchestrator::{RefreshOrchestrator, RunSummary};
pub use scheduler::spawn_scheduler;
pub use trigger::{authorize, routes, serve, SpotForecastResponse, StatsResponse, TriggerState};

//! Monte Carlo engine for parametric insurance on a simulated asset price.
//!
//! Paths are generated under daily geometric diffusion (optionally with
//! jumps), a binary payout rule is applied to every outcome, and the trials
//! are aggregated into risk metrics with and without the contract. Runs are
//! batched, retried, cancelable and pausable at batch boundaries.

pub mod config;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod math;
pub mod models;
pub mod risk;
pub mod state;

pub use config::{AppConfig, EngineConfig};
pub use controller::{ProgressReporter, SimulationController};
pub use engine::batch::{run_batch, BatchOutcome, BatchRequest, BatchRunner, PathBatchExecutor};
pub use engine::orchestrator::{
    optimize_parameters, optimize_parameters_with, run_simulation, validate_result, Orchestrator,
};
pub use engine::signal::RunSignal;
pub use engine::ProgressSink;
pub use errors::{SimResult, SimulationError};
pub use models::jump_diffusion::{simulate_path, PathSimulator};
pub use models::payout::evaluate_payout;
pub use risk::metrics::compute_risk_metrics;
pub use state::{
    BatchResult, ControllerStatus, JumpParameters, ProgressInfo, RiskMetrics, RunPhase,
    SimulationParameters, SimulationResult, SimulationStatistics, StatusEvent, StatusKind,
};

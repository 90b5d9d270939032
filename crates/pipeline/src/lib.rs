//! Orchestration layer: runs jobs through the seven-phase pipeline.
//!
//! `PhaseEngine` owns one job's execution: execute, gate, retry, fall back,
//! pause for human feedback, checkpoint. `Coordinator` sits in front of it
//! with admission control, priority queues, a worker pool, adaptive
//! concurrency, and the background loops (resource sampling, health
//! classification, retention sweeps).

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod resources;
pub mod state_machine;

pub use config::{CoordinatorConfig, EngineConfig};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use engine::{CancelToken, PhaseEngine, PipelineOutcome, PipelineResult};
pub use error::{PipelineError, Result};
pub use executor::{
    fallback_payload, ExecutorRegistry, PhaseContext, PhaseExecutor, PhaseOutput,
};
pub use resources::{
    CircuitBreaker, FixedMonitor, HealthStatus, ResourceMonitor, ResourceSample,
};
pub use state_machine::{JobStateMachine, PhaseStateMachine};

//! Training infrastructure for cycle-consistent adversarial translation
//!
//! This module owns the training side of the crate: the replay buffer, the
//! adversarial loss functors, the per-branch optimizers with their decay
//! schedules, the checkpoint layer, the frozen-export layer, and the
//! orchestrator that ties them together.
//!
//! # Main Components
//!
//! - **ReplayBuffer**: bounded pool of previously generated fakes feeding the
//!   discriminators
//! - **AdversarialObjective**: GAN/LSGAN/WGAN loss functors over a pluggable
//!   generator/discriminator pair
//! - **Optimizers**: per-branch Adam with a shared two-phase decay schedule
//! - **CycleOrchestrator**: the training state machine
//! - **Checkpoints/Export**: step-numbered state snapshots and frozen
//!   four-port inference artifacts

pub mod buffer;
pub mod checkpoints;
pub mod export;
pub mod objective;
pub mod optimizers;
pub mod orchestrator;

// Tests module
#[cfg(test)]
pub mod tests;

// Re-exports
pub use buffer::ReplayBuffer;
pub use checkpoints::{allocate_run_dir, CheckpointInfo, CheckpointManager, Manifest};
pub use export::{
    export_dir, export_directions, export_from_checkpoint, ArtifactManifest, Direction,
    FrozenOutputs, FrozenTranslator,
};
pub use objective::{AdversarialObjective, GanVariant, SelfRegTransform};
pub use orchestrator::{
    build_objectives, cycle_consistency_loss, CycleOrchestrator, StepLosses, TrainingReport,
    TrainingState, TrainingStatus,
};
pub use optimizers::{AdamOptimizer, DecaySchedule, LambdaSchedule};

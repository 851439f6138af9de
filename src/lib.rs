//! cygan - cycle-consistent adversarial domain translation in Rust
//!
//! This crate provides the training orchestrator for bidirectional
//! domain-translation experiments: a pair of pluggable generator and
//! discriminator networks is wired into a cycle-consistent adversarial
//! training graph with replay-buffered discriminator feeds, decaying
//! learning-rate and cycle-lambda schedules, periodic checkpointing with
//! resume, and export to frozen four-port inference artifacts.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod models;
pub mod training;

// Re-exports
pub use config::{GanType, TrainingConfig};
pub use context::Context;
pub use data::{BinaryFeeder, DataFeeder, InMemoryFeeder};
pub use error::{Error, Result};
pub use models::{
    builtin_registry, ArchitectureFactory, ModelBundle, ModelRegistry, Network, Normalizer,
};
pub use training::{
    AdversarialObjective, CycleOrchestrator, FrozenTranslator, GanVariant, ReplayBuffer,
    TrainingReport, TrainingStatus,
};

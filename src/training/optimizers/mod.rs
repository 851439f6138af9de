//! Per-branch optimizers and decay schedules
//!
//! Each branch of the cycle (two generators, two discriminators) gets its own
//! [`AdamOptimizer`] paired with a [`DecaySchedule`]; all four schedules share
//! the orchestrator's global step.

pub mod adam;
pub mod schedule;

pub use adam::AdamOptimizer;
pub use schedule::{DecaySchedule, LambdaSchedule};

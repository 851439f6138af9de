//! Test fixtures for training scenarios

use std::path::Path;

use candle_core::{Tensor, Var};

use crate::config::{ModelConfig, TrainingConfig};
use crate::context::Context;
use crate::data::InMemoryFeeder;
use crate::error::{Error, Result};
use crate::models::Network;

/// Identity transform with no trainable parameters.
pub struct IdentityNet;

impl Network for IdentityNet {
    fn name(&self) -> &str {
        "identity"
    }

    fn transform(&self, batch: &Tensor) -> Result<Tensor> {
        Ok(batch.clone())
    }

    fn trainable_variables(&self) -> Vec<(String, Var)> {
        Vec::new()
    }
}

/// A tiny training config over two 4-dimensional domains.
///
/// Fast enough to run a handful of real optimizer steps on CPU; checkpoint
/// and log cadences are shrunk to exercise the periodic paths.
pub fn tiny_config(checkpoints_root: &Path, steps: usize) -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.model = ModelConfig {
        x_shape: vec![4],
        y_shape: vec![4],
        hidden_dims: vec![8],
        ..ModelConfig::default()
    };
    config.schedule.steps = steps;
    config.schedule.learning_rate = 1e-3;
    config.runtime.batch_size = 2;
    config.runtime.log_interval = 1;
    config.history.pool_size = 4;
    config.checkpointing.checkpoints_root = checkpoints_root.to_path_buf();
    config.checkpointing.save_interval = 2;
    config.checkpointing.long_term_interval = 4;
    config.checkpointing.keep_limit = 16;
    config.checkpointing.export_final = false;
    config
}

/// Cycling feeder producing 4-dimensional samples around a base value.
pub fn tiny_feeder(base: f32, batch_size: usize, cycle: bool) -> InMemoryFeeder {
    let samples = (0..8)
        .map(|i| {
            let v = base + i as f32 * 0.1;
            Tensor::new(&[v, v + 0.01, v + 0.02, v + 0.03], &candle_core::Device::Cpu).unwrap()
        })
        .collect();
    InMemoryFeeder::new(samples, batch_size, cycle, 0).unwrap()
}

/// Feeder wrapper that fails with a data error after a fixed number of
/// batches, simulating a mid-training interruption.
pub struct FailingFeeder {
    inner: InMemoryFeeder,
    remaining: usize,
}

impl FailingFeeder {
    pub fn new(inner: InMemoryFeeder, batches_before_failure: usize) -> Self {
        Self {
            inner,
            remaining: batches_before_failure,
        }
    }
}

impl crate::data::DataFeeder for FailingFeeder {
    fn next_batch(&mut self) -> Result<Option<Tensor>> {
        if self.remaining == 0 {
            return Err(Error::data("simulated feed failure"));
        }
        self.remaining -= 1;
        self.inner.next_batch()
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn sample_shape(&self) -> &[usize] {
        self.inner.sample_shape()
    }
}

/// CPU context shared by the training tests.
pub fn ctx() -> Context {
    Context::cpu()
}

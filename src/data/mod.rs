//! Data feeders
//!
//! The orchestrator consumes batches through the blocking [`DataFeeder`]
//! seam. A feeder yields training-unit tensors of a fixed sample shape;
//! `Ok(None)` signals a clean end of stream in bounded mode.

pub mod binary;

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};

pub use binary::BinaryFeeder;

/// Blocking batch source for one domain.
pub trait DataFeeder: Send {
    /// Next batch of shape `[batch_size, sample_shape...]`, or `None` at end
    /// of stream.
    fn next_batch(&mut self) -> Result<Option<Tensor>>;

    /// Batch size this feeder was configured with.
    fn batch_size(&self) -> usize;

    /// Sample shape (without the batch dimension).
    fn sample_shape(&self) -> &[usize];
}

/// Feeder over a preloaded set of samples.
///
/// Cycles indefinitely by default; in bounded mode it makes a single shuffled
/// pass and then reports end of stream.
pub struct InMemoryFeeder {
    samples: Vec<Tensor>,
    sample_shape: Vec<usize>,
    batch_size: usize,
    cycle: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl InMemoryFeeder {
    /// Create a feeder from individual samples (all of one shape).
    pub fn new(samples: Vec<Tensor>, batch_size: usize, cycle: bool, seed: u64) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::data("in-memory feeder needs at least one sample"));
        }
        if batch_size == 0 {
            return Err(Error::data("batch size must be > 0"));
        }
        let sample_shape = samples[0].dims().to_vec();
        for sample in &samples[1..] {
            if sample.dims() != sample_shape.as_slice() {
                return Err(Error::shape(format!(
                    "inconsistent sample shapes: {:?} vs {:?}",
                    sample.dims(),
                    sample_shape
                )));
            }
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);
        Ok(Self {
            samples,
            sample_shape,
            batch_size,
            cycle,
            order,
            cursor: 0,
            rng,
        })
    }

    /// Create a feeder from a stacked tensor of shape `[n, sample_shape...]`.
    pub fn from_batched(data: &Tensor, batch_size: usize, cycle: bool, seed: u64) -> Result<Self> {
        let n = data.dim(0)?;
        let mut samples = Vec::with_capacity(n);
        for i in 0..n {
            samples.push(data.get(i)?);
        }
        Self::new(samples, batch_size, cycle, seed)
    }

    fn reshuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }
}

impl DataFeeder for InMemoryFeeder {
    fn next_batch(&mut self) -> Result<Option<Tensor>> {
        let mut rows = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            if self.cursor >= self.order.len() {
                if !self.cycle {
                    return Ok(None);
                }
                self.reshuffle();
            }
            rows.push(self.samples[self.order[self.cursor]].clone());
            self.cursor += 1;
        }
        Ok(Some(Tensor::stack(&rows, 0)?))
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn sample_shape(&self) -> &[usize] {
        &self.sample_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar_samples(values: &[f32]) -> Vec<Tensor> {
        values
            .iter()
            .map(|v| Tensor::new(&[*v], &Device::Cpu).unwrap())
            .collect()
    }

    #[test]
    fn cycling_feeder_never_ends() {
        let mut feeder =
            InMemoryFeeder::new(scalar_samples(&[1.0, 2.0, 3.0]), 2, true, 0).unwrap();
        for _ in 0..10 {
            let batch = feeder.next_batch().unwrap().unwrap();
            assert_eq!(batch.dims(), &[2, 1]);
        }
    }

    #[test]
    fn bounded_feeder_signals_end_of_stream() {
        let mut feeder =
            InMemoryFeeder::new(scalar_samples(&[1.0, 2.0, 3.0, 4.0]), 2, false, 0).unwrap();
        assert!(feeder.next_batch().unwrap().is_some());
        assert!(feeder.next_batch().unwrap().is_some());
        assert!(feeder.next_batch().unwrap().is_none());
    }

    #[test]
    fn rejects_mixed_shapes() {
        let samples = vec![
            Tensor::new(&[1f32], &Device::Cpu).unwrap(),
            Tensor::new(&[1f32, 2f32], &Device::Cpu).unwrap(),
        ];
        assert!(InMemoryFeeder::new(samples, 1, true, 0).is_err());
    }
}

//! Memory-mapped binary record feeder
//!
//! Reads a flat little-endian `f32` record file of fixed sample shape — the
//! on-disk analogue of the serialized record streams the upstream dataset
//! tooling produces. Records are shuffled per pass; normalization into
//! training units happens at read time.

use std::fs::File;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::models::Normalizer;

use super::DataFeeder;

/// Feeder over a memory-mapped file of fixed-shape `f32` records.
#[derive(Debug)]
pub struct BinaryFeeder {
    path: PathBuf,
    mmap: Mmap,
    ctx: Context,
    sample_shape: Vec<usize>,
    sample_len: usize,
    num_records: usize,
    batch_size: usize,
    normalizer: Normalizer,
    cycle: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl BinaryFeeder {
    /// Open a record file, validating that its length is a whole number of
    /// records of the given sample shape.
    pub fn open(
        ctx: &Context,
        path: impl AsRef<Path>,
        sample_shape: &[usize],
        batch_size: usize,
        normalizer: Normalizer,
        cycle: bool,
        seed: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Read-only mapping of an immutable dataset file.
        let mmap = unsafe { Mmap::map(&file)? };

        let sample_len: usize = sample_shape.iter().product();
        if sample_len == 0 {
            return Err(Error::data("sample shape must be non-empty"));
        }
        let record_bytes = sample_len * std::mem::size_of::<f32>();
        if mmap.len() == 0 || mmap.len() % record_bytes != 0 {
            return Err(Error::data(format!(
                "{} has {} bytes, not a whole number of {}-byte records",
                path.display(),
                mmap.len(),
                record_bytes
            )));
        }
        let num_records = mmap.len() / record_bytes;
        if num_records < batch_size {
            return Err(Error::data(format!(
                "{} holds {} records, fewer than one batch of {}",
                path.display(),
                num_records,
                batch_size
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..num_records).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            path,
            mmap,
            ctx: ctx.clone(),
            sample_shape: sample_shape.to_vec(),
            sample_len,
            num_records,
            batch_size,
            normalizer,
            cycle,
            order,
            cursor: 0,
            rng,
        })
    }

    /// Number of records in the file.
    pub fn len(&self) -> usize {
        self.num_records
    }

    /// Whether the file holds no records.
    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_record(&self, index: usize) -> Vec<f32> {
        let record_bytes = self.sample_len * std::mem::size_of::<f32>();
        let start = index * record_bytes;
        self.mmap[start..start + record_bytes]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

impl DataFeeder for BinaryFeeder {
    fn next_batch(&mut self) -> Result<Option<Tensor>> {
        let mut values = Vec::with_capacity(self.batch_size * self.sample_len);
        for _ in 0..self.batch_size {
            if self.cursor >= self.order.len() {
                if !self.cycle {
                    return Ok(None);
                }
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            values.extend(self.read_record(self.order[self.cursor]));
            self.cursor += 1;
        }

        let mut shape = Vec::with_capacity(self.sample_shape.len() + 1);
        shape.push(self.batch_size);
        shape.extend_from_slice(&self.sample_shape);
        let raw = Tensor::from_vec(values, shape, self.ctx.device())?;
        Ok(Some(self.normalizer.normalize(&raw)?))
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
    use std::io::Write;

    fn write_records(dir: &tempfile::TempDir, name: &str, records: &[&[f32]]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for record in records {
            for v in *record {
                file.write_all(&v.to_le_bytes()).unwrap();
            }
        }
        path
    }

    #[test]
    fn reads_batches_of_configured_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_records(
            &dir,
            "x.bin",
            &[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0], &[7.0, 8.0]],
        );
        let ctx = Context::cpu();
        let mut feeder =
            BinaryFeeder::open(&ctx, &path, &[2], 2, Normalizer::identity(), true, 0).unwrap();
        assert_eq!(feeder.len(), 4);
        let batch = feeder.next_batch().unwrap().unwrap();
        assert_eq!(batch.dims(), &[2, 2]);
    }

    #[test]
    fn bounded_pass_ends_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_records(&dir, "x.bin", &[&[1.0], &[2.0], &[3.0]]);
        let ctx = Context::cpu();
        let mut feeder =
            BinaryFeeder::open(&ctx, &path, &[1], 1, Normalizer::identity(), false, 0).unwrap();
        for _ in 0..3 {
            assert!(feeder.next_batch().unwrap().is_some());
        }
        assert!(feeder.next_batch().unwrap().is_none());
    }

    #[test]
    fn rejects_ragged_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, [0u8; 10]).unwrap();
        let ctx = Context::cpu();
        let err =
            BinaryFeeder::open(&ctx, &path, &[2], 1, Normalizer::identity(), true, 0).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn normalization_applies_at_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_records(&dir, "x.bin", &[&[127.5]]);
        let ctx = Context::cpu();
        let norm = Normalizer::new(1.0 / 127.5, -1.0);
        let mut feeder = BinaryFeeder::open(&ctx, &path, &[1], 1, norm, true, 0).unwrap();
        let batch = feeder.next_batch().unwrap().unwrap();
        let v = batch.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0];
        assert!((v - 0.0).abs() < 1e-6);
    }
}

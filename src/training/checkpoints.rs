//! Checkpoint persistence for training runs
//!
//! Layout of `<checkpoints_root>/<run_id>/`:
//!
//! - `model-<step>.safetensors` — network parameters and optimizer moments
//! - `model-long-term-<step>.safetensors` — never-pruned lineage
//! - `manifest.json` — latest step and checkpoint inventory
//! - `config.json` — captured copy of the run configuration
//!
//! A save is atomic from the orchestrator's perspective: tensors go to a
//! temporary file that is renamed into place, and the manifest is only
//! rewritten afterwards, so a failed save leaves the previous checkpoint
//! valid.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};

const MANIFEST_FILE: &str = "manifest.json";
const CONFIG_FILE: &str = "config.json";

/// Checkpoint inventory for one run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Step of the most recent checkpoint
    pub latest_step: usize,
    /// File name of the most recent checkpoint
    pub latest_file: String,
    /// Steps of retained regular checkpoints, oldest first
    pub checkpoints: Vec<usize>,
    /// Steps of long-term checkpoints (never pruned)
    pub long_term: Vec<usize>,
    /// Time of the last manifest update
    pub updated_at: DateTime<Utc>,
}

/// Step and file of a restorable checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Global step the checkpoint was taken at
    pub step: usize,
    /// Path of the tensor file
    pub path: PathBuf,
}

/// Saves and restores full training state under one run directory.
pub struct CheckpointManager {
    run_dir: PathBuf,
    keep_limit: usize,
}

impl CheckpointManager {
    /// Create a manager for a run directory, creating it if needed.
    pub fn new(run_dir: impl Into<PathBuf>, keep_limit: usize) -> Result<Self> {
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir)?;
        Ok(Self {
            run_dir,
            keep_limit: keep_limit.max(1),
        })
    }

    /// The run directory this manager owns.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Capture the run configuration next to the checkpoints, once.
    pub fn write_config_once(&self, config: &TrainingConfig) -> Result<()> {
        let path = self.run_dir.join(CONFIG_FILE);
        if path.exists() {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(config)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read back the captured run configuration.
    pub fn read_config(&self) -> Result<TrainingConfig> {
        let path = self.run_dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::checkpoint(format!("missing run config {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist a full state snapshot at `step`.
    ///
    /// `long_term` additionally writes the never-pruned lineage file. Regular
    /// checkpoints beyond the retention limit are deleted oldest-first.
    pub fn save(
        &self,
        step: usize,
        tensors: &HashMap<String, Tensor>,
        long_term: bool,
    ) -> Result<PathBuf> {
        let file_name = format!("model-{step}.safetensors");
        let path = self.write_atomic(&file_name, tensors)?;

        if long_term {
            let lt_name = format!("model-long-term-{step}.safetensors");
            self.write_atomic(&lt_name, tensors)?;
        }

        let mut manifest = self.read_manifest()?.unwrap_or_else(|| Manifest {
            latest_step: step,
            latest_file: file_name.clone(),
            checkpoints: Vec::new(),
            long_term: Vec::new(),
            updated_at: Utc::now(),
        });
        manifest.latest_step = step;
        manifest.latest_file = file_name;
        if !manifest.checkpoints.contains(&step) {
            manifest.checkpoints.push(step);
        }
        if long_term && !manifest.long_term.contains(&step) {
            manifest.long_term.push(step);
        }
        manifest.updated_at = Utc::now();

        while manifest.checkpoints.len() > self.keep_limit {
            let oldest = manifest.checkpoints.remove(0);
            let stale = self.run_dir.join(format!("model-{oldest}.safetensors"));
            if let Err(e) = fs::remove_file(&stale) {
                warn!("Failed to prune checkpoint {}: {}", stale.display(), e);
            }
        }

        self.write_manifest(&manifest)?;
        info!("Checkpoint saved at step {} in {}", step, path.display());
        Ok(path)
    }

    /// The latest restorable checkpoint, if any.
    pub fn latest(&self) -> Result<Option<CheckpointInfo>> {
        let Some(manifest) = self.read_manifest()? else {
            return Ok(None);
        };
        let path = self.run_dir.join(&manifest.latest_file);
        if !path.exists() {
            return Err(Error::checkpoint(format!(
                "manifest points at missing file {}",
                path.display()
            )));
        }
        Ok(Some(CheckpointInfo {
            step: manifest.latest_step,
            path,
        }))
    }

    /// Load the tensor map of a checkpoint.
    pub fn load(&self, info: &CheckpointInfo, device: &Device) -> Result<HashMap<String, Tensor>> {
        Ok(candle_core::safetensors::load(&info.path, device)?)
    }

    fn write_atomic(&self, file_name: &str, tensors: &HashMap<String, Tensor>) -> Result<PathBuf> {
        let path = self.run_dir.join(file_name);
        let tmp = self.run_dir.join(format!("{file_name}.tmp"));
        candle_core::safetensors::save(tensors, &tmp)
            .map_err(|e| Error::checkpoint(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    fn read_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.run_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.run_dir.join(MANIFEST_FILE);
        let tmp = self.run_dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(manifest)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Allocate a fresh, uniquely named run directory under the checkpoints
/// root: a timestamp plus a numeric suffix incremented on collision.
pub fn allocate_run_dir(checkpoints_root: &Path) -> Result<(String, PathBuf)> {
    let stamp = chrono::Local::now().format("%Y-%m-%d--%H-%M");
    let mut suffix = 0;
    loop {
        let name = format!("{stamp}-{suffix}");
        let candidate = checkpoints_root.join(&name);
        if !candidate.exists() {
            fs::create_dir_all(&candidate)?;
            return Ok((name, candidate));
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensors(value: f32) -> HashMap<String, Tensor> {
        let mut map = HashMap::new();
        map.insert(
            "model/w".to_string(),
            Tensor::new(&[value, value], &Device::Cpu).unwrap(),
        );
        map
    }

    #[test]
    fn save_then_latest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"), 5).unwrap();
        manager.save(3000, &tensors(1.0), false).unwrap();

        let info = manager.latest().unwrap().unwrap();
        assert_eq!(info.step, 3000);
        let loaded = manager.load(&info, &Device::Cpu).unwrap();
        let values = loaded["model/w"].to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 1.0]);
    }

    #[test]
    fn empty_run_dir_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"), 5).unwrap();
        assert!(manager.latest().unwrap().is_none());
    }

    #[test]
    fn pruning_keeps_long_term_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"), 2).unwrap();
        manager.save(100, &tensors(1.0), true).unwrap();
        manager.save(200, &tensors(2.0), false).unwrap();
        manager.save(300, &tensors(3.0), false).unwrap();

        // Step 100's regular file was pruned, the long-term copy was not.
        assert!(!dir.path().join("run/model-100.safetensors").exists());
        assert!(dir.path().join("run/model-long-term-100.safetensors").exists());
        assert!(dir.path().join("run/model-300.safetensors").exists());
        assert_eq!(manager.latest().unwrap().unwrap().step, 300);
    }

    #[test]
    fn config_written_once_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"), 5).unwrap();
        let config = TrainingConfig::default();
        manager.write_config_once(&config).unwrap();
        manager.write_config_once(&config).unwrap();
        let read = manager.read_config().unwrap();
        assert_eq!(read.schedule.steps, config.schedule.steps);
    }

    #[test]
    fn run_dir_allocation_increments_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let (name_a, path_a) = allocate_run_dir(dir.path()).unwrap();
        let (name_b, path_b) = allocate_run_dir(dir.path()).unwrap();
        assert_ne!(name_a, name_b);
        assert!(path_a.exists());
        assert!(path_b.exists());
        assert!(name_b.ends_with("-1") || name_b.ends_with("-0"));
    }
}

//! Checkpoint lifecycle tests

use std::collections::HashMap;

use candle_core::{Device, Tensor};

use crate::training::checkpoints::CheckpointManager;

fn snapshot(value: f32) -> HashMap<String, Tensor> {
    let mut map = HashMap::new();
    map.insert(
        "model/xy_gen/l0.weight".to_string(),
        Tensor::full(value, (4, 4), &Device::Cpu).unwrap(),
    );
    map.insert(
        "optim/xy_gen/t".to_string(),
        Tensor::new(&[value as u32], &Device::Cpu).unwrap(),
    );
    map
}

// A run checkpointed at 3000 and killed at 3742 resumes from 3000: the
// manager only ever reports persisted state.
#[test]
fn latest_reports_the_persisted_step_only() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let manager = CheckpointManager::new(&run_dir, 5).unwrap();
    manager.save(3000, &snapshot(1.0), false).unwrap();

    // Training continues to 3742 without another save, then the process
    // dies. A fresh manager over the same directory sees step 3000.
    let reopened = CheckpointManager::new(&run_dir, 5).unwrap();
    let info = reopened.latest().unwrap().unwrap();
    assert_eq!(info.step, 3000);

    let tensors = reopened.load(&info, &Device::Cpu).unwrap();
    let weights = tensors["model/xy_gen/l0.weight"]
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    assert!(weights.iter().all(|w| *w == 1.0));
}

#[test]
fn newer_save_supersedes_older() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path().join("run"), 5).unwrap();
    manager.save(1000, &snapshot(1.0), false).unwrap();
    manager.save(2000, &snapshot(2.0), false).unwrap();

    let info = manager.latest().unwrap().unwrap();
    assert_eq!(info.step, 2000);
    let tensors = manager.load(&info, &Device::Cpu).unwrap();
    let t = tensors["optim/xy_gen/t"].to_vec1::<u32>().unwrap();
    assert_eq!(t, vec![2]);
}

#[test]
fn saves_are_renamed_into_place() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let manager = CheckpointManager::new(&run_dir, 5).unwrap();
    manager.save(100, &snapshot(1.0), true).unwrap();
    manager.save(200, &snapshot(2.0), false).unwrap();

    // No temporary files survive a completed save, and the manifest points
    // at a file that exists.
    let leftovers: Vec<_> = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
    let info = manager.latest().unwrap().unwrap();
    assert!(info.path.exists());
}

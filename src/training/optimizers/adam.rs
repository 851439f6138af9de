//! Adam optimizer over a named variable list
//!
//! Moment tensors are keyed by variable name so they can be exported into and
//! restored from checkpoints alongside the parameters they belong to.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::error::{Error, Result};

use super::DecaySchedule;

/// Adaptive-moment optimizer for one branch of the cycle.
pub struct AdamOptimizer {
    name: String,
    vars: Vec<(String, Var)>,
    schedule: DecaySchedule,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step_count: usize,
    first_moment: HashMap<String, Tensor>,
    second_moment: HashMap<String, Tensor>,
}

impl AdamOptimizer {
    /// Create an optimizer over the given variables with its own schedule.
    pub fn new(
        name: impl Into<String>,
        vars: Vec<(String, Var)>,
        schedule: DecaySchedule,
        beta1: f64,
    ) -> Self {
        Self {
            name: name.into(),
            vars,
            schedule,
            beta1,
            beta2: 0.999,
            epsilon: 1e-8,
            step_count: 0,
            first_moment: HashMap::new(),
            second_moment: HashMap::new(),
        }
    }

    /// Optimizer name, used as the checkpoint tensor prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameter updates applied so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Effective learning rate at a global step.
    pub fn learning_rate(&self, global_step: usize) -> f64 {
        self.schedule.rate(global_step)
    }

    /// Apply one update from a gradient store at the given global step.
    ///
    /// Variables without a gradient in the store are left untouched.
    pub fn step(&mut self, grads: &GradStore, global_step: usize) -> Result<()> {
        let lr = self.schedule.rate(global_step);
        self.step_count += 1;
        let t = self.step_count as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for (name, var) in &self.vars {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };

            let m_prev = match self.first_moment.get(name) {
                Some(m) => m.clone(),
                None => grad.zeros_like()?,
            };
            let v_prev = match self.second_moment.get(name) {
                Some(v) => v.clone(),
                None => grad.zeros_like()?,
            };

            let m = ((m_prev * self.beta1)? + (grad * (1.0 - self.beta1))?)?;
            let v = ((v_prev * self.beta2)? + (grad.sqr()? * (1.0 - self.beta2))?)?;

            let m_hat = (&m / bias1)?;
            let v_hat = (&v / bias2)?;
            let denom = (v_hat.sqrt()? + self.epsilon)?;
            let update = (m_hat.div(&denom)? * lr)?;

            var.set(&(var.as_tensor() - update)?)?;

            self.first_moment.insert(name.clone(), m);
            self.second_moment.insert(name.clone(), v);
        }
        Ok(())
    }

    /// Export moment tensors and the update counter for checkpointing.
    ///
    /// Keys are relative: `m/<var>`, `v/<var>` and `t`.
    pub fn state_tensors(&self, device: &candle_core::Device) -> Result<Vec<(String, Tensor)>> {
        let mut out = Vec::with_capacity(self.first_moment.len() * 2 + 1);
        for (name, m) in &self.first_moment {
            out.push((format!("m/{name}"), m.clone()));
        }
        for (name, v) in &self.second_moment {
            out.push((format!("v/{name}"), v.clone()));
        }
        out.push(("t".to_string(), Tensor::new(&[self.step_count as u32], device)?));
        Ok(out)
    }

    /// Restore moment tensors and the update counter from checkpoint state.
    ///
    /// `state` maps relative keys (as produced by [`state_tensors`]) to
    /// tensors. Missing moments reset to zero at the next update.
    ///
    /// [`state_tensors`]: Self::state_tensors
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        for (name, _) in &self.vars {
            if let Some(m) = state.get(&format!("m/{name}")) {
                self.first_moment.insert(name.clone(), m.clone());
            }
            if let Some(v) = state.get(&format!("v/{name}")) {
                self.second_moment.insert(name.clone(), v.clone());
            }
        }
        if let Some(t) = state.get("t") {
            let counts = t.to_vec1::<u32>().map_err(|e| {
                Error::checkpoint(format!("malformed optimizer step counter: {e}"))
            })?;
            self.step_count = *counts.first().ok_or_else(|| {
                Error::checkpoint("empty optimizer step counter tensor")
            })? as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn quadratic_setup() -> (Var, AdamOptimizer) {
        let var = Var::from_tensor(&Tensor::new(&[4f32, -2f32], &Device::Cpu).unwrap()).unwrap();
        let opt = AdamOptimizer::new(
            "test",
            vec![("w".to_string(), var.clone())],
            DecaySchedule::new(0.1, 1000, 2000),
            0.9,
        );
        (var, opt)
    }

    #[test]
    fn minimizes_a_quadratic() {
        let (var, mut opt) = quadratic_setup();
        for step in 0..200 {
            let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
            let grads = loss.backward().unwrap();
            opt.step(&grads, step).unwrap();
        }
        let values = var.as_tensor().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < 0.5));
        assert_eq!(opt.step_count(), 200);
    }

    #[test]
    fn zero_rate_freezes_parameters() {
        let var = Var::from_tensor(&Tensor::new(&[1f32], &Device::Cpu).unwrap()).unwrap();
        let mut opt = AdamOptimizer::new(
            "test",
            vec![("w".to_string(), var.clone())],
            DecaySchedule::new(0.1, 0, 100),
            0.9,
        );
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        // At the final step the schedule is exactly zero.
        opt.step(&grads, 100).unwrap();
        let values = var.as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![1.0]);
    }

    #[test]
    fn state_roundtrip_preserves_step_count_and_moments() {
        let (var, mut opt) = quadratic_setup();
        for step in 0..5 {
            let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
            let grads = loss.backward().unwrap();
            opt.step(&grads, step).unwrap();
        }

        let device = Device::Cpu;
        let exported: HashMap<String, Tensor> =
            opt.state_tensors(&device).unwrap().into_iter().collect();

        let var2 = Var::from_tensor(var.as_tensor()).unwrap();
        let mut restored = AdamOptimizer::new(
            "test",
            vec![("w".to_string(), var2)],
            DecaySchedule::new(0.1, 1000, 2000),
            0.9,
        );
        restored.load_state(&exported).unwrap();
        assert_eq!(restored.step_count(), 5);
        assert!(restored.first_moment.contains_key("w"));
        assert!(restored.second_moment.contains_key("w"));
    }
}

//! Adversarial loss functors
//!
//! One [`AdversarialObjective`] binds a generator, a discriminator, the shape
//! contract between them, and the loss-weighting lambdas. The loss family is
//! a tagged variant rather than a class hierarchy: the Wasserstein
//! discriminator update has a different contract (it carries a gradient
//! penalty), so it lives behind its own entry point and the shared one
//! rejects it explicitly.

use std::sync::Arc;

use candle_core::{Tensor, Var};

use crate::error::{Error, Result};
use crate::models::Network;

/// Floor added before logarithms in the standard-GAN losses.
const LOG_EPSILON: f64 = 1e-12;

/// Feature transform applied to both operands of the self-regularization
/// distance.
pub type SelfRegTransform = Arc<dyn Fn(&Tensor, &Tensor) -> Result<(Tensor, Tensor)> + Send + Sync>;

/// Adversarial objective family with per-variant parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GanVariant {
    /// Saturating log-probability losses
    Standard,
    /// Least-squares losses against a smoothed real label
    LeastSquares {
        /// Target label for "real" (label smoothing below 1.0)
        real_label: f64,
    },
    /// Wasserstein critic losses with gradient penalty
    Wasserstein {
        /// Gradient-penalty lambda
        grad_lambda: f64,
        /// Penalize only norms exceeding 1
        one_sided: bool,
    },
}

/// One direction of the cycle: generator + discriminator + lambdas.
pub struct AdversarialObjective {
    name: String,
    generator: Arc<dyn Network>,
    discriminator: Arc<dyn Network>,
    in_shape: Vec<usize>,
    out_shape: Vec<usize>,
    variant: GanVariant,
    gen_lambda: f64,
    dis_lambda: f64,
    selfreg_lambda: f64,
    selfreg_transform: Option<SelfRegTransform>,
}

impl AdversarialObjective {
    /// Bind a generator/discriminator pair into an objective.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        generator: Arc<dyn Network>,
        discriminator: Arc<dyn Network>,
        in_shape: Vec<usize>,
        out_shape: Vec<usize>,
        variant: GanVariant,
        gen_lambda: f64,
        dis_lambda: f64,
        selfreg_lambda: f64,
        selfreg_transform: Option<SelfRegTransform>,
    ) -> Self {
        Self {
            name: name.into(),
            generator,
            discriminator,
            in_shape,
            out_shape,
            variant,
            gen_lambda,
            dis_lambda,
            selfreg_lambda,
            selfreg_transform,
        }
    }

    /// Objective name, e.g. `X-Y`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sample shape consumed by the generator.
    pub fn in_shape(&self) -> &[usize] {
        &self.in_shape
    }

    /// Sample shape produced by the generator.
    pub fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    /// The generator network.
    pub fn generator(&self) -> &Arc<dyn Network> {
        &self.generator
    }

    /// The discriminator network.
    pub fn discriminator(&self) -> &Arc<dyn Network> {
        &self.discriminator
    }

    /// The configured loss family.
    pub fn variant(&self) -> GanVariant {
        self.variant
    }

    /// Run the generator on a source batch.
    pub fn generate(&self, source: &Tensor) -> Result<Tensor> {
        self.generator.transform(source)
    }

    /// Generator adversarial loss on a real source batch.
    pub fn generator_loss(&self, source: &Tensor) -> Result<Tensor> {
        let scores = self.discriminator.transform(&self.generator.transform(source)?)?;
        let loss = match self.variant {
            GanVariant::Standard => safe_log(&scores)?.mean_all()?.neg()?,
            GanVariant::LeastSquares { real_label } => {
                scores.affine(1.0, -real_label)?.sqr()?.mean_all()?
            }
            GanVariant::Wasserstein { .. } => scores.mean_all()?.neg()?,
        };
        Ok((loss * self.gen_lambda)?)
    }

    /// Discriminator loss on real and (buffered) fake target batches.
    ///
    /// Rejected for the Wasserstein variant, whose update additionally needs
    /// the gradient penalty: use [`wasserstein_discriminator_loss`].
    ///
    /// [`wasserstein_discriminator_loss`]: Self::wasserstein_discriminator_loss
    pub fn discriminator_loss(&self, real: &Tensor, fake: &Tensor) -> Result<Tensor> {
        let loss = match self.variant {
            GanVariant::Standard => {
                let real_scores = self.discriminator.transform(real)?;
                let fake_scores = self.discriminator.transform(fake)?;
                let real_l = safe_log(&real_scores)?.mean_all()?.neg()?;
                let fake_l = safe_log(&fake_scores.affine(-1.0, 1.0)?)?.mean_all()?.neg()?;
                ((real_l + fake_l)? / 2.0)?
            }
            GanVariant::LeastSquares { real_label } => {
                let real_scores = self.discriminator.transform(real)?;
                let fake_scores = self.discriminator.transform(fake)?;
                let real_l = real_scores.affine(1.0, -real_label)?.sqr()?.mean_all()?;
                let fake_l = fake_scores.sqr()?.mean_all()?;
                ((real_l + fake_l)? / 2.0)?
            }
            GanVariant::Wasserstein { .. } => {
                return Err(Error::unsupported(
                    "the Wasserstein discriminator update requires the gradient penalty; \
                     call wasserstein_discriminator_loss instead",
                ));
            }
        };
        Ok((loss * self.dis_lambda)?)
    }

    /// Wasserstein discriminator loss including the gradient penalty.
    ///
    /// Only valid on the Wasserstein variant.
    pub fn wasserstein_discriminator_loss(&self, real: &Tensor, fake: &Tensor) -> Result<Tensor> {
        let GanVariant::Wasserstein { .. } = self.variant else {
            return Err(Error::unsupported(
                "wasserstein_discriminator_loss is only defined for the Wasserstein variant",
            ));
        };
        let real_scores = self.discriminator.transform(real)?;
        let fake_scores = self.discriminator.transform(fake)?;
        let critic = ((fake_scores.mean_all()? - real_scores.mean_all()?)? / 2.0)?;
        let penalty = self.gradient_penalty(real, fake)?;
        Ok(((critic * self.dis_lambda)? + penalty)?)
    }

    /// Gradient penalty on a random interpolation between real and fake.
    ///
    /// The penalty is `grad_lambda * (||g||_2 - 1)^2` where `g` is the
    /// gradient of the summed critic scores at the interpolated batch; the
    /// one-sided form only penalizes norms above 1.
    pub fn gradient_penalty(&self, real: &Tensor, fake: &Tensor) -> Result<Tensor> {
        let GanVariant::Wasserstein {
            grad_lambda,
            one_sided,
        } = self.variant
        else {
            return Err(Error::unsupported(
                "gradient penalty is only defined for the Wasserstein variant",
            ));
        };

        let batch = real.dim(0)?;
        let mut eps_shape = vec![batch];
        eps_shape.extend(std::iter::repeat(1).take(real.rank() - 1));
        let eps = Tensor::rand(0f32, 1f32, eps_shape, real.device())?;

        let mixed = (real.broadcast_mul(&eps)? + fake.broadcast_mul(&eps.affine(-1.0, 1.0)?)?)?;
        let probe = Var::from_tensor(&mixed.detach())?;
        let scores = self.discriminator.transform(probe.as_tensor())?;
        let grads = scores.sum_all()?.backward()?;
        let grad = grads
            .get(probe.as_tensor())
            .ok_or_else(|| Error::unsupported("discriminator is constant in its input"))?;

        let norm = grad.sqr()?.sum_all()?.sqrt()?;
        let mut deviation = norm.affine(1.0, -1.0)?;
        if one_sided {
            deviation = deviation.maximum(&deviation.zeros_like()?)?;
        }
        Ok((deviation.sqr()? * grad_lambda)?)
    }

    /// Self-regularization loss: weighted L1 distance between a source batch
    /// and its translation, under the optional feature transform.
    ///
    /// A zero lambda contributes a zero scalar without evaluating anything.
    pub fn self_regularization_loss(&self, source: &Tensor, generated: &Tensor) -> Result<Tensor> {
        if self.selfreg_lambda <= 0.0 {
            return Ok(Tensor::zeros(
                (),
                source.dtype(),
                source.device(),
            )?);
        }
        let (a, b) = match &self.selfreg_transform {
            Some(transform) => transform(source, generated)?,
            None => (source.clone(), generated.clone()),
        };
        let distance = (a - b)?.abs()?.mean_all()?;
        Ok((distance * self.selfreg_lambda)?)
    }
}

fn safe_log(t: &Tensor) -> Result<Tensor> {
    Ok((t + LOG_EPSILON)?.log()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use candle_core::{DType, Device};

    /// Identity transform with no parameters.
    struct IdentityNet;

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

    /// Linear critic `d(x) = sum(w * x)` with a fixed weight vector.
    struct LinearCritic {
        weight: Var,
    }

    impl LinearCritic {
        fn new(weights: &[f32]) -> Self {
            let weight = Var::from_tensor(&Tensor::new(weights, &Device::Cpu).unwrap()).unwrap();
            Self { weight }
        }
    }

    impl Network for LinearCritic {
        fn name(&self) -> &str {
            "linear-critic"
        }

        fn transform(&self, batch: &Tensor) -> Result<Tensor> {
            let weighted = batch.broadcast_mul(self.weight.as_tensor())?;
            Ok(weighted.sum_keepdim(1)?)
        }

        fn trainable_variables(&self) -> Vec<(String, Var)> {
            vec![("weight".to_string(), self.weight.clone())]
        }
    }

    /// Constant-score discriminator.
    struct ConstantDis {
        value: f64,
    }

    impl Network for ConstantDis {
        fn name(&self) -> &str {
            "constant"
        }

        fn transform(&self, batch: &Tensor) -> Result<Tensor> {
            let batch_size = batch.dim(0)?;
            Ok((Tensor::ones((batch_size, 1), DType::F32, batch.device())? * self.value)?)
        }

        fn trainable_variables(&self) -> Vec<(String, Var)> {
            Vec::new()
        }
    }

    fn objective(variant: GanVariant, dis: Arc<dyn Network>) -> AdversarialObjective {
        AdversarialObjective::new(
            "X-Y",
            Arc::new(IdentityNet),
            dis,
            vec![2],
            vec![2],
            variant,
            1.0,
            1.0,
            0.0,
            None,
        )
    }

    fn batch<const N: usize>(values: &[[f32; 2]; N]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn lsgan_losses_are_non_negative() {
        let obj = objective(
            GanVariant::LeastSquares { real_label: 0.9 },
            Arc::new(ConstantDis { value: 0.3 }),
        );
        let real = batch(&[[0.5, -0.5], [1.0, 0.0]]);
        let fake = batch(&[[0.1, 0.2], [-0.3, 0.4]]);
        assert!(scalar(&obj.generator_loss(&real).unwrap()) >= 0.0);
        assert!(scalar(&obj.discriminator_loss(&real, &fake).unwrap()) >= 0.0);
    }

    #[test]
    fn lsgan_perfect_discriminator_scores_zero_fake_loss() {
        let obj = objective(
            GanVariant::LeastSquares { real_label: 1.0 },
            Arc::new(ConstantDis { value: 0.0 }),
        );
        let real = batch(&[[0.0, 0.0]]);
        let fake = batch(&[[0.0, 0.0]]);
        // Real scored 0 against label 1 and fake scored 0: loss = (1 + 0)/2.
        let loss = scalar(&obj.discriminator_loss(&real, &fake).unwrap());
        assert!((loss - 0.5).abs() < 1e-6);
    }

    #[test]
    fn standard_gan_survives_zero_scores() {
        let obj = objective(GanVariant::Standard, Arc::new(ConstantDis { value: 0.0 }));
        let real = batch(&[[0.5, 0.5]]);
        let loss = scalar(&obj.generator_loss(&real).unwrap());
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn wasserstein_rejects_shared_discriminator_entry_point() {
        let obj = objective(
            GanVariant::Wasserstein {
                grad_lambda: 10.0,
                one_sided: false,
            },
            Arc::new(ConstantDis { value: 0.0 }),
        );
        let real = batch(&[[0.0, 0.0]]);
        let err = obj.discriminator_loss(&real, &real).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn non_wasserstein_rejects_penalty_entry_point() {
        let obj = objective(GanVariant::Standard, Arc::new(ConstantDis { value: 0.5 }));
        let real = batch(&[[0.0, 0.0]]);
        let err = obj.wasserstein_discriminator_loss(&real, &real).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn gradient_penalty_is_zero_at_unit_norm() {
        // A critic with unit weight vector has gradient [1, 0] at any point:
        // the norm is exactly 1 for a single-sample batch.
        let obj = objective(
            GanVariant::Wasserstein {
                grad_lambda: 10.0,
                one_sided: false,
            },
            Arc::new(LinearCritic::new(&[1.0, 0.0])),
        );
        let real = batch(&[[0.3, 0.7]]);
        let fake = batch(&[[-0.2, 0.1]]);
        let penalty = scalar(&obj.gradient_penalty(&real, &fake).unwrap());
        assert!(penalty.abs() < 1e-9);
    }

    #[test]
    fn gradient_penalty_is_positive_off_unit_norm() {
        let obj = objective(
            GanVariant::Wasserstein {
                grad_lambda: 10.0,
                one_sided: false,
            },
            Arc::new(LinearCritic::new(&[2.0, 0.0])),
        );
        let real = batch(&[[0.3, 0.7]]);
        let fake = batch(&[[-0.2, 0.1]]);
        // Gradient norm is 2 regardless of the interpolation point.
        let penalty = scalar(&obj.gradient_penalty(&real, &fake).unwrap());
        assert!((penalty - 10.0).abs() < 1e-4);
    }

    #[test]
    fn one_sided_penalty_ignores_small_norms() {
        let obj = objective(
            GanVariant::Wasserstein {
                grad_lambda: 10.0,
                one_sided: true,
            },
            Arc::new(LinearCritic::new(&[0.5, 0.0])),
        );
        let real = batch(&[[0.3, 0.7]]);
        let fake = batch(&[[-0.2, 0.1]]);
        let penalty = scalar(&obj.gradient_penalty(&real, &fake).unwrap());
        assert!(penalty.abs() < 1e-9);
    }

    #[test]
    fn selfreg_zero_lambda_short_circuits() {
        let obj = objective(GanVariant::Standard, Arc::new(ConstantDis { value: 0.5 }));
        let a = batch(&[[1.0, 2.0]]);
        let b = batch(&[[5.0, 6.0]]);
        assert_eq!(scalar(&obj.self_regularization_loss(&a, &b).unwrap()), 0.0);
    }

    #[test]
    fn selfreg_measures_weighted_l1() {
        let obj = AdversarialObjective::new(
            "X-Y",
            Arc::new(IdentityNet),
            Arc::new(ConstantDis { value: 0.5 }),
            vec![2],
            vec![2],
            GanVariant::Standard,
            1.0,
            1.0,
            2.0,
            None,
        );
        let a = batch(&[[1.0, 2.0]]);
        let b = batch(&[[2.0, 4.0]]);
        // mean(|1-2|, |2-4|) * 2 = 3
        let loss = scalar(&obj.self_regularization_loss(&a, &b).unwrap());
        assert!((loss - 3.0).abs() < 1e-6);
    }

    #[test]
    fn weight_loss_short_circuits_on_zero_lambda() {
        let ctx = Context::cpu();
        let critic = LinearCritic::new(&[3.0, 4.0]);
        let loss = crate::models::weight_loss(&critic, &ctx).unwrap();
        assert_eq!(scalar(&loss), 0.0);
    }
}

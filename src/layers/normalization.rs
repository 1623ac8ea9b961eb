/// Batch normalization with exponentially averaged running statistics
///
/// The learned scale/shift live in the network's trainable store; the running
/// mean/variance live in a separate statistics store so that no optimizer ever
/// sees them.
use candle_core::{bail, Result, Tensor, Var};
use candle_nn::{Init, VarBuilder};

/// Which statistics a normalization layer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Normalize with batch statistics and fold them into the running ones
    Train,
    /// Normalize with the running statistics, leaving them untouched
    Inference,
}

/// Per-channel batch normalization over `[batch, channels, height, width]`
pub struct BatchNorm {
    weight: Tensor,
    bias: Tensor,
    running_mean: Var,
    running_var: Var,
    momentum: f64,
    eps: f64,
}

impl BatchNorm {
    /// Create a batch-norm layer for `num_features` channels
    ///
    /// # Arguments
    /// * `momentum` - Decay of the running statistics (`running = m * running + (1 - m) * batch`)
    /// * `eps` - Added to the variance before the square root
    /// * `vb` - Builder for the learned scale/shift
    /// * `stats` - Builder for the running mean/variance
    pub fn new(
        num_features: usize,
        momentum: f64,
        eps: f64,
        vb: VarBuilder,
        stats: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(num_features, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(num_features, "bias", Init::Const(0.0))?;

        // Tensors handed out by a VarMap are variables, so these share storage
        // with the map and are persisted with it.
        let running_mean = Var::from_tensor(&stats.get_with_hints(
            num_features,
            "running_mean",
            Init::Const(0.0),
        )?)?;
        let running_var = Var::from_tensor(&stats.get_with_hints(
            num_features,
            "running_var",
            Init::Const(1.0),
        )?)?;

        Ok(Self {
            weight,
            bias,
            running_mean,
            running_var,
            momentum,
            eps,
        })
    }

    pub fn num_features(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn running_mean(&self) -> &Tensor {
        self.running_mean.as_tensor()
    }

    pub fn running_var(&self) -> &Tensor {
        self.running_var.as_tensor()
    }

    pub fn forward(&self, x: &Tensor, mode: Mode) -> Result<Tensor> {
        let channels = self.num_features();
        if x.rank() != 4 || x.dim(1)? != channels {
            bail!(
                "batch norm over {} channels expects [b, {}, h, w], got {:?}",
                channels,
                channels,
                x.dims()
            );
        }

        let (mean, var) = match mode {
            Mode::Train => {
                let mean = x.mean_keepdim((0, 2, 3))?;
                let var = x.broadcast_sub(&mean)?.sqr()?.mean_keepdim((0, 2, 3))?;
                self.update_running_stats(&mean, &var)?;
                (mean, var)
            }
            Mode::Inference => (
                self.running_mean.as_tensor().reshape((1, channels, 1, 1))?,
                self.running_var.as_tensor().reshape((1, channels, 1, 1))?,
            ),
        };

        let normalized = x
            .broadcast_sub(&mean)?
            .broadcast_div(&(var + self.eps)?.sqrt()?)?;

        normalized
            .broadcast_mul(&self.weight.reshape((1, channels, 1, 1))?)?
            .broadcast_add(&self.bias.reshape((1, channels, 1, 1))?)
    }

    fn update_running_stats(&self, mean: &Tensor, var: &Tensor) -> Result<()> {
        let mean = mean.detach().flatten_all()?;
        let var = var.detach().flatten_all()?;

        let new_mean = ((self.running_mean.as_tensor() * self.momentum)?
            + (mean * (1.0 - self.momentum))?)?;
        let new_var = ((self.running_var.as_tensor() * self.momentum)?
            + (var * (1.0 - self.momentum))?)?;

        self.running_mean.set(&new_mean)?;
        self.running_var.set(&new_var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(channels: usize) -> Result<(BatchNorm, VarMap, VarMap)> {
        let device = Device::Cpu;
        let params = VarMap::new();
        let stats = VarMap::new();
        let bn = BatchNorm::new(
            channels,
            0.9,
            1e-5,
            VarBuilder::from_varmap(&params, DType::F32, &device),
            VarBuilder::from_varmap(&stats, DType::F32, &device),
        )?;
        Ok((bn, params, stats))
    }

    #[test]
    fn test_train_mode_normalizes_per_channel() -> Result<()> {
        let (bn, _, _) = build(3)?;
        let x = (Tensor::randn(0f32, 1.0, (4, 3, 5, 5), &Device::Cpu)? * 3.0)?;
        let x = (x + 7.0)?;

        let y = bn.forward(&x, Mode::Train)?;
        let mean = y.mean_keepdim((0, 2, 3))?.flatten_all()?.to_vec1::<f32>()?;
        for m in mean {
            assert!(m.abs() < 1e-4, "channel mean should be ~0, got {}", m);
        }
        Ok(())
    }

    #[test]
    fn test_train_mode_updates_running_stats() -> Result<()> {
        let (bn, _, _) = build(2)?;
        let x = Tensor::full(5f32, (2, 2, 3, 3), &Device::Cpu)?;

        bn.forward(&x, Mode::Train)?;

        // 0.9 * 0 + 0.1 * 5
        let mean = bn.running_mean().to_vec1::<f32>()?;
        assert!(mean.iter().all(|m| (m - 0.5).abs() < 1e-6));
        // 0.9 * 1 + 0.1 * 0
        let var = bn.running_var().to_vec1::<f32>()?;
        assert!(var.iter().all(|v| (v - 0.9).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn test_inference_mode_leaves_stats_alone() -> Result<()> {
        let (bn, _, stats) = build(2)?;
        let x = Tensor::randn(0f32, 1.0, (2, 2, 4, 4), &Device::Cpu)?;

        let first = bn.forward(&x, Mode::Inference)?.flatten_all()?.to_vec1::<f32>()?;
        let second = bn.forward(&x, Mode::Inference)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(first, second);

        assert_eq!(bn.running_mean().to_vec1::<f32>()?, vec![0.0, 0.0]);
        assert_eq!(bn.running_var().to_vec1::<f32>()?, vec![1.0, 1.0]);
        assert_eq!(stats.all_vars().len(), 2);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_channel_count() -> Result<()> {
        let (bn, _, _) = build(4)?;
        let x = Tensor::zeros((1, 3, 2, 2), DType::F32, &Device::Cpu)?;
        assert!(bn.forward(&x, Mode::Train).is_err());
        Ok(())
    }
}

/// Dense layer and activation helpers shared by both networks
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Leaky rectifier: `max(x, leak * x)` for `0 <= leak < 1`
pub fn leaky_relu(x: &Tensor, leak: f64) -> Result<Tensor> {
    x.maximum(&(x * leak)?)
}

/// Fully connected layer
///
/// Weights are drawn from `N(0, stddev)`, biases start at zero.
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Create new Linear layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `stddev` - Standard deviation of the weight initializer
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        in_features: usize,
        out_features: usize,
        stddev: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: stddev,
            },
        )?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;

        Ok(Self { weight, bias })
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// `[batch, in_features]` -> `[batch, out_features]`
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        // weight is [out_features, in_features], so weight^T is [in_features, out_features]
        input.matmul(&self.weight.t()?)?.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_leaky_relu() -> Result<()> {
        let x = Tensor::new(&[-2.0f32, -0.5, 0.0, 3.0], &Device::Cpu)?;
        let y = leaky_relu(&x, 0.2)?.to_vec1::<f32>()?;
        let expected = [-0.4f32, -0.1, 0.0, 3.0];
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_linear_shapes_and_zero_bias() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let linear = Linear::new(12, 3, 0.02, vb)?;
        let x = Tensor::zeros((5, 12), DType::F32, &device)?;
        let y = linear.forward(&x)?;

        assert_eq!(y.dims(), &[5, 3]);
        // zero input only sees the bias, which starts at zero
        assert_eq!(y.abs()?.sum_all()?.to_scalar::<f32>()?, 0.0);
        assert_eq!(varmap.all_vars().len(), 2);
        Ok(())
    }
}

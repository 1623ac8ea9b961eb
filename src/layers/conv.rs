/// Stride-2 convolutions with "same" output sizing
///
/// Both layers work on `[batch, channels, height, width]`.
use candle_core::{bail, Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::utils::conv_out_size_same;

const STRIDE: usize = 2;

/// Strided convolution: `(h, w)` -> `(ceil(h / 2), ceil(w / 2))`
pub struct Conv2dSame {
    weight: Tensor,
    bias: Tensor,
    padding: usize,
}

impl Conv2dSame {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stddev: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel_size, kernel_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: stddev,
            },
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;

        Ok(Self {
            weight,
            bias,
            padding: kernel_size / 2,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = x.dims4()?;
        let y = x.conv2d(&self.weight, self.padding, STRIDE, 1, 1)?;

        let (_, _, out_h, out_w) = y.dims4()?;
        debug_assert_eq!(
            (out_h, out_w),
            (conv_out_size_same(h, STRIDE), conv_out_size_same(w, STRIDE))
        );

        y.broadcast_add(&self.bias.reshape((1, self.out_channels(), 1, 1))?)
    }
}

/// Transposed convolution pinned to an exact output size
///
/// The raw transposed convolution produces `2n + 1` rows for `n` input rows;
/// the result is trimmed to the configured `(height, width)`, which must be
/// `2n` or `2n - 1`. This keeps odd resolutions from drifting through the
/// doubling chain.
pub struct ConvTranspose2dSame {
    weight: Tensor,
    bias: Tensor,
    padding: usize,
    output_size: (usize, usize),
}

impl ConvTranspose2dSame {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        output_size: (usize, usize),
        stddev: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        if kernel_size < 3 || kernel_size % 2 == 0 {
            bail!("transposed convolution needs an odd kernel >= 3, got {kernel_size}");
        }

        // candle lays transposed-conv kernels out as [in, out, k, k]
        let weight = vb.get_with_hints(
            (in_channels, out_channels, kernel_size, kernel_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: stddev,
            },
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;

        Ok(Self {
            weight,
            bias,
            padding: kernel_size / 2 - 1,
            output_size,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn output_size(&self) -> (usize, usize) {
        self.output_size
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = x.dims4()?;
        let (target_h, target_w) = self.output_size;
        if conv_out_size_same(target_h, STRIDE) != h || conv_out_size_same(target_w, STRIDE) != w {
            bail!(
                "cannot upsample {}x{} to {}x{}",
                h,
                w,
                target_h,
                target_w
            );
        }

        // (n - 1) * 2 + k - 2 * (k / 2 - 1) = 2n + 1
        let y = x.conv_transpose2d(&self.weight, self.padding, 0, STRIDE, 1)?;
        let y = y.narrow(2, 1, target_h)?.narrow(3, 1, target_w)?;

        y.broadcast_add(&self.bias.reshape((1, self.out_channels(), 1, 1))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_conv_halves_with_ceil() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let conv = Conv2dSame::new(1, 4, 5, 0.02, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 1, 13, 10), &device)?;
        let y = conv.forward(&x)?;
        assert_eq!(y.dims(), &[2, 4, 7, 5]);
        Ok(())
    }

    #[test]
    fn test_transposed_conv_pins_odd_and_even_sizes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        // 7x6 input can become 13x12 (odd height, even width)
        let deconv = ConvTranspose2dSame::new(3, 2, 5, (13, 12), 0.02, vb.pp("a"))?;
        let x = Tensor::randn(0f32, 1.0, (1, 3, 7, 6), &device)?;
        assert_eq!(deconv.forward(&x)?.dims(), &[1, 2, 13, 12]);

        let deconv = ConvTranspose2dSame::new(3, 2, 5, (14, 11), 0.02, vb.pp("b"))?;
        assert_eq!(deconv.forward(&x)?.dims(), &[1, 2, 14, 11]);
        Ok(())
    }

    #[test]
    fn test_transposed_conv_rejects_unreachable_size() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let deconv = ConvTranspose2dSame::new(1, 1, 5, (20, 20), 0.02, vb)?;
        let x = Tensor::zeros((1, 1, 7, 7), DType::F32, &device)?;
        assert!(deconv.forward(&x).is_err());
        Ok(())
    }
}

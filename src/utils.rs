/// Utility functions for the DCGAN
use candle_core::{Device, Result, Tensor};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

/// Output size of a stride-`stride` convolution with "same" padding
pub fn conv_out_size_same(size: usize, stride: usize) -> usize {
    size.div_ceil(stride)
}

/// Spatial sizes from full resolution down through four ceil-halvings
///
/// Index 0 is the output resolution itself, index 4 the smallest map the
/// generator projects to. Upsampling stage `i` produces `sizes[3 - i]`, so the
/// last stage lands exactly on `(height, width)` for any input.
pub fn stage_sizes(height: usize, width: usize) -> [(usize, usize); 5] {
    let mut sizes = [(height, width); 5];
    for i in 1..5 {
        let (h, w) = sizes[i - 1];
        sizes[i] = (conv_out_size_same(h, 2), conv_out_size_same(w, 2));
    }
    sizes
}

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

/// Draw a `[batch_size, z_dim]` latent batch uniformly from [-1, 1)
pub fn uniform_latent<R: Rng>(
    rng: &mut R,
    batch_size: usize,
    z_dim: usize,
    device: &Device,
) -> Result<Tensor> {
    let dist = Uniform::new(-1.0f32, 1.0f32);
    let data: Vec<f32> = (0..batch_size * z_dim).map(|_| dist.sample(rng)).collect();
    Tensor::from_vec(data, (batch_size, z_dim), device)
}

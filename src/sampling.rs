/// Writing generated images to disk
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use image::{GrayImage, Luma};
use rand::Rng;

use crate::models::Generator;
use crate::utils::uniform_latent;
use crate::DcganError;

/// Grid `(rows, cols)` for `n` images: `(floor(sqrt n), ceil(sqrt n))`
///
/// Fails unless the grid holds exactly `n` images, e.g. 4 -> 2x2, 6 -> 2x3, but
/// 5 has no such grid.
pub fn manifold_size(n: usize) -> crate::Result<(usize, usize)> {
    let root = (n as f64).sqrt();
    let rows = root.floor() as usize;
    let cols = root.ceil() as usize;
    if n == 0 || rows * cols != n {
        return Err(DcganError::SampleExport(format!(
            "{n} images do not fill a {rows}x{cols} grid"
        )));
    }
    Ok((rows, cols))
}

/// Map a value in [-1, 1] back to an 8-bit pixel
pub fn to_pixel(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// `[batch, height, width, 1]` tensor to host-side pixel rows
fn to_images(images: &Tensor) -> crate::Result<Vec<Vec<Vec<f32>>>> {
    let (_, _, _, channels) = images.dims4()?;
    if channels != 1 {
        return Err(DcganError::SampleExport(format!(
            "expected single-channel images, got {channels} channels"
        )));
    }
    let images = images
        .to_device(&Device::Cpu)?
        .squeeze(3)?
        .to_dtype(candle_core::DType::F32)?
        .to_vec3::<f32>()?;

    if images.iter().flatten().flatten().any(|v| !v.is_finite()) {
        return Err(DcganError::SampleExport(
            "generated images contain non-finite values".to_string(),
        ));
    }
    Ok(images)
}

fn write_png(image: &GrayImage, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

fn export_error(e: DcganError) -> DcganError {
    match e {
        DcganError::SampleExport(_) => e,
        other => DcganError::SampleExport(other.to_string()),
    }
}

/// Tile a batch into one image and save it
///
/// # Arguments
/// * `images` - `[batch, height, width, 1]` in [-1, 1]
/// * `path` - Output file; the format follows the extension
pub fn save_grid<P: AsRef<Path>>(images: &Tensor, path: P) -> crate::Result<()> {
    let grid = (|| -> crate::Result<()> {
        let images = to_images(images)?;
        let (rows, cols) = manifold_size(images.len())?;
        let h = images[0].len();
        let w = images[0].first().map_or(0, |row| row.len());

        let mut grid = GrayImage::new((w * cols) as u32, (h * rows) as u32);
        for (idx, image) in images.iter().enumerate() {
            let (top, left) = ((idx / cols) * h, (idx % cols) * w);
            for (y, row) in image.iter().enumerate() {
                for (x, &value) in row.iter().enumerate() {
                    grid.put_pixel((left + x) as u32, (top + y) as u32, Luma([to_pixel(value)]));
                }
            }
        }
        write_png(&grid, path.as_ref())
    })();
    grid.map_err(export_error)
}

/// Save one `[height, width, 1]` image
pub fn save_image<P: AsRef<Path>>(image: &Tensor, path: P) -> crate::Result<()> {
    let result = (|| -> crate::Result<()> {
        let images = to_images(&image.unsqueeze(0)?)?;
        let pixels = &images[0];
        let h = pixels.len();
        let w = pixels.first().map_or(0, |row| row.len());

        let mut out = GrayImage::new(w as u32, h as u32);
        for (y, row) in pixels.iter().enumerate() {
            for (x, &value) in row.iter().enumerate() {
                out.put_pixel(x as u32, y as u32, Luma([to_pixel(value)]));
            }
        }
        write_png(&out, path.as_ref())
    })();
    result.map_err(export_error)
}

/// Sample `count` images from a trained generator into `sample_dir`
///
/// Files are named `test_00000.png`, `test_00001.png`, ...; batches are drawn
/// with the inference-mode sampler and the last batch is shortened to hit
/// `count` exactly.
pub fn generate_test_images<R: Rng, P: AsRef<Path>>(
    generator: &Generator,
    count: usize,
    batch_size: usize,
    sample_dir: P,
    rng: &mut R,
    device: &Device,
) -> crate::Result<Vec<PathBuf>> {
    if batch_size == 0 {
        return Err(DcganError::Config("batch_size must be > 0".to_string()));
    }
    fs::create_dir_all(sample_dir.as_ref())?;

    let mut written = Vec::with_capacity(count);
    while written.len() < count {
        let n = batch_size.min(count - written.len());
        let z = uniform_latent(rng, n, generator.z_dim(), device)?;
        let samples = generator.sample(&z)?;

        for i in 0..n {
            let path = sample_dir
                .as_ref()
                .join(format!("test_{:05}.png", written.len()));
            save_image(&samples.get(i)?, &path)?;
            written.push(path);
        }
    }

    log::info!(
        "Wrote {} test images to {}",
        written.len(),
        sample_dir.as_ref().display()
    );
    Ok(written)
}

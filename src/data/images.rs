/// Grayscale image dataset read from a directory of files
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use glob::{MatchOptions, Pattern};
use image::imageops::{self, FilterType};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::BatchDataLoader;
use crate::config::DatasetConfig;
use crate::DcganError;

/// Crop/resize applied to every image before it becomes a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    /// Center crop `(height, width)` taken first, clamped to the image size
    pub crop: Option<(usize, usize)>,
    pub output_height: usize,
    pub output_width: usize,
}

impl ImageTransform {
    pub fn new(config: &DatasetConfig, output_height: usize, output_width: usize) -> Self {
        Self {
            crop: config
                .crop
                .then_some((config.input_height, config.input_width)),
            output_height,
            output_width,
        }
    }

    /// Center-crop (if configured) then resize to the output size
    pub fn apply(&self, image: GrayImage) -> GrayImage {
        let image = match self.crop {
            Some((crop_h, crop_w)) => {
                let (w, h) = image.dimensions();
                let crop_h = (crop_h as u32).min(h);
                let crop_w = (crop_w as u32).min(w);
                let top = (h - crop_h) / 2;
                let left = (w - crop_w) / 2;
                imageops::crop_imm(&image, left, top, crop_w, crop_h).to_image()
            }
            None => image,
        };

        let (target_w, target_h) = (self.output_width as u32, self.output_height as u32);
        if image.dimensions() == (target_w, target_h) {
            image
        } else {
            imageops::resize(&image, target_w, target_h, FilterType::Triangle)
        }
    }
}

/// Convert 8-bit pixels to a `[height, width, 1]` tensor in [-1, 1]
pub fn to_tensor(image: &GrayImage, device: &Device) -> candle_core::Result<Tensor> {
    let (w, h) = image.dimensions();
    let data: Vec<f32> = image
        .as_raw()
        .iter()
        .map(|&p| p as f32 / 127.5 - 1.0)
        .collect();
    Tensor::from_vec(data, (h as usize, w as usize, 1), device)
}

/// Decode one file as grayscale and transform it
///
/// # Returns
/// `[output_height, output_width, 1]` with values in [-1, 1]
pub fn load_image<P: AsRef<Path>>(
    path: P,
    transform: &ImageTransform,
    device: &Device,
) -> crate::Result<Tensor> {
    let image = image::open(path.as_ref())?.to_luma8();
    Ok(to_tensor(&transform.apply(image), device)?)
}

/// Glob options for dataset file names; a leading `*` does not match dotfiles
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Compile a file-name glob such as `*.jpg` or `img_[0-9].png`
pub fn file_pattern(pattern: &str) -> crate::Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| DcganError::Config(format!("invalid file pattern '{}': {}", pattern, e)))
}

pub fn matches_pattern(pattern: &Pattern, name: &str) -> bool {
    pattern.matches_with(name, MATCH_OPTIONS)
}

/// Sorted list of files in `dir` whose names match `pattern`
///
/// Symlinks count as files when their target is a file.
pub fn scan_dataset(dir: &Path, pattern: &str) -> crate::Result<Vec<PathBuf>> {
    let pattern = file_pattern(pattern)?;
    let entries = fs::read_dir(dir).map_err(|e| {
        DcganError::Config(format!("cannot read dataset directory {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matched = path
            .file_name()
            .is_some_and(|name| matches_pattern(&pattern, &name.to_string_lossy()));
        if matched && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Shuffled mini-batches of images from `data_dir/dataset_name`
///
/// The file list is re-scanned and reshuffled on every [`reset`], so files
/// added between epochs are picked up. Trailing files that do not fill a
/// whole batch are skipped for that epoch.
///
/// [`reset`]: BatchDataLoader::reset
pub struct ImageDataLoader {
    config: DatasetConfig,
    transform: ImageTransform,
    batch_size: usize,
    train_size: Option<usize>,
    files: Vec<PathBuf>,
    held_out: Vec<PathBuf>,
    current_idx: usize,
    rng: StdRng,
}

impl ImageDataLoader {
    /// Scan the dataset directory
    ///
    /// # Arguments
    /// * `config` - Dataset location and crop settings
    /// * `output_size` - `(height, width)` every image is resized to
    /// * `batch_size` - Images per batch
    /// * `train_size` - Optional cap on images used per epoch
    /// * `rng` - Source of the per-epoch shuffles
    ///
    /// Fails with a configuration error when no file matches the pattern or
    /// there are fewer files than one batch.
    pub fn new(
        config: DatasetConfig,
        output_size: (usize, usize),
        batch_size: usize,
        train_size: Option<usize>,
        rng: StdRng,
    ) -> crate::Result<Self> {
        config.validate()?;
        if batch_size == 0 {
            return Err(DcganError::Config("batch_size must be > 0".to_string()));
        }

        let files = Self::scan(&config, batch_size)?;
        log::info!(
            "Found {} images matching '{}' in {}",
            files.len(),
            config.input_fname_pattern,
            config.dataset_dir().display()
        );

        let transform = ImageTransform::new(&config, output_size.0, output_size.1);
        Ok(Self {
            config,
            transform,
            batch_size,
            train_size,
            held_out: files.clone(),
            files,
            current_idx: 0,
            rng,
        })
    }

    fn scan(config: &DatasetConfig, batch_size: usize) -> crate::Result<Vec<PathBuf>> {
        let dir = config.dataset_dir();
        let files = scan_dataset(&dir, &config.input_fname_pattern)?;

        if files.is_empty() {
            return Err(DcganError::Config(format!(
                "no images matching '{}' in {}",
                config.input_fname_pattern,
                dir.display()
            )));
        }
        if files.len() < batch_size {
            return Err(DcganError::Config(format!(
                "{} images in {} but batch_size is {}",
                files.len(),
                dir.display(),
                batch_size
            )));
        }
        Ok(files)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Current epoch's file order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    fn load_stack(&self, files: &[PathBuf], device: &Device) -> crate::Result<Tensor> {
        let images = files
            .iter()
            .map(|path| load_image(path, &self.transform, device))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Tensor::stack(&images, 0)?)
    }
}

impl BatchDataLoader for ImageDataLoader {
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<Tensor>> {
        let end = self.current_idx + self.batch_size;
        if end > self.num_batches() * self.batch_size {
            return Ok(None);
        }

        let batch = self.load_stack(&self.files[self.current_idx..end], device)?;
        self.current_idx = end;
        Ok(Some(batch))
    }

    fn reset(&mut self) -> crate::Result<()> {
        self.files = Self::scan(&self.config, self.batch_size)?;
        self.files.shuffle(&mut self.rng);
        self.current_idx = 0;
        Ok(())
    }

    fn num_batches(&self) -> usize {
        let usable = match self.train_size {
            Some(cap) => self.files.len().min(cap),
            None => self.files.len(),
        };
        usable / self.batch_size
    }

    fn held_out_batch(&self, size: usize, device: &Device) -> crate::Result<Tensor> {
        if size == 0 || size > self.held_out.len() {
            return Err(DcganError::Config(format!(
                "cannot hold out {} of {} images",
                size,
                self.held_out.len()
            )));
        }
        self.load_stack(&self.held_out[..size], device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::SeedableRng;

    fn write_images(dir: &Path, count: usize, size: u32) -> crate::Result<()> {
        for i in 0..count {
            let img =
                GrayImage::from_fn(size, size, |x, y| Luma([((x + y) as usize * 4 + i) as u8]));
            img.save(dir.join(format!("img_{i:03}.png")))?;
        }
        Ok(())
    }

    fn dataset(root: &Path) -> DatasetConfig {
        DatasetConfig {
            data_dir: root.to_path_buf(),
            dataset_name: "prints".to_string(),
            input_fname_pattern: "*.png".to_string(),
            input_height: 24,
            input_width: 24,
            crop: true,
        }
    }

    #[test]
    fn test_matches_pattern() -> crate::Result<()> {
        let jpg = file_pattern("*.jpg")?;
        assert!(matches_pattern(&jpg, "a.jpg"));
        assert!(!matches_pattern(&jpg, "a.jpeg"));
        // AppleDouble sidecars and other dotfiles are not images
        assert!(!matches_pattern(&jpg, "._a.jpg"));
        assert!(!matches_pattern(&jpg, ".jpg"));
        assert!(matches_pattern(&file_pattern(".*.jpg")?, "._a.jpg"));

        let two = file_pattern("img_??.png")?;
        assert!(matches_pattern(&two, "img_07.png"));
        assert!(!matches_pattern(&two, "img_7.png"));

        let digit = file_pattern("img_[0-9].png")?;
        assert!(matches_pattern(&digit, "img_3.png"));
        assert!(!matches_pattern(&digit, "img_x.png"));

        assert!(matches_pattern(&file_pattern("*_*.bmp")?, "left_right_more.bmp"));
        assert!(matches!(file_pattern("img_[0-9.png"), Err(DcganError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_scan_skips_dotfiles_and_directories() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        write_images(root.path(), 3, 4)?;
        fs::write(root.path().join("._img_000.png"), "resource fork")?;
        fs::create_dir(root.path().join("nested.png"))?;

        let files = scan_dataset(root.path(), "*.png")?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["img_000.png", "img_001.png", "img_002.png"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinks() -> crate::Result<()> {
        let source = tempfile::tempdir()?;
        write_images(source.path(), 4, 4)?;

        let root = tempfile::tempdir()?;
        let dir = root.path().join("prints");
        fs::create_dir_all(&dir)?;
        for i in 0..4 {
            let name = format!("img_{i:03}.png");
            std::os::unix::fs::symlink(source.path().join(&name), dir.join(&name))?;
        }
        // dangling links are skipped
        std::os::unix::fs::symlink(source.path().join("gone.png"), dir.join("gone.png"))?;

        assert_eq!(scan_dataset(&dir, "*.png")?.len(), 4);
        let loader = ImageDataLoader::new(
            dataset(root.path()),
            (4, 4),
            2,
            None,
            StdRng::seed_from_u64(0),
        )?;
        assert_eq!(loader.num_batches(), 2);
        Ok(())
    }

    #[test]
    fn test_transform_crops_then_resizes() {
        let img = GrayImage::from_fn(40, 30, |x, _| Luma([x as u8]));
        let transform = ImageTransform {
            crop: Some((20, 20)),
            output_height: 10,
            output_width: 10,
        };
        let out = transform.apply(img);
        assert_eq!(out.dimensions(), (10, 10));
        // center crop starts at column 10, so nothing from the left edge survives
        assert!(out.pixels().all(|p| p.0[0] >= 10));
    }

    #[test]
    fn test_crop_larger_than_image_is_clamped() {
        let img = GrayImage::new(8, 6);
        let transform = ImageTransform {
            crop: Some((100, 100)),
            output_height: 4,
            output_width: 4,
        };
        assert_eq!(transform.apply(img).dimensions(), (4, 4));
    }

    #[test]
    fn test_to_tensor_range() -> crate::Result<()> {
        let img = GrayImage::from_raw(2, 1, vec![0, 255]).ok_or_else(|| {
            DcganError::Config("bad raw buffer".to_string())
        })?;
        let t = to_tensor(&img, &Device::Cpu)?;
        assert_eq!(t.dims(), &[1, 2, 1]);
        assert_eq!(t.flatten_all()?.to_vec1::<f32>()?, vec![-1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_loader_batches() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("prints");
        fs::create_dir_all(&dir)?;
        write_images(&dir, 7, 32)?;
        fs::write(dir.join("notes.txt"), "not an image")?;

        let mut loader = ImageDataLoader::new(
            dataset(root.path()),
            (16, 16),
            3,
            None,
            StdRng::seed_from_u64(0),
        )?;
        assert_eq!(loader.len(), 7);
        assert_eq!(loader.num_batches(), 2);

        loader.reset()?;
        let mut batches = 0;
        while let Some(batch) = loader.next_batch(&Device::Cpu)? {
            assert_eq!(batch.dims(), &[3, 16, 16, 1]);
            batches += 1;
        }
        assert_eq!(batches, 2);

        let held_out = loader.held_out_batch(3, &Device::Cpu)?;
        assert_eq!(held_out.dims(), &[3, 16, 16, 1]);
        Ok(())
    }

    #[test]
    fn test_reset_rescans_and_reshuffles() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("prints");
        fs::create_dir_all(&dir)?;
        write_images(&dir, 12, 4)?;

        let mut loader = ImageDataLoader::new(
            dataset(root.path()),
            (4, 4),
            4,
            None,
            StdRng::seed_from_u64(5),
        )?;
        let sorted = loader.files().to_vec();
        assert_eq!(loader.num_batches(), 3);

        loader.reset()?;
        let first = loader.files().to_vec();
        loader.reset()?;
        let second = loader.files().to_vec();
        assert_ne!(first, sorted);
        assert_ne!(second, sorted);
        assert_ne!(first, second);

        let mut reordered = first.clone();
        reordered.sort();
        assert_eq!(reordered, sorted);

        // files written between epochs join the next one
        write_images(&dir, 16, 4)?;
        assert_eq!(loader.len(), 12);
        loader.reset()?;
        assert_eq!(loader.len(), 16);
        assert_eq!(loader.num_batches(), 4);

        let mut batches = 0;
        while loader.next_batch(&Device::Cpu)?.is_some() {
            batches += 1;
        }
        assert_eq!(batches, 4);
        Ok(())
    }

    #[test]
    fn test_train_size_caps_batches() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("prints");
        fs::create_dir_all(&dir)?;
        write_images(&dir, 8, 16)?;

        let loader = ImageDataLoader::new(
            dataset(root.path()),
            (16, 16),
            2,
            Some(5),
            StdRng::seed_from_u64(0),
        )?;
        assert_eq!(loader.num_batches(), 2);
        Ok(())
    }

    #[test]
    fn test_too_few_images_is_config_error() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("prints");
        fs::create_dir_all(&dir)?;
        write_images(&dir, 2, 16)?;

        let result = ImageDataLoader::new(
            dataset(root.path()),
            (16, 16),
            4,
            None,
            StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(DcganError::Config(_))));

        let empty = ImageDataLoader::new(
            DatasetConfig {
                input_fname_pattern: "*.jpg".to_string(),
                ..dataset(root.path())
            },
            (16, 16),
            1,
            None,
            StdRng::seed_from_u64(0),
        );
        assert!(matches!(empty, Err(DcganError::Config(_))));
        Ok(())
    }
}

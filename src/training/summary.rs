/// Training summaries as JSON lines
///
/// One record per line in `<log_dir>/events.<run>.jsonl`: scalar losses and
/// histograms of the latent batch and discriminator probabilities.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

const DEFAULT_BUCKETS: usize = 30;

/// Bucketed distribution of a tensor's values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub num: u64,
    pub sum: f64,
    pub sum_squares: f64,
    /// Upper edge of each bucket
    pub bucket_limit: Vec<f64>,
    pub bucket: Vec<u64>,
}

impl Histogram {
    /// Bucket `values` into `buckets` equal-width bins spanning their range
    pub fn from_values(values: &[f32], buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let finite = values.iter().map(|&v| v as f64).filter(|v| v.is_finite());

        let (mut min, mut max, mut num, mut sum, mut sum_squares) =
            (f64::INFINITY, f64::NEG_INFINITY, 0u64, 0.0, 0.0);
        for v in finite.clone() {
            min = min.min(v);
            max = max.max(v);
            num += 1;
            sum += v;
            sum_squares += v * v;
        }

        if num == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                num: 0,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limit: Vec::new(),
                bucket: Vec::new(),
            };
        }

        let width = (max - min) / buckets as f64;
        let bucket_limit: Vec<f64> = if width > 0.0 {
            (1..=buckets).map(|i| min + width * i as f64).collect()
        } else {
            vec![max]
        };

        let mut bucket = vec![0u64; bucket_limit.len()];
        for v in finite {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(bucket.len() - 1)
            } else {
                0
            };
            bucket[idx] += 1;
        }

        Self {
            min,
            max,
            num,
            sum,
            sum_squares,
            bucket_limit,
            bucket,
        }
    }
}

/// One line of the summary file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryRecord {
    Scalar {
        step: u64,
        wall_time: f64,
        tag: String,
        value: f64,
    },
    Histogram {
        step: u64,
        wall_time: f64,
        tag: String,
        histogram: Histogram,
    },
}

impl SummaryRecord {
    pub fn tag(&self) -> &str {
        match self {
            SummaryRecord::Scalar { tag, .. } | SummaryRecord::Histogram { tag, .. } => tag,
        }
    }

    pub fn step(&self) -> u64 {
        match self {
            SummaryRecord::Scalar { step, .. } | SummaryRecord::Histogram { step, .. } => *step,
        }
    }
}

/// Appends summary records to a JSON-lines file
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    /// Open (or continue) the summary file for `run_name` under `log_dir`
    pub fn create<P: AsRef<Path>>(log_dir: P, run_name: &str) -> crate::Result<Self> {
        fs::create_dir_all(log_dir.as_ref())?;
        let path = log_dir.as_ref().join(format!("events.{run_name}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> crate::Result<()> {
        self.write(&SummaryRecord::Scalar {
            step,
            wall_time: wall_time(),
            tag: tag.to_string(),
            value,
        })
    }

    /// Record the distribution of every element of `values`
    pub fn add_histogram(&mut self, tag: &str, values: &Tensor, step: u64) -> crate::Result<()> {
        let values = values.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
        self.write(&SummaryRecord::Histogram {
            step,
            wall_time: wall_time(),
            tag: tag.to_string(),
            histogram: Histogram::from_values(&values, DEFAULT_BUCKETS),
        })
    }

    pub fn flush(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn write(&mut self, record: &SummaryRecord) -> crate::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush summaries to {}: {}", self.path.display(), e);
        }
    }
}

/// Read every record of a summary file
pub fn read_summaries<P: AsRef<Path>>(path: P) -> crate::Result<Vec<SummaryRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

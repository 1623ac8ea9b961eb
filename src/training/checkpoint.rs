/// Model checkpointing with safetensors
///
/// Snapshots live in `<checkpoint_dir>/<model_key>/` as
/// `DCGAN.model-<step>.safetensors`. A small `checkpoint.json` state file names
/// the latest snapshot and the ones still retained.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::safetensors::Load;
use candle_core::{Device, Tensor};
use safetensors::tensor::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::models::NetworkParams;
use crate::DcganError;

/// Snapshot file stem; the step number follows a dash
pub const MODEL_NAME: &str = "DCGAN.model";

/// State file naming the latest snapshot
pub const STATE_FILE: &str = "checkpoint.json";

const SNAPSHOT_EXT: &str = "safetensors";

/// Metadata stored in the safetensors header of every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Training step
    pub step: u64,
    /// Run the snapshot belongs to
    pub model_key: String,
}

impl CheckpointMetadata {
    fn to_header(&self) -> HashMap<String, String> {
        HashMap::from([
            ("step".to_string(), self.step.to_string()),
            ("model_key".to_string(), self.model_key.clone()),
        ])
    }

    fn from_header(header: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            step: header.get("step")?.parse().ok()?,
            model_key: header.get("model_key")?.clone(),
        })
    }
}

/// Contents of `checkpoint.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// File name of the most recent snapshot
    pub model_checkpoint_path: String,
    /// Retained snapshots, oldest first
    pub all_model_checkpoint_paths: Vec<String>,
}

/// Outcome of a restore attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Restored {
    Found { step: u64, path: PathBuf },
    NotFound,
}

impl Restored {
    /// Step encoded in the restored snapshot, 0 when nothing was loaded
    pub fn step(&self) -> u64 {
        match self {
            Restored::Found { step, .. } => *step,
            Restored::NotFound => 0,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Restored::Found { .. })
    }
}

/// Saves and restores both networks' parameters under one run directory
pub struct CheckpointStore {
    dir: PathBuf,
    model_key: String,
    max_to_keep: usize,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P, model_key: &str) -> Self {
        Self {
            dir: checkpoint_dir.as_ref().join(model_key),
            model_key: model_key.to_string(),
            max_to_keep: 5,
        }
    }

    /// Number of snapshots retained; older ones are deleted on save (0 keeps all)
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }

    /// Run directory holding the snapshots
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    /// Persist every network's parameters tagged with `step`
    ///
    /// The snapshot is written to a temporary file and renamed into place, so
    /// an interrupted save never leaves a truncated snapshot behind.
    pub fn save(&self, networks: &[&NetworkParams], step: u64) -> crate::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for network in networks {
            for (name, tensor) in network.named_tensors()? {
                if tensors.insert(name.clone(), tensor).is_some() {
                    return Err(DcganError::Checkpoint(format!(
                        "tensor '{name}' appears in more than one network"
                    )));
                }
            }
        }

        let file_name = snapshot_name(step);
        let path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{file_name}.tmp"));

        let metadata = CheckpointMetadata {
            step,
            model_key: self.model_key.clone(),
        };
        safetensors::serialize_to_file(
            tensors.iter().map(|(name, tensor)| (name.as_str(), tensor)),
            &Some(metadata.to_header()),
            &tmp_path,
        )
        .map_err(|e| DcganError::Checkpoint(format!("failed to write {}: {}", path.display(), e)))?;
        fs::rename(&tmp_path, &path)?;

        let mut state = self.read_state()?.unwrap_or_default();
        state.all_model_checkpoint_paths.retain(|p| p != &file_name);
        state.all_model_checkpoint_paths.push(file_name.clone());
        state.model_checkpoint_path = file_name;

        let kept = state.all_model_checkpoint_paths.len();
        let stale = if self.max_to_keep > 0 && kept > self.max_to_keep {
            let excess = kept - self.max_to_keep;
            state.all_model_checkpoint_paths.drain(..excess).collect()
        } else {
            Vec::new()
        };
        self.write_state(&state)?;

        for old in stale {
            match fs::remove_file(self.dir.join(&old)) {
                Ok(()) => log::debug!("Removed old checkpoint {}", old),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Could not remove old checkpoint {}: {}", old, e),
            }
        }

        log::info!("Saved checkpoint {} (step {})", path.display(), step);
        Ok(path)
    }

    /// Restore the most recent snapshot into `networks`
    ///
    /// Returns [`Restored::NotFound`] when the run directory holds no snapshot.
    /// A snapshot that exists but cannot be read, or does not match the
    /// networks, is an error.
    pub fn load(&self, networks: &[&NetworkParams], device: &Device) -> crate::Result<Restored> {
        log::info!("Reading checkpoints from {}", self.dir.display());

        let Some(file_name) = self.latest()? else {
            log::info!("No checkpoint found in {}", self.dir.display());
            return Ok(Restored::NotFound);
        };

        let step = trailing_step(&file_name).ok_or_else(|| {
            DcganError::Checkpoint(format!("no step number in snapshot name '{file_name}'"))
        })?;

        let path = self.dir.join(&file_name);
        let buffer = fs::read(&path)?;
        let snapshot = SafeTensors::deserialize(&buffer).map_err(|e| {
            DcganError::Checkpoint(format!("failed to read {}: {}", path.display(), e))
        })?;

        if let Ok((_, header)) = SafeTensors::read_metadata(&buffer) {
            let metadata = header
                .metadata()
                .as_ref()
                .and_then(CheckpointMetadata::from_header);
            if let Some(metadata) = metadata {
                if metadata.step != step {
                    log::warn!(
                        "Snapshot {} records step {}, file name says {}",
                        file_name,
                        metadata.step,
                        step
                    );
                }
                if metadata.model_key != self.model_key {
                    log::warn!(
                        "Snapshot {} was written for run {}",
                        file_name,
                        metadata.model_key
                    );
                }
            }
        }

        let mut tensors = HashMap::new();
        for (name, view) in snapshot.tensors() {
            tensors.insert(name, view.load(device)?);
        }

        for network in networks {
            let count = network.restore(&tensors)?;
            log::debug!("Restored {} tensors into {}", count, network.name());
        }

        log::info!("Success to read {}", file_name);
        Ok(Restored::Found { step, path })
    }

    /// File name of the newest snapshot, if any
    ///
    /// The state file wins; without one the directory is scanned and the
    /// highest step number is used.
    pub fn latest(&self) -> crate::Result<Option<String>> {
        if let Some(state) = self.read_state()? {
            if !state.model_checkpoint_path.is_empty() {
                if !self.dir.join(&state.model_checkpoint_path).is_file() {
                    return Err(DcganError::Checkpoint(format!(
                        "{} names missing snapshot {}",
                        STATE_FILE, state.model_checkpoint_path
                    )));
                }
                return Ok(Some(state.model_checkpoint_path));
            }
        }

        if !self.dir.is_dir() {
            return Ok(None);
        }

        let mut newest: Option<(u64, String)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !is_snapshot_name(&name) {
                continue;
            }
            if let Some(step) = trailing_step(&name) {
                if newest.as_ref().map_or(true, |(best, _)| step > *best) {
                    newest = Some((step, name));
                }
            }
        }
        Ok(newest.map(|(_, name)| name))
    }

    /// Parse `checkpoint.json`, `None` if it does not exist
    pub fn read_state(&self) -> crate::Result<Option<CheckpointState>> {
        let path = self.dir.join(STATE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_state(&self, state: &CheckpointState) -> crate::Result<()> {
        let path = self.dir.join(STATE_FILE);
        let tmp_path = self.dir.join(format!("{STATE_FILE}.tmp"));
        fs::write(&tmp_path, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

fn snapshot_name(step: u64) -> String {
    format!("{MODEL_NAME}-{step}.{SNAPSHOT_EXT}")
}

fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(MODEL_NAME) && name.ends_with(&format!(".{SNAPSHOT_EXT}"))
}

/// Last run of decimal digits in `name`, e.g. `DCGAN.model-1200.safetensors` -> 1200
pub fn trailing_step(name: &str) -> Option<u64> {
    let bytes = name.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    name[start..end].parse().ok()
}

/// Parameter ownership for one network
///
/// Every network builds its layers from its own `NetworkParams`, so the
/// discriminator and generator partitions are disjoint by construction. Each
/// store holds two maps: trainable weights (handed to exactly one optimizer)
/// and batch-norm running statistics (only written by forward passes in
/// training mode). Both are persisted with checkpoints.
use std::collections::HashMap;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};

use crate::{DcganError, Result};

/// One row of the parameter summary
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub count: usize,
    pub trainable: bool,
}

pub struct NetworkParams {
    name: String,
    trainable: VarMap,
    statistics: VarMap,
    dtype: DType,
    device: Device,
}

impl NetworkParams {
    pub fn new(name: &str, dtype: DType, device: &Device) -> Self {
        Self {
            name: name.to_string(),
            trainable: VarMap::new(),
            statistics: VarMap::new(),
            dtype,
            device: device.clone(),
        }
    }

    /// Namespace used for this network's tensors in checkpoint files
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Builder for weights, biases and normalization scale/shift
    pub fn trainable_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.trainable, self.dtype, &self.device)
    }

    /// Builder for normalization running statistics
    pub fn statistics_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.statistics, self.dtype, &self.device)
    }

    /// Variables this network's optimizer is allowed to update
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.trainable.all_vars()
    }

    pub fn statistics_vars(&self) -> Vec<Var> {
        self.statistics.all_vars()
    }

    /// Number of trainable scalars
    pub fn num_parameters(&self) -> usize {
        self.trainable_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Every tensor (trainable and statistics) under `<network>.<path>`
    pub fn named_tensors(&self) -> Result<Vec<(String, Tensor)>> {
        let mut tensors = Vec::new();
        for map in [&self.trainable, &self.statistics] {
            let data = map
                .data()
                .lock()
                .map_err(|_| DcganError::Model(format!("{} parameters poisoned", self.name)))?;
            for (key, var) in data.iter() {
                tensors.push((self.qualified(key), var.as_tensor().clone()));
            }
        }
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(tensors)
    }

    /// Overwrite every variable in place from a name -> tensor map
    ///
    /// Fails on the first missing name or shape mismatch; extra tensors that
    /// belong to other networks are ignored.
    pub fn restore(&self, tensors: &HashMap<String, Tensor>) -> Result<usize> {
        let mut restored = 0;
        for map in [&self.trainable, &self.statistics] {
            let data = map
                .data()
                .lock()
                .map_err(|_| DcganError::Model(format!("{} parameters poisoned", self.name)))?;
            for (key, var) in data.iter() {
                let name = self.qualified(key);
                let tensor = tensors
                    .get(&name)
                    .ok_or_else(|| DcganError::Checkpoint(format!("missing tensor '{name}'")))?;

                if tensor.dims() != var.dims() {
                    return Err(DcganError::Checkpoint(format!(
                        "shape mismatch for '{}': checkpoint {:?}, model {:?}",
                        name,
                        tensor.dims(),
                        var.dims()
                    )));
                }

                let tensor = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
                var.set(&tensor)?;
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Name, shape and size of every parameter, sorted by name
    pub fn summary(&self) -> Result<Vec<ParamInfo>> {
        let mut rows = Vec::new();
        for (map, trainable) in [(&self.trainable, true), (&self.statistics, false)] {
            let data = map
                .data()
                .lock()
                .map_err(|_| DcganError::Model(format!("{} parameters poisoned", self.name)))?;
            for (key, var) in data.iter() {
                rows.push(ParamInfo {
                    name: self.qualified(key),
                    shape: var.dims().to_vec(),
                    count: crate::utils::count_parameters(var.as_tensor()),
                    trainable,
                });
            }
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    fn qualified(&self, key: &str) -> String {
        format!("{}.{}", self.name, key)
    }
}

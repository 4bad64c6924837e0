//! The narrow contract between a [`crate::ModelSession`] and a numeric runtime.
//!
//! A session never touches tensors or weights itself. It builds layers, wires
//! them, assembles and compiles a model and feeds it matrices, all through
//! [`ModelBackend`]. [`crate::native::NativeBackend`] is the CPU implementation
//! shipped with the crate; any other runtime can be substituted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::callbacks::Callback;
use crate::data::Matrix;
use crate::error::BackendError;
use crate::layers::LayerParams;
use crate::loss::LossKind;
use crate::metrics::MetricKind;
use crate::optim::OptimizerConfig;
use crate::{Error, Result};

/// Scalar logs of one epoch or one evaluation, keyed by log name.
pub type Logs = BTreeMap<String, f64>;

/// Per-layer matrices keyed by input or output layer name.
pub type Feeds = BTreeMap<String, Matrix>;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Loss and metrics of one output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCompile {
    pub name: String,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
}

/// Everything a backend needs to compile a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileSpec {
    pub optimizer: OptimizerConfig,
    /// In the model's output order.
    pub outputs: Vec<OutputCompile>,
}

/// Shape of a fit call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSpec {
    pub batch_size: usize,
    pub epochs: usize,
    /// Fraction of trailing rows held out for validation, in `[0, 1)`.
    pub validation_split: f32,
}

impl Default for FitSpec {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 1,
            validation_split: 0.0,
        }
    }
}

impl FitSpec {
    pub fn new(batch_size: usize, epochs: usize, validation_split: f32) -> Self {
        Self {
            batch_size,
            epochs,
            validation_split,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_batch_size(self.batch_size)?;
        if self.epochs == 0 {
            return Err(Error::Model("epochs must be > 0".to_owned()));
        }
        if !(self.validation_split.is_finite() && (0.0..1.0).contains(&self.validation_split)) {
            return Err(Error::Model(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::Model("batch_size must be > 0".to_owned()));
    }
    Ok(())
}

/// Result of [`ModelBackend::assemble`].
#[derive(Debug)]
pub struct Assembled<M> {
    pub model: M,
    /// Final dimension of every output, in the order requested.
    pub output_features: Vec<usize>,
    pub compiled: bool,
}

/// Named layer shape as introspected from a model; `None` marks the batch axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortShape {
    pub name: String,
    pub shape: Vec<Option<usize>>,
}

/// Result of [`ModelBackend::deserialize`].
#[derive(Debug)]
pub struct Loaded<M> {
    pub model: M,
    pub inputs: Vec<PortShape>,
    pub outputs: Vec<PortShape>,
    pub compiled: bool,
}

/// Numeric runtime used by a session.
///
/// Layer construction is split in two steps: [`build_layer`](Self::build_layer)
/// turns validated parameters into a layer object and [`apply`](Self::apply)
/// wires it to the handles of its upstream layers.
pub trait ModelBackend {
    /// Symbolic output of a layer.
    type Handle: Clone + std::fmt::Debug;
    /// A constructed, not yet connected layer.
    type Layer;
    type Model;

    fn input(&mut self, name: &str, features: usize) -> BackendResult<Self::Handle>;

    fn build_layer(&mut self, name: &str, params: &LayerParams) -> BackendResult<Self::Layer>;

    fn apply(&mut self, layer: Self::Layer, inputs: &[Self::Handle])
    -> BackendResult<Self::Handle>;

    fn assemble(
        &mut self,
        name: &str,
        inputs: &[Self::Handle],
        outputs: &[Self::Handle],
    ) -> BackendResult<Assembled<Self::Model>>;

    fn compile(&mut self, model: &mut Self::Model, spec: &CompileSpec) -> BackendResult<()>;

    /// Train and return the logs of every epoch run.
    fn fit(
        &mut self,
        model: &mut Self::Model,
        inputs: &Feeds,
        targets: &Feeds,
        spec: &FitSpec,
        callbacks: &[Callback],
    ) -> BackendResult<Vec<Logs>>;

    fn evaluate(
        &mut self,
        model: &mut Self::Model,
        inputs: &Feeds,
        targets: &Feeds,
        batch_size: usize,
    ) -> BackendResult<Logs>;

    /// One matrix per output, in output order.
    fn predict(
        &mut self,
        model: &mut Self::Model,
        inputs: &Feeds,
        batch_size: usize,
    ) -> BackendResult<Vec<Matrix>>;

    fn serialize(&self, model: &Self::Model) -> BackendResult<Vec<u8>>;

    fn deserialize(&mut self, bytes: &[u8]) -> BackendResult<Loaded<Self::Model>>;

    /// Architecture diagram.
    fn render(&self, model: &Self::Model) -> BackendResult<Vec<u8>>;

    fn summary(&self, model: &Self::Model) -> BackendResult<String>;

    /// Forget a layer the session removed while drafting. `handle` is the
    /// most recently created one.
    fn discard(&mut self, handle: &Self::Handle) {
        let _ = handle;
    }

    /// Drop every layer built so far.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_spec_validation() {
        assert!(FitSpec::new(4, 5, 0.1).validate().is_ok());
        assert!(FitSpec::new(0, 5, 0.1).validate().is_err());
        assert!(FitSpec::new(4, 0, 0.1).validate().is_err());
        assert!(FitSpec::new(4, 1, 1.0).validate().is_err());
        assert!(FitSpec::new(4, 1, -0.1).validate().is_err());
    }

    #[test]
    fn fit_spec_reads_partial_json() {
        let spec: FitSpec = serde_json::from_str(r#"{"epochs": 3}"#).unwrap();
        assert_eq!(spec, FitSpec::new(32, 3, 0.0));
    }
}

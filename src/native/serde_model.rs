//! Versioned JSON container of the native backend.
//!
//! Design notes:
//! - Internal `Graph`/`Node` structs are not serialized directly so the file
//!   format stays stable if the in-memory layout changes.
//! - Deserialization validates the version, every parameter length, that all
//!   parameters are finite, and the graph references before a model is built.
//! - Optimizer moments are not persisted; a loaded compiled model starts with
//!   fresh optimizer state.

use serde::{Deserialize, Serialize};

use super::graph::{BatchNorm, Dense, Graph, Node, Op};
use crate::Activation;
use crate::backend::CompileSpec;
use crate::error::BackendError;

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedModel {
    pub format_version: u32,
    pub name: String,
    pub layers: Vec<SerializedLayer>,
    /// Indices into `layers`.
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLayer {
    pub name: String,
    pub features: usize,
    #[serde(default)]
    pub inputs: Vec<usize>,
    #[serde(flatten)]
    pub op: SerializedOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedOp {
    Input,
    Dense {
        activation: Activation,
        in_dim: usize,
        out_dim: usize,
        /// Row-major (out_dim, in_dim).
        weights: Vec<f32>,
        biases: Vec<f32>,
    },
    Concatenate,
    BatchNormalization {
        momentum: f32,
        epsilon: f32,
        gamma: Vec<f32>,
        beta: Vec<f32>,
        moving_mean: Vec<f32>,
        moving_variance: Vec<f32>,
    },
    Dropout {
        rate: f32,
    },
}

fn invalid<S: Into<String>>(message: S) -> BackendError {
    BackendError::new(message)
}

fn all_finite(name: &str, what: &str, values: &[f32]) -> Result<(), BackendError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(invalid(format!("layer {name:?}: {what} must contain only finite values")))
    }
}

impl From<&Op> for SerializedOp {
    fn from(op: &Op) -> Self {
        match op {
            Op::Input => SerializedOp::Input,
            Op::Dense(d) => SerializedOp::Dense {
                activation: d.activation,
                in_dim: d.in_dim,
                out_dim: d.out_dim,
                weights: d.weights.clone(),
                biases: d.biases.clone(),
            },
            Op::Concatenate => SerializedOp::Concatenate,
            Op::BatchNorm(bn) => SerializedOp::BatchNormalization {
                momentum: bn.momentum,
                epsilon: bn.epsilon,
                gamma: bn.gamma.clone(),
                beta: bn.beta.clone(),
                moving_mean: bn.moving_mean.clone(),
                moving_variance: bn.moving_variance.clone(),
            },
            Op::Dropout { rate } => SerializedOp::Dropout { rate: *rate },
        }
    }
}

impl SerializedLayer {
    fn validate(&self) -> Result<(), BackendError> {
        let name = &self.name;
        if name.is_empty() {
            return Err(invalid("layer names must not be empty"));
        }
        if self.features == 0 {
            return Err(invalid(format!("layer {name:?}: features must be > 0")));
        }
        match &self.op {
            SerializedOp::Input | SerializedOp::Concatenate => {}
            SerializedOp::Dense {
                in_dim,
                out_dim,
                weights,
                biases,
                ..
            } => {
                let expected = in_dim
                    .checked_mul(*out_dim)
                    .ok_or_else(|| invalid(format!("layer {name:?}: weight shape overflow")))?;
                if weights.len() != expected {
                    return Err(invalid(format!(
                        "layer {name:?}: weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                        weights.len()
                    )));
                }
                if biases.len() != *out_dim {
                    return Err(invalid(format!(
                        "layer {name:?}: biases length {} does not match out_dim {out_dim}",
                        biases.len()
                    )));
                }
                all_finite(name, "weights", weights)?;
                all_finite(name, "biases", biases)?;
            }
            SerializedOp::BatchNormalization {
                momentum,
                epsilon,
                gamma,
                beta,
                moving_mean,
                moving_variance,
            } => {
                if !(*momentum > 0.0 && *momentum <= 1.0) || !(*epsilon > 0.0 && *epsilon < 1.0) {
                    return Err(invalid(format!(
                        "layer {name:?}: momentum {momentum} or epsilon {epsilon} out of range"
                    )));
                }
                for (what, v) in [
                    ("gamma", gamma),
                    ("beta", beta),
                    ("moving_mean", moving_mean),
                    ("moving_variance", moving_variance),
                ] {
                    all_finite(name, what, v)?;
                }
                if moving_variance.iter().any(|&v| v < 0.0) {
                    return Err(invalid(format!("layer {name:?}: negative moving variance")));
                }
            }
            SerializedOp::Dropout { rate } => {
                if !(*rate > 0.0 && *rate < 1.0) {
                    return Err(invalid(format!("layer {name:?}: dropout rate {rate} out of range")));
                }
            }
        }
        Ok(())
    }

    fn into_node(self) -> Node {
        let op = match self.op {
            SerializedOp::Input => Op::Input,
            SerializedOp::Dense {
                activation,
                in_dim,
                out_dim,
                weights,
                biases,
            } => Op::Dense(Dense {
                activation,
                in_dim,
                out_dim,
                weights,
                biases,
            }),
            SerializedOp::Concatenate => Op::Concatenate,
            SerializedOp::BatchNormalization {
                momentum,
                epsilon,
                gamma,
                beta,
                moving_mean,
                moving_variance,
            } => Op::BatchNorm(BatchNorm {
                momentum,
                epsilon,
                gamma,
                beta,
                moving_mean,
                moving_variance,
            }),
            SerializedOp::Dropout { rate } => Op::Dropout { rate },
        };
        Node {
            name: self.name,
            inputs: self.inputs,
            features: self.features,
            op,
        }
    }
}

impl SerializedModel {
    pub(crate) fn from_graph(name: &str, graph: &Graph, compile: Option<&CompileSpec>) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            name: name.to_owned(),
            layers: graph
                .nodes
                .iter()
                .map(|n| SerializedLayer {
                    name: n.name.clone(),
                    features: n.features,
                    inputs: n.inputs.clone(),
                    op: SerializedOp::from(&n.op),
                })
                .collect(),
            inputs: graph.inputs.clone(),
            outputs: graph.outputs.clone(),
            compile: compile.cloned(),
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() || self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(invalid(
                "serialized model must have layers, inputs and outputs",
            ));
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        if let Some(compile) = &self.compile {
            if compile.outputs.len() != self.outputs.len() {
                return Err(invalid(format!(
                    "compile configuration covers {} outputs, model has {}",
                    compile.outputs.len(),
                    self.outputs.len()
                )));
            }
            for (spec, &idx) in compile.outputs.iter().zip(&self.outputs) {
                let actual = self.layers.get(idx).map(|l| l.name.as_str());
                if actual != Some(spec.name.as_str()) {
                    return Err(invalid(format!(
                        "compile configuration names output {:?} out of order",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and rebuild the graph.
    pub(crate) fn into_parts(self) -> Result<(String, Graph, Option<CompileSpec>), BackendError> {
        self.validate()?;
        let nodes = self.layers.into_iter().map(SerializedLayer::into_node).collect();
        let graph = Graph::new(nodes, self.inputs, self.outputs)?;
        Ok((self.name, graph, self.compile))
    }
}

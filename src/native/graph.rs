//! Layer graphs of the native backend.
//!
//! Two representations live here:
//!
//! - [`Arena`]: the symbolic graph built one layer at a time. Nodes only carry
//!   their parameters, upstream node ids and output width.
//! - [`Graph`]: the concrete network extracted from the arena by `assemble`,
//!   owning weights and running batched forward/backward passes.
//!
//! Node lists are always topologically ordered: a node's inputs have smaller
//! indices than the node itself.
//!
//! Data layout:
//! - activations are `(batch, features)` row-major [`Matrix`] values
//! - dense weights are row-major `(out_dim, in_dim)`

use std::collections::BTreeSet;

use rand::Rng;

use super::matmul::{View, gemm};
use crate::Activation;
use crate::data::Matrix;
use crate::error::BackendError;
use crate::layers::{LayerKind, LayerParams};

/// Handle of a symbolic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct SymbolicNode {
    pub name: String,
    pub params: LayerParams,
    pub inputs: Vec<usize>,
    pub features: usize,
}

/// A layer that has been built but not yet connected.
#[derive(Debug, Clone)]
pub struct PendingLayer {
    pub(crate) name: String,
    pub(crate) params: LayerParams,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Arena {
    nodes: Vec<SymbolicNode>,
}

impl Arena {
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Drop `id` if it is the newest node. Older nodes may still be referenced.
    pub fn discard(&mut self, id: NodeId) -> bool {
        if id.0 + 1 == self.nodes.len() {
            self.nodes.pop();
            true
        } else {
            false
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&SymbolicNode, BackendError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| BackendError::new(format!("unknown layer handle {}", id.0)))
    }

    pub fn input(&mut self, name: &str, features: usize) -> Result<NodeId, BackendError> {
        if features == 0 {
            return Err(BackendError::new("input shape must be positive"));
        }
        self.nodes.push(SymbolicNode {
            name: name.to_owned(),
            params: LayerParams::Input { shape: [features] },
            inputs: Vec::new(),
            features,
        });
        Ok(NodeId(self.nodes.len() - 1))
    }

    pub fn apply(&mut self, layer: PendingLayer, inputs: &[NodeId]) -> Result<NodeId, BackendError> {
        let kind = layer.params.kind();
        if !kind.arity().accepts(inputs.len()) {
            return Err(BackendError::new(format!(
                "{} layer {:?} cannot take {} inputs",
                kind.name(),
                layer.name,
                inputs.len()
            )));
        }

        let mut widths = Vec::with_capacity(inputs.len());
        for &id in inputs {
            widths.push(self.node(id)?.features);
        }

        let features = match layer.params {
            LayerParams::Input { .. } => {
                return Err(BackendError::new("input layers are not applied to other layers"));
            }
            LayerParams::Dense { units, .. } => units,
            LayerParams::Concatenate => widths.iter().sum(),
            LayerParams::BatchNormalization { .. } | LayerParams::Dropout { .. } => widths[0],
        };

        self.nodes.push(SymbolicNode {
            name: layer.name,
            params: layer.params,
            inputs: inputs.iter().map(|id| id.0).collect(),
            features,
        });
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Extract the subgraph feeding `outputs` and initialise its parameters.
    pub fn extract<R: Rng + ?Sized>(
        &self,
        inputs: &[NodeId],
        outputs: &[NodeId],
        rng: &mut R,
    ) -> Result<Graph, BackendError> {
        if inputs.is_empty() || outputs.is_empty() {
            return Err(BackendError::new("a model needs at least one input and one output"));
        }
        for &id in inputs {
            let node = self.node(id)?;
            if node.params.kind() != LayerKind::Input {
                return Err(BackendError::new(format!("{:?} is not an input layer", node.name)));
            }
        }

        let mut reached = BTreeSet::new();
        let mut stack: Vec<usize> = Vec::new();
        for &id in outputs {
            self.node(id)?;
            stack.push(id.0);
        }
        while let Some(idx) = stack.pop() {
            if reached.insert(idx) {
                stack.extend(self.nodes[idx].inputs.iter().copied());
            }
        }

        for &idx in &reached {
            let node = &self.nodes[idx];
            if node.params.kind() == LayerKind::Input && !inputs.iter().any(|id| id.0 == idx) {
                return Err(BackendError::new(format!(
                    "graph disconnected: outputs depend on input {:?} which is not a model input",
                    node.name
                )));
            }
        }
        for &id in inputs {
            if !reached.contains(&id.0) {
                log::warn!("input {:?} does not feed any output", self.nodes[id.0].name);
                reached.insert(id.0);
            }
        }

        // `reached` iterates in arena order, which is topological.
        let order: Vec<usize> = reached.into_iter().collect();
        let position = |arena_idx: usize| order.iter().position(|&i| i == arena_idx);

        let mut names = BTreeSet::new();
        let mut nodes = Vec::with_capacity(order.len());
        for &arena_idx in &order {
            let sym = &self.nodes[arena_idx];
            if !names.insert(sym.name.as_str()) {
                return Err(BackendError::new(format!("duplicate layer name {:?}", sym.name)));
            }
            let node_inputs: Vec<usize> = sym.inputs.iter().filter_map(|&i| position(i)).collect();
            let in_width: usize = sym.inputs.iter().map(|&i| self.nodes[i].features).sum();
            nodes.push(Node {
                name: sym.name.clone(),
                inputs: node_inputs,
                features: sym.features,
                op: Op::init(&sym.params, in_width, rng),
            });
        }

        let map = |ids: &[NodeId]| -> Vec<usize> { ids.iter().filter_map(|id| position(id.0)).collect() };
        Graph::new(nodes, map(inputs), map(outputs))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Dense {
    pub activation: Activation,
    pub in_dim: usize,
    pub out_dim: usize,
    /// Row-major `(out_dim, in_dim)`.
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchNorm {
    pub momentum: f32,
    pub epsilon: f32,
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
    pub moving_mean: Vec<f32>,
    pub moving_variance: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Input,
    Dense(Dense),
    Concatenate,
    BatchNorm(BatchNorm),
    Dropout { rate: f32 },
}

impl Op {
    /// Fresh parameters: Xavier-uniform for saturating activations, He-uniform
    /// for rectifiers, zero biases, identity batch normalisation.
    fn init<R: Rng + ?Sized>(params: &LayerParams, in_dim: usize, rng: &mut R) -> Self {
        match *params {
            LayerParams::Input { .. } => Op::Input,
            LayerParams::Dense { units, activation } => {
                let limit = if activation.is_rectifier() {
                    (6.0 / in_dim as f32).sqrt()
                } else {
                    (6.0 / (in_dim + units) as f32).sqrt()
                };
                let weights = (0..in_dim * units)
                    .map(|_| rng.random_range(-limit..limit))
                    .collect();
                Op::Dense(Dense {
                    activation,
                    in_dim,
                    out_dim: units,
                    weights,
                    biases: vec![0.0; units],
                })
            }
            LayerParams::Concatenate => Op::Concatenate,
            LayerParams::BatchNormalization { momentum, epsilon } => Op::BatchNorm(BatchNorm {
                momentum,
                epsilon,
                gamma: vec![1.0; in_dim],
                beta: vec![0.0; in_dim],
                moving_mean: vec![0.0; in_dim],
                moving_variance: vec![1.0; in_dim],
            }),
            LayerParams::Dropout { rate } => Op::Dropout { rate },
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Op::Input => LayerKind::Input,
            Op::Dense(_) => LayerKind::Dense,
            Op::Concatenate => LayerKind::Concatenate,
            Op::BatchNorm(_) => LayerKind::BatchNormalization,
            Op::Dropout { .. } => LayerKind::Dropout,
        }
    }

    /// `(trainable, non_trainable)` scalar counts.
    pub fn param_count(&self) -> (usize, usize) {
        match self {
            Op::Dense(d) => (d.weights.len() + d.biases.len(), 0),
            Op::BatchNorm(bn) => (
                bn.gamma.len() + bn.beta.len(),
                bn.moving_mean.len() + bn.moving_variance.len(),
            ),
            Op::Input | Op::Concatenate | Op::Dropout { .. } => (0, 0),
        }
    }

    fn trainable_tensors(&self) -> usize {
        match self {
            Op::Dense(_) | Op::BatchNorm(_) => 2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub name: String,
    pub inputs: Vec<usize>,
    pub features: usize,
    pub op: Op,
}

/// Per-node values cached by a training forward pass.
#[derive(Debug, Clone)]
enum Cache {
    None,
    BatchNorm { x_hat: Matrix, inv_std: Vec<f32> },
    Dropout { mask: Vec<f32> },
}

/// Activations of one forward pass.
#[derive(Debug, Clone)]
pub(crate) struct Trace {
    acts: Vec<Matrix>,
    caches: Vec<Cache>,
    outputs: Vec<usize>,
}

impl Trace {
    #[inline]
    pub fn output(&self, k: usize) -> &Matrix {
        &self.acts[self.outputs[k]]
    }

    pub fn into_outputs(mut self) -> Vec<Matrix> {
        self.outputs
            .iter()
            .map(|&o| std::mem::replace(&mut self.acts[o], Matrix::zeros(0, 1)))
            .collect()
    }
}

/// How a forward pass treats stochastic and batch-dependent layers.
pub(crate) enum Mode<'a, R: Rng + ?Sized> {
    /// Batch statistics, dropout masks drawn from the rng, caches kept.
    Train(&'a mut R),
    /// Moving statistics, no dropout.
    Infer,
}

/// A concrete, initialised network.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Graph {
    pub nodes: Vec<Node>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl Graph {
    /// Check the structural invariants shared by assembled and deserialized graphs.
    pub fn new(nodes: Vec<Node>, inputs: Vec<usize>, outputs: Vec<usize>) -> Result<Self, BackendError> {
        for (idx, node) in nodes.iter().enumerate() {
            if node.inputs.iter().any(|&i| i >= idx) {
                return Err(BackendError::new(format!(
                    "layer {:?} is connected to a later layer",
                    node.name
                )));
            }
            if !node.op.kind().arity().accepts(node.inputs.len()) {
                return Err(BackendError::new(format!(
                    "layer {:?} has {} inputs",
                    node.name,
                    node.inputs.len()
                )));
            }
            let in_width: usize = node.inputs.iter().map(|&i| nodes[i].features).sum();
            let ok = match &node.op {
                Op::Input => node.features > 0,
                Op::Dense(d) => {
                    d.in_dim == in_width
                        && d.out_dim == node.features
                        && d.weights.len() == d.in_dim * d.out_dim
                        && d.biases.len() == d.out_dim
                }
                Op::Concatenate => node.features == in_width,
                Op::BatchNorm(bn) => {
                    node.features == in_width
                        && [&bn.gamma, &bn.beta, &bn.moving_mean, &bn.moving_variance]
                            .iter()
                            .all(|v| v.len() == in_width)
                }
                Op::Dropout { .. } => node.features == in_width,
            };
            if !ok {
                return Err(BackendError::new(format!(
                    "layer {:?} has inconsistent shapes",
                    node.name
                )));
            }
        }
        let in_range = |ids: &[usize]| ids.iter().all(|&i| i < nodes.len());
        if !in_range(&inputs) || !in_range(&outputs) {
            return Err(BackendError::new("model references a missing layer"));
        }
        if inputs.iter().any(|&i| nodes[i].op.kind() != LayerKind::Input) {
            return Err(BackendError::new("model inputs must be input layers"));
        }
        Ok(Self {
            nodes,
            inputs,
            outputs,
        })
    }

    pub fn input_features(&self) -> Vec<usize> {
        self.inputs.iter().map(|&i| self.nodes[i].features).collect()
    }

    pub fn output_features(&self) -> Vec<usize> {
        self.outputs.iter().map(|&i| self.nodes[i].features).collect()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|&i| self.nodes[i].name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|&i| self.nodes[i].name.clone()).collect()
    }

    /// Zeroed gradient buffers, one per trainable tensor, in [`Graph::params_mut`] order.
    pub fn gradients(&self) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for node in &self.nodes {
            match &node.op {
                Op::Dense(d) => {
                    out.push(vec![0.0; d.weights.len()]);
                    out.push(vec![0.0; d.biases.len()]);
                }
                Op::BatchNorm(bn) => {
                    out.push(vec![0.0; bn.gamma.len()]);
                    out.push(vec![0.0; bn.beta.len()]);
                }
                _ => {}
            }
        }
        out
    }

    /// Trainable tensors in a fixed order.
    pub fn params_mut(&mut self) -> Vec<&mut [f32]> {
        let mut out = Vec::new();
        for node in &mut self.nodes {
            match &mut node.op {
                Op::Dense(d) => {
                    out.push(d.weights.as_mut_slice());
                    out.push(d.biases.as_mut_slice());
                }
                Op::BatchNorm(bn) => {
                    out.push(bn.gamma.as_mut_slice());
                    out.push(bn.beta.as_mut_slice());
                }
                _ => {}
            }
        }
        out
    }

    /// Run every node on one batch. `inputs` follow the model input order.
    ///
    /// Shape contract: each input has `rows` rows and its layer's width.
    pub fn forward<R: Rng + ?Sized>(&mut self, inputs: &[Matrix], mut mode: Mode<'_, R>) -> Trace {
        assert_eq!(inputs.len(), self.inputs.len(), "one matrix per model input");
        let rows = inputs.first().map_or(0, Matrix::rows);

        let mut acts: Vec<Matrix> = Vec::with_capacity(self.nodes.len());
        let mut caches = Vec::with_capacity(self.nodes.len());

        for idx in 0..self.nodes.len() {
            let node = &mut self.nodes[idx];
            let mut out = Matrix::zeros(rows, node.features);
            let mut cache = Cache::None;

            match &mut node.op {
                Op::Input => {
                    let k = self.inputs.iter().position(|&i| i == idx);
                    if let Some(k) = k {
                        assert_eq!(inputs[k].cols(), node.features, "input width mismatch");
                        out = inputs[k].clone();
                    }
                }
                Op::Dense(d) => {
                    let x = &acts[node.inputs[0]];
                    for r in 0..rows {
                        out.row_mut(r).copy_from_slice(&d.biases);
                    }
                    gemm(
                        rows,
                        d.out_dim,
                        d.in_dim,
                        1.0,
                        View::rows(x.as_slice(), d.in_dim),
                        View::transposed(&d.weights, d.in_dim),
                        1.0,
                        out.as_mut_slice(),
                    );
                    for r in 0..rows {
                        d.activation.forward_row(out.row_mut(r));
                    }
                }
                Op::Concatenate => {
                    let mut offset = 0;
                    for &i in &node.inputs {
                        let x = &acts[i];
                        let w = x.cols();
                        for r in 0..rows {
                            out.row_mut(r)[offset..offset + w].copy_from_slice(x.row(r));
                        }
                        offset += w;
                    }
                }
                Op::BatchNorm(bn) => {
                    let x = &acts[node.inputs[0]];
                    let f = node.features;
                    match &mut mode {
                        Mode::Train(_) if rows > 0 => {
                            let mut mean = vec![0.0_f32; f];
                            let mut var = vec![0.0_f32; f];
                            for r in 0..rows {
                                for (m, &v) in mean.iter_mut().zip(x.row(r)) {
                                    *m += v;
                                }
                            }
                            mean.iter_mut().for_each(|m| *m /= rows as f32);
                            for r in 0..rows {
                                for j in 0..f {
                                    let c = x.row(r)[j] - mean[j];
                                    var[j] = c.mul_add(c, var[j]);
                                }
                            }
                            var.iter_mut().for_each(|v| *v /= rows as f32);

                            let inv_std: Vec<f32> =
                                var.iter().map(|v| 1.0 / (v + bn.epsilon).sqrt()).collect();
                            let mut x_hat = Matrix::zeros(rows, f);
                            for r in 0..rows {
                                for j in 0..f {
                                    let h = (x.row(r)[j] - mean[j]) * inv_std[j];
                                    x_hat.row_mut(r)[j] = h;
                                    out.row_mut(r)[j] = bn.gamma[j].mul_add(h, bn.beta[j]);
                                }
                            }
                            for j in 0..f {
                                bn.moving_mean[j] =
                                    bn.momentum * bn.moving_mean[j] + (1.0 - bn.momentum) * mean[j];
                                bn.moving_variance[j] = bn.momentum * bn.moving_variance[j]
                                    + (1.0 - bn.momentum) * var[j];
                            }
                            cache = Cache::BatchNorm { x_hat, inv_std };
                        }
                        _ => {
                            for r in 0..rows {
                                for j in 0..f {
                                    let h = (x.row(r)[j] - bn.moving_mean[j])
                                        / (bn.moving_variance[j] + bn.epsilon).sqrt();
                                    out.row_mut(r)[j] = bn.gamma[j].mul_add(h, bn.beta[j]);
                                }
                            }
                        }
                    }
                }
                Op::Dropout { rate } => {
                    let x = &acts[node.inputs[0]];
                    out = x.clone();
                    if let Mode::Train(rng) = &mut mode {
                        let keep = 1.0 / (1.0 - *rate);
                        let mask: Vec<f32> = (0..out.as_slice().len())
                            .map(|_| if rng.random::<f32>() < *rate { 0.0 } else { keep })
                            .collect();
                        for (v, m) in out.as_mut_slice().iter_mut().zip(&mask) {
                            *v *= m;
                        }
                        cache = Cache::Dropout { mask };
                    }
                }
            }

            acts.push(out);
            caches.push(cache);
        }

        Trace {
            acts,
            caches,
            outputs: self.outputs.clone(),
        }
    }

    /// Backpropagate `d_outputs` (one per model output) through a training trace.
    ///
    /// Overwrites `grads`, which must come from [`Graph::gradients`].
    pub fn backward(&self, trace: &Trace, d_outputs: &[Matrix], grads: &mut [Vec<f32>]) {
        assert_eq!(d_outputs.len(), self.outputs.len(), "one gradient per model output");
        let rows = trace.acts.first().map_or(0, Matrix::rows);

        let mut d: Vec<Matrix> = self
            .nodes
            .iter()
            .map(|n| Matrix::zeros(rows, n.features))
            .collect();
        for (&o, g) in self.outputs.iter().zip(d_outputs) {
            for (acc, &v) in d[o].as_mut_slice().iter_mut().zip(g.as_slice()) {
                *acc += v;
            }
        }

        let mut slot = grads.len();
        for idx in (0..self.nodes.len()).rev() {
            let node = &self.nodes[idx];
            slot -= node.op.trainable_tensors();
            let (before, rest) = d.split_at_mut(idx);
            let dy = &rest[0];

            match &node.op {
                Op::Input => {}
                Op::Dense(dense) => {
                    let input = node.inputs[0];
                    let x = &trace.acts[input];
                    let y = &trace.acts[idx];
                    let mut dz = Matrix::zeros(rows, dense.out_dim);
                    for r in 0..rows {
                        dense.activation.backward_row(y.row(r), dy.row(r), dz.row_mut(r));
                    }

                    // dW = dZ^T X
                    gemm(
                        dense.out_dim,
                        dense.in_dim,
                        rows,
                        1.0,
                        View::transposed(dz.as_slice(), dense.out_dim),
                        View::rows(x.as_slice(), dense.in_dim),
                        0.0,
                        &mut grads[slot],
                    );
                    let db = &mut grads[slot + 1];
                    db.fill(0.0);
                    for r in 0..rows {
                        for (acc, &g) in db.iter_mut().zip(dz.row(r)) {
                            *acc += g;
                        }
                    }

                    if self.nodes[input].op != Op::Input {
                        // dX += dZ W
                        gemm(
                            rows,
                            dense.in_dim,
                            dense.out_dim,
                            1.0,
                            View::rows(dz.as_slice(), dense.out_dim),
                            View::rows(&dense.weights, dense.in_dim),
                            1.0,
                            before[input].as_mut_slice(),
                        );
                    }
                }
                Op::Concatenate => {
                    let mut offset = 0;
                    for &i in &node.inputs {
                        let w = self.nodes[i].features;
                        for r in 0..rows {
                            let src = &dy.row(r)[offset..offset + w];
                            for (acc, &g) in before[i].row_mut(r).iter_mut().zip(src) {
                                *acc += g;
                            }
                        }
                        offset += w;
                    }
                }
                Op::BatchNorm(bn) => {
                    let input = node.inputs[0];
                    let f = node.features;
                    let (dgamma, dbeta) = {
                        let (a, b) = grads[slot..slot + 2].split_at_mut(1);
                        (&mut a[0], &mut b[0])
                    };
                    dgamma.fill(0.0);
                    dbeta.fill(0.0);
                    let Cache::BatchNorm { x_hat, inv_std } = &trace.caches[idx] else {
                        continue;
                    };
                    let mut sum_dy = vec![0.0_f32; f];
                    let mut sum_dy_xhat = vec![0.0_f32; f];
                    for r in 0..rows {
                        for j in 0..f {
                            let g = dy.row(r)[j];
                            sum_dy[j] += g;
                            sum_dy_xhat[j] = g.mul_add(x_hat.row(r)[j], sum_dy_xhat[j]);
                        }
                    }
                    dbeta.copy_from_slice(&sum_dy);
                    dgamma.copy_from_slice(&sum_dy_xhat);

                    let n = rows as f32;
                    for r in 0..rows {
                        for j in 0..f {
                            let g = dy.row(r)[j];
                            let h = x_hat.row(r)[j];
                            let dx = bn.gamma[j] * inv_std[j] / n
                                * (n * g - sum_dy[j] - h * sum_dy_xhat[j]);
                            before[input].row_mut(r)[j] += dx;
                        }
                    }
                }
                Op::Dropout { .. } => {
                    let input = node.inputs[0];
                    match &trace.caches[idx] {
                        Cache::Dropout { mask } => {
                            for ((acc, &g), &m) in before[input]
                                .as_mut_slice()
                                .iter_mut()
                                .zip(dy.as_slice())
                                .zip(mask)
                            {
                                *acc = g.mul_add(m, *acc);
                            }
                        }
                        _ => {
                            for (acc, &g) in before[input].as_mut_slice().iter_mut().zip(dy.as_slice()) {
                                *acc += g;
                            }
                        }
                    }
                }
            }
        }
    }
}

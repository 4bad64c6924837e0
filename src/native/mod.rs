//! CPU reference implementation of [`ModelBackend`].
//!
//! Layers are recorded symbolically in an arena as the session builds them;
//! `assemble` extracts and initialises the concrete [`graph::Graph`] a
//! [`Network`] owns. Everything is `f32`, row-major and single-threaded.

mod graph;
mod matmul;
mod optim;
mod serde_model;
mod train;

use std::fmt::Write as _;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::backend::{
    Assembled, BackendResult, CompileSpec, Feeds, FitSpec, Loaded, Logs, ModelBackend, PortShape,
};
use crate::callbacks::Callback;
use crate::data::Matrix;
use crate::error::BackendError;
use crate::layers::{LayerKind, LayerParams};

pub use graph::{NodeId, PendingLayer};
pub use serde_model::{MODEL_FORMAT_VERSION, SerializedLayer, SerializedModel, SerializedOp};

use graph::{Arena, Graph};
use optim::OptimizerState;

/// Settings of the native backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Seeds weight initialisation, dropout masks and shuffling.
    pub seed: u64,
    /// Shuffle training rows at the start of every epoch.
    pub shuffle: bool,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Compiled {
    spec: CompileSpec,
    state: OptimizerState,
}

impl Compiled {
    fn new(spec: CompileSpec) -> Self {
        let state = OptimizerState::new(spec.optimizer);
        Self { spec, state }
    }
}

/// A model assembled or loaded by [`NativeBackend`].
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    graph: Graph,
    compiled: Option<Compiled>,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_names(&self) -> Vec<String> {
        self.graph.input_names()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.graph.output_names()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// `(trainable, non_trainable)` scalar counts over every layer.
    pub fn param_count(&self) -> (usize, usize) {
        self.graph
            .nodes
            .iter()
            .map(|n| n.op.param_count())
            .fold((0, 0), |(t, n), (a, b)| (t + a, n + b))
    }
}

#[derive(Debug, Clone)]
pub struct NativeBackend {
    config: NativeConfig,
    arena: Arena,
    rng: StdRng,
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new(NativeConfig::default())
    }
}

impl NativeBackend {
    pub fn new(config: NativeConfig) -> Self {
        Self {
            config,
            arena: Arena::default(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(NativeConfig {
            seed,
            ..NativeConfig::default()
        })
    }

    pub fn config(&self) -> &NativeConfig {
        &self.config
    }
}

/// Order `feeds` by `names`, checking widths and a shared row count.
fn order_feeds(
    what: &str,
    names: &[String],
    widths: &[usize],
    feeds: &Feeds,
    rows: &mut Option<usize>,
) -> BackendResult<Vec<Matrix>> {
    let mut out = Vec::with_capacity(names.len());
    for (name, &width) in names.iter().zip(widths) {
        let m = feeds
            .get(name)
            .ok_or_else(|| BackendError::new(format!("no {what} data for layer {name:?}")))?;
        if m.cols() != width {
            return Err(BackendError::new(format!(
                "{what} {name:?} expects {width} features, got {}",
                m.cols()
            )));
        }
        match *rows {
            Some(r) if r != m.rows() => {
                return Err(BackendError::new(format!(
                    "{what} {name:?} has {} rows, expected {r}",
                    m.rows()
                )));
            }
            _ => *rows = Some(m.rows()),
        }
        if !m.is_finite() {
            return Err(BackendError::new(format!("{what} {name:?} contains non-finite values")));
        }
        out.push(m.clone());
    }
    if rows.is_none_or(|r| r == 0) {
        return Err(BackendError::new("no samples to process"));
    }
    Ok(out)
}

fn check_batch(batch_size: usize) -> BackendResult<()> {
    if batch_size == 0 {
        return Err(BackendError::new("batch_size must be > 0"));
    }
    Ok(())
}

fn ports(graph: &Graph, idx: &[usize]) -> Vec<PortShape> {
    idx.iter()
        .map(|&i| PortShape {
            name: graph.nodes[i].name.clone(),
            shape: vec![None, Some(graph.nodes[i].features)],
        })
        .collect()
}

impl ModelBackend for NativeBackend {
    type Handle = NodeId;
    type Layer = PendingLayer;
    type Model = Network;

    fn input(&mut self, name: &str, features: usize) -> BackendResult<NodeId> {
        self.arena.input(name, features)
    }

    fn build_layer(&mut self, name: &str, params: &LayerParams) -> BackendResult<PendingLayer> {
        if params.kind() == LayerKind::Input {
            return Err(BackendError::new("input layers are created with `input`"));
        }
        Ok(PendingLayer {
            name: name.to_owned(),
            params: params.clone(),
        })
    }

    fn apply(&mut self, layer: PendingLayer, inputs: &[NodeId]) -> BackendResult<NodeId> {
        self.arena.apply(layer, inputs)
    }

    fn discard(&mut self, handle: &NodeId) {
        if !self.arena.discard(*handle) {
            log::debug!("layer handle {} is not the newest, kept", handle.0);
        }
    }

    fn assemble(
        &mut self,
        name: &str,
        inputs: &[NodeId],
        outputs: &[NodeId],
    ) -> BackendResult<Assembled<Network>> {
        let graph = self.arena.extract(inputs, outputs, &mut self.rng)?;
        log::debug!("assembled {:?} with {} layers", name, graph.nodes.len());
        Ok(Assembled {
            output_features: graph.output_features(),
            model: Network {
                name: name.to_owned(),
                graph,
                compiled: None,
            },
            compiled: false,
        })
    }

    fn compile(&mut self, model: &mut Network, spec: &CompileSpec) -> BackendResult<()> {
        let names = model.graph.output_names();
        let given: Vec<&str> = spec.outputs.iter().map(|o| o.name.as_str()).collect();
        if given != names.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(BackendError::new(format!(
                "compile configuration covers {given:?}, model outputs are {names:?}"
            )));
        }
        model.compiled = Some(Compiled::new(spec.clone()));
        Ok(())
    }

    fn fit(
        &mut self,
        model: &mut Network,
        inputs: &Feeds,
        targets: &Feeds,
        spec: &FitSpec,
        callbacks: &[Callback],
    ) -> BackendResult<Vec<Logs>> {
        check_batch(spec.batch_size)?;
        if spec.epochs == 0 {
            return Err(BackendError::new("epochs must be > 0"));
        }
        let Network {
            graph, compiled, ..
        } = model;
        let compiled = compiled
            .as_mut()
            .ok_or_else(|| BackendError::new("model is not compiled"))?;

        let mut rows = None;
        let x = order_feeds("input", &graph.input_names(), &graph.input_features(), inputs, &mut rows)?;
        let y = order_feeds("target", &graph.output_names(), &graph.output_features(), targets, &mut rows)?;

        train::fit(
            graph,
            &compiled.spec,
            &mut compiled.state,
            &x,
            &y,
            spec,
            callbacks,
            self.config.shuffle,
            &mut self.rng,
        )
    }

    fn evaluate(
        &mut self,
        model: &mut Network,
        inputs: &Feeds,
        targets: &Feeds,
        batch_size: usize,
    ) -> BackendResult<Logs> {
        check_batch(batch_size)?;
        let Network {
            graph, compiled, ..
        } = model;
        let compiled = compiled
            .as_ref()
            .ok_or_else(|| BackendError::new("model is not compiled"))?;

        let mut rows = None;
        let x = order_feeds("input", &graph.input_names(), &graph.input_features(), inputs, &mut rows)?;
        let y = order_feeds("target", &graph.output_names(), &graph.output_features(), targets, &mut rows)?;
        Ok(train::evaluate(graph, &compiled.spec, &x, &y, batch_size, ""))
    }

    fn predict(
        &mut self,
        model: &mut Network,
        inputs: &Feeds,
        batch_size: usize,
    ) -> BackendResult<Vec<Matrix>> {
        check_batch(batch_size)?;
        let graph = &mut model.graph;
        let mut rows = None;
        let x = order_feeds("input", &graph.input_names(), &graph.input_features(), inputs, &mut rows)?;
        Ok(train::predict(graph, &x, batch_size))
    }

    fn serialize(&self, model: &Network) -> BackendResult<Vec<u8>> {
        let doc = SerializedModel::from_graph(
            &model.name,
            &model.graph,
            model.compiled.as_ref().map(|c| &c.spec),
        );
        serde_json::to_vec_pretty(&doc).map_err(|e| BackendError::new(e.to_string()))
    }

    fn deserialize(&mut self, bytes: &[u8]) -> BackendResult<Loaded<Network>> {
        let doc: SerializedModel =
            serde_json::from_slice(bytes).map_err(|e| BackendError::new(format!("not a model file: {e}")))?;
        let (name, graph, compile) = doc.into_parts()?;
        let inputs = ports(&graph, &graph.inputs);
        let outputs = ports(&graph, &graph.outputs);
        let compiled = compile.map(Compiled::new);
        Ok(Loaded {
            compiled: compiled.is_some(),
            inputs,
            outputs,
            model: Network {
                name,
                graph,
                compiled,
            },
        })
    }

    /// Graphviz DOT text.
    fn render(&self, model: &Network) -> BackendResult<Vec<u8>> {
        let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", quote(&model.name));
        let _ = writeln!(dot, "  rankdir=TB;");
        let _ = writeln!(dot, "  node [shape=box];");
        for (i, node) in model.graph.nodes.iter().enumerate() {
            let _ = writeln!(
                dot,
                "  n{i} [label=\"{}\\n{}\\n(None, {})\"];",
                quote(&node.name),
                node.op.kind().name(),
                node.features
            );
        }
        for (i, node) in model.graph.nodes.iter().enumerate() {
            for &src in &node.inputs {
                let _ = writeln!(dot, "  n{src} -> n{i};");
            }
        }
        dot.push_str("}\n");
        Ok(dot.into_bytes())
    }

    fn summary(&self, model: &Network) -> BackendResult<String> {
        let graph = &model.graph;
        let rows: Vec<[String; 4]> = graph
            .nodes
            .iter()
            .map(|n| {
                let (t, nt) = n.op.param_count();
                [
                    format!("{} ({})", n.name, n.op.kind().name()),
                    format!("(None, {})", n.features),
                    (t + nt).to_string(),
                    n.inputs
                        .iter()
                        .map(|&i| graph.nodes[i].name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]
            })
            .collect();

        let header = ["Layer (type)", "Output Shape", "Param #", "Connected to"];
        let mut widths = header.map(str::len);
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }
        let total_width = widths.iter().sum::<usize>() + 3 * 3;
        let line = |cells: [&str; 4]| {
            let mut s = String::new();
            for (k, (cell, w)) in cells.iter().zip(widths).enumerate() {
                if k > 0 {
                    s.push_str("   ");
                }
                let _ = write!(s, "{cell:<w$}");
            }
            s.trim_end().to_owned()
        };

        let mut out = String::new();
        let _ = writeln!(out, "Model: \"{}\"", model.name);
        let _ = writeln!(out, "{}", "_".repeat(total_width));
        let _ = writeln!(out, "{}", line(header));
        let _ = writeln!(out, "{}", "=".repeat(total_width));
        for row in &rows {
            let _ = writeln!(out, "{}", line([row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()]));
        }
        let _ = writeln!(out, "{}", "=".repeat(total_width));
        let (trainable, frozen) = model.param_count();
        let _ = writeln!(out, "Total params: {}", trainable + frozen);
        let _ = writeln!(out, "Trainable params: {trainable}");
        let _ = writeln!(out, "Non-trainable params: {frozen}");
        if let Some(c) = &model.compiled {
            let _ = writeln!(out, "Optimizer: {}", c.state.config().kind().name());
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.arena.clear();
        self.rng = StdRng::seed_from_u64(self.config.seed);
    }
}

impl Network {
    /// Operator kinds in topological order.
    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.graph.nodes.iter().map(|n| n.op.kind()).collect()
    }
}

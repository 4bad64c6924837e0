//! The model half of a workbench: a layer graph, its lifecycle and the
//! fit / evaluate / predict workflows, all mediated by a [`ModelBackend`].
//!
//! Every operation either completes or returns an [`Error`] without changing
//! the session. Phase gating:
//!
//! | phase | enabled |
//! |---|---|
//! | `Empty` | `upload`, `set_name`, `set_layer`, `delete_last_layer`, `set_outputs`, `create` |
//! | `Drafting` | `set_name`, `set_layer`, `delete_last_layer`, `set_outputs`, `create` |
//! | `Built` | bindings, optimizer / loss / metrics / callbacks, `compile`, inspection |
//! | `Compiled` | as `Built`, plus `fit`, `evaluate`, `predict` |
//! | `Trained` | as `Compiled`, plus `plot_history` |
//!
//! `reset_state` is always available.

mod graph;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::backend::{CompileSpec, Feeds, FitSpec, Logs, ModelBackend, OutputCompile, PortShape};
use crate::callbacks::{Callback, CallbackKind, CallbackSet};
use crate::error::BackendError;
use crate::history::{EpochRecord, History};
use crate::layers::{LayerKind, LayerParams};
use crate::loss::LossKind;
use crate::metrics::MetricKind;
use crate::native::NativeBackend;
use crate::optim::{OptimizerConfig, OptimizerKind};
use crate::params::Params;
use crate::table::Table;
use crate::views::{self, ChartSpec};
use crate::{Error, Result};

pub use graph::{LayerNode, Phase, Port, Side};

use graph::LayerGraph;

/// Display name used until [`ModelSession::set_name`] picks another.
pub const DEFAULT_MODEL_NAME: &str = "model";

const NO_MODEL: &str = "no model has been created";

fn model_err(e: BackendError) -> Error {
    Error::Model(e.0)
}

/// Builds, configures and drives one model.
pub struct ModelSession<B: ModelBackend = NativeBackend> {
    backend: B,
    name: String,
    phase: Phase,
    graph: LayerGraph<B::Handle>,
    /// Output layers in the user's order, as chosen by `set_outputs`.
    output_layers: Vec<String>,
    model: Option<B::Model>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    optimizer: Option<OptimizerConfig>,
    losses: BTreeMap<String, LossKind>,
    metrics: BTreeMap<String, Vec<MetricKind>>,
    callbacks: CallbackSet,
    history: History,
}

impl<B: ModelBackend + Default> Default for ModelSession<B> {
    fn default() -> Self {
        Self::with_backend(B::default())
    }
}

impl ModelSession<NativeBackend> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: ModelBackend> ModelSession<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            name: DEFAULT_MODEL_NAME.to_owned(),
            phase: Phase::Empty,
            graph: LayerGraph::default(),
            output_layers: Vec::new(),
            model: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            optimizer: None,
            losses: BTreeMap::new(),
            metrics: BTreeMap::new(),
            callbacks: CallbackSet::new(),
            history: History::new(),
        }
    }

    // ---- gating -------------------------------------------------------

    fn require_drafting(&self, op: &str) -> Result<()> {
        if self.phase.is_drafting() {
            Ok(())
        } else {
            Err(self.rejected(format!("cannot {op}: the model has already been {}", self.phase)))
        }
    }

    fn require_built(&self, op: &str) -> Result<()> {
        if self.phase.is_built() {
            Ok(())
        } else {
            Err(self.rejected(format!("cannot {op}: the model has not been created")))
        }
    }

    fn require_compiled(&self, op: &str) -> Result<()> {
        if self.phase.is_compiled() {
            Ok(())
        } else {
            Err(self.rejected(format!("cannot {op}: the model is not compiled")))
        }
    }

    fn rejected(&self, message: String) -> Error {
        log::debug!("{message} (phase {})", self.phase);
        Error::Model(message)
    }

    fn model_ref(&self) -> Result<&B::Model> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Model(NO_MODEL.to_owned()))
    }

    // ---- drafting -----------------------------------------------------

    /// Set the display name used when the model is created. An empty name
    /// restores the default.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.require_drafting("rename")?;
        let name = name.trim();
        self.name = if name.is_empty() {
            DEFAULT_MODEL_NAME.to_owned()
        } else {
            name.to_owned()
        };
        Ok(())
    }

    /// Add a layer of registry kind `kind`, wired to the `connections` layers.
    ///
    /// Fails with [`Error::Set`] for an unknown kind, an empty or taken name,
    /// invalid parameters, or an Input layer given a connection, and with
    /// [`Error::Layer`] when the connection count does not fit the kind, a
    /// connection is not a layer, or the backend refuses the layer.
    pub fn set_layer(
        &mut self,
        kind: &str,
        name: &str,
        params: &Params,
        connections: &[&str],
    ) -> Result<()> {
        self.require_drafting("add a layer")?;
        let kind = LayerKind::from_name(kind)?;
        if name.is_empty() {
            return Err(Error::Set("layer name must not be empty".to_owned()));
        }
        if self.graph.contains(name) {
            return Err(Error::Set(format!("a layer named {name:?} already exists")));
        }
        let params = LayerParams::from_params(kind, params)?;

        let handle = match params.input_features() {
            Some(features) => {
                if !connections.is_empty() {
                    return Err(Error::Set(format!(
                        "input layer {name:?} cannot be connected to other layers"
                    )));
                }
                self.backend
                    .input(name, features)
                    .map_err(|e| Error::Layer(e.0))?
            }
            None => {
                if !kind.arity().accepts(connections.len()) {
                    return Err(Error::Layer(format!(
                        "{} layer {name:?} cannot take {} connections",
                        kind.name(),
                        connections.len()
                    )));
                }
                let upstream = self
                    .graph
                    .handles(connections)
                    .map_err(|missing| Error::Layer(format!("no layer named {missing:?} to connect to")))?;
                let layer = self
                    .backend
                    .build_layer(name, &params)
                    .map_err(|e| Error::Layer(e.0))?;
                self.backend
                    .apply(layer, &upstream)
                    .map_err(|e| Error::Layer(e.0))?
            }
        };

        log::debug!("added {} layer {name:?}", kind.name());
        self.graph.push(
            name.to_owned(),
            params,
            connections.iter().map(|c| (*c).to_owned()).collect(),
            handle,
        );
        self.phase = Phase::Drafting;
        Ok(())
    }

    /// Remove the most recently added layer, and its output marking.
    pub fn delete_last_layer(&mut self) -> Result<()> {
        self.require_drafting("delete a layer")?;
        let node = self
            .graph
            .pop()
            .ok_or_else(|| Error::Delete("there are no layers to delete".to_owned()))?;
        self.output_layers.retain(|o| o != node.name());
        self.backend.discard(node.handle());
        log::debug!("deleted layer {:?}", node.name());
        Ok(())
    }

    /// Choose the output layers, in order.
    pub fn set_outputs(&mut self, names: &[&str]) -> Result<()> {
        self.require_drafting("set outputs")?;
        if names.is_empty() {
            return Err(Error::Set("select at least one output layer".to_owned()));
        }
        let mut seen = BTreeSet::new();
        for &name in names {
            let node = self
                .graph
                .get(name)
                .ok_or_else(|| Error::Set(format!("no layer named {name:?}")))?;
            if node.kind() == LayerKind::Input {
                return Err(Error::Set(format!("input layer {name:?} cannot be an output")));
            }
            if !seen.insert(name) {
                return Err(Error::Set(format!("{name:?} is listed twice")));
            }
        }
        self.output_layers = names.iter().map(|n| (*n).to_owned()).collect();
        Ok(())
    }

    /// Assemble the model from every Input layer and the chosen outputs.
    pub fn create(&mut self) -> Result<()> {
        self.require_drafting("create the model")?;
        let input_names = self.graph.input_names();
        if input_names.is_empty() {
            return Err(Error::Create("the model has no input layer".to_owned()));
        }
        if self.output_layers.is_empty() {
            return Err(Error::Create("no output layers have been selected".to_owned()));
        }
        let to_create = |missing: &str| Error::Create(format!("no layer named {missing:?}"));
        let ins = self.graph.handles(&input_names).map_err(to_create)?;
        let outs = self.graph.handles(&self.output_layers).map_err(to_create)?;

        let assembled = self
            .backend
            .assemble(&self.name, &ins, &outs)
            .map_err(|e| Error::Create(e.0))?;
        if assembled.output_features.len() != self.output_layers.len() {
            return Err(Error::Create(format!(
                "backend reported {} output shapes for {} outputs",
                assembled.output_features.len(),
                self.output_layers.len()
            )));
        }

        self.inputs = input_names
            .iter()
            .map(|name| {
                let features = self
                    .graph
                    .get(name)
                    .and_then(|n| n.params().input_features())
                    .unwrap_or_default();
                Port::new(name.clone(), features)
            })
            .collect();
        self.outputs = self
            .output_layers
            .iter()
            .zip(&assembled.output_features)
            .map(|(name, &features)| Port::new(name.clone(), features))
            .collect();
        self.model = Some(assembled.model);
        self.phase = if assembled.compiled {
            Phase::Compiled
        } else {
            Phase::Built
        };
        log::info!(
            "created model {:?}: {} inputs, {} outputs, {} layers",
            self.name,
            self.inputs.len(),
            self.outputs.len(),
            self.graph.len()
        );
        Ok(())
    }

    /// Load a serialized model instead of drafting one.
    ///
    /// Every input and output must have shape `(batch, features)`. A model
    /// saved after compiling comes back compiled.
    pub fn upload(&mut self, buffer: &[u8]) -> Result<()> {
        if self.phase != Phase::Empty {
            return Err(self.rejected(format!(
                "cannot upload a model: the session is {}; reset it first",
                self.phase
            )));
        }
        let loaded = self
            .backend
            .deserialize(buffer)
            .map_err(|e| Error::bad_model(e.0))
            .inspect_err(|e| log::debug!("model upload rejected: {e}"))?;

        let to_port = |p: &PortShape| match p.shape.as_slice() {
            [None, Some(n)] if *n > 0 => Ok(Port::new(p.name.clone(), *n)),
            shape => Err(Error::bad_model(format!(
                "layer {:?} has shape {shape:?}; only (batch, features) is supported",
                p.name
            ))),
        };
        let inputs = loaded.inputs.iter().map(to_port).collect::<Result<Vec<_>>>()?;
        let outputs = loaded.outputs.iter().map(to_port).collect::<Result<Vec<_>>>()?;
        if inputs.is_empty() || outputs.is_empty() {
            return Err(Error::bad_model("the model has no inputs or no outputs"));
        }

        self.output_layers = outputs.iter().map(|p| p.name().to_owned()).collect();
        self.inputs = inputs;
        self.outputs = outputs;
        self.model = Some(loaded.model);
        self.phase = if loaded.compiled {
            Phase::Compiled
        } else {
            Phase::Built
        };
        log::info!(
            "uploaded model: {} inputs, {} outputs, {}",
            self.inputs.len(),
            self.outputs.len(),
            if loaded.compiled { "compiled" } else { "not compiled" }
        );
        Ok(())
    }

    // ---- bindings -----------------------------------------------------

    fn ports(&self, side: Side) -> &[Port] {
        match side {
            Side::Input => &self.inputs,
            Side::Output => &self.outputs,
        }
    }

    fn port(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().chain(&self.outputs).find(|p| p.name() == name)
    }

    /// Bind `columns`, in order, to the `side` layer `layer`, replacing any
    /// prior binding.
    pub fn set_features<S: AsRef<str>>(&mut self, layer: &str, columns: &[S], side: Side) -> Result<()> {
        self.require_built("bind features")?;
        if columns.is_empty() {
            return Err(Error::Set(format!("select at least one column for {layer:?}")));
        }
        let mut seen = BTreeSet::new();
        for c in columns {
            if !seen.insert(c.as_ref()) {
                return Err(Error::Set(format!("column {:?} is selected twice", c.as_ref())));
            }
        }
        let ports = match side {
            Side::Input => &mut self.inputs,
            Side::Output => &mut self.outputs,
        };
        let port = ports
            .iter_mut()
            .find(|p| p.name() == layer)
            .ok_or_else(|| Error::Set(format!("{layer:?} is not an {side} layer")))?;
        if columns.len() > port.feature_count() {
            return Err(Error::Set(format!(
                "{layer:?} takes {} features, {} columns selected",
                port.feature_count(),
                columns.len()
            )));
        }
        port.bind(columns.iter().map(|c| c.as_ref().to_owned()).collect());
        Ok(())
    }

    pub fn feature_count(&self, layer: &str) -> Option<usize> {
        self.port(layer).map(Port::feature_count)
    }

    /// Bound columns of an input or output layer.
    pub fn features(&self, layer: &str) -> Option<&[String]> {
        self.port(layer).map(Port::columns)
    }

    pub fn configured(&self, layer: &str) -> bool {
        self.port(layer).is_some_and(Port::configured)
    }

    pub fn input_configured(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(Port::configured)
    }

    pub fn output_configured(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(Port::configured)
    }

    // ---- compile settings ----------------------------------------------

    pub fn set_optimizer(&mut self, kind: &str, params: &Params) -> Result<()> {
        self.require_built("set the optimizer")?;
        let kind = OptimizerKind::from_name(kind)?;
        self.optimizer = Some(OptimizerConfig::from_params(kind, params)?);
        Ok(())
    }

    fn output_port(&self, layer: &str) -> Result<&Port> {
        self.outputs
            .iter()
            .find(|p| p.name() == layer)
            .ok_or_else(|| Error::Set(format!("{layer:?} is not an output layer")))
    }

    pub fn set_loss(&mut self, layer: &str, kind: &str) -> Result<()> {
        self.require_built("set a loss")?;
        self.output_port(layer)?;
        let kind = LossKind::from_name(kind)?;
        self.losses.insert(layer.to_owned(), kind);
        Ok(())
    }

    pub fn get_loss(&self, layer: &str) -> Option<LossKind> {
        self.losses.get(layer).copied()
    }

    /// Replace the metrics of an output layer; an empty list clears them.
    pub fn set_metrics(&mut self, layer: &str, kinds: &[&str]) -> Result<()> {
        self.require_built("set metrics")?;
        self.output_port(layer)?;
        let mut parsed: Vec<MetricKind> = Vec::with_capacity(kinds.len());
        for &k in kinds {
            let kind = MetricKind::from_name(k)?;
            if !parsed.contains(&kind) {
                parsed.push(kind);
            }
        }
        self.metrics.insert(layer.to_owned(), parsed);
        Ok(())
    }

    pub fn get_metrics(&self, layer: &str) -> &[MetricKind] {
        self.metrics.get(layer).map(Vec::as_slice).unwrap_or_default()
    }

    /// Configure a callback, replacing any earlier one of the same kind.
    pub fn set_callback(&mut self, kind: &str, params: &Params) -> Result<()> {
        self.require_built("set a callback")?;
        let kind = CallbackKind::from_name(kind)?;
        self.callbacks.set(Callback::from_params(kind, params)?);
        Ok(())
    }

    /// The configured callback of `kind`, if any. Unknown kinds have none.
    pub fn get_callback(&self, kind: &str) -> Option<&Callback> {
        CallbackKind::from_name(kind)
            .ok()
            .and_then(|k| self.callbacks.get(k))
    }

    pub fn delete_callback(&mut self, kind: &str) -> Result<()> {
        self.require_built("delete a callback")?;
        let kind = CallbackKind::from_name(kind)?;
        self.callbacks
            .remove(kind)
            .map(|_| ())
            .ok_or_else(|| Error::Delete(format!("no {} callback is set", kind.name())))
    }

    /// Compile with the current optimizer, losses and metrics.
    ///
    /// Recompiling a trained model keeps its weights and history.
    pub fn compile(&mut self) -> Result<()> {
        self.require_built("compile")?;
        let optimizer = self
            .optimizer
            .ok_or_else(|| self.rejected("cannot compile: no optimizer has been set".to_owned()))?;
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for port in &self.outputs {
            let loss = self.losses.get(port.name()).copied().ok_or_else(|| {
                self.rejected(format!("cannot compile: output {:?} has no loss", port.name()))
            })?;
            outputs.push(OutputCompile {
                name: port.name().to_owned(),
                loss,
                metrics: self.get_metrics(port.name()).to_vec(),
            });
        }
        let spec = CompileSpec { optimizer, outputs };

        self.with_model(|backend, model| backend.compile(model, &spec))?;
        if self.phase != Phase::Trained {
            self.phase = Phase::Compiled;
        }
        log::info!("compiled {:?} with {}", self.name, optimizer.kind().name());
        Ok(())
    }

    // ---- workflows ----------------------------------------------------

    fn feeds(&self, table: &Table, side: Side) -> Result<Feeds> {
        let mut feeds = Feeds::new();
        for port in self.ports(side) {
            if !port.configured() {
                return Err(self.rejected(format!(
                    "{side}s not configured: {:?} has {} of {} columns",
                    port.name(),
                    port.columns().len(),
                    port.feature_count()
                )));
            }
            let m = table.project(port.columns()).map_err(|e| match e {
                Error::Model(msg) => Error::Model(format!("{side} {:?}: {msg}", port.name())),
                other => other,
            })?;
            feeds.insert(port.name().to_owned(), m);
        }
        Ok(feeds)
    }

    fn require_rows(table: &Table) -> Result<()> {
        if table.rows() == 0 {
            return Err(Error::Model("the data has no rows".to_owned()));
        }
        Ok(())
    }

    /// Train on `table` and append the epochs run to the history.
    ///
    /// Returns the records appended by this call.
    pub fn fit(
        &mut self,
        table: &Table,
        batch_size: usize,
        epochs: usize,
        validation_split: f32,
    ) -> Result<&[EpochRecord]> {
        self.require_compiled("fit")?;
        let spec = FitSpec::new(batch_size, epochs, validation_split);
        spec.validate()?;
        Self::require_rows(table)?;
        let inputs = self.feeds(table, Side::Input)?;
        let targets = self.feeds(table, Side::Output)?;
        let callbacks = self.callbacks.to_vec();

        let logs = self.with_model(|backend, model| {
            backend.fit(model, &inputs, &targets, &spec, &callbacks)
        })?;

        let before = self.history.len();
        let ran = logs.len();
        self.history.extend(logs);
        self.phase = Phase::Trained;
        log::info!(
            "trained {:?} for {ran} epochs ({} in total)",
            self.name,
            self.history.len()
        );
        Ok(&self.history.records()[before..])
    }

    /// Loss and metric values over `table`.
    pub fn evaluate(&mut self, table: &Table, batch_size: usize) -> Result<Logs> {
        self.require_compiled("evaluate")?;
        crate::backend::validate_batch_size(batch_size)?;
        Self::require_rows(table)?;
        let inputs = self.feeds(table, Side::Input)?;
        let targets = self.feeds(table, Side::Output)?;
        self.with_model(|backend, model| backend.evaluate(model, &inputs, &targets, batch_size))
    }

    /// Predictions for every row of `table`, one table per output layer.
    ///
    /// Only the inputs need to be bound. Prediction columns take the names of
    /// the bound output columns when there are any, `<layer>_<i>` otherwise.
    pub fn predict(&mut self, table: &Table, batch_size: usize) -> Result<Vec<Table>> {
        self.require_compiled("predict")?;
        crate::backend::validate_batch_size(batch_size)?;
        Self::require_rows(table)?;
        let inputs = self.feeds(table, Side::Input)?;
        let matrices = self.with_model(|backend, model| backend.predict(model, &inputs, batch_size))?;
        if matrices.len() != self.outputs.len() {
            return Err(Error::Model(format!(
                "backend returned {} predictions for {} outputs",
                matrices.len(),
                self.outputs.len()
            )));
        }

        self.outputs
            .iter()
            .zip(&matrices)
            .map(|(port, m)| {
                let names: Vec<String> = if port.configured() {
                    port.columns().to_vec()
                } else {
                    (0..m.cols()).map(|j| format!("{}_{j}", port.name())).collect()
                };
                Table::from_matrix(&names, m)
            })
            .collect()
    }

    fn with_model<T>(
        &mut self,
        f: impl FnOnce(&mut B, &mut B::Model) -> std::result::Result<T, BackendError>,
    ) -> Result<T> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| Error::Model(NO_MODEL.to_owned()))?;
        f(&mut self.backend, model).map_err(model_err)
    }

    // ---- history and inspection -----------------------------------------

    pub fn history(&self) -> &History {
        &self.history
    }

    /// `epoch` plus one column per log.
    pub fn history_table(&self) -> Result<Table> {
        self.history.to_table()
    }

    pub fn plot_history(&self, log_names: &[&str], points: bool) -> Result<ChartSpec> {
        views::plot_history(&self.history, log_names, points)
    }

    /// Serialized model in the backend's container format.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        self.require_built("serialize the model")?;
        self.backend.serialize(self.model_ref()?).map_err(model_err)
    }

    /// Architecture diagram as rendered by the backend.
    pub fn graph(&self) -> Result<Vec<u8>> {
        self.require_built("draw the model")?;
        self.backend.render(self.model_ref()?).map_err(model_err)
    }

    pub fn summary(&self) -> Result<String> {
        self.require_built("summarize the model")?;
        self.backend.summary(self.model_ref()?).map_err(model_err)
    }

    /// Write [`as_bytes`](Self::as_bytes) to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.as_bytes()?;
        std::fs::write(path.as_ref(), bytes)
            .map_err(|e| Error::Model(format!("cannot write {}: {e}", path.as_ref().display())))
    }

    /// [`upload`](Self::upload) the contents of `path`.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| Error::bad_model(format!("cannot read {}: {e}", path.as_ref().display())))?;
        self.upload(&bytes)
    }

    /// Forget everything and return to [`Phase::Empty`].
    pub fn reset_state(&mut self) {
        self.backend.reset();
        self.name = DEFAULT_MODEL_NAME.to_owned();
        self.phase = Phase::Empty;
        self.graph.clear();
        self.output_layers.clear();
        self.model = None;
        self.inputs.clear();
        self.outputs.clear();
        self.optimizer = None;
        self.losses.clear();
        self.metrics.clear();
        self.callbacks = CallbackSet::new();
        self.history.clear();
        log::info!("model session reset");
    }

    // ---- accessors ----------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drafted layers in insertion order. Empty for uploaded models.
    pub fn layers(&self) -> &[LayerNode<B::Handle>] {
        self.graph.nodes()
    }

    /// Output layers chosen with [`set_outputs`](Self::set_outputs), in order.
    pub fn output_layers(&self) -> &[String] {
        &self.output_layers
    }

    /// Input bindings, available once the model is built.
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn is_built(&self) -> bool {
        self.phase.is_built()
    }

    pub fn is_compiled(&self) -> bool {
        self.phase.is_compiled()
    }

    pub fn is_trained(&self) -> bool {
        self.phase == Phase::Trained
    }

    pub fn optimizer(&self) -> Option<&OptimizerConfig> {
        self.optimizer.as_ref()
    }

    pub fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn model(&self) -> Option<&B::Model> {
        self.model.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(n: usize) -> Params {
        Params::new().with("shape", vec![n])
    }

    fn dense(units: usize) -> Params {
        Params::new().with("units", units).with("activation", "relu")
    }

    fn drafted() -> ModelSession {
        let mut s = ModelSession::new();
        s.set_layer("Input", "a", &shape(2), &[]).unwrap();
        s.set_layer("Input", "b", &shape(1), &[]).unwrap();
        s.set_layer("Concatenate", "cat", &Params::new(), &["a", "b"]).unwrap();
        s.set_layer("Dense", "out", &dense(2), &["cat"]).unwrap();
        s
    }

    fn table() -> Table {
        Table::new(vec![
            crate::table::Column::float("x", vec![Some(0.1), Some(0.2), Some(0.3), Some(0.4)]),
            crate::table::Column::float("y", vec![Some(1.0), Some(0.0), Some(1.0), Some(0.0)]),
            crate::table::Column::int("z", vec![1, 2, 3, 4]),
            crate::table::Column::float("t", vec![Some(0.5), Some(0.1), Some(0.9), Some(0.2)]),
        ])
        .unwrap()
    }

    #[test]
    fn layer_validation_maps_to_set_and_layer_errors() {
        let mut s = drafted();
        assert!(matches!(
            s.set_layer("Conv2D", "c", &Params::new(), &[]),
            Err(Error::Set(_))
        ));
        assert!(matches!(s.set_layer("Input", "", &shape(1), &[]), Err(Error::Set(_))));
        assert!(matches!(
            s.set_layer("Input", "c", &shape(1), &["a"]),
            Err(Error::Set(_))
        ));
        assert!(matches!(s.set_layer("Dense", "c", &dense(1), &[]), Err(Error::Layer(_))));
        assert!(matches!(
            s.set_layer("Concatenate", "c", &Params::new(), &["a"]),
            Err(Error::Layer(_))
        ));
        assert!(matches!(
            s.set_layer("Dense", "c", &dense(1), &["nope"]),
            Err(Error::Layer(_))
        ));
        assert!(matches!(
            s.set_layer("Dense", "c", &Params::new(), &["a"]),
            Err(Error::Set(_))
        ));
        assert_eq!(s.layers().len(), 4);
        assert_eq!(s.phase(), Phase::Drafting);
    }

    #[test]
    fn deleting_the_tail_drops_its_output_marking() {
        let mut s = ModelSession::new();
        assert!(matches!(s.delete_last_layer(), Err(Error::Delete(_))));
        let mut s2 = drafted();
        s2.set_outputs(&["out"]).unwrap();
        s2.delete_last_layer().unwrap();
        assert!(s2.output_layers().is_empty());
        assert!(matches!(s2.create(), Err(Error::Create(_))));
        s.set_name("").unwrap();
        assert_eq!(s.name(), DEFAULT_MODEL_NAME);
    }

    #[test]
    fn draft_and_delete_cycles_rebuild_cleanly() {
        let mut s = ModelSession::new();
        s.set_layer("Input", "in", &shape(2), &[]).unwrap();
        for units in 1..=5 {
            s.set_layer("Dense", "out", &dense(units), &["in"]).unwrap();
            s.delete_last_layer().unwrap();
        }
        s.set_layer("Dense", "out", &dense(3), &["in"]).unwrap();
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();
        assert_eq!(s.feature_count("out"), Some(3));
        assert_eq!(s.model().map(|m| m.layer_kinds().len()), Some(2));
    }

    #[test]
    fn create_snapshots_ports() {
        let mut s = drafted();
        assert!(matches!(s.set_outputs(&["a"]), Err(Error::Set(_))));
        assert!(matches!(s.set_outputs(&["out", "out"]), Err(Error::Set(_))));
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();
        assert_eq!(s.phase(), Phase::Built);
        assert_eq!(s.feature_count("a"), Some(2));
        assert_eq!(s.feature_count("b"), Some(1));
        assert_eq!(s.feature_count("out"), Some(2));
        assert!(matches!(
            s.set_layer("Input", "late", &shape(1), &[]),
            Err(Error::Model(_))
        ));
        assert!(matches!(s.upload(b"{}"), Err(Error::Model(_))));
    }

    #[test]
    fn binding_capacity_and_configuration() {
        let mut s = drafted();
        assert!(matches!(s.set_features("a", &["x"], Side::Input), Err(Error::Model(_))));
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();

        assert!(matches!(
            s.set_features("a", &["x", "y", "z"], Side::Input),
            Err(Error::Set(_))
        ));
        assert!(matches!(s.set_features("a", &[] as &[&str], Side::Input), Err(Error::Set(_))));
        assert!(matches!(s.set_features("a", &["x", "x"], Side::Input), Err(Error::Set(_))));
        assert!(matches!(s.set_features("out", &["x"], Side::Input), Err(Error::Set(_))));

        s.set_features("a", &["x"], Side::Input).unwrap();
        assert!(!s.configured("a"));
        s.set_features("a", &["x", "y"], Side::Input).unwrap();
        assert!(s.configured("a"));
        assert!(!s.input_configured());
        s.set_features("b", &["z"], Side::Input).unwrap();
        assert!(s.input_configured());
        assert!(!s.output_configured());
        assert_eq!(s.features("a"), Some(&["x".to_owned(), "y".to_owned()][..]));
    }

    #[test]
    fn compile_requires_optimizer_and_losses() {
        let mut s = drafted();
        s.set_outputs(&["out"]).unwrap();
        assert!(matches!(s.compile(), Err(Error::Model(_))));
        s.create().unwrap();
        assert!(matches!(s.compile(), Err(Error::Model(_))));
        s.set_optimizer("Adam", &Params::new()).unwrap();
        assert!(matches!(s.compile(), Err(Error::Model(_))));
        assert!(matches!(s.set_loss("a", "MeanSquaredError"), Err(Error::Set(_))));
        assert!(matches!(s.set_loss("out", "Hinge"), Err(Error::Set(_))));
        s.set_loss("out", "MeanSquaredError").unwrap();
        assert_eq!(s.get_loss("out"), Some(LossKind::MeanSquaredError));
        s.set_metrics("out", &["MeanAbsoluteError"]).unwrap();
        s.compile().unwrap();
        assert_eq!(s.phase(), Phase::Compiled);
    }

    #[test]
    fn predict_needs_only_inputs_and_fit_needs_both() {
        let mut s = drafted();
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();
        s.set_optimizer("SGD", &Params::new().with("learning_rate", 0.05)).unwrap();
        s.set_loss("out", "MeanSquaredError").unwrap();
        let data = table();
        assert!(matches!(s.predict(&data, 2), Err(Error::Model(_))));
        s.compile().unwrap();
        s.set_features("a", &["x", "y"], Side::Input).unwrap();
        s.set_features("b", &["z"], Side::Input).unwrap();

        let preds = s.predict(&data, 3).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].rows(), 4);
        assert_eq!(preds[0].column_names(), vec!["out_0", "out_1"]);

        assert!(matches!(s.fit(&data, 2, 1, 0.0), Err(Error::Model(_))));
        s.set_features("out", &["t", "x"], Side::Output).unwrap();
        assert!(matches!(s.fit(&data, 0, 1, 0.0), Err(Error::Model(_))));
        let ran = s.fit(&data, 2, 2, 0.0).unwrap().len();
        assert_eq!(ran, 2);
        assert!(s.is_trained());

        s.compile().unwrap();
        assert_eq!(s.phase(), Phase::Trained);
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn callbacks_replace_and_delete() {
        let mut s = drafted();
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();
        let es = Params::new().with("min_delta", 0).with("patience", 0);
        s.set_callback("EarlyStopping", &es).unwrap();
        s.set_callback("EarlyStopping", &es.clone().with("patience", 3)).unwrap();
        assert_eq!(s.callbacks().len(), 1);
        assert!(s.get_callback("EarlyStopping").is_some());
        s.delete_callback("EarlyStopping").unwrap();
        assert!(s.get_callback("EarlyStopping").is_none());
        assert!(matches!(s.delete_callback("EarlyStopping"), Err(Error::Delete(_))));
        assert!(matches!(s.set_callback("ReduceLROnPlateau", &Params::new()), Err(Error::Set(_))));
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut s = drafted();
        s.set_outputs(&["out"]).unwrap();
        s.create().unwrap();
        s.reset_state();
        assert_eq!(s.phase(), Phase::Empty);
        assert!(s.layers().is_empty());
        assert!(s.inputs().is_empty());
        s.set_layer("Input", "a", &shape(3), &[]).unwrap();
        assert_eq!(s.phase(), Phase::Drafting);
    }
}

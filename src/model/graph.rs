//! The session-side layer graph, lifecycle phase and column bindings.

use std::fmt;

use serde::Serialize;

use crate::layers::{LayerKind, LayerParams};

/// Lifecycle of a [`super::ModelSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    /// Nothing built or uploaded.
    Empty,
    /// At least one layer added, model not yet assembled.
    Drafting,
    /// Assembled or uploaded; ready for bindings and compile settings.
    Built,
    Compiled,
    /// Fit at least once.
    Trained,
}

impl Phase {
    /// Layers can still be added or removed.
    pub fn is_drafting(self) -> bool {
        matches!(self, Phase::Empty | Phase::Drafting)
    }

    /// A backend model exists.
    pub fn is_built(self) -> bool {
        self >= Phase::Built
    }

    pub fn is_compiled(self) -> bool {
        self >= Phase::Compiled
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Empty => "empty",
            Phase::Drafting => "drafting",
            Phase::Built => "built",
            Phase::Compiled => "compiled",
            Phase::Trained => "trained",
        })
    }
}

/// Which side of the model a binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Input,
    Output,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Input => "input",
            Side::Output => "output",
        })
    }
}

/// One layer as the session recorded it.
#[derive(Debug, Clone)]
pub struct LayerNode<H> {
    name: String,
    params: LayerParams,
    connections: Vec<String>,
    handle: H,
}

impl<H> LayerNode<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        self.params.kind()
    }

    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    /// Upstream layer names, in connection order.
    pub fn connections(&self) -> &[String] {
        &self.connections
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// Insertion-ordered layers with unique names.
///
/// Every connection names an earlier layer, so insertion order is a
/// topological order and popping the tail never leaves a dangling reference.
#[derive(Debug, Clone)]
pub(crate) struct LayerGraph<H> {
    nodes: Vec<LayerNode<H>>,
}

impl<H> Default for LayerGraph<H> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<H: Clone> LayerGraph<H> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[LayerNode<H>] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&LayerNode<H>> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Handles of `names`, or the first name that is not a layer.
    pub fn handles<'a, S: AsRef<str>>(&self, names: &'a [S]) -> Result<Vec<H>, &'a str> {
        names
            .iter()
            .map(|n| {
                self.get(n.as_ref())
                    .map(|node| node.handle.clone())
                    .ok_or(n.as_ref())
            })
            .collect()
    }

    pub fn push(&mut self, name: String, params: LayerParams, connections: Vec<String>, handle: H) {
        debug_assert!(!self.contains(&name));
        self.nodes.push(LayerNode {
            name,
            params,
            connections,
            handle,
        });
    }

    pub fn pop(&mut self) -> Option<LayerNode<H>> {
        self.nodes.pop()
    }

    /// Input layers in insertion order.
    pub fn input_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == LayerKind::Input)
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// Column binding of a model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    name: String,
    feature_count: usize,
    columns: Vec<String>,
}

impl Port {
    pub(crate) fn new(name: String, feature_count: usize) -> Self {
        Self {
            name,
            feature_count,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Bound column names, in tensor column order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn configured(&self) -> bool {
        self.columns.len() == self.feature_count
    }

    pub(crate) fn bind(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }
}

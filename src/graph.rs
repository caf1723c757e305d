use crate::buffer::Conduit;
use crate::stage::{ExecutionMode, StageId};
use std::sync::Arc;
use tracing::debug;

struct Edge {
    buffer: Arc<dyn Conduit>,
    destination: StageId,
}

struct Node {
    name: String,
    finished: bool,
    edges: Vec<Edge>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Stage adjacency and termination bookkeeping.
///
/// Poisoning is incremental: each finished stage ends the buffers it feeds,
/// their consumers drain and stop, and so on downstream.
#[derive(Default)]
pub(crate) struct WorkerGraph {
    nodes: Vec<Node>,
}

impl WorkerGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// On-request-only stages have no execution unit, so they start out finished
    pub(crate) fn add_node(&mut self, name: &str, mode: ExecutionMode) -> StageId {
        debug!(stage = %name, ?mode, "adding node");
        let id = StageId::new(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            finished: mode == ExecutionMode::OnRequestOnly,
            edges: Vec::new(),
        });
        id
    }

    pub(crate) fn add_edge(&mut self, source: StageId, buffer: Arc<dyn Conduit>, destination: StageId) {
        debug!(
            from = %self.nodes[source.index()].name,
            to = %self.nodes[destination.index()].name,
            "adding edge"
        );
        self.nodes[source.index()].edges.push(Edge {
            buffer,
            destination,
        });
    }

    pub(crate) fn name(&self, id: StageId) -> &str {
        &self.nodes[id.index()].name
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_leaf(&self, id: StageId) -> bool {
        self.nodes[id.index()].is_leaf()
    }

    pub(crate) fn mark_finished(&mut self, id: StageId) {
        self.nodes[id.index()].finished = true;
    }

    /// End every buffer fed by `id`
    pub(crate) fn poison_edges(&self, id: StageId) {
        let node = &self.nodes[id.index()];
        for edge in &node.edges {
            debug!(
                from = %node.name,
                to = %self.nodes[edge.destination.index()].name,
                "poisoning edge"
            );
            edge.buffer.safe_end();
        }
    }

    /// The pipeline is over once every leaf (a stage feeding nothing) has
    /// finished. Non-leaf stages are not checked: they are expected to stop
    /// through poisoning before their downstream leaves do.
    pub(crate) fn is_ended(&self) -> bool {
        self.nodes
            .iter()
            .filter(|node| node.is_leaf())
            .all(|node| node.finished)
    }

    /// Every buffer in the graph, for waking parked threads on interrupt
    pub(crate) fn conduits(&self) -> Vec<Arc<dyn Conduit>> {
        self.nodes
            .iter()
            .flat_map(|node| node.edges.iter().map(|edge| Arc::clone(&edge.buffer)))
            .collect()
    }
}

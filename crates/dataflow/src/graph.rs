//! Immutable data-flow graph over algorithms and data objects.
//!
//! Built once at configuration time from every algorithm's flattened
//! dependency set, then read without locking by the scheduler. Nodes live in
//! two arenas (algorithms, data objects) and edges are indices.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::{debug, warn};

use crate::error::DependencyError;
use crate::holder::DataHandleHolder;
use crate::id::DataObjID;
use crate::visitor::DependencyCollector;

#[cfg(test)]
mod tests;

/// Index of an algorithm node.
pub type AlgIndex = usize;

/// Index of a data-object node.
pub type DataIndex = usize;

#[derive(Debug, Clone)]
pub struct AlgorithmNode {
    pub name: String,
    pub inputs: Vec<DataIndex>,
    pub outputs: Vec<DataIndex>,
    /// Algorithms that must complete before this one may run.
    pub predecessors: Vec<AlgIndex>,
    pub successors: Vec<AlgIndex>,
}

#[derive(Debug, Clone)]
pub struct DataNode {
    pub id: DataObjID,
    pub producer: Option<AlgIndex>,
    pub consumers: Vec<AlgIndex>,
}

/// An input that no algorithm produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedInput {
    pub algorithm: String,
    pub id: DataObjID,
}

#[derive(Debug, Clone)]
pub struct DataFlowGraph {
    algorithms: Vec<AlgorithmNode>,
    data: Vec<DataNode>,
    alg_index: HashMap<String, AlgIndex>,
    data_index: HashMap<DataObjID, DataIndex>,
    order: Vec<AlgIndex>,
    unresolved: Vec<UnresolvedInput>,
}

impl DataFlowGraph {
    pub fn builder() -> DataFlowGraphBuilder {
        DataFlowGraphBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    pub fn algorithm(&self, idx: AlgIndex) -> &AlgorithmNode {
        &self.algorithms[idx]
    }

    pub fn algorithms(&self) -> &[AlgorithmNode] {
        &self.algorithms
    }

    pub fn data_objects(&self) -> &[DataNode] {
        &self.data
    }

    pub fn index_of(&self, name: &str) -> Option<AlgIndex> {
        self.alg_index.get(name).copied()
    }

    pub fn data_node(&self, id: &DataObjID) -> Option<&DataNode> {
        self.data_index.get(id).map(|&i| &self.data[i])
    }

    pub fn producer_of(&self, id: &DataObjID) -> Option<&str> {
        self.data_node(id)
            .and_then(|n| n.producer)
            .map(|p| self.algorithms[p].name.as_str())
    }

    pub fn consumers_of(&self, id: &DataObjID) -> Vec<&str> {
        self.data_node(id)
            .map(|n| {
                n.consumers
                    .iter()
                    .map(|&c| self.algorithms[c].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn predecessors(&self, idx: AlgIndex) -> &[AlgIndex] {
        &self.algorithms[idx].predecessors
    }

    pub fn successors(&self, idx: AlgIndex) -> &[AlgIndex] {
        &self.algorithms[idx].successors
    }

    /// A topological order: every algorithm after all its predecessors.
    pub fn topological_order(&self) -> &[AlgIndex] {
        &self.order
    }

    pub fn unresolved(&self) -> &[UnresolvedInput] {
        &self.unresolved
    }

    /// True if `a` must complete before `b` starts, directly or transitively.
    pub fn precedes(&self, a: AlgIndex, b: AlgIndex) -> bool {
        let mut seen = vec![false; self.algorithms.len()];
        let mut stack = vec![a];
        while let Some(n) = stack.pop() {
            for &s in &self.algorithms[n].successors {
                if s == b {
                    return true;
                }
                if !seen[s] {
                    seen[s] = true;
                    stack.push(s);
                }
            }
        }
        false
    }
}

// ── Builder ───────────────────────────────────────────────────

struct Entry {
    name: String,
    inputs: BTreeSet<DataObjID>,
    outputs: BTreeSet<DataObjID>,
}

/// Accumulates algorithms and their dependency sets, then validates and
/// freezes them into a [`DataFlowGraph`].
#[derive(Default)]
pub struct DataFlowGraphBuilder {
    entries: Vec<Entry>,
    preloaded: BTreeSet<DataObjID>,
    ignore: BTreeSet<DataObjID>,
    strict: bool,
}

impl DataFlowGraphBuilder {
    /// Products available before any algorithm runs.
    pub fn preloaded(mut self, ids: impl IntoIterator<Item = DataObjID>) -> Self {
        self.preloaded.extend(ids);
        self
    }

    /// Keys left out of the graph entirely.
    pub fn ignore(mut self, ids: impl IntoIterator<Item = DataObjID>) -> Self {
        self.ignore.extend(ids);
        self
    }

    /// Fail on inputs with no producer instead of warning.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Add an algorithm, flattening the dependencies of its whole holder tree.
    pub fn add_holder<H: DataHandleHolder + ?Sized>(
        &mut self,
        name: impl Into<String>,
        holder: &H,
    ) -> Result<(), DependencyError> {
        let mut collector = DependencyCollector::with_ignored(self.ignore.iter().cloned());
        crate::visitor::walk(holder, &mut collector);
        self.add_algorithm(
            name,
            collector.inputs().iter().cloned(),
            collector.outputs().iter().cloned(),
        )
    }

    /// Add an algorithm from explicit dependency sets.
    pub fn add_algorithm(
        &mut self,
        name: impl Into<String>,
        inputs: impl IntoIterator<Item = DataObjID>,
        outputs: impl IntoIterator<Item = DataObjID>,
    ) -> Result<(), DependencyError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(DependencyError::DuplicateAlgorithm(name));
        }
        self.entries.push(Entry {
            name,
            inputs: inputs.into_iter().filter(|id| !self.ignore.contains(id)).collect(),
            outputs: outputs.into_iter().filter(|id| !self.ignore.contains(id)).collect(),
        });
        Ok(())
    }

    pub fn build(self) -> Result<DataFlowGraph, DependencyError> {
        let mut graph = DataFlowGraph {
            algorithms: self
                .entries
                .iter()
                .map(|e| AlgorithmNode {
                    name: e.name.clone(),
                    inputs: Vec::new(),
                    outputs: Vec::new(),
                    predecessors: Vec::new(),
                    successors: Vec::new(),
                })
                .collect(),
            data: Vec::new(),
            alg_index: self
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.name.clone(), i))
                .collect(),
            data_index: HashMap::new(),
            order: Vec::new(),
            unresolved: Vec::new(),
        };

        // Producers first, so every input can be resolved in one pass.
        for (alg, entry) in self.entries.iter().enumerate() {
            for id in &entry.outputs {
                let id = primary(id);
                let d = graph.intern(&id);
                if let Some(other) = graph.data[d].producer {
                    if other != alg {
                        return Err(DependencyError::MultipleProducers {
                            id,
                            first: graph.algorithms[other].name.clone(),
                            second: entry.name.clone(),
                        });
                    }
                }
                graph.data[d].producer = Some(alg);
                if !graph.algorithms[alg].outputs.contains(&d) {
                    graph.algorithms[alg].outputs.push(d);
                }
            }
        }

        for (alg, entry) in self.entries.iter().enumerate() {
            for id in &entry.inputs {
                let resolved = id.alternatives().into_iter().find(|alt| {
                    graph.producer_index(alt).is_some() || self.preloaded.contains(alt)
                });
                let target = match resolved {
                    Some(alt) => alt,
                    None => {
                        if self.strict {
                            return Err(DependencyError::UnresolvedInput {
                                algorithm: entry.name.clone(),
                                id: id.clone(),
                            });
                        }
                        warn!(algorithm = %entry.name, id = %id, "input has no producer; assuming it is supplied externally");
                        graph.unresolved.push(UnresolvedInput {
                            algorithm: entry.name.clone(),
                            id: id.clone(),
                        });
                        primary(id)
                    }
                };
                let d = graph.intern(&target);
                if graph.algorithms[alg].inputs.contains(&d) {
                    continue;
                }
                graph.data[d].consumers.push(alg);
                graph.algorithms[alg].inputs.push(d);
                if let Some(producer) = graph.data[d].producer {
                    if producer != alg && !graph.algorithms[alg].predecessors.contains(&producer) {
                        graph.algorithms[alg].predecessors.push(producer);
                        graph.algorithms[producer].successors.push(alg);
                    }
                }
            }
        }

        graph.order = topological_sort(&graph.algorithms)?;
        debug!(
            algorithms = graph.algorithms.len(),
            data_objects = graph.data.len(),
            unresolved = graph.unresolved.len(),
            "built data-flow graph"
        );
        Ok(graph)
    }
}

impl DataFlowGraph {
    fn intern(&mut self, id: &DataObjID) -> DataIndex {
        if let Some(&i) = self.data_index.get(id) {
            return i;
        }
        let i = self.data.len();
        self.data.push(DataNode {
            id: id.clone(),
            producer: None,
            consumers: Vec::new(),
        });
        self.data_index.insert(id.clone(), i);
        i
    }

    fn producer_index(&self, id: &DataObjID) -> Option<AlgIndex> {
        self.data_index.get(id).and_then(|&i| self.data[i].producer)
    }
}

/// Writers with alternative keys write the first one.
fn primary(id: &DataObjID) -> DataObjID {
    id.alternatives().into_iter().next().unwrap_or_else(|| id.clone())
}

/// Topological sort using Kahn's algorithm.
///
/// Ties are broken by insertion order so the result is deterministic.
fn topological_sort(nodes: &[AlgorithmNode]) -> Result<Vec<AlgIndex>, DependencyError> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.predecessors.len()).collect();
    let mut queue: VecDeque<AlgIndex> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop_front() {
        sorted.push(node);
        for &next in &nodes[node].successors {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if sorted.len() != nodes.len() {
        let in_cycle: Vec<&str> = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].name.as_str())
            .collect();
        return Err(DependencyError::CircularDependency(format!(
            "cycle detected among algorithms: {}",
            in_cycle.join(" -> ")
        )));
    }

    Ok(sorted)
}

//! What runs where: the data-flow graph split into the main event and the
//! view nodes.

use std::collections::BTreeMap;

use eventide_core::SchedulerSection;
use eventide_dataflow::{AlgIndex, DataFlowGraph, DataObjID};
use tracing::info;

use super::types::SchedulerError;
use crate::pool::ResourcePool;

#[derive(Debug)]
pub struct ExecutionPlan {
    graph: DataFlowGraph,
    /// Algorithms of the main event, in topological order.
    main: Vec<AlgIndex>,
    /// Algorithms of each view node, in topological order.
    views: BTreeMap<String, Vec<AlgIndex>>,
}

impl ExecutionPlan {
    /// Build the graph from the pool's representative instances. Preloaded
    /// ids are relocated by the pool's path fixer like every declared key.
    ///
    /// Main-event algorithms may not depend on view-node algorithms, and a
    /// view-node algorithm may only depend on the main event or its own node.
    pub fn build(pool: &ResourcePool, config: &SchedulerSection) -> Result<Self, SchedulerError> {
        // Preloaded products move with the keys of their consumers.
        let fixer = pool.path_fixer();
        let mut builder = DataFlowGraph::builder()
            .preloaded(config.preloaded.iter().map(|p| fixer.fix_id(&DataObjID::new(p))))
            .strict(config.strict_data_dependencies);
        for (name, instance) in pool.representatives()? {
            builder.add_holder(name, instance.holder())?;
        }
        let graph = builder.build()?;

        let mut scope: Vec<Option<String>> = Vec::with_capacity(graph.len());
        for node in graph.algorithms() {
            scope.push(pool.view_node_of(&node.name)?);
        }

        for idx in 0..graph.len() {
            for &pred in graph.predecessors(idx) {
                let (Some(pred_node), mine) = (&scope[pred], &scope[idx]) else {
                    continue;
                };
                if mine.as_ref() != Some(pred_node) {
                    return Err(SchedulerError::Config(format!(
                        "'{}' reads output of '{}', which only runs inside view node '{}'",
                        graph.algorithm(idx).name,
                        graph.algorithm(pred).name,
                        pred_node
                    )));
                }
            }
        }

        let mut main = Vec::new();
        let mut views: BTreeMap<String, Vec<AlgIndex>> = pool
            .sequences()?
            .into_iter()
            .filter(|s| s.is_view_node())
            .map(|s| (s.name().to_string(), Vec::new()))
            .collect();
        for &idx in graph.topological_order() {
            match &scope[idx] {
                None => main.push(idx),
                Some(node) => views.entry(node.clone()).or_default().push(idx),
            }
        }

        info!(
            algorithms = graph.len(),
            main = main.len(),
            view_nodes = views.len(),
            unresolved = graph.unresolved().len(),
            "execution plan ready"
        );
        Ok(Self { graph, main, views })
    }

    pub fn graph(&self) -> &DataFlowGraph {
        &self.graph
    }

    pub fn main(&self) -> &[AlgIndex] {
        &self.main
    }

    pub fn view_node(&self, name: &str) -> Option<&[AlgIndex]> {
        self.views.get(name).map(Vec::as_slice)
    }

    pub fn view_nodes(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    pub fn name_of(&self, idx: AlgIndex) -> &str {
        &self.graph.algorithm(idx).name
    }
}

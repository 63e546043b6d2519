use crate::error::DependencyError;
use crate::holder::{DataHandleHolder, HandleRegistry};
use crate::id::{AccessMode, DataObjID};

use super::DataFlowGraph;

fn ids(keys: &[&str]) -> Vec<DataObjID> {
    keys.iter().map(|k| DataObjID::new(*k)).collect()
}

fn none() -> Vec<DataObjID> {
    Vec::new()
}

#[test]
fn linear_chain_orders_producers_first() {
    let mut b = DataFlowGraph::builder().preloaded(ids(&["/Event/Raw"]));
    b.add_algorithm("Fit", ids(&["/Event/Tracks"]), ids(&["/Event/Vertices"])).unwrap();
    b.add_algorithm("Decode", ids(&["/Event/Raw"]), ids(&["/Event/Hits"])).unwrap();
    b.add_algorithm("Track", ids(&["/Event/Hits"]), ids(&["/Event/Tracks"])).unwrap();
    let g = b.build().unwrap();

    let order: Vec<&str> = g
        .topological_order()
        .iter()
        .map(|&i| g.algorithm(i).name.as_str())
        .collect();
    assert_eq!(order, vec!["Decode", "Track", "Fit"]);

    let fit = g.index_of("Fit").unwrap();
    let decode = g.index_of("Decode").unwrap();
    assert!(g.precedes(decode, fit));
    assert!(!g.precedes(fit, decode));
    assert_eq!(g.producer_of(&DataObjID::new("/Event/Hits")), Some("Decode"));
    assert_eq!(g.consumers_of(&DataObjID::new("/Event/Hits")), vec!["Track"]);
    assert!(g.unresolved().is_empty());
}

#[test]
fn independent_branches_have_no_edges() {
    let mut b = DataFlowGraph::builder();
    b.add_algorithm("A", none(), ids(&["/Event/A"])).unwrap();
    b.add_algorithm("B", none(), ids(&["/Event/B"])).unwrap();
    let g = b.build().unwrap();
    assert!(g.predecessors(0).is_empty());
    assert!(g.predecessors(1).is_empty());
}

#[test]
fn two_writers_of_one_object_is_rejected() {
    let mut b = DataFlowGraph::builder();
    b.add_algorithm("A", none(), ids(&["/Event/X"])).unwrap();
    b.add_algorithm("B", none(), ids(&["/Event/X"])).unwrap();
    let err = b.build().unwrap_err();
    match err {
        DependencyError::MultipleProducers { id, first, second } => {
            assert_eq!(id.key(), "/Event/X");
            assert_eq!((first.as_str(), second.as_str()), ("A", "B"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cycle_is_reported_with_algorithm_names() {
    let mut b = DataFlowGraph::builder();
    b.add_algorithm("A", ids(&["/Event/C"]), ids(&["/Event/A"])).unwrap();
    b.add_algorithm("B", ids(&["/Event/A"]), ids(&["/Event/B"])).unwrap();
    b.add_algorithm("C", ids(&["/Event/B"]), ids(&["/Event/C"])).unwrap();
    let msg = b.build().unwrap_err().to_string();
    assert!(msg.contains("cycle"), "got: {msg}");
    assert!(msg.contains('A') && msg.contains('B') && msg.contains('C'), "got: {msg}");
}

#[test]
fn read_modify_does_not_depend_on_itself() {
    let mut b = DataFlowGraph::builder();
    b.add_algorithm("Make", none(), ids(&["/Event/Hits"])).unwrap();
    b.add_algorithm("Calib", ids(&["/Event/Hits", "/Event/Calib"]), ids(&["/Event/Calib"]))
        .unwrap();
    let g = b.build().unwrap();
    let calib = g.index_of("Calib").unwrap();
    assert_eq!(g.predecessors(calib), &[g.index_of("Make").unwrap()]);
}

#[test]
fn unresolved_inputs_warn_by_default_and_fail_when_strict() {
    let mut lax = DataFlowGraph::builder();
    lax.add_algorithm("A", ids(&["/Event/Missing"]), none()).unwrap();
    let g = lax.build().unwrap();
    assert_eq!(g.unresolved().len(), 1);
    assert_eq!(g.unresolved()[0].algorithm, "A");

    let mut strict = DataFlowGraph::builder().strict(true);
    strict.add_algorithm("A", ids(&["/Event/Missing"]), none()).unwrap();
    let err = strict.build().unwrap_err();
    assert!(matches!(err, DependencyError::UnresolvedInput { .. }));
    assert!(err.to_string().contains("/Event/Missing"));
}

#[test]
fn preloaded_inputs_are_not_unresolved() {
    let mut b = DataFlowGraph::builder().strict(true).preloaded(ids(&["/Event/Raw"]));
    b.add_algorithm("A", ids(&["/Event/Raw"]), none()).unwrap();
    assert!(b.build().unwrap().unresolved().is_empty());
}

#[test]
fn alternatives_resolve_to_the_produced_location() {
    let mut b = DataFlowGraph::builder().strict(true);
    b.add_algorithm("Producer", none(), ids(&["/Event/B"])).unwrap();
    b.add_algorithm("Reader", ids(&["/Event/A:/Event/B"]), none()).unwrap();
    let g = b.build().unwrap();
    let reader = g.index_of("Reader").unwrap();
    assert_eq!(g.predecessors(reader), &[g.index_of("Producer").unwrap()]);
}

#[test]
fn duplicate_algorithm_names_are_rejected() {
    let mut b = DataFlowGraph::builder();
    b.add_algorithm("A", none(), none()).unwrap();
    assert!(matches!(
        b.add_algorithm("A", none(), none()),
        Err(DependencyError::DuplicateAlgorithm(_))
    ));
}

struct WithTool {
    registry: HandleRegistry,
    tool: HandleRegistry,
}

impl DataHandleHolder for WithTool {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    fn sub_holders(&self) -> Vec<&dyn DataHandleHolder> {
        vec![&self.tool]
    }
}

#[test]
fn tool_dependencies_are_attributed_to_the_algorithm() {
    let producer = HandleRegistry::new("Producer");
    producer.add_dependency("/Event/Geometry", AccessMode::Write);

    let alg = WithTool {
        registry: HandleRegistry::new("Consumer"),
        tool: HandleRegistry::new("GeometryTool"),
    };
    alg.tool.add_dependency("/Event/Geometry", AccessMode::Read);

    let mut b = DataFlowGraph::builder().strict(true);
    b.add_holder("Producer", &producer).unwrap();
    b.add_holder("Consumer", &alg).unwrap();
    let g = b.build().unwrap();

    let consumer = g.index_of("Consumer").unwrap();
    assert_eq!(g.predecessors(consumer), &[g.index_of("Producer").unwrap()]);
}

#[test]
fn ignored_keys_never_enter_the_graph() {
    let alg = HandleRegistry::new("A");
    alg.add_dependency("/Event/Conditions", AccessMode::Read);
    let mut b = DataFlowGraph::builder()
        .strict(true)
        .ignore(ids(&["/Event/Conditions"]));
    b.add_holder("A", &alg).unwrap();
    let g = b.build().unwrap();
    assert!(g.data_node(&DataObjID::new("/Event/Conditions")).is_none());
}

//! Data dependency declaration and the data-flow graph.
//!
//! Components declare what they read and write through a [`HandleRegistry`];
//! a [`DependencyCollector`] flattens a holder tree (algorithm, its tools,
//! their tools) into one dependency set; [`PathFixer`] relocates keys under a
//! root-in-store prefix; [`DataFlowGraph`] freezes everything into the
//! ordering the scheduler follows.

pub mod error;
pub mod graph;
pub mod handle;
pub mod holder;
pub mod id;
pub mod path;
pub mod store;
pub mod visitor;

pub use error::{DependencyError, StoreError};
pub use graph::{AlgIndex, DataFlowGraph, DataFlowGraphBuilder, UnresolvedInput};
pub use handle::{DataHandle, ReadHandle, WriteHandle};
pub use holder::{DataHandleHolder, HandleRegistry, HolderRef};
pub use id::{AccessMode, DataObjID};
pub use path::{PathFixer, full_location};
pub use store::EventStore;
pub use visitor::{DependencyCollector, DependencyVisitor, walk};

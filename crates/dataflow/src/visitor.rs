//! Walking a holder tree and collecting its flattened dependencies.

use std::collections::{BTreeMap, BTreeSet};

use crate::holder::{DataHandleHolder, HandleRegistry, HolderRef};
use crate::id::DataObjID;

/// Called once per holder in a tree walk.
pub trait DependencyVisitor {
    fn visit(&mut self, holder: &HandleRegistry);
}

/// Depth-first, pre-order walk over `root` and every holder it owns.
pub fn walk<H: DataHandleHolder + ?Sized>(root: &H, visitor: &mut dyn DependencyVisitor) {
    visitor.visit(root.registry());
    for child in root.sub_holders() {
        walk(child, visitor);
    }
}

/// Flattens a holder tree into one input set, one output set, and the
/// holders responsible for each data object.
///
/// Keys listed in the ignore set are kept out of both sets and recorded in
/// [`ignored`](Self::ignored) instead.
#[derive(Debug, Default)]
pub struct DependencyCollector {
    ignore: BTreeSet<DataObjID>,
    inputs: BTreeSet<DataObjID>,
    outputs: BTreeSet<DataObjID>,
    owners: BTreeMap<DataObjID, BTreeSet<HolderRef>>,
    ignored: BTreeSet<DataObjID>,
}

impl DependencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored(ignore: impl IntoIterator<Item = DataObjID>) -> Self {
        Self {
            ignore: ignore.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Collect the whole tree under `root`.
    pub fn collect<H: DataHandleHolder + ?Sized>(root: &H) -> Self {
        let mut collector = Self::new();
        walk(root, &mut collector);
        collector
    }

    pub fn inputs(&self) -> &BTreeSet<DataObjID> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<DataObjID> {
        &self.outputs
    }

    pub fn ignored(&self) -> &BTreeSet<DataObjID> {
        &self.ignored
    }

    /// Holders that read or write `id`.
    pub fn owners_of(&self, id: &DataObjID) -> BTreeSet<&HolderRef> {
        self.owners
            .get(id)
            .map(|o| o.iter().collect())
            .unwrap_or_default()
    }

    /// Names of the holders that read or write `id`, sorted.
    pub fn owner_names_of(&self, id: &DataObjID) -> Vec<&str> {
        let mut names: Vec<&str> = self.owners_of(id).into_iter().map(HolderRef::name).collect();
        names.sort_unstable();
        names
    }

    fn record(&mut self, id: DataObjID, holder: &HolderRef, output: bool) {
        if self.ignore.contains(&id) {
            self.ignored.insert(id);
            return;
        }
        self.owners
            .entry(id.clone())
            .or_default()
            .insert(holder.clone());
        if output {
            self.outputs.insert(id);
        } else {
            self.inputs.insert(id);
        }
    }
}

impl DependencyVisitor for DependencyCollector {
    fn visit(&mut self, holder: &HandleRegistry) {
        for id in holder.input_data_objs() {
            self.record(id, holder.holder(), false);
        }
        for id in holder.output_data_objs() {
            self.record(id, holder.holder(), true);
        }
    }
}

//! Bookkeeping behind the pool's single lock.
//!
//! Nothing in here blocks or awaits; the pool decides whether a contention
//! result is returned to the caller or waited out on its condition variable.

use std::collections::{BTreeMap, HashMap};

use eventide_core::{Lifecycle, State};
use eventide_dataflow::{PathFixer, walk};
use tracing::debug;

use super::{AlgorithmSpec, PoolError, Sequence};
use crate::algorithm::Instance;

pub(super) struct Replica {
    pub instance: Instance,
    pub lifecycle: Lifecycle,
    pub leases: usize,
}

pub(super) struct Entry {
    pub spec: AlgorithmSpec,
    pub clones: Vec<Replica>,
}

impl Entry {
    fn reentrant(&self) -> bool {
        self.spec.cardinality() == 0
    }

    pub fn leased(&self) -> usize {
        self.clones.iter().map(|c| c.leases).sum()
    }
}

#[derive(Default)]
pub(super) struct Ledger {
    pub algorithms: HashMap<String, Entry>,
    pub sequences: HashMap<String, Sequence>,
    /// Algorithms and sequences in registration order.
    pub order: Vec<String>,
    /// Resource name to busy flag.
    pub resources: BTreeMap<String, bool>,
}

impl Ledger {
    pub fn contains(&self, name: &str) -> bool {
        self.algorithms.contains_key(name) || self.sequences.contains_key(name)
    }

    /// Lease an instance of `name` plus every resource it declares, or
    /// nothing at all.
    pub fn try_acquire(
        &mut self,
        name: &str,
        state: State,
        fixer: &PathFixer,
    ) -> Result<Instance, PoolError> {
        let entry = self
            .algorithms
            .get(name)
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;

        if let Some(busy) = entry
            .spec
            .resources()
            .iter()
            .find(|r| self.resources.get(*r).copied().unwrap_or(false))
        {
            return Err(PoolError::ResourceBusy(busy.clone()));
        }

        let idx = match entry.clones.iter().position(|c| entry.reentrant() || c.leases == 0) {
            Some(i) => i,
            None if entry.reentrant() || entry.clones.len() < entry.spec.cardinality() => {
                self.spawn_clone(name, state, fixer)?
            }
            None => {
                return Err(PoolError::NoFreeInstance {
                    name: name.to_string(),
                    cardinality: entry.spec.cardinality(),
                });
            }
        };

        let entry = self
            .algorithms
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;
        let clone = &mut entry.clones[idx];
        clone.leases += 1;
        let instance = clone.instance.clone();
        for r in entry.spec.resources() {
            self.resources.insert(r.clone(), true);
        }
        Ok(instance)
    }

    pub fn release(&mut self, name: &str, instance: &Instance) -> Result<(), PoolError> {
        let entry = self
            .algorithms
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;
        let clone = entry
            .clones
            .iter_mut()
            .find(|c| c.instance.same_instance(instance))
            .filter(|c| c.leases > 0)
            .ok_or_else(|| PoolError::NotAcquired(name.to_string()))?;
        clone.leases -= 1;
        for r in entry.spec.resources() {
            self.resources.insert(r.clone(), false);
        }
        Ok(())
    }

    pub fn try_acquire_resource(&mut self, name: &str) -> Result<(), PoolError> {
        match self.resources.get_mut(name) {
            None => Err(PoolError::UnknownResource(name.to_string())),
            Some(true) => Err(PoolError::ResourceBusy(name.to_string())),
            Some(busy) => {
                *busy = true;
                Ok(())
            }
        }
    }

    pub fn release_resource(&mut self, name: &str) -> Result<(), PoolError> {
        match self.resources.get_mut(name) {
            None => Err(PoolError::UnknownResource(name.to_string())),
            Some(false) => Err(PoolError::NotHeld(name.to_string())),
            Some(busy) => {
                *busy = false;
                Ok(())
            }
        }
    }

    /// Build a new clone of `name` and bring it to `state`.
    pub fn spawn_clone(
        &mut self,
        name: &str,
        state: State,
        fixer: &PathFixer,
    ) -> Result<usize, PoolError> {
        let entry = self
            .algorithms
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;
        let instance = entry
            .spec
            .build()
            .map_err(|source| PoolError::Factory {
                name: name.to_string(),
                source,
            })?;
        walk(instance.holder(), &mut fixer.clone());

        let mut clone = Replica {
            instance,
            lifecycle: Lifecycle::new(),
            leases: 0,
        };
        drive(name, &mut clone, state)?;
        entry.clones.push(clone);
        debug!(algorithm = %name, clones = entry.clones.len(), "created algorithm instance");
        Ok(entry.clones.len() - 1)
    }

    /// Flattened algorithm names under `name`, which may be an algorithm or
    /// a sequence.
    pub fn flatten(&self, name: &str, out: &mut Vec<String>) -> Result<(), PoolError> {
        if self.algorithms.contains_key(name) {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
            return Ok(());
        }
        let seq = self
            .sequences
            .get(name)
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))?;
        for member in seq.members() {
            self.flatten(member, out)?;
        }
        Ok(())
    }

    /// The sequence that lists `name` as a member, if any.
    pub fn parent_of(&self, name: &str) -> Option<&Sequence> {
        self.order
            .iter()
            .filter_map(|n| self.sequences.get(n))
            .find(|s| s.members().iter().any(|m| m == name))
    }
}

/// Step one instance through the state machine until it reaches `target`,
/// running its hooks on the way.
pub(super) fn drive(name: &str, clone: &mut Replica, target: State) -> Result<(), PoolError> {
    while let Some(transition) = clone.lifecycle.state().step_towards(target) {
        let instance = clone.instance.clone();
        clone.lifecycle.apply(transition, |_| {
            use eventide_core::Transition::*;
            let hook = match transition {
                Initialize => instance.initialize(),
                Start => instance.start(),
                Stop => instance.stop(),
                Finalize => instance.finalize(),
                Configure | Terminate => Ok(()),
            };
            hook.map_err(|source| PoolError::Hook {
                name: name.to_string(),
                transition,
                source,
            })
        })?;
    }
    Ok(())
}

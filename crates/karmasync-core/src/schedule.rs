//! Topological write order.
//!
//! Collections are ordered with Kahn's algorithm so that every collection is
//! written after the collections its records reference. Ready collections are
//! taken in key order, which makes the schedule deterministic.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::DependencyError;
use crate::graph::DependencyGraph;

/// The write order of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Collections in write order.
    pub order: Vec<String>,
    /// Collections whose records reference records of the same collection.
    pub self_referential: BTreeSet<String>,
}

impl Schedule {
    /// Whether a collection must be written in a single request.
    pub fn is_self_referential(&self, collection: &str) -> bool {
        self.self_referential.contains(collection)
    }
}

/// Computes schedules from dependency graphs.
pub struct Scheduler;

impl Scheduler {
    /// Order the graph's collections.
    ///
    /// Self-loops do not count as dependencies. Dependencies on collections
    /// outside the graph are taken to exist in the target already.
    /// `required_first` is placed before the computed order, and each
    /// collection appears once.
    pub fn order(
        graph: &DependencyGraph,
        required_first: &[String],
    ) -> Result<Schedule, DependencyError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (collection, deps) in graph.edges() {
            let count = deps
                .iter()
                .filter(|dep| dep.as_str() != collection && graph.contains(dep))
                .inspect(|dep| dependents.entry(dep.as_str()).or_default().push(collection))
                .count();
            in_degree.insert(collection, count);
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(collection, _)| *collection)
            .collect();

        let mut computed = Vec::with_capacity(in_degree.len());
        while let Some(collection) = ready.pop_first() {
            computed.push(collection);
            for dependent in dependents.get(collection).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if computed.len() < in_degree.len() {
            let scheduled: BTreeSet<&str> = computed.iter().copied().collect();
            let collections = in_degree
                .keys()
                .filter(|c| !scheduled.contains(*c))
                .map(|c| c.to_string())
                .collect();
            return Err(DependencyError::Cycle { collections });
        }

        let mut seen = BTreeSet::new();
        let order: Vec<String> = required_first
            .iter()
            .map(String::as_str)
            .chain(computed)
            .filter(|c| seen.insert(*c))
            .map(str::to_string)
            .collect();

        let self_referential = graph
            .nodes()
            .filter(|c| graph.is_self_referential(c))
            .map(str::to_string)
            .collect();

        debug!(collections = order.len(), "Computed schedule");
        Ok(Schedule {
            order,
            self_referential,
        })
    }
}

//! Load-order resolution for manifest modules.
//!
//! A manifest's module list is its load order. [`LoadPlan`] checks that the
//! order is consistent with the declared dependencies and groups modules into
//! waves that may be fetched in parallel.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::error::ManifestError;
use super::types::ModuleRef;

/// A validated dependency graph over a manifest's modules.
///
/// Edges run from dependency to dependent. Node weights are positions in the
/// manifest's module list.
#[derive(Debug)]
pub struct LoadPlan<'a> {
  modules: &'a [ModuleRef],
  graph: DiGraph<usize, ()>,
  nodes: HashMap<&'a str, NodeIndex>,
}

impl<'a> LoadPlan<'a> {
  /// Build and validate the plan for `modules`.
  ///
  /// # Errors
  ///
  /// - `EmptyModuleId`, `DuplicateModule` for malformed ids
  /// - `UnknownDependency`, `SelfDependency` for bad dependency lists
  /// - `Cycle` if the dependencies admit no total order
  /// - `OutOfOrder` if a dependency is listed after its dependent
  pub fn from_modules(modules: &'a [ModuleRef]) -> Result<Self, ManifestError> {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<&'a str, NodeIndex> = HashMap::new();

    for (index, module) in modules.iter().enumerate() {
      if module.id.is_empty() {
        return Err(ManifestError::EmptyModuleId { index });
      }
      let idx = graph.add_node(index);
      if nodes.insert(module.id.as_str(), idx).is_some() {
        return Err(ManifestError::DuplicateModule { id: module.id.clone() });
      }
    }

    for module in modules {
      let dependent = nodes[module.id.as_str()];
      for dep in &module.depends_on {
        if dep == &module.id {
          return Err(ManifestError::SelfDependency { id: module.id.clone() });
        }
        let Some(&dependency) = nodes.get(dep.as_str()) else {
          return Err(ManifestError::UnknownDependency {
            id: module.id.clone(),
            dependency: dep.clone(),
          });
        };
        graph.add_edge(dependency, dependent, ());
      }
    }

    toposort(&graph, None).map_err(|cycle| ManifestError::Cycle {
      id: modules[graph[cycle.node_id()]].id.clone(),
    })?;

    let plan = Self { modules, graph, nodes };
    plan.verify_listed_order()?;
    Ok(plan)
  }

  /// Every dependency must appear before its dependent in the module list.
  fn verify_listed_order(&self) -> Result<(), ManifestError> {
    for idx in self.graph.node_indices() {
      let position = self.graph[idx];
      for dep_idx in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if self.graph[dep_idx] > position {
          return Err(ManifestError::OutOfOrder {
            id: self.modules[position].id.clone(),
            dependency: self.modules[self.graph[dep_idx]].id.clone(),
          });
        }
      }
    }
    Ok(())
  }

  /// Modules in load order, one at a time.
  pub fn load_order(&self) -> impl Iterator<Item = &'a ModuleRef> {
    self.modules.iter()
  }

  /// Group modules into waves.
  ///
  /// Every module's dependencies are in earlier waves, so modules within a
  /// wave may be fetched in parallel. Within a wave, manifest order is kept.
  ///
  /// # Example
  ///
  /// For `core`, `net (core)`, `ui (core)`, `app (net, ui)`:
  /// - Wave 0: [core]
  /// - Wave 1: [net, ui]
  /// - Wave 2: [app]
  pub fn waves(&self) -> Vec<Vec<&'a ModuleRef>> {
    // Dependencies precede dependents, so one pass in list order suffices.
    let mut level = vec![0usize; self.modules.len()];
    for (position, module) in self.modules.iter().enumerate() {
      let idx = self.nodes[module.id.as_str()];
      level[position] = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .map(|dep_idx| level[self.graph[dep_idx]] + 1)
        .max()
        .unwrap_or(0);
    }

    let wave_count = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut waves: Vec<Vec<&'a ModuleRef>> = vec![Vec::new(); wave_count];
    for (position, module) in self.modules.iter().enumerate() {
      waves[level[position]].push(module);
    }
    waves
  }

  /// Direct dependencies of a module, in manifest order.
  pub fn dependencies(&self, id: &str) -> Vec<&'a ModuleRef> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };

    let mut deps: Vec<usize> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep_idx| self.graph[dep_idx])
      .collect();
    deps.sort_unstable();
    deps.dedup();
    deps.into_iter().map(|position| &self.modules[position]).collect()
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }
}

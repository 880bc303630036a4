//
// dependency.rs
//
// Project dependency graph used for semantic change propagation
//

use std::collections::{HashMap, HashSet};

use crate::solution::{ProjectId, Solution};

/// Reverse project-reference index derived from a solution snapshot.
///
/// An edge `A -> B` in `dependents` means B references A, so a semantic change
/// in A is visible from B.
#[derive(Debug, Default)]
pub struct ProjectDependencyGraph {
    /// Referenced project -> projects that reference it, in solution order
    dependents: HashMap<ProjectId, Vec<ProjectId>>,
}

impl ProjectDependencyGraph {
    pub fn from_solution(solution: &Solution) -> Self {
        let mut dependents: HashMap<ProjectId, Vec<ProjectId>> = HashMap::new();
        for project in solution.projects() {
            for reference in &project.project_references {
                // References to projects outside the snapshot are dangling; ignore them
                if solution.project(reference).is_none() {
                    continue;
                }
                let entry = dependents.entry(*reference).or_default();
                if !entry.contains(&project.id) {
                    entry.push(project.id);
                }
            }
        }
        Self { dependents }
    }

    /// Projects that reference `id` directly
    pub fn direct_dependents(&self, id: &ProjectId) -> Vec<ProjectId> {
        self.dependents.get(id).cloned().unwrap_or_default()
    }

    /// All projects that depend on `id` directly or indirectly, breadth-first.
    /// `id` itself is never included, even when the references form a cycle.
    pub fn transitive_dependents(&self, id: &ProjectId) -> Vec<ProjectId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(*id);
        let mut frontier = vec![*id];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for current in frontier {
                for dependent in self.dependents.get(&current).into_iter().flatten() {
                    if visited.insert(*dependent) {
                        result.push(*dependent);
                        next.push(*dependent);
                    }
                }
            }
            frontier = next;
        }

        log::trace!("{} has {} transitive dependents", id, result.len());
        result
    }

    /// Dependents selected by the propagation mode
    pub fn dependents(&self, id: &ProjectId, direct_only: bool) -> Vec<ProjectId> {
        if direct_only {
            self.direct_dependents(id)
        } else {
            self.transitive_dependents(id)
        }
    }
}

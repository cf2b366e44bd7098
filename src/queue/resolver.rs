//! Dependency resolver: a DAG over task ids, checked for cycles by DFS with
//! a recursion stack before a registration is accepted.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, ToolkitError};

#[derive(Default)]
pub struct DependencyResolver {
    dependencies: HashMap<String, HashSet<String>>,
    completed: HashSet<String>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`'s dependency set. Rejects a registration that would
    /// introduce a cycle, leaving the graph unchanged.
    pub fn add_task(&mut self, id: &str, dependencies: &HashSet<String>) -> Result<()> {
        self.dependencies.insert(id.to_string(), dependencies.clone());
        if self.has_cycle() {
            self.dependencies.remove(id);
            return Err(ToolkitError::CircularDependency { task_id: id.to_string() });
        }
        Ok(())
    }

    pub fn remove_task(&mut self, id: &str) {
        self.dependencies.remove(id);
        self.completed.remove(id);
    }

    /// Whether every dependency of `id` has completed (true for an unknown
    /// id or one with no dependencies).
    pub fn is_ready(&self, id: &str) -> bool {
        match self.dependencies.get(id) {
            Some(deps) => deps.iter().all(|d| self.completed.contains(d)),
            None => true,
        }
    }

    /// Mark `id` completed and return the ids of other registered tasks that
    /// depend on `id` and have just become ready as a result (i.e. every one
    /// of their other dependencies was already completed).
    pub fn complete(&mut self, id: &str) -> Vec<String> {
        self.completed.insert(id.to_string());
        self.dependencies
            .iter()
            .filter(|(other, deps)| other.as_str() != id && deps.contains(id))
            .map(|(other, _)| other.clone())
            .filter(|other| self.is_ready(other))
            .collect()
    }

    fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        for node in self.dependencies.keys() {
            if !visited.contains(node) && self.dfs_cycle(node, &mut visited, &mut on_stack) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(&self, node: &str, visited: &mut HashSet<String>, on_stack: &mut HashSet<String>) -> bool {
        visited.insert(node.to_string());
        on_stack.insert(node.to_string());
        if let Some(deps) = self.dependencies.get(node) {
            for dep in deps {
                if on_stack.contains(dep) {
                    return true;
                }
                if !visited.contains(dep) && self.dfs_cycle(dep, visited, on_stack) {
                    return true;
                }
            }
        }
        on_stack.remove(node);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn seed_scenario_dependency_chain() {
        let mut resolver = DependencyResolver::new();
        resolver.add_task("C", &set(&["B"])).unwrap();
        resolver.add_task("B", &set(&["A"])).unwrap();
        resolver.add_task("A", &set(&[])).unwrap();

        assert!(resolver.is_ready("A"));
        assert!(!resolver.is_ready("B"));
        assert!(!resolver.is_ready("C"));

        let newly_ready = resolver.complete("A");
        assert_eq!(newly_ready, vec!["B".to_string()]);
        assert!(resolver.is_ready("B"));

        let newly_ready = resolver.complete("B");
        assert_eq!(newly_ready, vec!["C".to_string()]);
    }

    #[test]
    fn rejects_cycle_inducing_registration() {
        let mut resolver = DependencyResolver::new();
        resolver.add_task("A", &set(&["B"])).unwrap();
        let result = resolver.add_task("B", &set(&["A"]));
        assert!(matches!(result, Err(ToolkitError::CircularDependency { .. })));
        // Rejected registration must not have mutated the graph.
        assert!(!resolver.dependencies.contains_key("B"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut resolver = DependencyResolver::new();
        let result = resolver.add_task("A", &set(&["A"]));
        assert!(matches!(result, Err(ToolkitError::CircularDependency { .. })));
    }
}

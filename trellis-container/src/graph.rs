//! Bean dependency tracking.
//!
//! Records which bean depends on which, as beans are wired:
//! - `depends_on` declarations
//! - references injected into constructors, factory methods and properties
//!
//! The graph answers two questions: does registering an edge close a
//! `depends_on` cycle, and which beans have to be torn down before a given
//! one when it is destroyed.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct Edges {
    /// bean -> beans it depends on
    dependencies: HashMap<String, BTreeSet<String>>,
    /// bean -> beans that depend on it
    dependents: HashMap<String, BTreeSet<String>>,
}

/// Thread-safe dependency graph between bean names.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    edges: Mutex<Edges>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `bean` depends on `dependency`.
    pub fn register(&self, bean: &str, dependency: &str) {
        if bean == dependency {
            return;
        }
        let mut edges = self.edges.lock();
        let added = edges
            .dependencies
            .entry(bean.to_string())
            .or_default()
            .insert(dependency.to_string());
        edges
            .dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(bean.to_string());
        if added {
            trace!(bean = %bean, dependency = %dependency, "Registered dependent bean");
        }
    }

    /// Finds a path of dependencies leading from `from` to `to`.
    ///
    /// Returns the path including both ends, e.g. `[from, x, to]`.
    ///
    /// # Algorithm
    /// Depth-first search over dependency edges, keeping the current path
    /// for the result and a visited set so shared sub-graphs are walked once.
    pub fn dependency_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let edges = self.edges.lock();
        let mut search = PathSearch {
            edges: &edges,
            visited: HashSet::new(),
            path: Vec::new(),
        };
        let found = search.walk(from, to);
        if found {
            warn!(from = %from, to = %to, path = ?search.path, "Dependency path closes a cycle");
            Some(search.path)
        } else {
            None
        }
    }

    /// Beans that directly depend on `name`, sorted.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .lock()
            .dependents
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Beans `name` directly depends on, sorted.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges
            .lock()
            .dependencies
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes `name` and its edges. Returns the beans that depended on it.
    pub fn remove(&self, name: &str) -> Vec<String> {
        let mut edges = self.edges.lock();

        let dependents = edges.dependents.remove(name).unwrap_or_default();
        for dependent in &dependents {
            if let Some(set) = edges.dependencies.get_mut(dependent) {
                set.remove(name);
            }
        }

        if let Some(dependencies) = edges.dependencies.remove(name) {
            for dependency in dependencies {
                if let Some(set) = edges.dependents.get_mut(&dependency) {
                    set.remove(name);
                }
            }
        }

        dependents.into_iter().collect()
    }

    pub fn clear(&self) {
        let mut edges = self.edges.lock();
        edges.dependencies.clear();
        edges.dependents.clear();
    }
}

struct PathSearch<'a> {
    edges: &'a Edges,
    /// Already explored without reaching the target
    visited: HashSet<&'a str>,
    /// Current DFS path (the result once the target is reached)
    path: Vec<String>,
}

impl<'a> PathSearch<'a> {
    fn walk(&mut self, current: &'a str, target: &str) -> bool {
        self.path.push(current.to_string());

        if current == target {
            return true;
        }

        let edges = self.edges;
        if self.visited.insert(current) {
            if let Some(next) = edges.dependencies.get(current) {
                for dependency in next {
                    if self.walk(dependency, target) {
                        return true;
                    }
                }
            }
        }

        self.path.pop();
        false
    }
}

//! Suite ordering.
//!
//! Suites form a graph with an edge from every dependency to its dependent.
//! [`DependencyGraph::resolve`] orders them with Kahn's algorithm, always
//! taking the earliest declared ready suite so the order is deterministic.
//! Whatever cannot be ordered is split into the suites that sit on a cycle and
//! the suites that only depend on one.
use crate::error::RunError;
use crate::suite::Suite;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    /// Direct dependencies of each suite, by declaration index.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents of each suite, by declaration index.
    dependents: Vec<Vec<usize>>,
}

/// The outcome of ordering a graph. All indices are declaration indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Suites that can run, dependencies first.
    pub order: Vec<usize>,
    /// Each cycle's members in declaration order.
    pub cycles: Vec<Vec<usize>>,
    /// Suites outside any cycle that depend on one.
    pub blocked: Vec<usize>,
}

impl Resolution {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }
}

impl DependencyGraph {
    pub fn build(suites: &[Suite]) -> Result<Self, RunError> {
        Self::from_declarations(
            suites
                .iter()
                .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str))),
        )
    }

    /// Builds from `(id, dependencies)` pairs in declaration order.
    pub fn from_declarations<'a, I, D>(declarations: I) -> Result<Self, RunError>
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let declarations: Vec<(&str, Vec<&str>)> = declarations
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();

        let mut index = HashMap::new();
        for (i, (id, _)) in declarations.iter().enumerate() {
            if index.insert(*id, i).is_some() {
                return Err(RunError::DuplicateSuite(id.to_string()));
            }
        }

        let n = declarations.len();
        let mut dependencies = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for (i, (id, deps)) in declarations.iter().enumerate() {
            for dep in deps {
                let Some(&d) = index.get(dep) else {
                    return Err(RunError::UnknownDependency {
                        suite: id.to_string(),
                        dependency: dep.to_string(),
                    });
                };
                if !dependencies[i].contains(&d) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        Ok(Self {
            ids: declarations.iter().map(|(id, _)| id.to_string()).collect(),
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    pub fn ids_of(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.ids[i].clone()).collect()
    }

    #[instrument(skip(self), fields(suites = self.len()))]
    pub fn resolve(&self) -> Resolution {
        let n = self.len();
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(next)) = ready.pop() {
            order.push(next);
            for &dependent in &self.dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == n {
            return Resolution {
                order,
                ..Default::default()
            };
        }

        let mut remaining = vec![false; n];
        for (i, degree) in in_degree.iter().enumerate() {
            remaining[i] = *degree > 0;
        }
        let mut cycles: Vec<Vec<usize>> = self
            .components(&remaining)
            .into_iter()
            .filter(|c| c.len() > 1 || self.dependencies[c[0]].contains(&c[0]))
            .collect();
        for cycle in &mut cycles {
            cycle.sort_unstable();
        }
        cycles.sort();

        let blocked = (0..n)
            .filter(|i| remaining[*i] && !cycles.iter().any(|c| c.contains(i)))
            .collect();
        for cycle in &cycles {
            warn!(members = ?self.ids_of(cycle), "Suite dependency cycle");
        }
        Resolution {
            order,
            cycles,
            blocked,
        }
    }

    /// Strongly connected components of the subgraph induced by `included`
    /// (Tarjan, iterative).
    fn components(&self, included: &[bool]) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut index_of = vec![usize::MAX; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut next_index = 0;
        let mut out = Vec::new();

        for root in (0..n).filter(|&i| included[i]) {
            if index_of[root] != usize::MAX {
                continue;
            }
            // (node, position in its dependency list)
            let mut work = vec![(root, 0usize)];
            index_of[root] = next_index;
            low[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;

            while let Some(top) = work.last_mut() {
                let node = top.0;
                if let Some(&dep) = self.dependencies[node].get(top.1) {
                    top.1 += 1;
                    if !included[dep] {
                        continue;
                    }
                    if index_of[dep] == usize::MAX {
                        index_of[dep] = next_index;
                        low[dep] = next_index;
                        next_index += 1;
                        stack.push(dep);
                        on_stack[dep] = true;
                        work.push((dep, 0));
                    } else if on_stack[dep] {
                        low[node] = low[node].min(index_of[dep]);
                    }
                    continue;
                }

                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    low[parent] = low[parent].min(low[node]);
                }
                if low[node] == index_of[node] {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack[member] = false;
                        component.push(member);
                        if member == node {
                            break;
                        }
                    }
                    out.push(component);
                }
            }
        }
        out
    }
}

//! Dependency resolution: graph construction, cycle detection, topological sort
//!
//! Builds a directed graph where an edge `A -> B` means "A requires B",
//! from both explicit dependency ids and service import/export matching.
//! Cycles are detected via depth-first search over the current traversal
//! stack; a clean graph is reduced to a topological start order by DFS
//! post-order (leaves first).

use std::collections::{HashMap, HashSet};

use crate::component::manifest::{ComponentManifest, Version};
use crate::error::ConduitError;
use crate::ids::ComponentId;

/// A problem found while resolving a manifest set, short of a hard failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionWarning {
    /// A non-optional dependency's target component was not found among the candidates
    MissingDependency {
        /// Component that declared the dependency
        from: ComponentId,
        /// Component id that could not be found
        missing: ComponentId,
    },
    /// A dependency's declared version constraint is not satisfied by the candidate
    VersionMismatch {
        /// Component that declared the dependency
        from: ComponentId,
        /// Component whose version did not satisfy the constraint
        to: ComponentId,
    },
}

/// Outcome of a successful resolution
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    /// Components in the order they must be started, leaves first
    pub start_order: Vec<ComponentId>,
    /// Non-fatal problems found along the way (ignored unless strict mode demands otherwise)
    pub warnings: Vec<ResolutionWarning>,
}

/// Resolves a dependency graph over a set of manifests
///
/// `strict` promotes missing non-optional dependencies and version
/// mismatches from warnings to hard failures, matching spec's "with strict
/// mode, they are errors" rule.
pub fn resolve(
    manifests: &[ComponentManifest],
    strict: bool,
) -> Result<ResolutionPlan, ConduitError> {
    let by_id: HashMap<ComponentId, &ComponentManifest> =
        manifests.iter().map(|m| (m.id, m)).collect();
    let mut edges: HashMap<ComponentId, Vec<ComponentId>> = HashMap::new();
    let mut warnings = Vec::new();

    for manifest in manifests {
        let mut targets = Vec::new();
        for dep in &manifest.dependencies {
            match by_id.get(&dep.component_id) {
                Some(target) => {
                    if !dep.version.is_satisfied_by(&target.version) {
                        warnings.push(ResolutionWarning::VersionMismatch {
                            from: manifest.id,
                            to: dep.component_id,
                        });
                        if strict {
                            return Err(ConduitError::Dependency(format!(
                                "{} requires {} at an incompatible version",
                                manifest.id, dep.component_id
                            )));
                        }
                    }
                    targets.push(dep.component_id);
                }
                None if dep.optional => {}
                None => {
                    warnings.push(ResolutionWarning::MissingDependency {
                        from: manifest.id,
                        missing: dep.component_id,
                    });
                    if strict {
                        return Err(ConduitError::Dependency(format!(
                            "{} requires missing component {}",
                            manifest.id, dep.component_id
                        )));
                    }
                }
            }
        }
        for import in &manifest.imports {
            for other in manifests {
                if other.id != manifest.id && other.exports.contains(import) {
                    targets.push(other.id);
                }
            }
        }
        edges.insert(manifest.id, targets);
    }

    let start_order = topological_sort(&edges)?;
    Ok(ResolutionPlan {
        start_order,
        warnings,
    })
}

/// DFS-based topological sort; returns the cycle path on failure
fn topological_sort(
    edges: &HashMap<ComponentId, Vec<ComponentId>>,
) -> Result<Vec<ComponentId>, ConduitError> {
    let mut order = Vec::with_capacity(edges.len());
    let mut visited: HashSet<ComponentId> = HashSet::new();
    let mut stack_path: Vec<ComponentId> = Vec::new();

    for &start in edges.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut on_stack: HashSet<ComponentId> = HashSet::new();
        dfs_visit(
            start,
            edges,
            &mut visited,
            &mut on_stack,
            &mut stack_path,
            &mut order,
        )?;
    }

    Ok(order)
}

/// Visits `node` and its dependencies, appending in post-order (leaves
/// first); `on_stack` tracks the current traversal path so a re-entrant
/// visit can be reported as a cycle with its full path.
fn dfs_visit(
    node: ComponentId,
    edges: &HashMap<ComponentId, Vec<ComponentId>>,
    visited: &mut HashSet<ComponentId>,
    on_stack: &mut HashSet<ComponentId>,
    stack_path: &mut Vec<ComponentId>,
    order: &mut Vec<ComponentId>,
) -> Result<(), ConduitError> {
    if visited.contains(&node) {
        return Ok(());
    }
    if on_stack.contains(&node) {
        let mut cycle: Vec<String> = stack_path.iter().map(ToString::to_string).collect();
        cycle.push(node.to_string());
        return Err(ConduitError::CycleDetected(cycle.join(" -> ")));
    }
    on_stack.insert(node);
    stack_path.push(node);
    if let Some(deps) = edges.get(&node) {
        for &dep in deps {
            dfs_visit(dep, edges, visited, on_stack, stack_path, order)?;
        }
    }
    stack_path.pop();
    on_stack.remove(&node);
    visited.insert(node);
    order.push(node);
    Ok(())
}

/// Checks a candidate's declared framework-version bounds against the
/// running framework version
#[must_use]
pub fn is_framework_compatible(manifest: &ComponentManifest, framework_version: &Version) -> bool {
    manifest.is_compatible_with_framework(framework_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::manifest::{DependencySpec, IsolationLevel, VersionConstraint};

    fn manifest(id: ComponentId, deps: Vec<ComponentId>) -> ComponentManifest {
        ComponentManifest {
            id,
            name: id.to_string(),
            version: Version::new(1, 0, 0),
            dependencies: deps
                .into_iter()
                .map(|d| DependencySpec {
                    component_id: d,
                    version: VersionConstraint::Any,
                    optional: false,
                })
                .collect(),
            exports: vec![],
            imports: vec![],
            tags: vec![],
            description: None,
            author: None,
            min_framework_version: None,
            max_framework_version: None,
            isolation: IsolationLevel::Standard,
        }
    }

    #[test]
    fn acyclic_graph_yields_leaves_first_order() {
        let a = ComponentId::generate();
        let b = ComponentId::generate();
        let manifests = vec![manifest(a, vec![b]), manifest(b, vec![])];
        let plan = resolve(&manifests, false).unwrap();
        let pos_a = plan.start_order.iter().position(|x| *x == a).unwrap();
        let pos_b = plan.start_order.iter().position(|x| *x == b).unwrap();
        assert!(pos_b < pos_a, "dependency B must start before dependent A");
    }

    #[test]
    fn cyclic_graph_fails_naming_both_nodes() {
        let a = ComponentId::generate();
        let b = ComponentId::generate();
        let manifests = vec![manifest(a, vec![b]), manifest(b, vec![a])];
        let err = resolve(&manifests, false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&a.to_string()));
        assert!(message.contains(&b.to_string()));
    }

    #[test]
    fn missing_non_optional_dependency_warns_unless_strict() {
        let a = ComponentId::generate();
        let missing = ComponentId::generate();
        let manifests = vec![manifest(a, vec![missing])];
        let plan = resolve(&manifests, false).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(resolve(&manifests, true).is_err());
    }
}

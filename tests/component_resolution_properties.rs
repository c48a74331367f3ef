//! Property: for any acyclic dependency graph, `resolve` produces a start
//! order where every component appears after all of its dependencies.

use conduit_core::component::{ComponentManifest, DependencySpec, IsolationLevel, Version, VersionConstraint};
use conduit_core::ids::ComponentId;
use proptest::prelude::*;

fn manifest_with_deps(id: ComponentId, deps: Vec<ComponentId>) -> ComponentManifest {
    ComponentManifest {
        id,
        name: id.to_string(),
        version: Version::new(1, 0, 0),
        dependencies: deps
            .into_iter()
            .map(|component_id| DependencySpec {
                component_id,
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

/// Builds an acyclic manifest set: node `i` may only depend on nodes with a
/// strictly smaller index, guaranteeing the graph has no cycles regardless
/// of which back-edges the strategy picks.
fn acyclic_manifests(size: usize, edge_mask: Vec<u64>) -> Vec<ComponentManifest> {
    let ids: Vec<ComponentId> = (0..size).map(|_| ComponentId::generate()).collect();
    ids.iter()
        .enumerate()
        .map(|(i, &id)| {
            let deps = ids[..i]
                .iter()
                .enumerate()
                .filter(|(j, _)| edge_mask.get(i).is_some_and(|mask| mask & (1 << j) != 0))
                .map(|(_, &dep_id)| dep_id)
                .collect();
            manifest_with_deps(id, deps)
        })
        .collect()
}

proptest! {
    #[test]
    fn start_order_respects_every_dependency_edge(
        size in 1usize..8,
        edge_mask in prop::collection::vec(any::<u64>(), 1..8),
    ) {
        let manifests = acyclic_manifests(size, edge_mask);
        let plan = conduit_core::component::resolve(&manifests, false).unwrap();

        prop_assert_eq!(plan.start_order.len(), manifests.len());

        let position: std::collections::HashMap<_, _> = plan
            .start_order
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx))
            .collect();

        for manifest in &manifests {
            for dep in &manifest.dependencies {
                prop_assert!(
                    position[&dep.component_id] < position[&manifest.id],
                    "dependency must start before its dependent"
                );
            }
        }
    }
}

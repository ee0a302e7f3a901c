//! Registry construction and graph validation

use got_kernel::construction::validate;
use got_kernel::error::RegistryError;
use got_kernel::registry::StageRegistry;
use got_kernel::types::{AgentKind, StageDefinition, StageId};
use got_test_utils::{diamond, stage};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::time::Instant;

#[test]
fn test_diamond_validates() {
    let validated = validate(StageRegistry::register(diamond()).unwrap()).unwrap();

    assert_eq!(validated.len(), 4);
    assert_eq!(validated.edge_count(), 4);
    assert_eq!(validated.roots(), vec![StageId::from("A")]);
    assert_eq!(
        validated.dependents(&"A".into()),
        vec![StageId::from("B"), StageId::from("C")]
    );
}

#[test]
fn test_duplicate_id_rejected() {
    let err = StageRegistry::register(vec![stage("A", &[]), stage("B", &[]), stage("A", &[])])
        .unwrap_err();
    assert_eq!(err, RegistryError::DuplicateStageId("A".into()));
}

#[test]
fn test_unknown_dependency_rejected() {
    let err = StageRegistry::register(vec![stage("A", &[]), stage("B", &["A", "Q"])]).unwrap_err();
    assert_eq!(
        err,
        RegistryError::UnknownDependency {
            stage: "B".into(),
            dependency: "Q".into(),
        }
    );
}

#[test]
fn test_cycle_reports_path() {
    let registry = StageRegistry::register(vec![stage("A", &["B"]), stage("B", &["A"])]).unwrap();
    let err = validate(registry).unwrap_err();

    let path: Vec<&str> = err.path.iter().map(StageId::as_str).collect();
    assert_eq!(path, vec!["A", "B", "A"]);
    assert_eq!(err.to_string(), "dependency cycle detected: A -> B -> A");
}

#[test]
fn test_layered_graph_validates_quickly() {
    // 100 layers of 100 stages, each reading up to three stages above
    let mut stages = Vec::with_capacity(10_000);
    for layer in 0..100usize {
        for i in 0..100usize {
            let deps: Vec<String> = if layer == 0 {
                Vec::new()
            } else {
                (0..3)
                    .map(|k| format!("L{}-{}", layer - 1, (i + k * 37) % 100))
                    .collect()
            };
            stages.push(
                StageDefinition::new(format!("L{layer}-{i}"), "layered", AgentKind::Fetcher)
                    .depends_on(deps),
            );
        }
    }

    let start = Instant::now();
    let validated = validate(StageRegistry::register(stages).unwrap()).unwrap();

    assert_eq!(validated.len(), 10_000);
    assert_eq!(validated.topological_order().len(), 10_000);
    assert!(start.elapsed().as_secs() < 5, "validation took {:?}", start.elapsed());
}

fn random_stages(count: usize, edges: &[(usize, usize)]) -> Vec<StageDefinition> {
    (0..count)
        .map(|i| {
            let deps: Vec<String> = edges
                .iter()
                .filter(|(from, to)| *from == i && *to < count)
                .map(|(_, to)| format!("S{to}"))
                .collect();
            StageDefinition::new(format!("S{i}"), "random", AgentKind::Fetcher).depends_on(deps)
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_validation_accepts_exactly_the_acyclic_graphs(
        count in 1..12usize,
        edges in proptest::collection::vec((0..12usize, 0..12usize), 0..30)
    ) {
        let stages = random_stages(count, &edges);

        let mut graph = DiGraph::<(), ()>::new();
        let nodes: Vec<_> = (0..count).map(|_| graph.add_node(())).collect();
        for def in &stages {
            let from: usize = def.id.as_str()[1..].parse().unwrap();
            for dep in &def.depends_on {
                let to: usize = dep.as_str()[1..].parse().unwrap();
                graph.add_edge(nodes[from], nodes[to], ());
            }
        }

        let registry = StageRegistry::register(stages).unwrap();
        let result = validate(registry.clone());
        prop_assert_eq!(result.is_ok(), !is_cyclic_directed(&graph));

        if let Err(cycle) = result {
            // The path is closed and every hop is a real dependency edge
            prop_assert!(cycle.path.len() >= 2);
            prop_assert_eq!(cycle.path.first(), cycle.path.last());
            for hop in cycle.path.windows(2) {
                let def = registry.get(&hop[0]).unwrap();
                prop_assert!(def.depends_on.contains(&hop[1]));
            }
        }
    }

    #[test]
    fn prop_topological_order_respects_dependencies(
        count in 1..15usize,
        edges in proptest::collection::vec((0..15usize, 0..15usize), 0..40)
    ) {
        // Only point at lower indices so the graph is a DAG
        let forward: Vec<(usize, usize)> = edges.into_iter().filter(|(a, b)| b < a).collect();
        let validated = validate(StageRegistry::register(random_stages(count, &forward)).unwrap()).unwrap();
        let order = validated.topological_order();

        for def in validated.registry().all() {
            let me = order.iter().position(|id| *id == def.id).unwrap();
            for dep in &def.depends_on {
                let before = order.iter().position(|id| id == dep).unwrap();
                prop_assert!(before < me);
            }
        }
    }
}

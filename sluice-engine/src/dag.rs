//! Step-graph validation and ordering
//!
//! Steps are nodes, "depends on" is a directed edge. Both the save-time
//! validator and the runner's ordering use Kahn's algorithm: dequeue
//! zero-in-degree nodes, decrement neighbors; if fewer nodes come out
//! than went in, a cycle exists.

use std::collections::HashMap;
use uuid::Uuid;

use sluice_core::dto::pipeline::CreateStep;

use crate::error::EngineError;

/// Validates a proposed step list for dependency cycles.
///
/// Runs on every pipeline create and every update that supplies a new
/// step list. A dependency naming a step absent from the list simply
/// contributes no edge. An empty list is valid.
pub fn validate_dag(steps: &[CreateStep]) -> Result<(), EngineError> {
    if steps.is_empty() {
        return Ok(());
    }

    let index_by_name: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut in_degree: Vec<usize> = vec![0; steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&from) = index_by_name.get(dep.as_str()) {
                adjacency[from].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let visited = kahn(&adjacency, &mut in_degree).len();
    if visited < steps.len() {
        return Err(EngineError::CyclicDependency(format!(
            "{} of {} steps are part of a dependency cycle",
            steps.len() - visited,
            steps.len()
        )));
    }

    Ok(())
}

/// Topological order over persisted step ids.
///
/// The runner walks this order; dependency edges pointing outside the
/// id set are ignored, matching the validator. Persisted steps have
/// already passed [`validate_dag`], so a cycle here means the stored
/// graph was corrupted after validation.
pub fn topo_order(
    ids: &[Uuid],
    depends_on: &HashMap<Uuid, Vec<Uuid>>,
) -> Result<Vec<Uuid>, EngineError> {
    let index_by_id: HashMap<Uuid, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut in_degree: Vec<usize> = vec![0; ids.len()];

    for (i, id) in ids.iter().enumerate() {
        if let Some(deps) = depends_on.get(id) {
            for dep in deps {
                if let Some(&from) = index_by_id.get(dep) {
                    adjacency[from].push(i);
                    in_degree[i] += 1;
                }
            }
        }
    }

    let order = kahn(&adjacency, &mut in_degree);
    if order.len() < ids.len() {
        return Err(EngineError::CyclicDependency(
            "persisted step graph contains a cycle".to_string(),
        ));
    }

    Ok(order.into_iter().map(|i| ids[i]).collect())
}

fn kahn(adjacency: &[Vec<usize>], in_degree: &mut [usize]) -> Vec<usize> {
    let mut queue: std::collections::VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &adjacency[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::pipeline::ScriptType;

    fn step(name: &str, deps: &[&str]) -> CreateStep {
        CreateStep {
            name: name.to_string(),
            script_type: ScriptType::Sql,
            payload: serde_json::json!({"sql": "select 1"}),
            output_dataset_id: None,
            load_strategy: "REPLACE".to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert!(validate_dag(&[]).is_ok());
    }

    #[test]
    fn test_linear_chain_is_valid() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        assert!(validate_dag(&steps).is_ok());
    }

    #[test]
    fn test_diamond_is_valid() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        assert!(validate_dag(&steps).is_ok());
    }

    #[test]
    fn test_independent_steps_are_valid() {
        let steps = vec![step("a", &[]), step("b", &[]), step("c", &[])];
        assert!(validate_dag(&steps).is_ok());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let steps = vec![step("a", &["a"])];
        assert!(matches!(
            validate_dag(&steps),
            Err(EngineError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_two_step_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(matches!(
            validate_dag(&steps),
            Err(EngineError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a", "d"]),
            step("c", &["b"]),
            step("d", &["c"]),
        ];
        assert!(matches!(
            validate_dag(&steps),
            Err(EngineError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_contributes_no_edge() {
        let steps = vec![step("a", &["ghost"]), step("b", &["a"])];
        assert!(validate_dag(&steps).is_ok());
    }

    #[test]
    fn test_topo_order_respects_edges() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut deps = HashMap::new();
        deps.insert(b, vec![a]);
        deps.insert(c, vec![a, b]);

        let order = topo_order(&[c, b, a], &deps).unwrap();
        let pos = |id: Uuid| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn test_topo_order_detects_corrupted_graph() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut deps = HashMap::new();
        deps.insert(a, vec![b]);
        deps.insert(b, vec![a]);

        assert!(matches!(
            topo_order(&[a, b], &deps),
            Err(EngineError::CyclicDependency(_))
        ));
    }
}

//! Dependency Graph Validator
//!
//! Depth-first traversal along `depends_on` edges, tracking an in-progress
//! set and the current path. Revisiting an in-progress stage closes a cycle;
//! the reported path runs from that stage back to itself.

use crate::construction::validated::ValidatedRegistry;
use crate::error::CycleDetected;
use crate::registry::StageRegistry;
use crate::types::StageId;
use std::collections::HashSet;

/// Validate a registry, producing the only type the scheduler accepts
///
/// # Errors
/// Returns `CycleDetected` with the offending path if any stage depends on
/// itself, directly or transitively.
pub fn validate(registry: StageRegistry) -> Result<ValidatedRegistry, CycleDetected> {
    ConstructionValidator::new().validate(registry)
}

/// Construction-time validator
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstructionValidator;

impl ConstructionValidator {
    /// Create a validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a registry
    ///
    /// # Errors
    /// Returns `CycleDetected` if the dependency relation is cyclic.
    pub fn validate(&self, registry: StageRegistry) -> Result<ValidatedRegistry, CycleDetected> {
        self.check_acyclic(&registry)?;
        let validated = ValidatedRegistry::build(registry)?;
        tracing::info!(
            stages = validated.len(),
            "stage registry validated"
        );
        Ok(validated)
    }

    /// Check acyclicity without consuming the registry
    ///
    /// # Errors
    /// Returns `CycleDetected` with the first cycle found, searching roots
    /// in registration order.
    pub fn check_acyclic(&self, registry: &StageRegistry) -> Result<(), CycleDetected> {
        let mut visited: HashSet<&StageId> = HashSet::with_capacity(registry.len());
        let mut in_progress: HashSet<&StageId> = HashSet::new();
        let mut path: Vec<&StageId> = Vec::new();

        for id in registry.ids() {
            if !visited.contains(id) {
                visit(registry, id, &mut visited, &mut in_progress, &mut path)?;
            }
        }

        Ok(())
    }
}

fn visit<'a>(
    registry: &'a StageRegistry,
    id: &'a StageId,
    visited: &mut HashSet<&'a StageId>,
    in_progress: &mut HashSet<&'a StageId>,
    path: &mut Vec<&'a StageId>,
) -> Result<(), CycleDetected> {
    if in_progress.contains(id) {
        let start = path.iter().position(|p| *p == id).unwrap_or(0);
        let mut cycle: Vec<StageId> = path[start..].iter().map(|p| (*p).clone()).collect();
        cycle.push(id.clone());
        return Err(CycleDetected { path: cycle });
    }

    if visited.contains(id) {
        return Ok(());
    }

    in_progress.insert(id);
    path.push(id);

    if let Some(def) = registry.get(id) {
        for dep in &def.depends_on {
            visit(registry, dep, visited, in_progress, path)?;
        }
    }

    path.pop();
    in_progress.remove(id);
    visited.insert(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentKind, StageDefinition};

    fn stage(id: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition::new(id, id, AgentKind::Fetcher).depends_on(deps.iter().copied())
    }

    fn registry(stages: Vec<StageDefinition>) -> StageRegistry {
        StageRegistry::register(stages).unwrap()
    }

    fn ids(path: &[StageId]) -> Vec<&str> {
        path.iter().map(StageId::as_str).collect()
    }

    #[test]
    fn test_accepts_diamond() {
        let reg = registry(vec![
            stage("A", &[]),
            stage("B", &["A"]),
            stage("C", &["A"]),
            stage("D", &["B", "C"]),
        ]);
        let validated = validate(reg).unwrap();
        assert_eq!(validated.len(), 4);
    }

    #[test]
    fn test_rejects_two_cycle_with_path() {
        let reg = registry(vec![stage("A", &["B"]), stage("B", &["A"])]);
        let err = validate(reg).unwrap_err();
        assert_eq!(ids(&err.path), vec!["A", "B", "A"]);
    }

    #[test]
    fn test_rejects_self_dependency() {
        let reg = registry(vec![stage("A", &[]), stage("B", &["B"])]);
        let err = validate(reg).unwrap_err();
        assert_eq!(ids(&err.path), vec!["B", "B"]);
    }

    #[test]
    fn test_cycle_path_excludes_entry_prefix() {
        // R -> X -> Y -> Z -> X : the cycle is X, Y, Z
        let reg = registry(vec![
            stage("R", &["X"]),
            stage("X", &["Y"]),
            stage("Y", &["Z"]),
            stage("Z", &["X"]),
        ]);
        let err = validate(reg).unwrap_err();
        assert_eq!(ids(&err.path), vec!["X", "Y", "Z", "X"]);
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        // A visited twice through different branches
        let reg = registry(vec![
            stage("A", &[]),
            stage("B", &["A"]),
            stage("C", &["A", "B"]),
        ]);
        assert!(ConstructionValidator::new().check_acyclic(&reg).is_ok());
    }
}

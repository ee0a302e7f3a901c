//! Stage Registry
//!
//! Static, immutable declaration of the processing stages. Construction
//! checks id uniqueness and dependency resolution; acyclicity is the
//! validator's job (see [`crate::construction`]).

use crate::error::RegistryError;
use crate::types::{StageDefinition, StageId};
use indexmap::IndexMap;
use std::sync::Arc;

/// Immutable set of stage definitions, in registration order
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: IndexMap<StageId, Arc<StageDefinition>>,
}

impl StageRegistry {
    /// Register an ordered sequence of stage definitions
    ///
    /// # Errors
    /// - `RegistryError::DuplicateStageId` if two definitions share an id
    /// - `RegistryError::UnknownDependency` if a dependency has no definition
    pub fn register<I>(stages: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = StageDefinition>,
    {
        let iter = stages.into_iter();
        let mut map: IndexMap<StageId, Arc<StageDefinition>> =
            IndexMap::with_capacity(iter.size_hint().0);

        for def in iter {
            if map.contains_key(&def.id) {
                return Err(RegistryError::DuplicateStageId(def.id));
            }
            map.insert(def.id.clone(), Arc::new(def));
        }

        for def in map.values() {
            if let Some(missing) = def.depends_on.iter().find(|dep| !map.contains_key(*dep)) {
                return Err(RegistryError::UnknownDependency {
                    stage: def.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        tracing::debug!(stages = map.len(), "stage registry constructed");
        Ok(Self { stages: map })
    }

    /// Look up a stage by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &StageId) -> Option<&StageDefinition> {
        self.stages.get(id).map(AsRef::as_ref)
    }

    /// Shared handle to a definition
    #[inline]
    #[must_use]
    pub fn get_shared(&self, id: &StageId) -> Option<Arc<StageDefinition>> {
        self.stages.get(id).cloned()
    }

    /// All definitions in registration order
    pub fn all(&self) -> impl Iterator<Item = &StageDefinition> + '_ {
        self.stages.values().map(AsRef::as_ref)
    }

    /// All ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = &StageId> + '_ {
        self.stages.keys()
    }

    /// Registration index of a stage
    #[inline]
    #[must_use]
    pub fn position(&self, id: &StageId) -> Option<usize> {
        self.stages.get_index_of(id)
    }

    /// Check whether a stage is declared
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &StageId) -> bool {
        self.stages.contains_key(id)
    }

    /// Number of stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if no stages are declared
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentKind;

    fn stage(id: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition::new(id, id, AgentKind::Fetcher).depends_on(deps.iter().copied())
    }

    #[test]
    fn register_preserves_order() {
        let registry =
            StageRegistry::register(vec![stage("B", &[]), stage("A", &["B"])]).unwrap();

        let ids: Vec<_> = registry.ids().map(StageId::as_str).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(registry.position(&"A".into()), Some(1));
        assert!(registry.get(&"A".into()).is_some());
        assert!(registry.get(&"Z".into()).is_none());
    }

    #[test]
    fn register_rejects_duplicates() {
        let result = StageRegistry::register(vec![stage("A", &[]), stage("A", &[])]);
        assert_eq!(result.unwrap_err(), RegistryError::DuplicateStageId("A".into()));
    }

    #[test]
    fn register_rejects_unknown_dependency() {
        let result = StageRegistry::register(vec![stage("A", &["ghost"])]);
        assert_eq!(
            result.unwrap_err(),
            RegistryError::UnknownDependency {
                stage: "A".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn forward_references_are_allowed() {
        // Declaration order does not matter, only resolution
        let registry = StageRegistry::register(vec![stage("A", &["B"]), stage("B", &[])]);
        assert!(registry.is_ok());
    }
}

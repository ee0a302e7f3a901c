//! Result Aggregator contract
//!
//! Aggregation runs once, after every stage is terminal. Required stages are
//! checked first; if any did not complete the run fails with
//! `IncompleteAggregation` instead of producing a partial report.

use crate::construction::ValidatedRegistry;
use crate::error::PipelineError;
use crate::types::{PipelineTypes, StageId};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Outputs of every completed stage, in registration order
#[derive(Debug)]
pub struct CompletedStages<O> {
    outputs: IndexMap<StageId, Arc<O>>,
}

impl<O> Default for CompletedStages<O> {
    fn default() -> Self {
        Self {
            outputs: IndexMap::new(),
        }
    }
}

impl<O> Clone for CompletedStages<O> {
    fn clone(&self) -> Self {
        Self {
            outputs: self.outputs.clone(),
        }
    }
}

impl<O> CompletedStages<O> {
    /// Empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed stage's output
    pub fn insert(&mut self, stage: StageId, output: Arc<O>) {
        self.outputs.insert(stage, output);
    }

    /// Output of a stage, if it completed
    #[must_use]
    pub fn get(&self, stage: &StageId) -> Option<&O> {
        self.outputs.get(stage).map(AsRef::as_ref)
    }

    /// Shared handle to a stage's output
    #[must_use]
    pub fn get_shared(&self, stage: &StageId) -> Option<Arc<O>> {
        self.outputs.get(stage).cloned()
    }

    /// Check whether a stage completed
    #[inline]
    #[must_use]
    pub fn contains(&self, stage: &StageId) -> bool {
        self.outputs.contains_key(stage)
    }

    /// Completed stage ids
    pub fn ids(&self) -> impl Iterator<Item = &StageId> + '_ {
        self.outputs.keys()
    }

    /// Completed stages and their outputs
    pub fn iter(&self) -> impl Iterator<Item = (&StageId, &O)> + '_ {
        self.outputs.iter().map(|(id, out)| (id, out.as_ref()))
    }

    /// Number of completed stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// True if nothing completed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Sort into registry order
    pub(crate) fn sort_by_registry(&mut self, validated: &ValidatedRegistry) {
        let registry = validated.registry();
        self.outputs.sort_by(|a, _, b, _| {
            registry
                .position(a)
                .unwrap_or(usize::MAX)
                .cmp(&registry.position(b).unwrap_or(usize::MAX))
        });
    }
}

/// Combines completed stage outputs into a single report
pub trait ResultAggregator<P: PipelineTypes>: Send + Sync + 'static {
    /// Report type produced on success
    type Report: Send + Sync + fmt::Debug + 'static;

    /// Stages whose completion is mandatory
    fn required_stages(&self) -> &BTreeSet<StageId>;

    /// Build the report
    ///
    /// Only called when every required stage completed.
    ///
    /// # Errors
    /// Returns `PipelineError::Aggregation` if the outputs cannot be combined.
    fn aggregate(&self, completed: &CompletedStages<P::Output>) -> Result<Self::Report, PipelineError>;
}

/// Check that every required stage completed
///
/// # Errors
/// Returns `IncompleteAggregation` listing the missing stages in registry
/// order.
pub fn ensure_complete<O>(
    required: &BTreeSet<StageId>,
    validated: &ValidatedRegistry,
    completed: &CompletedStages<O>,
) -> Result<(), PipelineError> {
    let mut missing: Vec<StageId> = required
        .iter()
        .filter(|id| !completed.contains(id))
        .cloned()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let registry = validated.registry();
    missing.sort_by_key(|id| registry.position(id).unwrap_or(usize::MAX));
    Err(PipelineError::IncompleteAggregation { missing })
}

/// Stages a report stage reads from: its direct dependencies
#[must_use]
pub fn required_for_report(validated: &ValidatedRegistry, report_stage: &StageId) -> BTreeSet<StageId> {
    validated
        .dependencies(report_stage)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::validate;
    use crate::registry::StageRegistry;
    use crate::types::{AgentKind, StageDefinition};

    fn validated() -> ValidatedRegistry {
        let stage = |id: &str, deps: &[&str]| {
            StageDefinition::new(id, id, AgentKind::Fetcher).depends_on(deps.iter().copied())
        };
        validate(
            StageRegistry::register(vec![
                stage("A", &[]),
                stage("B", &["A"]),
                stage("C", &["A"]),
                stage("R", &["C", "B"]),
            ])
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn missing_stages_follow_registry_order() {
        let validated = validated();
        let required = required_for_report(&validated, &"R".into());
        assert_eq!(required.len(), 2);

        let mut completed = CompletedStages::new();
        completed.insert("A".into(), Arc::new(1));

        let err = ensure_complete(&required, &validated, &completed).unwrap_err();
        assert_eq!(err, PipelineError::incomplete(["B".into(), "C".into()]));

        completed.insert("C".into(), Arc::new(3));
        completed.insert("B".into(), Arc::new(2));
        assert!(ensure_complete(&required, &validated, &completed).is_ok());
    }

    #[test]
    fn completed_stages_sort_by_registry() {
        let validated = validated();
        let mut completed = CompletedStages::new();
        completed.insert("C".into(), Arc::new(3));
        completed.insert("A".into(), Arc::new(1));
        completed.sort_by_registry(&validated);

        let ids: Vec<_> = completed.ids().map(StageId::as_str).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(completed.get(&"C".into()), Some(&3));
    }

    #[test]
    fn unknown_report_stage_requires_nothing() {
        assert!(required_for_report(&validated(), &"Z".into()).is_empty());
    }
}

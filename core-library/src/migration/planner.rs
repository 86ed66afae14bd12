//! Migration planner
//!
//! Holds the ordered step chain and decides, for a given store version,
//! which step runs next. The chain is validated once at construction so a
//! gap or misordering surfaces as a configuration error instead of a
//! half-migrated store.

use super::error::PlanningError;
use super::step::MigrationStep;
use crate::models::StoreVersion;
use std::sync::Arc;

#[derive(Clone)]
pub struct MigrationPlanner {
    steps: Vec<Arc<dyn MigrationStep>>,
}

impl MigrationPlanner {
    /// Validate and wrap a step chain.
    ///
    /// # Errors
    /// `PlanningError::BrokenChain` if a step does not advance exactly one
    /// version, the first step does not start at the empty store, or two
    /// consecutive steps do not connect.
    pub fn new(steps: Vec<Arc<dyn MigrationStep>>) -> Result<Self, PlanningError> {
        let mut expected_source = StoreVersion::EMPTY;

        for step in &steps {
            let Some(expected_target) = step.source_version().next() else {
                return Err(PlanningError::BrokenChain {
                    step_id: step.id().to_string(),
                    reason: format!("source {} has no next version", step.source_version()),
                });
            };

            if step.target_version() != expected_target {
                return Err(PlanningError::BrokenChain {
                    step_id: step.id().to_string(),
                    reason: format!(
                        "target {} is not one past source {}",
                        step.target_version(),
                        step.source_version()
                    ),
                });
            }

            if step.source_version() != expected_source {
                return Err(PlanningError::BrokenChain {
                    step_id: step.id().to_string(),
                    reason: format!(
                        "starts at {} but the chain is at {}",
                        step.source_version(),
                        expected_source
                    ),
                });
            }

            expected_source = step.target_version();
        }

        Ok(Self { steps })
    }

    /// Target of the last step, or the empty version for an empty chain.
    pub fn latest_version(&self) -> StoreVersion {
        self.steps
            .last()
            .map(|step| step.target_version())
            .unwrap_or(StoreVersion::EMPTY)
    }

    pub fn needs_migration(&self, current: StoreVersion) -> bool {
        current < self.latest_version()
    }

    /// The step that moves `current` forward.
    pub fn next_step(&self, current: StoreVersion) -> Result<Arc<dyn MigrationStep>, PlanningError> {
        let latest = self.latest_version();
        if current > latest {
            return Err(PlanningError::NewerThanSupported { current, latest });
        }

        self.steps
            .iter()
            .find(|step| step.source_version() == current)
            .cloned()
            .ok_or(PlanningError::NoPathFromVersion { version: current })
    }

    /// Ids of the steps still to run from `current`, in order.
    pub fn remaining_steps(&self, current: StoreVersion) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.source_version() >= current)
            .map(|step| step.id())
            .collect()
    }

    pub fn steps(&self) -> &[Arc<dyn MigrationStep>] {
        &self.steps
    }
}

impl std::fmt::Debug for MigrationPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationPlanner")
            .field("steps", &self.remaining_steps(StoreVersion::EMPTY))
            .field("latest_version", &self.latest_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::step::{SqlMigrationStep, StepContext};
    use async_trait::async_trait;

    fn sql_step(id: &str, source: u32) -> Arc<dyn MigrationStep> {
        Arc::new(SqlMigrationStep::new(id, StoreVersion(source), &[]))
    }

    struct SkippingStep;

    #[async_trait]
    impl MigrationStep for SkippingStep {
        fn id(&self) -> &str {
            "skip"
        }

        fn source_version(&self) -> StoreVersion {
            StoreVersion(1)
        }

        fn target_version(&self) -> StoreVersion {
            StoreVersion(3)
        }

        async fn apply(&self, _ctx: &StepContext<'_>) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_valid_chain() {
        let planner =
            MigrationPlanner::new(vec![sql_step("a", 0), sql_step("b", 1), sql_step("c", 2)])
                .unwrap();

        assert_eq!(planner.latest_version(), StoreVersion(3));
        assert!(planner.needs_migration(StoreVersion::EMPTY));
        assert!(planner.needs_migration(StoreVersion(2)));
        assert!(!planner.needs_migration(StoreVersion(3)));

        assert_eq!(planner.next_step(StoreVersion(1)).unwrap().id(), "b");
        assert_eq!(planner.remaining_steps(StoreVersion(1)), vec!["b", "c"]);
        assert!(planner.remaining_steps(StoreVersion(3)).is_empty());
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = MigrationPlanner::new(vec![sql_step("a", 0), sql_step("c", 2)]).unwrap_err();
        assert!(matches!(err, PlanningError::BrokenChain { step_id, .. } if step_id == "c"));
    }

    #[test]
    fn test_step_at_last_version_is_rejected() {
        let err = MigrationPlanner::new(vec![sql_step("last", u32::MAX)]).unwrap_err();
        assert!(
            matches!(err, PlanningError::BrokenChain { ref step_id, ref reason } if step_id == "last" && reason.contains("no next version"))
        );
    }

    #[test]
    fn test_chain_must_start_empty() {
        let err = MigrationPlanner::new(vec![sql_step("b", 1)]).unwrap_err();
        assert!(matches!(err, PlanningError::BrokenChain { .. }));
    }

    #[test]
    fn test_misordered_chain_is_rejected() {
        let err = MigrationPlanner::new(vec![sql_step("b", 1), sql_step("a", 0)]).unwrap_err();
        assert!(matches!(err, PlanningError::BrokenChain { step_id, .. } if step_id == "b"));
    }

    #[test]
    fn test_multi_version_step_is_rejected() {
        let err =
            MigrationPlanner::new(vec![sql_step("a", 0), Arc::new(SkippingStep)]).unwrap_err();
        assert!(matches!(err, PlanningError::BrokenChain { step_id, .. } if step_id == "skip"));
    }

    #[test]
    fn test_newer_store_is_reported() {
        let planner = MigrationPlanner::new(vec![sql_step("a", 0)]).unwrap();
        assert_eq!(
            planner.next_step(StoreVersion(5)).unwrap_err(),
            PlanningError::NewerThanSupported {
                current: StoreVersion(5),
                latest: StoreVersion(1),
            }
        );
        assert!(!planner.needs_migration(StoreVersion(5)));
    }

    #[test]
    fn test_empty_chain() {
        let planner = MigrationPlanner::new(vec![]).unwrap();
        assert_eq!(planner.latest_version(), StoreVersion::EMPTY);
        assert!(!planner.needs_migration(StoreVersion::EMPTY));
        assert_eq!(
            planner.next_step(StoreVersion::EMPTY).unwrap_err(),
            PlanningError::NoPathFromVersion {
                version: StoreVersion::EMPTY
            }
        );
    }
}

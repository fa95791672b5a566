//! The escalation controller
//!
//! A pure decision function: given an entity's escalation state and a fresh
//! verdict, it returns the next state plus the intent the coordinator has to
//! carry out. It never touches the ledger itself.

use crate::config::CoordinatorConfig;
use crate::CoordinatorError;
use drover_domain::{
    EscalationState, EscalationStatus, Objection, RecommendedAction, Verdict,
};
use tracing::info;

/// What the coordinator must do after a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// The result is accepted; nothing left to do
    Accept,
    /// Analyze again, answering these new objections (on top of earlier ones)
    Rerun {
        /// Objections raised by this verdict
        objections: Vec<Objection>,
    },
    /// Collect the entity again before the next analysis
    RequeueCollection,
    /// Give up; the entity goes to the needs-attention set
    Exhaust,
}

impl Intent {
    /// Short label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Accept => "accept",
            Intent::Rerun { .. } => "rerun",
            Intent::RequeueCollection => "requeue-collection",
            Intent::Exhaust => "exhaust",
        }
    }
}

/// The controller's answer for one verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    /// State to persist with the verdict
    pub next: EscalationState,
    /// Action to carry out
    pub intent: Intent,
}

/// Accept / rerun / exhaust policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationController {
    max_cycles: u32,
    recollect_on_missing_evidence: bool,
}

impl EscalationController {
    /// Controller allowing `max_cycles` analysis cycles per entity
    pub fn new(max_cycles: u32) -> Self {
        Self {
            max_cycles: max_cycles.max(1),
            recollect_on_missing_evidence: false,
        }
    }

    /// Controller configured from the `[coordinator]` section
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.max_cycles).with_recollection(config.recollect_on_missing_evidence)
    }

    /// Send flagged entities whose verdict asks for more data back to collection
    pub fn with_recollection(mut self, enabled: bool) -> Self {
        self.recollect_on_missing_evidence = enabled;
        self
    }

    /// Configured cycle bound
    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Decide what follows `verdict`
    ///
    /// Deterministic: the same state and verdict always yield the same
    /// decision. Terminal states and verdicts for another entity are refused.
    pub fn decide(
        &self,
        state: &EscalationState,
        verdict: &Verdict,
    ) -> Result<EscalationDecision, CoordinatorError> {
        let refuse = |reason| CoordinatorError::InvalidTransition {
            entity: state.entity_id.clone(),
            status: state.status,
            reason,
        };
        if state.is_terminal() {
            return Err(refuse("state is terminal"));
        }
        if verdict.entity_id != state.entity_id {
            return Err(refuse("verdict belongs to another entity"));
        }

        let mut next = state.clone();
        // A verdict always concerns an analysis, so the cycle is at least 1
        next.cycle = next.cycle.max(1);

        let intent = if verdict.passed() {
            next.status = EscalationStatus::Accepted;
            Intent::Accept
        } else {
            next.objections.extend(verdict.objections.iter().cloned());
            if next.cycle >= self.max_cycles {
                next.status = EscalationStatus::Exhausted;
                Intent::Exhaust
            } else {
                next.cycle += 1;
                if self.recollect_on_missing_evidence
                    && verdict.actions.contains(&RecommendedAction::AddData)
                {
                    next.status = EscalationStatus::Collecting;
                    Intent::RequeueCollection
                } else {
                    next.status = EscalationStatus::Analyzing;
                    Intent::Rerun {
                        objections: verdict.objections.clone(),
                    }
                }
            }
        };

        info!(
            entity = %state.entity_id,
            cycle = state.cycle,
            next_cycle = next.cycle,
            intent = intent.label(),
            "Escalation decision"
        );
        Ok(EscalationDecision { next, intent })
    }
}

impl Default for EscalationController {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default().max_cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::{EntityId, Outcome, SemanticContribution, Severity};

    fn evaluating(cycle: u32) -> EscalationState {
        EscalationState {
            entity_id: EntityId::new("acme"),
            cycle,
            status: EscalationStatus::Evaluating,
            objections: Vec::new(),
        }
    }

    fn verdict(outcome: Outcome, actions: Vec<RecommendedAction>) -> Verdict {
        let objections = match outcome {
            Outcome::Pass => Vec::new(),
            Outcome::Flagged => vec![Objection::new(
                "unused-evidence",
                Severity::Soft,
                "Why were the available sources news not used?",
            )],
        };
        Verdict {
            entity_id: EntityId::new("acme"),
            outcome,
            declared_confidence: 0.7,
            confidence: 0.6,
            objections,
            actions,
            semantic: SemanticContribution::Absent,
        }
    }

    #[test]
    fn test_pass_on_first_cycle_is_accepted() {
        let decision = EscalationController::new(3)
            .decide(&evaluating(1), &verdict(Outcome::Pass, vec![RecommendedAction::Approved]))
            .unwrap();
        assert_eq!(decision.intent, Intent::Accept);
        assert_eq!(decision.next.status, EscalationStatus::Accepted);
        assert_eq!(decision.next.cycle, 1);
    }

    #[test]
    fn test_flagged_reruns_with_objections() {
        let flagged = verdict(Outcome::Flagged, vec![RecommendedAction::Rerun]);
        let decision = EscalationController::new(3).decide(&evaluating(1), &flagged).unwrap();

        assert_eq!(decision.next.status, EscalationStatus::Analyzing);
        assert_eq!(decision.next.cycle, 2);
        assert_eq!(decision.next.objections, flagged.objections);
        assert_eq!(
            decision.intent,
            Intent::Rerun {
                objections: flagged.objections.clone()
            }
        );
    }

    #[test]
    fn test_objections_accumulate() {
        let controller = EscalationController::new(3);
        let flagged = verdict(Outcome::Flagged, vec![RecommendedAction::Rerun]);

        let first = controller.decide(&evaluating(1), &flagged).unwrap().next;
        let mut state = first;
        state.status = EscalationStatus::Evaluating;
        let second = controller.decide(&state, &flagged).unwrap().next;
        assert_eq!(second.objections.len(), 2);
        assert_eq!(second.prior_questions().len(), 2);
    }

    #[test]
    fn test_flagged_at_last_cycle_is_exhausted() {
        let decision = EscalationController::new(3)
            .decide(&evaluating(3), &verdict(Outcome::Flagged, vec![RecommendedAction::Rerun]))
            .unwrap();
        assert_eq!(decision.intent, Intent::Exhaust);
        assert_eq!(decision.next.status, EscalationStatus::Exhausted);
        assert_eq!(decision.next.cycle, 3);
        assert_eq!(decision.next.objections.len(), 1);
    }

    #[test]
    fn test_recollection_only_when_enabled_and_data_missing() {
        let add_data = verdict(
            Outcome::Flagged,
            vec![RecommendedAction::AddData, RecommendedAction::Rerun],
        );

        let plain = EscalationController::new(3).decide(&evaluating(1), &add_data).unwrap();
        assert!(matches!(plain.intent, Intent::Rerun { .. }));

        let recollecting = EscalationController::new(3).with_recollection(true);
        let decision = recollecting.decide(&evaluating(1), &add_data).unwrap();
        assert_eq!(decision.intent, Intent::RequeueCollection);
        assert_eq!(decision.next.status, EscalationStatus::Collecting);
        assert_eq!(decision.next.cycle, 2);

        let rerun_only = verdict(Outcome::Flagged, vec![RecommendedAction::Rerun]);
        let decision = recollecting.decide(&evaluating(1), &rerun_only).unwrap();
        assert!(matches!(decision.intent, Intent::Rerun { .. }));
    }

    #[test]
    fn test_terminal_state_is_refused() {
        let mut state = evaluating(2);
        state.status = EscalationStatus::Accepted;
        let result = EscalationController::new(3).decide(&state, &verdict(Outcome::Pass, vec![]));
        assert!(matches!(
            result,
            Err(CoordinatorError::InvalidTransition {
                status: EscalationStatus::Accepted,
                ..
            })
        ));
    }

    #[test]
    fn test_foreign_verdict_is_refused() {
        let mut other = verdict(Outcome::Pass, vec![]);
        other.entity_id = EntityId::new("globex");
        assert!(EscalationController::new(3).decide(&evaluating(1), &other).is_err());
    }
}

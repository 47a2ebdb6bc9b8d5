// Progress of a patient's adherence goal against a computed rollup.

use serde::Serialize;
use thiserror::Error;

use medtrack_core::model::{AdherenceGoal, AdherenceStats, GoalId};

#[derive(Debug, Error, PartialEq)]
pub enum GoalError {
    #[error("target score {0} must be greater than 0 and at most 100")]
    TargetOutOfRange(f64),
}

/// Reject targets outside `(0, 100]`.
pub fn validate_target(target: f64) -> Result<f64, GoalError> {
    if target.is_finite() && target > 0.0 && target <= 100.0 {
        Ok(target)
    } else {
        Err(GoalError::TargetOutOfRange(target))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub goal_id: GoalId,
    pub score: f64,
    pub target: f64,
    pub met: bool,
    /// Points still missing to reach the target; zero once met.
    pub gap: f64,
}

/// Compare a rollup with a goal. A goal that is inactive, or does not cover
/// the rollup's last day, is never met.
pub fn evaluate(goal: &AdherenceGoal, stats: &AdherenceStats) -> GoalProgress {
    let score = stats.adherence_score;
    let applies = goal.applies_on(stats.period_end.min(stats.computed_at.date()));
    let met = applies && stats.total_scheduled > 0 && score >= goal.target_score;
    GoalProgress {
        goal_id: goal.id,
        score,
        target: goal.target_score,
        met,
        gap: if met { 0.0 } else { (goal.target_score - score).max(0.0) },
    }
}

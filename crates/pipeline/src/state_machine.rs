use genflow_core::{JobStatus, PhaseStatus};

use crate::error::{PipelineError, Result};

/// Legal job status transitions.
pub struct JobStateMachine;

impl JobStateMachine {
    pub fn validate_transition(from: &JobStatus, to: &JobStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &JobStatus) -> Vec<JobStatus> {
        match from {
            JobStatus::Queued => vec![JobStatus::Processing, JobStatus::Cancelled],
            JobStatus::Processing => vec![
                JobStatus::WaitingFeedback,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::WaitingFeedback => vec![
                JobStatus::Processing,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => vec![],
        }
    }

    pub fn can_transition(from: &JobStatus, to: &JobStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Legal phase status transitions within one phase execution.
pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: &PhaseStatus, to: &PhaseStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PhaseStatus) -> Vec<PhaseStatus> {
        match from {
            PhaseStatus::Pending => vec![PhaseStatus::Running, PhaseStatus::Skipped],
            PhaseStatus::Running => vec![
                PhaseStatus::Completed,
                PhaseStatus::Failed,
                PhaseStatus::WaitingHitl,
                PhaseStatus::Retrying,
            ],
            PhaseStatus::Retrying => vec![PhaseStatus::Running, PhaseStatus::Failed],
            PhaseStatus::WaitingHitl => vec![
                PhaseStatus::Running,
                PhaseStatus::Completed,
                PhaseStatus::Failed,
            ],
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Skipped => vec![],
        }
    }

    pub fn can_transition(from: &PhaseStatus, to: &PhaseStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_job_transitions() {
        assert!(JobStateMachine::can_transition(
            &JobStatus::Queued,
            &JobStatus::Processing
        ));
        assert!(JobStateMachine::can_transition(
            &JobStatus::Processing,
            &JobStatus::WaitingFeedback
        ));
        assert!(JobStateMachine::can_transition(
            &JobStatus::WaitingFeedback,
            &JobStatus::Processing
        ));
    }

    #[test]
    fn test_invalid_job_transitions() {
        assert!(!JobStateMachine::can_transition(
            &JobStatus::Queued,
            &JobStatus::Completed
        ));
        assert!(!JobStateMachine::can_transition(
            &JobStatus::Completed,
            &JobStatus::Processing
        ));
        assert!(!JobStateMachine::can_transition(
            &JobStatus::Failed,
            &JobStatus::Queued
        ));
    }

    #[test]
    fn test_cancel_reachable_from_every_live_status() {
        for from in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::WaitingFeedback,
        ] {
            assert!(JobStateMachine::can_transition(&from, &JobStatus::Cancelled));
        }
    }

    #[test]
    fn test_valid_phase_transitions() {
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Running
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Retrying
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Retrying,
            &PhaseStatus::Running
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::WaitingHitl,
            &PhaseStatus::Completed
        ));
    }

    #[test]
    fn test_terminal_phase_statuses_are_final() {
        for from in [
            PhaseStatus::Completed,
            PhaseStatus::Failed,
            PhaseStatus::Skipped,
        ] {
            for to in [PhaseStatus::Running, PhaseStatus::Pending] {
                assert!(!PhaseStateMachine::can_transition(&from, &to));
            }
        }
    }
}

//! Workflow state for the requirements → claim → analysis wizard.
//!
//! Every transition is a plain method that mutates the state and returns the
//! [`Effect`]s a renderer should apply. Nothing here touches the network.

use crate::api::error::WorkflowError;
use crate::models::{DocumentIds, Step, UploadStep, WorkflowSnapshot};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle(Step),
    Uploading(UploadStep),
    StepComplete(UploadStep),
    Analyzing,
    Error(UploadStep),
    /// Terminal: the caller navigated to the analysis chat
    Redirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Processing,
    Success,
    Error,
}

/// UI change requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Controls { step: Step, enabled: bool },
    Progress { step: UploadStep, percent: u8 },
    HideProgress { step: UploadStep },
    StepIndicator { step: Step, completed: bool },
    /// Overall wizard bar, `step / 3` wide
    WizardProgress { step: Step },
    Status { step: Step, kind: StatusKind, message: String },
    ClearStatus { step: Step },
    ScrollTo { step: Step },
    Navigate { location: String },
}

/// Documents to analyze plus the effects of entering `Analyzing`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisStart {
    pub requirements_doc_id: String,
    pub claim_doc_id: String,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    phase: Phase,
    completed: BTreeSet<UploadStep>,
    document_ids: DocumentIds,
    upload_progress: u8,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle(Step::Requirements),
            completed: BTreeSet::new(),
            document_ids: DocumentIds::default(),
            upload_progress: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Lowest incomplete step, or the analysis step once both uploads are done
    pub fn current_step(&self) -> Step {
        if !self.is_completed(UploadStep::Requirements) {
            Step::Requirements
        } else if !self.is_completed(UploadStep::Claim) {
            Step::Claim
        } else {
            Step::Analysis
        }
    }

    pub fn completed(&self) -> &BTreeSet<UploadStep> {
        &self.completed
    }

    pub fn is_completed(&self, step: UploadStep) -> bool {
        self.completed.contains(&step)
    }

    pub fn document_ids(&self) -> &DocumentIds {
        &self.document_ids
    }

    pub fn upload_progress(&self) -> u8 {
        self.upload_progress
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.phase, Phase::Uploading(_))
    }

    /// An upload or the analysis request is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Uploading(_) | Phase::Analyzing)
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Redirected
    }

    /// Step N+1 is unlocked iff step N is complete. The analysis also needs
    /// the requirements document, which a failed re-upload can drop.
    pub fn is_unlocked(&self, step: Step) -> bool {
        match step {
            Step::Analysis => self.analysis_documents().is_some(),
            _ => step
                .prerequisite()
                .is_none_or(|required| self.is_completed(required)),
        }
    }

    /// Effects that bring a fresh page in line with this state
    pub fn initial_effects(&self) -> Vec<Effect> {
        self.gate_effects()
    }

    /// `Ok(false)` while another request is in flight, a gating error when
    /// the prerequisite step is missing.
    pub fn can_upload(&self, step: UploadStep) -> Result<bool, WorkflowError> {
        self.ensure_not_finished()?;
        if self.is_busy() {
            return Ok(false);
        }
        if let Some(required) = step.step().prerequisite() {
            if !self.is_completed(required) {
                return Err(WorkflowError::step_required(required.step().number()));
            }
        }
        Ok(true)
    }

    pub fn begin_upload(&mut self, step: UploadStep) -> Result<Option<Vec<Effect>>, WorkflowError> {
        if !self.can_upload(step)? {
            return Ok(None);
        }

        self.phase = Phase::Uploading(step);
        self.upload_progress = 0;

        Ok(Some(vec![
            Effect::ClearStatus { step: step.step() },
            Effect::Controls {
                step: step.step(),
                enabled: false,
            },
            Effect::Progress { step, percent: 0 },
            Effect::Status {
                step: step.step(),
                kind: StatusKind::Processing,
                message: format!("Uploading {}...", step.label()),
            },
        ]))
    }

    /// Records a progress value; only strictly larger values produce an effect
    pub fn record_progress(&mut self, percent: u8) -> Option<Effect> {
        let Phase::Uploading(step) = self.phase else {
            return None;
        };
        let percent = percent.min(100);
        if percent <= self.upload_progress {
            return None;
        }
        self.upload_progress = percent;
        Some(Effect::Progress { step, percent })
    }

    /// Marks `step` complete. Ignored unless that upload is in flight.
    pub fn complete_upload(&mut self, step: UploadStep, document_id: String) -> Vec<Effect> {
        if self.phase != Phase::Uploading(step) {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some(progress) = self.record_progress(100) {
            effects.push(progress);
        }

        self.completed.insert(step);
        self.document_ids.set(step, Some(document_id));
        self.phase = Phase::StepComplete(step);

        effects.push(Effect::Status {
            step: step.step(),
            kind: StatusKind::Success,
            message: format!("{} uploaded successfully", capitalize(step.label())),
        });
        effects.extend(self.gate_effects());
        effects
    }

    /// Leaves `StepComplete` for the next idle step
    pub fn advance(&mut self) -> Vec<Effect> {
        let Phase::StepComplete(step) = self.phase else {
            return Vec::new();
        };
        let next = self.current_step();
        self.phase = Phase::Idle(next);
        vec![
            Effect::HideProgress { step },
            Effect::ScrollTo { step: next },
        ]
    }

    /// Resets `step` to incomplete and drops its document id. Ignored unless
    /// that upload is in flight.
    pub fn fail_upload(&mut self, step: UploadStep, error: &WorkflowError) -> Vec<Effect> {
        if self.phase != Phase::Uploading(step) {
            return Vec::new();
        }

        self.completed.remove(&step);
        self.document_ids.set(step, None);
        self.upload_progress = 0;
        self.phase = Phase::Error(step);

        let mut effects = vec![
            Effect::HideProgress { step },
            Effect::Status {
                step: step.step(),
                kind: StatusKind::Error,
                message: error.user_message(),
            },
        ];
        effects.extend(self.gate_effects());
        effects
    }

    /// `Error(step)` back to `Idle(step)`
    pub fn retry(&mut self) -> Vec<Effect> {
        let Phase::Error(step) = self.phase else {
            return Vec::new();
        };
        self.phase = Phase::Idle(step.step());
        vec![Effect::ClearStatus { step: step.step() }]
    }

    /// Effects for an action refused before reaching the transport
    pub fn reject(&self, step: Step, error: &WorkflowError) -> Vec<Effect> {
        vec![Effect::Status {
            step,
            kind: StatusKind::Error,
            message: error.user_message(),
        }]
    }

    pub fn begin_analysis(&mut self) -> Result<Option<AnalysisStart>, WorkflowError> {
        self.ensure_not_finished()?;
        if self.is_busy() {
            return Ok(None);
        }
        let Some((requirements_doc_id, claim_doc_id)) = self.analysis_documents() else {
            return Err(WorkflowError::Gating(
                "Please complete both document uploads first".to_string(),
            ));
        };

        self.phase = Phase::Analyzing;
        let effects = vec![
            Effect::ClearStatus {
                step: Step::Analysis,
            },
            Effect::Controls {
                step: Step::Analysis,
                enabled: false,
            },
            Effect::Status {
                step: Step::Analysis,
                kind: StatusKind::Processing,
                message: "Analyzing documents...".to_string(),
            },
        ];
        Ok(Some(AnalysisStart {
            requirements_doc_id,
            claim_doc_id,
            effects,
        }))
    }

    /// `(requirements, claim)` ids when both uploads are complete
    pub fn analysis_documents(&self) -> Option<(String, String)> {
        if !self.is_completed(UploadStep::Requirements) || !self.is_completed(UploadStep::Claim) {
            return None;
        }
        let ids = &self.document_ids;
        Some((ids.requirements.clone()?, ids.claim.clone()?))
    }

    pub fn complete_analysis(&mut self, chat_id: &str) -> Vec<Effect> {
        if self.phase != Phase::Analyzing {
            return Vec::new();
        }
        self.phase = Phase::Redirected;
        vec![
            Effect::Status {
                step: Step::Analysis,
                kind: StatusKind::Success,
                message: "Analysis completed successfully".to_string(),
            },
            Effect::Navigate {
                location: chat_location(chat_id),
            },
        ]
    }

    pub fn fail_analysis(&mut self, error: &WorkflowError) -> Vec<Effect> {
        if self.phase != Phase::Analyzing {
            return Vec::new();
        }
        self.phase = Phase::Idle(Step::Analysis);
        vec![
            Effect::Controls {
                step: Step::Analysis,
                enabled: true,
            },
            Effect::Status {
                step: Step::Analysis,
                kind: StatusKind::Error,
                message: error.user_message(),
            },
        ]
    }

    /// Applies documents the server already knows about. Skipped while busy.
    pub fn rehydrate(&mut self, snapshot: &WorkflowSnapshot) -> Vec<Effect> {
        if self.is_busy() || self.is_finished() {
            return Vec::new();
        }

        let known = [
            (UploadStep::Requirements, &snapshot.requirements_doc_id),
            (UploadStep::Claim, &snapshot.claim_doc_id),
        ];
        let mut changed = false;
        for (step, id) in known {
            if let Some(id) = id {
                self.completed.insert(step);
                self.document_ids.set(step, Some(id.clone()));
                changed = true;
            }
        }
        if !changed {
            return Vec::new();
        }

        self.phase = Phase::Idle(self.current_step());
        self.gate_effects()
    }

    fn ensure_not_finished(&self) -> Result<(), WorkflowError> {
        if self.is_finished() {
            return Err(WorkflowError::Gating(
                "The analysis has already started".to_string(),
            ));
        }
        Ok(())
    }

    fn gate_effects(&self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(7);
        for step in Step::ALL {
            effects.push(Effect::Controls {
                step,
                enabled: self.is_unlocked(step),
            });
        }
        for step in [UploadStep::Requirements, UploadStep::Claim] {
            effects.push(Effect::StepIndicator {
                step: step.step(),
                completed: self.is_completed(step),
            });
        }
        effects.push(Effect::WizardProgress {
            step: self.current_step(),
        });
        effects
    }
}

/// Where the browser goes once the analysis chat exists
pub fn chat_location(chat_id: &str) -> String {
    format!("/chat?chat_id={}", chat_id)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(state: &mut WorkflowState, step: UploadStep, id: &str) {
        state.begin_upload(step).unwrap().unwrap();
        state.complete_upload(step, id.to_string());
        state.advance();
    }

    fn controls(effects: &[Effect], step: Step) -> Option<bool> {
        effects.iter().rev().find_map(|e| match e {
            Effect::Controls { step: s, enabled } if *s == step => Some(*enabled),
            _ => None,
        })
    }

    #[test]
    fn test_initial_state() {
        let state = WorkflowState::new();
        assert_eq!(state.phase(), Phase::Idle(Step::Requirements));
        assert_eq!(state.current_step(), Step::Requirements);
        assert!(!state.is_uploading());

        let effects = state.initial_effects();
        assert_eq!(controls(&effects, Step::Requirements), Some(true));
        assert_eq!(controls(&effects, Step::Claim), Some(false));
        assert_eq!(controls(&effects, Step::Analysis), Some(false));
        assert!(effects.contains(&Effect::WizardProgress {
            step: Step::Requirements
        }));
    }

    #[test]
    fn test_happy_path_unlocks_steps() {
        let mut state = WorkflowState::new();

        let started = state.begin_upload(UploadStep::Requirements).unwrap().unwrap();
        assert_eq!(controls(&started, Step::Requirements), Some(false));
        assert!(state.is_uploading());

        let done = state.complete_upload(UploadStep::Requirements, "req-1".into());
        assert_eq!(controls(&done, Step::Claim), Some(true));
        assert_eq!(state.phase(), Phase::StepComplete(UploadStep::Requirements));

        let advanced = state.advance();
        assert!(advanced.contains(&Effect::ScrollTo { step: Step::Claim }));
        assert_eq!(state.phase(), Phase::Idle(Step::Claim));
        assert_eq!(state.document_ids().requirements.as_deref(), Some("req-1"));

        upload(&mut state, UploadStep::Claim, "claim-1");
        assert_eq!(state.current_step(), Step::Analysis);
        assert!(state.is_unlocked(Step::Analysis));
        assert_eq!(
            state.analysis_documents(),
            Some(("req-1".to_string(), "claim-1".to_string()))
        );
    }

    #[test]
    fn test_claim_gated_on_requirements() {
        let mut state = WorkflowState::new();
        assert_eq!(state.can_upload(UploadStep::Requirements), Ok(true));
        let err = state.begin_upload(UploadStep::Claim).unwrap_err();
        assert_eq!(err, WorkflowError::step_required(1));
        assert_eq!(state.phase(), Phase::Idle(Step::Requirements));
    }

    #[test]
    fn test_busy_submit_is_ignored() {
        let mut state = WorkflowState::new();
        state.begin_upload(UploadStep::Requirements).unwrap();
        assert_eq!(state.begin_upload(UploadStep::Requirements), Ok(None));
        assert_eq!(state.phase(), Phase::Uploading(UploadStep::Requirements));
    }

    #[test]
    fn test_failure_resets_step() {
        let mut state = WorkflowState::new();
        upload(&mut state, UploadStep::Requirements, "req-1");

        // Re-uploading a completed step and failing drops the old id
        state.begin_upload(UploadStep::Requirements).unwrap();
        state.record_progress(40);
        let error = WorkflowError::Server {
            status: 400,
            message: "Invalid file".into(),
        };
        let effects = state.fail_upload(UploadStep::Requirements, &error);

        assert_eq!(state.phase(), Phase::Error(UploadStep::Requirements));
        assert!(!state.is_completed(UploadStep::Requirements));
        assert_eq!(state.document_ids().requirements, None);
        assert_eq!(state.upload_progress(), 0);
        assert_eq!(controls(&effects, Step::Claim), Some(false));
        assert!(effects.contains(&Effect::Status {
            step: Step::Requirements,
            kind: StatusKind::Error,
            message: "Invalid file".into(),
        }));

        state.retry();
        assert_eq!(state.phase(), Phase::Idle(Step::Requirements));
    }

    #[test]
    fn test_failed_reupload_locks_later_steps() {
        let mut state = WorkflowState::new();
        upload(&mut state, UploadStep::Requirements, "req-1");
        upload(&mut state, UploadStep::Claim, "claim-1");
        assert!(state.is_unlocked(Step::Analysis));

        state.begin_upload(UploadStep::Requirements).unwrap();
        let effects = state.fail_upload(UploadStep::Requirements, &WorkflowError::Timeout(30_000));

        assert_eq!(controls(&effects, Step::Claim), Some(false));
        assert_eq!(controls(&effects, Step::Analysis), Some(false));
        assert!(state.is_completed(UploadStep::Claim));
        assert_eq!(state.current_step(), Step::Requirements);
        assert!(matches!(state.begin_analysis(), Err(WorkflowError::Gating(_))));
    }

    #[test]
    fn test_late_terminal_events_ignored() {
        let mut state = WorkflowState::new();
        state.begin_upload(UploadStep::Requirements).unwrap();
        state.fail_upload(UploadStep::Requirements, &WorkflowError::Timeout(30_000));

        assert!(state
            .complete_upload(UploadStep::Requirements, "late".into())
            .is_empty());
        assert_eq!(state.document_ids().requirements, None);
        assert_eq!(state.phase(), Phase::Error(UploadStep::Requirements));
    }

    #[test]
    fn test_progress_only_increases() {
        let mut state = WorkflowState::new();
        assert_eq!(state.record_progress(10), None);

        state.begin_upload(UploadStep::Requirements).unwrap();
        assert!(state.record_progress(30).is_some());
        assert_eq!(state.record_progress(20), None);
        assert_eq!(state.record_progress(30), None);
        assert_eq!(
            state.record_progress(250),
            Some(Effect::Progress {
                step: UploadStep::Requirements,
                percent: 100
            })
        );
    }

    #[test]
    fn test_analysis_requires_both_uploads() {
        let mut state = WorkflowState::new();
        upload(&mut state, UploadStep::Requirements, "req-1");
        assert!(matches!(
            state.begin_analysis(),
            Err(WorkflowError::Gating(_))
        ));

        upload(&mut state, UploadStep::Claim, "claim-1");
        let start = state.begin_analysis().unwrap().unwrap();
        assert_eq!(start.requirements_doc_id, "req-1");
        assert_eq!(start.claim_doc_id, "claim-1");
        assert_eq!(state.phase(), Phase::Analyzing);
        assert_eq!(state.begin_upload(UploadStep::Claim), Ok(None));

        let effects = state.fail_analysis(&WorkflowError::Network("down".into()));
        assert_eq!(controls(&effects, Step::Analysis), Some(true));
        assert_eq!(state.phase(), Phase::Idle(Step::Analysis));

        state.begin_analysis().unwrap().unwrap();
        let effects = state.complete_analysis("77");
        assert!(effects.contains(&Effect::Navigate {
            location: "/chat?chat_id=77".into()
        }));
        assert!(state.is_finished());
        assert!(state.begin_upload(UploadStep::Requirements).is_err());
    }

    #[test]
    fn test_rehydrate() {
        let mut state = WorkflowState::new();
        let effects = state.rehydrate(&WorkflowSnapshot {
            requirements_doc_id: Some("9".into()),
            claim_doc_id: None,
        });

        assert_eq!(controls(&effects, Step::Claim), Some(true));
        assert_eq!(controls(&effects, Step::Analysis), Some(false));
        assert_eq!(state.phase(), Phase::Idle(Step::Claim));

        assert!(state.rehydrate(&WorkflowSnapshot::default()).is_empty());
    }
}

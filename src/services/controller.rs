use crate::api::error::WorkflowError;
use crate::config::WorkflowConfig;
use crate::models::{
    AnalysisRequest, AnalysisResponse, ErrorBody, Step, UploadFile, UploadResponse, UploadStep,
    UploadTask, WorkflowSnapshot, opaque_id,
};
use crate::services::progress::{InterpolatedRamp, ProgressMode, ProgressTracker};
use crate::services::renderer::EffectSink;
use crate::services::transport::{Transport, TransportResponse};
use crate::services::workflow_state::{WorkflowState, chat_location};
use crate::utils::validation::{
    FileConstraints, ValidationResult, format_file_size, require_valid, validate_file,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed {
        step: UploadStep,
        document_id: String,
        /// Step the caller should scroll to
        next_step: Step,
    },
    /// Another request was in flight; nothing was sent
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Redirect { chat_id: String, location: String },
    Ignored,
}

/// Drives the requirements → claim → analysis wizard.
///
/// Owns the [`WorkflowState`]; every transition is forwarded to the
/// [`EffectSink`] while the state lock is held, so effects are applied in the
/// order the transitions happened.
pub struct UploadWorkflowController {
    config: WorkflowConfig,
    constraints: FileConstraints,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EffectSink>,
    state: Mutex<WorkflowState>,
    active_upload: StdMutex<Option<CancellationToken>>,
}

impl UploadWorkflowController {
    pub fn new(
        config: WorkflowConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EffectSink>,
    ) -> Self {
        let state = WorkflowState::new();
        sink.apply_all(&state.initial_effects());

        Self {
            constraints: config.constraints(),
            config,
            transport,
            sink,
            state: Mutex::new(state),
            active_upload: StdMutex::new(None),
        }
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> WorkflowState {
        self.state.lock().await.clone()
    }

    pub fn constraints(&self) -> &FileConstraints {
        &self.constraints
    }

    pub fn validate_file(&self, file: Option<&UploadFile>) -> ValidationResult {
        validate_file(file, &self.constraints)
    }

    /// Validates `file` and uploads it for `step`.
    ///
    /// Returns `Ignored` without touching the network while another request is
    /// in flight. Gating and validation failures are reported before any
    /// request is made; transport failures reset the step.
    pub async fn submit_upload(
        &self,
        step: UploadStep,
        file: Option<UploadFile>,
    ) -> Result<UploadOutcome, WorkflowError> {
        let (task, cancel) = {
            let mut state = self.state.lock().await;

            match state.can_upload(step) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Ignoring {} upload: a request is already in flight", step);
                    return Ok(UploadOutcome::Ignored);
                }
                Err(e) => {
                    warn!("🚫 {} upload refused: {}", step, e);
                    self.sink.apply_all(&state.reject(step.step(), &e));
                    return Err(e);
                }
            }

            let file = match require_valid(file, &self.constraints) {
                Ok(file) => file,
                Err(reason) => {
                    let e = WorkflowError::Validation(reason);
                    warn!("🚫 {} upload rejected: {}", step, e);
                    self.sink.apply_all(&state.reject(step.step(), &e));
                    return Err(e);
                }
            };

            let task = self.build_task(step, file, &state);
            if let Some(effects) = state.begin_upload(step)? {
                self.sink.apply_all(&effects);
            }

            let cancel = CancellationToken::new();
            *self
                .active_upload
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
            (task, cancel)
        };

        info!(
            request_id = %task.request_id,
            "📤 Uploading {} '{}' ({}) to {}",
            step.label(),
            task.file.name,
            format_file_size(task.file.size()),
            task.endpoint
        );

        let (tracker, mut progress_rx) = ProgressTracker::new();
        let mode = ProgressMode::select(
            self.transport.supports_progress(),
            self.config.native_progress,
        );
        let (transport_tracker, ramp) = match mode {
            ProgressMode::Native => (tracker.clone(), None),
            ProgressMode::Interpolated => {
                // Byte counts from the transport are not wanted here
                let (detached, _) = ProgressTracker::new();
                let ramp = InterpolatedRamp::from_config(&self.config).spawn(tracker.clone());
                (detached, Some(ramp))
            }
        };

        let transfer = self.transport.upload(&task, transport_tracker);
        tokio::pin!(transfer);
        let deadline = tokio::time::sleep(task.timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(WorkflowError::Aborted),
                _ = &mut deadline => break Err(WorkflowError::Timeout(millis(task.timeout))),
                Some(percent) = progress_rx.recv() => self.apply_progress(percent).await,
                response = &mut transfer => {
                    break response.and_then(|r| decode::<UploadResponse>(r, "Upload"))
                        .and_then(|body| {
                            opaque_id(&body.document_id).ok_or_else(|| {
                                WorkflowError::MalformedResponse(
                                    "response has no usable document_id".to_string(),
                                )
                            })
                        });
                }
            }
        };

        // Nothing reported after this point reaches the state
        tracker.seal();
        drop(ramp);
        self.active_upload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut state = self.state.lock().await;
        match result {
            Ok(document_id) => {
                while let Ok(percent) = progress_rx.try_recv() {
                    if let Some(effect) = state.record_progress(percent) {
                        self.sink.apply(&effect);
                    }
                }
                self.sink
                    .apply_all(&state.complete_upload(step, document_id.clone()));
                self.sink.apply_all(&state.advance());
                let next_step = state.current_step();

                info!(
                    request_id = %task.request_id,
                    "✅ {} uploaded as document {}",
                    step.label(),
                    document_id
                );
                Ok(UploadOutcome::Completed {
                    step,
                    document_id,
                    next_step,
                })
            }
            Err(e) => {
                error!(
                    request_id = %task.request_id,
                    kind = %e.kind(),
                    "❌ {} upload failed: {}",
                    step.label(),
                    e
                );
                self.sink.apply_all(&state.fail_upload(step, &e));
                Err(e)
            }
        }
    }

    /// Cancels the upload in flight. Returns false when there is none.
    pub fn abort_upload(&self) -> bool {
        let token = self
            .active_upload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match token {
            Some(token) => {
                info!("🛑 Aborting upload in flight");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Leaves the error state of a failed upload
    pub async fn retry(&self) {
        let mut state = self.state.lock().await;
        self.sink.apply_all(&state.retry());
    }

    /// Starts the analysis of the two uploaded documents
    pub async fn run_analysis(
        &self,
        analysis_type: &str,
    ) -> Result<AnalysisOutcome, WorkflowError> {
        let start = {
            let mut state = self.state.lock().await;
            match state.begin_analysis() {
                Ok(Some(start)) => {
                    self.sink.apply_all(&start.effects);
                    start
                }
                Ok(None) => {
                    warn!("Ignoring analysis request: a request is already in flight");
                    return Ok(AnalysisOutcome::Ignored);
                }
                Err(e) => {
                    warn!("🚫 Analysis refused: {}", e);
                    self.sink.apply_all(&state.reject(Step::Analysis, &e));
                    return Err(e);
                }
            }
        };

        info!(
            "🔎 Requesting '{}' analysis of requirements {} and claim {}",
            analysis_type, start.requirements_doc_id, start.claim_doc_id
        );

        let request = AnalysisRequest {
            claim_document_id: start.claim_doc_id,
            requirement_document_id: start.requirements_doc_id,
            analysis_type: analysis_type.to_string(),
        };
        let result = match serde_json::to_value(&request) {
            Ok(body) => self
                .with_deadline(
                    self.transport
                        .post_json(&self.config.analysis_endpoint, &body),
                    self.config.analysis_timeout(),
                )
                .await
                .and_then(|r| decode::<AnalysisResponse>(r, "Analysis"))
                .and_then(|body| {
                    opaque_id(&body.chat_id).ok_or_else(|| {
                        WorkflowError::MalformedResponse(
                            "response has no usable chat_id".to_string(),
                        )
                    })
                }),
            Err(e) => Err(WorkflowError::MalformedResponse(e.to_string())),
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(chat_id) => {
                self.sink.apply_all(&state.complete_analysis(&chat_id));
                let location = chat_location(&chat_id);
                info!("✅ Analysis ready in chat {}", chat_id);
                Ok(AnalysisOutcome::Redirect { chat_id, location })
            }
            Err(e) => {
                error!(kind = %e.kind(), "❌ Analysis failed: {}", e);
                self.sink.apply_all(&state.fail_analysis(&e));
                Err(e)
            }
        }
    }

    /// Marks steps complete for documents the server already holds
    pub async fn rehydrate(&self) -> Result<WorkflowSnapshot, WorkflowError> {
        let snapshot = self
            .with_deadline(
                self.transport
                    .get_json(&self.config.workflow_state_endpoint),
                self.config.analysis_timeout(),
            )
            .await
            .and_then(|r| decode::<WorkflowSnapshot>(r, "Workflow state"))?;

        let mut state = self.state.lock().await;
        let effects = state.rehydrate(&snapshot);
        if !effects.is_empty() {
            info!(
                "🔁 Restored workflow: requirements={:?} claim={:?}",
                snapshot.requirements_doc_id, snapshot.claim_doc_id
            );
        }
        self.sink.apply_all(&effects);
        Ok(snapshot)
    }

    fn build_task(&self, step: UploadStep, file: UploadFile, state: &WorkflowState) -> UploadTask {
        let mut fields = vec![(
            "processing_type".to_string(),
            step.processing_type().to_string(),
        )];
        let endpoint = match step {
            UploadStep::Requirements => self.config.requirements_endpoint.clone(),
            UploadStep::Claim => {
                if let Some(id) = state.document_ids().requirements.clone() {
                    fields.push(("requirements_doc_id".to_string(), id));
                }
                self.config.claim_endpoint.clone()
            }
        };

        UploadTask {
            step,
            file,
            endpoint,
            timeout: self.config.upload_timeout(),
            fields,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    async fn apply_progress(&self, percent: u8) {
        let mut state = self.state.lock().await;
        if let Some(effect) = state.record_progress(percent) {
            self.sink.apply(&effect);
        }
    }

    async fn with_deadline<F>(
        &self,
        request: F,
        limit: Duration,
    ) -> Result<TransportResponse, WorkflowError>
    where
        F: Future<Output = Result<TransportResponse, WorkflowError>>,
    {
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| WorkflowError::Timeout(millis(limit)))?
    }
}

/// Non-2xx responses become server errors carrying the `error` field, 2xx
/// bodies must decode as `T`.
fn decode<T: DeserializeOwned>(
    response: TransportResponse,
    action: &str,
) -> Result<T, WorkflowError> {
    if !response.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&response.body)
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("{} failed with status: {}", action, response.status));
        return Err(WorkflowError::Server {
            status: response.status,
            message,
        });
    }

    serde_json::from_slice(&response.body)
        .map_err(|e| WorkflowError::MalformedResponse(format!("{}: {}", action, e)))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_server_error_body() {
        let err = decode::<UploadResponse>(
            TransportResponse::new(400, r#"{"error": "Invalid file"}"#),
            "Upload",
        )
        .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Server {
                status: 400,
                message: "Invalid file".into()
            }
        );
    }

    #[test]
    fn test_decode_server_error_without_body() {
        let err =
            decode::<UploadResponse>(TransportResponse::new(502, "<html>"), "Upload").unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Server {
                status: 502,
                message: "Upload failed with status: 502".into()
            }
        );
    }

    #[test]
    fn test_decode_malformed_success() {
        let err = decode::<UploadResponse>(TransportResponse::new(200, "not json"), "Upload")
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "MALFORMED_RESPONSE");

        let ok: UploadResponse =
            decode(TransportResponse::new(200, r#"{"document_id": 5}"#), "Upload").unwrap();
        assert_eq!(opaque_id(&ok.document_id).as_deref(), Some("5"));
    }
}

use crate::services::workflow_state::{Effect, StatusKind};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Consumer of the effects produced by workflow transitions
pub trait EffectSink: Send + Sync {
    fn apply(&self, effect: &Effect);

    fn apply_all(&self, effects: &[Effect]) {
        for effect in effects {
            self.apply(effect);
        }
    }
}

/// Logs every effect through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EffectSink for TracingSink {
    fn apply(&self, effect: &Effect) {
        match effect {
            Effect::Progress { step, percent } => {
                tracing::debug!(%step, percent, "upload progress");
            }
            Effect::Status {
                step,
                kind: StatusKind::Error,
                message,
            } => tracing::warn!(%step, "{}", message),
            Effect::Status { step, message, .. } => tracing::info!(%step, "{}", message),
            Effect::Navigate { location } => tracing::info!("➡️  Navigate to {}", location),
            other => tracing::trace!(?other, "effect"),
        }
    }
}

/// Keeps every effect, in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    effects: Mutex<Vec<Effect>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Progress percentages in the order they were applied
    pub fn progress_values(&self) -> Vec<u8> {
        self.effects()
            .iter()
            .filter_map(|e| match e {
                Effect::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EffectSink for RecordingSink {
    fn apply(&self, effect: &Effect) {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(effect.clone());
    }
}

/// Terminal rendering for the CLI: a progress line per upload and one line
/// per status change.
#[derive(Debug, Default)]
pub struct ConsoleRenderer;

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self
    }

    fn progress_bar(percent: u8) -> String {
        let filled = usize::from(percent) / 5;
        format!("[{}{}] {:>3}%", "#".repeat(filled), "-".repeat(20 - filled), percent)
    }
}

impl EffectSink for ConsoleRenderer {
    fn apply(&self, effect: &Effect) {
        let mut out = std::io::stdout().lock();
        let _ = match effect {
            Effect::Progress { step, percent } => {
                write!(out, "\r  {} {}", step, Self::progress_bar(*percent))
            }
            Effect::HideProgress { .. } => writeln!(out),
            Effect::Status { step, kind, message } => {
                let marker = match kind {
                    StatusKind::Processing => "⏳",
                    StatusKind::Success => "✅",
                    StatusKind::Error => "❌",
                };
                writeln!(out, "{} [{}] {}", marker, step, message)
            }
            Effect::WizardProgress { step } => {
                writeln!(out, "📋 Workflow at {} of 3", step.number())
            }
            Effect::Navigate { location } => writeln!(out, "➡️  {}", location),
            _ => Ok(()),
        };
        let _ = out.flush();
    }
}

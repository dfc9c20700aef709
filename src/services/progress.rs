use crate::config::WorkflowConfig;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Size of the slices handed to the transport when counting bytes
pub const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

/// Where progress values for an upload come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Bytes handed to the transport over total bytes
    Native,
    /// Synthetic ramp while waiting for the response
    Interpolated,
}

impl ProgressMode {
    pub fn select(transport_supports_progress: bool, prefer_native: bool) -> Self {
        if transport_supports_progress && prefer_native {
            ProgressMode::Native
        } else {
            ProgressMode::Interpolated
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    last: u8,
    sealed: bool,
}

/// Progress for a single upload.
///
/// Values are clamped to `[0, 100]`, rounded, and forwarded only when they
/// exceed the last forwarded value. Once sealed, nothing else is forwarded.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressTracker {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Self {
            state: Mutex::new(TrackerState::default()),
            tx,
        });
        (tracker, rx)
    }

    pub fn report_percent(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0).round() as u8;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.sealed || percent <= state.last {
            return;
        }
        state.last = percent;
        // Receiver gone means the upload already finished
        let _ = self.tx.send(percent);
    }

    pub fn report_bytes(&self, sent: u64, total: u64) {
        if total == 0 {
            self.report_percent(100.0);
        } else {
            self.report_percent(sent as f64 / total as f64 * 100.0);
        }
    }

    /// Single-use completion latch. Returns true only for the first caller.
    pub fn seal(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.sealed {
            return false;
        }
        state.sealed = true;
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed
    }

    pub fn last(&self) -> u8 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last
    }
}

/// Synthetic progress: `step` percent every `tick`, stopping at `ceiling`
#[derive(Debug, Clone, Copy)]
pub struct InterpolatedRamp {
    pub tick: Duration,
    pub step: u8,
    pub ceiling: u8,
}

impl InterpolatedRamp {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            tick: config.progress_tick(),
            step: config.progress_step,
            ceiling: config.progress_ceiling.min(100),
        }
    }

    pub async fn run(self, tracker: Arc<ProgressTracker>) {
        if self.step == 0 {
            return;
        }
        let mut interval = tokio::time::interval(self.tick);
        // The first tick completes immediately
        interval.tick().await;

        let mut progress: u8 = 0;
        while progress < self.ceiling && !tracker.is_sealed() {
            interval.tick().await;
            progress = progress.saturating_add(self.step).min(self.ceiling);
            tracker.report_percent(progress as f64);
        }
    }

    /// Runs the ramp in the background until the guard is dropped
    pub fn spawn(self, tracker: Arc<ProgressTracker>) -> RampGuard {
        RampGuard(tokio::spawn(self.run(tracker)))
    }
}

/// Aborts the ramp task when dropped
pub struct RampGuard(JoinHandle<()>);

impl Drop for RampGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Splits `data` into chunks and reports bytes-sent as the transport pulls them
pub fn counting_stream(
    data: Bytes,
    tracker: Arc<ProgressTracker>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(PROGRESS_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + PROGRESS_CHUNK_SIZE).min(data.len())))
        .collect();

    let mut sent: u64 = 0;
    futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        tracker.report_bytes(sent, total);
        Ok(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<u8>) -> Vec<u8> {
        let mut values = Vec::new();
        while let Ok(v) = rx.try_recv() {
            values.push(v);
        }
        values
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(ProgressMode::select(true, true), ProgressMode::Native);
        assert_eq!(ProgressMode::select(true, false), ProgressMode::Interpolated);
        assert_eq!(ProgressMode::select(false, true), ProgressMode::Interpolated);
    }

    #[test]
    fn test_tracker_is_monotonic_and_clamped() {
        let (tracker, mut rx) = ProgressTracker::new();
        tracker.report_percent(12.4);
        tracker.report_percent(12.6);
        tracker.report_percent(5.0);
        tracker.report_percent(f64::NAN);
        tracker.report_percent(-3.0);
        tracker.report_percent(180.0);
        tracker.report_percent(100.0);

        assert_eq!(drain(&mut rx), vec![12, 13, 100]);
        assert_eq!(tracker.last(), 100);
    }

    #[test]
    fn test_seal_is_single_use() {
        let (tracker, mut rx) = ProgressTracker::new();
        tracker.report_bytes(1, 4);
        assert!(tracker.seal());
        assert!(!tracker.seal());
        tracker.report_bytes(4, 4);

        assert_eq!(drain(&mut rx), vec![25]);
    }

    #[test]
    fn test_empty_body_counts_as_complete() {
        let (tracker, mut rx) = ProgressTracker::new();
        tracker.report_bytes(0, 0);
        assert_eq!(drain(&mut rx), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_stops_at_ceiling() {
        let (tracker, mut rx) = ProgressTracker::new();
        let ramp = InterpolatedRamp {
            tick: Duration::from_millis(500),
            step: 10,
            ceiling: 90,
        };
        ramp.run(tracker.clone()).await;

        assert_eq!(drain(&mut rx), vec![10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_stops_when_sealed() {
        let (tracker, mut rx) = ProgressTracker::new();
        let guard = InterpolatedRamp {
            tick: Duration::from_millis(500),
            step: 10,
            ceiling: 90,
        }
        .spawn(tracker.clone());

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        tracker.seal();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(guard);

        assert_eq!(drain(&mut rx), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_counting_stream_reports_bytes() {
        let (tracker, mut rx) = ProgressTracker::new();
        let data = Bytes::from(vec![7u8; PROGRESS_CHUNK_SIZE * 2 + PROGRESS_CHUNK_SIZE / 2]);

        let chunks: Vec<Bytes> = counting_stream(data.clone(), tracker)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), data.len());
        assert_eq!(drain(&mut rx), vec![40, 80, 100]);
    }
}

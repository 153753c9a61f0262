use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};

use crate::foundation::error::{QuiltError, QuiltResult};

/// Lifecycle of one pipeline run.
///
/// `Idle -> Running -> {Completed, Cancelled, Failed}`. Terminal states are final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    /// Created, not started.
    #[default]
    Idle,
    /// Frames are flowing.
    Running,
    /// Every frame was encoded.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Stopped by an error; see [`ProgressSnapshot::last_error`].
    Failed,
}

impl PipelineState {
    /// `true` for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Point-in-time copy of a run's progress.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Lifecycle state.
    pub state: PipelineState,
    /// Quilt frames handed to the encoder.
    pub frames_processed: u64,
    /// Expected frame count, when the source reports one.
    pub total_frames: Option<u64>,
    /// Cancellation was requested.
    pub cancelled: bool,
    /// Display form of the error that failed the run.
    pub last_error: Option<String>,
}

impl ProgressSnapshot {
    /// Completed share in `0.0..=1.0`, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_frames {
            Some(0) | None => None,
            Some(total) => Some((self.frames_processed as f64 / total as f64).min(1.0)),
        }
    }
}

#[derive(Default)]
struct Shared {
    frames_processed: AtomicU64,
    // 0 = unknown
    total_frames: AtomicU64,
    cancelled: AtomicBool,
    state: Mutex<PipelineState>,
    last_error: Mutex<Option<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<ProgressSnapshot>>>,
}

/// Thread-safe, cloneable handle to one run's progress state.
///
/// The pipeline writes through it; callers on other threads poll [`ProgressHandle::snapshot`],
/// [`ProgressHandle::subscribe`] to updates, or [`ProgressHandle::request_cancel`]. Counters are
/// atomics and the mutexes are held only for a field copy, so readers never stall the pipeline.
#[derive(Clone, Default)]
pub struct ProgressHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProgressHandle")
            .field(&self.snapshot())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressHandle {
    /// Fresh handle in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop. Stages observe the flag between frames.
    pub fn request_cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!("cancellation requested");
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> QuiltResult<()> {
        if self.is_cancelled() {
            Err(QuiltError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *lock(&self.shared.state)
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.shared.total_frames.load(Ordering::Acquire);
        ProgressSnapshot {
            state: self.state(),
            frames_processed: self.shared.frames_processed.load(Ordering::Acquire),
            total_frames: (total > 0).then_some(total),
            cancelled: self.is_cancelled(),
            last_error: lock(&self.shared.last_error).clone(),
        }
    }

    /// Receive a snapshot after every encoded frame and at the terminal transition.
    ///
    /// The channel is unbounded so publishing never blocks; dropped receivers are pruned.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressSnapshot> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.shared
            .total_frames
            .store(total.unwrap_or(0), Ordering::Release);
    }

    pub(crate) fn frame_done(&self) {
        self.shared.frames_processed.fetch_add(1, Ordering::AcqRel);
        self.publish();
    }

    /// Move to `next`. Returns `false` (and changes nothing) if the run is already terminal or
    /// the transition is not allowed.
    pub(crate) fn transition(&self, next: PipelineState) -> bool {
        let changed = {
            let mut state = lock(&self.shared.state);
            let allowed = match (*state, next) {
                (PipelineState::Idle, PipelineState::Running) => true,
                (PipelineState::Idle | PipelineState::Running, s) => s.is_terminal(),
                _ => false,
            };
            if allowed {
                *state = next;
            }
            allowed
        };
        if changed {
            tracing::debug!(state = ?next, "pipeline state");
            if next.is_terminal() {
                self.publish();
            }
        }
        changed
    }

    /// Record `err` and move to `Failed`.
    pub(crate) fn fail(&self, err: &QuiltError) {
        {
            let mut last = lock(&self.shared.last_error);
            if last.is_none() {
                *last = Some(err.to_string());
            }
        }
        self.transition(PipelineState::Failed);
    }

    fn publish(&self) {
        let snap = self.snapshot();
        lock(&self.shared.subscribers).retain(|tx| tx.send(snap.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        let p = ProgressHandle::new();
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.transition(PipelineState::Running));
        assert!(!p.transition(PipelineState::Running));
        assert!(p.transition(PipelineState::Completed));
        assert!(!p.transition(PipelineState::Failed));
        assert_eq!(p.state(), PipelineState::Completed);
    }

    #[test]
    fn fail_records_first_error() {
        let p = ProgressHandle::new();
        p.transition(PipelineState::Running);
        p.fail(&QuiltError::config("rows*cols < viewCount"));
        p.fail(&QuiltError::invalid_frame("later"));
        let s = p.snapshot();
        assert_eq!(s.state, PipelineState::Failed);
        assert_eq!(
            s.last_error.as_deref(),
            Some("invalid configuration: rows*cols < viewCount")
        );
    }

    #[test]
    fn subscribers_see_frames_and_terminal_state() {
        let p = ProgressHandle::new();
        let rx = p.subscribe();
        p.set_total(Some(4));
        p.transition(PipelineState::Running);
        p.frame_done();
        p.frame_done();
        p.transition(PipelineState::Completed);

        let snaps: Vec<_> = rx.try_iter().collect();
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[1].frames_processed, 2);
        assert_eq!(snaps[1].fraction(), Some(0.5));
        assert_eq!(snaps[2].state, PipelineState::Completed);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let p = ProgressHandle::new();
        drop(p.subscribe());
        p.frame_done();
        assert!(lock(&p.shared.subscribers).is_empty());
    }

    #[test]
    fn cancel_is_visible_across_clones() {
        let p = ProgressHandle::new();
        let q = p.clone();
        std::thread::spawn(move || q.request_cancel()).join().unwrap();
        assert!(p.is_cancelled());
        assert!(p.check_cancelled().unwrap_err().is_cancelled());
        assert!(p.snapshot().cancelled);
    }

    #[test]
    fn fraction_is_none_without_total() {
        let p = ProgressHandle::new();
        p.frame_done();
        assert_eq!(p.snapshot().fraction(), None);
    }
}

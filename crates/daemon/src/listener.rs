use lumen_primitives::ViewerId;

/// Host hook notified about round lifecycle.
///
/// Callbacks run on whichever thread drives the round at that moment (the
/// scheduler's caller, a pool worker, or the UI dispatcher). Keep them short.
pub trait DaemonListener: Send + Sync {
	fn daemon_starting(&self, _viewers: &[ViewerId]) {}

	/// Every scheduled pass of the round finished applying.
	fn daemon_finished(&self, _viewers: &[ViewerId]) {}

	/// The round of `generation` was cancelled and has drained.
	fn daemon_cancelled(&self, _generation: u64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl DaemonListener for NoopListener {}

//! Per-round progress and the scheduler's cancellation controller.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};

use lumen_primitives::PassId;
use lumen_worker::{GenerationClock, GenerationToken};
use parking_lot::Mutex;

use crate::pass::{PassError, PassResult};

/// The first hard failure observed in a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassFailure {
	pub pass: PassId,
	pub name: String,
	pub message: String,
}

impl fmt::Display for PassFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "pass {} ({}) failed: {}", self.name, self.pass, self.message)
	}
}

#[derive(Debug)]
struct ProgressState {
	token: GenerationToken,
	failure: OnceLock<PassFailure>,
	stopped: AtomicBool,
}

/// Cancellation and completion state shared by everything in one round.
///
/// Cheap to clone. A progress is either running, stopped (every node
/// finished), or cancelled. Cancellation wins: once cancelled it is never
/// reported as running again.
#[derive(Debug, Clone)]
pub struct DaemonProgress {
	state: Arc<ProgressState>,
}

impl DaemonProgress {
	pub fn new(generation: u64) -> Self {
		Self {
			state: Arc::new(ProgressState {
				token: GenerationToken::new(generation),
				failure: OnceLock::new(),
				stopped: AtomicBool::new(false),
			}),
		}
	}

	/// A progress that is already cancelled; stands in before the first round.
	pub(crate) fn cancelled_placeholder() -> Self {
		let progress = Self::new(0);
		progress.state.token.cancel();
		progress
	}

	pub fn generation(&self) -> u64 {
		self.state.token.generation()
	}

	pub fn is_cancelled(&self) -> bool {
		self.state.token.is_cancelled()
	}

	pub fn is_stopped(&self) -> bool {
		self.state.stopped.load(Ordering::Acquire)
	}

	pub fn is_running(&self) -> bool {
		!self.is_cancelled() && !self.is_stopped()
	}

	/// Requests cancellation. Returns `true` only for the call that flipped it.
	pub fn cancel(&self) -> bool {
		self.state.token.cancel()
	}

	/// Records `failure` if it is the first one, then cancels.
	pub fn cancel_with(&self, failure: PassFailure) -> bool {
		let _ = self.state.failure.set(failure);
		self.cancel()
	}

	pub fn first_failure(&self) -> Option<&PassFailure> {
		self.state.failure.get()
	}

	/// Returns `Err(PassError::Cancelled)` once the round is cancelled.
	pub fn checkpoint(&self) -> PassResult {
		if self.is_cancelled() {
			Err(PassError::Cancelled)
		} else {
			Ok(())
		}
	}

	/// Resolves when the round is cancelled.
	pub async fn cancelled(&self) {
		self.state.token.cancelled().await;
	}

	/// Marks the round as finished unless it was cancelled or already stopped.
	pub(crate) fn stop_if_running(&self) -> bool {
		if self.is_cancelled() {
			return false;
		}
		!self.state.stopped.swap(true, Ordering::AcqRel)
	}

	pub(crate) fn same_round(&self, other: &DaemonProgress) -> bool {
		Arc::ptr_eq(&self.state, &other.state)
	}
}

/// Owns the current progress of a scheduler.
///
/// At most one non-cancelled progress exists at a time: [`Self::rotate`]
/// cancels the current one before installing its successor.
#[derive(Debug)]
pub struct ProgressController {
	clock: GenerationClock,
	current: Mutex<DaemonProgress>,
}

impl Default for ProgressController {
	fn default() -> Self {
		Self::new()
	}
}

impl ProgressController {
	pub fn new() -> Self {
		Self {
			clock: GenerationClock::new(),
			current: Mutex::new(DaemonProgress::cancelled_placeholder()),
		}
	}

	pub fn current(&self) -> DaemonProgress {
		self.current.lock().clone()
	}

	/// Cancels the current progress and installs a fresh one.
	pub fn rotate(&self) -> DaemonProgress {
		let mut current = self.current.lock();
		if current.cancel() {
			tracing::debug!(generation = current.generation(), reason = "rotate", "daemon.cancel");
		}
		let next = DaemonProgress::new(self.clock.next());
		*current = next.clone();
		next
	}

	/// Cancels the current progress if it is still running. Returns `true`
	/// only if this call cancelled a live round; finished rounds are left as
	/// they are.
	pub fn cancel_current(&self, reason: &dyn fmt::Display) -> bool {
		let current = self.current.lock();
		let cancelled = current.is_running() && current.cancel();
		if cancelled {
			tracing::debug!(generation = current.generation(), %reason, "daemon.cancel");
		}
		cancelled
	}
}

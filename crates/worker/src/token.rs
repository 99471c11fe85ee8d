use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for scheduling rounds.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	next: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Creates a new generation clock starting at generation 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next generation ID.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Returns the most recently issued generation ID (0 before the first call).
	pub fn current(&self) -> u64 {
		self.next.load(Ordering::Acquire)
	}
}

/// Generation-scoped cancellation token.
///
/// Clones share the same cancellation state. Cancelling is idempotent and
/// reports which caller actually flipped the flag.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	cancel: CancellationToken,
	fired: Arc<AtomicBool>,
}

impl GenerationToken {
	/// Creates a fresh, non-cancelled token for `generation`.
	pub fn new(generation: u64) -> Self {
		Self {
			generation,
			cancel: CancellationToken::new(),
			fired: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Returns generation ID.
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.fired.load(Ordering::Acquire)
	}

	/// Requests cancellation. Returns `true` only for the call that did it.
	pub fn cancel(&self) -> bool {
		if self.fired.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.cancel.cancel();
		true
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}
}

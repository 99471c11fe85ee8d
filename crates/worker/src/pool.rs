//! Job pool seam used to run collection work off the UI side.

use std::fmt;

use crate::TaskClass;
use crate::spawn::{runtime_handle, spawn_blocking_on};

/// A unit of work handed to a pool or dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executor capable of running detached jobs concurrently.
///
/// Jobs report their own completion; the pool only needs to eventually run
/// every submitted job exactly once.
pub trait JobPool: Send + Sync + fmt::Debug {
	fn submit(&self, class: TaskClass, job: Job);
}

/// Runs jobs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioJobPool {
	handle: tokio::runtime::Handle,
}

impl Default for TokioJobPool {
	fn default() -> Self {
		Self::new()
	}
}

impl TokioJobPool {
	/// Binds to the ambient runtime, or the shared global one outside a runtime.
	pub fn new() -> Self {
		Self { handle: runtime_handle() }
	}

	pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
		Self { handle }
	}
}

impl JobPool for TokioJobPool {
	fn submit(&self, class: TaskClass, job: Job) {
		// Detached: completion is signalled by the job itself.
		drop(spawn_blocking_on(&self.handle, class, job));
	}
}

/// Runs every job synchronously on the submitting thread.
///
/// Nested submissions run depth-first, which makes ordering deterministic for
/// single-threaded hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineJobPool;

impl JobPool for InlineJobPool {
	fn submit(&self, class: TaskClass, job: Job) {
		tracing::trace!(worker_class = class.as_str(), "worker.inline_job");
		job();
	}
}

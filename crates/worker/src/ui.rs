//! Single-writer dispatch for work that must not run concurrently with
//! other writers of the shared model.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::ThreadId;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::pool::Job;
use crate::{TaskClass, spawn_named_thread};

/// Dispatcher for work that writes UI-facing state.
///
/// Implementations run every dispatched job exactly once. Ordering is up to
/// the implementation: [`UiThread`] runs jobs one at a time in submission
/// order, [`InlineUi`] runs them on the dispatching thread. Callers that need
/// a single writer per resource serialize on that resource themselves.
pub trait UiDispatcher: Send + Sync + fmt::Debug {
	fn dispatch(&self, job: Job);

	/// Returns true when called from the dispatcher's own execution context.
	fn is_dispatch_thread(&self) -> bool;
}

/// A dedicated OS thread draining an ordered job queue.
///
/// Dropping the dispatcher closes the queue; the thread exits after draining
/// jobs that were already queued.
pub struct UiThread {
	tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
	thread_id: ThreadId,
}

impl fmt::Debug for UiThread {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UiThread").field("thread_id", &self.thread_id).finish_non_exhaustive()
	}
}

impl UiThread {
	/// Spawns the dispatcher thread.
	pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
		let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
		let handle = spawn_named_thread(TaskClass::Interactive, name, move || {
			while let Some(job) = rx.blocking_recv() {
				if catch_unwind(AssertUnwindSafe(job)).is_err() {
					tracing::error!("worker.ui.job_panicked");
				}
			}
			tracing::trace!("worker.ui.closed");
		})?;
		Ok(Self {
			thread_id: handle.thread().id(),
			tx: Mutex::new(Some(tx)),
		})
	}

	/// Closes the queue. Jobs dispatched afterwards are dropped.
	pub fn shutdown(&self) {
		self.tx.lock().take();
	}
}

impl UiDispatcher for UiThread {
	fn dispatch(&self, job: Job) {
		let guard = self.tx.lock();
		let Some(tx) = guard.as_ref() else {
			tracing::debug!("worker.ui.dispatch_after_shutdown");
			return;
		};
		if tx.send(job).is_err() {
			tracing::debug!("worker.ui.dispatch_closed");
		}
	}

	fn is_dispatch_thread(&self) -> bool {
		std::thread::current().id() == self.thread_id
	}
}

/// Runs dispatched jobs immediately on the calling thread.
///
/// Jobs dispatched from different threads run concurrently, and a job that
/// dispatches again runs the nested job before returning. Callers serialize
/// writers themselves (the daemon holds the per-document model lock around
/// every apply).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineUi;

impl UiDispatcher for InlineUi {
	fn dispatch(&self, job: Job) {
		job();
	}

	fn is_dispatch_thread(&self) -> bool {
		true
	}
}

//! Runs one round's pass graph: eager submission, collection on the job pool,
//! single-writer application through the UI dispatcher.
//!
//! Every job handed to the pool or the dispatcher carries an [`InFlight`]
//! guard. A round settles when its countdown of unfinished nodes reaches zero
//! (finished) or when it is cancelled and the last guard drops (cancelled).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lumen_primitives::{DocumentId, PassId, ViewerId};
use lumen_worker::{JobPool, TaskClass, UiDispatcher};
use tokio::sync::watch;

use crate::annotations::AnnotationStore;
use crate::dirty::DirtyScopeMap;
use crate::error::panic_message;
use crate::graph::{NodeOwner, NodeState, PassGraph, ScheduledPass};
use crate::listener::DaemonListener;
use crate::pass::{Applied, ApplyCx, CollectCx, PassError};
use crate::progress::{DaemonProgress, PassFailure};

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
	/// Every node finished applying.
	Finished,
	/// Cancelled by an invalidation, a restart or a pass.
	Cancelled,
	/// Cancelled because a pass failed hard.
	Failed(PassFailure),
}

/// Point-in-time view of one scheduled node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
	pub id: PassId,
	pub name: String,
	pub owner: NodeOwner,
	pub document: DocumentId,
	pub state: NodeState,
	/// Collection progress in `[0, 1]`.
	pub fraction: f32,
}

/// Shared services a round runs against.
pub(crate) struct RoundServices {
	pub(crate) pool: Arc<dyn JobPool>,
	pub(crate) ui: Arc<dyn UiDispatcher>,
	pub(crate) dirty: DirtyScopeMap,
	pub(crate) annotations: AnnotationStore,
	pub(crate) listener: Arc<dyn DaemonListener>,
	pub(crate) class: TaskClass,
}

pub(crate) struct Round {
	progress: DaemonProgress,
	graph: PassGraph,
	services: RoundServices,
	viewers: Vec<ViewerId>,
	/// Nodes that have not finished yet.
	countdown: AtomicUsize,
	/// Jobs queued or running on the pool or the dispatcher.
	in_flight: AtomicUsize,
	outcome: watch::Sender<Option<RoundOutcome>>,
}

/// Decrements the round's in-flight count when dropped, run or not.
struct InFlight(Arc<Round>);

impl InFlight {
	fn new(round: &Arc<Round>) -> Self {
		round.in_flight.fetch_add(1, Ordering::AcqRel);
		Self(Arc::clone(round))
	}
}

impl Drop for InFlight {
	fn drop(&mut self) {
		self.0.job_done();
	}
}

enum ApplyStep {
	Complete,
	Again,
	Cancelled,
	Failed,
}

impl Round {
	pub(crate) fn new(progress: DaemonProgress, graph: PassGraph, services: RoundServices, viewers: Vec<ViewerId>) -> Arc<Self> {
		let (outcome, _) = watch::channel(None);
		Arc::new(Self {
			countdown: AtomicUsize::new(graph.len()),
			in_flight: AtomicUsize::new(0),
			progress,
			graph,
			services,
			viewers,
			outcome,
		})
	}

	pub(crate) fn handle(self: &Arc<Self>) -> RoundHandle {
		RoundHandle(Arc::clone(self))
	}

	/// Submits every free node. Returns once the free set is handed off.
	pub(crate) fn start(self: &Arc<Self>) {
		let generation = self.progress.generation();
		tracing::debug!(
			generation,
			nodes = self.graph.len(),
			free = self.graph.free.len(),
			dependent = self.graph.dependent,
			"daemon.round.start"
		);
		self.services.listener.daemon_starting(&self.viewers);

		let guard = InFlight::new(self);
		if self.graph.len() == 0 {
			self.finish();
		}
		for &index in &self.graph.free {
			self.submit(index);
		}
		drop(guard);
	}

	fn node(&self, index: usize) -> &ScheduledPass {
		&self.graph.nodes[index]
	}

	fn submit(self: &Arc<Self>, index: usize) {
		let node = self.node(index);
		if self.progress.is_cancelled() {
			node.set_state(NodeState::Cancelled);
			return;
		}
		node.set_state(NodeState::Submitted);
		tracing::trace!(generation = self.progress.generation(), pass = %node.id, owner = %node.owner, "daemon.pass.submitted");
		let guard = InFlight::new(self);
		self.services.pool.submit(
			self.services.class,
			Box::new(move || {
				guard.0.run(index);
				drop(guard);
			}),
		);
	}

	fn release(self: &Arc<Self>, index: usize) {
		if self.node(index).pending.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.submit(index);
		}
	}

	/// Worker side: release submit-successors, then collect.
	fn run(self: &Arc<Self>, index: usize) {
		let node = self.node(index);
		let generation = self.progress.generation();
		if self.progress.is_cancelled() {
			node.set_state(NodeState::Cancelled);
			return;
		}
		for &succ in &node.on_submit {
			self.release(succ);
		}

		node.set_state(NodeState::Collecting);
		tracing::trace!(generation, pass = %node.id, name = %node.name, owner = %node.owner, "daemon.pass.collect");
		let result = {
			let mut pass = node.pass.lock();
			let cx = CollectCx {
				progress: &self.progress,
				target: &node.target,
				pass_id: node.id,
				fraction: &node.fraction,
			};
			catch_unwind(AssertUnwindSafe(|| pass.collect(&cx)))
		};

		let message = match result {
			Ok(Ok(())) if !self.progress.is_cancelled() => {
				node.fraction.store(1000, Ordering::Relaxed);
				node.set_state(NodeState::CollectDone);
				self.dispatch_apply(index);
				return;
			}
			Ok(Ok(())) | Ok(Err(PassError::Cancelled)) => {
				node.set_state(NodeState::Cancelled);
				tracing::debug!(generation, pass = %node.id, phase = "collect", "daemon.pass.cancelled");
				if self.progress.cancel() {
					tracing::debug!(generation, pass = %node.id, reason = "pass", "daemon.cancel");
				}
				return;
			}
			Ok(Err(PassError::Failed(message))) => message,
			Err(payload) => panic_message(payload.as_ref()),
		};

		node.set_state(NodeState::CollectFailed);
		tracing::error!(generation, pass = %node.id, name = %node.name, phase = "collect", error = %message, "daemon.pass.failed");
		self.progress.cancel_with(PassFailure {
			pass: node.id,
			name: node.name.clone(),
			message,
		});
	}

	fn dispatch_apply(self: &Arc<Self>, index: usize) {
		let guard = InFlight::new(self);
		self.services.ui.dispatch(Box::new(move || {
			guard.0.apply(index);
			drop(guard);
		}));
	}

	/// Dispatcher side: apply under the document's annotation lock.
	fn apply(self: &Arc<Self>, index: usize) {
		let node = self.node(index);
		let generation = self.progress.generation();
		if self.progress.is_cancelled() {
			node.set_state(NodeState::Cancelled);
			return;
		}
		node.set_state(NodeState::Applying);

		// Locks are released before any follow-up work is dispatched.
		let step = {
			let model = self.services.annotations.document(node.document());
			let mut annotations = model.lock();
			let mut pass = node.pass.lock();
			if self.progress.is_cancelled() {
				ApplyStep::Cancelled
			} else if !pass.can_apply() {
				tracing::debug!(generation, pass = %node.id, "daemon.pass.apply_deferred");
				ApplyStep::Complete
			} else {
				let mut cx = ApplyCx {
					annotations: &mut *annotations,
					progress: &self.progress,
					target: &node.target,
					pass_id: node.id,
				};
				match catch_unwind(AssertUnwindSafe(|| pass.apply(&mut cx))) {
					Ok(Ok(applied)) => {
						let range = applied.range();
						if !node.synthetic {
							self.services.dirty.mark_clean_if_live(
								&self.progress,
								node.document(),
								node.id,
								range,
								node.target.document.len_chars(),
							);
						}
						tracing::trace!(generation, pass = %node.id, range = %range, partial = matches!(applied, Applied::Partial(_)), "daemon.pass.applied");
						match applied {
							Applied::Complete(_) => ApplyStep::Complete,
							Applied::Partial(_) => ApplyStep::Again,
						}
					}
					Ok(Err(PassError::Cancelled)) => ApplyStep::Cancelled,
					Ok(Err(PassError::Failed(message))) => {
						tracing::error!(generation, pass = %node.id, name = %node.name, phase = "apply", error = %message, "daemon.pass.failed");
						ApplyStep::Failed
					}
					Err(payload) => {
						tracing::error!(generation, pass = %node.id, name = %node.name, phase = "apply", error = %panic_message(payload.as_ref()), "daemon.pass.failed");
						ApplyStep::Failed
					}
				}
			}
		};

		match step {
			ApplyStep::Complete | ApplyStep::Failed => self.complete(index),
			ApplyStep::Again => {
				node.set_state(NodeState::CollectDone);
				self.dispatch_apply(index);
			}
			ApplyStep::Cancelled => {
				node.set_state(NodeState::Cancelled);
				tracing::debug!(generation, pass = %node.id, phase = "apply", "daemon.pass.cancelled");
				if self.progress.cancel() {
					tracing::debug!(generation, pass = %node.id, reason = "pass", "daemon.cancel");
				}
			}
		}
	}

	fn complete(self: &Arc<Self>, index: usize) {
		let node = self.node(index);
		node.set_state(NodeState::Finished);
		for &succ in &node.on_completion {
			self.release(succ);
		}
		if self.countdown.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.finish();
		}
	}

	fn finish(&self) {
		if self.progress.stop_if_running() {
			tracing::debug!(generation = self.progress.generation(), nodes = self.graph.len(), "daemon.round.finished");
			self.services.listener.daemon_finished(&self.viewers);
			self.settle(RoundOutcome::Finished);
		}
	}

	fn job_done(&self) {
		if self.in_flight.fetch_sub(1, Ordering::AcqRel) != 1 {
			return;
		}
		if !self.progress.is_cancelled() {
			if self.countdown.load(Ordering::Acquire) == 0 {
				return;
			}
			tracing::error!(
				generation = self.progress.generation(),
				remaining = self.countdown.load(Ordering::Acquire),
				"daemon.round.stalled"
			);
			self.progress.cancel();
		}
		if self.outcome.borrow().is_some() {
			return;
		}
		let outcome = match self.progress.first_failure() {
			Some(failure) => RoundOutcome::Failed(failure.clone()),
			None => RoundOutcome::Cancelled,
		};
		// Listeners hear about the round before waiters wake.
		tracing::debug!(generation = self.progress.generation(), "daemon.round.cancelled");
		self.services.listener.daemon_cancelled(self.progress.generation());
		self.settle(outcome);
	}

	fn settle(&self, outcome: RoundOutcome) {
		self.outcome.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(outcome);
			true
		});
	}
}

/// Handle to a started round.
#[derive(Clone)]
pub struct RoundHandle(Arc<Round>);

impl std::fmt::Debug for RoundHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RoundHandle")
			.field("generation", &self.generation())
			.field("nodes", &self.0.graph.len())
			.field("outcome", &self.outcome())
			.finish()
	}
}

impl RoundHandle {
	pub fn generation(&self) -> u64 {
		self.0.progress.generation()
	}

	pub fn progress(&self) -> &DaemonProgress {
		&self.0.progress
	}

	pub fn node_count(&self) -> usize {
		self.0.graph.len()
	}

	pub fn viewers(&self) -> &[ViewerId] {
		&self.0.viewers
	}

	/// The outcome, once the round has settled.
	pub fn outcome(&self) -> Option<RoundOutcome> {
		self.0.outcome.borrow().clone()
	}

	pub fn is_settled(&self) -> bool {
		self.0.outcome.borrow().is_some()
	}

	/// Waits until the round has finished or drained after cancellation.
	pub async fn settled(&self) -> RoundOutcome {
		let mut rx = self.0.outcome.subscribe();
		match rx.wait_for(Option::is_some).await {
			Ok(slot) => slot.clone().unwrap_or(RoundOutcome::Cancelled),
			Err(_) => RoundOutcome::Cancelled,
		}
	}

	/// Cancels the round. Returns `true` if this call cancelled it.
	pub fn cancel(&self) -> bool {
		let cancelled = self.0.progress.cancel();
		if cancelled {
			tracing::debug!(generation = self.generation(), reason = "handle", "daemon.cancel");
		}
		cancelled
	}

	pub fn node_states(&self) -> Vec<NodeSnapshot> {
		self.0
			.graph
			.nodes
			.iter()
			.map(|node| NodeSnapshot {
				id: node.id,
				name: node.name.clone(),
				owner: node.owner,
				document: node.document(),
				state: node.state(),
				fraction: node.fraction.load(Ordering::Relaxed) as f32 / 1000.0,
			})
			.collect()
	}

	/// Nodes submitted and not yet terminal.
	pub fn active_passes(&self) -> Vec<NodeSnapshot> {
		self.node_states().into_iter().filter(|n| n.state.is_active()).collect()
	}
}

//! Builds the per-round dependency graph of scheduled passes.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

use lumen_primitives::{DocumentId, PassId, ViewerId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::dirty::DirtyScope;
use crate::error::panic_message;
use crate::instantiate::{InstantiatedPass, Instantiation};
use crate::pass::{AnalysisPass, FactoryCx, PassFactory};
use crate::registry::PassRegistry;
use crate::target::Target;

/// Which target group a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOwner {
	Document(DocumentId),
	Viewer(ViewerId),
}

impl fmt::Display for NodeOwner {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Document(doc) => fmt::Display::fmt(doc, f),
			Self::Viewer(viewer) => fmt::Display::fmt(viewer, f),
		}
	}
}

/// Lifecycle of a scheduled node.
///
/// ```text
/// Pending -> Submitted -> Collecting -> CollectDone -> Applying -> Finished
///                              |              |            |
///                              +-> Cancelled  |            +-> Cancelled
///                              +-> CollectFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
	Pending = 0,
	Submitted = 1,
	Collecting = 2,
	CollectDone = 3,
	CollectFailed = 4,
	Applying = 5,
	Finished = 6,
	Cancelled = 7,
}

impl NodeState {
	fn from_u8(raw: u8) -> Self {
		match raw {
			0 => Self::Pending,
			1 => Self::Submitted,
			2 => Self::Collecting,
			3 => Self::CollectDone,
			4 => Self::CollectFailed,
			5 => Self::Applying,
			6 => Self::Finished,
			_ => Self::Cancelled,
		}
	}

	/// Submitted and not yet in a terminal state.
	pub fn is_active(self) -> bool {
		matches!(self, Self::Submitted | Self::Collecting | Self::CollectDone | Self::Applying)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Finished | Self::Cancelled | Self::CollectFailed)
	}
}

/// One pass instance placed in the round's graph.
pub(crate) struct ScheduledPass {
	pub(crate) id: PassId,
	pub(crate) name: String,
	pub(crate) owner: NodeOwner,
	pub(crate) target: Target,
	/// Follow-up nodes that never touch the dirty map.
	pub(crate) synthetic: bool,
	pub(crate) pass: Mutex<Box<dyn AnalysisPass>>,
	/// Predecessors (of either edge kind) not yet released.
	pub(crate) pending: AtomicUsize,
	state: AtomicU8,
	/// Collection progress in permille.
	pub(crate) fraction: AtomicU32,
	/// Released once this node has finished applying.
	pub(crate) on_completion: Vec<usize>,
	/// Released once this node starts collecting.
	pub(crate) on_submit: Vec<usize>,
}

impl ScheduledPass {
	pub(crate) fn state(&self) -> NodeState {
		NodeState::from_u8(self.state.load(Ordering::Acquire))
	}

	pub(crate) fn set_state(&self, state: NodeState) {
		self.state.store(state as u8, Ordering::Release);
	}

	pub(crate) fn document(&self) -> DocumentId {
		self.target.document_id()
	}
}

impl fmt::Debug for ScheduledPass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScheduledPass")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("owner", &self.owner)
			.field("synthetic", &self.synthetic)
			.field("pending", &self.pending.load(Ordering::Relaxed))
			.field("state", &self.state())
			.field("on_completion", &self.on_completion)
			.field("on_submit", &self.on_submit)
			.finish_non_exhaustive()
	}
}

/// Immutable node set of one round. Indices are stable for its lifetime.
#[derive(Debug)]
pub(crate) struct PassGraph {
	pub(crate) nodes: Vec<ScheduledPass>,
	/// Nodes with no predecessors; submitted when the round starts.
	pub(crate) free: Vec<usize>,
	pub(crate) dependent: usize,
}

impl PassGraph {
	pub(crate) fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Replays submission from the free set without running anything.
	///
	/// Every node must be reached exactly once, exactly when its last
	/// predecessor is released.
	pub(crate) fn check_consistency(&self) -> Result<(), String> {
		let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.pending.load(Ordering::Acquire)).collect();
		let mut reached = vec![false; self.nodes.len()];
		let mut queue = self.free.clone();
		let mut count = 0usize;

		if self.free.len() + self.dependent != self.nodes.len() {
			return Err(format!(
				"free ({}) + dependent ({}) != nodes ({})",
				self.free.len(),
				self.dependent,
				self.nodes.len()
			));
		}

		while let Some(index) = queue.pop() {
			let node = &self.nodes[index];
			if pending[index] != 0 {
				return Err(format!("{} on {} submitted with {} pending predecessors", node.id, node.owner, pending[index]));
			}
			if std::mem::replace(&mut reached[index], true) {
				return Err(format!("{} on {} reached twice", node.id, node.owner));
			}
			count += 1;
			for &succ in node.on_submit.iter().chain(&node.on_completion) {
				let Some(slot) = pending.get_mut(succ) else {
					return Err(format!("{} on {} points at missing node {succ}", node.id, node.owner));
				};
				if *slot == 0 {
					return Err(format!("{} on {} released more often than it has predecessors", self.nodes[succ].id, self.nodes[succ].owner));
				}
				*slot -= 1;
				if *slot == 0 {
					queue.push(succ);
				}
			}
		}

		if count != self.nodes.len() {
			let missing: Vec<String> = self
				.nodes
				.iter()
				.zip(&reached)
				.filter(|(_, r)| !**r)
				.map(|(n, _)| format!("{} on {}", n.id, n.owner))
				.collect();
			return Err(format!("unreachable nodes: {}", missing.join(", ")));
		}
		Ok(())
	}
}

struct Draft {
	id: PassId,
	name: String,
	owner: NodeOwner,
	target: Target,
	synthetic: bool,
	pass: Box<dyn AnalysisPass>,
	pending: usize,
	on_completion: Vec<usize>,
	on_submit: Vec<usize>,
}

type Key = (NodeOwner, PassId);

/// Recursive find-or-create over the instantiated passes of one round.
pub(crate) struct GraphBuilder<'a> {
	intentions: Option<&'a dyn PassFactory>,
	available: FxHashMap<Key, (InstantiatedPass, Target)>,
	/// Viewers of each document, for follow-ups of document-bound passes.
	doc_viewers: FxHashMap<DocumentId, Vec<Target>>,
	index: FxHashMap<Key, usize>,
	drafts: Vec<Draft>,
	order: Vec<Key>,
	next_synthetic: PassId,
}

impl<'a> GraphBuilder<'a> {
	pub(crate) fn new(registry: &'a PassRegistry, instantiation: Instantiation) -> Self {
		let mut available = FxHashMap::default();
		let mut doc_viewers = FxHashMap::default();
		let mut order = Vec::new();
		for group in instantiation.documents {
			let owner = NodeOwner::Document(group.target.document_id());
			doc_viewers.insert(group.target.document_id(), group.viewers);
			for pass in group.passes {
				order.push((owner, pass.id));
				available.insert((owner, pass.id), (pass, group.target.clone()));
			}
		}
		for group in instantiation.viewers {
			let owner = NodeOwner::Viewer(group.target.viewer);
			for pass in group.passes {
				order.push((owner, pass.id));
				available.insert((owner, pass.id), (pass, group.target.clone()));
			}
		}
		Self {
			intentions: registry.intentions_factory().map(|f| f.as_ref()),
			available,
			doc_viewers,
			index: FxHashMap::default(),
			drafts: Vec::new(),
			order,
			next_synthetic: registry.max_id().max(PassId::INTENTIONS).next(),
		}
	}

	pub(crate) fn build(mut self) -> PassGraph {
		for key in std::mem::take(&mut self.order) {
			self.find_or_create(key);
		}

		let nodes: Vec<ScheduledPass> = self
			.drafts
			.into_iter()
			.map(|d| ScheduledPass {
				id: d.id,
				name: d.name,
				owner: d.owner,
				target: d.target,
				synthetic: d.synthetic,
				pass: Mutex::new(d.pass),
				pending: AtomicUsize::new(d.pending),
				state: AtomicU8::new(NodeState::Pending as u8),
				fraction: AtomicU32::new(0),
				on_completion: d.on_completion,
				on_submit: d.on_submit,
			})
			.collect();
		let free: Vec<usize> = (0..nodes.len())
			.filter(|i| nodes[*i].pending.load(Ordering::Relaxed) == 0)
			.collect();
		let dependent = nodes.len() - free.len();
		PassGraph { nodes, free, dependent }
	}

	fn find_or_create(&mut self, key: Key) -> Option<usize> {
		if let Some(&index) = self.index.get(&key) {
			return Some(index);
		}
		let (inst, target) = self.available.remove(&key)?;
		let index = self.drafts.len();
		let wants_intentions = inst.pass.runs_intentions_after();
		self.drafts.push(Draft {
			id: inst.id,
			name: inst.name,
			owner: key.0,
			target: target.clone(),
			synthetic: false,
			pass: inst.pass,
			pending: 0,
			on_completion: Vec::new(),
			on_submit: Vec::new(),
		});
		self.index.insert(key, index);

		for pred in inst.completion {
			if let Some(p) = self.resolve(key.0, &target, pred) {
				self.drafts[p].on_completion.push(index);
				self.drafts[index].pending += 1;
			}
		}
		for pred in inst.starting {
			if let Some(p) = self.resolve(key.0, &target, pred) {
				self.drafts[p].on_submit.push(index);
				self.drafts[index].pending += 1;
			}
		}

		if wants_intentions {
			let viewers = match key.0 {
				NodeOwner::Document(doc) => self.doc_viewers.get(&doc).cloned().unwrap_or_default(),
				NodeOwner::Viewer(_) => vec![target.clone()],
			};
			for viewer in &viewers {
				self.add_intentions_after(index, viewer);
			}
		}
		Some(index)
	}

	/// Viewer-owned nodes look in their own group first, then in their document's.
	fn resolve(&mut self, owner: NodeOwner, target: &Target, pred: PassId) -> Option<usize> {
		let doc_key = (NodeOwner::Document(target.document_id()), pred);
		match owner {
			NodeOwner::Document(_) => self.find_or_create(doc_key),
			NodeOwner::Viewer(_) => self.find_or_create((owner, pred)).or_else(|| self.find_or_create(doc_key)),
		}
	}

	fn add_intentions_after(&mut self, pred: usize, target: &Target) {
		let Some(factory) = self.intentions else {
			return;
		};
		let id = self.next_synthetic;
		let cx = FactoryCx {
			target,
			pass_id: id,
			dirty: DirtyScope::Whole,
		};
		let pass = match catch_unwind(AssertUnwindSafe(|| factory.create(&cx))) {
			Ok(Ok(Some(pass))) => pass,
			Ok(Ok(None)) => return,
			Ok(Err(err)) => {
				tracing::error!(pass = %id, name = factory.name(), error = %format!("{err:#}"), "daemon.factory.failed");
				return;
			}
			Err(payload) => {
				tracing::error!(pass = %id, name = factory.name(), panic = %panic_message(payload.as_ref()), "daemon.factory.panicked");
				return;
			}
		};
		self.next_synthetic = id.next();
		let index = self.drafts.len();
		self.drafts.push(Draft {
			id,
			name: factory.name().to_string(),
			owner: NodeOwner::Viewer(target.viewer),
			target: target.clone(),
			synthetic: true,
			pass,
			pending: 1,
			on_completion: Vec::new(),
			on_submit: Vec::new(),
		});
		self.drafts[pred].on_completion.push(index);
	}
}

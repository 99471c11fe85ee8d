//! Turns registered factories into pass instances for one round.

use std::panic::{AssertUnwindSafe, catch_unwind};

use lumen_primitives::{DocumentId, PassId, ViewerId};
use rustc_hash::FxHashSet;

use crate::dirty::DirtyScopeMap;
use crate::error::panic_message;
use crate::pass::{AnalysisPass, FactoryCx, PassBinding};
use crate::progress::DaemonProgress;
use crate::registry::{PassRegistration, PassRegistry};
use crate::target::Target;

/// A pass instance with the ids and predecessors stamped from its registration.
pub(crate) struct InstantiatedPass {
	pub(crate) id: PassId,
	pub(crate) name: String,
	pub(crate) pass: Box<dyn AnalysisPass>,
	pub(crate) completion: Vec<PassId>,
	pub(crate) starting: Vec<PassId>,
}

/// Document-bound passes of one document, created for its preferred viewer.
pub(crate) struct DocumentGroup {
	pub(crate) target: Target,
	/// Every viewer showing the document, preferred one included.
	pub(crate) viewers: Vec<Target>,
	pub(crate) passes: Vec<InstantiatedPass>,
}

/// Viewer-bound passes of one viewer.
pub(crate) struct ViewerGroup {
	pub(crate) target: Target,
	pub(crate) passes: Vec<InstantiatedPass>,
}

#[derive(Default)]
pub(crate) struct Instantiation {
	pub(crate) documents: Vec<DocumentGroup>,
	pub(crate) viewers: Vec<ViewerGroup>,
}

impl Instantiation {
	pub(crate) fn pass_count(&self) -> usize {
		let docs: usize = self.documents.iter().map(|g| g.passes.len()).sum();
		let viewers: usize = self.viewers.iter().map(|g| g.passes.len()).sum();
		docs + viewers
	}

	pub(crate) fn viewer_ids(&self) -> Vec<ViewerId> {
		self.viewers.iter().map(|g| g.target.viewer).collect()
	}
}

/// Inputs that exclude work from a round.
#[derive(Default)]
pub(crate) struct InstantiateFilter<'a> {
	pub(crate) disabled_passes: Option<&'a FxHashSet<PassId>>,
	pub(crate) disabled_documents: Option<&'a FxHashSet<DocumentId>>,
	/// Round that absent or disabled passes are recorded clean for. The
	/// record is dropped once that round is cancelled.
	pub(crate) record_absent: Option<&'a DaemonProgress>,
}

impl InstantiateFilter<'_> {
	fn record_clean(&self, dirty: &DirtyScopeMap, doc: DocumentId, pass: PassId) {
		let Some(progress) = self.record_absent else {
			return;
		};
		if !dirty.mark_pass_clean_if_live(progress, doc, pass) {
			tracing::trace!(document = %doc, pass = %pass, generation = progress.generation(), "daemon.instantiate.clean_dropped");
		}
	}

	fn pass_disabled(&self, id: PassId) -> bool {
		self.disabled_passes.is_some_and(|set| set.contains(&id))
	}

	fn document_disabled(&self, doc: DocumentId) -> bool {
		self.disabled_documents.is_some_and(|set| set.contains(&doc))
	}
}

pub(crate) struct Instantiator<'a> {
	pub(crate) registry: &'a PassRegistry,
	pub(crate) dirty: &'a DirtyScopeMap,
	pub(crate) filter: InstantiateFilter<'a>,
}

impl Instantiator<'_> {
	/// Creates every pass instance for `targets`.
	pub(crate) fn instantiate(&self, targets: &[Target]) -> Instantiation {
		let mut out = Instantiation::default();
		let mut seen_viewers = FxHashSet::default();

		for (doc, viewers) in group_by_document(targets) {
			if self.filter.document_disabled(doc) {
				tracing::trace!(document = %doc, "daemon.instantiate.document_disabled");
				continue;
			}
			let Some(preferred) = viewers.iter().copied().find(|t| t.focused).or_else(|| viewers.first().copied()) else {
				continue;
			};

			let mut doc_passes = self.create_all(preferred, PassBinding::Document);
			let doc_ids: FxHashSet<PassId> = doc_passes.iter().map(|p| p.id).collect();
			for pass in &mut doc_passes {
				retain_known(pass, |id| doc_ids.contains(&id));
			}

			let all_viewers: Vec<Target> = viewers.iter().map(|t| (*t).clone()).collect();
			for target in viewers {
				if !seen_viewers.insert(target.viewer) {
					continue;
				}
				let mut passes = self.create_all(target, PassBinding::Viewer);
				let viewer_ids: FxHashSet<PassId> = passes.iter().map(|p| p.id).collect();
				for pass in &mut passes {
					retain_known(pass, |id| viewer_ids.contains(&id) || doc_ids.contains(&id));
				}
				out.viewers.push(ViewerGroup {
					target: target.clone(),
					passes,
				});
			}

			out.documents.push(DocumentGroup {
				target: preferred.clone(),
				viewers: all_viewers,
				passes: doc_passes,
			});
		}
		out
	}

	fn create_all(&self, target: &Target, binding: PassBinding) -> Vec<InstantiatedPass> {
		let mut passes: Vec<_> = self
			.registry
			.entries()
			.filter(|entry| entry.binding == binding)
			.filter_map(|entry| self.create_one(entry, target))
			.collect();
		passes.sort_by_key(|p| p.id);
		passes
	}

	fn create_one(&self, entry: &PassRegistration, target: &Target) -> Option<InstantiatedPass> {
		let doc = target.document_id();
		if self.filter.pass_disabled(entry.id) {
			self.filter.record_clean(self.dirty, doc, entry.id);
			return None;
		}
		let cx = FactoryCx {
			target,
			pass_id: entry.id,
			dirty: self.dirty.dirty_scope(doc, entry.id),
		};
		match catch_unwind(AssertUnwindSafe(|| entry.factory.create(&cx))) {
			Ok(Ok(Some(pass))) => Some(InstantiatedPass {
				id: entry.id,
				name: entry.name.clone(),
				pass,
				completion: entry.completion.clone(),
				starting: entry.starting.clone(),
			}),
			Ok(Ok(None)) => {
				self.filter.record_clean(self.dirty, doc, entry.id);
				None
			}
			Ok(Err(err)) => {
				tracing::error!(pass = %entry.id, name = %entry.name, document = %doc, error = %format!("{err:#}"), "daemon.factory.failed");
				None
			}
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				tracing::error!(pass = %entry.id, name = %entry.name, document = %doc, panic = %message, "daemon.factory.panicked");
				None
			}
		}
	}
}

fn retain_known(pass: &mut InstantiatedPass, known: impl Fn(PassId) -> bool) {
	pass.completion.retain(|id| known(*id));
	pass.starting.retain(|id| known(*id));
}

/// Groups targets by document, keeping first-appearance order.
fn group_by_document(targets: &[Target]) -> Vec<(DocumentId, Vec<&Target>)> {
	let mut groups: Vec<(DocumentId, Vec<&Target>)> = Vec::new();
	for target in targets {
		let doc = target.document_id();
		match groups.iter_mut().find(|(id, _)| *id == doc) {
			Some((_, viewers)) => viewers.push(target),
			None => groups.push((doc, vec![target])),
		}
	}
	groups
}

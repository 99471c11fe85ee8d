//! Per-document, per-pass tracking of text that still needs analysis.

use std::sync::Arc;

use lumen_primitives::{CharLen, DocumentId, PassId, TextEdit, TextRange};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};

use crate::progress::DaemonProgress;

type Ranges = SmallVec<[TextRange; 4]>;

/// What a single pass still has to (re)analyze in one document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DirtyScope {
	/// Nothing to do.
	Clean,
	/// The whole document, whatever its current length.
	#[default]
	Whole,
	/// Sorted, non-touching ranges.
	Ranges(Ranges),
}

impl DirtyScope {
	pub fn is_clean(&self) -> bool {
		matches!(self, Self::Clean)
	}

	/// Adds `range` to the scope, merging it with touching ranges.
	pub fn add(&mut self, range: TextRange) {
		match self {
			Self::Whole => {}
			Self::Clean => *self = Self::Ranges(smallvec![range]),
			Self::Ranges(ranges) => {
				ranges.push(range);
				normalize(ranges);
			}
		}
	}

	/// Removes exactly `range` from the scope.
	///
	/// `doc_len` resolves [`DirtyScope::Whole`] before subtracting.
	pub fn remove(&mut self, range: TextRange, doc_len: CharLen) {
		let current = match self {
			Self::Clean => return,
			Self::Whole => smallvec![TextRange::whole(doc_len)],
			Self::Ranges(ranges) => std::mem::take(ranges),
		};
		let rest: Ranges = current.iter().flat_map(|r| r.subtract(&range)).collect();
		*self = if rest.is_empty() { Self::Clean } else { Self::Ranges(rest) };
	}

	/// Moves tracked ranges through `edit`. Does not dirty the edited span.
	pub fn map_edit(&mut self, edit: &TextEdit) {
		if let Self::Ranges(ranges) = self {
			for range in ranges.iter_mut() {
				*range = edit.map_range(*range);
			}
			normalize(ranges);
		}
	}

	/// Concrete dirty ranges for a document of `doc_len` characters.
	pub fn ranges(&self, doc_len: CharLen) -> Ranges {
		match self {
			Self::Clean => SmallVec::new(),
			Self::Whole => smallvec![TextRange::whole(doc_len)],
			Self::Ranges(ranges) => ranges.iter().map(|r| r.clamp(doc_len)).collect(),
		}
	}

	/// Smallest range covering everything dirty, if anything is.
	pub fn covering_range(&self, doc_len: CharLen) -> Option<TextRange> {
		let ranges = self.ranges(doc_len);
		let first = ranges.first()?;
		Some(ranges.iter().fold(*first, |acc, r| acc.cover(r)))
	}
}

fn normalize(ranges: &mut Ranges) {
	ranges.sort_unstable_by_key(|r| (r.start(), r.end()));
	let mut merged: Ranges = SmallVec::with_capacity(ranges.len());
	for range in ranges.drain(..) {
		match merged.last_mut() {
			Some(last) if last.touches(&range) => *last = last.cover(&range),
			_ => merged.push(range),
		}
	}
	*ranges = merged;
}

#[derive(Debug, Default)]
struct DocumentDirty {
	/// Passes without an entry are [`DirtyScope::Whole`].
	scopes: FxHashMap<PassId, DirtyScope>,
}

impl DocumentDirty {
	fn scope_mut(&mut self, pass: PassId) -> &mut DirtyScope {
		self.scopes.entry(pass).or_default()
	}
}

/// Shared dirty-scope bookkeeping for every open document.
///
/// Documents and passes never seen before are entirely dirty. Cloning shares
/// the underlying map.
#[derive(Debug, Clone, Default)]
pub struct DirtyScopeMap {
	docs: Arc<Mutex<FxHashMap<DocumentId, DocumentDirty>>>,
}

impl DirtyScopeMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks `range` dirty for every pass of `doc`.
	pub fn mark_dirty(&self, doc: DocumentId, range: TextRange) {
		let mut docs = self.docs.lock();
		if let Some(status) = docs.get_mut(&doc) {
			for scope in status.scopes.values_mut() {
				scope.add(range);
			}
		}
	}

	/// Shifts tracked ranges through `edit` and dirties the inserted span.
	pub fn apply_edit(&self, doc: DocumentId, edit: &TextEdit) {
		let mut docs = self.docs.lock();
		if let Some(status) = docs.get_mut(&doc) {
			let touched = edit.new_range();
			for scope in status.scopes.values_mut() {
				scope.map_edit(edit);
				scope.add(touched);
			}
		}
	}

	/// Marks every pass of `doc` entirely dirty.
	pub fn mark_document_dirty(&self, doc: DocumentId) {
		self.docs.lock().remove(&doc);
	}

	/// Marks every pass of every document entirely dirty.
	pub fn mark_all_dirty(&self, reason: &str) {
		tracing::debug!(reason, "daemon.dirty.all");
		self.docs.lock().clear();
	}

	/// Subtracts `range` from the dirty scope of `pass` in `doc`.
	pub fn mark_clean_for_pass(&self, doc: DocumentId, pass: PassId, range: TextRange, doc_len: CharLen) {
		let mut docs = self.docs.lock();
		docs.entry(doc).or_default().scope_mut(pass).remove(range, doc_len);
	}

	/// Like [`Self::mark_clean_for_pass`], but only while `progress` is live.
	///
	/// The check happens under the map lock, so a round cancelled before a
	/// concurrent invalidation dirtied the document can never clean it again.
	pub(crate) fn mark_clean_if_live(
		&self,
		progress: &DaemonProgress,
		doc: DocumentId,
		pass: PassId,
		range: TextRange,
		doc_len: CharLen,
	) -> bool {
		let mut docs = self.docs.lock();
		if progress.is_cancelled() {
			return false;
		}
		docs.entry(doc).or_default().scope_mut(pass).remove(range, doc_len);
		true
	}

	/// Marks `pass` entirely clean in `doc`.
	pub fn mark_pass_clean(&self, doc: DocumentId, pass: PassId) {
		let mut docs = self.docs.lock();
		docs.entry(doc).or_default().scopes.insert(pass, DirtyScope::Clean);
	}

	/// Like [`Self::mark_pass_clean`], but only while `progress` is live.
	pub(crate) fn mark_pass_clean_if_live(&self, progress: &DaemonProgress, doc: DocumentId, pass: PassId) -> bool {
		let mut docs = self.docs.lock();
		if progress.is_cancelled() {
			return false;
		}
		docs.entry(doc).or_default().scopes.insert(pass, DirtyScope::Clean);
		true
	}

	pub fn dirty_scope(&self, doc: DocumentId, pass: PassId) -> DirtyScope {
		let docs = self.docs.lock();
		docs.get(&doc).and_then(|status| status.scopes.get(&pass)).cloned().unwrap_or_default()
	}

	pub fn is_clean(&self, doc: DocumentId, pass: PassId) -> bool {
		self.dirty_scope(doc, pass).is_clean()
	}

	/// Returns true if every pass in `ids` is clean for `doc`.
	pub fn all_clean(&self, doc: DocumentId, ids: impl IntoIterator<Item = PassId>) -> bool {
		let docs = self.docs.lock();
		let Some(status) = docs.get(&doc) else {
			return ids.into_iter().next().is_none();
		};
		ids.into_iter()
			.all(|id| status.scopes.get(&id).is_some_and(DirtyScope::is_clean))
	}

	/// Drops all state for a closed document.
	pub fn forget(&self, doc: DocumentId) {
		self.docs.lock().remove(&doc);
	}
}

//! Shared per-document annotation model written by pass `apply` steps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lumen_primitives::{CharIdx, DocumentId, PassId, TextEdit, TextRange};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Annotation severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Information,
	WeakWarning,
	Warning,
	Error,
}

impl Severity {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Information => "information",
			Self::WeakWarning => "weak_warning",
			Self::Warning => "warning",
			Self::Error => "error",
		}
	}
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single result produced by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
	pub range: TextRange,
	pub severity: Severity,
	pub message: String,
}

impl Annotation {
	pub fn new(range: TextRange, severity: Severity, message: impl Into<String>) -> Self {
		Self {
			range,
			severity,
			message: message.into(),
		}
	}
}

/// Annotations of one document, grouped by the pass that produced them.
#[derive(Debug, Default)]
pub struct DocumentAnnotations {
	by_pass: BTreeMap<PassId, Vec<Annotation>>,
	version: u64,
}

impl DocumentAnnotations {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the annotations of `pass` that start inside `range`.
	///
	/// Applying the same `(range, items)` twice leaves the model unchanged.
	pub fn replace(&mut self, pass: PassId, range: TextRange, items: impl IntoIterator<Item = Annotation>) {
		let slot = self.by_pass.entry(pass).or_default();
		slot.retain(|a| !starts_in(&range, a.range.start()));
		slot.extend(items);
		slot.sort_by_key(|a| (a.range.start(), a.range.end()));
		self.version += 1;
	}

	/// Drops every annotation of `pass`.
	pub fn clear_pass(&mut self, pass: PassId) {
		if self.by_pass.remove(&pass).is_some() {
			self.version += 1;
		}
	}

	/// Moves every annotation through `edit`.
	pub fn apply_edit(&mut self, edit: &TextEdit) {
		for annotation in self.by_pass.values_mut().flatten() {
			annotation.range = edit.map_range(annotation.range);
		}
		self.version += 1;
	}

	pub fn for_pass(&self, pass: PassId) -> &[Annotation] {
		self.by_pass.get(&pass).map_or(&[], Vec::as_slice)
	}

	pub fn iter(&self) -> impl Iterator<Item = (PassId, &Annotation)> {
		self.by_pass.iter().flat_map(|(id, items)| items.iter().map(move |a| (*id, a)))
	}

	/// Annotations intersecting `range` with at least `min` severity.
	pub fn annotations_in(&self, range: TextRange, min: Severity) -> Vec<&Annotation> {
		let mut out: Vec<_> = self
			.iter()
			.map(|(_, a)| a)
			.filter(|a| a.severity >= min && (a.range.intersects(&range) || range.contains_range(&a.range)))
			.collect();
		out.sort_by_key(|a| (a.range.start(), a.range.end()));
		out
	}

	/// The most severe annotation covering `offset`.
	pub fn find_at_offset(&self, offset: CharIdx) -> Option<&Annotation> {
		self.iter()
			.map(|(_, a)| a)
			.filter(|a| a.range.contains_offset(offset))
			.max_by_key(|a| a.severity)
	}

	/// Number of annotations with exactly `severity`.
	pub fn count(&self, severity: Severity) -> usize {
		self.iter().filter(|(_, a)| a.severity == severity).count()
	}

	pub fn len(&self) -> usize {
		self.by_pass.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Bumped on every mutation.
	pub fn version(&self) -> u64 {
		self.version
	}

	pub(crate) fn into_annotations(self) -> Vec<Annotation> {
		self.by_pass.into_values().flatten().collect()
	}
}

fn starts_in(range: &TextRange, start: CharIdx) -> bool {
	range.contains_offset(start) || start == range.start()
}

/// Per-document annotation models, each behind its own lock.
///
/// The per-document lock is the single-writer guard for `apply`. Cloning
/// shares the store.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
	docs: Arc<Mutex<FxHashMap<DocumentId, Arc<Mutex<DocumentAnnotations>>>>>,
}

impl AnnotationStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the model of `doc`, creating an empty one on first use.
	pub fn document(&self, doc: DocumentId) -> Arc<Mutex<DocumentAnnotations>> {
		Arc::clone(self.docs.lock().entry(doc).or_default())
	}

	/// Runs `f` with the model of `doc` locked.
	pub fn with<R>(&self, doc: DocumentId, f: impl FnOnce(&mut DocumentAnnotations) -> R) -> R {
		let model = self.document(doc);
		let mut guard = model.lock();
		f(&mut guard)
	}

	/// Copies out all annotations of `doc`.
	pub fn snapshot(&self, doc: DocumentId) -> Vec<(PassId, Annotation)> {
		let Some(model) = self.docs.lock().get(&doc).cloned() else {
			return Vec::new();
		};
		let guard = model.lock();
		guard.iter().map(|(id, a)| (id, a.clone())).collect()
	}

	pub fn forget(&self, doc: DocumentId) {
		self.docs.lock().remove(&doc);
	}
}

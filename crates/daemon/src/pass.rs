//! The capability interface every analysis pass implements.
//!
//! A pass is created fresh for each round by its [`PassFactory`], collects
//! its results off the UI side, then applies them to the document's
//! annotation model with exclusive access:
//!
//! ```text
//! factory.create(cx) ──► collect(&CollectCx) ──► apply(&mut ApplyCx) ─┬─► Complete(range)
//!       │                     (worker)              (single writer)   └─► Partial(range) ─► apply again
//!       └─► None: nothing to do, pass marked clean
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use lumen_primitives::{PassId, TextRange};

use crate::annotations::{Annotation, DocumentAnnotations};
use crate::dirty::DirtyScope;
use crate::progress::DaemonProgress;
use crate::target::{DocumentSnapshot, Target};

/// Outcome of a pass step that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassError {
	/// The round was cancelled; the pass unwinds without applying anything.
	#[error("cancelled")]
	Cancelled,
	/// The pass hit a hard failure.
	#[error("{0}")]
	Failed(String),
}

impl From<anyhow::Error> for PassError {
	fn from(err: anyhow::Error) -> Self {
		Self::Failed(format!("{err:#}"))
	}
}

pub type PassResult<T = ()> = Result<T, PassError>;

/// Which target group a pass is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassBinding {
	/// Computed once per document and shared by all its viewers.
	#[default]
	Document,
	/// Computed separately for every viewer.
	Viewer,
}

/// Range reported by one `apply` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
	/// The pass is done; `range` is the last covered slice.
	Complete(TextRange),
	/// `range` was applied, the remainder follows in another `apply` call.
	Partial(TextRange),
}

impl Applied {
	pub fn range(&self) -> TextRange {
		match *self {
			Self::Complete(range) | Self::Partial(range) => range,
		}
	}
}

/// Context handed to [`AnalysisPass::collect`].
pub struct CollectCx<'a> {
	pub(crate) progress: &'a DaemonProgress,
	pub(crate) target: &'a Target,
	pub(crate) pass_id: PassId,
	pub(crate) fraction: &'a AtomicU32,
}

impl CollectCx<'_> {
	/// Cooperative cancellation point. Call often; propagate with `?`.
	pub fn checkpoint(&self) -> PassResult {
		self.progress.checkpoint()
	}

	pub fn is_cancelled(&self) -> bool {
		self.progress.is_cancelled()
	}

	pub fn target(&self) -> &Target {
		self.target
	}

	pub fn snapshot(&self) -> &DocumentSnapshot {
		&self.target.document
	}

	pub fn pass_id(&self) -> PassId {
		self.pass_id
	}

	/// Publishes how far collection got, clamped to `[0, 1]`.
	pub fn report_fraction(&self, fraction: f32) {
		let permille = (fraction.clamp(0.0, 1.0) * 1000.0).round() as u32;
		self.fraction.store(permille, Ordering::Relaxed);
	}
}

/// Context handed to [`AnalysisPass::apply`]; holds the document model lock.
pub struct ApplyCx<'a> {
	pub(crate) annotations: &'a mut DocumentAnnotations,
	pub(crate) progress: &'a DaemonProgress,
	pub(crate) target: &'a Target,
	pub(crate) pass_id: PassId,
}

impl ApplyCx<'_> {
	/// Replaces this pass's annotations inside `range`.
	pub fn replace(&mut self, range: TextRange, items: impl IntoIterator<Item = Annotation>) {
		self.annotations.replace(self.pass_id, range, items);
	}

	pub fn annotations(&self) -> &DocumentAnnotations {
		self.annotations
	}

	pub fn checkpoint(&self) -> PassResult {
		self.progress.checkpoint()
	}

	pub fn target(&self) -> &Target {
		self.target
	}

	pub fn snapshot(&self) -> &DocumentSnapshot {
		&self.target.document
	}

	pub fn pass_id(&self) -> PassId {
		self.pass_id
	}
}

/// One unit of analysis work for one target.
///
/// `collect` runs on a worker and must only read shared state. `apply` runs
/// with exclusive access to the document's annotation model and must report
/// exactly the range it covered.
pub trait AnalysisPass: Send {
	fn name(&self) -> &str;

	fn collect(&mut self, cx: &CollectCx<'_>) -> PassResult;

	fn apply(&mut self, cx: &mut ApplyCx<'_>) -> PassResult<Applied>;

	/// Whether results may be applied right now. A pass answering `false`
	/// stays dirty and is retried next round.
	fn can_apply(&self) -> bool {
		true
	}

	/// Requests a synthetic intentions pass after this one completes.
	fn runs_intentions_after(&self) -> bool {
		false
	}
}

/// Context handed to [`PassFactory::create`].
pub struct FactoryCx<'a> {
	pub target: &'a Target,
	pub pass_id: PassId,
	pub dirty: DirtyScope,
}

impl FactoryCx<'_> {
	/// Smallest range covering everything dirty for this pass, if anything is.
	pub fn dirty_range(&self) -> Option<TextRange> {
		self.dirty.covering_range(self.target.document.len_chars())
	}
}

/// Produces pass instances for a target.
///
/// Returning `Ok(None)` means there is nothing to do; the pass is then
/// considered clean for the target's document.
pub trait PassFactory: Send + Sync {
	fn name(&self) -> &str;

	fn create(&self, cx: &FactoryCx<'_>) -> anyhow::Result<Option<Box<dyn AnalysisPass>>>;
}

type CreateFn = dyn Fn(&FactoryCx<'_>) -> anyhow::Result<Option<Box<dyn AnalysisPass>>> + Send + Sync;

struct FnFactory {
	name: String,
	create: Box<CreateFn>,
}

impl PassFactory for FnFactory {
	fn name(&self) -> &str {
		&self.name
	}

	fn create(&self, cx: &FactoryCx<'_>) -> anyhow::Result<Option<Box<dyn AnalysisPass>>> {
		(self.create)(cx)
	}
}

/// Wraps a closure as a [`PassFactory`].
pub fn factory_fn<F>(name: impl Into<String>, create: F) -> Arc<dyn PassFactory>
where
	F: Fn(&FactoryCx<'_>) -> anyhow::Result<Option<Box<dyn AnalysisPass>>> + Send + Sync + 'static,
{
	Arc::new(FnFactory {
		name: name.into(),
		create: Box::new(create),
	})
}

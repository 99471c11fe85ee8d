//! The scheduler facade hosts drive: invalidation, debounced restarts, round
//! submission and the status queries built on top of them.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};
use std::time::Instant;

use lumen_primitives::{DocumentId, PassId, TextEdit, TextRange};
use lumen_worker::{InlineUi, JobPool, TokioJobPool, UiDispatcher};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use crate::annotations::{Annotation, AnnotationStore, DocumentAnnotations};
use crate::dirty::DirtyScopeMap;
use crate::engine::{NodeSnapshot, Round, RoundHandle, RoundServices};
use crate::error::{DaemonError, panic_message};
use crate::graph::GraphBuilder;
use crate::instantiate::{InstantiateFilter, Instantiator};
use crate::listener::{DaemonListener, NoopListener};
use crate::pass::{Applied, ApplyCx, CollectCx, PassError};
use crate::progress::{DaemonProgress, PassFailure, ProgressController};
use crate::registry::{PassRegistry, PassSpec};
use crate::settings::DaemonSettings;
use crate::target::Target;

/// Why the scheduler is being invalidated. Shows up in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
	Edit,
	SettingsChanged,
	Restart,
	FocusChanged,
	External(&'static str),
}

impl fmt::Display for InvalidationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Edit => f.write_str("edit"),
			Self::SettingsChanged => f.write_str("settings changed"),
			Self::Restart => f.write_str("restart"),
			Self::FocusChanged => f.write_str("focus changed"),
			Self::External(what) => f.write_str(what),
		}
	}
}

/// What an invalidation makes dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
	/// Every pass of every document.
	All,
	/// Every pass of one document.
	Document(DocumentId),
	/// A range of one document.
	Range(DocumentId, TextRange),
	/// A text edit; tracked ranges and annotations shift with it.
	Edit(DocumentId, TextEdit),
	/// Nothing; only restarts the daemon.
	Nothing,
}

struct SchedulerState {
	settings: DaemonSettings,
	round: Option<RoundHandle>,
	/// Debounce deadline of the next round, if one is armed.
	restart_at: Option<Instant>,
	disabled_documents: FxHashSet<DocumentId>,
	update_by_timer: bool,
	timer_guards: usize,
	disposed: bool,
}

impl SchedulerState {
	fn timer_enabled(&self) -> bool {
		self.update_by_timer && self.timer_guards == 0 && !self.disposed
	}
}

struct Inner {
	registry: RwLock<PassRegistry>,
	dirty: DirtyScopeMap,
	annotations: AnnotationStore,
	pool: Arc<dyn JobPool>,
	ui: Arc<dyn UiDispatcher>,
	listener: Arc<dyn DaemonListener>,
	progress: ProgressController,
	state: Mutex<SchedulerState>,
}

/// Builder for [`DaemonScheduler`].
pub struct DaemonSchedulerBuilder {
	registry: PassRegistry,
	pool: Option<Arc<dyn JobPool>>,
	ui: Option<Arc<dyn UiDispatcher>>,
	listener: Option<Arc<dyn DaemonListener>>,
	settings: DaemonSettings,
}

impl DaemonSchedulerBuilder {
	pub fn registry(mut self, registry: PassRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn pool(mut self, pool: Arc<dyn JobPool>) -> Self {
		self.pool = Some(pool);
		self
	}

	pub fn ui(mut self, ui: Arc<dyn UiDispatcher>) -> Self {
		self.ui = Some(ui);
		self
	}

	pub fn listener(mut self, listener: Arc<dyn DaemonListener>) -> Self {
		self.listener = Some(listener);
		self
	}

	pub fn settings(mut self, settings: DaemonSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Defaults: [`TokioJobPool`], [`InlineUi`] and [`NoopListener`].
	pub fn build(self) -> DaemonScheduler {
		let update_by_timer = self.settings.update_by_timer;
		DaemonScheduler {
			inner: Arc::new(Inner {
				registry: RwLock::new(self.registry),
				dirty: DirtyScopeMap::new(),
				annotations: AnnotationStore::new(),
				pool: self.pool.unwrap_or_else(|| Arc::new(TokioJobPool::new())),
				ui: self.ui.unwrap_or_else(|| Arc::new(InlineUi)),
				listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
				progress: ProgressController::new(),
				state: Mutex::new(SchedulerState {
					settings: self.settings,
					round: None,
					restart_at: None,
					disabled_documents: FxHashSet::default(),
					update_by_timer,
					timer_guards: 0,
					disposed: false,
				}),
			}),
		}
	}
}

/// Keeps the update timer disabled while alive.
///
/// Guards nest; the timer is re-enabled when the last one drops.
#[must_use = "the update timer is re-enabled as soon as the guard drops"]
pub struct TimerGuard {
	inner: Weak<Inner>,
}

impl fmt::Debug for TimerGuard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TimerGuard").finish_non_exhaustive()
	}
}

impl Drop for TimerGuard {
	fn drop(&mut self) {
		if let Some(inner) = self.inner.upgrade() {
			DaemonScheduler { inner }.release_timer_guard();
		}
	}
}

/// Incremental, cancellable background analysis scheduler.
///
/// Cloning shares the scheduler. All methods take `&self`; none holds an
/// internal lock while running passes or listener callbacks.
#[derive(Clone)]
pub struct DaemonScheduler {
	inner: Arc<Inner>,
}

impl fmt::Debug for DaemonScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("DaemonScheduler")
			.field("registry", &self.inner.registry.read().len())
			.field("round", &state.round)
			.field("restart_at", &state.restart_at)
			.field("disposed", &state.disposed)
			.finish_non_exhaustive()
	}
}

impl DaemonScheduler {
	pub fn builder() -> DaemonSchedulerBuilder {
		DaemonSchedulerBuilder {
			registry: PassRegistry::new(),
			pool: None,
			ui: None,
			listener: None,
			settings: DaemonSettings::default(),
		}
	}

	pub fn dirty(&self) -> &DirtyScopeMap {
		&self.inner.dirty
	}

	pub fn annotations(&self) -> &AnnotationStore {
		&self.inner.annotations
	}

	pub fn settings(&self) -> DaemonSettings {
		self.inner.state.lock().settings.clone()
	}

	/// Registers a pass on the live registry.
	pub fn register(&self, spec: PassSpec) -> Result<PassId, DaemonError> {
		Ok(self.inner.registry.write().register_spec(spec)?)
	}

	pub fn with_registry<R>(&self, f: impl FnOnce(&PassRegistry) -> R) -> R {
		f(&self.inner.registry.read())
	}

	pub fn current_round(&self) -> Option<RoundHandle> {
		self.inner.state.lock().round.clone()
	}

	/// Deadline of the next debounced round, if one is armed.
	pub fn restart_at(&self) -> Option<Instant> {
		self.inner.state.lock().restart_at
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.state.lock().disposed
	}

	/// Single entry point for host events.
	///
	/// Cancels the running round before dirtying, so an apply of the old
	/// round can never clean text this invalidation dirtied.
	pub fn invalidate(&self, reason: InvalidationReason, scope: InvalidationScope) {
		if self.is_disposed() {
			return;
		}
		self.stop_process(true, &reason);
		let dirty = &self.inner.dirty;
		match scope {
			InvalidationScope::All => dirty.mark_all_dirty(&reason.to_string()),
			InvalidationScope::Document(doc) => dirty.mark_document_dirty(doc),
			InvalidationScope::Range(doc, range) => dirty.mark_dirty(doc, range),
			InvalidationScope::Edit(doc, edit) => {
				dirty.apply_edit(doc, &edit);
				self.inner.annotations.with(doc, |model| model.apply_edit(&edit));
			}
			InvalidationScope::Nothing => {}
		}
	}

	/// Cancels the current round. With `restart`, arms the debounce deadline
	/// unless one is armed already or the update timer is disabled.
	///
	/// Returns true if this call cancelled a live round.
	pub fn stop_process(&self, restart: bool, reason: &dyn fmt::Display) -> bool {
		let cancelled = self.inner.progress.cancel_current(reason);
		if restart {
			let mut state = self.inner.state.lock();
			if state.timer_enabled() && state.restart_at.is_none() {
				let at = Instant::now() + state.settings.autoreparse_delay();
				state.restart_at = Some(at);
				tracing::trace!(%reason, delay_ms = state.settings.autoreparse_delay_ms, "daemon.restart.armed");
			}
		}
		cancelled
	}

	/// Update runnable: starts a round once the debounce deadline has passed.
	pub fn tick(&self, now: Instant, targets: &[Target]) -> Result<Option<RoundHandle>, DaemonError> {
		{
			let mut state = self.inner.state.lock();
			let Some(at) = state.restart_at else {
				return Ok(None);
			};
			if now < at || !state.timer_enabled() || targets.is_empty() {
				return Ok(None);
			}
			state.restart_at = None;
		}
		self.start_round(targets).map(Some)
	}

	/// Runs a round over `targets` now, bypassing the debounce.
	pub fn submit_passes(&self, targets: &[Target]) -> Result<RoundHandle, DaemonError> {
		if self.is_disposed() {
			return Err(DaemonError::Disposed);
		}
		self.start_round(targets)
	}

	fn start_round(&self, targets: &[Target]) -> Result<RoundHandle, DaemonError> {
		let (settings, disabled_documents) = {
			let state = self.inner.state.lock();
			(state.settings.clone(), state.disabled_documents.clone())
		};
		let disabled_passes = settings.disabled_pass_set();

		let (progress, graph, viewers) = {
			let registry = self.inner.registry.read();
			registry.ensure_checked()?;
			let progress = self.inner.progress.rotate();
			let instantiation = Instantiator {
				registry: &registry,
				dirty: &self.inner.dirty,
				filter: InstantiateFilter {
					disabled_passes: Some(&disabled_passes),
					disabled_documents: Some(&disabled_documents),
					record_absent: Some(&progress),
				},
			}
			.instantiate(targets);
			let viewers = instantiation.viewer_ids();
			let graph = GraphBuilder::new(&registry, instantiation).build();
			(progress, graph, viewers)
		};

		if settings.check_consistency
			&& let Err(message) = graph.check_consistency()
		{
			progress.cancel();
			tracing::error!(generation = progress.generation(), error = %message, "daemon.graph.inconsistent");
			return Err(DaemonError::Inconsistent(message));
		}

		let round = Round::new(
			progress,
			graph,
			RoundServices {
				pool: Arc::clone(&self.inner.pool),
				ui: Arc::clone(&self.inner.ui),
				dirty: self.inner.dirty.clone(),
				annotations: self.inner.annotations.clone(),
				listener: Arc::clone(&self.inner.listener),
				class: settings.pass_class,
			},
			viewers,
		);
		let handle = round.handle();
		{
			let mut state = self.inner.state.lock();
			if self.inner.progress.current().same_round(handle.progress()) {
				state.round = Some(handle.clone());
			}
		}
		round.start();
		Ok(handle)
	}

	pub fn restart(&self) {
		self.invalidate(InvalidationReason::Restart, InvalidationScope::All);
	}

	pub fn restart_document(&self, doc: DocumentId) {
		self.invalidate(InvalidationReason::Restart, InvalidationScope::Document(doc));
	}

	/// Installs new settings. Restarts only when analysis output is affected.
	pub fn settings_changed(&self, settings: DaemonSettings) -> bool {
		let old = {
			let mut state = self.inner.state.lock();
			if state.disposed {
				return false;
			}
			if state.settings.update_by_timer != settings.update_by_timer {
				state.update_by_timer = settings.update_by_timer;
			}
			std::mem::replace(&mut state.settings, settings.clone())
		};
		if old.analysis_changed(&settings) {
			self.invalidate(InvalidationReason::SettingsChanged, InvalidationScope::All);
			true
		} else {
			false
		}
	}

	pub fn set_update_by_timer_enabled(&self, enabled: bool) {
		self.inner.state.lock().update_by_timer = enabled;
		self.stop_process(enabled, &"update by timer changed");
	}

	/// Disables the update timer until the returned guard drops.
	pub fn disable_update_by_timer(&self) -> TimerGuard {
		self.inner.state.lock().timer_guards += 1;
		self.stop_process(false, &"update by timer disabled");
		TimerGuard {
			inner: Arc::downgrade(&self.inner),
		}
	}

	fn release_timer_guard(&self) {
		let reenabled = {
			let mut state = self.inner.state.lock();
			state.timer_guards = state.timer_guards.saturating_sub(1);
			state.timer_guards == 0
		};
		if reenabled {
			self.stop_process(true, &"update by timer re-enabled");
		}
	}

	pub fn set_highlighting_enabled(&self, doc: DocumentId, enabled: bool) {
		let changed = {
			let mut state = self.inner.state.lock();
			if enabled {
				state.disabled_documents.remove(&doc)
			} else {
				state.disabled_documents.insert(doc)
			}
		};
		if changed {
			self.invalidate(InvalidationReason::External("highlighting toggled"), InvalidationScope::Document(doc));
		}
	}

	pub fn is_highlighting_available(&self, doc: DocumentId) -> bool {
		let state = self.inner.state.lock();
		!state.disposed && !state.disabled_documents.contains(&doc)
	}

	/// True while the current round is neither finished nor cancelled.
	pub fn is_running(&self) -> bool {
		self.current_round().is_some_and(|round| round.progress().is_running())
	}

	/// Every enabled pass is clean for `doc` and nothing is running or armed.
	pub fn is_all_analysis_finished(&self, doc: DocumentId) -> bool {
		let settings = {
			let state = self.inner.state.lock();
			if state.disposed || state.restart_at.is_some() {
				return false;
			}
			state.settings.clone()
		};
		if self.is_running() {
			return false;
		}
		let ids: Vec<PassId> = self.with_registry(|r| r.ids().filter(|id| !settings.is_pass_disabled(*id)).collect());
		self.inner.dirty.all_clean(doc, ids)
	}

	/// The error-reporting pass has covered the whole of `doc`.
	pub fn is_error_analyzing_finished(&self, doc: DocumentId) -> bool {
		!self.is_disposed() && self.inner.dirty.is_clean(doc, PassId::UPDATE_ALL)
	}

	/// Nodes of the current round working on `doc`.
	pub fn passes_to_show_progress_for(&self, doc: DocumentId) -> Vec<NodeSnapshot> {
		let Some(round) = self.current_round() else {
			return Vec::new();
		};
		round.node_states().into_iter().filter(|n| n.document == doc).collect()
	}

	/// Runs every document-bound pass for `target` on the calling thread and
	/// returns the produced annotations without touching the shared store.
	///
	/// The background daemon is stopped for the duration and re-armed after.
	pub fn run_main_passes(&self, target: &Target, progress: &DaemonProgress) -> Result<Vec<Annotation>, DaemonError> {
		if self.is_disposed() {
			return Err(DaemonError::Disposed);
		}
		let _timer = self.disable_update_by_timer();
		self.cancel_all();
		self.inner.dirty.mark_all_dirty("run main passes");

		let disabled_passes = self.settings().disabled_pass_set();
		let mut passes = {
			let registry = self.inner.registry.read();
			registry.ensure_checked()?;
			let instantiation = Instantiator {
				registry: &registry,
				dirty: &self.inner.dirty,
				filter: InstantiateFilter {
					disabled_passes: Some(&disabled_passes),
					disabled_documents: None,
					record_absent: None,
				},
			}
			.instantiate(std::slice::from_ref(target));
			instantiation.documents.into_iter().flat_map(|g| g.passes).collect::<Vec<_>>()
		};
		passes.sort_by_key(|p| (p.id != PassId::GENERAL_HIGHLIGHTING, p.id));

		let mut scratch = DocumentAnnotations::new();
		for inst in &mut passes {
			progress.checkpoint().map_err(|_| DaemonError::Cancelled)?;
			let fraction = AtomicU32::new(0);
			let cx = CollectCx {
				progress,
				target,
				pass_id: inst.id,
				fraction: &fraction,
			};
			let collected = catch_unwind(AssertUnwindSafe(|| inst.pass.collect(&cx)));
			check_main_step(inst.id, &inst.name, collected.map(|r| r.map(|()| None)))?;

			loop {
				let mut cx = ApplyCx {
					annotations: &mut scratch,
					progress,
					target,
					pass_id: inst.id,
				};
				let applied = catch_unwind(AssertUnwindSafe(|| inst.pass.apply(&mut cx)));
				match check_main_step(inst.id, &inst.name, applied.map(|r| r.map(Some)))? {
					Some(Applied::Partial(_)) => continue,
					_ => break,
				}
			}
		}
		Ok(scratch.into_annotations())
	}

	/// Cancels the current round and disarms any pending restart.
	pub fn cancel_all(&self) {
		self.inner.state.lock().restart_at = None;
		self.stop_process(false, &"cancel all");
	}

	/// Waits until the current round has settled and no newer one replaced it.
	pub async fn wait_idle(&self) {
		loop {
			let Some(round) = self.current_round() else {
				return;
			};
			round.settled().await;
			let replaced = self
				.current_round()
				.is_some_and(|current| current.generation() != round.generation());
			if !replaced {
				return;
			}
		}
	}

	/// Stops everything. Every later operation is a no-op.
	pub fn dispose(&self) {
		{
			let mut state = self.inner.state.lock();
			if state.disposed {
				return;
			}
			state.disposed = true;
			state.restart_at = None;
		}
		self.inner.progress.cancel_current(&"dispose");
		tracing::debug!("daemon.disposed");
	}
}

/// Maps one synchronous pass step to the main-pass error surface.
fn check_main_step(
	id: PassId,
	name: &str,
	step: std::thread::Result<Result<Option<Applied>, PassError>>,
) -> Result<Option<Applied>, DaemonError> {
	let message = match step {
		Ok(Ok(applied)) => return Ok(applied),
		Ok(Err(PassError::Cancelled)) => return Err(DaemonError::Cancelled),
		Ok(Err(PassError::Failed(message))) => message,
		Err(payload) => panic_message(payload.as_ref()),
	};
	tracing::error!(pass = %id, name, error = %message, "daemon.main_pass.failed");
	Err(DaemonError::PassFailed(PassFailure {
		pass: id,
		name: name.to_string(),
		message,
	}))
}

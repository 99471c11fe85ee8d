//! Test doubles shared by the daemon's unit, invariant and scenario tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use lumen_primitives::{DocumentId, Rope, TextRange, ViewerId};
use lumen_worker::{InlineUi, Job, JobPool, TaskClass, TokioJobPool, UiDispatcher};
use parking_lot::Mutex;

use crate::annotations::{Annotation, Severity};
use crate::listener::DaemonListener;
use crate::pass::{AnalysisPass, Applied, ApplyCx, CollectCx, FactoryCx, PassError, PassFactory, PassResult};
use crate::registry::PassRegistry;
use crate::scheduler::DaemonScheduler;
use crate::settings::DaemonSettings;
use crate::target::{DocumentSnapshot, Target};

pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Ordered record of everything scripted passes did.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
	pub(crate) fn push(&self, event: impl Into<String>) {
		self.0.lock().push(event.into());
	}

	pub(crate) fn events(&self) -> Vec<String> {
		self.0.lock().clone()
	}

	pub(crate) fn count(&self, event: &str) -> usize {
		self.0.lock().iter().filter(|e| *e == event).count()
	}

	/// Index of the first event starting with `prefix`.
	pub(crate) fn position(&self, prefix: &str) -> Option<usize> {
		self.0.lock().iter().position(|e| e.starts_with(prefix))
	}

	pub(crate) fn contains(&self, prefix: &str) -> bool {
		self.position(prefix).is_some()
	}

	/// Asserts the first `before` event precedes the first `after` event.
	pub(crate) fn assert_before(&self, before: &str, after: &str) {
		let events = self.events();
		let b = self.position(before).unwrap_or_else(|| panic!("missing {before}: {events:?}"));
		let a = self.position(after).unwrap_or_else(|| panic!("missing {after}: {events:?}"));
		assert!(b < a, "{before} should precede {after}: {events:?}");
	}
}

/// Manually opened barrier a collecting pass spins on, polling cancellation.
#[derive(Debug, Default)]
pub(crate) struct Gate {
	open: AtomicBool,
	entered: AtomicUsize,
}

impl Gate {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn open(&self) {
		self.open.store(true, Ordering::SeqCst);
	}

	pub(crate) fn entered(&self) -> usize {
		self.entered.load(Ordering::SeqCst)
	}

	/// Polls until some pass is blocked on the gate.
	pub(crate) async fn wait_entered(&self) {
		for _ in 0..2000 {
			if self.entered() > 0 {
				return;
			}
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		panic!("no pass reached the gate");
	}
}

#[derive(Debug, Clone, Default)]
pub(crate) enum CreateStep {
	#[default]
	Present,
	Absent,
	Error,
	Panic,
}

#[derive(Debug, Clone, Default)]
pub(crate) enum CollectStep {
	#[default]
	Ok,
	Fail,
	Panic,
	/// Returns `Cancelled` without the round being cancelled.
	CancelSelf,
	/// Spins on the gate, honoring cancellation.
	Block(Arc<Gate>),
}

#[derive(Debug, Clone, Default)]
pub(crate) enum ApplyStep {
	/// Applies the whole document in one step.
	#[default]
	Complete,
	/// Applies the whole document in `n` equal steps.
	Partial(usize),
	Fail,
	Panic,
	/// `can_apply()` answers false.
	Defer,
}

/// Behavior of a [`ScriptedFactory`] and the passes it creates.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
	pub(crate) create: CreateStep,
	pub(crate) collect: CollectStep,
	pub(crate) apply: ApplyStep,
	pub(crate) intentions: bool,
	pub(crate) severity: Option<Severity>,
}

impl Script {
	pub(crate) fn ok() -> Self {
		Self::default()
	}

	pub(crate) fn create(mut self, step: CreateStep) -> Self {
		self.create = step;
		self
	}

	pub(crate) fn collect(mut self, step: CollectStep) -> Self {
		self.collect = step;
		self
	}

	pub(crate) fn apply(mut self, step: ApplyStep) -> Self {
		self.apply = step;
		self
	}

	pub(crate) fn intentions(mut self) -> Self {
		self.intentions = true;
		self
	}

	pub(crate) fn annotate(mut self, severity: Severity) -> Self {
		self.severity = Some(severity);
		self
	}
}

pub(crate) struct ScriptedFactory {
	name: String,
	script: Script,
	log: EventLog,
}

impl ScriptedFactory {
	pub(crate) fn new(name: &str, script: Script, log: &EventLog) -> Arc<dyn PassFactory> {
		Arc::new(Self {
			name: name.to_string(),
			script,
			log: log.clone(),
		})
	}
}

impl PassFactory for ScriptedFactory {
	fn name(&self) -> &str {
		&self.name
	}

	fn create(&self, cx: &FactoryCx<'_>) -> anyhow::Result<Option<Box<dyn AnalysisPass>>> {
		match self.script.create {
			CreateStep::Present => {}
			CreateStep::Absent => return Ok(None),
			CreateStep::Error => anyhow::bail!("{} cannot be created", self.name),
			CreateStep::Panic => panic!("{} factory panicked", self.name),
		}
		self.log.push(format!("create:{}@{}", self.name, cx.target.viewer.0));
		Ok(Some(Box::new(ScriptedPass {
			name: self.name.clone(),
			script: self.script.clone(),
			log: self.log.clone(),
			applied_to: 0,
		})))
	}
}

pub(crate) struct ScriptedPass {
	name: String,
	script: Script,
	log: EventLog,
	applied_to: usize,
}

impl AnalysisPass for ScriptedPass {
	fn name(&self) -> &str {
		&self.name
	}

	fn collect(&mut self, cx: &CollectCx<'_>) -> PassResult {
		cx.checkpoint()?;
		self.log.push(format!("collect:{}", self.name));
		match &self.script.collect {
			CollectStep::Ok => {}
			CollectStep::Fail => return Err(PassError::Failed(format!("{} failed", self.name))),
			CollectStep::Panic => panic!("{} collect panicked", self.name),
			CollectStep::CancelSelf => return Err(PassError::Cancelled),
			CollectStep::Block(gate) => {
				gate.entered.fetch_add(1, Ordering::SeqCst);
				while !gate.open.load(Ordering::SeqCst) {
					if let Err(err) = cx.checkpoint() {
						self.log.push(format!("cancelled:{}", self.name));
						return Err(err);
					}
					std::thread::sleep(Duration::from_millis(1));
				}
			}
		}
		cx.report_fraction(1.0);
		cx.checkpoint()
	}

	fn apply(&mut self, cx: &mut ApplyCx<'_>) -> PassResult<Applied> {
		let len = cx.snapshot().len_chars();
		let (range, done) = match self.script.apply {
			ApplyStep::Complete | ApplyStep::Defer => (TextRange::whole(len), true),
			ApplyStep::Partial(steps) => {
				let chunk = len.div_ceil(steps.max(1)).max(1);
				let end = (self.applied_to + chunk).min(len);
				let range = TextRange::new(self.applied_to, end);
				self.applied_to = end;
				(range, end >= len)
			}
			ApplyStep::Fail => return Err(PassError::Failed(format!("{} apply failed", self.name))),
			ApplyStep::Panic => panic!("{} apply panicked", self.name),
		};
		if let Some(severity) = self.script.severity {
			cx.replace(range, [Annotation::new(range, severity, self.name.clone())]);
		}
		self.log.push(format!("apply:{}:{}", self.name, range));
		Ok(if done { Applied::Complete(range) } else { Applied::Partial(range) })
	}

	fn can_apply(&self) -> bool {
		!matches!(self.script.apply, ApplyStep::Defer)
	}

	fn runs_intentions_after(&self) -> bool {
		self.script.intentions
	}
}

/// Job pool that queues jobs until a test steps it.
#[derive(Default)]
pub(crate) struct ManualPool {
	jobs: Mutex<VecDeque<Job>>,
	submitted: AtomicUsize,
}

impl std::fmt::Debug for ManualPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManualPool").field("queued", &self.len()).finish()
	}
}

impl ManualPool {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn len(&self) -> usize {
		self.jobs.lock().len()
	}

	pub(crate) fn submitted(&self) -> usize {
		self.submitted.load(Ordering::SeqCst)
	}

	pub(crate) fn run_next(&self) -> bool {
		let job = self.jobs.lock().pop_front();
		match job {
			Some(job) => {
				job();
				true
			}
			None => false,
		}
	}

	pub(crate) fn run_all(&self) -> usize {
		let mut ran = 0;
		while self.run_next() {
			ran += 1;
		}
		ran
	}

	/// Drops queued jobs without running them.
	pub(crate) fn discard_all(&self) -> usize {
		let jobs: Vec<Job> = self.jobs.lock().drain(..).collect();
		jobs.len()
	}
}

impl JobPool for ManualPool {
	fn submit(&self, _class: TaskClass, job: Job) {
		self.submitted.fetch_add(1, Ordering::SeqCst);
		self.jobs.lock().push_back(job);
	}
}

/// Dispatcher that queues jobs until a test steps it.
#[derive(Default)]
pub(crate) struct ManualUi {
	jobs: Mutex<VecDeque<Job>>,
}

impl std::fmt::Debug for ManualUi {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManualUi").field("queued", &self.len()).finish()
	}
}

impl ManualUi {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn len(&self) -> usize {
		self.jobs.lock().len()
	}

	pub(crate) fn run_next(&self) -> bool {
		let job = self.jobs.lock().pop_front();
		match job {
			Some(job) => {
				job();
				true
			}
			None => false,
		}
	}

	pub(crate) fn run_all(&self) -> usize {
		let mut ran = 0;
		while self.run_next() {
			ran += 1;
		}
		ran
	}
}

impl UiDispatcher for ManualUi {
	fn dispatch(&self, job: Job) {
		self.jobs.lock().push_back(job);
	}

	fn is_dispatch_thread(&self) -> bool {
		true
	}
}

/// Steps both manual executors until neither has queued work.
pub(crate) fn drain(pool: &ManualPool, ui: &ManualUi) {
	loop {
		let ran = pool.run_all() + ui.run_all();
		if ran == 0 {
			return;
		}
	}
}

#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
	pub(crate) started: AtomicUsize,
	pub(crate) finished: AtomicUsize,
	pub(crate) cancelled: Mutex<Vec<u64>>,
}

impl DaemonListener for RecordingListener {
	fn daemon_starting(&self, _viewers: &[ViewerId]) {
		self.started.fetch_add(1, Ordering::SeqCst);
	}

	fn daemon_finished(&self, _viewers: &[ViewerId]) {
		self.finished.fetch_add(1, Ordering::SeqCst);
	}

	fn daemon_cancelled(&self, generation: u64) {
		self.cancelled.lock().push(generation);
	}
}

pub(crate) fn snapshot(doc: u64, text: &str) -> DocumentSnapshot {
	DocumentSnapshot::new(DocumentId(doc), 1, Rope::from(text))
}

pub(crate) fn target(viewer: u64, doc: u64, text: &str) -> Target {
	Target::new(ViewerId(viewer), snapshot(doc, text))
}

/// Scheduler wired to manual executors, so tests step every job by hand.
pub(crate) struct Harness {
	pub(crate) scheduler: DaemonScheduler,
	pub(crate) pool: Arc<ManualPool>,
	pub(crate) ui: Arc<ManualUi>,
	pub(crate) log: EventLog,
	pub(crate) listener: Arc<RecordingListener>,
}

impl Harness {
	pub(crate) fn new(setup: impl FnOnce(&mut PassRegistry, &EventLog)) -> Self {
		Self::with_settings(DaemonSettings::default(), setup)
	}

	pub(crate) fn with_settings(settings: DaemonSettings, setup: impl FnOnce(&mut PassRegistry, &EventLog)) -> Self {
		init_tracing();
		let log = EventLog::default();
		let mut registry = PassRegistry::new();
		setup(&mut registry, &log);
		let pool = ManualPool::new();
		let ui = ManualUi::new();
		let listener = Arc::new(RecordingListener::default());
		let scheduler = DaemonScheduler::builder()
			.registry(registry)
			.pool(pool.clone())
			.ui(ui.clone())
			.listener(listener.clone())
			.settings(settings)
			.build();
		Self {
			scheduler,
			pool,
			ui,
			log,
			listener,
		}
	}

	pub(crate) fn drain(&self) {
		drain(&self.pool, &self.ui);
	}
}

/// Scheduler running collection on tokio's blocking pool.
pub(crate) fn tokio_scheduler(
	setup: impl FnOnce(&mut PassRegistry, &EventLog),
) -> (DaemonScheduler, EventLog, Arc<RecordingListener>) {
	init_tracing();
	let log = EventLog::default();
	let mut registry = PassRegistry::new();
	setup(&mut registry, &log);
	let listener = Arc::new(RecordingListener::default());
	let scheduler = DaemonScheduler::builder()
		.registry(registry)
		.pool(Arc::new(TokioJobPool::new()))
		.ui(Arc::new(InlineUi))
		.listener(listener.clone())
		.build();
	(scheduler, log, listener)
}

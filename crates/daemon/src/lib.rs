//! Incremental, cancellable background analysis daemon.
//!
//! Hosts register [`PassFactory`]s in a [`PassRegistry`], then drive a
//! [`DaemonScheduler`] with invalidations and ticks. Each round builds a
//! fresh dependency graph of pass instances for the visible [`Target`]s and
//! runs it:
//!
//! * collection runs concurrently on a [`lumen_worker::JobPool`]
//! * application runs through a [`lumen_worker::UiDispatcher`] under the
//!   document's annotation lock
//! * successful applies subtract their range from the [`DirtyScopeMap`]
//! * any invalidation cancels the round's [`DaemonProgress`] and arms a
//!   debounced restart
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use lumen_daemon::{DaemonScheduler, DocumentSnapshot, PassSpec, Target, factory_fn};
//! use lumen_primitives::{DocumentId, Rope, ViewerId};
//!
//! let scheduler = DaemonScheduler::builder().build();
//! scheduler.register(PassSpec::new(factory_fn("noop", |_| Ok(None)))).unwrap();
//!
//! let doc = DocumentSnapshot::new(DocumentId(1), 1, Rope::from("fn main() {}"));
//! let targets = [Target::new(ViewerId(1), doc).focused()];
//! scheduler.restart();
//! let _round = scheduler.tick(Instant::now() + scheduler.settings().autoreparse_delay(), &targets);
//! ```

mod annotations;
mod dirty;
mod engine;
mod error;
mod graph;
mod instantiate;
mod listener;
mod pass;
mod progress;
mod registry;
mod scheduler;
mod settings;
mod target;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_support;

pub use annotations::{Annotation, AnnotationStore, DocumentAnnotations, Severity};
pub use dirty::{DirtyScope, DirtyScopeMap};
pub use engine::{NodeSnapshot, RoundHandle, RoundOutcome};
pub use error::{DaemonError, RegistryError};
pub use graph::{NodeOwner, NodeState};
pub use listener::{DaemonListener, NoopListener};
pub use pass::{
	AnalysisPass, Applied, ApplyCx, CollectCx, FactoryCx, PassBinding, PassError, PassFactory, PassResult, factory_fn,
};
pub use progress::{DaemonProgress, PassFailure, ProgressController};
pub use registry::{PassRegistration, PassRegistry, PassSpec};
pub use scheduler::{DaemonScheduler, DaemonSchedulerBuilder, InvalidationReason, InvalidationScope, TimerGuard};
pub use settings::{DaemonSettings, SettingsError};
pub use target::{DocumentSnapshot, Target};

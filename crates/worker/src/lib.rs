//! Worker runtime glue for the analysis daemon.
//!
//! Provides the execution classes, the generation-scoped cancellation
//! token, and the two execution seams the daemon schedules onto:
//! * [`JobPool`] for concurrent collection work
//! * [`UiDispatcher`] for single-writer application work

mod class;
mod pool;
mod spawn;
mod token;
mod ui;

pub use class::TaskClass;
pub use pool::{InlineJobPool, Job, JobPool, TokioJobPool};
pub use spawn::spawn_named_thread;
pub use token::{GenerationClock, GenerationToken};
pub use ui::{InlineUi, UiDispatcher, UiThread};

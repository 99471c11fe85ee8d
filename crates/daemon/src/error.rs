//! Error types for pass registration and scheduling.

use std::any::Any;

use lumen_primitives::PassId;

use crate::progress::PassFailure;

/// Configuration errors raised while registering passes.
///
/// These are fatal for the host: a registry that produces them cannot be
/// scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	/// A forced id collides with an existing registration.
	#[error("pass id {id} is already registered by `{existing}`")]
	DuplicateId { id: PassId, existing: String },
	/// A pass transitively depends on itself.
	#[error("pass dependency cycle through {id}: {}", format_path(path))]
	Cycle { id: PassId, path: Vec<PassId> },
}

fn format_path(path: &[PassId]) -> String {
	path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

/// Errors surfaced by [`crate::DaemonScheduler`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DaemonError {
	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error("inconsistent pass graph: {0}")]
	Inconsistent(String),

	#[error("daemon scheduler is disposed")]
	Disposed,

	#[error("analysis cancelled")]
	Cancelled,

	#[error("pass failed: {0}")]
	PassFailed(PassFailure),
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"panic with non-string payload".to_string()
	}
}

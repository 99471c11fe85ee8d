//! Scheduler settings, loadable from TOML.

use std::time::Duration;

use lumen_primitives::PassId;
use lumen_worker::TaskClass;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use thiserror::Error;

/// Longest accepted debounce delay.
const MAX_AUTOREPARSE_DELAY_MS: u64 = 60_000;

/// Errors raised while loading [`DaemonSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("settings parse error: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid settings: {0}")]
	Invalid(String),
}

/// Scheduler tuning knobs.
///
/// ```toml
/// autoreparse_delay_ms = 300
/// update_by_timer = true
/// pass_class = "cpu_blocking"
/// disabled_passes = [3]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
	/// Debounce between the last invalidation and the next round.
	pub autoreparse_delay_ms: u64,
	/// Whether invalidations re-arm the update timer.
	pub update_by_timer: bool,
	/// Replays every built graph before running it.
	pub check_consistency: bool,
	/// Worker class collection jobs are submitted with.
	pub pass_class: TaskClass,
	/// Pass ids never instantiated.
	pub disabled_passes: Vec<u32>,
}

impl Default for DaemonSettings {
	fn default() -> Self {
		Self {
			autoreparse_delay_ms: 300,
			update_by_timer: true,
			check_consistency: cfg!(test),
			pass_class: TaskClass::CpuBlocking,
			disabled_passes: Vec::new(),
		}
	}
}

impl DaemonSettings {
	pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
		let settings: Self = toml::from_str(source)?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.autoreparse_delay_ms > MAX_AUTOREPARSE_DELAY_MS {
			return Err(SettingsError::Invalid(format!(
				"autoreparse_delay_ms = {} exceeds {MAX_AUTOREPARSE_DELAY_MS}",
				self.autoreparse_delay_ms
			)));
		}
		Ok(())
	}

	pub fn autoreparse_delay(&self) -> Duration {
		Duration::from_millis(self.autoreparse_delay_ms)
	}

	/// Whether switching from `self` to `other` changes what analysis produces.
	pub fn analysis_changed(&self, other: &Self) -> bool {
		self.disabled_pass_set() != other.disabled_pass_set()
	}

	pub fn is_pass_disabled(&self, id: PassId) -> bool {
		self.disabled_passes.contains(&id.get())
	}

	pub(crate) fn disabled_pass_set(&self) -> FxHashSet<PassId> {
		self.disabled_passes.iter().copied().map(PassId).collect()
	}
}

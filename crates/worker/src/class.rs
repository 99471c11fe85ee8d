use serde::Deserialize;

/// Execution classes used to route analysis work and label it in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
	/// Latency-sensitive work that must land on the single-writer UI side.
	Interactive,
	/// Cheap background work that can be dropped when a round is cancelled.
	Background,
	/// CPU-heavy collection work executed on the blocking pool.
	#[default]
	CpuBlocking,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
			Self::CpuBlocking => "cpu_blocking",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

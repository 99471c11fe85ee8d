/// Identity of an open document (shared text buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(pub u64);

/// Identity of a viewer (editor pane) showing a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewerId(pub u64);

/// Stable identifier of a registered analysis pass.
///
/// Ids below [`PassId::FIRST_DYNAMIC`] are reserved for well-known built-in
/// passes registered with a forced id; everything else is assigned at
/// registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(pub u32);

impl PassId {
	pub const GENERAL_HIGHLIGHTING: Self = Self(1);
	pub const LOCAL_INSPECTIONS: Self = Self(2);
	pub const LINE_MARKERS: Self = Self(3);
	pub const EXTERNAL_ANNOTATORS: Self = Self(4);
	pub const INTENTIONS: Self = Self(5);
	/// Pass whose clean state means "error analysis finished".
	pub const UPDATE_ALL: Self = Self::GENERAL_HIGHLIGHTING;
	/// First id handed out by automatic assignment.
	pub const FIRST_DYNAMIC: Self = Self(100);

	pub const fn get(self) -> u32 {
		self.0
	}

	pub const fn is_reserved(self) -> bool {
		self.0 < Self::FIRST_DYNAMIC.0
	}

	pub const fn next(self) -> Self {
		Self(self.0.wrapping_add(1))
	}
}

impl std::fmt::Display for PassId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

impl std::fmt::Display for DocumentId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "doc:{}", self.0)
	}
}

impl std::fmt::Display for ViewerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "viewer:{}", self.0)
	}
}

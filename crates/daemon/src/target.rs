use lumen_primitives::{DocumentId, Rope, TextRange, ViewerId};

/// Read-only snapshot of a document's analyzable content.
///
/// Cloning is cheap; passes keep their own copy for the duration of a round.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
	id: DocumentId,
	version: u64,
	text: Rope,
}

impl DocumentSnapshot {
	pub fn new(id: DocumentId, version: u64, text: Rope) -> Self {
		Self { id, version, text }
	}

	pub fn id(&self) -> DocumentId {
		self.id
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn text(&self) -> &Rope {
		&self.text
	}

	pub fn len_chars(&self) -> usize {
		self.text.len_chars()
	}

	/// The range covering the whole document.
	pub fn range(&self) -> TextRange {
		TextRange::whole(self.text.len_chars())
	}
}

/// A viewer showing a document: the unit passes are created for.
#[derive(Debug, Clone)]
pub struct Target {
	pub viewer: ViewerId,
	pub document: DocumentSnapshot,
	/// Whether this viewer currently has focus; it then owns the
	/// document-bound passes of its document.
	pub focused: bool,
}

impl Target {
	pub fn new(viewer: ViewerId, document: DocumentSnapshot) -> Self {
		Self {
			viewer,
			document,
			focused: false,
		}
	}

	pub fn focused(mut self) -> Self {
		self.focused = true;
		self
	}

	pub fn document_id(&self) -> DocumentId {
		self.document.id()
	}
}

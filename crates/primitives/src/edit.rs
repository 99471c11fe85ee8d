use crate::range::{CharIdx, CharLen, TextRange};

/// A single text replacement: `removed` characters starting at `start` were
/// replaced by `inserted` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEdit {
	pub start: CharIdx,
	pub removed: CharLen,
	pub inserted: CharLen,
}

impl TextEdit {
	pub fn insert(at: CharIdx, len: CharLen) -> Self {
		Self {
			start: at,
			removed: 0,
			inserted: len,
		}
	}

	pub fn delete(range: TextRange) -> Self {
		Self {
			start: range.start(),
			removed: range.len(),
			inserted: 0,
		}
	}

	pub fn replace(range: TextRange, inserted: CharLen) -> Self {
		Self {
			start: range.start(),
			removed: range.len(),
			inserted,
		}
	}

	/// Range the edit replaced, in pre-edit coordinates.
	pub fn old_range(&self) -> TextRange {
		TextRange::new(self.start, self.start + self.removed)
	}

	/// Range the edit produced, in post-edit coordinates.
	pub fn new_range(&self) -> TextRange {
		TextRange::new(self.start, self.start + self.inserted)
	}

	/// Maps a pre-edit range into post-edit coordinates.
	///
	/// Ranges entirely before the edit are unchanged, ranges entirely after it
	/// shift by the length delta, and ranges overlapping the replaced span
	/// grow to cover the inserted text.
	pub fn map_range(&self, range: TextRange) -> TextRange {
		let old = self.old_range();
		if range.end() < old.start() || (range.end() == old.start() && !range.is_empty() && self.removed > 0) {
			return range;
		}
		if range.start() > old.end() {
			return TextRange::new(self.shift(range.start()), self.shift(range.end()));
		}
		let start = range.start().min(self.start);
		let end = if range.end() > old.end() {
			self.shift(range.end())
		} else {
			self.start + self.inserted
		};
		TextRange::new(start, end.max(self.start + self.inserted))
	}

	fn shift(&self, pos: CharIdx) -> CharIdx {
		(pos + self.inserted).saturating_sub(self.removed)
	}
}

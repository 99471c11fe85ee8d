use smallvec::{SmallVec, smallvec};

/// A position in the text, measured in characters (not bytes).
pub type CharIdx = usize;

/// A length or count in the text, measured in characters (not bytes).
pub type CharLen = usize;

/// Half-open character range `[start, end)` inside a document.
///
/// Unlike a selection there is no direction: analysis scopes only care about
/// the extent they cover. Constructors normalize reversed bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TextRange {
	start: CharIdx,
	end: CharIdx,
}

impl TextRange {
	/// Creates a range covering `[a, b)`, swapping the bounds if reversed.
	pub fn new(a: CharIdx, b: CharIdx) -> Self {
		if a <= b { Self { start: a, end: b } } else { Self { start: b, end: a } }
	}

	/// Creates a zero-width range at `pos`.
	pub fn empty(pos: CharIdx) -> Self {
		Self { start: pos, end: pos }
	}

	/// Creates the range covering a whole document of `len` characters.
	pub fn whole(len: CharLen) -> Self {
		Self { start: 0, end: len }
	}

	#[inline]
	pub const fn start(&self) -> CharIdx {
		self.start
	}

	#[inline]
	pub const fn end(&self) -> CharIdx {
		self.end
	}

	#[inline]
	pub const fn len(&self) -> CharLen {
		self.end - self.start
	}

	#[inline]
	pub const fn is_empty(&self) -> bool {
		self.start == self.end
	}

	/// Returns true if `pos` lies inside the range (exclusive of `end`).
	pub fn contains_offset(&self, pos: CharIdx) -> bool {
		pos >= self.start && pos < self.end
	}

	/// Returns true if `other` is fully covered by this range.
	pub fn contains_range(&self, other: &TextRange) -> bool {
		other.start >= self.start && other.end <= self.end
	}

	/// Returns true if the two ranges share at least one character, or touch
	/// at their bounds.
	pub fn touches(&self, other: &TextRange) -> bool {
		self.start <= other.end && other.start <= self.end
	}

	/// Returns true if the two ranges share at least one character.
	pub fn intersects(&self, other: &TextRange) -> bool {
		self.start.max(other.start) < self.end.min(other.end)
	}

	/// Returns the overlapping part of both ranges, if non-empty.
	pub fn intersection(&self, other: &TextRange) -> Option<TextRange> {
		let start = self.start.max(other.start);
		let end = self.end.min(other.end);
		(start < end).then_some(TextRange { start, end })
	}

	/// Returns the smallest range covering both ranges.
	pub fn cover(&self, other: &TextRange) -> TextRange {
		TextRange {
			start: self.start.min(other.start),
			end: self.end.max(other.end),
		}
	}

	/// Removes `other` from this range, returning the zero, one or two
	/// remaining pieces in document order.
	pub fn subtract(&self, other: &TextRange) -> SmallVec<[TextRange; 2]> {
		if self.is_empty() {
			let covered = other.start <= self.start && self.start <= other.end;
			return if covered { SmallVec::new() } else { smallvec![*self] };
		}
		if other.is_empty() {
			return smallvec![*self];
		}
		if !self.intersects(other) {
			return smallvec![*self];
		}
		let mut out = SmallVec::new();
		if self.start < other.start {
			out.push(TextRange::new(self.start, other.start));
		}
		if other.end < self.end {
			out.push(TextRange::new(other.end, self.end));
		}
		out
	}

	/// Clamps both bounds to `[0, max]`.
	pub fn clamp(&self, max: CharIdx) -> TextRange {
		TextRange {
			start: self.start.min(max),
			end: self.end.min(max),
		}
	}
}

impl From<std::ops::Range<CharIdx>> for TextRange {
	fn from(r: std::ops::Range<CharIdx>) -> Self {
		Self::new(r.start, r.end)
	}
}

impl std::fmt::Display for TextRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}..{}", self.start, self.end)
	}
}

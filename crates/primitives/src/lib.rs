//! Core value types shared by the analysis daemon: ranges, edits and ids.

/// Text edit descriptions used to keep dirty scopes aligned with the buffer.
pub mod edit;
/// Identifier types for documents, viewers and passes.
pub mod ids;
/// Character ranges.
pub mod range;

pub use edit::TextEdit;
pub use ids::{DocumentId, PassId, ViewerId};
pub use range::{CharIdx, CharLen, TextRange};
pub use ropey::{Rope, RopeSlice};

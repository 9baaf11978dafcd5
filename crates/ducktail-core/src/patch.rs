//! Edit algebra: spans, edits, conflict detection and all-or-nothing apply.
//!
//! This module implements the text-level half of a rewrite:
//! - Half-open byte spans with overlap detection
//! - Insert / delete / replace edits against one module's text
//! - Conflict detection (overlapping edits, out-of-bounds spans)
//! - Atomic apply semantics (all-or-nothing)
//!
//! Edits never carry their own positions forward: every edit of one apply is
//! measured against the same base text, and the output is assembled by
//! walking the edits in ascending position order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash type for content verification (SHA-256, stored as hex string for JSON compatibility).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute SHA-256 hash of the given bytes, returning hex-encoded string.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Span
// ============================================================================

/// Byte offsets into module text.
///
/// Spans are half-open intervals: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: u64,
    /// End byte offset (exclusive).
    pub end: u64,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(
            start <= end,
            "Span start ({}) must be <= end ({})",
            start,
            end
        );
        Span { start, end }
    }

    /// Empty span at `offset`.
    pub fn at(offset: u64) -> Self {
        Span {
            start: offset,
            end: offset,
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Check if span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if this span overlaps with another.
    ///
    /// Two spans overlap if they share any byte positions.
    /// Adjacent spans (one ends where another starts) do NOT overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if this span contains another span entirely.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether an empty span at `offset` falls strictly inside this span.
    pub fn strictly_contains_point(&self, offset: u64) -> bool {
        self.start < offset && offset < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Conflict Detection
// ============================================================================

/// A detected overlap or invalidation that prevents apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conflict {
    /// Two edits touch the same bytes, or an insertion lands inside a
    /// replaced or removed range.
    OverlappingSpans {
        edit1: u32,
        edit2: u32,
        edit1_span: Span,
        edit2_span: Span,
    },

    /// Span is out of bounds for the text.
    SpanOutOfBounds { edit: u32, span: Span, text_len: u64 },

    /// Span splits a multi-byte character.
    NotCharBoundary { edit: u32, span: Span },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::OverlappingSpans {
                edit1_span,
                edit2_span,
                ..
            } => write!(f, "edits at {} and {} overlap", edit1_span, edit2_span),
            Conflict::SpanOutOfBounds { span, text_len, .. } => {
                write!(f, "edit at {} is outside text of length {}", span, text_len)
            }
            Conflict::NotCharBoundary { span, .. } => {
                write!(f, "edit at {} splits a character", span)
            }
        }
    }
}

// ============================================================================
// Edit Operations
// ============================================================================

/// The kind of edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// Insert text at `span.start`.
    Insert,
    /// Delete the bytes in `span`.
    Delete,
    /// Replace the bytes in `span` with new text.
    Replace,
}

/// A single text change against one module's base text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    /// Insertion order within the owning rewriter; breaks position ties.
    pub id: u32,
    /// The kind of operation.
    pub kind: EditKind,
    /// Target bytes (empty for inserts).
    pub span: Span,
    /// The new text (empty for Delete).
    pub text: String,
}

impl Edit {
    /// Create an Insert edit.
    pub fn insert(id: u32, offset: u64, text: impl Into<String>) -> Self {
        Edit {
            id,
            kind: EditKind::Insert,
            span: Span::at(offset),
            text: text.into(),
        }
    }

    /// Create a Delete edit.
    pub fn delete(id: u32, span: Span) -> Self {
        Edit {
            id,
            kind: EditKind::Delete,
            span,
            text: String::new(),
        }
    }

    /// Create a Replace edit.
    pub fn replace(id: u32, span: Span, text: impl Into<String>) -> Self {
        Edit {
            id,
            kind: EditKind::Replace,
            span,
            text: text.into(),
        }
    }

    fn is_insert(&self) -> bool {
        self.kind == EditKind::Insert
    }

    /// Whether two edits cannot both be applied to one base text.
    ///
    /// Inserts at the same offset never conflict; an insert conflicts with a
    /// range edit only when it lands strictly inside the range.
    pub fn conflicts_with(&self, other: &Edit) -> bool {
        match (self.is_insert(), other.is_insert()) {
            (true, true) => false,
            (true, false) => other.span.strictly_contains_point(self.span.start),
            (false, true) => self.span.strictly_contains_point(other.span.start),
            (false, false) => {
                self.span.overlaps(&other.span)
                    || (self.span.is_empty() && other.span.strictly_contains_point(self.span.start))
                    || (other.span.is_empty() && self.span.strictly_contains_point(other.span.start))
            }
        }
    }

    /// Ordering key: position, inserts before range edits at the same
    /// offset, then insertion order.
    fn order_key(&self) -> (u64, u8, u32) {
        (self.span.start, u8::from(!self.is_insert()), self.id)
    }
}

/// Sort edits in deterministic application order.
pub fn sort_edits(edits: &mut [Edit]) {
    edits.sort_by_key(Edit::order_key);
}

/// Detect conflicts among edits against a text of `text_len` bytes.
///
/// Returns every detected conflict. An empty list means the edits can be
/// applied together.
#[must_use]
pub fn detect_conflicts(text: &str, edits: &[Edit]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let text_len = text.len() as u64;

    for edit in edits {
        if edit.span.end > text_len {
            conflicts.push(Conflict::SpanOutOfBounds {
                edit: edit.id,
                span: edit.span,
                text_len,
            });
        } else if !text.is_char_boundary(edit.span.start as usize)
            || !text.is_char_boundary(edit.span.end as usize)
        {
            conflicts.push(Conflict::NotCharBoundary {
                edit: edit.id,
                span: edit.span,
            });
        }
    }

    for i in 0..edits.len() {
        for j in (i + 1)..edits.len() {
            if edits[i].conflicts_with(&edits[j]) {
                conflicts.push(Conflict::OverlappingSpans {
                    edit1: edits[i].id,
                    edit2: edits[j].id,
                    edit1_span: edits[i].span,
                    edit2_span: edits[j].span,
                });
            }
        }
    }

    conflicts
}

// ============================================================================
// Atomic Apply
// ============================================================================

/// Apply edits to `text` atomically.
///
/// Either every edit applies, or none do and the conflicts are returned.
/// Edits are applied in ascending position order, ties broken by insertion
/// order, with inserts ahead of a range edit starting at the same offset.
pub fn apply_edits(text: &str, edits: &[Edit]) -> Result<String, Vec<Conflict>> {
    let conflicts = detect_conflicts(text, edits);
    if !conflicts.is_empty() {
        return Err(conflicts);
    }

    let mut ordered: Vec<&Edit> = edits.iter().collect();
    ordered.sort_by_key(|e| e.order_key());

    let added: usize = ordered.iter().map(|e| e.text.len()).sum();
    let mut out = String::with_capacity(text.len() + added);
    let mut cursor = 0usize;

    for edit in ordered {
        let start = edit.span.start as usize;
        let end = edit.span.end as usize;
        out.push_str(&text[cursor..start]);
        match edit.kind {
            EditKind::Insert => {
                out.push_str(&edit.text);
                cursor = start;
            }
            EditKind::Delete => {
                cursor = end;
            }
            EditKind::Replace => {
                out.push_str(&edit.text);
                cursor = end;
            }
        }
    }
    out.push_str(&text[cursor..]);

    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

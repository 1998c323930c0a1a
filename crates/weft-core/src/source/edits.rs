//! Byte-span edits against the original text of a source unit.
//!
//! Every edit is addressed in original offsets, so the syntax tree never has
//! to be re-parsed between transformations. Replacing a span absorbs edits
//! nested strictly inside it; callers render the span first (with
//! [`EditSet::render_range`]) and fold the result into the replacement, which
//! is how call-site wrappers compose.

use std::ops::Range;

/// A single replacement of `start..end` with `text`. Insertions have
/// `start == end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
    seq: u64,
}

impl Edit {
    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Whether this edit lies inside `outer` and should be folded into it.
    /// Insertions sitting exactly on the outer boundary stay outside.
    fn nested_in(&self, outer: &Range<usize>) -> bool {
        if self.is_insertion() {
            return self.start > outer.start && self.start < outer.end;
        }
        self.start >= outer.start && self.end <= outer.end
    }

    fn overlaps(&self, other: &Range<usize>) -> bool {
        !self.is_insertion() && self.start < other.end && other.start < self.end
    }
}

/// Attempted edit that partially overlaps an existing one.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("edit {new_start}..{new_end} overlaps existing edit {existing_start}..{existing_end}")]
pub struct EditConflict {
    pub new_start: usize,
    pub new_end: usize,
    pub existing_start: usize,
    pub existing_end: usize,
}

/// Ordered, non-overlapping set of edits.
#[derive(Debug, Clone, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
    next_seq: u64,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edit> {
        self.edits.iter()
    }

    /// Insert `text` at `at`. Insertions at the same offset render in call
    /// order.
    pub fn insert(&mut self, at: usize, text: impl Into<String>) -> Result<(), EditConflict> {
        if let Some(existing) = self
            .edits
            .iter()
            .find(|e| !e.is_insertion() && e.start < at && at < e.end)
        {
            return Err(conflict(at..at, existing));
        }
        self.push(at, at, text.into());
        Ok(())
    }

    /// Replace `start..end` with `text`, dropping any edit nested inside the
    /// span.
    pub fn replace(
        &mut self,
        start: usize,
        end: usize,
        text: impl Into<String>,
    ) -> Result<(), EditConflict> {
        let span = start..end;
        if let Some(existing) = self
            .edits
            .iter()
            .find(|e| e.overlaps(&span) && !e.nested_in(&span))
        {
            return Err(conflict(span, existing));
        }
        self.edits.retain(|e| !e.nested_in(&span));
        self.push(start, end, text.into());
        Ok(())
    }

    /// Replace `start..end` with `wrap(current rendering of the span)`.
    pub fn wrap<F>(&mut self, source: &str, start: usize, end: usize, wrap: F) -> Result<(), EditConflict>
    where
        F: FnOnce(&str) -> String,
    {
        let inner = self.render_range(source, start, end);
        self.replace(start, end, wrap(&inner))
    }

    /// Render `source[start..end]` with the edits nested inside that span.
    pub fn render_range(&self, source: &str, start: usize, end: usize) -> String {
        let span = start..end;
        let mut out = String::with_capacity(end.saturating_sub(start));
        let mut cursor = start;
        for edit in self.edits.iter().filter(|e| e.nested_in(&span)) {
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..end]);
        out
    }

    /// Render the whole source with every edit applied.
    pub fn apply(&self, source: &str) -> String {
        let mut out = String::with_capacity(source.len() + 256);
        let mut cursor = 0;
        for edit in &self.edits {
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        out
    }

    fn push(&mut self, start: usize, end: usize, text: String) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.edits.push(Edit { start, end, text, seq });
        self.edits.sort_by_key(|e| (e.start, e.end, e.seq));
    }
}

fn conflict(new: Range<usize>, existing: &Edit) -> EditConflict {
    EditConflict {
        new_start: new.start,
        new_end: new.end,
        existing_start: existing.range().start,
        existing_end: existing.range().end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "a := f(g(x))";

    #[test]
    fn test_apply_without_edits_is_identity() {
        let edits = EditSet::new();
        assert_eq!(edits.apply(SRC), SRC);
    }

    #[test]
    fn test_insertions_keep_call_order() {
        let mut edits = EditSet::new();
        edits.insert(0, "1").unwrap();
        edits.insert(0, "2").unwrap();
        assert_eq!(edits.apply("x"), "12x");
    }

    #[test]
    fn test_wrap_absorbs_nested_edits() {
        let mut edits = EditSet::new();
        // g(x) is 7..11, f(g(x)) is 5..12
        edits.wrap(SRC, 7, 11, |inner| format!("w({inner})")).unwrap();
        edits.wrap(SRC, 5, 12, |inner| format!("v({inner})")).unwrap();
        assert_eq!(edits.apply(SRC), "a := v(f(w(g(x))))");
        assert_eq!(edits.len(), 1);
    }

    #[test]
    fn test_wrap_same_span_twice_nests() {
        let mut edits = EditSet::new();
        edits.wrap(SRC, 5, 12, |inner| format!("one({inner})")).unwrap();
        edits.wrap(SRC, 5, 12, |inner| format!("two({inner})")).unwrap();
        assert_eq!(edits.apply(SRC), "a := two(one(f(g(x))))");
    }

    #[test]
    fn test_boundary_insertion_is_not_absorbed() {
        let mut edits = EditSet::new();
        edits.insert(5, "/*pre*/").unwrap();
        edits.wrap(SRC, 5, 12, |inner| format!("w({inner})")).unwrap();
        assert_eq!(edits.apply(SRC), "a := /*pre*/w(f(g(x)))");
    }

    #[test]
    fn test_partial_overlap_is_a_conflict() {
        let mut edits = EditSet::new();
        edits.replace(0, 6, "b := ").unwrap();
        let err = edits.replace(5, 12, "y").unwrap_err();
        assert_eq!(err.existing_start, 0);
        assert_eq!(err.existing_end, 6);
    }

    #[test]
    fn test_insert_inside_replacement_is_a_conflict() {
        let mut edits = EditSet::new();
        edits.replace(5, 12, "y").unwrap();
        assert!(edits.insert(8, "z").is_err());
    }
}

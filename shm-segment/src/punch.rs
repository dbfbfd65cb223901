//! Return physical pages of a segment to the OS while keeping the mapping.
use core::ops::Range;

use crate::sys::{self, PunchHint};
use crate::Segment;

impl Segment {
    /// Hint that the payload bytes `offset..offset + len` are no longer needed.
    ///
    /// Only pages entirely inside the range are dropped, partial pages at either end are kept.
    /// The range is clamped to the payload, so the marker of a shared segment is never touched.
    /// Afterwards the contents of the dropped pages are unspecified, usually zero, but the
    /// mapping stays valid and contiguous for later writes.
    ///
    /// This is purely advisory and silently does nothing where the OS offers no suitable hint.
    pub fn punch(&self, offset: usize, len: usize) -> Option<PunchHint> {
        let base = self.memory.advisable_base()?;
        let range = aligned_range(offset, len, self.size, sys::page_size())?;

        // Safety: page aligned and within the payload of our live mapping.
        let hint = unsafe { sys::drop_pages(base.add(range.start), range.len()) };
        tracing::trace!(id = self.id, ?range, ?hint, "punched segment");
        hint
    }
}

/// The whole pages of `offset..offset + len`, clamped to `size`.
fn aligned_range(offset: usize, len: usize, size: usize, page: usize) -> Option<Range<usize>> {
    let mask = page - 1;
    let end = offset.saturating_add(len).min(size) & !mask;
    let start = offset.checked_add(mask)? & !mask;

    Some(start..end).filter(|range| !range.is_empty())
}

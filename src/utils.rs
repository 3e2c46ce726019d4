//! Size and alignment arithmetic shared by the rest of the allocator.

/// Rounds `size` up to the nearest multiple of `alignment`, or `None` when
/// the padded size cannot be represented in a `usize`.
///
/// `alignment` must be a power of two. We use this everywhere a size has to
/// land on a word boundary: adjusted block sizes and heap extension
/// requests. Both of those come straight from caller-supplied byte counts,
/// so the round-up must not wrap: a wrapped size would look like a tiny
/// valid block.
pub(crate) fn align(size: usize, alignment: usize) -> Option<usize> {
    Some(size.checked_add(alignment - 1)? & !(alignment - 1))
}

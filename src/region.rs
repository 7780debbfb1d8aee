//! Externally owned storage.
//!
//! An [`External`] strategy does not own memory. It carves blocks out of a
//! [`Region`] that belongs to another subsystem, which keeps the region
//! addressable under its own view and decides whether blocks may move. The
//! borrow of the region outlives every map built on top of it, so a map can
//! never outlive the owner's storage.

use alloc::alloc::Layout;
use alloc::alloc::handle_alloc_error;
use core::cell::Cell;
use core::fmt::Debug;
use core::ptr::NonNull;

use log::trace;

use crate::buffer::BufferStrategy;
use crate::error::BufferError;

/// A contiguous region managed by an external owner.
///
/// # Safety
///
/// Implementors must guarantee that a block returned by `allocate` is valid
/// for `layout.size()` bytes, aligned to `layout.align()`, disjoint from every
/// other live block, and stays valid until it is released. A successful
/// `resize_in_place` must keep the block at the same address and make it
/// valid for `new_size` bytes.
pub unsafe trait Region {
    /// Reserves a block for `layout` inside the region.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError>;

    /// Gives a block back to the region.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this region allocated with `layout`.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether the owner currently allows blocks to be resized.
    fn is_resizable(&self) -> bool;

    /// Attempts to grow or shrink a block without moving it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this region allocated with `old`.
    unsafe fn resize_in_place(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> bool {
        let _ = (ptr, old, new_size);
        false
    }
}

// SAFETY: Pure delegation to the referenced region.
unsafe impl<R: Region + ?Sized> Region for &R {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError> {
        (**self).allocate(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded contract.
        unsafe { (**self).release(ptr, layout) }
    }

    fn is_resizable(&self) -> bool {
        (**self).is_resizable()
    }

    unsafe fn resize_in_place(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> bool {
        // SAFETY: Forwarded contract.
        unsafe { (**self).resize_in_place(ptr, old, new_size) }
    }
}

/// A [`BufferStrategy`] backed by an external [`Region`].
///
/// Growth first tries to extend a block in place, then falls back to
/// allocating a new block in the region, copying the live prefix and
/// releasing the old block. Any resize is refused with
/// [`BufferError::NotResizable`] while the owner has frozen the region.
#[derive(Clone, Copy, Debug)]
pub struct External<R> {
    region: R,
}

impl<R: Region> External<R> {
    /// Wraps `region`.
    pub fn new(region: R) -> Self {
        External { region }
    }

    /// The wrapped region.
    pub fn region(&self) -> &R {
        &self.region
    }
}

// SAFETY: Blocks come from the region, which upholds the validity and
// disjointness requirements. Zeroed requests are zeroed here, and the copying
// resize path copies `preserve` bytes before releasing the old block.
unsafe impl<R: Region> BufferStrategy for External<R> {
    fn allocate(&self, layout: Layout, zeroed: bool) -> Result<NonNull<u8>, BufferError> {
        let ptr = self.region.allocate(layout)?;
        if zeroed {
            // SAFETY: The region guarantees the block is valid for `layout.size()`
            // bytes.
            unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };
        }
        Ok(ptr)
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
        preserve: usize,
    ) -> Result<NonNull<u8>, BufferError> {
        if !self.region.is_resizable() {
            return Err(BufferError::NotResizable);
        }

        // SAFETY: Caller guarantees `ptr` is a live block allocated with `old`.
        if unsafe { self.region.resize_in_place(ptr, old, new.size()) } {
            return Ok(ptr);
        }

        let fresh = self.region.allocate(new)?;
        // SAFETY: Both blocks are live, disjoint, and at least `preserve` bytes
        // long. The old block is released only after the copy.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), preserve);
            self.region.release(ptr, old);
        }
        Ok(fresh)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded contract.
        unsafe { self.region.release(ptr, layout) }
    }
}

const ARENA_ALIGN: usize = 64;

/// A fixed-size bump region.
///
/// The owner sizes the region once and hands out `&ArenaRegion` to maps via
/// [`External`]. Blocks are bump-allocated; releasing or resizing the most
/// recent block works in place, while space released further down is only
/// reclaimed by [`reset`](ArenaRegion::reset).
///
/// The owner can freeze the region with
/// [`set_resizable(false)`](ArenaRegion::set_resizable) while another view
/// depends on block addresses staying put.
pub struct ArenaRegion {
    base: NonNull<u8>,
    size: usize,
    top: Cell<usize>,
    live_blocks: Cell<usize>,
    resizable: Cell<bool>,
}

// SAFETY: The arena exclusively owns its block; the interior `Cell`s make it
// `!Sync`, which keeps all bookkeeping on one thread at a time.
unsafe impl Send for ArenaRegion {}

impl Debug for ArenaRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArenaRegion")
            .field("size", &self.size)
            .field("used", &self.top.get())
            .field("live_blocks", &self.live_blocks.get())
            .field("resizable", &self.resizable.get())
            .finish()
    }
}

impl Drop for ArenaRegion {
    fn drop(&mut self) {
        if self.size != 0 {
            // SAFETY: The block was allocated in `with_size` with this exact layout.
            unsafe {
                alloc::alloc::dealloc(
                    self.base.as_ptr(),
                    Layout::from_size_align_unchecked(self.size, ARENA_ALIGN),
                );
            }
        }
    }
}

impl ArenaRegion {
    /// Creates a region of `size` bytes, resizable until frozen.
    pub fn with_size(size: usize) -> Self {
        let base = if size == 0 {
            NonNull::dangling()
        } else {
            let layout =
                Layout::from_size_align(size, ARENA_ALIGN).expect("arena size overflow");
            // SAFETY: `layout` has a non-zero size.
            let raw = unsafe { alloc::alloc::alloc(layout) };
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => handle_alloc_error(layout),
            }
        };

        ArenaRegion {
            base,
            size,
            top: Cell::new(0),
            live_blocks: Cell::new(0),
            resizable: Cell::new(true),
        }
    }

    /// Total bytes in the region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes consumed so far, including padding and released-but-buried
    /// blocks.
    pub fn used(&self) -> usize {
        self.top.get()
    }

    /// Bytes left above the bump pointer.
    pub fn remaining(&self) -> usize {
        self.size - self.top.get()
    }

    /// Number of blocks handed out and not yet released.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.get()
    }

    /// Whether blocks may currently be resized.
    pub fn is_resizable(&self) -> bool {
        self.resizable.get()
    }

    /// Allows or forbids resizing blocks.
    pub fn set_resizable(&self, resizable: bool) {
        self.resizable.set(resizable);
    }

    /// Returns `true` if `ptr` points into the region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.size
    }

    /// Forgets every block and rewinds the region.
    ///
    /// Taking `&mut self` guarantees no map still borrows the region.
    pub fn reset(&mut self) {
        self.top.set(0);
        self.live_blocks.set(0);
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize - self.base.as_ptr() as usize
    }
}

// SAFETY: Blocks are disjoint sub-ranges of the owned allocation: each one
// starts at or above the bump pointer, is aligned with `align_offset`, and
// the bump pointer moves past it. Rewinding only happens for the topmost
// block, and in-place resizing only moves the bump pointer above it.
unsafe impl Region for ArenaRegion {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BufferError> {
        let top = self.top.get();
        let available = self.size - top;
        // SAFETY: `top <= size`, so the cursor is within or one past the block.
        let cursor = unsafe { self.base.as_ptr().add(top) };
        let padding = cursor.align_offset(layout.align());
        let requested = padding.saturating_add(layout.size());
        if requested > available {
            return Err(BufferError::RegionExhausted {
                requested,
                available,
            });
        }

        let start = top + padding;
        self.top.set(start + layout.size());
        self.live_blocks.set(self.live_blocks.get() + 1);
        trace!(
            "arena: allocated {} bytes at offset {start}, {} remaining",
            layout.size(),
            self.remaining()
        );
        // SAFETY: `start + layout.size() <= size`, so the pointer is in bounds and
        // derived from a non-null base.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let offset = self.offset_of(ptr);
        if offset + layout.size() == self.top.get() {
            self.top.set(offset);
        }
        self.live_blocks.set(self.live_blocks.get() - 1);
        trace!("arena: released {} bytes at offset {offset}", layout.size());
    }

    fn is_resizable(&self) -> bool {
        self.resizable.get()
    }

    unsafe fn resize_in_place(&self, ptr: NonNull<u8>, old: Layout, new_size: usize) -> bool {
        let offset = self.offset_of(ptr);
        if offset + old.size() != self.top.get() {
            return false;
        }
        match offset.checked_add(new_size) {
            Some(end) if end <= self.size => {
                self.top.set(end);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let arena = ArenaRegion::with_size(1024);
        let a = arena.allocate(Layout::from_size_align(3, 1).unwrap()).unwrap();
        let b = arena.allocate(Layout::from_size_align(16, 8).unwrap()).unwrap();
        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3);
        assert!(arena.contains(a.as_ptr()));
        assert!(arena.contains(b.as_ptr()));
        assert_eq!(arena.live_blocks(), 2);
    }

    #[test]
    fn exhaustion_is_reported() {
        let arena = ArenaRegion::with_size(32);
        arena
            .allocate(Layout::from_size_align(24, 8).unwrap())
            .unwrap();
        let err = arena
            .allocate(Layout::from_size_align(16, 8).unwrap())
            .unwrap_err();
        assert_eq!(
            err,
            BufferError::RegionExhausted {
                requested: 16,
                available: 8
            }
        );
    }

    #[test]
    fn releasing_the_top_block_rewinds() {
        let arena = ArenaRegion::with_size(256);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let _a = arena.allocate(layout).unwrap();
        let b = arena.allocate(layout).unwrap();
        assert_eq!(arena.used(), 128);
        // SAFETY: `b` is live and was allocated with `layout`.
        unsafe { arena.release(b, layout) };
        assert_eq!(arena.used(), 64);
        assert_eq!(arena.live_blocks(), 1);
    }

    #[test]
    fn top_block_grows_in_place() {
        let arena = ArenaRegion::with_size(256);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let a = arena.allocate(layout).unwrap();
        // SAFETY: `a` is live and was allocated with `layout`.
        unsafe {
            assert!(arena.resize_in_place(a, layout, 128));
            assert!(!arena.resize_in_place(a, Layout::from_size_align(128, 8).unwrap(), 512));
        }
        assert_eq!(arena.used(), 128);
    }

    #[test]
    fn external_zeroes_and_copies() {
        let arena = ArenaRegion::with_size(512);
        let strategy = External::new(&arena);
        let small = Layout::from_size_align(16, 8).unwrap();
        let big = Layout::from_size_align(64, 8).unwrap();

        let first = strategy.allocate(small, true).unwrap();
        // SAFETY: `first` is valid for 16 bytes.
        unsafe {
            assert!(core::slice::from_raw_parts(first.as_ptr(), 16)
                .iter()
                .all(|&b| b == 0));
            core::ptr::write_bytes(first.as_ptr(), 0x42, 16);
        }
        // Bury `first` so it cannot grow in place.
        let _blocker = strategy.allocate(small, false).unwrap();

        // SAFETY: `first` is live and was allocated with `small`.
        let moved = unsafe { strategy.resize(first, small, big, 16).unwrap() };
        assert_ne!(moved, first);
        // SAFETY: `moved` is valid for 64 bytes with 16 preserved.
        unsafe {
            assert!(core::slice::from_raw_parts(moved.as_ptr(), 16)
                .iter()
                .all(|&b| b == 0x42));
        }
        assert_eq!(arena.live_blocks(), 2);
    }

    #[test]
    fn frozen_region_refuses_resize() {
        let arena = ArenaRegion::with_size(128);
        let strategy = External::new(&arena);
        let layout = Layout::from_size_align(16, 8).unwrap();
        let block = strategy.allocate(layout, false).unwrap();

        arena.set_resizable(false);
        // SAFETY: `block` is live and was allocated with `layout`.
        let err = unsafe {
            strategy
                .resize(block, layout, Layout::from_size_align(32, 8).unwrap(), 16)
                .unwrap_err()
        };
        assert_eq!(err, BufferError::NotResizable);
        assert_eq!(arena.used(), 16);
    }

    #[test]
    fn reset_rewinds_everything() {
        let mut arena = ArenaRegion::with_size(64);
        arena
            .allocate(Layout::from_size_align(40, 8).unwrap())
            .unwrap();
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.live_blocks(), 0);
        assert_eq!(arena.remaining(), 64);
    }
}

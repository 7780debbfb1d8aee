//! Storage strategies for the dense arrays and the bucket table.
//!
//! A [`BufferStrategy`] hands out raw, contiguous blocks. The map never talks
//! to a strategy directly; it goes through [`DenseBuffer`], which tracks the
//! element capacity of one block and implements the alloc / resize / clear /
//! fast-clear / dispose life cycle on top of the strategy.
//!
//! Two strategies ship with the crate: [`Heap`], which owns its blocks
//! outright, and [`External`](crate::region::External), which carves blocks
//! out of a region owned by someone else.

use alloc::alloc::Layout;
use alloc::alloc::handle_alloc_error;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::BufferError;

/// A source of contiguous memory blocks.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - a block returned by `allocate` or `resize` is valid for reads and writes
///   of `layout.size()` bytes, is aligned to `layout.align()`, and does not
///   overlap any other live block;
/// - `allocate(layout, true)` returns zeroed memory;
/// - `resize` preserves the first `preserve` bytes of the block;
/// - a block stays valid until it is passed to `resize` or `release`.
pub unsafe trait BufferStrategy {
    /// Allocates a block for `layout`. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout, zeroed: bool) -> Result<NonNull<u8>, BufferError>;

    /// Moves `ptr` into a block described by `new`, keeping the first
    /// `preserve` bytes. On error the old block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this strategy allocated with `old`,
    /// `new.size()` must be non-zero, `new.align() == old.align()`, and
    /// `preserve` must not exceed either size.
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
        preserve: usize,
    ) -> Result<NonNull<u8>, BufferError>;

    /// Returns a block to the strategy.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this strategy allocated with `layout`.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Exclusively owned blocks from the global allocator.
///
/// Allocation failure is fatal: it is routed to
/// [`handle_alloc_error`] rather than reported as a [`BufferError`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heap;

// SAFETY: Every block comes straight from the global allocator with the
// requested layout, `alloc_zeroed` is used for zeroed requests, and `realloc`
// preserves the whole common prefix of the old and new block.
unsafe impl BufferStrategy for Heap {
    fn allocate(&self, layout: Layout, zeroed: bool) -> Result<NonNull<u8>, BufferError> {
        debug_assert!(layout.size() != 0);
        // SAFETY: The trait contract guarantees a non-zero layout size.
        let raw = unsafe {
            if zeroed {
                alloc::alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc::alloc(layout)
            }
        };
        match NonNull::new(raw) {
            Some(ptr) => Ok(ptr),
            None => handle_alloc_error(layout),
        }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
        preserve: usize,
    ) -> Result<NonNull<u8>, BufferError> {
        debug_assert_eq!(old.align(), new.align());
        debug_assert!(preserve <= old.size() && preserve <= new.size());
        // SAFETY: Caller guarantees `ptr` was allocated here with `old` and that
        // `new.size()` is non-zero.
        let raw = unsafe { alloc::alloc::realloc(ptr.as_ptr(), old, new.size()) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(ptr),
            None => handle_alloc_error(new),
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr` was allocated here with `layout`.
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// One contiguous block of `T` slots obtained from a [`BufferStrategy`].
///
/// The buffer does not know which slots hold live values; the owning table
/// tracks that through its entry count. It therefore never drops elements and
/// never releases its block on its own: the owner must call
/// [`dispose`](DenseBuffer::dispose) with the strategy it allocated from.
pub(crate) struct DenseBuffer<T> {
    ptr: NonNull<T>,
    capacity: usize,
    _marker: PhantomData<T>,
}

// SAFETY: The buffer is a plain owner of `T` slots; moving it between threads
// moves the slots with it.
unsafe impl<T: Send> Send for DenseBuffer<T> {}
// SAFETY: Shared access only hands out `&T`.
unsafe impl<T: Sync> Sync for DenseBuffer<T> {}

impl<T> Debug for DenseBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DenseBuffer")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> DenseBuffer<T> {
    /// A buffer without a block.
    pub(crate) const fn new() -> Self {
        DenseBuffer {
            ptr: NonNull::dangling(),
            capacity: 0,
            _marker: PhantomData,
        }
    }

    fn layout(capacity: usize) -> Result<Layout, BufferError> {
        Layout::array::<T>(capacity).map_err(|_| BufferError::CapacityOverflow)
    }

    /// Allocates room for `capacity` elements. Bucket tables ask for
    /// `zeroed` storage, dense arrays do not.
    pub(crate) fn alloc<B: BufferStrategy>(
        strategy: &B,
        capacity: usize,
        zeroed: bool,
    ) -> Result<Self, BufferError> {
        let layout = Self::layout(capacity)?;
        if layout.size() == 0 {
            return Ok(DenseBuffer {
                ptr: NonNull::dangling(),
                capacity,
                _marker: PhantomData,
            });
        }

        let ptr = strategy.allocate(layout, zeroed)?;
        Ok(DenseBuffer {
            ptr: ptr.cast(),
            capacity,
            _marker: PhantomData,
        })
    }

    /// Grows or shrinks the block to `new_capacity`, keeping the first `live`
    /// elements in place. Shrinking below `live` is a caller bug.
    ///
    /// Pass `live = 0` when the old contents need not be kept; the strategy is
    /// then told to preserve nothing and may skip the copy.
    ///
    /// On error the buffer is unchanged.
    pub(crate) fn resize<B: BufferStrategy>(
        &mut self,
        strategy: &B,
        new_capacity: usize,
        live: usize,
    ) -> Result<(), BufferError> {
        debug_assert!(live <= new_capacity && live <= self.capacity);
        if new_capacity == self.capacity {
            return Ok(());
        }

        let new_layout = Self::layout(new_capacity)?;
        let old_layout = Self::layout(self.capacity)?;

        if old_layout.size() == 0 {
            if new_layout.size() == 0 {
                self.capacity = new_capacity;
            } else {
                *self = Self::alloc(strategy, new_capacity, false)?;
            }
            return Ok(());
        }

        if new_layout.size() == 0 {
            // SAFETY: The block is live and was allocated with `old_layout`.
            unsafe { strategy.release(self.ptr.cast(), old_layout) };
            *self = Self::new();
            return Ok(());
        }

        // SAFETY: The block is live and was allocated with `old_layout`; both
        // layouts come from `Layout::array::<T>` so their alignment matches, and
        // `live <= min(old, new)` elements are preserved.
        let ptr = unsafe {
            strategy.resize(
                self.ptr.cast(),
                old_layout,
                new_layout,
                live * core::mem::size_of::<T>(),
            )?
        };
        self.ptr = ptr.cast();
        self.capacity = new_capacity;
        Ok(())
    }

    /// Zeroes every slot in place without reallocating.
    ///
    /// Only meaningful for element types where all-zero bytes are a valid
    /// value (bucket links); the owner must already have dropped anything
    /// live.
    pub(crate) fn clear(&mut self) {
        // SAFETY: The block is valid for `capacity` elements.
        unsafe { core::ptr::write_bytes(self.ptr.as_ptr(), 0, self.capacity) }
    }

    /// Logically discards the contents without touching them.
    ///
    /// Validity of dense slots is governed by the owner's count, so the block
    /// is left byte-for-byte as it was. External regions may be read by other
    /// subsystems, so this never writes.
    #[inline(always)]
    pub(crate) fn fast_clear(&mut self) {}

    /// Releases the block. Calling it again is a no-op.
    ///
    /// # Safety
    ///
    /// `strategy` must be the strategy the block was allocated from, and the
    /// owner must already have dropped any live elements.
    pub(crate) unsafe fn dispose<B: BufferStrategy>(&mut self, strategy: &B) {
        if let Ok(layout) = Self::layout(self.capacity)
            && layout.size() != 0
        {
            // SAFETY: Caller guarantees the block came from `strategy`, and it was
            // allocated with this layout.
            unsafe { strategy.release(self.ptr.cast(), layout) };
        }
        *self = Self::new();
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// # Safety
    ///
    /// `index < capacity` and the slot must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(index < self.capacity);
        // SAFETY: Caller guarantees `index` is in bounds and initialized.
        unsafe { &*self.ptr.as_ptr().add(index) }
    }

    /// # Safety
    ///
    /// `index < capacity` and the slot must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < self.capacity);
        // SAFETY: Caller guarantees `index` is in bounds and initialized.
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }

    /// Writes `value` into a slot without dropping what was there.
    ///
    /// # Safety
    ///
    /// `index < capacity`.
    #[inline(always)]
    pub(crate) unsafe fn write(&mut self, index: usize, value: T) {
        debug_assert!(index < self.capacity);
        // SAFETY: Caller guarantees `index` is in bounds.
        unsafe { self.ptr.as_ptr().add(index).write(value) }
    }

    /// Moves the value out of a slot, leaving it logically uninitialized.
    ///
    /// # Safety
    ///
    /// `index < capacity` and the slot must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn read(&self, index: usize) -> T {
        debug_assert!(index < self.capacity);
        // SAFETY: Caller guarantees `index` is in bounds and initialized.
        unsafe { self.ptr.as_ptr().add(index).read() }
    }

    /// Moves the element at `src` into `dst` bitwise. `src` becomes logically
    /// uninitialized; whatever was at `dst` is overwritten without a drop.
    ///
    /// # Safety
    ///
    /// Both indices are `< capacity`, distinct, and `src` is initialized.
    #[inline(always)]
    pub(crate) unsafe fn relocate(&mut self, src: usize, dst: usize) {
        debug_assert!(src < self.capacity && dst < self.capacity && src != dst);
        // SAFETY: Caller guarantees both slots are in bounds and distinct.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(src),
                self.ptr.as_ptr().add(dst),
                1,
            )
        }
    }

    /// # Safety
    ///
    /// The first `len` slots must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn as_slice(&self, len: usize) -> &[T] {
        debug_assert!(len <= self.capacity);
        // SAFETY: Caller guarantees the prefix is initialized.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), len) }
    }

    /// # Safety
    ///
    /// The first `len` slots must be initialized.
    #[inline(always)]
    pub(crate) unsafe fn as_mut_slice(&mut self, len: usize) -> &mut [T] {
        debug_assert!(len <= self.capacity);
        // SAFETY: Caller guarantees the prefix is initialized.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), len) }
    }

    /// Drops the first `len` elements in place.
    ///
    /// # Safety
    ///
    /// The first `len` slots must be initialized; they are uninitialized
    /// afterwards.
    pub(crate) unsafe fn drop_prefix(&mut self, len: usize) {
        if core::mem::needs_drop::<T>() {
            // SAFETY: Caller guarantees the prefix is initialized.
            unsafe { core::ptr::drop_in_place(self.as_mut_slice(len)) }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct CountingHeap {
        allocs: Cell<usize>,
        resizes: Cell<usize>,
        preserved: Cell<usize>,
        releases: Cell<usize>,
    }

    // SAFETY: Forwards every call to `Heap`.
    unsafe impl BufferStrategy for CountingHeap {
        fn allocate(&self, layout: Layout, zeroed: bool) -> Result<NonNull<u8>, BufferError> {
            self.allocs.set(self.allocs.get() + 1);
            Heap.allocate(layout, zeroed)
        }

        unsafe fn resize(
            &self,
            ptr: NonNull<u8>,
            old: Layout,
            new: Layout,
            preserve: usize,
        ) -> Result<NonNull<u8>, BufferError> {
            self.resizes.set(self.resizes.get() + 1);
            self.preserved.set(preserve);
            // SAFETY: Forwarded contract.
            unsafe { Heap.resize(ptr, old, new, preserve) }
        }

        unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
            self.releases.set(self.releases.get() + 1);
            // SAFETY: Forwarded contract.
            unsafe { Heap.release(ptr, layout) }
        }
    }

    #[test]
    fn zeroed_alloc_reads_as_empty_links() {
        let strategy = CountingHeap::default();
        let mut buckets = DenseBuffer::<u32>::alloc(&strategy, 17, true).unwrap();
        // SAFETY: Zeroed u32 slots are initialized.
        unsafe {
            assert!(buckets.as_slice(17).iter().all(|&b| b == 0));
            buckets.dispose(&strategy);
        }
        assert_eq!(strategy.allocs.get(), 1);
        assert_eq!(strategy.releases.get(), 1);
    }

    #[test]
    fn resize_preserves_live_prefix() {
        let strategy = CountingHeap::default();
        let mut buffer = DenseBuffer::<u64>::alloc(&strategy, 4, false).unwrap();
        // SAFETY: All indices are below capacity and written before being read.
        unsafe {
            for i in 0..4 {
                buffer.write(i, i as u64 * 10);
            }
            buffer.resize(&strategy, 64, 4).unwrap();
            assert_eq!(buffer.capacity(), 64);
            assert_eq!(buffer.as_slice(4), &[0, 10, 20, 30]);

            buffer.resize(&strategy, 2, 2).unwrap();
            assert_eq!(buffer.as_slice(2), &[0, 10]);
            buffer.dispose(&strategy);
        }
        assert_eq!(strategy.resizes.get(), 2);
    }

    #[test]
    fn resize_without_live_prefix_preserves_nothing() {
        let strategy = CountingHeap::default();
        let mut buffer = DenseBuffer::<u64>::alloc(&strategy, 4, false).unwrap();
        buffer.resize(&strategy, 32, 0).unwrap();
        assert_eq!(strategy.preserved.get(), 0);

        // SAFETY: Indices are below capacity and written before being read.
        unsafe {
            buffer.write(0, 1);
            buffer.write(1, 2);
            buffer.resize(&strategy, 64, 2).unwrap();
            assert_eq!(strategy.preserved.get(), 2 * core::mem::size_of::<u64>());
            assert_eq!(buffer.as_slice(2), &[1, 2]);
            buffer.dispose(&strategy);
        }
    }

    #[test]
    fn fast_clear_leaves_bytes_untouched() {
        let mut buffer = DenseBuffer::<u32>::alloc(&Heap, 4, false).unwrap();
        // SAFETY: Every slot is written before the slice is read.
        unsafe {
            for i in 0..4 {
                buffer.write(i, i as u32 + 1);
            }
            buffer.fast_clear();
            assert_eq!(buffer.as_slice(4), &[1, 2, 3, 4]);
            buffer.dispose(&Heap);
        }
    }

    #[test]
    fn resize_from_and_to_empty() {
        let strategy = CountingHeap::default();
        let mut buffer = DenseBuffer::<u32>::new();
        buffer.resize(&strategy, 8, 0).unwrap();
        assert_eq!(strategy.allocs.get(), 1);
        buffer.resize(&strategy, 0, 0).unwrap();
        assert_eq!(strategy.releases.get(), 1);
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn clear_zeroes_in_place() {
        let mut buffer = DenseBuffer::<u32>::alloc(&Heap, 5, false).unwrap();
        // SAFETY: Every slot is written before the slice is read.
        unsafe {
            for i in 0..5 {
                buffer.write(i, 7);
            }
            buffer.clear();
            assert_eq!(buffer.as_slice(5), &[0; 5]);
            buffer.dispose(&Heap);
        }
    }

    #[test]
    fn dispose_releases_once() {
        let strategy = CountingHeap::default();
        let mut buffer = DenseBuffer::<u8>::alloc(&strategy, 3, false).unwrap();
        // SAFETY: Nothing live in the buffer.
        unsafe {
            buffer.dispose(&strategy);
            buffer.dispose(&strategy);
        }
        assert_eq!(strategy.releases.get(), 1);
    }

    #[test]
    fn zero_sized_elements_never_touch_the_strategy() {
        let strategy = CountingHeap::default();
        let mut buffer = DenseBuffer::<()>::alloc(&strategy, 100, false).unwrap();
        buffer.resize(&strategy, 1000, 100).unwrap();
        assert_eq!(buffer.capacity(), 1000);
        // SAFETY: Zero-sized slots hold nothing.
        unsafe { buffer.dispose(&strategy) };
        assert_eq!(strategy.allocs.get(), 0);
        assert_eq!(strategy.releases.get(), 0);
    }
}

//! A hash table whose entries live in dense, gap-free arrays.
//!
//! `DenseTable` keeps three buffers:
//!
//! - a node array of `(key, hash, previous)` triples,
//! - a value array parallel to it, so values can be handed out as a plain
//!   slice,
//! - a prime-sized bucket table holding `index + 1` of the newest node in each
//!   bucket (`0` means empty).
//!
//! Nodes that land in the same bucket form a backward chain through their
//! `previous` field. Chain links use the same `index + 1` encoding as the
//! bucket table, so the end-of-chain sentinel (`u32::MAX`) wraps to `0` and a
//! single loop walks from a bucket head to the end of its chain.
//!
//! Removal unlinks the node and then moves the last entry into the hole, so
//! the live entries always occupy `0..len`. The moved entry's *own* chain is
//! repaired to point at its new slot.
//!
//! The table does not hash anything itself: callers pass a 32-bit hash and an
//! equality predicate. [`DenseMap`](crate::DenseMap) layers a `BuildHasher`
//! on top.

use core::fmt::Debug;

use log::debug;
use log::trace;

use crate::buffer::BufferStrategy;
use crate::buffer::DenseBuffer;
use crate::buffer::Heap;
use crate::capacity;
use crate::capacity::TableSize;
use crate::error::BufferError;

/// End-of-chain marker stored in `Node::previous`.
const NO_PREVIOUS: u32 = u32::MAX;

struct Node<K> {
    key: K,
    hash: u32,
    previous: u32,
}

/// Where a node sits in its chain, as found by `locate`.
struct Located {
    bucket: usize,
    index: usize,
    /// The node whose `previous` points at `index`, or `None` when the bucket
    /// head does.
    follower: Option<usize>,
}

#[cold]
#[inline(never)]
fn growth_failed(err: BufferError) -> ! {
    panic!("dense table growth failed: {err}")
}

/// Debug statistics for bucket and chain analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live entries
    pub len: usize,
    /// Slots available in the dense arrays
    pub dense_capacity: usize,
    /// Length of the bucket table
    pub bucket_count: usize,
    /// Buckets heading a non-empty chain
    pub occupied_buckets: usize,
    /// Length of the longest chain
    pub longest_chain: usize,
    /// Collisions recorded since the bucket table was last rebuilt
    pub collisions: usize,
    /// Entries per bucket (len / bucket_count)
    pub load_factor: f64,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Dense Table Debug Statistics ===");
        println!(
            "Entries: {}/{} dense slots",
            self.len, self.dense_capacity
        );
        println!(
            "Buckets: {}/{} occupied ({:.2} entries per bucket)",
            self.occupied_buckets, self.bucket_count, self.load_factor
        );
        println!("Longest chain: {}", self.longest_chain);
        println!("Collisions since rebuild: {}", self.collisions);
    }
}

/// A hash table storing `(K, V)` entries contiguously in insertion slots.
///
/// All lookups take a caller-computed 32-bit hash and an equality predicate
/// for the key. A node matches only if its cached hash equals the probe hash
/// *and* the predicate accepts its key.
///
/// ## Example
///
/// ```rust
/// use dense_map::dense_table::DenseTable;
/// use dense_map::dense_table::Entry;
///
/// let mut table: DenseTable<&str, u32> = DenseTable::new();
/// let hash = 0xBEEF;
///
/// match table.entry(hash, |k| *k == "answer") {
///     Entry::Vacant(entry) => {
///         entry.insert("answer", 42);
///     }
///     Entry::Occupied(_) => unreachable!(),
/// }
///
/// let index = table.find(hash, |k| *k == "answer").unwrap();
/// assert_eq!(table.values()[index], 42);
/// ```
pub struct DenseTable<K, V, B: BufferStrategy = Heap> {
    nodes: DenseBuffer<Node<K>>,
    values: DenseBuffer<V>,
    buckets: DenseBuffer<u32>,
    table_size: TableSize,
    count: usize,
    collisions: usize,
    strategy: B,
}

impl<K, V, B> Debug for DenseTable<K, V, B>
where
    K: Debug,
    V: Debug,
    B: BufferStrategy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DenseTable")
            .field("len", &self.count)
            .field("capacity", &self.capacity())
            .field("bucket_count", &self.table_size.len())
            .field("collisions", &self.collisions)
            .field("buckets", &self.bucket_links())
            .field("entries", &DebugEntries(self))
            .finish()
    }
}

struct DebugEntries<'a, K, V, B: BufferStrategy>(&'a DenseTable<K, V, B>);

impl<K: Debug, V: Debug, B: BufferStrategy> Debug for DebugEntries<'_, K, V, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for index in 0..self.0.count {
            // SAFETY: `index < count`, so the node and value are initialized.
            let (node, value) = unsafe {
                (
                    self.0.nodes.get_unchecked(index),
                    self.0.values.get_unchecked(index),
                )
            };
            if node.previous == NO_PREVIOUS {
                list.entry(&(index, &node.key, value, node.hash, "-"));
            } else {
                list.entry(&(index, &node.key, value, node.hash, node.previous));
            }
        }
        list.finish()
    }
}

impl<K, V, B> Clone for DenseTable<K, V, B>
where
    K: Clone,
    V: Clone,
    B: BufferStrategy + Clone,
{
    fn clone(&self) -> Self {
        let strategy = self.strategy.clone();
        let capacity = self.capacity();
        let mut new_table = DenseTable {
            nodes: DenseBuffer::alloc(&strategy, capacity, false)
                .unwrap_or_else(|err| growth_failed(err)),
            values: DenseBuffer::alloc(&strategy, capacity, false)
                .unwrap_or_else(|err| growth_failed(err)),
            buckets: DenseBuffer::alloc(&strategy, self.table_size.len(), false)
                .unwrap_or_else(|err| growth_failed(err)),
            table_size: self.table_size,
            count: 0,
            collisions: self.collisions,
            strategy,
        };

        // SAFETY: Every index below `self.count` is initialized in `self` and in
        // bounds for the new buffers, which share `self`'s capacity. The new
        // count only advances once both slots at an index are written, so a
        // panicking `clone` leaves the new table droppable.
        unsafe {
            for index in 0..self.count {
                let node = self.nodes.get_unchecked(index);
                let value = self.values.get_unchecked(index).clone();
                new_table.nodes.write(
                    index,
                    Node {
                        key: node.key.clone(),
                        hash: node.hash,
                        previous: node.previous,
                    },
                );
                new_table.values.write(index, value);
                new_table.count += 1;
            }

            for bucket in 0..self.table_size.len() {
                new_table
                    .buckets
                    .write(bucket, *self.buckets.get_unchecked(bucket));
            }
        }

        new_table
    }
}

impl<K, V, B: BufferStrategy> Drop for DenseTable<K, V, B> {
    fn drop(&mut self) {
        let count = core::mem::replace(&mut self.count, 0);
        // SAFETY: The first `count` slots of both dense arrays are initialized.
        // Every buffer was allocated from `self.strategy`.
        unsafe {
            self.nodes.drop_prefix(count);
            self.values.drop_prefix(count);
            self.nodes.dispose(&self.strategy);
            self.values.dispose(&self.strategy);
            self.buckets.dispose(&self.strategy);
        }
    }
}

impl<K, V> DenseTable<K, V, Heap> {
    /// Creates an empty table. Nothing is allocated until the first insert.
    pub fn new() -> Self {
        Self::new_in(Heap)
    }

    /// Creates a table whose dense arrays hold `capacity` entries without
    /// reallocating.
    ///
    /// ```rust
    /// # use dense_map::dense_table::DenseTable;
    /// let table: DenseTable<u64, u64> = DenseTable::with_capacity(100);
    /// assert!(table.capacity() >= 100);
    /// assert!(table.bucket_count() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, Heap)
    }
}

impl<K, V> Default for DenseTable<K, V, Heap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, B: BufferStrategy> DenseTable<K, V, B> {
    /// Creates an empty table drawing storage from `strategy`.
    pub fn new_in(strategy: B) -> Self {
        DenseTable {
            nodes: DenseBuffer::new(),
            values: DenseBuffer::new(),
            buckets: DenseBuffer::new(),
            table_size: TableSize::EMPTY,
            count: 0,
            collisions: 0,
            strategy,
        }
    }

    /// Creates a table with room for `capacity` entries drawn from `strategy`.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage. Use
    /// [`try_with_capacity_in`](Self::try_with_capacity_in) to handle that.
    pub fn with_capacity_in(capacity: usize, strategy: B) -> Self {
        Self::try_with_capacity_in(capacity, strategy).unwrap_or_else(|err| growth_failed(err))
    }

    /// Creates a table with room for `capacity` entries drawn from
    /// `strategy`, reporting storage failures.
    pub fn try_with_capacity_in(capacity: usize, strategy: B) -> Result<Self, BufferError> {
        let mut table = Self::new_in(strategy);
        if capacity != 0 {
            table.resize_dense(capacity)?;
            table.init_buckets()?;
        }
        Ok(table)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns how many entries fit in the dense arrays before they grow.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity().min(self.values.capacity())
    }

    /// Returns the length of the bucket table.
    pub fn bucket_count(&self) -> usize {
        self.table_size.len()
    }

    /// Returns the number of collisions recorded since the bucket table was
    /// last rebuilt.
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    /// The strategy this table draws its storage from.
    pub fn strategy(&self) -> &B {
        &self.strategy
    }

    /// Returns the live values as a dense slice. Index `i` belongs to the key
    /// at [`key_at(i)`](Self::key_at).
    pub fn values(&self) -> &[V] {
        // SAFETY: The first `count` values are initialized.
        unsafe { self.values.as_slice(self.count) }
    }

    /// Returns the live values as a mutable dense slice.
    pub fn values_mut(&mut self) -> &mut [V] {
        // SAFETY: The first `count` values are initialized.
        unsafe { self.values.as_mut_slice(self.count) }
    }

    /// Returns the key stored at dense `index`.
    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.nodes().get(index).map(|node| &node.key)
    }

    /// Returns the key and value stored at dense `index`.
    pub fn get(&self, index: usize) -> Option<(&K, &V)> {
        let node = self.nodes().get(index)?;
        Some((&node.key, &self.values()[index]))
    }

    /// Returns the key and a mutable value stored at dense `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<(&K, &mut V)> {
        if index >= self.count {
            return None;
        }
        // SAFETY: `index < count`; nodes and values are separate buffers, so the
        // two references do not alias.
        unsafe {
            Some((
                &self.nodes.get_unchecked(index).key,
                self.values.get_unchecked_mut(index),
            ))
        }
    }

    fn nodes(&self) -> &[Node<K>] {
        // SAFETY: The first `count` nodes are initialized.
        unsafe { self.nodes.as_slice(self.count) }
    }

    fn bucket_links(&self) -> &[u32] {
        // SAFETY: The bucket table is fully initialized from allocation on.
        unsafe { self.buckets.as_slice(self.table_size.len()) }
    }

    /// Finds the dense index of the entry matching `hash` and `eq`.
    ///
    /// Walks the bucket's chain from the newest node backwards. Never mutates
    /// the table.
    #[inline]
    pub fn find(&self, hash: u32, eq: impl Fn(&K) -> bool) -> Option<usize> {
        if self.count == 0 {
            return None;
        }

        let bucket = self.table_size.reduce(hash);
        // SAFETY: `reduce` returns an index below the bucket table length.
        let mut link = unsafe { *self.buckets.get_unchecked(bucket) };
        while link != 0 {
            let index = (link - 1) as usize;
            // SAFETY: Chain links only ever point at live nodes.
            let node = unsafe { self.nodes.get_unchecked(index) };
            if node.hash == hash && eq(&node.key) {
                return Some(index);
            }
            link = node.previous.wrapping_add(1);
        }

        None
    }

    fn locate(&self, hash: u32, eq: impl Fn(&K) -> bool) -> Option<Located> {
        if self.count == 0 {
            return None;
        }

        let bucket = self.table_size.reduce(hash);
        let mut follower = None;
        // SAFETY: `reduce` returns an index below the bucket table length.
        let mut link = unsafe { *self.buckets.get_unchecked(bucket) };
        while link != 0 {
            let index = (link - 1) as usize;
            // SAFETY: Chain links only ever point at live nodes.
            let node = unsafe { self.nodes.get_unchecked(index) };
            if node.hash == hash && eq(&node.key) {
                return Some(Located {
                    bucket,
                    index,
                    follower,
                });
            }
            follower = Some(index);
            link = node.previous.wrapping_add(1);
        }

        None
    }

    /// Locates a node by its dense index rather than by key.
    fn locate_index(&self, index: usize) -> Located {
        debug_assert!(index < self.count);
        // SAFETY: `index < count`.
        let hash = unsafe { self.nodes.get_unchecked(index).hash };
        let bucket = self.table_size.reduce(hash);
        let mut follower = None;
        // SAFETY: `reduce` returns an in-bounds bucket, and every live node is
        // reachable from its bucket's head, so the walk ends at `index`.
        unsafe {
            let mut current = (*self.buckets.get_unchecked(bucket) - 1) as usize;
            while current != index {
                follower = Some(current);
                current = self.nodes.get_unchecked(current).previous as usize;
            }
        }
        Located {
            bucket,
            index,
            follower,
        }
    }

    /// Gets the entry for `hash` and `eq` for in-place manipulation.
    pub fn entry(&mut self, hash: u32, eq: impl Fn(&K) -> bool) -> Entry<'_, K, V, B> {
        match self.find(hash, eq) {
            Some(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            None => Entry::Vacant(VacantEntry { table: self, hash }),
        }
    }

    /// Appends a new entry and links it at the head of its bucket's chain.
    ///
    /// The caller guarantees no live entry matches `key`.
    fn push(&mut self, hash: u32, key: K, value: V) -> usize {
        self.try_push(hash, key, value)
            .unwrap_or_else(|err| growth_failed(err))
    }

    /// Fallible form of [`push`](Self::push).
    ///
    /// All storage is acquired before anything is written, so on error `key`
    /// and `value` are dropped and the table's contents are unchanged.
    fn try_push(&mut self, hash: u32, key: K, value: V) -> Result<usize, BufferError> {
        self.reserve_slot()?;
        Ok(self.push_unchecked(hash, key, value))
    }

    fn reserve_slot(&mut self) -> Result<(), BufferError> {
        if self.count == self.capacity() {
            self.grow_dense()?;
        }
        if self.table_size.is_empty() {
            self.init_buckets()?;
        }
        Ok(())
    }

    /// Links and writes the entry. Requires `count < capacity` and a bucket
    /// table.
    fn push_unchecked(&mut self, hash: u32, key: K, value: V) -> usize {
        debug_assert!(self.count < self.capacity());
        debug_assert!(!self.table_size.is_empty());

        let index = self.count;
        let bucket = self.table_size.reduce(hash);
        // SAFETY: `index < capacity` after growth, and `bucket` is in bounds.
        unsafe {
            let head = *self.buckets.get_unchecked(bucket);
            let previous = if head == 0 {
                NO_PREVIOUS
            } else {
                self.collisions += 1;
                head - 1
            };
            self.nodes.write(
                index,
                Node {
                    key,
                    hash,
                    previous,
                },
            );
            self.values.write(index, value);
            *self.buckets.get_unchecked_mut(bucket) = index as u32 + 1;
        }
        self.count += 1;

        if self.collisions > self.table_size.len() {
            self.rebuild_for_collisions();
        }

        index
    }

    #[cold]
    #[inline(never)]
    fn grow_dense(&mut self) -> Result<(), BufferError> {
        let new_capacity = capacity::next_table_size(self.count);
        if new_capacity <= self.count {
            return Err(BufferError::CapacityOverflow);
        }
        debug!(
            "dense table: growing dense arrays {} -> {new_capacity}",
            self.capacity()
        );
        self.resize_dense(new_capacity)
    }

    /// Resizes both dense arrays to exactly `new_capacity`.
    ///
    /// If the value array fails after the node array succeeded, the node
    /// array is merely larger than needed; `capacity` reports the smaller of
    /// the two, so the table is unchanged from the caller's point of view.
    fn resize_dense(&mut self, new_capacity: usize) -> Result<(), BufferError> {
        if new_capacity > capacity::MAX_TABLE_SIZE {
            return Err(BufferError::CapacityOverflow);
        }
        self.nodes
            .resize(&self.strategy, new_capacity, self.count)?;
        self.values
            .resize(&self.strategy, new_capacity, self.count)?;
        Ok(())
    }

    fn init_buckets(&mut self) -> Result<(), BufferError> {
        let table_size = TableSize::from(self.capacity().max(1));
        self.buckets = DenseBuffer::alloc(&self.strategy, table_size.len(), true)?;
        self.table_size = table_size;
        Ok(())
    }

    #[cold]
    #[inline(never)]
    fn rebuild_for_collisions(&mut self) {
        let new_len = capacity::next_table_size(self.collisions);
        if let Err(err) = self.recompute_buckets(new_len) {
            // The chains are still intact; the rebuild is retried on the next
            // colliding insert.
            debug!("dense table: bucket rebuild to {new_len} deferred: {err}");
        }
    }

    /// Rebuilds the bucket table with at least `min_buckets` buckets (rounded
    /// up to a prime) and re-threads every chain.
    ///
    /// Dense indices do not change. The collision counter is recomputed for
    /// the new table. On error the old bucket table stays in place.
    pub fn recompute_buckets(&mut self, min_buckets: usize) -> Result<(), BufferError> {
        let table_size = TableSize::from(min_buckets.max(1));
        let mut buckets = DenseBuffer::<u32>::alloc(&self.strategy, table_size.len(), true)?;

        let mut collisions = 0;
        // SAFETY: `index < count` keeps node accesses in bounds, and `reduce`
        // keeps bucket accesses in bounds of the new table.
        unsafe {
            for index in 0..self.count {
                let node = self.nodes.get_unchecked_mut(index);
                let bucket = table_size.reduce(node.hash);
                let head = *buckets.get_unchecked(bucket);
                if head == 0 {
                    node.previous = NO_PREVIOUS;
                } else {
                    node.previous = head - 1;
                    collisions += 1;
                }
                *buckets.get_unchecked_mut(bucket) = index as u32 + 1;
            }
        }

        let mut old = core::mem::replace(&mut self.buckets, buckets);
        // SAFETY: The old bucket table came from `self.strategy` and holds plain
        // integers.
        unsafe { old.dispose(&self.strategy) };

        debug!(
            "dense table: rebuilt buckets {} -> {} ({} collisions before, {collisions} after)",
            self.table_size.len(),
            table_size.len(),
            self.collisions,
        );
        self.table_size = table_size;
        self.collisions = collisions;
        Ok(())
    }

    /// Removes the entry matching `hash` and `eq`, returning its former
    /// dense index, key and value.
    ///
    /// The last entry is moved into the freed slot.
    pub fn remove(&mut self, hash: u32, eq: impl Fn(&K) -> bool) -> Option<(usize, K, V)> {
        let located = self.locate(hash, eq)?;
        let index = located.index;
        let (key, value) = self.remove_located(located);
        Some((index, key, value))
    }

    /// Removes the entry at dense `index`, moving the last entry into its
    /// slot.
    pub fn swap_remove_index(&mut self, index: usize) -> Option<(K, V)> {
        if index >= self.count {
            return None;
        }
        let located = self.locate_index(index);
        Some(self.remove_located(located))
    }

    fn remove_located(&mut self, located: Located) -> (K, V) {
        let Located {
            bucket,
            index,
            follower,
        } = located;

        // SAFETY: `locate`/`locate_index` produced in-bounds, live indices and a
        // valid bucket. After the node is unlinked no chain refers to `index`,
        // so moving it out and overwriting the slot with the last entry leaves
        // every chain pointing at live nodes.
        unsafe {
            let previous = self.nodes.get_unchecked(index).previous;
            match follower {
                None => {
                    debug_assert_eq!(*self.buckets.get_unchecked(bucket), index as u32 + 1);
                    *self.buckets.get_unchecked_mut(bucket) = previous.wrapping_add(1);
                }
                Some(follower) => {
                    self.nodes.get_unchecked_mut(follower).previous = previous;
                }
            }

            self.count -= 1;
            let last = self.count;
            let node = self.nodes.read(index);
            let value = self.values.read(index);

            if index != last {
                self.relink_moved(last, index);
                self.nodes.relocate(last, index);
                self.values.relocate(last, index);
            }

            (node.key, value)
        }
    }

    /// Repoints whatever links to the node at `from` so it links to `to`.
    ///
    /// # Safety
    ///
    /// `from` must hold a live, linked node and nothing may link to `to`.
    unsafe fn relink_moved(&mut self, from: usize, to: usize) {
        // SAFETY: Caller guarantees `from` is live; its bucket is non-empty and
        // its chain reaches `from`.
        unsafe {
            let hash = self.nodes.get_unchecked(from).hash;
            let bucket = self.table_size.reduce(hash);
            let head = self.buckets.get_unchecked_mut(bucket);
            if (*head - 1) as usize == from {
                *head = to as u32 + 1;
                return;
            }

            let mut link = (*head - 1) as usize;
            loop {
                let node = self.nodes.get_unchecked_mut(link);
                if node.previous as usize == from {
                    node.previous = to as u32;
                    return;
                }
                link = node.previous as usize;
            }
        }
    }

    /// Ensures the dense arrays can hold `additional` more entries without
    /// growing. Never shrinks, and leaves the bucket table alone.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage.
    pub fn reserve(&mut self, additional: usize) {
        self.try_reserve(additional)
            .unwrap_or_else(|err| growth_failed(err));
    }

    /// Fallible [`reserve`](Self::reserve). On error nothing changes.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), BufferError> {
        let required = self
            .count
            .checked_add(additional)
            .ok_or(BufferError::CapacityOverflow)?;
        self.try_ensure_capacity(required)
    }

    /// Ensures the dense arrays hold at least `capacity` entries in total.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.try_ensure_capacity(capacity)
            .unwrap_or_else(|err| growth_failed(err));
    }

    fn try_ensure_capacity(&mut self, capacity: usize) -> Result<(), BufferError> {
        if capacity <= self.capacity() {
            return Ok(());
        }
        self.resize_dense(capacity)
    }

    /// Shrinks the dense arrays to exactly `len` entries.
    ///
    /// The bucket table keeps its size. Returns the strategy's error if it
    /// refuses to resize (a frozen external region); the table is unchanged
    /// in that case.
    pub fn trim(&mut self) -> Result<(), BufferError> {
        trace!(
            "dense table: trimming dense arrays {} -> {}",
            self.capacity(),
            self.count
        );
        self.resize_dense(self.count)
    }

    /// Removes every entry. Keeps all allocated storage.
    pub fn clear(&mut self) {
        let count = core::mem::replace(&mut self.count, 0);
        self.collisions = 0;
        self.buckets.clear();
        // SAFETY: The first `count` slots were initialized; `count` is already
        // zero, so a panicking destructor leaks instead of double-dropping.
        unsafe {
            self.nodes.drop_prefix(count);
            self.values.drop_prefix(count);
        }
        self.nodes.fast_clear();
        self.values.fast_clear();
        trace!("dense table: cleared {count} entries");
    }

    /// Keeps only the entries for which `f` returns `true`.
    ///
    /// Entries are visited from the last dense index down, so every entry
    /// moved by a removal has already been visited.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        let mut index = self.count;
        while index > 0 {
            index -= 1;
            // SAFETY: `index < count`; nodes and values do not alias.
            let keep = unsafe {
                f(
                    &self.nodes.get_unchecked(index).key,
                    self.values.get_unchecked_mut(index),
                )
            };
            if !keep {
                self.swap_remove_index(index);
            }
        }
    }

    /// Returns an iterator over `(key, value)` pairs in dense order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: self.nodes().iter(),
            values: self.values().iter(),
        }
    }

    /// Returns an iterator over `(key, &mut value)` pairs in dense order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        // SAFETY: The first `count` slots of both arrays are initialized and the
        // two buffers never alias.
        let (nodes, values) = unsafe {
            (
                self.nodes.as_slice(self.count),
                self.values.as_mut_slice(self.count),
            )
        };
        IterMut {
            nodes: nodes.iter(),
            values: values.iter_mut(),
        }
    }

    /// Removes and yields every entry in dense order.
    ///
    /// The table is empty as soon as this is called; entries not consumed
    /// are dropped with the iterator.
    pub fn drain(&mut self) -> Drain<'_, K, V, B> {
        let end = core::mem::replace(&mut self.count, 0);
        self.collisions = 0;
        self.buckets.clear();
        Drain {
            table: self,
            index: 0,
            end,
        }
    }

    /// Computes statistics over the bucket table and its chains.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let histogram = self.chain_histogram();
        let occupied_buckets = histogram.iter().skip(1).sum();
        DebugStats {
            len: self.count,
            dense_capacity: self.capacity(),
            bucket_count: self.table_size.len(),
            occupied_buckets,
            longest_chain: histogram.len().saturating_sub(1),
            collisions: self.collisions,
            load_factor: if self.table_size.is_empty() {
                0.0
            } else {
                self.count as f64 / self.table_size.len() as f64
            },
        }
    }

    /// Returns how many buckets head a chain of each length: entry `n` counts
    /// the buckets whose chain holds exactly `n` nodes.
    #[cfg(any(test, feature = "stats"))]
    pub fn chain_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut histogram = alloc::vec![0usize; 1];
        for &head in self.bucket_links() {
            let mut length = 0;
            let mut link = head;
            while link != 0 {
                length += 1;
                link = self.nodes()[(link - 1) as usize].previous.wrapping_add(1);
            }
            if histogram.len() <= length {
                histogram.resize(length + 1, 0);
            }
            histogram[length] += 1;
        }
        histogram
    }

    /// Checks every structural invariant, panicking on the first violation.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert!(self.count <= self.nodes.capacity());
        assert!(self.count <= self.values.capacity());
        if self.count > 0 {
            assert!(!self.table_size.is_empty());
        }

        let mut seen = alloc::vec![false; self.count];
        for (bucket, &head) in self.bucket_links().iter().enumerate() {
            let mut link = head;
            let mut steps = 0;
            while link != 0 {
                let index = (link - 1) as usize;
                assert!(index < self.count, "bucket {bucket} links dead slot {index}");
                assert!(!seen[index], "slot {index} reachable twice");
                seen[index] = true;
                let node = &self.nodes()[index];
                assert_eq!(
                    self.table_size.reduce(node.hash),
                    bucket,
                    "slot {index} chained into the wrong bucket"
                );
                steps += 1;
                assert!(steps <= self.count, "cycle in bucket {bucket}");
                link = node.previous.wrapping_add(1);
            }
        }
        assert!(seen.iter().all(|&s| s), "unreachable live slot");
    }
}

/// A view into a single entry of a [`DenseTable`].
pub enum Entry<'a, K, V, B: BufferStrategy = Heap> {
    /// An entry with a matching key exists.
    Occupied(OccupiedEntry<'a, K, V, B>),
    /// No entry matches.
    Vacant(VacantEntry<'a, K, V, B>),
}

/// A matching entry in a [`DenseTable`].
pub struct OccupiedEntry<'a, K, V, B: BufferStrategy = Heap> {
    table: &'a mut DenseTable<K, V, B>,
    index: usize,
}

impl<'a, K, V, B: BufferStrategy> OccupiedEntry<'a, K, V, B> {
    /// The dense index of the entry.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The entry's key.
    pub fn key(&self) -> &K {
        // SAFETY: `index` was found live and the table is borrowed mutably.
        unsafe { &self.table.nodes.get_unchecked(self.index).key }
    }

    /// The entry's value.
    pub fn get(&self) -> &V {
        // SAFETY: `index` was found live and the table is borrowed mutably.
        unsafe { self.table.values.get_unchecked(self.index) }
    }

    /// The entry's value, mutably.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: `index` was found live and the table is borrowed mutably.
        unsafe { self.table.values.get_unchecked_mut(self.index) }
    }

    /// Converts into a mutable reference bound to the table borrow.
    pub fn into_mut(self) -> &'a mut V {
        let table = self.table;
        // SAFETY: `index` was found live and the table is borrowed mutably.
        unsafe { table.values.get_unchecked_mut(self.index) }
    }

    /// Replaces the value, returning the old one.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(self.get_mut(), value)
    }

    /// Removes the entry. The last entry takes its dense slot.
    pub fn remove(self) -> (K, V) {
        let located = self.table.locate_index(self.index);
        self.table.remove_located(located)
    }
}

/// A vacant slot for a key in a [`DenseTable`].
pub struct VacantEntry<'a, K, V, B: BufferStrategy = Heap> {
    table: &'a mut DenseTable<K, V, B>,
    hash: u32,
}

impl<'a, K, V, B: BufferStrategy> VacantEntry<'a, K, V, B> {
    /// The hash the entry will be stored under.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Inserts `key` and `value` at the end of the dense arrays.
    ///
    /// `key` must satisfy the predicate the entry was looked up with.
    pub fn insert(self, key: K, value: V) -> &'a mut V {
        self.insert_full(key, value).1
    }

    /// Like [`insert`](Self::insert), also returning the new dense index.
    ///
    /// # Panics
    ///
    /// Panics if the buffer strategy cannot provide room for the entry.
    pub fn insert_full(self, key: K, value: V) -> (usize, &'a mut V) {
        let table = self.table;
        let index = table.push(self.hash, key, value);
        // SAFETY: `push` just initialized `index`.
        (index, unsafe { table.values.get_unchecked_mut(index) })
    }

    /// Like [`insert_full`](Self::insert_full), but returns the strategy's
    /// error instead of panicking. On error the table is unchanged and `key`
    /// and `value` are dropped.
    pub fn try_insert(self, key: K, value: V) -> Result<(usize, &'a mut V), BufferError> {
        let table = self.table;
        let index = table.try_push(self.hash, key, value)?;
        // SAFETY: `try_push` just initialized `index`.
        Ok((index, unsafe { table.values.get_unchecked_mut(index) }))
    }
}

/// An iterator over the entries of a [`DenseTable`] in dense order.
pub struct Iter<'a, K, V> {
    nodes: core::slice::Iter<'a, Node<K>>,
    values: core::slice::Iter<'a, V>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            nodes: self.nodes.clone(),
            values: self.values.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        Some((&self.nodes.next()?.key, self.values.next()?))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        Some((&self.nodes.next_back()?.key, self.values.next_back()?))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a [`DenseTable`].
pub struct IterMut<'a, K, V> {
    nodes: core::slice::Iter<'a, Node<K>>,
    values: core::slice::IterMut<'a, V>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        Some((&self.nodes.next()?.key, self.values.next()?))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// A draining iterator over the entries of a [`DenseTable`].
pub struct Drain<'a, K, V, B: BufferStrategy = Heap> {
    table: &'a mut DenseTable<K, V, B>,
    index: usize,
    end: usize,
}

impl<K, V, B: BufferStrategy> Iterator for Drain<'_, K, V, B> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == self.end {
            return None;
        }
        let index = self.index;
        self.index += 1;
        // SAFETY: Slots in `index..end` are still initialized and are read
        // exactly once.
        unsafe {
            let node = self.table.nodes.read(index);
            Some((node.key, self.table.values.read(index)))
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.index;
        (remaining, Some(remaining))
    }
}

impl<K, V, B: BufferStrategy> ExactSizeIterator for Drain<'_, K, V, B> {}

impl<K, V, B: BufferStrategy> Drop for Drain<'_, K, V, B> {
    fn drop(&mut self) {
        for _ in &mut *self {}
        self.table.nodes.fast_clear();
        self.table.values.fast_clear();
    }
}

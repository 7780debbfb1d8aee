use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::ops::Index;

use cfg_if::cfg_if;

use crate::buffer::BufferStrategy;
use crate::buffer::Heap;
use crate::dense_table;
use crate::dense_table::DenseTable;
use crate::error::Error;
use crate::error::Result;
use crate::region::External;
use crate::region::Region;

cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used by [`DenseMap::new`] when none is named.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used by [`DenseMap::new`] when none is named.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    }
}

/// A [`DenseMap`] whose storage lives in a region owned by someone else.
///
/// The borrow of the region guarantees the map cannot outlive it.
pub type ExternalDenseMap<'r, K, V, R, S> = DenseMap<K, V, S, External<&'r R>>;

/// Folds a 64-bit hash into the 32 bits cached per node.
#[inline(always)]
fn fold_hash(hash: u64) -> u32 {
    (hash as u32) ^ ((hash >> 32) as u32)
}

/// A hash map whose entries are stored contiguously.
///
/// `DenseMap<K, V, S, B>` keeps keys and values in two parallel dense arrays,
/// so [`values`](DenseMap::values) is a plain slice and iteration never skips
/// empty slots. Every entry has a dense index in `0..len()`. Indices are
/// stable until the next removal: removing an entry moves the last entry into
/// the freed slot.
///
/// The buffer strategy `B` decides where storage comes from: [`Heap`] by
/// default, or an [`External`] region through [`ExternalDenseMap`].
///
/// # Performance Characteristics
///
/// - **Memory**: one `u32` bucket link per bucket, plus `K`, a cached `u32`
///   hash and a `u32` chain link per entry, plus `V`
/// - **Lookup**: one bucket load, then a chain walk comparing cached hashes
///   before keys
/// - **Removal**: O(chain length) for the removed entry plus O(chain length)
///   to repair the chain of the entry moved into its slot
pub struct DenseMap<K, V, S, B: BufferStrategy = Heap> {
    table: DenseTable<K, V, B>,
    hash_builder: S,
}

impl<K, V, S, B> Clone for DenseMap<K, V, S, B>
where
    K: Clone,
    V: Clone,
    S: Clone,
    B: BufferStrategy + Clone,
{
    fn clone(&self) -> Self {
        DenseMap {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K, V, S, B> Debug for DenseMap<K, V, S, B>
where
    K: Debug,
    V: Debug,
    B: BufferStrategy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> DenseMap<K, V, S, Heap> {
    /// Creates an empty map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let map: DenseMap<i32, String, _> = DenseMap::with_hasher(DefaultHashBuilder::default());
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_hasher_in(hash_builder, Heap)
    }

    /// Creates an empty map with room for `capacity` entries.
    ///
    /// The bucket table is sized to the first prime at or above `capacity`.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_capacity_and_strategy(capacity, hash_builder, Heap)
    }
}

impl<K, V, S: Default> DenseMap<K, V, S, Heap> {
    /// Creates an empty map using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let map: DenseMap<i32, String, DefaultHashBuilder> = DenseMap::new();
    /// assert_eq!(map.len(), 0);
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates an empty map with room for `capacity` entries using the
    /// default hasher builder.
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let map: DenseMap<i32, String, DefaultHashBuilder> = DenseMap::with_capacity(100);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<K, V, S: Default> Default for DenseMap<K, V, S, Heap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r, K, V, S: Default, R: Region> DenseMap<K, V, S, External<&'r R>> {
    /// Creates an empty map that allocates from `region`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::ArenaRegion;
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::ExternalDenseMap;
    /// let arena = ArenaRegion::with_size(4096);
    /// let mut map: ExternalDenseMap<'_, u32, u32, _, DefaultHashBuilder> =
    ///     ExternalDenseMap::new_in_region(&arena);
    /// map.insert(1, 10).unwrap();
    /// assert!(arena.contains(map.values().as_ptr().cast()));
    /// ```
    pub fn new_in_region(region: &'r R) -> Self {
        Self::with_hasher_in(S::default(), External::new(region))
    }

    /// Creates a map with room for `capacity` entries allocated from
    /// `region`.
    pub fn with_capacity_in_region(capacity: usize, region: &'r R) -> Self {
        Self::with_capacity_and_strategy(capacity, S::default(), External::new(region))
    }
}

impl<K, V, S, B: BufferStrategy> DenseMap<K, V, S, B> {
    /// Creates an empty map drawing storage from `strategy`. Nothing is
    /// allocated until the first insert.
    pub fn with_hasher_in(hash_builder: S, strategy: B) -> Self {
        DenseMap {
            table: DenseTable::new_in(strategy),
            hash_builder,
        }
    }

    /// Creates a map with room for `capacity` entries drawn from `strategy`.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage. See
    /// [`try_with_capacity_and_strategy`](Self::try_with_capacity_and_strategy).
    pub fn with_capacity_and_strategy(capacity: usize, hash_builder: S, strategy: B) -> Self {
        DenseMap {
            table: DenseTable::with_capacity_in(capacity, strategy),
            hash_builder,
        }
    }

    /// Fallible [`with_capacity_and_strategy`](Self::with_capacity_and_strategy).
    pub fn try_with_capacity_and_strategy(
        capacity: usize,
        hash_builder: S,
        strategy: B,
    ) -> Result<Self> {
        Ok(DenseMap {
            table: DenseTable::try_with_capacity_in(capacity, strategy)?,
            hash_builder,
        })
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns how many entries fit before the dense arrays grow.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the length of the bucket table. Always prime once allocated.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// The map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// The strategy the map draws its storage from.
    pub fn strategy(&self) -> &B {
        self.table.strategy()
    }

    /// The values in dense order, as a slice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let mut map: DenseMap<&str, u32, DefaultHashBuilder> = DenseMap::new();
    /// map.insert("a", 1).unwrap();
    /// map.insert("b", 2).unwrap();
    /// let total: u32 = map.values().iter().sum();
    /// assert_eq!(total, 3);
    /// ```
    pub fn values(&self) -> &[V] {
        self.table.values()
    }

    /// The values in dense order, as a mutable slice.
    pub fn values_mut(&mut self) -> &mut [V] {
        self.table.values_mut()
    }

    /// The key at dense `index`.
    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.table.key_at(index)
    }

    /// The value at dense `index`.
    pub fn value_at(&self, index: usize) -> Option<&V> {
        self.values().get(index)
    }

    /// The value at dense `index`, mutably.
    pub fn value_at_mut(&mut self, index: usize) -> Option<&mut V> {
        self.values_mut().get_mut(index)
    }

    /// The key and value at dense `index`.
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.table.get(index)
    }

    /// Removes the entry at dense `index`. The last entry takes its slot.
    pub fn swap_remove_index(&mut self, index: usize) -> Option<(K, V)> {
        self.table.swap_remove_index(index)
    }

    /// An iterator over `(&K, &V)` in dense order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.table.iter()
    }

    /// An iterator over `(&K, &mut V)` in dense order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        self.table.iter_mut()
    }

    /// An iterator over the keys in dense order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            inner: self.table.iter(),
        }
    }

    /// Removes every entry, keeping the allocated storage.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Removes every entry, yielding them in dense order.
    ///
    /// The map is empty as soon as this returns, even if the iterator is
    /// dropped early.
    pub fn drain(&mut self) -> Drain<'_, K, V, B> {
        self.table.drain()
    }

    /// Keeps only the entries for which `f` returns `true`.
    pub fn retain(&mut self, f: impl FnMut(&K, &mut V) -> bool) {
        self.table.retain(f);
    }

    /// Grows the dense arrays so `additional` more entries fit.
    ///
    /// Never shrinks and never touches the bucket table.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(additional);
    }

    /// Alias of [`reserve`](Self::reserve).
    pub fn grow_by(&mut self, additional: usize) {
        self.reserve(additional);
    }

    /// Grows the dense arrays to hold at least `capacity` entries in total.
    ///
    /// # Panics
    ///
    /// Panics if the strategy cannot provide the storage.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.table.ensure_capacity(capacity);
    }

    /// Fallible [`reserve`](Self::reserve). On error the map is unchanged.
    ///
    /// ```rust
    /// # use dense_map::ArenaRegion;
    /// # use dense_map::BufferError;
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::Error;
    /// # use dense_map::ExternalDenseMap;
    /// let arena = ArenaRegion::with_size(1024);
    /// let mut map: ExternalDenseMap<'_, u64, u64, _, DefaultHashBuilder> =
    ///     ExternalDenseMap::new_in_region(&arena);
    /// let err = map.try_reserve(1_000_000).unwrap_err();
    /// assert!(matches!(err, Error::Buffer(BufferError::RegionExhausted { .. })));
    /// assert_eq!(map.capacity(), 0);
    /// ```
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        Ok(self.table.try_reserve(additional)?)
    }

    /// Shrinks the dense arrays to [`len`](Self::len). The bucket table keeps
    /// its size.
    ///
    /// Fails, leaving the map unchanged, when the strategy refuses to resize.
    pub fn trim(&mut self) -> Result<()> {
        Ok(self.table.trim()?)
    }

    /// Bucket and chain statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> dense_table::DebugStats {
        self.table.debug_stats()
    }

    /// Number of buckets per chain length. See
    /// [`DenseTable::chain_histogram`].
    #[cfg(any(test, feature = "stats"))]
    pub fn chain_histogram(&self) -> alloc::vec::Vec<usize> {
        self.table.chain_histogram()
    }
}

impl<K, V, S, B> DenseMap<K, V, S, B>
where
    K: Hash + Eq,
    S: BuildHasher,
    B: BufferStrategy,
{
    #[inline]
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        fold_hash(self.hash_builder.hash_one(key))
    }

    /// Inserts a new entry and returns its dense index.
    ///
    /// Fails with [`Error::DuplicateKey`] if the key is already present, or
    /// with [`Error::Buffer`] if the buffer strategy cannot make room. Either
    /// way the map is left untouched and the arguments are dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// # use dense_map::Error;
    /// let mut map: DenseMap<&str, u32, DefaultHashBuilder> = DenseMap::new();
    /// assert_eq!(map.insert("a", 1), Ok(0));
    /// assert_eq!(map.insert("b", 2), Ok(1));
    /// assert_eq!(map.insert("a", 3), Err(Error::DuplicateKey));
    /// assert_eq!(map.get("a"), Some(&1));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Result<usize> {
        match self.entry(key) {
            Entry::Occupied(_) => Err(Error::DuplicateKey),
            Entry::Vacant(entry) => Ok(entry.try_insert(value)?.0),
        }
    }

    /// Inserts a new entry unless the key is present. Never overwrites.
    ///
    /// Returns `Ok(true)` if the entry was inserted and `Ok(false)` if the key
    /// was already present. Storage failures are returned as
    /// [`Error::Buffer`].
    pub fn try_insert(&mut self, key: K, value: V) -> Result<bool> {
        match self.insert(key, value) {
            Ok(_) => Ok(true),
            Err(Error::DuplicateKey) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Overwrites the value of an existing key.
    ///
    /// Fails with [`Error::KeyNotFound`] if the key is absent.
    pub fn set<Q>(&mut self, key: &Q, value: V) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::KeyNotFound),
        }
    }

    /// Inserts or overwrites, returning the previous value if there was one.
    ///
    /// Overwriting never allocates. Appending a new key fails with
    /// [`Error::Buffer`] if the buffer strategy cannot make room, leaving the
    /// map untouched.
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let mut map: DenseMap<u8, &str, DefaultHashBuilder> = DenseMap::new();
    /// assert_eq!(map.insert_or_update(7, "x"), Ok(None));
    /// assert_eq!(map.insert_or_update(7, "y"), Ok(Some("x")));
    /// assert_eq!(map[&7], "y");
    /// ```
    pub fn insert_or_update(&mut self, key: K, value: V) -> Result<Option<V>> {
        match self.entry(key) {
            Entry::Occupied(mut entry) => Ok(Some(entry.insert(value))),
            Entry::Vacant(entry) => {
                entry.try_insert(value)?;
                Ok(None)
            }
        }
    }

    /// Returns the value for `key`, inserting `value` first if the key is
    /// absent.
    ///
    /// # Panics
    ///
    /// Panics if the buffer strategy cannot make room for a new entry.
    pub fn get_or_insert(&mut self, key: K, value: V) -> &mut V {
        self.entry(key).or_insert(value)
    }

    /// Returns the value for `key`, inserting the result of `builder` first if
    /// the key is absent. `builder` only runs for absent keys.
    pub fn get_or_insert_with(&mut self, key: K, builder: impl FnOnce() -> V) -> &mut V {
        self.entry(key).or_insert_with(builder)
    }

    /// Returns the dense index of `key`.
    ///
    /// Read-only: any number of threads may call this on a shared map as long
    /// as nothing mutates it.
    pub fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        self.table.find(hash, |k| k.borrow() == key)
    }

    /// Alias of [`find`](Self::find).
    pub fn get_index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key)
    }

    /// Returns `true` if the map holds `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Returns the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(key)?;
        self.value_at(index)
    }

    /// Returns the value for `key`, mutably.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(key)?;
        self.value_at_mut(index)
    }

    /// Returns the dense index, stored key and value for `key`.
    pub fn get_full<Q>(&self, key: &Q) -> Option<(usize, &K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.find(key)?;
        let (k, v) = self.table.get(index)?;
        Some((index, k, v))
    }

    /// Removes `key`, returning the dense index it occupied and its value.
    ///
    /// The last entry moves into the freed index.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let mut map: DenseMap<char, u32, DefaultHashBuilder> = DenseMap::new();
    /// for (i, c) in "abcd".chars().enumerate() {
    ///     map.insert(c, i as u32).unwrap();
    /// }
    /// assert_eq!(map.remove(&'b'), Some((1, 1)));
    /// assert_eq!(map.find(&'d'), Some(1));
    /// assert_eq!(map.remove(&'b'), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(usize, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let (index, _, value) = self.table.remove(hash, |k| k.borrow() == key)?;
        Some((index, value))
    }

    /// Removes `key`, returning the stored key and value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let (_, k, v) = self.table.remove(hash, |k| k.borrow() == key)?;
        Some((k, v))
    }

    /// Gets the entry for `key` for in-place manipulation.
    ///
    /// ```rust
    /// # use dense_map::DefaultHashBuilder;
    /// # use dense_map::DenseMap;
    /// let mut counts: DenseMap<&str, u32, DefaultHashBuilder> = DenseMap::new();
    /// for word in ["a", "b", "a"] {
    ///     *counts.entry(word).or_default() += 1;
    /// }
    /// assert_eq!(counts["a"], 2);
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V, B> {
        let hash = self.hash_of(&key);
        match self.table.entry(hash, |k| *k == key) {
            dense_table::Entry::Occupied(inner) => Entry::Occupied(OccupiedEntry { inner }),
            dense_table::Entry::Vacant(inner) => Entry::Vacant(VacantEntry { inner, key }),
        }
    }

    /// Removes every entry whose key is absent from `other`.
    pub fn intersect<V2, S2, B2>(&mut self, other: &DenseMap<K, V2, S2, B2>)
    where
        S2: BuildHasher,
        B2: BufferStrategy,
    {
        self.retain(|k, _| other.contains_key(k));
    }

    /// Removes every entry whose key is present in `other`.
    pub fn exclude<V2, S2, B2>(&mut self, other: &DenseMap<K, V2, S2, B2>)
    where
        S2: BuildHasher,
        B2: BufferStrategy,
    {
        self.retain(|k, _| !other.contains_key(k));
    }

    /// Inserts or overwrites every entry of `other`.
    ///
    /// Stops at the first storage failure; entries merged before it stay.
    pub fn union<S2, B2>(&mut self, other: &DenseMap<K, V, S2, B2>) -> Result<()>
    where
        K: Clone,
        V: Clone,
        B2: BufferStrategy,
    {
        for (k, v) in other.iter() {
            self.insert_or_update(k.clone(), v.clone())?;
        }
        Ok(())
    }
}

impl<K, V, S, B> PartialEq for DenseMap<K, V, S, B>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
    B: BufferStrategy,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| *v == *o))
    }
}

impl<K, V, S, B> Eq for DenseMap<K, V, S, B>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
    B: BufferStrategy,
{
}

impl<K, Q, V, S, B> Index<&Q> for DenseMap<K, V, S, B>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
    B: BufferStrategy,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is absent.
    fn index(&self, key: &Q) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key not found in DenseMap"),
        }
    }
}

impl<K, V, S, B> Extend<(K, V)> for DenseMap<K, V, S, B>
where
    K: Hash + Eq,
    S: BuildHasher,
    B: BufferStrategy,
{
    /// # Panics
    ///
    /// Panics if the buffer strategy cannot make room.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            match self.entry(k) {
                Entry::Occupied(mut entry) => {
                    entry.insert(v);
                }
                Entry::Vacant(entry) => {
                    entry.insert(v);
                }
            }
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for DenseMap<K, V, S, Heap>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = DenseMap::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S, B: BufferStrategy> IntoIterator for &'a DenseMap<K, V, S, B> {
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S, B: BufferStrategy> IntoIterator for &'a mut DenseMap<K, V, S, B> {
    type IntoIter = IterMut<'a, K, V>;
    type Item = (&'a K, &'a mut V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// A view into a single entry in the map, which may either be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`DenseMap`].
///
/// [`entry`]: DenseMap::entry
pub enum Entry<'a, K, V, B: BufferStrategy = Heap> {
    /// A vacant entry.
    Vacant(VacantEntry<'a, K, V, B>),
    /// An occupied entry.
    Occupied(OccupiedEntry<'a, K, V, B>),
}

impl<'a, K, V, B: BufferStrategy> Entry<'a, K, V, B> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the value.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if the entry is vacant and returns a
    /// mutable reference to the value.
    pub fn or_insert_with<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce() -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Runs `f` on the value if the entry is occupied.
    pub fn and_modify<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut V),
    {
        if let Entry::Occupied(entry) = &mut self {
            f(entry.get_mut());
        }
        self
    }

    /// The entry's key.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => entry.key(),
            Entry::Vacant(entry) => entry.key(),
        }
    }
}

impl<'a, K, V: Default, B: BufferStrategy> Entry<'a, K, V, B> {
    /// Inserts `V::default()` if the entry is vacant and returns a mutable
    /// reference to the value.
    pub fn or_default(self) -> &'a mut V {
        self.or_insert_with(V::default)
    }
}

/// A vacant entry in a [`DenseMap`].
pub struct VacantEntry<'a, K, V, B: BufferStrategy = Heap> {
    inner: dense_table::VacantEntry<'a, K, V, B>,
    key: K,
}

impl<'a, K, V, B: BufferStrategy> VacantEntry<'a, K, V, B> {
    /// The key that would be inserted.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Takes back the key.
    pub fn into_key(self) -> K {
        self.key
    }

    /// Appends the entry and returns a mutable reference to its value.
    ///
    /// # Panics
    ///
    /// Panics if the buffer strategy cannot make room. Use
    /// [`try_insert`](Self::try_insert) to handle that instead.
    pub fn insert(self, value: V) -> &'a mut V {
        self.inner.insert(self.key, value)
    }

    /// Appends the entry and returns its dense index with the value.
    ///
    /// # Panics
    ///
    /// Panics if the buffer strategy cannot make room.
    pub fn insert_full(self, value: V) -> (usize, &'a mut V) {
        self.inner.insert_full(self.key, value)
    }

    /// Appends the entry, returning its dense index with the value, or
    /// [`Error::Buffer`] if the buffer strategy cannot make room. On error
    /// the map is unchanged and the key and value are dropped.
    pub fn try_insert(self, value: V) -> Result<(usize, &'a mut V)> {
        Ok(self.inner.try_insert(self.key, value)?)
    }
}

/// An occupied entry in a [`DenseMap`].
pub struct OccupiedEntry<'a, K, V, B: BufferStrategy = Heap> {
    inner: dense_table::OccupiedEntry<'a, K, V, B>,
}

impl<'a, K, V, B: BufferStrategy> OccupiedEntry<'a, K, V, B> {
    /// The entry's dense index.
    pub fn index(&self) -> usize {
        self.inner.index()
    }

    /// The stored key.
    pub fn key(&self) -> &K {
        self.inner.key()
    }

    /// The value.
    pub fn get(&self) -> &V {
        self.inner.get()
    }

    /// The value, mutably.
    pub fn get_mut(&mut self) -> &mut V {
        self.inner.get_mut()
    }

    /// Converts into a mutable reference that lives as long as the map
    /// borrow.
    pub fn into_mut(self) -> &'a mut V {
        self.inner.into_mut()
    }

    /// Replaces the value, returning the old one.
    pub fn insert(&mut self, value: V) -> V {
        self.inner.insert(value)
    }

    /// Removes the entry, returning its value.
    pub fn remove(self) -> V {
        self.inner.remove().1
    }

    /// Removes the entry, returning the stored key and value.
    pub fn remove_entry(self) -> (K, V) {
        self.inner.remove()
    }
}

/// An iterator over the entries of a [`DenseMap`] in dense order.
pub type Iter<'a, K, V> = dense_table::Iter<'a, K, V>;

/// A mutable iterator over the entries of a [`DenseMap`].
pub type IterMut<'a, K, V> = dense_table::IterMut<'a, K, V>;

/// A draining iterator over the entries of a [`DenseMap`].
pub type Drain<'a, K, V, B = Heap> = dense_table::Drain<'a, K, V, B>;

/// An iterator over the keys of a [`DenseMap`] in dense order.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::alloc::Layout;
    use core::hash::BuildHasher;
    use core::hash::Hasher;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::error::BufferError;
    use crate::region::ArenaRegion;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    /// Sends every key to the same bucket.
    #[derive(Clone, Default)]
    struct ConstantHashBuilder;

    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            0x1234_5678
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    impl BuildHasher for ConstantHashBuilder {
        type Hasher = ConstantHasher;

        fn build_hasher(&self) -> Self::Hasher {
            ConstantHasher
        }
    }

    fn assert_dense<K, V, S, B: BufferStrategy>(map: &DenseMap<K, V, S, B>) {
        map.table.assert_invariants();
        assert_eq!(map.iter().count(), map.len());
        assert_eq!(map.values().len(), map.len());
    }

    #[test]
    fn test_new_and_with_hasher() {
        let map: DenseMap<i32, String, SipHashBuilder> = DenseMap::new();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 0);
        assert_eq!(map.bucket_count(), 0);

        let map2 = DenseMap::<i32, String, _>::with_hasher(SipHashBuilder::default());
        assert!(map2.is_empty());
    }

    #[test]
    fn test_with_capacity() {
        let map: DenseMap<i32, String, SipHashBuilder> = DenseMap::with_capacity(100);
        assert!(map.capacity() >= 100);
        assert_eq!(map.bucket_count(), 107);

        let map2 =
            DenseMap::<i32, String, _>::with_capacity_and_hasher(200, SipHashBuilder::default());
        assert!(map2.capacity() >= 200);
        assert!(map2.is_empty());
    }

    #[test]
    fn test_insert_returns_dense_index() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        assert_eq!(map.insert(10, "ten".to_string()), Ok(0));
        assert_eq!(map.insert(20, "twenty".to_string()), Ok(1));
        assert_eq!(map.insert(30, "thirty".to_string()), Ok(2));
        assert_eq!(map.find(&20), Some(1));
        assert_eq!(map.value_at(1), Some(&"twenty".to_string()));
        assert_eq!(map.key_at(2), Some(&30));
        assert_dense(&map);
    }

    #[test]
    fn test_duplicate_insert_leaves_map_unchanged() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "a".to_string()).unwrap();
        assert_eq!(map.insert(1, "b".to_string()), Err(Error::DuplicateKey));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&"a".to_string()));

        assert_eq!(map.try_insert(1, "c".to_string()), Ok(false));
        assert_eq!(map.try_insert(2, "c".to_string()), Ok(true));
        assert_eq!(map.get(&1), Some(&"a".to_string()));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_set() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        assert_eq!(map.set(&1, 5), Err(Error::KeyNotFound));
        assert!(map.is_empty());
        map.insert(1, 1).unwrap();
        assert_eq!(map.set(&1, 5), Ok(()));
        assert_eq!(map[&1], 5);
    }

    #[test]
    fn test_borrowed_lookups() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        map.insert("hello".to_string(), 1).unwrap();
        assert_eq!(map.get("hello"), Some(&1));
        assert!(map.contains_key("hello"));
        assert_eq!(map.get_full("hello"), Some((0, &"hello".to_string(), &1)));
        assert_eq!(map.remove_entry("hello"), Some(("hello".to_string(), 1)));
        assert!(map.get("hello").is_none());
    }

    #[test]
    fn test_get_or_insert_with_runs_builder_once() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        let mut calls = 0;
        *map.get_or_insert_with(1, || {
            calls += 1;
            10
        }) += 1;
        *map.get_or_insert_with(1, || {
            calls += 1;
            100
        }) += 1;
        assert_eq!(calls, 1);
        assert_eq!(map[&1], 12);
        assert_eq!(*map.get_or_insert(2, 7), 7);
        assert_eq!(*map.get_or_insert(2, 8), 7);
    }

    #[test]
    fn test_insert_or_update() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        assert_eq!(map.insert_or_update(3, 'a'), Ok(None));
        assert_eq!(map.insert_or_update(3, 'b'), Ok(Some('a')));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_compacts() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        for i in 0..10 {
            map.insert(i, i * 100).unwrap();
        }
        assert_eq!(map.remove(&4), Some((4, 400)));
        assert_eq!(map.len(), 9);
        assert_eq!(map.find(&9), Some(4));
        assert_eq!(map.values()[4], 900);
        assert_eq!(map.remove(&4), None);

        // Removing the last entry moves nothing.
        assert_eq!(map.remove(&8), Some((8, 800)));
        assert_eq!(map.find(&9), Some(4));
        assert_dense(&map);
    }

    #[test]
    fn test_find_on_empty_map() {
        let map: DenseMap<u32, u32, SipHashBuilder> = DenseMap::new();
        assert_eq!(map.find(&0), None);
        let mut map = map;
        assert_eq!(map.remove(&0), None);
    }

    #[test]
    fn test_thousand_keys_remove_evens() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        for k in 1..=1000u32 {
            map.insert(k, k * 2).unwrap();
        }
        for k in (2..=1000u32).step_by(2) {
            assert!(map.remove(&k).is_some());
        }
        assert_eq!(map.len(), 500);
        assert_eq!(map.get(&3), Some(&6));
        assert!(map.find(&4).is_none());

        let mut keys: Vec<u32> = map.keys().copied().collect();
        keys.sort_unstable();
        let odds: Vec<u32> = (1..=1000).step_by(2).collect();
        assert_eq!(keys, odds);
        assert_dense(&map);
    }

    #[test]
    fn test_constant_hash_degrades_but_works() {
        let mut map: DenseMap<u32, u32, ConstantHashBuilder> = DenseMap::new();
        for k in 0..500 {
            map.insert(k, k + 1).unwrap();
        }
        assert_dense(&map);
        assert_eq!(map.debug_stats().occupied_buckets, 1);
        assert_eq!(map.debug_stats().longest_chain, 500);
        for k in (0..500).rev().step_by(3) {
            assert_eq!(map.remove(&k).map(|(_, v)| v), Some(k + 1));
            assert_dense(&map);
        }
        for k in 0..500 {
            assert_eq!(map.contains_key(&k), (499 - k) % 3 != 0);
        }
    }

    #[test]
    fn test_collisions_trigger_bucket_rebuild() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        map.insert(0u64, ()).unwrap();
        let initial = map.bucket_count();
        for k in 1..10_000u64 {
            map.insert(k, ()).unwrap();
        }
        assert!(map.bucket_count() > initial);
        let stats = map.debug_stats();
        assert!(stats.collisions <= stats.bucket_count);
        assert_dense(&map);
    }

    #[test]
    #[cfg(feature = "std")]
    #[cfg_attr(miri, ignore)]
    fn test_against_std_model() {
        use std::collections::HashMap;

        let mut rng = SmallRng::seed_from_u64(0xD15EA5E);
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        let mut model: HashMap<u16, u32> = HashMap::new();

        for step in 0..20_000u32 {
            let key: u16 = rng.random_range(0..512);
            match rng.random_range(0..6) {
                0 | 1 => {
                    let inserted = map.insert(key, step).is_ok();
                    assert_eq!(inserted, !model.contains_key(&key));
                    model.entry(key).or_insert(step);
                }
                2 => {
                    let removed = map.remove(&key).map(|(_, v)| v);
                    assert_eq!(removed, model.remove(&key));
                }
                3 => {
                    assert_eq!(map.insert_or_update(key, step), Ok(model.insert(key, step)));
                }
                4 => {
                    let expected = if model.contains_key(&key) {
                        model.insert(key, step);
                        Ok(())
                    } else {
                        Err(Error::KeyNotFound)
                    };
                    assert_eq!(map.set(&key, step), expected);
                }
                _ => {
                    assert_eq!(map.get(&key), model.get(&key));
                }
            }
            assert_eq!(map.len(), model.len());
            if step % 97 == 0 {
                assert_dense(&map);
            }
        }

        assert_dense(&map);
        for (k, v) in &map {
            assert_eq!(model.get(k), Some(v));
        }
    }

    #[test]
    fn test_entry_api() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        *map.entry("a").or_insert(0) += 1;
        *map.entry("a").or_insert(0) += 1;
        map.entry("b").and_modify(|v| *v += 10).or_insert(5);
        map.entry("b").and_modify(|v| *v += 10).or_insert(5);
        assert_eq!(map["a"], 2);
        assert_eq!(map["b"], 15);
        assert_eq!(map.entry("zzz").key(), &"zzz");

        match map.entry("a") {
            Entry::Occupied(mut entry) => {
                assert_eq!(entry.index(), 0);
                assert_eq!(entry.insert(9), 2);
                assert_eq!(entry.remove_entry(), ("a", 9));
            }
            Entry::Vacant(_) => panic!("expected occupied"),
        }
        match map.entry("c") {
            Entry::Vacant(entry) => assert_eq!(entry.into_key(), "c"),
            Entry::Occupied(_) => panic!("expected vacant"),
        }
        assert_eq!(map.len(), 1);
        assert_eq!(map.find("b"), Some(0));
    }

    #[test]
    fn test_set_algebra() {
        let builder = SipHashBuilder::default();
        let mut left: DenseMap<u32, u32, _> = DenseMap::with_hasher(builder.clone());
        let mut right: DenseMap<u32, &str, _> = DenseMap::with_hasher(builder.clone());
        for k in 0..20 {
            left.insert(k, k).unwrap();
        }
        for k in 10..30 {
            right.insert(k, "r").unwrap();
        }

        let mut intersected = left.clone();
        intersected.intersect(&right);
        let mut keys: Vec<u32> = intersected.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (10..20).collect::<Vec<_>>());
        assert_dense(&intersected);

        let mut excluded = left.clone();
        excluded.exclude(&right);
        let mut keys: Vec<u32> = excluded.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        assert_dense(&excluded);

        let mut other: DenseMap<u32, u32, _> = DenseMap::with_hasher(builder);
        other.insert(5, 500).unwrap();
        other.insert(50, 5000).unwrap();
        let mut united = left.clone();
        united.union(&other).unwrap();
        assert_eq!(united.len(), 21);
        assert_eq!(united[&5], 500);
        assert_eq!(united[&50], 5000);
    }

    #[test]
    fn test_retain_and_drain() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        for k in 0..100 {
            map.insert(k, k).unwrap();
        }
        map.retain(|&k, v| {
            *v *= 2;
            k % 10 == 0
        });
        assert_eq!(map.len(), 10);
        assert!(map.iter().all(|(k, v)| *v == k * 2));
        assert_dense(&map);

        let mut drained: Vec<(i32, i32)> = map.drain().collect();
        drained.sort_unstable();
        assert_eq!(drained.len(), 10);
        assert_eq!(drained[1], (10, 20));
        assert!(map.is_empty());
        assert_eq!(map.find(&10), None);
        map.insert(10, 1).unwrap();
        assert_dense(&map);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        for k in 0..50 {
            map.insert(k, k.to_string()).unwrap();
        }
        let capacity = map.capacity();
        let buckets = map.bucket_count();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);
        assert_eq!(map.bucket_count(), buckets);
        assert!(!map.contains_key(&3));
        map.insert(3, "3".to_string()).unwrap();
        assert_dense(&map);
    }

    #[test]
    fn test_capacity_management() {
        let mut map: DenseMap<u32, u32, SipHashBuilder> = DenseMap::new();
        map.reserve(10);
        assert!(map.capacity() >= 10);
        map.grow_by(40);
        assert!(map.capacity() >= 40);
        map.ensure_capacity(5);
        assert!(map.capacity() >= 40);

        for k in 0..7 {
            map.insert(k, k).unwrap();
        }
        let buckets = map.bucket_count();
        map.trim().unwrap();
        assert_eq!(map.capacity(), 7);
        assert_eq!(map.bucket_count(), buckets);
        assert_eq!(map.try_reserve(usize::MAX), Err(Error::Buffer(BufferError::CapacityOverflow)));
        assert_eq!(map.capacity(), 7);
        assert_dense(&map);
    }

    #[test]
    fn test_traits() {
        let builder = SipHashBuilder::default();
        let mut a = DenseMap::with_hasher(builder.clone());
        a.extend([(1, "one"), (2, "two"), (3, "three")]);
        let mut b = DenseMap::with_hasher(builder);
        b.extend([(3, "three"), (1, "one"), (2, "two")]);
        assert_eq!(a, b);
        b.set(&2, "deux").unwrap();
        assert_ne!(a, b);

        let c: DenseMap<i32, &str, SipHashBuilder> = [(1, "x"), (1, "y")].into_iter().collect();
        assert_eq!(c.len(), 1);
        assert_eq!(c[&1], "y");

        let debug = alloc::format!("{c:?}");
        assert_eq!(debug, r#"{1: "y"}"#);

        for (_, v) in &mut a {
            *v = "n";
        }
        assert!(a.values().iter().all(|v| *v == "n"));
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn test_index_missing_key_panics() {
        let map: DenseMap<u8, u8, SipHashBuilder> = DenseMap::new();
        let _ = map[&0];
    }

    #[test]
    fn test_external_region_map() {
        let arena = ArenaRegion::with_size(64 * 1024);
        {
            let mut map: ExternalDenseMap<'_, u32, u64, _, SipHashBuilder> =
                ExternalDenseMap::new_in_region(&arena);
            for k in 0..100 {
                map.insert(k, k as u64).unwrap();
            }
            assert!(arena.contains(map.values().as_ptr().cast()));
            assert_eq!(arena.live_blocks(), 3);

            arena.set_resizable(false);
            let capacity = map.capacity();
            assert_eq!(
                map.try_reserve(capacity),
                Err(Error::Buffer(BufferError::NotResizable))
            );
            assert_eq!(map.capacity(), capacity);
            for k in 100..capacity as u32 {
                map.insert(k, 0).unwrap();
            }
            assert_eq!(map.len(), capacity);
            arena.set_resizable(true);

            map.remove(&7).unwrap();
            assert_dense(&map);
        }
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn test_region_exhaustion_is_reported_by_try_reserve() {
        let arena = ArenaRegion::with_size(256);
        let mut map: ExternalDenseMap<'_, u64, u64, _, SipHashBuilder> =
            ExternalDenseMap::with_capacity_in_region(4, &arena);
        map.insert(1, 1).unwrap();
        let err = map.try_reserve(10_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Buffer(BufferError::RegionExhausted { .. })
        ));
        assert_eq!(map.capacity(), 4);
        assert_eq!(map.get(&1), Some(&1));
    }

    fn filled_region_map(
        arena: &ArenaRegion,
    ) -> ExternalDenseMap<'_, u64, u64, ArenaRegion, SipHashBuilder> {
        let mut map = ExternalDenseMap::with_capacity_in_region(4, arena);
        for k in 0..4 {
            map.insert(k, k * 10).unwrap();
        }
        assert_eq!(map.capacity(), 4);
        map
    }

    fn assert_unchanged(map: &ExternalDenseMap<'_, u64, u64, ArenaRegion, SipHashBuilder>) {
        assert_eq!(map.len(), 4);
        assert_eq!(map.capacity(), 4);
        for k in 0..4 {
            assert_eq!(map.get(&k), Some(&(k * 10)));
        }
        assert_eq!(map.get(&99), None);
        assert_dense(map);
    }

    #[test]
    fn test_insert_into_frozen_full_region_returns_error() {
        let arena = ArenaRegion::with_size(64 * 1024);
        let mut map = filled_region_map(&arena);
        arena.set_resizable(false);

        let not_resizable = Error::Buffer(BufferError::NotResizable);
        assert_eq!(map.insert(99, 1), Err(not_resizable));
        assert_unchanged(&map);
        assert_eq!(map.try_insert(99, 1), Err(not_resizable));
        assert_unchanged(&map);
        assert_eq!(map.insert_or_update(99, 1), Err(not_resizable));
        assert_unchanged(&map);
        match map.entry(99) {
            Entry::Vacant(entry) => assert!(entry.try_insert(1).is_err()),
            Entry::Occupied(_) => panic!("99 should be absent"),
        }
        assert_unchanged(&map);

        // Overwriting needs no storage.
        assert_eq!(map.insert_or_update(2, 7), Ok(Some(20)));
        assert_eq!(map.try_insert(2, 8), Ok(false));
        map.set(&2, 20).unwrap();
        assert_unchanged(&map);

        arena.set_resizable(true);
        assert_eq!(map.insert(99, 1), Ok(4));
        assert_eq!(map.get(&99), Some(&1));
    }

    #[test]
    fn test_insert_into_exhausted_region_returns_error() {
        let arena = ArenaRegion::with_size(256);
        let mut map = filled_region_map(&arena);
        let rest = Layout::from_size_align(arena.remaining(), 1).unwrap();
        arena.allocate(rest).unwrap();

        let err = map.insert(99, 1).unwrap_err();
        assert!(
            matches!(err, Error::Buffer(BufferError::RegionExhausted { .. })),
            "{err:?}"
        );
        assert_unchanged(&map);
        assert!(map.insert_or_update(100, 1).is_err());
        assert_unchanged(&map);
        assert!(map.remove(&3).is_some());
        assert_eq!(map.insert(99, 1), Ok(3));
    }

    #[test]
    fn test_union_stops_at_storage_failure() {
        let arena = ArenaRegion::with_size(64 * 1024);
        let mut map = filled_region_map(&arena);
        arena.set_resizable(false);

        let mut other: DenseMap<u64, u64, _> = DenseMap::with_hasher(SipHashBuilder::default());
        other.insert(99, 1).unwrap();
        assert_eq!(
            map.union(&other),
            Err(Error::Buffer(BufferError::NotResizable))
        );
        assert_unchanged(&map);
    }

    #[test]
    #[cfg(feature = "std")]
    #[cfg_attr(miri, ignore)]
    fn test_parallel_find() {
        let mut map = DenseMap::with_hasher(SipHashBuilder::default());
        for k in 0..4096u32 {
            map.insert(k, k ^ 0xFFFF).unwrap();
        }
        let map = &map;
        std::thread::scope(|scope| {
            for t in 0..4u32 {
                scope.spawn(move || {
                    for k in (t..4096).step_by(4) {
                        let index = map.find(&k).unwrap();
                        assert_eq!(map.values()[index], k ^ 0xFFFF);
                    }
                });
            }
        });
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DenseMap<String, Vec<u8>, SipHashBuilder>>();
        fn assert_send<T: Send>() {}
        assert_send::<ArenaRegion>();
    }
}

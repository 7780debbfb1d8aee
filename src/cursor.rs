//! Enumerators that do not borrow the map.
//!
//! [`DenseMap::iter`] borrows the map, so the borrow checker already rules out
//! structural changes while it runs. A [`Cursor`] holds only a position and
//! the entry count it saw when it was created, and takes the map as an
//! argument on every step. That lets callers interleave enumeration with
//! value updates through `&mut` access. Any change in the entry count since
//! creation makes the next [`move_next`](Cursor::move_next) fail with
//! [`Error::ConcurrentModification`].
//!
//! A cursor is only meaningful against the map that created it.

use crate::buffer::BufferStrategy;
use crate::dense_map::DenseMap;
use crate::error::Error;
use crate::error::Result;

/// A detached enumerator over the `(key, value)` pairs of a [`DenseMap`].
///
/// # Examples
///
/// ```rust
/// # use dense_map::DefaultHashBuilder;
/// # use dense_map::DenseMap;
/// # use dense_map::Error;
/// let mut map: DenseMap<&str, u32, DefaultHashBuilder> = DenseMap::new();
/// map.insert("a", 1).unwrap();
/// map.insert("b", 2).unwrap();
///
/// let mut cursor = map.cursor();
/// while cursor.move_next(&map)? {
///     *cursor.value_mut(&mut map).unwrap() *= 10;
/// }
/// assert_eq!(map.values(), &[10, 20]);
///
/// let mut cursor = map.cursor();
/// cursor.move_next(&map)?;
/// map.insert("c", 3).unwrap();
/// assert_eq!(cursor.move_next(&map), Err(Error::ConcurrentModification));
/// # Ok::<(), Error>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    /// Number of successful steps; the current index is `position - 1`.
    position: usize,
    count: usize,
}

impl Cursor {
    fn new(count: usize) -> Self {
        Cursor { position: 0, count }
    }

    fn check<K, V, S, B: BufferStrategy>(&self, map: &DenseMap<K, V, S, B>) -> Result<()> {
        if map.len() != self.count {
            return Err(Error::ConcurrentModification);
        }
        Ok(())
    }

    /// Advances to the next entry. Returns `Ok(false)` once every entry has
    /// been visited.
    pub fn move_next<K, V, S, B: BufferStrategy>(
        &mut self,
        map: &DenseMap<K, V, S, B>,
    ) -> Result<bool> {
        self.check(map)?;
        if self.position < self.count {
            self.position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// The dense index of the current entry, if the cursor is on one.
    pub fn index(&self) -> Option<usize> {
        if self.position == 0 || self.position > self.count {
            None
        } else {
            Some(self.position - 1)
        }
    }

    /// The current entry. `None` before the first step or after the map
    /// changed size.
    pub fn entry<'m, K, V, S, B: BufferStrategy>(
        &self,
        map: &'m DenseMap<K, V, S, B>,
    ) -> Option<(&'m K, &'m V)> {
        self.check(map).ok()?;
        map.get_index(self.index()?)
    }

    /// The current value, mutably.
    pub fn value_mut<'m, K, V, S, B: BufferStrategy>(
        &self,
        map: &'m mut DenseMap<K, V, S, B>,
    ) -> Option<&'m mut V> {
        self.check(map).ok()?;
        map.value_at_mut(self.index()?)
    }

    /// Rewinds to before the first entry and re-captures the entry count.
    pub fn reset<K, V, S, B: BufferStrategy>(&mut self, map: &DenseMap<K, V, S, B>) {
        *self = Cursor::new(map.len());
    }
}

/// A detached enumerator over the keys of a [`DenseMap`].
///
/// Behaves like [`Cursor`] but only exposes keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeysCursor {
    inner: Cursor,
}

impl KeysCursor {
    /// Advances to the next key. Returns `Ok(false)` once every key has been
    /// visited.
    pub fn move_next<K, V, S, B: BufferStrategy>(
        &mut self,
        map: &DenseMap<K, V, S, B>,
    ) -> Result<bool> {
        self.inner.move_next(map)
    }

    /// The current key.
    pub fn key<'m, K, V, S, B: BufferStrategy>(
        &self,
        map: &'m DenseMap<K, V, S, B>,
    ) -> Option<&'m K> {
        self.inner.entry(map).map(|(k, _)| k)
    }

    /// Rewinds to before the first key and re-captures the entry count.
    pub fn reset<K, V, S, B: BufferStrategy>(&mut self, map: &DenseMap<K, V, S, B>) {
        self.inner.reset(map);
    }
}

impl<K, V, S, B: BufferStrategy> DenseMap<K, V, S, B> {
    /// A detached enumerator over the entries, in dense order.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.len())
    }

    /// A detached enumerator over the keys, in dense order.
    pub fn keys_cursor(&self) -> KeysCursor {
        KeysCursor {
            inner: Cursor::new(self.len()),
        }
    }
}

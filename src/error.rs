//! Error types for dense map operations.

use thiserror::Error;

/// Result type alias for fallible map operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by [`DenseMap`](crate::DenseMap) and its enumerators.
///
/// Every operation that returns one of these leaves the map exactly as it was
/// before the call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A strict insert found an entry with an equal key.
    #[error("an entry with the same key already exists")]
    DuplicateKey,

    /// An operation that requires the key to be present did not find it.
    #[error("key not found")]
    KeyNotFound,

    /// An enumerator observed a different entry count than the one it was
    /// created with.
    #[error("map was structurally modified during enumeration")]
    ConcurrentModification,

    /// The buffer strategy could not provide the requested storage.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Failures reported by a [`BufferStrategy`](crate::buffer::BufferStrategy).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The requested element count does not fit in the address space, or
    /// exceeds the largest index a dense map can address.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// An external region has no room left for the requested block.
    #[error("region exhausted: requested {requested} bytes, {available} available")]
    RegionExhausted {
        /// Bytes requested, including alignment padding.
        requested: usize,
        /// Bytes left in the region.
        available: usize,
    },

    /// The owner of an external region has disallowed resizing.
    #[error("region does not currently allow resizing")]
    NotResizable,
}

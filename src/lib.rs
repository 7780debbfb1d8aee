#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod buffer;
pub mod capacity;
pub mod cursor;

/// A hash map whose entries are stored contiguously.
///
/// This module provides `DenseMap`, which wraps a `DenseTable` and provides a
/// key-value map interface with configurable hashers and buffer strategies.
pub mod dense_map;

pub mod dense_table;
pub mod error;
pub mod region;

pub use buffer::BufferStrategy;
pub use buffer::Heap;
pub use cursor::Cursor;
pub use cursor::KeysCursor;
#[cfg(any(feature = "foldhash", feature = "std"))]
pub use dense_map::DefaultHashBuilder;
pub use dense_map::DenseMap;
pub use dense_map::Entry;
pub use dense_map::ExternalDenseMap;
#[cfg(feature = "stats")]
pub use dense_table::DebugStats;
pub use dense_table::DenseTable;
pub use error::BufferError;
pub use error::Error;
pub use error::Result;
pub use region::ArenaRegion;
pub use region::External;
pub use region::Region;

//! pickledb - a layered, on-disk, strongly-typed table engine.
//!
//! Three subsystems build on each other:
//!
//! - [`storage`] - a file-backed container of equal-sized blocks with an
//!   in-band header block ([`storage::BlockStorage`]).
//! - [`buffer`] - a synchronous, random-access byte table over a
//!   container, backed by an LRU page cache with one-ahead prefetch
//!   ([`buffer::PagedTable`], [`buffer::LruCache`]).
//! - [`schema`] and [`table`] - a compositional codec and the typed
//!   `Table<T>` built on top of it.
//!
//! ```text
//! Table<T>::read(i)  --schema decode-->  PagedTable cursor  --cache miss-->  BlockStorage::read_block
//! ```

pub mod buffer;
pub mod encoding;
pub mod error;
pub mod identifier;
pub mod schema;
pub mod storage;
pub mod table;

pub use error::{PickleError, Result};

/// Crate version, exposed for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

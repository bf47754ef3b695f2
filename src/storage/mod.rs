//! Block storage: a rooted workspace of named, file-backed containers of
//! equal-sized blocks with an in-band, application-writable header block.
//!
//! A [`BlockStorage`] is the only component in this crate that actually
//! touches the filesystem. Everything above it ([`crate::buffer`],
//! [`crate::table`]) addresses bytes through the [`Handle`]s it hands
//! out.

mod container;

pub use container::{BlockStorage, Handle};

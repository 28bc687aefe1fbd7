#![forbid(unsafe_code)]
//! On-disk record layouts for the UNDELFS metadata index.
//!
//! Every structure here is a fixed little-endian layout decoded and encoded
//! against opaque byte buffers; the storage engine owns the buffers, the
//! codecs only know field offsets and semantics.
//!
//! - [`key`]: the 17-byte disk key (objectid, item kind, offset).
//! - [`root`]: the root descriptor ([`RootItem`]) including the deletion
//!   progress cursor and the dead flag.
//! - [`dir`]: directory entry and root reference payloads.
//! - [`snapshot`]: the `USNP` snapshot container the CLI operates on.

pub mod dir;
pub mod key;
pub mod root;
pub mod snapshot;

pub use dir::{DirEntry, EntryKind, RootRef};
pub use key::{parse_key, write_key, DISK_KEY_SIZE};
pub use root::RootItem;
pub use snapshot::{encode_snapshot, parse_snapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

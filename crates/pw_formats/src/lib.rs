//! Structured representations and byte codecs for packweave game formats.
//!
//! The merge engine never touches raw bytes directly; it calls into this crate
//! to decode and encode:
//!
//! - **Compression**: the game's compression codec, detected by magic
//! - **Archives**: container files bundling named members, possibly nested
//! - **Documents**: typed value trees used by flag tables and placement units
//! - **Parameter trees**: nested lists/objects of typed parameters
//! - **Size tables**: resource name to reserved byte size
//!
//! # Example
//!
//! ```
//! use pw_formats::{Archive, compression};
//!
//! # fn main() -> Result<(), pw_formats::Error> {
//! let mut archive = Archive::new();
//! archive.insert("Actor/ActorLink/Foo.bxml", b"data".to_vec());
//! let bytes = compression::compress(&archive.to_bytes()?)?;
//! assert_eq!(Archive::read(&bytes)?, archive);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod compression;
pub mod document;
pub mod error;
pub mod param;
pub mod size_table;

pub use archive::{is_archive_name, Archive};
pub use document::Value;
pub use error::{Error, Result};
pub use param::{Parameter, ParameterIo, ParameterList, ParameterObject};
pub use size_table::SizeTable;

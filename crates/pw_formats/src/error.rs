//! Error types for format decoding and encoding.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or encoding a game format.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading from or writing to the underlying buffer failed (usually truncation).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer does not start with the magic of the expected format.
    #[error("Invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: Vec<u8> },

    /// The format version is not one this crate can read.
    #[error("Unsupported version: {0}")]
    InvalidVersion(u32),

    /// A member or entry name is not valid UTF-8.
    #[error("Invalid UTF-8 name: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A name is too long to be stored in the binary layout.
    #[error("Name too long ({len} bytes): {name}")]
    NameTooLong { name: String, len: usize },

    /// A member declares more data than the buffer holds.
    #[error("Member {name} declares {expected} bytes but only {available} remain")]
    Truncated {
        name: String,
        expected: usize,
        available: usize,
    },

    /// The MessagePack payload of a structured document could not be decoded.
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A structured document could not be encoded to MessagePack.
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The compression codec failed.
    #[error("Compression error: {0}")]
    Compression(String),
}

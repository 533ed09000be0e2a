//! Compression codec boundary.
//!
//! Compressed game files are recognized by the codec's magic and, by
//! convention, carry an `s`-prefixed extension (`.ssarc`, `.smubin`,
//! `.srsizetable`). The codec itself is zstd at a fixed level so that encoding
//! the same bytes twice always yields the same output.

use crate::error::{Error, Result};
use std::borrow::Cow;

/// Magic bytes at the start of every compressed payload.
pub const COMPRESSED_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Compression level used for every write.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Returns `true` if the buffer starts with the compressed magic.
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(&COMPRESSED_MAGIC)
}

/// Compress a buffer.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, COMPRESSION_LEVEL).map_err(|e| Error::Compression(e.to_string()))
}

/// Decompress a buffer that is known to be compressed.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| Error::Compression(e.to_string()))
}

/// Decompress the buffer if it carries the compressed magic, otherwise borrow it.
pub fn decompress_if_needed(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if is_compressed(data) {
        Ok(Cow::Owned(decompress(data)?))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

/// Returns the lowercase extension of the last path segment, without the dot.
pub fn extension(name: &str) -> String {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(idx) if idx + 1 < file_name.len() => file_name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Returns `true` if a file with this name is stored compressed.
///
/// The game marks compressed files with an `s` prefix on the extension.
/// `.sarc` is the one uncompressed extension that happens to start with `s`.
pub fn is_compressed_name(name: &str) -> bool {
    let ext = extension(name);
    ext.len() > 1 && ext.starts_with('s') && ext != "sarc"
}

/// Returns the extension of the uncompressed form of a file
/// (`ssarc` -> `sarc`, `sbactorpack` -> `bactorpack`, `bxml` -> `bxml`).
pub fn uncompressed_extension(name: &str) -> String {
    let ext = extension(name);
    if is_compressed_name(name) {
        ext[1..].to_string()
    } else {
        ext
    }
}

/// Encode raw bytes for storage under `name`, compressing when the name demands it.
pub fn encode_for_name(name: &str, raw: Vec<u8>) -> Result<Vec<u8>> {
    if is_compressed_name(name) {
        compress(&raw)
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip_detects_magic() {
        let data = b"Hello, world!".repeat(100);
        let compressed = compress(&data).unwrap();
        assert!(is_compressed(&compressed));
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_if_needed(&compressed).unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_decompress_if_needed_borrows_plain_data() {
        let data = b"plain";
        assert!(matches!(decompress_if_needed(data).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_compress_is_deterministic() {
        let data = b"abcabcabc".repeat(50);
        assert_eq!(compress(&data).unwrap(), compress(&data).unwrap());
    }

    #[test]
    fn test_compressed_names() {
        assert!(is_compressed_name("Pack/Bootup.pack//GameData/gamedata.ssarc"));
        assert!(is_compressed_name("Map/MainField/A-1/A-1_Static.smubin"));
        assert!(!is_compressed_name("Actor/ActorLink/Foo.bxml"));
        assert!(!is_compressed_name("Layout/Common.sarc"));
        assert!(!is_compressed_name("Pack/Bootup.pack"));
    }

    #[test]
    fn test_uncompressed_extension() {
        assert_eq!(uncompressed_extension("a/b.sbactorpack"), "bactorpack");
        assert_eq!(uncompressed_extension("a/b.sarc"), "sarc");
        assert_eq!(uncompressed_extension("a/b.BXML"), "bxml");
        assert_eq!(uncompressed_extension("a/noext"), "");
    }
}

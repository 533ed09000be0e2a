//! Container archives.
//!
//! An [`Archive`] bundles named member files. Members may themselves be
//! archives, which is how the game nests packs inside packs.
//!
//! # Binary layout (little endian)
//!
//! ```text
//! magic      [u8; 4]  "SARC"
//! version    u32      1
//! count      u32
//! repeated count times, sorted by name:
//!   name_len u16
//!   name     [u8; name_len]   UTF-8
//!   data_len u32
//!   data     [u8; data_len]
//! ```
//!
//! The whole buffer may additionally be wrapped by the compression codec.

use crate::compression::{decompress_if_needed, extension};
use crate::error::{Error, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

/// Extensions (uncompressed and compressed forms) of container archives.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[
    "pack",
    "sarc",
    "ssarc",
    "bactorpack",
    "sbactorpack",
    "bfarc",
    "sbfarc",
    "blarc",
    "sblarc",
    "beventpack",
    "sbeventpack",
    "bgenv",
    "sbgenv",
    "genvb",
    "sgenvb",
    "bars",
    "sbars",
    "stera",
    "sstera",
    "stats",
    "sstats",
    "sbmaptex",
    "sbreviewtex",
    "sbstftex",
];

/// Returns `true` if the last path segment of `name` has a container extension.
pub fn is_archive_name(name: &str) -> bool {
    let ext = extension(name);
    ARCHIVE_EXTENSIONS.contains(&ext.as_str())
}

/// An in-memory container archive.
///
/// Members are kept sorted by name so that encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    members: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    pub const MAGIC: [u8; 4] = *b"SARC";
    const VERSION: u32 = 1;

    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the buffer (after decompression) starts with the archive magic.
    pub fn is_archive(data: &[u8]) -> bool {
        match decompress_if_needed(data) {
            Ok(raw) => raw.starts_with(&Self::MAGIC),
            Err(_) => false,
        }
    }

    /// Parse an archive, decompressing it first if needed.
    pub fn read(data: &[u8]) -> Result<Self> {
        let raw = decompress_if_needed(data)?;
        Self::read_from(&mut Cursor::new(raw.as_ref()))
    }

    /// Parse an uncompressed archive from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != Self::MAGIC {
            return Err(Error::InvalidMagic {
                expected: Self::MAGIC,
                found: magic.to_vec(),
            });
        }

        let version = reader.read_u32::<LE>()?;
        if version != Self::VERSION {
            return Err(Error::InvalidVersion(version));
        }

        let count = reader.read_u32::<LE>()?;
        let mut members = BTreeMap::new();
        for _ in 0..count {
            let name_len = reader.read_u16::<LE>()?;
            let mut name = vec![0u8; name_len as usize];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)?;

            let data_len = reader.read_u32::<LE>()?;
            let mut data = Vec::new();
            reader.by_ref().take(u64::from(data_len)).read_to_end(&mut data)?;
            if data.len() != data_len as usize {
                return Err(Error::Truncated {
                    name,
                    expected: data_len as usize,
                    available: data.len(),
                });
            }

            members.insert(name, data);
        }

        Ok(Self { members })
    }

    /// Write the uncompressed archive to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&Self::MAGIC)?;
        writer.write_u32::<LE>(Self::VERSION)?;
        writer.write_u32::<LE>(self.members.len() as u32)?;

        for (name, data) in &self.members {
            let name_len = u16::try_from(name.len()).map_err(|_| Error::NameTooLong {
                name: name.clone(),
                len: name.len(),
            })?;
            writer.write_u16::<LE>(name_len)?;
            writer.write_all(name.as_bytes())?;
            writer.write_u32::<LE>(data.len() as u32)?;
            writer.write_all(data)?;
        }

        Ok(())
    }

    /// Encode the archive without compression.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = 12
            + self
                .members
                .iter()
                .map(|(n, d)| 6 + n.len() + d.len())
                .sum::<usize>();
        let mut out = Vec::with_capacity(size);
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.members.get(name).map(|d| d.as_slice())
    }

    /// Insert or replace a member, returning the previous data.
    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) -> Option<Vec<u8>> {
        self.members.insert(name.into(), data)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.members.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Iterate member names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|k| k.as_str())
    }

    /// Iterate `(name, data)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.members.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Keep only the members for which the predicate returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&str) -> bool) {
        self.members.retain(|name, _| f(name));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromIterator<(String, Vec<u8>)> for Archive {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress;

    fn sample() -> Archive {
        let mut archive = Archive::new();
        archive.insert("Actor/ActorLink/Foo.bxml", b"link".to_vec());
        archive.insert("/bool_data_0.bgdata", b"flags".to_vec());
        archive
    }

    #[test]
    fn test_write_then_read() {
        let archive = sample();
        let bytes = archive.to_bytes().unwrap();
        assert!(Archive::is_archive(&bytes));
        let parsed = Archive::read(&bytes).unwrap();
        assert_eq!(parsed, archive);
        assert_eq!(parsed.get("Actor/ActorLink/Foo.bxml"), Some(&b"link"[..]));
    }

    #[test]
    fn test_read_compressed() {
        let archive = sample();
        let bytes = compress(&archive.to_bytes().unwrap()).unwrap();
        assert!(Archive::is_archive(&bytes));
        assert_eq!(Archive::read(&bytes).unwrap(), archive);
    }

    #[test]
    fn test_encoding_ignores_insertion_order() {
        let mut a = Archive::new();
        a.insert("b", vec![2]);
        a.insert("a", vec![1]);
        let mut b = Archive::new();
        b.insert("a", vec![1]);
        b.insert("b", vec![2]);
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_bad_magic() {
        let err = Archive::read(b"NOPE\x01\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::InvalidMagic { .. }));
        assert!(!Archive::is_archive(b"NOPE"));
    }

    #[test]
    fn test_truncated() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            Archive::read(&bytes),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_member_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"SARC");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(b'a');
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"short");

        match Archive::read(&bytes) {
            Err(Error::Truncated {
                name,
                expected,
                available,
            }) => {
                assert_eq!(name, "a");
                assert_eq!(expected, u32::MAX as usize);
                assert_eq!(available, 5);
            }
            other => panic!("expected a truncation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_archive_names() {
        assert!(is_archive_name("Pack/Bootup.pack"));
        assert!(is_archive_name("Actor/Pack/Foo.sbactorpack"));
        assert!(is_archive_name("Pack/Bootup.pack//GameData/gamedata.ssarc"));
        assert!(!is_archive_name("Actor/ActorLink/Foo.bxml"));
    }
}

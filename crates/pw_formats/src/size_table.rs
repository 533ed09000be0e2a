//! Resource size table.
//!
//! Maps a resource name (e.g. `Actor/Pack/Foo.bactorpack`) to the number of
//! bytes the game's allocator reserves when loading it.
//!
//! # Binary layout (little endian)
//!
//! ```text
//! magic    [u8; 4]  "RSTB"
//! count    u32
//! repeated count times, sorted by name:
//!   name_len u16
//!   name     [u8; name_len]
//!   size     u32
//! ```

use crate::compression::decompress_if_needed;
use crate::error::{Error, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeTable {
    entries: BTreeMap<String, u32>,
}

impl SizeTable {
    pub const MAGIC: [u8; 4] = *b"RSTB";

    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a size table, decompressing it first if needed.
    pub fn read(data: &[u8]) -> Result<Self> {
        let raw = decompress_if_needed(data)?;
        let mut reader = Cursor::new(raw.as_ref());

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != Self::MAGIC {
            return Err(Error::InvalidMagic {
                expected: Self::MAGIC,
                found: magic.to_vec(),
            });
        }

        let count = reader.read_u32::<LE>()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let name_len = reader.read_u16::<LE>()?;
            let mut name = vec![0u8; name_len as usize];
            reader.read_exact(&mut name)?;
            let size = reader.read_u32::<LE>()?;
            entries.insert(String::from_utf8(name)?, size);
        }

        Ok(Self { entries })
    }

    /// Encode the table without compression.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_all(&Self::MAGIC)?;
        out.write_u32::<LE>(self.entries.len() as u32)?;
        for (name, size) in &self.entries {
            let name_len = u16::try_from(name.len()).map_err(|_| Error::NameTooLong {
                name: name.clone(),
                len: name.len(),
            })?;
            out.write_u16::<LE>(name_len)?;
            out.write_all(name.as_bytes())?;
            out.write_u32::<LE>(*size)?;
        }
        Ok(out)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.entries.get(name).copied()
    }

    /// Set an entry, returning the previous size.
    pub fn set(&mut self, name: impl Into<String>, size: u32) -> Option<u32> {
        self.entries.insert(name.into(), size)
    }

    pub fn remove(&mut self, name: &str) -> Option<u32> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut table = SizeTable::new();
        table.set("Actor/Pack/Foo.bactorpack", 4096);
        table.set("Map/MainField/A-1/A-1_Static.mubin", 1000);
        let parsed = SizeTable::read(&table.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(parsed.get("Actor/Pack/Foo.bactorpack"), Some(4096));
    }

    #[test]
    fn test_set_and_remove() {
        let mut table = SizeTable::new();
        assert_eq!(table.set("a", 1), None);
        assert_eq!(table.set("a", 2), Some(1));
        assert_eq!(table.remove("a"), Some(2));
        assert!(table.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        assert!(SizeTable::read(b"SARC\0\0\0\0").is_err());
    }
}

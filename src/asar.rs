//! ASAR header codec.
//!
//! Layout (all little-endian u32):
//!
//! ```text
//! [0..4]    pickle payload size marker (typically 4)
//! [4..8]    header blob size
//! [8..12]   header object size
//! [12..16]  header JSON length N
//! [16..16+N] UTF-8 JSON header
//! ```
//!
//! Entry offsets in the header are relative to `8 + header_blob_size`, which
//! includes the pickle padding after the JSON string. Using `16 + N` instead
//! skews every read by the padding width.

use serde_json::{Map, Value};
use std::io::{Read, Seek, SeekFrom};

use crate::error::{PatchError, Result};

pub const PROLOGUE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prologue {
    pub pickle_size: u32,
    pub header_blob_size: u32,
    pub header_object_size: u32,
    pub header_len: u32,
}

impl Prologue {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PROLOGUE_LEN {
            return Err(PatchError::ArchiveStructure(format!(
                "invalid asar header: need {} bytes, got {}",
                PROLOGUE_LEN,
                bytes.len()
            )));
        }
        let word =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            pickle_size: word(0),
            header_blob_size: word(4),
            header_object_size: word(8),
            header_len: word(12),
        })
    }

    /// Absolute file offset that entry offsets are relative to.
    pub fn data_base_offset(&self) -> u64 {
        8 + u64::from(self.header_blob_size)
    }
}

/// Parsed archive header. The JSON tree keeps its original key order so it
/// re-serializes to the same bytes.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub prologue: Prologue,
    pub root: Value,
}

impl ArchiveHeader {
    /// Read prologue and header JSON from the start of `reader`.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let (prologue, json) = read_raw(reader)?;
        Self::parse(prologue, &json)
    }

    pub fn parse(prologue: Prologue, json: &[u8]) -> Result<Self> {
        if prologue.data_base_offset() < (PROLOGUE_LEN as u64) + u64::from(prologue.header_len) {
            return Err(PatchError::ArchiveStructure(format!(
                "header blob size {} is smaller than header length {}",
                prologue.header_blob_size, prologue.header_len
            )));
        }
        let text = std::str::from_utf8(json)
            .map_err(|e| PatchError::ArchiveStructure(format!("header is not UTF-8: {}", e)))?;
        let root: Value = serde_json::from_str(text)
            .map_err(|e| PatchError::ArchiveStructure(format!("header JSON: {}", e)))?;
        if !root.get("files").is_some_and(Value::is_object) {
            return Err(PatchError::ArchiveStructure(
                "header has no `files` table".to_string(),
            ));
        }
        Ok(Self { prologue, root })
    }

    pub fn header_len(&self) -> usize {
        self.prologue.header_len as usize
    }

    pub fn data_base_offset(&self) -> u64 {
        self.prologue.data_base_offset()
    }

    /// Compact JSON, non-ASCII left as UTF-8, key order preserved.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.root)
            .map_err(|e| PatchError::InvariantViolation(format!("header serialization: {}", e)))
    }

    /// Serialize and refuse any result whose length differs from the original.
    pub fn serialize_in_place(&self) -> Result<Vec<u8>> {
        let bytes = self.serialize()?;
        if bytes.len() != self.header_len() {
            return Err(PatchError::InvariantViolation(format!(
                "asar header length changed {} -> {}; abort",
                self.header_len(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Metadata object of the file entry at `path`.
    pub fn entry_mut(&mut self, path: &str) -> Option<&mut Map<String, Value>> {
        let mut node = &mut self.root;
        for name in path.split('/') {
            node = node.get_mut("files")?.get_mut(name)?;
        }
        node.as_object_mut()
    }
}

/// Read the prologue and the raw header JSON bytes, starting at offset 0.
pub fn read_raw<R: Read + Seek>(reader: &mut R) -> Result<(Prologue, Vec<u8>)> {
    let mut head = [0u8; PROLOGUE_LEN];
    reader
        .seek(SeekFrom::Start(0))
        .and_then(|_| reader.read_exact(&mut head))
        .map_err(|e| PatchError::ArchiveStructure(format!("invalid asar header: {}", e)))?;
    let prologue = Prologue::parse(&head)?;

    let file_len = reader
        .seek(SeekFrom::End(0))
        .and_then(|len| reader.seek(SeekFrom::Start(PROLOGUE_LEN as u64)).map(|_| len))
        .map_err(|e| PatchError::ArchiveStructure(format!("invalid asar header: {}", e)))?;
    let header_end = PROLOGUE_LEN as u64 + u64::from(prologue.header_len);
    if header_end > file_len {
        return Err(PatchError::ArchiveStructure(format!(
            "truncated asar header ({} bytes expected, archive is {} bytes)",
            prologue.header_len, file_len
        )));
    }

    let mut json = vec![0u8; prologue.header_len as usize];
    reader.read_exact(&mut json).map_err(|e| {
        PatchError::ArchiveStructure(format!(
            "truncated asar header ({} bytes expected): {}",
            prologue.header_len, e
        ))
    })?;
    Ok((prologue, json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_archive, build_archive_with_padding, prologue_bytes};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn test_prologue_roundtrip() {
        let p = Prologue {
            pickle_size: 4,
            header_blob_size: 0x1234,
            header_object_size: 0x1230,
            header_len: 0x122d,
        };
        assert_eq!(Prologue::parse(&prologue_bytes(&p)).unwrap(), p);
    }

    #[test]
    fn test_short_prologue() {
        let err = ArchiveHeader::read_from(&mut Cursor::new(vec![4u8, 0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, PatchError::ArchiveStructure(_)));
    }

    #[test]
    fn test_truncated_header() {
        let mut bytes = build_archive(&[("a.js", b"abc")]);
        bytes.truncate(PROLOGUE_LEN + 3);
        let err = ArchiveHeader::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_header_len_past_end_of_file() {
        let prologue = Prologue {
            pickle_size: 4,
            header_blob_size: u32::MAX - 8,
            header_object_size: u32::MAX - 12,
            header_len: u32::MAX - 16,
        };
        let mut bytes = prologue_bytes(&prologue).to_vec();
        bytes.extend_from_slice(br#"{"files":{}}"#);
        let err = ArchiveHeader::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, PatchError::ArchiveStructure(_)));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_invalid_json() {
        let json = b"{not json";
        let prologue = Prologue {
            pickle_size: 4,
            header_blob_size: 20,
            header_object_size: 16,
            header_len: json.len() as u32,
        };
        let err = ArchiveHeader::parse(prologue, json).unwrap_err();
        assert!(matches!(err, PatchError::ArchiveStructure(_)));
    }

    #[test]
    fn test_missing_files_table() {
        let json = br#"{"x":1}"#;
        let prologue = Prologue {
            pickle_size: 4,
            header_blob_size: 16,
            header_object_size: 12,
            header_len: json.len() as u32,
        };
        let err = ArchiveHeader::parse(prologue, json).unwrap_err();
        assert!(err.to_string().contains("files"));
    }

    #[test]
    fn test_data_base_offset_uses_blob_size() {
        // Header JSON length deliberately not 4-aligned, plus extra padding.
        let bytes = build_archive_with_padding(&[("app/main.js", b"console.log(1)")], 6);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        let p = header.prologue;
        assert_eq!(header.data_base_offset(), 8 + u64::from(p.header_blob_size));
        assert_ne!(header.data_base_offset(), 16 + u64::from(p.header_len));

        let file = &header.root["files"]["app"]["files"]["main.js"];
        let offset: u64 = file["offset"].as_str().unwrap().parse().unwrap();
        let size = file["size"].as_u64().unwrap() as usize;
        let start = (header.data_base_offset() + offset) as usize;
        assert_eq!(&bytes[start..start + size], b"console.log(1)");
    }

    #[test]
    fn test_header_roundtrip_byte_identical() {
        let bytes = build_archive(&[
            ("index.js", b"let a = 1;"),
            ("static/日本語.js", b"x"),
            ("static/z.css", b"body{}"),
            ("a/b/c.js", b"deep"),
        ]);
        let mut cursor = Cursor::new(&bytes);
        let (_, raw) = read_raw(&mut cursor).unwrap();
        let header = ArchiveHeader::read_from(&mut cursor).unwrap();
        assert_eq!(header.serialize_in_place().unwrap(), raw);
    }

    #[test]
    fn test_non_ascii_not_escaped() {
        let bytes = build_archive(&[("ä.js", b"x")]);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        let out = String::from_utf8(header.serialize().unwrap()).unwrap();
        assert!(out.contains("\"ä.js\""));
        assert!(!out.contains("\\u"));
        assert!(!out.contains(' '));
    }

    #[test]
    fn test_length_change_rejected() {
        let bytes = build_archive(&[("a.js", b"abc")]);
        let mut header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        header
            .entry_mut("a.js")
            .unwrap()
            .insert("extra".into(), Value::Bool(true));
        let err = header.serialize_in_place().unwrap_err();
        assert!(matches!(err, PatchError::InvariantViolation(_)));
    }

    #[test]
    fn test_entry_mut_nested() {
        let bytes = build_archive(&[("a/b/c.js", b"abc"), ("d.js", b"d")]);
        let mut header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert!(header.entry_mut("a/b/c.js").is_some());
        assert!(header.entry_mut("d.js").is_some());
        assert!(header.entry_mut("a/x.js").is_none());
    }
}

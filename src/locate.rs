use serde_json::Value;

use crate::asar::ArchiveHeader;
use crate::error::{PatchError, Result};

pub const DEFAULT_SUFFIX: &str = ".js";

/// A patchable file entry with its absolute position in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

/// Walk the header tree depth-first and collect file entries whose path ends
/// with one of `suffixes`. Entries without both `offset` and `size` (unpacked
/// files, links) are left out. An offset that overflows the archive address
/// space is an `ArchiveStructure` error.
pub fn locate_entries(header: &ArchiveHeader, suffixes: &[String]) -> Result<Vec<Entry>> {
    let base = header.data_base_offset();
    let mut entries = Vec::new();
    let mut bad = None;
    walk(&header.root, "", &mut |path, node| {
        if bad.is_some() || !suffixes.iter().any(|s| path.ends_with(s.as_str())) {
            return;
        }
        let offset = node.get("offset").and_then(as_u64);
        let size = node.get("size").and_then(as_u64);
        let (Some(offset), Some(size)) = (offset, size) else {
            return;
        };
        match base.checked_add(offset) {
            Some(offset) => entries.push(Entry {
                path: path.to_string(),
                offset,
                size,
            }),
            None => bad = Some(format!("entry {} has out-of-range offset {}", path, offset)),
        }
    });
    match bad {
        Some(msg) => Err(PatchError::ArchiveStructure(msg)),
        None => Ok(entries),
    }
}

fn walk(dir: &Value, prefix: &str, visit: &mut dyn FnMut(&str, &Value)) {
    let Some(files) = dir.get("files").and_then(Value::as_object) else {
        return;
    };
    for (name, node) in files {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        if node.get("files").is_some() {
            walk(node, &path, visit);
        } else {
            visit(&path, node);
        }
    }
}

/// ASAR stores offsets as decimal strings (they can exceed 2^53); sizes are numbers.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asar::Prologue;
    use crate::test_utils::build_archive;
    use std::io::Cursor;

    fn js() -> Vec<String> {
        vec![DEFAULT_SUFFIX.to_string()]
    }

    #[test]
    fn test_depth_first_paths_and_suffix_filter() {
        let bytes = build_archive(&[
            ("index.js", b"aaa"),
            ("assets/app.js", b"bbbb"),
            ("assets/app.css", b"cc"),
            ("assets/vendor/lib.js", b"d"),
        ]);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        let entries = locate_entries(&header, &js()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["index.js", "assets/app.js", "assets/vendor/lib.js"]);

        let base = header.data_base_offset();
        assert_eq!(entries[0].offset, base);
        assert_eq!(entries[1].offset, base + 3);
        assert_eq!(entries[1].size, 4);
        assert_eq!(entries[2].offset, base + 9);
    }

    #[test]
    fn test_entries_without_offset_are_skipped() {
        let json = br#"{"files":{"a.js":{"size":3,"unpacked":true},"b.js":{"size":2,"offset":"0"},"link.js":{"link":"b.js"},"n.js":{"size":1,"offset":7}}}"#;
        let aligned = (json.len() + 3) & !3;
        let prologue = Prologue {
            pickle_size: 4,
            header_blob_size: (aligned + 8) as u32,
            header_object_size: (aligned + 4) as u32,
            header_len: json.len() as u32,
        };
        let header = ArchiveHeader::parse(prologue, json).unwrap();
        let entries = locate_entries(&header, &js()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["b.js", "n.js"]);
        assert_eq!(entries[1].offset, header.data_base_offset() + 7);
    }

    #[test]
    fn test_offset_overflow_is_structure_error() {
        let json = br#"{"files":{"a.js":{"size":1,"offset":"18446744073709551615"}}}"#;
        let aligned = (json.len() + 3) & !3;
        let prologue = Prologue {
            pickle_size: 4,
            header_blob_size: (aligned + 8) as u32,
            header_object_size: (aligned + 4) as u32,
            header_len: json.len() as u32,
        };
        let header = ArchiveHeader::parse(prologue, json).unwrap();
        let err = locate_entries(&header, &js()).unwrap_err();
        assert!(matches!(err, PatchError::ArchiveStructure(_)));
        assert!(err.to_string().contains("a.js"));
    }

    #[test]
    fn test_multiple_suffixes() {
        let bytes = build_archive(&[("a.js", b"a"), ("b.mjs", b"b"), ("c.html", b"c")]);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        let entries = locate_entries(&header, &[".js".to_string(), ".html".to_string()]).unwrap();
        assert_eq!(entries.len(), 2);
    }
}

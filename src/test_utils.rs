//! Synthetic ASAR archives for unit tests.

use serde_json::{json, Map, Value};
use std::io::Cursor;

use crate::asar::{ArchiveHeader, Prologue, PROLOGUE_LEN};
use crate::integrity::IntegrityBlock;

/// Build an archive whose header padding is exactly what pickle alignment needs.
pub fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    build_archive_with_padding(files, 0)
}

/// Build an archive with `extra` zero bytes of padding between the header JSON
/// and the data region, on top of the 4-byte pickle alignment.
pub fn build_archive_with_padding(files: &[(&str, &[u8])], extra: usize) -> Vec<u8> {
    let mut root = Map::new();
    let mut data = Vec::new();

    for (path, content) in files {
        let entry = json!({
            "size": content.len(),
            "offset": data.len().to_string(),
            "integrity": IntegrityBlock::compute(content).to_value(),
        });
        insert_path(&mut root, path, entry);
        data.extend_from_slice(content);
    }

    let header = serde_json::to_vec(&json!({ "files": Value::Object(root) })).unwrap();
    assemble(&header, &data, extra)
}

/// Lay out a prologue, header and data region the way the pickle writer does.
pub fn assemble(header: &[u8], data: &[u8], extra: usize) -> Vec<u8> {
    let aligned = (header.len() + 3) & !3;
    let padding = aligned - header.len() + extra;
    let prologue = Prologue {
        pickle_size: 4,
        header_blob_size: (header.len() + padding + 8) as u32,
        header_object_size: (header.len() + padding + 4) as u32,
        header_len: header.len() as u32,
    };

    let mut out = prologue_bytes(&prologue).to_vec();
    out.extend_from_slice(header);
    out.extend(std::iter::repeat(0u8).take(padding));
    out.extend_from_slice(data);
    out
}

pub fn prologue_bytes(p: &Prologue) -> [u8; PROLOGUE_LEN] {
    let mut out = [0u8; PROLOGUE_LEN];
    out[0..4].copy_from_slice(&p.pickle_size.to_le_bytes());
    out[4..8].copy_from_slice(&p.header_blob_size.to_le_bytes());
    out[8..12].copy_from_slice(&p.header_object_size.to_le_bytes());
    out[12..16].copy_from_slice(&p.header_len.to_le_bytes());
    out
}

fn insert_path(root: &mut Map<String, Value>, path: &str, entry: Value) {
    let mut parts: Vec<&str> = path.split('/').collect();
    let file_name = parts.pop().unwrap();
    let mut dir = root;
    for part in parts {
        dir = dir
            .entry(part.to_string())
            .or_insert_with(|| json!({ "files": {} }))["files"]
            .as_object_mut()
            .unwrap();
    }
    dir.insert(file_name.to_string(), entry);
}

/// Read the bytes of the entry at `path` from an in-memory archive.
pub fn read_entry(archive: &[u8], path: &str) -> Vec<u8> {
    let mut header = ArchiveHeader::read_from(&mut Cursor::new(archive)).unwrap();
    let base = header.data_base_offset();
    let node = header.entry_mut(path).unwrap();
    let offset: u64 = node["offset"].as_str().unwrap().parse().unwrap();
    let size = node["size"].as_u64().unwrap();
    let start = (base + offset) as usize;
    archive[start..start + size as usize].to_vec()
}

/// Integrity metadata of the entry at `path`.
pub fn entry_integrity(archive: &[u8], path: &str) -> Value {
    let mut header = ArchiveHeader::read_from(&mut Cursor::new(archive)).unwrap();
    header.entry_mut(path).unwrap()["integrity"].clone()
}

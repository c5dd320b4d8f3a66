//! Object table and object-page table — parsed for completeness, never mutated (§3, §6).

use scroll::{Pread, Pwrite, SizeWith};

use crate::error::{Error, Result};

pub const SIZEOF_OBJECT_TABLE_ENTRY: usize = 0x18;
pub const SIZEOF_OBJECT_PAGE_TABLE_ENTRY: usize = 0x4;

/// One entry of the LE object table (0x18 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
#[repr(C)]
pub struct ObjectTableEntry {
    pub virtual_size: u32,
    pub reloc_base_addr: u32,
    pub object_flags: u16,
    pub unused1: u16,
    pub page_table_index: u32,
    pub page_table_entries: u32,
    pub unused2: u32,
}

/// One entry of the LE object-page table.
///
/// This layout (`unk: u16; value: u16`) diverges from the published IBM LE
/// spec, but matches what DOS/32A actually emits; treated as opaque data
/// that round-trips unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
#[repr(C)]
pub struct ObjectPageTableEntry {
    pub unk: u16,
    pub value: u16,
}

pub fn parse_object_table(bytes: &[u8], obj_count: usize) -> Result<Vec<ObjectTableEntry>> {
    let want = obj_count * SIZEOF_OBJECT_TABLE_ENTRY;
    if bytes.len() < want {
        return Err(Error::Format(format!(
            "object table truncated: need {want} bytes, have {}",
            bytes.len()
        )));
    }
    let mut offset = 0usize;
    let mut entries = Vec::with_capacity(obj_count);
    for _ in 0..obj_count {
        entries.push(
            bytes
                .gread_with(&mut offset, scroll::LE)
                .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
        );
    }
    Ok(entries)
}

pub fn parse_object_page_table(
    bytes: &[u8],
    num_pages: usize,
) -> Result<Vec<ObjectPageTableEntry>> {
    let want = num_pages * SIZEOF_OBJECT_PAGE_TABLE_ENTRY;
    if bytes.len() < want {
        return Err(Error::Format(format!(
            "object page table truncated: need {want} bytes, have {}",
            bytes.len()
        )));
    }
    let mut offset = 0usize;
    let mut entries = Vec::with_capacity(num_pages);
    for _ in 0..num_pages {
        entries.push(
            bytes
                .gread_with(&mut offset, scroll::LE)
                .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
        );
    }
    Ok(entries)
}

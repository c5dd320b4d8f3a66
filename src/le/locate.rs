//! Walks the chain of DOS-compatible headers to find the nested LE image (§4.1).

use log::debug;
use scroll::Pread;

use crate::error::{Error, Result};

const HEADER_LEN: usize = 64;
const RELOC_TABLE_OFFSET_FIELD: usize = 0x18;
const CODE32_START_FIELD: usize = 0x3c;
const LAST_PAGE_BYTES_FIELD: usize = 0x2;
const PAGE_COUNT_FIELD: usize = 0x4;
const BOUND_RELOC_TABLE_OFFSET: u16 = 0x40;

/// Find `(mz_off, le_off)`: the start of the DOS stub that contains the LE
/// image, and the start of the LE header itself.
///
/// Walks a chain of MZ/BW headers, each one `total_size` bytes long, until it
/// finds one whose relocation table starts exactly at the bound-executable
/// offset `0x40` and whose `code32_start` field is nonzero — that's DOS/32A's
/// marker for "the LE header starts `code32_start` bytes into this stub".
pub fn search_for_le(exe: &[u8]) -> Result<(usize, usize)> {
    let mut cursor = 0usize;
    while cursor < exe.len() {
        if cursor + HEADER_LEN > exe.len() {
            return Err(Error::Format(format!(
                "truncated DOS header at 0x{cursor:x}"
            )));
        }
        let header = &exe[cursor..cursor + HEADER_LEN];
        let magic = &header[0..2];
        if magic != b"MZ" && magic != b"BW" {
            return Err(Error::Format(format!(
                "expected MZ or BW header at 0x{cursor:x}, found {magic:02x?}"
            )));
        }

        let reloc_table_offset: u16 = header
            .pread_with(RELOC_TABLE_OFFSET_FIELD, scroll::LE)
            .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
        if reloc_table_offset == BOUND_RELOC_TABLE_OFFSET {
            let code32_start: u16 = header
                .pread_with(CODE32_START_FIELD, scroll::LE)
                .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
            if code32_start != 0 {
                debug!(
                    "found LE at 0x{:x} inside stub at 0x{:x}",
                    cursor + code32_start as usize,
                    cursor
                );
                return Ok((cursor, cursor + code32_start as usize));
            }
        }

        let last_page_bytes: u16 = header
            .pread_with(LAST_PAGE_BYTES_FIELD, scroll::LE)
            .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
        let page_count: u16 = header
            .pread_with(PAGE_COUNT_FIELD, scroll::LE)
            .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
        let mut total_size = ((page_count as usize) << 9) + last_page_bytes as usize;
        // Reverse-engineered DOS/32A producer quirk: plain MZ stubs report a
        // total size 0x200 bytes larger than the actual stub length.
        if magic == b"MZ" {
            total_size = total_size.saturating_sub(0x200);
        }
        if total_size == 0 {
            return Err(Error::Format(format!(
                "zero-length DOS stub at 0x{cursor:x}, would loop forever"
            )));
        }
        cursor += total_size;
    }

    Err(Error::Format("reached end of file without finding LE header".into()))
}

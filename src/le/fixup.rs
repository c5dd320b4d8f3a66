//! The variable-length per-page fixup (relocation) record stream, §4.2 and §6.

use scroll::{Pread, Pwrite};

use crate::error::{Error, Result};

pub const CODE_OBJ: u8 = 0;
pub const DATA_OBJ: u8 = 2;

const SRC_32OFF: u8 = 0x7;
const SRC_16OFF: u8 = 0x5;
const SRC_1632PTR: u8 = 0x6;
const SRC_16SEL: u8 = 0x2;
const FLAG_32BIT: u8 = 0x10;

/// A single relocation directive the LE loader applies at load time.
///
/// `objnum` is stored 0-based here; the wire format is 1-based (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupRecord {
    Fix32Off16 { objnum: u8, srcoff: u16, data: u16 },
    Fix32Off32 { objnum: u8, srcoff: u16, data: u32 },
    Fix16Off16 { objnum: u8, srcoff: u16, data: u16 },
    Fix16Off32 { objnum: u8, srcoff: u16, data: u32 },
    Fix1632Ptr16 { objnum: u8, srcoff: u16, data: u16 },
    Fix1632Ptr32 { objnum: u8, srcoff: u16, data: u32 },
    Fix16Sel { objnum: u8, srcoff: u16 },
}

impl FixupRecord {
    /// Construct the record this engine synthesizes for every new code fixup:
    /// a 32-bit-offset, 32-bit-operand relocation (§4.5).
    pub fn new_32off_32(objnum: u8, srcoff: u16, data: u32) -> Self {
        FixupRecord::Fix32Off32 {
            objnum,
            srcoff,
            data,
        }
    }

    /// The byte offset within the page this record's relocation applies to.
    pub fn srcoff(&self) -> u16 {
        match *self {
            FixupRecord::Fix32Off16 { srcoff, .. }
            | FixupRecord::Fix32Off32 { srcoff, .. }
            | FixupRecord::Fix16Off16 { srcoff, .. }
            | FixupRecord::Fix16Off32 { srcoff, .. }
            | FixupRecord::Fix1632Ptr16 { srcoff, .. }
            | FixupRecord::Fix1632Ptr32 { srcoff, .. }
            | FixupRecord::Fix16Sel { srcoff, .. } => srcoff,
        }
    }

    pub fn objnum(&self) -> u8 {
        match *self {
            FixupRecord::Fix32Off16 { objnum, .. }
            | FixupRecord::Fix32Off32 { objnum, .. }
            | FixupRecord::Fix16Off16 { objnum, .. }
            | FixupRecord::Fix16Off32 { objnum, .. }
            | FixupRecord::Fix1632Ptr16 { objnum, .. }
            | FixupRecord::Fix1632Ptr32 { objnum, .. }
            | FixupRecord::Fix16Sel { objnum, .. } => objnum,
        }
    }

    fn src_flags(&self) -> (u8, u8) {
        match self {
            FixupRecord::Fix32Off16 { .. } => (SRC_32OFF, 0),
            FixupRecord::Fix32Off32 { .. } => (SRC_32OFF, FLAG_32BIT),
            FixupRecord::Fix16Off16 { .. } => (SRC_16OFF, 0),
            FixupRecord::Fix16Off32 { .. } => (SRC_16OFF, FLAG_32BIT),
            FixupRecord::Fix1632Ptr16 { .. } => (SRC_1632PTR, 0),
            FixupRecord::Fix1632Ptr32 { .. } => (SRC_1632PTR, FLAG_32BIT),
            FixupRecord::Fix16Sel { .. } => (SRC_16SEL, 0),
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        let (src, flags) = self.src_flags();
        buf.push(src);
        buf.push(flags);
        let mut tmp16 = [0u8; 2];
        tmp16
            .pwrite_with(self.srcoff(), 0, scroll::LE)
            .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
        buf.extend_from_slice(&tmp16);
        buf.push(self.objnum() + 1);
        match *self {
            FixupRecord::Fix32Off16 { data, .. }
            | FixupRecord::Fix16Off16 { data, .. }
            | FixupRecord::Fix1632Ptr16 { data, .. } => {
                tmp16
                    .pwrite_with(data, 0, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
                buf.extend_from_slice(&tmp16);
            }
            FixupRecord::Fix32Off32 { data, .. }
            | FixupRecord::Fix16Off32 { data, .. }
            | FixupRecord::Fix1632Ptr32 { data, .. } => {
                let mut tmp32 = [0u8; 4];
                tmp32
                    .pwrite_with(data, 0, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
                buf.extend_from_slice(&tmp32);
            }
            FixupRecord::Fix16Sel { .. } => {}
        }
        Ok(())
    }
}

/// Decode every record in one page's fixup-record slice, in order.
pub fn fixups_decode(buf: &[u8]) -> Result<Vec<FixupRecord>> {
    let mut offset = 0usize;
    let mut out = Vec::new();
    while offset < buf.len() {
        let start = offset;
        let src: u8 = buf
            .gread_with(&mut offset, scroll::LE)
            .map_err(|e| Error::Format(format!("truncated fixup record at 0x{start:x}: {e}")))?;
        let flags: u8 = buf
            .gread_with(&mut offset, scroll::LE)
            .map_err(|e| Error::Format(format!("truncated fixup record at 0x{start:x}: {e}")))?;
        let srcoff: u16 = buf
            .gread_with(&mut offset, scroll::LE)
            .map_err(|e| Error::Format(format!("truncated fixup record at 0x{start:x}: {e}")))?;
        let objnum_raw: u8 = buf
            .gread_with(&mut offset, scroll::LE)
            .map_err(|e| Error::Format(format!("truncated fixup record at 0x{start:x}: {e}")))?;
        let objnum = objnum_raw.wrapping_sub(1);
        let wide = flags & FLAG_32BIT != 0;

        let record = match src {
            SRC_32OFF if wide => FixupRecord::Fix32Off32 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_32OFF => FixupRecord::Fix32Off16 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_16OFF if wide => FixupRecord::Fix16Off32 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_16OFF => FixupRecord::Fix16Off16 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_1632PTR if wide => FixupRecord::Fix1632Ptr32 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_1632PTR => FixupRecord::Fix1632Ptr16 {
                objnum,
                srcoff,
                data: buf
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            },
            SRC_16SEL => FixupRecord::Fix16Sel { objnum, srcoff },
            other => {
                return Err(Error::Format(format!(
                    "unrecognized fixup src byte 0x{other:x} at 0x{start:x}"
                )))
            }
        };
        out.push(record);
    }
    Ok(out)
}

/// Encode a page's fixup records back to their wire format, in order.
pub fn fixups_encode(records: &[FixupRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        record.encode_into(&mut buf)?;
    }
    Ok(buf)
}

/// Sequence of `module_num_pages + 1` cumulative offsets into the fixup
/// record table (§3). Non-decreasing; the final entry is the total record
/// table length.
#[derive(Debug, Clone, Default)]
pub struct FixupPageTable {
    pub offsets: Vec<u32>,
}

impl FixupPageTable {
    pub fn parse(bytes: &[u8], num_pages: usize) -> Result<Self> {
        let want = 4 * (num_pages + 1);
        if bytes.len() < want {
            return Err(Error::Format(format!(
                "fixup page table truncated: need {want} bytes, have {}",
                bytes.len()
            )));
        }
        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(num_pages + 1);
        for _ in 0..=num_pages {
            offsets.push(
                bytes
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(e.to_string()))?,
            );
        }
        Ok(FixupPageTable { offsets })
    }

    /// Build a fresh table from the serialized length of each page's record bytes.
    pub fn from_page_lengths(lengths: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut acc = 0u32;
        for &len in lengths {
            offsets.push(acc);
            acc += len as u32;
        }
        offsets.push(acc);
        FixupPageTable { offsets }
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.offsets.len() * 4);
        for &v in &self.offsets {
            let mut tmp = [0u8; 4];
            tmp.pwrite_with(v, 0, scroll::LE)
                .map_err(|e: scroll::Error| Error::Format(e.to_string()))?;
            buf.extend_from_slice(&tmp);
        }
        Ok(buf)
    }

    /// Slice out page `i`'s portion of the concatenated record table.
    pub fn page_slice<'a>(&self, records: &'a [u8], i: usize) -> &'a [u8] {
        &records[self.offsets[i] as usize..self.offsets[i + 1] as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_32off_32_roundtrip() {
        let input = [0x07, 0x10, 0x34, 0x12, 0x03, 0xef, 0xbe, 0xad, 0xde];
        let records = fixups_decode(&input).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            FixupRecord::Fix32Off32 {
                objnum: 2,
                srcoff: 0x1234,
                data: 0xdeadbead,
            }
        );
        assert_eq!(fixups_encode(&records).unwrap(), input);
    }

    #[test]
    fn decode_32off_16_roundtrip() {
        let input = [0x07, 0x00, 0x00, 0x00, 0x01, 0x42, 0x00];
        let records = fixups_decode(&input).unwrap();
        assert_eq!(
            records[0],
            FixupRecord::Fix32Off16 {
                objnum: 0,
                srcoff: 0,
                data: 0x42,
            }
        );
        assert_eq!(fixups_encode(&records).unwrap(), input);
    }

    #[test]
    fn decode_16sel_roundtrip() {
        let input = [0x02, 0x00, 0x00, 0x00, 0x01];
        let records = fixups_decode(&input).unwrap();
        assert_eq!(
            records[0],
            FixupRecord::Fix16Sel {
                objnum: 0,
                srcoff: 0,
            }
        );
        assert_eq!(fixups_encode(&records).unwrap(), input);
    }

    #[test]
    fn decode_multi_record_stream() {
        let mut input = Vec::new();
        input.extend_from_slice(&[0x07, 0x10, 0x34, 0x12, 0x03, 0xef, 0xbe, 0xad, 0xde]);
        input.extend_from_slice(&[0x05, 0x00, 0x10, 0x00, 0x02, 0x01, 0x00]);
        input.extend_from_slice(&[0x06, 0x10, 0x20, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
        let records = fixups_decode(&input).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(fixups_encode(&records).unwrap(), input);
    }

    #[test]
    fn unrecognized_src_is_format_error() {
        let err = fixups_decode(&[0xff, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn page_table_from_lengths_is_monotonic() {
        let table = FixupPageTable::from_page_lengths(&[9, 0, 7]);
        assert_eq!(table.offsets, vec![0, 9, 9, 16]);
    }
}

//! Owns the parsed LE container end to end: header, tables, patchable pages,
//! and the writer that reassembles a new image from the mutated state (§3, §6).

use log::{debug, info};

use crate::error::{Error, Result};
use crate::le::fixup::{fixups_decode, fixups_encode, FixupPageTable, FixupRecord};
use crate::le::header::{LEHeader, SIZEOF_LE_HEADER};
use crate::le::locate::search_for_le;
use crate::le::object::{parse_object_page_table, parse_object_table, ObjectPageTableEntry, ObjectTableEntry};

/// A parsed LE image, ready for the patch engine to mutate `pages` and
/// `fixup_records` in place.
pub struct Image {
    pub mz_off: usize,
    pub le_off: usize,
    pub header: LEHeader,
    pub object_table: Vec<ObjectTableEntry>,
    pub object_page_table: Vec<ObjectPageTableEntry>,
    /// Per-page decoded fixup records; index `i` holds page `i`'s records.
    pub fixup_records: Vec<Vec<FixupRecord>>,
    /// Mutable copy of the data-pages region (code + data objects).
    pub pages: Vec<u8>,

    /// Bytes between the original `import_module_table_offset` and the
    /// original `data_pages_offset`, preserved verbatim by the writer.
    pub(crate) post_fixup_blob: Vec<u8>,
    /// The untouched input buffer, used by the writer to copy the leading
    /// MZ/BW stub and the loader section verbatim.
    pub(crate) original: Vec<u8>,
}

impl Image {
    pub fn parse(bytes: &[u8]) -> Result<Image> {
        let (mz_off, le_off) = search_for_le(bytes)?;
        let header = LEHeader::parse(&bytes[le_off..])?;
        let num_pages = header.module_num_pages as usize;

        let fixup_page_table = {
            let start = le_off + header.fixup_page_table_offset as usize;
            let end = start + 4 * (num_pages + 1);
            let slice = bytes
                .get(start..end)
                .ok_or_else(|| Error::Format("fixup page table out of bounds".into()))?;
            FixupPageTable::parse(slice, num_pages)?
        };

        let record_table_start = le_off + header.fixup_record_table_offset as usize;
        let record_table_len = *fixup_page_table.offsets.last().unwrap_or(&0) as usize;
        let record_table = bytes
            .get(record_table_start..record_table_start + record_table_len)
            .ok_or_else(|| Error::Format("fixup record table out of bounds".into()))?;

        let mut fixup_records = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let page_bytes = fixup_page_table.page_slice(record_table, i);
            fixup_records.push(fixups_decode(page_bytes)?);
        }

        let object_table = {
            let start = le_off + header.obj_table_offset as usize;
            let slice = bytes
                .get(start..)
                .ok_or_else(|| Error::Format("object table out of bounds".into()))?;
            parse_object_table(slice, header.obj_count as usize)?
        };
        let object_page_table = {
            let start = le_off + header.obj_page_table_offset as usize;
            let slice = bytes
                .get(start..)
                .ok_or_else(|| Error::Format("object page table out of bounds".into()))?;
            parse_object_page_table(slice, num_pages)?
        };

        let data_pages_start = mz_off + header.data_pages_offset as usize;
        let pages = bytes
            .get(data_pages_start..)
            .ok_or_else(|| Error::Format("data pages offset out of bounds".into()))?
            .to_vec();

        let post_fixup_start = le_off + header.import_module_table_offset as usize;
        let post_fixup_end = data_pages_start;
        let post_fixup_blob = bytes
            .get(post_fixup_start..post_fixup_end)
            .ok_or_else(|| Error::Format("import/debug section out of bounds".into()))?
            .to_vec();

        info!(
            "parsed LE image: mz_off=0x{mz_off:x} le_off=0x{le_off:x} pages={num_pages} data_pages_len={}",
            pages.len()
        );

        Ok(Image {
            mz_off,
            le_off,
            header,
            object_table,
            object_page_table,
            fixup_records,
            pages,
            post_fixup_blob,
            original: bytes.to_vec(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    /// Re-serialize the header, fixup tables, preserved blob, and patched
    /// pages into a fresh output image (§6 output layout).
    pub fn write(&self) -> Result<Vec<u8>> {
        let fixup_output: Vec<Vec<u8>> = self
            .fixup_records
            .iter()
            .map(|records| fixups_encode(records))
            .collect::<Result<_>>()?;
        let lengths: Vec<usize> = fixup_output.iter().map(Vec::len).collect();
        let page_table = FixupPageTable::from_page_lengths(&lengths);
        let page_table_bytes = page_table.write()?;
        let record_bytes: Vec<u8> = fixup_output.into_iter().flatten().collect();

        debug_assert!(
            page_table.offsets.windows(2).all(|w| w[0] <= w[1]),
            "fixup page table must be non-decreasing"
        );
        debug_assert_eq!(*page_table.offsets.last().unwrap(), record_bytes.len() as u32);

        let mut header = self.header;
        header.fixup_record_table_offset =
            header.fixup_page_table_offset + page_table_bytes.len() as u32;
        header.fixup_section_size = (page_table_bytes.len() + record_bytes.len()) as u32;
        header.fixup_section_csum = 0;
        header.import_module_table_offset =
            header.fixup_page_table_offset + header.fixup_section_size;
        header.import_proc_table_offset = header.import_module_table_offset;
        header.data_pages_offset = (self.le_off as u64 + header.import_module_table_offset as u64
            + self.post_fixup_blob.len() as u64
            - self.mz_off as u64) as u32;

        debug!(
            "rewriting LE header: fixup_record_table_offset=0x{:x} fixup_section_size=0x{:x} import_module_table_offset=0x{:x} data_pages_offset=0x{:x}",
            header.fixup_record_table_offset,
            header.fixup_section_size,
            header.import_module_table_offset,
            header.data_pages_offset
        );

        let mut out = Vec::with_capacity(self.original.len() + self.pages.len());
        out.extend_from_slice(&self.original[..self.le_off]);
        header.write(&mut out)?;

        let loader_start = self.le_off + SIZEOF_LE_HEADER;
        let loader_end = self.le_off + self.header.fixup_page_table_offset as usize;
        out.extend_from_slice(&self.original[loader_start..loader_end]);

        out.extend_from_slice(&page_table_bytes);
        out.extend_from_slice(&record_bytes);
        out.extend_from_slice(&self.post_fixup_blob);
        out.extend_from_slice(&self.pages);

        Ok(out)
    }
}

//! The fixed-layout LE (Linear Executable) header, §6.

use log::debug;
use scroll::{Pread, Pwrite};

use crate::error::{Error, Result};

pub const LE_MAGIC: [u8; 2] = *b"LE";

/// All of the fields DOS/32A's LE header defines, parsed in file order.
///
/// Every offset field below is relative to the LE header's own start
/// (`le_off`), with the sole exception of [`LEHeader::data_pages_offset`],
/// which is relative to the enclosing MZ/BW stub (`mz_off`) — see §4.1.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LEHeader {
    pub byte_order: u8,
    pub word_order: u8,
    pub format_level: u32,
    pub cpu_type: u16,
    pub os_type: u16,
    pub module_version: u32,
    pub module_flags: u32,
    pub module_num_pages: u32,
    pub eip_obj_num: u32,
    pub eip: u32,
    pub esp_obj_num: u32,
    pub esp: u32,
    pub page_size: u32,
    pub page_offset_shift: u32,
    pub fixup_section_size: u32,
    pub fixup_section_csum: u32,
    pub loader_section_size: u32,
    pub loader_section_csum: u32,
    pub obj_table_offset: u32,
    pub obj_count: u32,
    pub obj_page_table_offset: u32,
    pub obj_iter_pages_offset: u32,
    pub res_table_offset: u32,
    pub res_count: u32,
    pub resident_name_table_offset: u32,
    pub entry_table_offset: u32,
    pub module_directives_offset: u32,
    pub module_directives_count: u32,
    pub fixup_page_table_offset: u32,
    pub fixup_record_table_offset: u32,
    pub import_module_table_offset: u32,
    pub import_module_count: u32,
    pub import_proc_table_offset: u32,
    pub per_page_csum_offset: u32,
    pub data_pages_offset: u32,
    pub preload_pages_count: u32,
    pub nonres_name_table_offset: u32,
    pub nonres_name_table_length: u32,
    pub nonres_name_table_csum: u32,
    pub auto_ds_object_count: u32,
    pub debug_info_offset: u32,
    pub debug_info_length: u32,
    pub instance_preload_count: u32,
    pub instance_demand_count: u32,
    pub heap_size: u32,
    pub stack_size: u32,
}

/// Size of the serialized header, i.e. `2 (magic) + 2 (orders) + 4 + 2 + 2 + 41 * 4`.
pub const SIZEOF_LE_HEADER: usize = 2 + 1 + 1 + 4 + 2 + 2 + 41 * 4;

impl LEHeader {
    /// Parse the header at `bytes[0..]`, i.e. the caller has already sliced to `le_off`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let magic: [u8; 2] = [
            bytes
                .pread(offset)
                .map_err(|_| Error::Format("truncated LE header".into()))?,
            bytes
                .pread(offset + 1)
                .map_err(|_| Error::Format("truncated LE header".into()))?,
        ];
        if magic != LE_MAGIC {
            return Err(Error::Format(format!(
                "expected LE magic, found {magic:02x?}"
            )));
        }
        offset += 2;

        macro_rules! field {
            ($ty:ty) => {{
                let v: $ty = bytes
                    .gread_with(&mut offset, scroll::LE)
                    .map_err(|e| Error::Format(format!("truncated LE header: {e}")))?;
                v
            }};
        }

        let header = LEHeader {
            byte_order: field!(u8),
            word_order: field!(u8),
            format_level: field!(u32),
            cpu_type: field!(u16),
            os_type: field!(u16),
            module_version: field!(u32),
            module_flags: field!(u32),
            module_num_pages: field!(u32),
            eip_obj_num: field!(u32),
            eip: field!(u32),
            esp_obj_num: field!(u32),
            esp: field!(u32),
            page_size: field!(u32),
            page_offset_shift: field!(u32),
            fixup_section_size: field!(u32),
            fixup_section_csum: field!(u32),
            loader_section_size: field!(u32),
            loader_section_csum: field!(u32),
            obj_table_offset: field!(u32),
            obj_count: field!(u32),
            obj_page_table_offset: field!(u32),
            obj_iter_pages_offset: field!(u32),
            res_table_offset: field!(u32),
            res_count: field!(u32),
            resident_name_table_offset: field!(u32),
            entry_table_offset: field!(u32),
            module_directives_offset: field!(u32),
            module_directives_count: field!(u32),
            fixup_page_table_offset: field!(u32),
            fixup_record_table_offset: field!(u32),
            import_module_table_offset: field!(u32),
            import_module_count: field!(u32),
            import_proc_table_offset: field!(u32),
            per_page_csum_offset: field!(u32),
            data_pages_offset: field!(u32),
            preload_pages_count: field!(u32),
            nonres_name_table_offset: field!(u32),
            nonres_name_table_length: field!(u32),
            nonres_name_table_csum: field!(u32),
            auto_ds_object_count: field!(u32),
            debug_info_offset: field!(u32),
            debug_info_length: field!(u32),
            instance_preload_count: field!(u32),
            instance_demand_count: field!(u32),
            heap_size: field!(u32),
            stack_size: field!(u32),
        };

        debug_assert_eq!(offset, SIZEOF_LE_HEADER);
        if header.module_num_pages == 0 {
            return Err(Error::Format("LE header has zero pages".into()));
        }
        if header.fixup_record_table_offset <= header.fixup_page_table_offset {
            return Err(Error::Format(
                "fixup_record_table_offset must follow fixup_page_table_offset".into(),
            ));
        }
        debug!(
            "parsed LE header: {} pages, page_size=0x{:x}, obj_count={}",
            header.module_num_pages, header.page_size, header.obj_count
        );
        Ok(header)
    }

    /// Serialize the header back to its on-disk layout.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&LE_MAGIC);
        buf.push(self.byte_order);
        buf.push(self.word_order);
        // `scroll`'s `Pwrite` needs a pre-sized destination, so grow the
        // buffer field-by-field through a small scratch array instead.
        macro_rules! push_u16 {
            ($v:expr) => {{
                let mut tmp = [0u8; 2];
                tmp.pwrite_with($v, 0, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(format!("writing LE header field: {e}")))?;
                buf.extend_from_slice(&tmp);
            }};
        }
        macro_rules! push_u32 {
            ($v:expr) => {{
                let mut tmp = [0u8; 4];
                tmp.pwrite_with($v, 0, scroll::LE)
                    .map_err(|e: scroll::Error| Error::Format(format!("writing LE header field: {e}")))?;
                buf.extend_from_slice(&tmp);
            }};
        }
        push_u32!(self.format_level);
        push_u16!(self.cpu_type);
        push_u16!(self.os_type);
        push_u32!(self.module_version);
        push_u32!(self.module_flags);
        push_u32!(self.module_num_pages);
        push_u32!(self.eip_obj_num);
        push_u32!(self.eip);
        push_u32!(self.esp_obj_num);
        push_u32!(self.esp);
        push_u32!(self.page_size);
        push_u32!(self.page_offset_shift);
        push_u32!(self.fixup_section_size);
        push_u32!(self.fixup_section_csum);
        push_u32!(self.loader_section_size);
        push_u32!(self.loader_section_csum);
        push_u32!(self.obj_table_offset);
        push_u32!(self.obj_count);
        push_u32!(self.obj_page_table_offset);
        push_u32!(self.obj_iter_pages_offset);
        push_u32!(self.res_table_offset);
        push_u32!(self.res_count);
        push_u32!(self.resident_name_table_offset);
        push_u32!(self.entry_table_offset);
        push_u32!(self.module_directives_offset);
        push_u32!(self.module_directives_count);
        push_u32!(self.fixup_page_table_offset);
        push_u32!(self.fixup_record_table_offset);
        push_u32!(self.import_module_table_offset);
        push_u32!(self.import_module_count);
        push_u32!(self.import_proc_table_offset);
        push_u32!(self.per_page_csum_offset);
        push_u32!(self.data_pages_offset);
        push_u32!(self.preload_pages_count);
        push_u32!(self.nonres_name_table_offset);
        push_u32!(self.nonres_name_table_length);
        push_u32!(self.nonres_name_table_csum);
        push_u32!(self.auto_ds_object_count);
        push_u32!(self.debug_info_offset);
        push_u32!(self.debug_info_length);
        push_u32!(self.instance_preload_count);
        push_u32!(self.instance_demand_count);
        push_u32!(self.heap_size);
        push_u32!(self.stack_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> LEHeader {
        LEHeader {
            module_num_pages: 3,
            eip_obj_num: 1,
            esp_obj_num: 1,
            page_size: 0x1000,
            obj_table_offset: 176,
            obj_count: 1,
            obj_page_table_offset: 200,
            fixup_page_table_offset: 220,
            fixup_record_table_offset: 228,
            import_module_table_offset: 228,
            import_proc_table_offset: 228,
            data_pages_offset: 300,
            ..Default::default()
        }
    }

    #[test]
    fn write_then_parse_roundtrips() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SIZEOF_LE_HEADER);

        let parsed = LEHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_rejects_wrong_magic() {
        let mut buf = vec![0u8; SIZEOF_LE_HEADER];
        buf[0..2].copy_from_slice(b"XX");
        let err = LEHeader::parse(&buf).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn parse_rejects_truncated_bytes() {
        let mut buf = Vec::new();
        sample_header().write(&mut buf).unwrap();
        buf.truncate(SIZEOF_LE_HEADER - 4);
        let err = LEHeader::parse(&buf).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn parse_rejects_zero_pages() {
        let mut header = sample_header();
        header.module_num_pages = 0;
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let err = LEHeader::parse(&buf).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn parse_rejects_fixup_record_table_not_after_page_table() {
        let mut header = sample_header();
        header.fixup_record_table_offset = header.fixup_page_table_offset;
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let err = LEHeader::parse(&buf).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}

//! Splices assembled payloads into the data pages and keeps the fixup tables
//! consistent with the patched bytes (§4.5).

use iced_x86::{Code, Decoder, DecoderOptions};
use log::{debug, warn};
use scroll::Pread;

use crate::error::Result;
use crate::le::fixup::{FixupRecord, CODE_OBJ, DATA_OBJ};
use crate::le::image::Image;

/// A code-page patch: raw instruction bytes spliced at a CS-relative offset.
pub struct CodePatch {
    pub payload: Vec<u8>,
    pub offset: u32,
}

/// A data-page patch: raw bytes spliced at a DS-relative offset, no fixup work.
pub struct DataPatch {
    pub payload: Vec<u8>,
    pub offset: u32,
}

/// Operand-offset-from-instruction-start and target object for each opcode
/// form the synthesizer knows how to re-fixup (§4.5 table). Returns `None`
/// if `code` needs no fixup emitted at all.
fn operand_offset(code: Code, has_memory_displacement: bool) -> Option<(u32, u8)> {
    use Code::*;
    match code {
        Add_rm32_r32 | Mov_rm32_imm32 | And_r8_rm8 | Test_rm8_imm8 | Cmp_r32_rm32
        | Cmp_rm8_imm8 | Mov_r8_rm8 | Mov_r32_rm32 | Add_r32_rm32 | And_rm8_imm8 => {
            Some((2, DATA_OBJ))
        }
        Mov_rm32_r32 | Sub_rm32_r32 if has_memory_displacement => Some((2, DATA_OBJ)),
        Mov_AL_moffs8 | Mov_moffs32_EAX | Mov_EAX_moffs32 => Some((1, DATA_OBJ)),
        Mov_rm16_imm16 => Some((3, DATA_OBJ)),
        Jmp_rm32 => Some((3, CODE_OBJ)),
        _ => None,
    }
}

/// Remove every decoded fixup whose absolute source address
/// `page_index * page_size + srcoff` lies within `[range_start, range_end)`.
fn remove_obsolete_fixups(image: &mut Image, range_start: u32, range_end: u32) {
    let page_size = image.page_size() as u32;
    let first_page = (range_start / page_size) as usize;
    let last_page = ((range_end.saturating_sub(1)) / page_size) as usize;

    for page in first_page..=last_page.min(image.fixup_records.len().saturating_sub(1)) {
        let page_base = page as u32 * page_size;
        let records = &mut image.fixup_records[page];
        let mut remove = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let abs = page_base + record.srcoff() as u32;
            if abs >= range_start && abs < range_end {
                remove.push(i);
            }
        }
        for &i in remove.iter().rev() {
            debug!("dropping obsolete fixup at page {page} srcoff 0x{:x}", records[i].srcoff());
            records.remove(i);
        }
    }
}

/// Decode `payload` as 32-bit x86 and emit a new `fix_32off_32` record for
/// every instruction form in the opcode dispatch table.
fn synthesize_fixups(image: &mut Image, payload: &[u8], offset: u32) -> Result<()> {
    let page_size = image.page_size() as u32;
    let mut decoder = Decoder::with_ip(32, payload, 0, DecoderOptions::NONE);
    while decoder.can_decode() {
        let instr = decoder.decode();
        let has_displ = instr.memory_displacement32() != 0;
        let end = instr.ip() as u32 + instr.len() as u32;
        let instr_bytes = &payload[instr.ip() as usize..end as usize];

        match operand_offset(instr.code(), has_displ) {
            Some((op_off, objnum)) => {
                let data: u32 = instr_bytes
                    .pread_with(op_off as usize, scroll::LE)
                    .map_err(|e: scroll::Error| crate::error::Error::Format(e.to_string()))?;
                let absolute_offset = offset + instr.ip() as u32;
                let page = (absolute_offset / page_size) as usize;
                let srcoff = (absolute_offset % page_size) as u16 + op_off as u16;
                let record = FixupRecord::new_32off_32(objnum, srcoff, data);
                debug!(
                    "synthesized fixup for {:?} at page {page} srcoff 0x{:x} -> data 0x{:x}",
                    instr.code(),
                    srcoff,
                    data
                );
                image.fixup_records[page].push(record);
            }
            None if instr.is_ip_rel_memory_operand() || has_displ => {
                warn!(
                    "instruction {:?} touches memory but isn't in the fixup-offset table; no fixup emitted",
                    instr.code()
                );
            }
            None => {}
        }
    }
    Ok(())
}

/// Apply one code patch: drop stale fixups, splice the payload, synthesize new fixups.
pub fn apply_code_patch(image: &mut Image, patch: &CodePatch) -> Result<()> {
    let start = patch.offset;
    let end = start + patch.payload.len() as u32;
    remove_obsolete_fixups(image, start, end);
    let start_us = start as usize;
    let end_us = end as usize;
    image.pages[start_us..end_us].copy_from_slice(&patch.payload);
    synthesize_fixups(image, &patch.payload, start)
}

/// Apply one data patch: a plain splice, no fixup work.
pub fn apply_data_patch(image: &mut Image, patch: &DataPatch) {
    let start = patch.offset as usize;
    let end = start + patch.payload.len();
    image.pages[start..end].copy_from_slice(&patch.payload);
}

//! Thin facade over `iced-x86`'s 32-bit encoder for building labelled
//! instruction sequences (§4.4).

use iced_x86::{BlockEncoder, BlockEncoderOptions, Instruction, InstructionBlock, MemoryOperand, Register};

use crate::error::{Error, Result};

/// Builds a sequence of 32-bit instructions and resolves any labels they
/// reference into raw bytes.
///
/// The label counter lives here, not in a `static`, so a fresh `Assembler`
/// per patch keeps the library reusable across repeated calls in one process.
pub struct Assembler {
    next_label: u64,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler { next_label: 1 }
    }

    /// Allocate a fresh label id, usable as an instruction's `ip` stamp or a
    /// branch target via [`Instruction::with_branch`]-style constructors.
    pub fn create_label(&mut self) -> u64 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Stamp `label` onto `instr` so `BlockEncoder` treats it as that label's definition site.
    pub fn add_label(&self, mut instr: Instruction, label: u64) -> Instruction {
        instr.set_ip(label);
        instr
    }

    /// `[absolute displacement]`, 32-bit, no base/index register.
    pub fn memory(&self, displ: u32) -> MemoryOperand {
        MemoryOperand::new(
            Register::None,
            Register::None,
            1,
            displ as i64,
            4,
            false,
            Register::None,
        )
    }

    /// Encode `instructions` at virtual address 0, resolving labels, and return raw bytes.
    pub fn assemble(&self, instructions: Vec<Instruction>) -> Result<Vec<u8>> {
        let block = InstructionBlock::new(&instructions, 0);
        let result = BlockEncoder::encode(32, block, BlockEncoderOptions::NONE)
            .map_err(|e| Error::Assemble(e.to_string()))?;
        Ok(result.code_buffer)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::Code;

    #[test]
    fn assembles_nop_sled() {
        let asm = Assembler::new();
        let instructions = vec![Instruction::with(Code::Nopd); 4];
        let bytes = asm.assemble(instructions).unwrap();
        assert_eq!(bytes, vec![0x90, 0x90, 0x90, 0x90]);
    }

    #[test]
    fn labels_are_per_instance() {
        let mut a = Assembler::new();
        let mut b = Assembler::new();
        assert_eq!(a.create_label(), b.create_label());
        assert_ne!(a.create_label(), a.create_label());
    }
}

//! Declarative patch builders: each resolves the data-segment variables it
//! needs from the data pages, assembles its payload, and returns the
//! `CodePatch`/`DataPatch` values for the engine to apply (§4.6).

use iced_x86::{Code, Instruction, Register};

use crate::asm::Assembler;
use crate::error::Result;
use crate::options::{Game, PatchOptions};
use crate::patch::engine::{CodePatch, DataPatch};
use crate::search::{find_offset, find_variable};

/// `iced-x86`'s instruction constructors validate operand/code compatibility
/// at runtime; fold that into our error type at each call site.
macro_rules! ins {
    ($e:expr) => {
        $e.map_err(|e: iced_x86::IcedError| crate::error::Error::Assemble(e.to_string()))?
    };
}

/// Data-segment variable addresses resolved once per run and shared across patches.
#[derive(Debug)]
pub struct Variables {
    pub movement_rot_angle: u32,
    pub movement_tilt_angle: u32,
    pub movement_tilt_angle_last: u32,
    pub movement_tilt_angle_bottom: u32,
    pub movement_tilt_angle_top: u32,
    pub movement_strafe: u32,
    pub keyboard_state: u32,
    pub movement_fwd_veloc_world: u32,
    pub movement_strafe_veloc_world: u32,
    pub movement_eye_level_incr: u32,
    pub movement_eye_level: u32,
    pub movement_eye_level_max: u32,
    pub movement_eye_level_min: u32,
    pub movement_eye_level_restore: u32,

    pub using_alien_abductor: Option<u32>,
    pub abductor_state: Option<u32>,
    pub abductor_dpad: Option<u32>,
    pub fake_key_input: Option<u32>,
    pub mouse_unbounded_x_mod: Option<u32>,
    pub mouse_unbounded_y_mod: Option<u32>,
}

pub fn resolve_variables(pages: &[u8], game: Game) -> Result<Variables> {
    let movement_rot_angle = find_variable(
        pages,
        r"(?s-u)\xa3(....)\xc1\xf8\x10\xe8....\xa1....",
        "head rotation angle",
    )?;
    let movement_tilt_angle = find_variable(
        pages,
        r"(?s-u)\xc7\x05(....)\x2c\x01\x00\x00",
        "head tilt angle",
    )?;
    let movement_tilt_angle_last = find_variable(
        pages,
        r"(?s-u)\xa3(....)\xa1....\x0b\xc0\x74\x2c",
        "last head tilt angle",
    )?;
    let movement_tilt_angle_bottom = find_variable(
        pages,
        r"(?s-u)\xa1(....)\xa3....\xa3....\x0f\xb6\x1d....",
        "min head tilt angle",
    )?;
    let movement_tilt_angle_top = find_variable(
        pages,
        r"(?s-u)\xa1(....)\xa3....\xa3....\xa1....\x0b\xc0",
        "max head tilt angle",
    )?;
    let movement_strafe = find_variable(
        pages,
        r"(?s-u)\x83\x25(....)\xfc\x66\x0f....",
        "strafe flag",
    )?;
    let keyboard_state = find_variable(
        pages,
        r"(?s-u)\xb9\x2c\x00\x00\x00\xbf(....)",
        "keyboard state array",
    )?;
    let movement_fwd_veloc_world = find_variable(
        pages,
        r"(?s-u)\xf7\x2d....\x0f\xac\xd0\x10\xa3(....)\x8b\xc1",
        "forward velocity",
    )?;
    let movement_strafe_veloc_world = find_variable(
        pages,
        r"(?s-u)\x0b\xed\x79\x02\xf7\xd8\xa3(....)\xc3",
        "strafe velocity",
    )?;
    let movement_eye_level_incr = find_variable(
        pages,
        r"(?s-u)\x80\xa0....\x01\x80\xa3....\x01\xa1(....)",
        "eye level increment",
    )?;
    let movement_eye_level = find_variable(
        pages,
        r"(?s-u)\x80\xa0....\x01\x80\xa3....\x01\xa1....\x29\x05(....)",
        "eye level",
    )?;
    let movement_eye_level_max = find_variable(
        pages,
        r"(?s-u)\xc1\xe1\x0c\x03\xc1\xa3(....)",
        "max eye level",
    )?;
    let movement_eye_level_min = find_variable(
        pages,
        r"(?s-u)\x83\xf8\x00\x74\x1f\xe8....\x2b\x05(....)",
        "min eye level",
    )?;
    let movement_eye_level_restore = find_variable(
        pages,
        r"(?s-u)\x2b\xd0\x89\x15(....)",
        "default eye level",
    )?;

    let mut vars = Variables {
        movement_rot_angle,
        movement_tilt_angle,
        movement_tilt_angle_last,
        movement_tilt_angle_bottom,
        movement_tilt_angle_top,
        movement_strafe,
        keyboard_state,
        movement_fwd_veloc_world,
        movement_strafe_veloc_world,
        movement_eye_level_incr,
        movement_eye_level,
        movement_eye_level_max,
        movement_eye_level_min,
        movement_eye_level_restore,
        using_alien_abductor: None,
        abductor_state: None,
        abductor_dpad: None,
        fake_key_input: None,
        mouse_unbounded_x_mod: None,
        mouse_unbounded_y_mod: None,
    };

    if game == Game::PandoraDirective {
        vars.using_alien_abductor = Some(find_variable(
            pages,
            r"(?s-u)\x88\x45\xfc\xf6\x45\xfc\x02\x75\x05\xe8....\xe8....\xc6\x05(....)\x01",
            "Alien Abductor flag",
        )?);
        vars.abductor_state = Some(find_variable(
            pages,
            r"(?s-u)\x8b\x45\xf0\x80\x88....\x02\x80\x3d(....)\x02",
            "Alien Abductor state",
        )?);
        vars.abductor_dpad = Some(find_variable(
            pages,
            r"(?s-u)\xf7\xd8\x89\x45\xf8\xf6\x05(....)\x04",
            "Alien Abductor directional pad state",
        )?);
        vars.fake_key_input = Some(find_variable(
            pages,
            r"(?s-u)\xc7\x45\xf4\x00\x00\x00\x00\xc7\x45\xfc(....)\x8b\x45\xfc",
            "Alien Abductor key input buffer",
        )?);
        vars.mouse_unbounded_x_mod = Some(find_variable(
            pages,
            r"(?s-u)\xe9\x1f\x02\x00\x00\xc7\x45\xfc\x0c\x00\x00\x00\x66\xc7\x05(....)\x00\x00\x66\xc7\x05....\x00\x00",
            "Alien Abductor mouse X buffer",
        )?);
        vars.mouse_unbounded_y_mod = Some(find_variable(
            pages,
            r"(?s-u)\xe9\x1f\x02\x00\x00\xc7\x45\xfc\x0c\x00\x00\x00\x66\xc7\x05....\x00\x00\x66\xc7\x05(....)\x00\x00",
            "Alien Abductor mouse Y buffer",
        )?);
    }

    Ok(vars)
}

fn jmp_rel32(from_end: i64, target: i64) -> Vec<u8> {
    let mut bytes = vec![0xe9];
    bytes.extend_from_slice(&((target - from_end) as i32).to_le_bytes());
    bytes
}

fn call_rel32(from_end: i64, target: i64) -> Vec<u8> {
    let mut bytes = vec![0xe8];
    bytes.extend_from_slice(&((target - from_end) as i32).to_le_bytes());
    bytes
}

/// NOP out the framerate-coupled minimum-delta clamp.
pub fn build_fix_speed(pages: &[u8]) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\xf7\xd8\x83\xc0\x64\x75\x05\xb8\x04\x00\x00\x00",
        5,
        "speed bug code",
    )?;
    let asm = Assembler::new();
    let payload = asm.assemble(vec![Instruction::with(Code::Nopd); 7])?;
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// Mouselook core: read the unbounded mouse delta and drive rotation/tilt angles instead.
pub fn build_mouselook_core(pages: &[u8], vars: &Variables, invert_y: bool) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\x8b\xc2\x33\xed\x03\x05....\x8b\xd8",
        0,
        "mouselook mod point",
    )?;
    let mut asm = Assembler::new();
    let label_check2 = asm.create_label();
    let label_after = asm.create_label();

    let mut instructions = vec![
        ins!(Instruction::with2(Code::Mov_rm32_r32, Register::EAX, Register::ECX)),
        ins!(Instruction::with2(Code::Shl_rm32_imm8, Register::EAX, 17)),
        ins!(Instruction::with2(Code::Add_rm32_r32, asm.memory(vars.movement_rot_angle), Register::EAX)),
        ins!(Instruction::with2(Code::Mov_rm32_r32, Register::EAX, Register::EDX)),
    ];
    if invert_y {
        instructions.push(ins!(Instruction::with1(Code::Neg_rm32, Register::EAX)));
    }
    instructions.extend(vec![
        ins!(Instruction::with2(Code::Shl_rm32_1, Register::EAX, 1)),
        ins!(Instruction::with2(Code::Add_r32_rm32, Register::EAX, asm.memory(vars.movement_tilt_angle_last))),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_tilt_angle_top))),
        ins!(Instruction::with_branch(Code::Jge_rel8_32, label_check2)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_tilt_angle_top))),
        asm.add_label(
            ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_tilt_angle_bottom))),
            label_check2,
        ),
        ins!(Instruction::with_branch(Code::Jle_rel8_32, label_after)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_tilt_angle_bottom))),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_tilt_angle), Register::EAX)),
            label_after,
        ),
        ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_tilt_angle_last), Register::EAX)),
        Instruction::with(Code::Retnd),
    ]);

    let payload = asm.assemble(instructions)?;
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// WASD movement block, doubled while LShift is held, replacing the old
/// head-turning keys. Falls straight through to a NOP sled when an Alien
/// Abductor ride is active.
pub fn build_wasd(pages: &[u8], vars: &Variables) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\x80\x3d....\x00\x0f\x84\x93\x00\x00\x00\x33\xc0",
        0,
        "WASD mod point",
    )?;
    let rejoin = find_offset(
        pages,
        &(r"(?s-u)\x0f\xb6\x1d....\x80\xa3....\x01").repeat(7),
        0,
        "WASD rejoin mod point",
    )?;

    let mut asm = Assembler::new();
    let label_skip = asm.create_label();
    let label_down = asm.create_label();
    let label_leftyrighty = asm.create_label();
    let label_apply_fwd = asm.create_label();
    let label_right = asm.create_label();
    let label_fin = asm.create_label();
    let label_apply_strafe = asm.create_label();

    let kb = |scancode: u32| vars.keyboard_state + scancode;

    let mut instructions = Vec::new();
    if let Some(abductor) = vars.using_alien_abductor {
        instructions.push(ins!(Instruction::with2(Code::Cmp_rm8_imm8, asm.memory(abductor), 0)));
        instructions.push(ins!(Instruction::with_branch(Code::Jne_rel8_32, label_skip)));
    }
    instructions.extend(vec![
        ins!(Instruction::with2(Code::Mov_rm32_imm32, asm.memory(vars.movement_strafe), 1)),
        ins!(Instruction::with2(Code::Xor_rm32_r32, Register::EAX, Register::EAX)),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x11)), 3)),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_down)),
        ins!(Instruction::with2(Code::Sub_EAX_imm32, Register::EAX, 0x4000)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x1f)), 3)),
            label_down,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_leftyrighty)),
        ins!(Instruction::with2(Code::Add_EAX_imm32, Register::EAX, 0x4000)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x2a)), 3)),
            label_leftyrighty,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_apply_fwd)),
        ins!(Instruction::with2(Code::Shl_rm32_1, Register::EAX, 1)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_fwd_veloc_world), Register::EAX)),
            label_apply_fwd,
        ),
        ins!(Instruction::with2(Code::Xor_rm32_r32, Register::EAX, Register::EAX)),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x1e)), 3)),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_right)),
        ins!(Instruction::with2(Code::Sub_EAX_imm32, Register::EAX, 0xc000)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x20)), 3)),
            label_right,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_fin)),
        ins!(Instruction::with2(Code::Add_EAX_imm32, Register::EAX, 0xc000)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x2a)), 3)),
            label_fin,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_apply_strafe)),
        ins!(Instruction::with2(Code::Shl_rm32_1, Register::EAX, 1)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_strafe_veloc_world), Register::EAX)),
            label_apply_strafe,
        ),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x11)), 1)),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x1f)), 1)),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x1e)), 1)),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x20)), 1)),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x2a)), 1)),
        asm.add_label(Instruction::with(Code::Nopd), label_skip),
    ]);

    let mut payload = asm.assemble(instructions)?;
    payload.extend_from_slice(&jmp_rel32((offset + payload.len() + 5) as i64, rejoin as i64));
    if payload.len() > rejoin - offset {
        return Err(crate::error::Error::Detection(
            "WASD mod point is too small for the rewritten block".into(),
        ));
    }
    payload.resize(rejoin - offset, 0x90);
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// The engine normally maps "run" to R; NOP it out since R now raises eye level.
pub fn build_rkey_nop(pages: &[u8]) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\x0f\xb6\x1d....\xf6\x83....\x01\x75\x0c\x66\xb9\x02\x00\x2a\x0d....\xd3\xf8",
        0,
        "R key mod point",
    )?;
    let asm = Assembler::new();
    let payload = asm.assemble(vec![Instruction::with(Code::Nopd); 28])?;
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// Crouch (C) lowers eye level, tiptoe (R) raises it, releasing both restores
/// to the neutral level by the increment step.
pub fn build_crouch(pages: &[u8], vars: &Variables) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\x0f\xb6\x05....\x0f\xb6\x1d....\xf6\x80....\x03",
        0,
        "crouch mod point",
    )?;
    let mut asm = Assembler::new();
    let label_start = asm.create_label();
    let label_tippytoes = asm.create_label();
    let label_crouch = asm.create_label();
    let label_restore = asm.create_label();
    let label_adjust = asm.create_label();
    let label_skip = asm.create_label();
    let label_fin = asm.create_label();

    let kb = |scancode: u32| vars.keyboard_state + scancode;
    let mut instructions = Vec::new();
    if let Some(abductor) = vars.using_alien_abductor {
        instructions.push(ins!(Instruction::with2(Code::Cmp_rm8_imm8, asm.memory(abductor), 0)));
        instructions.push(ins!(Instruction::with_branch(Code::Je_rel8_32, label_start)));
        instructions.push(Instruction::with(Code::Retnd));
    }
    instructions.extend(vec![
        asm.add_label(ins!(Instruction::with1(Code::Push_r32, Register::ECX)), label_start),
        ins!(Instruction::with1(Code::Push_r32, Register::EDX)),
        ins!(Instruction::with2(Code::Mov_r32_rm32, Register::ECX, asm.memory(vars.movement_eye_level_min))),
        ins!(Instruction::with2(Code::Add_r32_rm32, Register::ECX, asm.memory(vars.movement_eye_level_restore))),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x2e)), 3)),
        ins!(Instruction::with_branch(Code::Jne_rel8_32, label_crouch)),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x13)), 3)),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_restore)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_incr))),
            label_tippytoes,
        ),
        ins!(Instruction::with2(Code::Add_rm32_r32, asm.memory(vars.movement_eye_level), Register::EAX)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level))),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_eye_level_max))),
        ins!(Instruction::with_branch(Code::Jle_rel8_32, label_fin)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_max))),
        ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_eye_level), Register::EAX)),
        ins!(Instruction::with_branch(Code::Jmp_rel8_32, label_fin)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_incr))),
            label_crouch,
        ),
        ins!(Instruction::with2(Code::Sub_rm32_r32, asm.memory(vars.movement_eye_level), Register::EAX)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level))),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_eye_level_min))),
        ins!(Instruction::with_branch(Code::Jge_rel8_32, label_fin)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_min))),
        ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_eye_level), Register::EAX)),
        ins!(Instruction::with_branch(Code::Jmp_rel8_32, label_fin)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level))),
            label_restore,
        ),
        ins!(Instruction::with2(Code::Sub_r32_rm32, Register::EAX, Register::ECX)),
        Instruction::with(Code::Cdq),
        ins!(Instruction::with2(Code::Xor_rm32_r32, Register::EAX, Register::EDX)),
        ins!(Instruction::with2(Code::Sub_r32_rm32, Register::EAX, Register::EDX)),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_eye_level_incr))),
        ins!(Instruction::with_branch(Code::Jle_rel8_32, label_skip)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_incr))),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::ECX, asm.memory(vars.movement_eye_level))),
        ins!(Instruction::with_branch(Code::Jg_rel8_32, label_adjust)),
        ins!(Instruction::with1(Code::Neg_rm32, Register::EAX)),
        asm.add_label(
            ins!(Instruction::with2(Code::Add_rm32_r32, asm.memory(vars.movement_eye_level), Register::EAX)),
            label_adjust,
        ),
        ins!(Instruction::with_branch(Code::Jmp_rel8_32, label_fin)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_rm32_r32, asm.memory(vars.movement_eye_level), Register::ECX)),
            label_skip,
        ),
        asm.add_label(
            ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x2e)), 1)),
            label_fin,
        ),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x13)), 1)),
        ins!(Instruction::with1(Code::Pop_r32, Register::EDX)),
        ins!(Instruction::with1(Code::Pop_r32, Register::ECX)),
        Instruction::with(Code::Retnd),
    ]);

    let payload = asm.assemble(instructions)?;
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// VESA Set-Display-Start shim so interactive-mode frame draws wait for
/// vertical retrace, plus the call-site redirects into it (UAKM/PD differ).
pub fn build_vsync(pages: &[u8], game: Game, vsync_offset: u32) -> Result<(CodePatch, Vec<CodePatch>)> {
    let asm = Assembler::new();
    let mut payload = asm.assemble(vec![
        ins!(Instruction::with1(Code::Push_r32, Register::EAX)),
        ins!(Instruction::with1(Code::Push_r32, Register::EBX)),
        ins!(Instruction::with1(Code::Push_r32, Register::ECX)),
        ins!(Instruction::with1(Code::Push_r32, Register::EDX)),
        ins!(Instruction::with2(Code::Mov_r16_imm16, Register::AX, 0x4f07)),
        ins!(Instruction::with2(Code::Mov_r16_imm16, Register::BX, 0x0080)),
        ins!(Instruction::with2(Code::Mov_r16_imm16, Register::CX, 0x0000)),
        ins!(Instruction::with2(Code::Mov_r16_imm16, Register::DX, 0x0000)),
        ins!(Instruction::with1(Code::Int_imm8, 0x10u32)),
        ins!(Instruction::with1(Code::Pop_r32, Register::EDX)),
        ins!(Instruction::with1(Code::Pop_r32, Register::ECX)),
        ins!(Instruction::with1(Code::Pop_r32, Register::EBX)),
        ins!(Instruction::with1(Code::Pop_r32, Register::EAX)),
    ])?;

    let (interactive_draw_frame_pattern, call_patterns): (&str, Vec<&str>) = match game {
        Game::UnderAKillingMoon => (
            r"(?s-u)\x3a\x05....\x74\x22",
            vec![r"(?s-u)\xe8....\x9c\x0f\xb6\xc0"],
        ),
        Game::PandoraDirective => (
            r"(?s-u)\x06\x60\x66\xc7\x05....\x00\x00\xa8\x01",
            vec![
                r"(?s-u)\xe8....\x89\x45\xf8\xb8....",
                r"(?s-u)\xe8....\x89\x45\xf4\xb8....",
            ],
        ),
    };
    let interactive_draw_frame_offset =
        find_offset(pages, interactive_draw_frame_pattern, 0, "interactive frame draw code")?;

    let mut calls = Vec::new();
    for (i, pattern) in call_patterns.iter().enumerate() {
        let label = if i == 0 { "frame call 1" } else { "frame call 2" };
        let call_offset = find_offset(pages, pattern, 0, label)?;
        let call_bytes = call_rel32((call_offset + 5) as i64, vsync_offset as i64);
        calls.push(CodePatch {
            payload: call_bytes,
            offset: call_offset as u32,
        });
    }

    let jmp_back = jmp_rel32(
        (vsync_offset as usize + payload.len() + 5) as i64,
        interactive_draw_frame_offset as i64,
    );
    payload.extend_from_slice(&jmp_back);

    Ok((
        CodePatch {
            payload,
            offset: vsync_offset,
        },
        calls,
    ))
}

/// Rewrite of the Alien Abductor remote-vehicle control logic: drives
/// rotation/forward velocity directly from the d-pad bitmask and lets the
/// hover buttons move eye level, replacing the original ramped velocity code.
pub fn build_abductor(
    pages: &[u8],
    vars: &Variables,
    fake_key_input: u32,
    abductor_state: u32,
    abductor_dpad: u32,
    mouse_unbounded_x_mod: u32,
    mouse_unbounded_y_mod: u32,
) -> Result<CodePatch> {
    let offset = find_offset(
        pages,
        r"(?s-u)\x53\x51\x52\x56\x57\x55\x89\xe5\x81\xec\x0c\x00\x00\x00\xeb\x10",
        0,
        "Alien Abductor control buttons",
    )?;

    let mut asm = Assembler::new();
    let label_hoverup_write = asm.create_label();
    let label_hoverdown = asm.create_label();
    let label_hoverdown_write = asm.create_label();
    let label_dpad = asm.create_label();
    let label_move = asm.create_label();
    let label_turn = asm.create_label();
    let label_leftright_speed = asm.create_label();
    let label_leftright_apply = asm.create_label();
    let label_updown = asm.create_label();
    let label_updown_speed = asm.create_label();
    let label_updown_apply = asm.create_label();
    let label_fin = asm.create_label();

    let kb = |scancode: u32| vars.keyboard_state + scancode;

    let instructions = vec![
        ins!(Instruction::with2(Code::Cmp_rm8_imm8, asm.memory(fake_key_input), 0x2a)),
        ins!(Instruction::with_branch(Code::Jne_rel8_32, label_hoverdown)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level))),
        ins!(Instruction::with2(Code::Add_EAX_imm32, Register::EAX, 0x400)),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_eye_level_max))),
        ins!(Instruction::with_branch(Code::Jl_rel8_32, label_hoverup_write)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_max))),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_eye_level), Register::EAX)),
            label_hoverup_write,
        ),
        asm.add_label(
            ins!(Instruction::with2(Code::Cmp_rm8_imm8, asm.memory(fake_key_input), 0x38)),
            label_hoverdown,
        ),
        ins!(Instruction::with_branch(Code::Jne_rel8_32, label_dpad)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level))),
        ins!(Instruction::with2(Code::Sub_EAX_imm32, Register::EAX, 0x400)),
        ins!(Instruction::with2(Code::Cmp_r32_rm32, Register::EAX, asm.memory(vars.movement_eye_level_min))),
        ins!(Instruction::with_branch(Code::Jg_rel8_32, label_hoverdown_write)),
        ins!(Instruction::with2(Code::Mov_EAX_moffs32, Register::EAX, asm.memory(vars.movement_eye_level_min))),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_eye_level), Register::EAX)),
            label_hoverdown_write,
        ),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_AL_moffs8, Register::AL, asm.memory(abductor_state))),
            label_dpad,
        ),
        ins!(Instruction::with2(Code::Cmp_AL_imm8, Register::AL, 2)),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_move)),
        ins!(Instruction::with2(Code::Mov_rm32_imm32, asm.memory(vars.movement_strafe_veloc_world), 0)),
        ins!(Instruction::with2(Code::Mov_rm32_imm32, asm.memory(vars.movement_fwd_veloc_world), 0)),
        ins!(Instruction::with_branch(Code::Jmp_rel8_32, label_fin)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(abductor_dpad), 0xc)),
            label_move,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_updown)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_r32_imm32, Register::EAX, 0x400000)),
            label_turn,
        ),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(abductor_dpad), 0x8)),
        ins!(Instruction::with_branch(Code::Jne_rel8_32, label_leftright_speed)),
        ins!(Instruction::with1(Code::Neg_rm32, Register::EAX)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x2a)), 3)),
            label_leftright_speed,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_leftright_apply)),
        ins!(Instruction::with2(Code::Shl_rm32_1, Register::EAX, 1)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_strafe_veloc_world), Register::EAX)),
            label_leftright_apply,
        ),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(abductor_dpad), 3)),
            label_updown,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_fin)),
        ins!(Instruction::with2(Code::Mov_r32_imm32, Register::EAX, 0x1800)),
        ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(abductor_dpad), 2)),
        ins!(Instruction::with_branch(Code::Jne_rel8_32, label_updown_speed)),
        ins!(Instruction::with1(Code::Neg_rm32, Register::EAX)),
        asm.add_label(
            ins!(Instruction::with2(Code::Test_rm8_imm8, asm.memory(kb(0x2a)), 3)),
            label_updown_speed,
        ),
        ins!(Instruction::with_branch(Code::Je_rel8_32, label_updown_apply)),
        ins!(Instruction::with2(Code::Shl_rm32_1, Register::EAX, 1)),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_moffs32_EAX, asm.memory(vars.movement_fwd_veloc_world), Register::EAX)),
            label_updown_apply,
        ),
        asm.add_label(
            ins!(Instruction::with2(Code::Mov_rm16_imm16, asm.memory(mouse_unbounded_x_mod), 0)),
            label_fin,
        ),
        ins!(Instruction::with2(Code::Mov_rm16_imm16, asm.memory(mouse_unbounded_y_mod), 0)),
        ins!(Instruction::with2(Code::And_rm8_imm8, asm.memory(kb(0x2a)), 1)),
        Instruction::with(Code::Retnd),
    ];

    let payload = asm.assemble(instructions)?;
    Ok(CodePatch {
        payload,
        offset: offset as u32,
    })
}

/// The Alien Abductor code also injects synthetic hover key presses into the
/// eye-level code path we just replaced; NOP those two injection sites out.
pub fn build_abductor_hover_nops(pages: &[u8]) -> Result<Vec<CodePatch>> {
    let patterns = [
        (
            r"(?s-u)\x80\x88....\x02\xc6\x05....\x00\xc6\x05....\x00\x31\xc0\xe8....\x80\x3d....\x00\x74\x1e\xe8....\xba\x01\x00\x00\x00\xb8\x04\x00\x00\x00",
            "Alien Abductor hover-up button",
        ),
        (
            r"(?s-u)\x80\x88....\x02\xc6\x05....\x00\xc6\x05....\x00\x31\xc0\xe8....\x80\x3d....\x00\x74\x1e\xe8....\xba\x01\x00\x00\x00\xb8\x05\x00\x00\x00",
            "Alien Abductor hover-down button",
        ),
    ];
    let asm = Assembler::new();
    let mut patches = Vec::new();
    for (pattern, label) in patterns {
        let offset = find_offset(pages, pattern, 0, label)?;
        let payload = asm.assemble(vec![Instruction::with(Code::Nopd); 7])?;
        patches.push(CodePatch {
            payload,
            offset: offset as u32,
        });
    }
    Ok(patches)
}

/// Replace the opening-credits line with an updated attribution (Killing Moon only).
pub fn build_credits(pages: &[u8]) -> Result<Option<DataPatch>> {
    let offset = match find_offset(pages, "and developed by", 0, "opening credits") {
        Ok(offset) => offset,
        Err(_) => return Ok(None),
    };
    let payload =
        b"(c) 1993.        \rMouselook v1.2 (c) 2025 moralrecordings.    \r                                "
            .to_vec();
    Ok(Some(DataPatch {
        payload,
        offset: offset as u32,
    }))
}

/// All patches requested by `options`, in the fixed application order (§4.5).
pub fn build_all(
    pages: &[u8],
    game: Game,
    options: PatchOptions,
) -> Result<(Vec<CodePatch>, Vec<DataPatch>)> {
    let mut code_patches = Vec::new();
    let mut data_patches = Vec::new();

    if options.fix_speed {
        code_patches.push(build_fix_speed(pages)?);
    }

    if options.mouselook {
        let vars = resolve_variables(pages, game)?;
        code_patches.push(build_mouselook_core(pages, &vars, options.invert_y)?);
        let wasd = build_wasd(pages, &vars)?;
        let vsync_offset = wasd.offset + wasd.payload.len() as u32;
        code_patches.push(wasd);
        code_patches.push(build_rkey_nop(pages)?);
        code_patches.push(build_crouch(pages, &vars)?);
        let (vsync_shim, vsync_calls) = build_vsync(pages, game, vsync_offset)?;
        code_patches.extend(vsync_calls);
        code_patches.push(vsync_shim);

        if game == Game::PandoraDirective && vars.using_alien_abductor.is_some() {
            let missing = || {
                crate::error::Error::Detection(
                    "Alien Abductor variables incompletely resolved".into(),
                )
            };
            code_patches.push(build_abductor(
                pages,
                &vars,
                vars.fake_key_input.ok_or_else(missing)?,
                vars.abductor_state.ok_or_else(missing)?,
                vars.abductor_dpad.ok_or_else(missing)?,
                vars.mouse_unbounded_x_mod.ok_or_else(missing)?,
                vars.mouse_unbounded_y_mod.ok_or_else(missing)?,
            )?);
            code_patches.extend(build_abductor_hover_nops(pages)?);
        }
    } else if options.invert_y {
        return Err(crate::error::Error::Detection(
            "--invert-y has no effect without --mouselook".into(),
        ));
    }

    if game == Game::UnderAKillingMoon {
        if let Some(patch) = build_credits(pages)? {
            data_patches.push(patch);
        }
    }

    Ok((code_patches, data_patches))
}

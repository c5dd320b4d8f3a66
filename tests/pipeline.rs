//! End-to-end pipeline test: a minimal synthetic LE image (no real game data
//! ships with this crate) round-tripped through parse, patch and write.

use lepatch::le::fixup::FixupPageTable;
use lepatch::le::header::LEHeader;
use lepatch::le::image::Image;
use lepatch::le::object::{ObjectPageTableEntry, ObjectTableEntry};
use lepatch::options::PatchOptions;
use scroll::Pwrite;

const PAGE_SIZE: u32 = 0x1000;

/// A one-page DOS/32A LE image with a title-screen string and the
/// framerate-speed-bug pattern embedded in its single data page, and no
/// fixup records (neither pattern touches a relocated operand). Returns the
/// image bytes and the speed-bug pattern's offset within the data page.
fn synthetic_image() -> (Vec<u8>, usize) {
    let mut dos_header = [0u8; 64];
    dos_header[0..2].copy_from_slice(b"MZ");
    dos_header[0x18..0x1a].copy_from_slice(&0x0040u16.to_le_bytes());
    dos_header[0x3c..0x3e].copy_from_slice(&0x0040u16.to_le_bytes());

    let le_off = 64usize;
    let fixup_page_table_offset = 176u32; // right after the header, no loader section
    let page_table = FixupPageTable {
        offsets: vec![0, 0],
    };
    let page_table_bytes = page_table.write().unwrap();
    let fixup_record_table_offset = fixup_page_table_offset + page_table_bytes.len() as u32;

    let mut pages = Vec::new();
    pages.extend_from_slice(b"\xb3   Under a Killing Moon   \xb3\x0a\x0d");
    pages.extend_from_slice(b"\xb3   Version 1.02   \xb3");
    let speed_bug_offset = pages.len();
    pages.extend_from_slice(&[0xf7, 0xd8, 0x83, 0xc0, 0x64, 0x75, 0x05, 0xb8, 0x04, 0x00, 0x00, 0x00]);
    pages.resize(PAGE_SIZE as usize, 0);

    let header = LEHeader {
        module_num_pages: 1,
        eip_obj_num: 1,
        esp_obj_num: 1,
        page_size: PAGE_SIZE,
        obj_table_offset: fixup_page_table_offset,
        obj_count: 1,
        obj_page_table_offset: fixup_page_table_offset,
        fixup_page_table_offset,
        fixup_record_table_offset,
        import_module_table_offset: fixup_record_table_offset,
        import_proc_table_offset: fixup_record_table_offset,
        data_pages_offset: le_off as u32 + fixup_record_table_offset,
        ..Default::default()
    };

    let mut out = Vec::new();
    out.extend_from_slice(&dos_header);
    header.write(&mut out).unwrap();
    out.extend_from_slice(&page_table_bytes);
    // no fixup records, no post-fixup blob
    out.extend_from_slice(&pages);

    assert_eq!(out.len(), le_off + fixup_record_table_offset as usize + pages.len());
    (out, speed_bug_offset)
}

#[test]
fn parses_synthetic_image() {
    let (bytes, _) = synthetic_image();
    let image = Image::parse(&bytes).unwrap();
    assert_eq!(image.page_size(), PAGE_SIZE as usize);
    assert_eq!(image.pages.len(), PAGE_SIZE as usize);
    assert_eq!(image.fixup_records.len(), 1);
    assert!(image.fixup_records[0].is_empty());
}

#[test]
fn fix_speed_nops_the_detected_pattern_and_round_trips() {
    let (bytes, speed_bug_offset) = synthetic_image();
    let options = PatchOptions {
        fix_speed: true,
        mouselook: false,
        invert_y: false,
    };
    let output = lepatch::run(&bytes, options).unwrap();

    let patched = Image::parse(&output).unwrap();
    assert_eq!(
        &patched.pages[speed_bug_offset + 5..speed_bug_offset + 12],
        &[0x90u8; 7][..]
    );

    let (game, version, _) = lepatch::search::detect_version(&patched.pages).unwrap();
    assert_eq!(game, lepatch::Game::UnderAKillingMoon);
    assert_eq!(version, "1.02");
}

#[test]
fn no_options_leaves_pages_untouched() {
    let (bytes, _) = synthetic_image();
    let options = PatchOptions::default();
    let output = lepatch::run(&bytes, options).unwrap();

    let original = Image::parse(&bytes).unwrap();
    let patched = Image::parse(&output).unwrap();
    assert_eq!(original.pages, patched.pages);
}

#[test]
fn invert_y_without_mouselook_is_rejected() {
    let (bytes, _) = synthetic_image();
    let options = PatchOptions {
        fix_speed: false,
        mouselook: false,
        invert_y: true,
    };
    let err = lepatch::run(&bytes, options).unwrap_err();
    assert!(matches!(err, lepatch::Error::Detection(_)));
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// One data-segment variable address, 4 bytes apart from the next so none of
/// the captured bytes collide with another pattern's literal anchor bytes.
fn var_addr(n: u32) -> [u8; 4] {
    (0x0050_0000u32 + n * 4).to_le_bytes()
}

/// An 8-page data-pages buffer with every byte pattern `--mouselook` needs to
/// resolve on Under a Killing Moon: the title/version/language strings, the
/// fourteen data-segment variables, and an injection site for each patch
/// builder, each given its own page so no assembled payload can possibly
/// collide with its neighbor regardless of exact encoded length.
fn mouselook_data_pages() -> Vec<u8> {
    const NUM_PAGES: usize = 8;
    let mut pages = vec![0u8; NUM_PAGES * PAGE_SIZE as usize];

    // Page 0: title screen, version and language debug string (§4.3).
    let mut page0 = Vec::new();
    page0.extend_from_slice(b"\xb3   Under a Killing Moon   \xb3\x0a\x0d");
    page0.extend_from_slice(b"\xb3   Version 1.02   \xb3");
    page0.extend_from_slice(b"\x00ENGLISH\x00Retrieving DIGI settings\x00");
    put(&mut pages, 0, &page0);

    // Page 1: the fourteen data-segment variable patterns.
    let vars = PAGE_SIZE as usize;
    let mut b;

    b = vec![0xa3];
    b.extend_from_slice(&var_addr(0));
    b.extend_from_slice(&[0xc1, 0xf8, 0x10, 0xe8, 0, 0, 0, 0, 0xa1, 0, 0, 0, 0]);
    put(&mut pages, vars, &b); // movement_rot_angle

    b = vec![0xc7, 0x05];
    b.extend_from_slice(&var_addr(1));
    b.extend_from_slice(&[0x2c, 0x01, 0x00, 0x00]);
    put(&mut pages, vars + 64, &b); // movement_tilt_angle

    b = vec![0xa3];
    b.extend_from_slice(&var_addr(2));
    b.extend_from_slice(&[0xa1, 0, 0, 0, 0, 0x0b, 0xc0, 0x74, 0x2c]);
    put(&mut pages, vars + 128, &b); // movement_tilt_angle_last

    b = vec![0xa1];
    b.extend_from_slice(&var_addr(3));
    b.extend_from_slice(&[0xa3, 0, 0, 0, 0, 0xa3, 0, 0, 0, 0, 0x0f, 0xb6, 0x1d, 0, 0, 0, 0]);
    put(&mut pages, vars + 192, &b); // movement_tilt_angle_bottom

    b = vec![0xa1];
    b.extend_from_slice(&var_addr(4));
    b.extend_from_slice(&[0xa3, 0, 0, 0, 0, 0xa3, 0, 0, 0, 0, 0xa1, 0, 0, 0, 0, 0x0b, 0xc0]);
    put(&mut pages, vars + 256, &b); // movement_tilt_angle_top

    b = vec![0x83, 0x25];
    b.extend_from_slice(&var_addr(5));
    b.extend_from_slice(&[0xfc, 0x66, 0x0f, 0, 0, 0, 0]);
    put(&mut pages, vars + 320, &b); // movement_strafe

    b = vec![0xb9, 0x2c, 0x00, 0x00, 0x00, 0xbf];
    b.extend_from_slice(&var_addr(6));
    put(&mut pages, vars + 384, &b); // keyboard_state

    b = vec![0xf7, 0x2d, 0, 0, 0, 0, 0x0f, 0xac, 0xd0, 0x10, 0xa3];
    b.extend_from_slice(&var_addr(7));
    b.extend_from_slice(&[0x8b, 0xc1]);
    put(&mut pages, vars + 448, &b); // movement_fwd_veloc_world

    b = vec![0x0b, 0xed, 0x79, 0x02, 0xf7, 0xd8, 0xa3];
    b.extend_from_slice(&var_addr(8));
    b.push(0xc3);
    put(&mut pages, vars + 512, &b); // movement_strafe_veloc_world

    // movement_eye_level_incr and movement_eye_level share this one block:
    // the incr pattern matches the prefix ending at the first capture, the
    // eye_level pattern consumes the same bytes as a wildcard and continues.
    b = vec![0x80, 0xa0, 0, 0, 0, 0, 0x01, 0x80, 0xa3, 0, 0, 0, 0, 0x01, 0xa1];
    b.extend_from_slice(&var_addr(9));
    b.extend_from_slice(&[0x29, 0x05]);
    b.extend_from_slice(&var_addr(10));
    put(&mut pages, vars + 576, &b); // movement_eye_level_incr / movement_eye_level

    b = vec![0xc1, 0xe1, 0x0c, 0x03, 0xc1, 0xa3];
    b.extend_from_slice(&var_addr(11));
    put(&mut pages, vars + 640, &b); // movement_eye_level_max

    b = vec![0x83, 0xf8, 0x00, 0x74, 0x1f, 0xe8, 0, 0, 0, 0, 0x2b, 0x05];
    b.extend_from_slice(&var_addr(12));
    put(&mut pages, vars + 704, &b); // movement_eye_level_min

    b = vec![0x2b, 0xd0, 0x89, 0x15];
    b.extend_from_slice(&var_addr(13));
    put(&mut pages, vars + 768, &b); // movement_eye_level_restore

    // Page 2: mouselook core injection point.
    put(
        &mut pages,
        2 * PAGE_SIZE as usize,
        &[0x8b, 0xc2, 0x33, 0xed, 0x03, 0x05, 0, 0, 0, 0, 0x8b, 0xd8],
    );

    // Page 3: WASD mod point, then the rejoin point 2KiB later (the rewritten
    // WASD block and the vsync shim that follows it both fit comfortably in
    // that gap no matter their exact assembled length).
    let wasd_page = 3 * PAGE_SIZE as usize;
    put(
        &mut pages,
        wasd_page,
        &[0x80, 0x3d, 0, 0, 0, 0, 0x00, 0x0f, 0x84, 0x93, 0x00, 0x00, 0x00, 0x33, 0xc0],
    );
    let mut rejoin = Vec::new();
    for _ in 0..7 {
        rejoin.extend_from_slice(&[0x0f, 0xb6, 0x1d, 0, 0, 0, 0, 0x80, 0xa3, 0, 0, 0, 0, 0x01]);
    }
    put(&mut pages, wasd_page + 0x800, &rejoin);

    // Page 4: vsync's frame-draw reference point and its one UAKM call site.
    let vsync_page = 4 * PAGE_SIZE as usize;
    put(&mut pages, vsync_page, &[0x3a, 0x05, 0, 0, 0, 0, 0x74, 0x22]);
    put(
        &mut pages,
        vsync_page + 0x100,
        &[0xe8, 0, 0, 0, 0, 0x9c, 0x0f, 0xb6, 0xc0],
    );

    // Page 5: the run-key NOP site (28 bytes, same length as the patch).
    put(
        &mut pages,
        5 * PAGE_SIZE as usize,
        &[
            0x0f, 0xb6, 0x1d, 0, 0, 0, 0, 0xf6, 0x83, 0, 0, 0, 0, 0x01, 0x75, 0x0c, 0x66, 0xb9,
            0x02, 0x00, 0x2a, 0x0d, 0, 0, 0, 0, 0xd3, 0xf8,
        ],
    );

    // Page 6: crouch mod point.
    put(
        &mut pages,
        6 * PAGE_SIZE as usize,
        &[0x0f, 0xb6, 0x05, 0, 0, 0, 0, 0x0f, 0xb6, 0x1d, 0, 0, 0, 0, 0xf6, 0x80, 0, 0, 0, 0, 0x03],
    );

    // Page 7: the opening-credits line.
    put(&mut pages, 7 * PAGE_SIZE as usize, b"and developed by");

    pages
}

/// Wrap `pages` in a full LE image: an 8-entry object-page table (one entry
/// per page, unused beyond round-tripping) and a single dummy object table
/// entry, followed by an empty fixup section (no patch builder here needs an
/// address that was already relocated).
fn mouselook_synthetic_image() -> Vec<u8> {
    let pages = mouselook_data_pages();
    let num_pages = pages.len() / PAGE_SIZE as usize;

    let mut dos_header = [0u8; 64];
    dos_header[0..2].copy_from_slice(b"MZ");
    dos_header[0x18..0x1a].copy_from_slice(&0x0040u16.to_le_bytes());
    dos_header[0x3c..0x3e].copy_from_slice(&0x0040u16.to_le_bytes());

    let le_off = 64usize;
    let obj_table_offset = 176u32; // right after the header, no loader section
    let mut object_table_bytes = [0u8; 0x18];
    object_table_bytes
        .pwrite_with(ObjectTableEntry::default(), 0, scroll::LE)
        .unwrap();

    let obj_page_table_offset = obj_table_offset + object_table_bytes.len() as u32;
    let mut object_page_table_bytes = vec![0u8; num_pages * 4];
    for i in 0..num_pages {
        object_page_table_bytes
            .pwrite_with(ObjectPageTableEntry::default(), i * 4, scroll::LE)
            .unwrap();
    }

    let fixup_page_table_offset = obj_page_table_offset + object_page_table_bytes.len() as u32;
    let page_table = FixupPageTable::from_page_lengths(&vec![0; num_pages]);
    let page_table_bytes = page_table.write().unwrap();
    let fixup_record_table_offset = fixup_page_table_offset + page_table_bytes.len() as u32;

    let header = LEHeader {
        module_num_pages: num_pages as u32,
        eip_obj_num: 1,
        esp_obj_num: 1,
        page_size: PAGE_SIZE,
        obj_table_offset,
        obj_count: 1,
        obj_page_table_offset,
        fixup_page_table_offset,
        fixup_record_table_offset,
        import_module_table_offset: fixup_record_table_offset,
        import_proc_table_offset: fixup_record_table_offset,
        data_pages_offset: le_off as u32 + fixup_record_table_offset,
        ..Default::default()
    };

    let mut out = Vec::new();
    out.extend_from_slice(&dos_header);
    header.write(&mut out).unwrap();
    out.extend_from_slice(&object_table_bytes);
    out.extend_from_slice(&object_page_table_bytes);
    out.extend_from_slice(&page_table_bytes);
    // no fixup records, no post-fixup blob
    out.extend_from_slice(&pages);

    assert_eq!(
        out.len(),
        le_off + fixup_record_table_offset as usize + pages.len()
    );
    out
}

#[test]
fn mouselook_end_to_end_applies_all_patches_and_satisfies_header_offset_formulas() {
    let bytes = mouselook_synthetic_image();
    let options = PatchOptions {
        fix_speed: false,
        mouselook: true,
        invert_y: true,
    };
    let output = lepatch::run(&bytes, options).unwrap();

    let patched = Image::parse(&output).unwrap();

    let page_table_len = 4 * (patched.header.module_num_pages as usize + 1);
    assert_eq!(
        patched.header.fixup_record_table_offset,
        patched.header.fixup_page_table_offset + page_table_len as u32,
        "fixup_record_table_offset = fixup_page_table_offset + len(page_table_bytes)"
    );
    assert_eq!(
        patched.header.import_module_table_offset,
        patched.header.fixup_page_table_offset + patched.header.fixup_section_size,
        "import_module_table_offset = fixup_page_table_offset + fixup_section_size"
    );
    assert_eq!(
        patched.header.data_pages_offset,
        (patched.le_off as u32) + patched.header.import_module_table_offset
            - patched.mz_off as u32,
        "data_pages_offset = le_off + import_module_table_offset - mz_off (empty post-fixup blob)"
    );

    // The NOP sled left by the run-key patch proves the code-patch pipeline
    // actually spliced new bytes into the page, not just recomputed offsets.
    let rkey_page = 5 * PAGE_SIZE as usize;
    assert_eq!(&patched.pages[rkey_page..rkey_page + 28], &[0x90u8; 28][..]);
}

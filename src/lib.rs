//! Patches DOS/32A Linear Executable images for *Under a Killing Moon* and
//! *The Pandora Directive* to add mouselook, WASD movement, crouch/tiptoe,
//! a vsync fix and an optional framerate-speed fix (§1-2).

pub mod asm;
pub mod error;
pub mod le;
pub mod options;
pub mod patch;
pub mod search;

use log::info;

pub use error::{Error, Result};
pub use options::{Game, PatchOptions};

/// End to end: parse `input`, detect the game, apply the requested patches,
/// and return the re-serialized image bytes (§2, §5).
pub fn run(input: &[u8], options: PatchOptions) -> Result<Vec<u8>> {
    let mut image = le::Image::parse(input)?;
    let (game, version, language) = search::detect_version(&image.pages)?;
    info!(
        "{} {} ({}), {} bytes",
        game.title(),
        version,
        language,
        input.len()
    );

    patch::apply(&mut image, game, options)?;

    let out = image.write()?;
    info!("wrote {} bytes", out.len());
    Ok(out)
}

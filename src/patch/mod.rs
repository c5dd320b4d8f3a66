//! Ties the catalog's declarative patch list to the engine that splices them
//! into an [`Image`](crate::le::Image) (§4.5-4.6).

pub mod catalog;
pub mod engine;

use log::info;

use crate::error::Result;
use crate::le::Image;
use crate::options::{Game, PatchOptions};

/// Build every patch `options` selects and apply them to `image` in order.
///
/// Code patches run first, each through [`engine::apply_code_patch`] so the
/// fixup tables stay consistent with the newly-written bytes; data patches
/// have no relocations to maintain and run last via [`engine::apply_data_patch`].
pub fn apply(image: &mut Image, game: Game, options: PatchOptions) -> Result<()> {
    let (code_patches, data_patches) = catalog::build_all(&image.pages, game, options)?;

    info!(
        "applying {} code patch(es) and {} data patch(es)",
        code_patches.len(),
        data_patches.len()
    );

    for patch in &code_patches {
        engine::apply_code_patch(image, patch)?;
    }
    for patch in &data_patches {
        engine::apply_data_patch(image, patch);
    }

    Ok(())
}

//! User-facing knobs and the detected game identity.

/// Which of the two supported titles an input image belongs to.
///
/// Both games share the same engine and almost all of the same patch sites;
/// `Game` only changes which variables get resolved and which vsync call
/// sites the mouselook patch hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    UnderAKillingMoon,
    PandoraDirective,
}

impl Game {
    /// Parse the title string scraped from the version screen by [`crate::search::detect_version`].
    pub(crate) fn from_title(title: &str) -> Option<Game> {
        match title {
            "Under a Killing Moon" => Some(Game::UnderAKillingMoon),
            "The Pandora Directive" => Some(Game::PandoraDirective),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Game::UnderAKillingMoon => "Under a Killing Moon",
            Game::PandoraDirective => "The Pandora Directive",
        }
    }
}

/// Flags selecting which optional patches are applied, mirroring the CLI surface in §4.7.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// NOP out the framerate-coupled minimum-delta clamp.
    pub fix_speed: bool,
    /// Install mouselook, WASD, crouch/tiptoe, R-key NOP and the vsync shim
    /// (plus the remote-vehicle rewrite, for Pandora Directive).
    pub mouselook: bool,
    /// Negate the head-tilt delta in the mouselook block.
    pub invert_y: bool,
}

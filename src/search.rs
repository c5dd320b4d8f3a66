//! Byte-pattern regex search over the data-pages buffer: version detection,
//! injection-site location, and data-segment variable address extraction (§4.3).

use log::debug;
use regex::bytes::Regex;
use scroll::Pread;

use crate::error::{Error, Result};
use crate::options::Game;

/// Detected `(game, version, language)` triple scraped from the title screen
/// and debug strings embedded in the data pages.
pub fn detect_version(pages: &[u8]) -> Result<(Game, String, String)> {
    // Box-drawing title screen: "\xb3   <title>   \xb3\r\n\xb3   Version <ver>   \xb3",
    // tolerating both CRLF and LFCR line terminators.
    let title_re = Regex::new(
        r"(?s-u)\xb3\s+([A-Za-z ]+?)\s+\xb3(?:\r\n|\n\r)\xb3\s+Version\s+([0-9.]+)\s+\xb3",
    )
    .expect("static pattern");
    let caps = title_re
        .captures(pages)
        .ok_or_else(|| Error::Detection("title screen string not found".into()))?;

    let title = std::str::from_utf8(&caps[1])
        .map_err(|_| Error::Detection("title screen string is not valid ASCII".into()))?
        .trim();
    let version = std::str::from_utf8(&caps[2])
        .map_err(|_| Error::Detection("version string is not valid ASCII".into()))?
        .to_string();

    let game = Game::from_title(title)
        .ok_or_else(|| Error::Detection(format!("unsupported game title {title:?}")))?;

    let language_re =
        Regex::new(r"(?s-u)\x00([A-Za-z]+)\x00Retrieving DIGI settings").expect("static pattern");
    let language = language_re
        .captures(pages)
        .and_then(|caps| caps.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .map(str::to_string)
        .unwrap_or_else(|| "UNKNOWN".to_string());

    debug!("detected {} {} ({})", game.title(), version, language);
    Ok((game, version, language))
}

/// Locate a single occurrence of `pattern`, returning `match.start() + base_delta`.
///
/// Fails if `pattern` matches zero or more than once.
pub fn find_offset(pages: &[u8], pattern: &str, base_delta: i64, label: &str) -> Result<usize> {
    let re = Regex::new(pattern).map_err(|e| Error::Detection(format!("{label}: bad pattern: {e}")))?;
    let mut matches = re.find_iter(pages);
    let first = matches
        .next()
        .ok_or_else(|| Error::Detection(format!("{label}: pattern not found")))?;
    if matches.next().is_some() {
        return Err(Error::Detection(format!(
            "{label}: pattern matched more than once"
        )));
    }
    let offset = first.start() as i64 + base_delta;
    if offset < 0 {
        return Err(Error::Detection(format!(
            "{label}: resolved offset is negative"
        )));
    }
    debug!("resolved offset '{label}' = 0x{:x}", offset);
    Ok(offset as usize)
}

/// Locate a single occurrence of `pattern`, which must contain exactly one
/// 4-byte capture group holding a little-endian variable address.
pub fn find_variable(pages: &[u8], pattern: &str, label: &str) -> Result<u32> {
    let re = Regex::new(pattern).map_err(|e| Error::Detection(format!("{label}: bad pattern: {e}")))?;
    let mut matches = re.captures_iter(pages);
    let caps = matches
        .next()
        .ok_or_else(|| Error::Detection(format!("{label}: pattern not found")))?;
    if matches.next().is_some() {
        return Err(Error::Detection(format!(
            "{label}: pattern matched more than once"
        )));
    }
    let group = caps
        .get(1)
        .ok_or_else(|| Error::Detection(format!("{label}: pattern has no capture group")))?;
    let bytes = group.as_bytes();
    if bytes.len() != 4 {
        return Err(Error::Detection(format!(
            "{label}: capture group is {} bytes, expected 4",
            bytes.len()
        )));
    }
    let addr: u32 = bytes
        .pread_with(0, scroll::LE)
        .map_err(|e| Error::Detection(format!("{label}: {e}")))?;
    debug!("resolved variable '{label}' = 0x{:x}", addr);
    Ok(addr)
}

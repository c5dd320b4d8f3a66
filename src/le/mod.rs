//! DOS/32A Linear Executable container: header, fixups, object tables, and
//! the top-level [`Image`] that ties them together.

pub mod fixup;
pub mod header;
pub mod image;
pub mod locate;
pub mod object;

pub use fixup::{FixupPageTable, FixupRecord};
pub use header::LEHeader;
pub use image::Image;
pub use object::{ObjectPageTableEntry, ObjectTableEntry};

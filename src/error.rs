//! Error kinds produced anywhere in the patch pipeline.

use core::result;
use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Io(err: ::std::io::Error) {
            from()
            display("I/O error: {}", err)
        }
        /// Malformed MZ/BW/LE container: bad magic, truncated table, unrecognized
        /// fixup src/flags byte.
        Format(msg: String) {
            display("malformed executable: {}", msg)
        }
        /// A required version/offset/variable pattern was absent, matched more
        /// than once, or the detected game title isn't one this patcher supports.
        Detection(msg: String) {
            display("detection failed: {}", msg)
        }
        /// `iced-x86` failed to encode or decode an instruction stream.
        Assemble(msg: String) {
            display("assembler error: {}", msg)
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

//! Command-line front end: read an executable, apply the requested patches,
//! write the result (§4.7).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lepatch::{Error, PatchOptions};
use log::error;

/// Retrofit mouselook, WASD and other modern controls into DOS/32A builds of
/// Under a Killing Moon and The Pandora Directive.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input executable (e.g. TEX.EXE)
    input: PathBuf,
    /// Where to write the patched executable
    output: PathBuf,

    /// NOP out the framerate-coupled minimum-movement-delta clamp
    #[arg(long)]
    fix_speed: bool,
    /// Install mouselook, WASD, crouch/tiptoe, R-key NOP and the vsync fix
    #[arg(long)]
    mouselook: bool,
    /// Negate the head-tilt delta in the mouselook block (requires --mouselook)
    #[arg(long)]
    invert_y: bool,

    /// Increase log verbosity; repeatable
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(1 + args.verbose as usize)
        .init()
        .unwrap();

    let options = PatchOptions {
        fix_speed: args.fix_speed,
        mouselook: args.mouselook,
        invert_y: args.invert_y,
    };

    let input = match std::fs::read(&args.input) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("reading {}: {}", args.input.display(), err);
            return ExitCode::from(3);
        }
    };

    let output = match lepatch::run(&input, options) {
        Ok(bytes) => bytes,
        Err(err) => return exit_for_error(&err),
    };

    if let Err(err) = std::fs::write(&args.output, &output) {
        error!("writing {}: {}", args.output.display(), err);
        return ExitCode::from(3);
    }

    ExitCode::SUCCESS
}

fn exit_for_error(err: &Error) -> ExitCode {
    error!("{err}");
    match err {
        Error::Format(_) => ExitCode::from(1),
        Error::Detection(_) => ExitCode::from(2),
        Error::Io(_) => ExitCode::from(3),
        Error::Assemble(_) => ExitCode::from(1),
    }
}

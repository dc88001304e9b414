//! Entry point of the `maw` binary.
use maw::cli::Command;
use std::process::ExitCode;

fn main() -> ExitCode {
    Command::run()
}

//! Hosts a [`loopload::LoopLoad`] in a long running process.
//!
//! The demo keeps a generation counter warm, reloading it on the configured interval and
//! reporting the current value until the process is asked to shut down.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod config;
mod logging;
mod run;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

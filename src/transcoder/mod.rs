//! External transcoder processes
//!
//! One transcoder per camera stream. The process reads the camera source and
//! writes an encoded stream to stdout; see [`TranscoderCommand`] for the
//! default command line.

pub mod command;
pub mod process;

pub use command::TranscoderCommand;
pub use process::{KillOutcome, OutputChannel, ProcessExit, TranscoderProcess};

//! Transcoder command line
//!
//! The transcoder is an external executable. Its arguments are a template in
//! which every `{source}` placeholder is replaced with the source URL.

use std::ffi::OsString;
use std::path::PathBuf;

/// Placeholder replaced with the source URL
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Default transcoder arguments: VP8 in WebM on stdout, no audio,
/// 1 Mbit/s, realtime deadline, 20 fps cap, keyframe every 30 frames.
pub const DEFAULT_ARGS: &[&str] = &[
    "-nostdin",
    "-loglevel",
    "error",
    "-i",
    SOURCE_PLACEHOLDER,
    "-f",
    "webm",
    "-codec:v",
    "vp8",
    "-an",
    "-cpu-used",
    "4",
    "-b:v",
    "1M",
    "-crf",
    "10",
    "-deadline",
    "realtime",
    "-g",
    "30",
    "-r",
    "20",
    "-",
];

/// Program and argument template used to launch a transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderCommand {
    /// Executable to run
    pub program: PathBuf,
    /// Argument template
    pub args: Vec<String>,
}

impl Default for TranscoderCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TranscoderCommand {
    /// Create a command with a custom program and argument template
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace separated argument template
    pub fn with_arg_template(mut self, template: &str) -> Self {
        self.args = template.split_whitespace().map(str::to_string).collect();
        self
    }

    /// Arguments with `{source}` substituted
    pub fn render_args(&self, source_url: &str) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| OsString::from(arg.replace(SOURCE_PLACEHOLDER, source_url)))
            .collect()
    }

    /// Whether the template references the source URL at all
    pub fn uses_source(&self) -> bool {
        self.args.iter().any(|a| a.contains(SOURCE_PLACEHOLDER))
    }
}

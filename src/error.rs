//! Error types for the converter

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for converter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while converting HTML5 content to video
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize the browser engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load the page
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to capture a frame
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The input is neither a zip archive, an HTML file nor a directory
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The archive was rejected before extraction
    #[error("Invalid archive: {0}")]
    ArchiveError(String),

    /// An archive entry would escape the extraction directory
    #[error("Unsafe file path in ZIP: {0}")]
    UnsafePath(String),

    /// No HTML document was found in the input
    #[error("No HTML files found in the archive")]
    NoHtml,

    /// The frames directory holds no PNG frames
    #[error("No frames found to encode in {0}")]
    NoFrames(PathBuf),

    /// The encoder binary could not be located
    #[error("FFmpeg executable not found: {0}")]
    EncoderNotFound(String),

    /// Both the primary and the fallback encoder invocations failed
    #[error("Encoding failed (exit code {exit_code:?}): {stderr}")]
    EncodeFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The conversion was cancelled through its session
    #[error("Conversion cancelled")]
    Cancelled,

    /// Frame decode or encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Zip container error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

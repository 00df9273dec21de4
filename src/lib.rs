//! HTML5 to video
//!
//! Converts HTML5 animated content (banner ads, motion graphics) into video
//! files by rendering the page frame by frame in a headless browser and
//! encoding the captured frames with FFmpeg.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives headless Chrome through the Chrome
//!   DevTools Protocol
//! - **Server** (default): a small upload/analyze/convert HTTP surface
//! - **Engine trait**: the capture loop is generic over the browser backend,
//!   so it can be driven by any implementation (tests use a fake one)
//!
//! # Example
//!
//! ```no_run
//! use html5video::{analyze_html, Converter, Session, VideoConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let analysis = analyze_html("banner/index.html")?;
//! let config = VideoConfig::from_analysis(&analysis);
//!
//! let converter = Converter::default();
//! let mut session = Session::new();
//! let report = converter.convert_cdp("banner.zip".as_ref(), "banner.mp4".as_ref(), &config, &mut session)?;
//! println!("{} frames, {:.2} MB", report.frame_count, report.size_mb());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub mod error;
pub use error::{Error, Result};

pub mod analyze;
pub mod archive;
pub mod capture;
pub mod convert;
pub mod encode;
pub mod geometry;
pub mod scripts;
pub mod session;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly conversion handle (worker-thread backed)
pub mod async_api;

#[cfg(feature = "server")]
pub mod server;

pub use analyze::{analyze_html, analyze_source, Analysis};
pub use convert::{ConversionReport, Converter};
pub use geometry::{OutputFormat, RenderPlan};
pub use session::{CancelToken, Session};

/// Upper bound on width * height * fps * duration (4K at 60 fps for one minute).
pub const MAX_PIXEL_FRAMES: u64 = 3840 * 2160 * 60 * 60;

/// Configuration for the headless browser engine
///
/// The defaults mirror what the converter needs for deterministic frames: a
/// fixed window, a 30 second page-load budget and no device scaling.
///
/// # Examples
///
/// ```
/// let cfg = html5video::EngineConfig::default();
/// assert_eq!(cfg.timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Browser window dimensions
    pub viewport: Viewport,
    /// Timeout for page loads in milliseconds
    pub timeout_ms: u64,
    /// Script execution timeout in milliseconds
    pub script_timeout_ms: u64,
    /// Explicit browser binary; discovered from well-known paths when `None`
    pub browser_path: Option<PathBuf>,
    /// Run without a visible window
    pub headless: bool,
    /// Additional command-line switches passed to the browser
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timeout_ms: 30_000,
            script_timeout_ms: 10_000,
            browser_path: None,
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

/// Pixel dimensions of a window, a frame or a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output frame format requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    /// Pick square or vertical, whichever aspect ratio is closer to the source
    #[default]
    Auto,
    /// 1080x1080
    Square,
    /// 1080x1920
    Vertical,
    /// Keep the source dimensions
    Native,
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "square" | "1080x1080" => Ok(Self::Square),
            "vertical" | "1080x1920" => Ok(Self::Vertical),
            "native" | "source" => Ok(Self::Native),
            other => Err(format!("unknown target format '{}'", other)),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Square => "square",
            Self::Vertical => "vertical",
            Self::Native => "native",
        };
        f.write_str(s)
    }
}

/// Where the source is fitted into the target frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitStrategy {
    /// The browser window is the target frame; content is scaled and centered
    /// with a CSS transform before capture
    #[default]
    Css,
    /// Frames are captured at the source size; FFmpeg scales and pads them
    Encoder,
}

impl FromStr for FitStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "css" | "browser" => Ok(Self::Css),
            "encoder" | "ffmpeg" => Ok(Self::Encoder),
            other => Err(format!("unknown fit strategy '{}'", other)),
        }
    }
}

/// Configuration for video output
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Source content width
    pub width: u32,
    /// Source content height
    pub height: u32,
    pub fps: u32,
    /// Duration in seconds
    pub duration: u32,
    pub codec: String,
    pub bitrate: String,
    /// Playback multiplier applied to simulated time (0.85 = 15% slower)
    pub animation_speed: f64,
    pub preset: String,
    pub crf: u8,
    pub target_format: TargetFormat,
    pub fit: FitStrategy,
    /// Prefer spline36 and stronger sharpening for large encoder-side upscales
    pub enhanced_upscaling: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60,
            duration: 10,
            codec: "libx264".to_string(),
            bitrate: "10M".to_string(),
            animation_speed: 0.85,
            preset: "slow".to_string(),
            crf: 18,
            target_format: TargetFormat::Auto,
            fit: FitStrategy::Css,
            enhanced_upscaling: false,
        }
    }
}

impl VideoConfig {
    /// Build a config from detected settings with the high-quality defaults.
    pub fn from_analysis(analysis: &Analysis) -> Self {
        Self {
            width: analysis.width,
            height: analysis.height,
            fps: analysis.fps,
            duration: analysis.duration,
            ..Default::default()
        }
    }

    pub fn source(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    pub fn total_frames(&self) -> u32 {
        self.fps * self.duration
    }

    /// Sanity checks that apply to every configuration, detected or not.
    ///
    /// Detected sizes are accepted up to what the analyzer itself accepts;
    /// see [`VideoConfig::validate_manual`] for user-supplied values.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::ConfigError(format!("source size {} must not be empty", self.source())));
        }
        if !(1..=60).contains(&self.fps) {
            return Err(Error::ConfigError(format!("fps {} must be within 1..=60", self.fps)));
        }
        if !(1..=300).contains(&self.duration) {
            return Err(Error::ConfigError(format!("duration {}s must be within 1..=300", self.duration)));
        }
        if !(0.5..=1.5).contains(&self.animation_speed) {
            return Err(Error::ConfigError(format!(
                "animation speed {} must be within 0.5..=1.5",
                self.animation_speed
            )));
        }
        if self.codec.trim().is_empty() {
            return Err(Error::ConfigError("codec must not be empty".into()));
        }
        Ok(())
    }

    /// Limits for values the user typed in: at most 4K source and a bounded
    /// pixel-frame load, on top of [`VideoConfig::validate`].
    pub fn validate_manual(&self) -> Result<()> {
        if !(100..=3840).contains(&self.width) {
            return Err(Error::ConfigError(format!("width {} must be within 100..=3840", self.width)));
        }
        if !(100..=2160).contains(&self.height) {
            return Err(Error::ConfigError(format!("height {} must be within 100..=2160", self.height)));
        }
        self.validate()?;
        let load = self.width as u64 * self.height as u64 * self.total_frames() as u64;
        if load > MAX_PIXEL_FRAMES {
            return Err(Error::ConfigError(format!(
                "configuration too demanding: {} pixel-frames (maximum {}); reduce resolution, fps or duration",
                load, MAX_PIXEL_FRAMES
            )));
        }
        Ok(())
    }
}

/// Result of JavaScript execution
///
/// `value` is the JSON value returned by the page (or `Null` when the
/// expression produced nothing serializable). When `is_error` is set it holds
/// the error message instead.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub value: serde_json::Value,
    /// Whether the script threw an error
    pub is_error: bool,
}

impl ScriptResult {
    /// Turn a result the page reported as thrown into `Error::ScriptError`.
    pub fn into_result(self) -> Result<Self> {
        if self.is_error {
            let message = match &self.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(Error::ScriptError(message));
        }
        Ok(self)
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value.as_u64().or_else(|| self.value.as_f64().map(|f| f.max(0.0) as u64))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Console message emitted by the page
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
    /// Level such as "log", "warn", or "error"
    pub level: String,
    /// Textual content of the message
    pub text: String,
}

/// Core trait for browser backends that can render a page into frames
pub trait Engine {
    /// Create a new engine instance with the given configuration
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Resize the browser window
    fn set_window_size(&mut self, width: u32, height: u32) -> Result<()>;

    /// Load a URL and wait for the page to be ready
    fn load_url(&mut self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression in the page's global context
    fn evaluate_script_in_page(&mut self, script: &str) -> Result<ScriptResult>;

    /// Render the current viewport as a PNG image
    fn render_png(&self) -> Result<Vec<u8>>;

    /// Take the console messages emitted since the last call
    fn drain_console(&mut self) -> Vec<ConsoleMessage>;

    /// Close the engine and clean up resources
    fn close(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.viewport.height, 1080);
        assert!(config.headless);
    }

    #[test]
    fn test_viewport() {
        let viewport = Viewport::new(320, 480);
        assert_eq!(viewport.to_string(), "320x480");
        assert!((viewport.aspect() - 0.6667).abs() < 1e-3);
    }

    #[test]
    fn target_format_parses_form_values() {
        assert_eq!("auto".parse::<TargetFormat>().unwrap(), TargetFormat::Auto);
        assert_eq!("".parse::<TargetFormat>().unwrap(), TargetFormat::Auto);
        assert_eq!("Square".parse::<TargetFormat>().unwrap(), TargetFormat::Square);
        assert_eq!("1080x1920".parse::<TargetFormat>().unwrap(), TargetFormat::Vertical);
        assert!("widescreen".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn default_video_config_is_valid() {
        assert!(VideoConfig::default().validate().is_ok());
        assert!(VideoConfig::default().validate_manual().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cfg = VideoConfig { width: 0, ..Default::default() };
        assert!(cfg.validate().is_err());

        let cfg = VideoConfig { fps: 61, ..Default::default() };
        assert!(cfg.validate().is_err());

        let cfg = VideoConfig { animation_speed: 1.6, ..Default::default() };
        assert!(cfg.validate().is_err());

        let cfg = VideoConfig { duration: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn manual_limits_reject_small_and_oversized_sources() {
        let cfg = VideoConfig { width: 99, ..Default::default() };
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_manual().is_err());

        let cfg = VideoConfig { height: 2161, ..Default::default() };
        assert!(matches!(cfg.validate_manual(), Err(Error::ConfigError(_))));

        let cfg = VideoConfig { fps: 0, ..Default::default() };
        assert!(cfg.validate_manual().is_err());
    }

    #[test]
    fn detected_wide_sprite_strip_passes_sanity_checks() {
        let analysis = analyze_source("<style>.sprite { width: 4800px; height: 250px }</style>");
        assert_eq!(analysis.width, 4800);

        let cfg = VideoConfig::from_analysis(&analysis);
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_manual().is_err());
    }

    #[test]
    fn manual_limits_reject_excessive_load() {
        // 4K at 60 fps is fine for 60 seconds but not for 61.
        let ok = VideoConfig { width: 3840, height: 2160, fps: 60, duration: 60, ..Default::default() };
        assert!(ok.validate_manual().is_ok());
        let too_much = VideoConfig { duration: 61, ..ok };
        assert!(matches!(too_much.validate_manual(), Err(Error::ConfigError(_))));
        assert!(too_much.validate().is_ok());
    }
}

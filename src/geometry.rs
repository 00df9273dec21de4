//! Fit/pad arithmetic: output format selection, proportional scaling and the
//! FFmpeg scale/pad filters derived from it.

use crate::{FitStrategy, TargetFormat, VideoConfig, Viewport};
use regex::Regex;
use std::sync::OnceLock;

/// Sharpening applied after a lanczos scale.
pub const UNSHARP: &str = "unsharp=5:5:1.0:5:5:0.0";
/// Stronger sharpening for large spline36 upscales.
pub const UNSHARP_STRONG: &str = "unsharp=7:7:1.5:7:7:0.0";

/// A concrete output frame format
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutputFormat {
    pub size: Viewport,
    pub name: String,
}

impl OutputFormat {
    pub fn square() -> Self {
        Self {
            size: Viewport::new(1080, 1080),
            name: "1080x1080 (Square/Instagram)".to_string(),
        }
    }

    pub fn vertical() -> Self {
        Self {
            size: Viewport::new(1080, 1920),
            name: "1080x1920 (Vertical/Stories)".to_string(),
        }
    }

    pub fn native(source: Viewport) -> Self {
        Self {
            size: source,
            name: format!("{} (Native)", source),
        }
    }

    /// Resolve a requested format against the source dimensions.
    pub fn resolve(target: TargetFormat, source: Viewport) -> Self {
        match target {
            TargetFormat::Auto => detect_best_format(source),
            TargetFormat::Square => Self::square(),
            TargetFormat::Vertical => Self::vertical(),
            TargetFormat::Native => Self::native(source),
        }
    }
}

/// Choose the social format whose aspect ratio is closest to the source.
/// Ties go to vertical.
pub fn detect_best_format(source: Viewport) -> OutputFormat {
    let aspect = source.aspect();
    let diff_square = (aspect - 1.0).abs();
    let diff_vertical = (aspect - 9.0 / 16.0).abs();
    if diff_square < diff_vertical {
        OutputFormat::square()
    } else {
        OutputFormat::vertical()
    }
}

/// Round odd dimensions down to the next even value (yuv420p needs even sizes).
pub fn even(n: u32) -> u32 {
    n - n % 2
}

/// How a source fits into a target without distortion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitInfo {
    pub fit: Viewport,
    pub pad_top: u32,
    pub pad_bottom: u32,
    pub pad_left: u32,
    pub pad_right: u32,
    pub needs_padding: bool,
}

/// Fit `source` into `target`, letterboxing or pillarboxing as needed.
pub fn fit_dimensions(source: Viewport, target: Viewport) -> FitInfo {
    let source_aspect = source.aspect();
    let target_aspect = target.aspect();

    if (source_aspect - target_aspect).abs() < 0.01 {
        return FitInfo {
            fit: target,
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            needs_padding: false,
        };
    }

    if source_aspect > target_aspect {
        // Wider: fit width, bars top and bottom.
        let fit_height = even((target.width as f64 / source_aspect) as u32);
        let pad_top = (target.height - fit_height) / 2;
        FitInfo {
            fit: Viewport::new(target.width, fit_height),
            pad_top,
            pad_bottom: target.height - fit_height - pad_top,
            pad_left: 0,
            pad_right: 0,
            needs_padding: true,
        }
    } else {
        // Taller: fit height, bars left and right.
        let fit_width = even((target.height as f64 * source_aspect) as u32);
        let pad_left = (target.width - fit_width) / 2;
        FitInfo {
            fit: Viewport::new(fit_width, target.height),
            pad_top: 0,
            pad_bottom: 0,
            pad_left,
            pad_right: target.width - fit_width - pad_left,
            needs_padding: true,
        }
    }
}

/// Scale filter with smart fitting. When `enhanced` is set and the content is
/// blown up by more than 1.5x, spline36 with stronger sharpening is used.
pub fn upscale_filter(source: Viewport, target: Viewport, enhanced: bool) -> String {
    let fit = fit_dimensions(source, target);

    let factor = (target.width as f64 / source.width as f64).max(target.height as f64 / source.height as f64);
    let (scaler, sharpen) = if enhanced && factor > 1.5 {
        ("spline36", UNSHARP_STRONG)
    } else {
        ("lanczos", UNSHARP)
    };

    if fit.needs_padding {
        format!(
            "scale={}:{}:flags={},{},pad={}:{}:{}:{}:black",
            fit.fit.width, fit.fit.height, scaler, sharpen, target.width, target.height, fit.pad_left, fit.pad_top
        )
    } else {
        format!("scale={}:{}:flags={},{}", target.width, target.height, scaler, sharpen)
    }
}

/// Everything the capture loop needs to know about frame geometry and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub source: Viewport,
    pub format: OutputFormat,
    /// Uniform scale that fits the source inside the target
    pub scale: f64,
    /// Source size after scaling (truncated)
    pub scaled: Viewport,
    /// Horizontal centering offset
    pub pad_x: u32,
    /// Vertical centering offset
    pub pad_y: u32,
    pub needs_format_change: bool,
    pub fit: FitStrategy,
    pub total_frames: u32,
    /// Seconds between frames
    pub frame_time: f64,
}

impl RenderPlan {
    pub fn new(config: &VideoConfig) -> Self {
        let source = config.source();
        let format = OutputFormat::resolve(config.target_format, source);
        let target = format.size;

        let scale = (target.width as f64 / source.width as f64).min(target.height as f64 / source.height as f64);
        let scaled = Viewport::new((source.width as f64 * scale) as u32, (source.height as f64 * scale) as u32);

        Self {
            source,
            scale,
            scaled,
            pad_x: target.width.saturating_sub(scaled.width) / 2,
            pad_y: target.height.saturating_sub(scaled.height) / 2,
            needs_format_change: target != source,
            fit: config.fit,
            total_frames: config.total_frames(),
            frame_time: 1.0 / config.fps as f64,
            format,
        }
    }

    pub fn target(&self) -> Viewport {
        self.format.size
    }

    /// Window size the browser renders at
    pub fn browser_viewport(&self) -> Viewport {
        match self.fit {
            FitStrategy::Css => self.target(),
            FitStrategy::Encoder => self.source,
        }
    }

    /// Whether the page itself is rescaled before capture
    pub fn scales_in_browser(&self) -> bool {
        self.needs_format_change && self.fit == FitStrategy::Css
    }

    /// Simulated animation time for a frame, in milliseconds.
    pub fn elapsed_ms(&self, frame: u32, speed: f64) -> f64 {
        frame as f64 * self.frame_time * speed * 1000.0
    }
}

/// Encoder-side fit for frames captured at the source size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddingInfo {
    /// `#rrggbb`
    pub bg_color: String,
    pub source: Viewport,
    pub target: Viewport,
}

impl PaddingInfo {
    /// Final (even) frame size produced by `filter`.
    pub fn output_size(&self) -> Viewport {
        Viewport::new(even(self.target.width), even(self.target.height))
    }

    /// `scale -> unsharp -> pad`, centered on the background color.
    pub fn filter(&self) -> String {
        let (sw, sh) = (self.source.width as f64, self.source.height as f64);
        let scale = (self.target.width as f64 / sw).min(self.target.height as f64 / sh);

        let scaled_w = even((sw * scale) as u32);
        let scaled_h = even((sh * scale) as u32);
        let out = self.output_size();

        let pad_x = out.width.saturating_sub(scaled_w) / 2;
        let pad_y = out.height.saturating_sub(scaled_h) / 2;
        let color = self.bg_color.trim_start_matches('#');

        format!(
            "scale={}:{}:flags=lanczos,{},pad={}:{}:{}:{}:color=0x{}",
            scaled_w, scaled_h, UNSHARP, out.width, out.height, pad_x, pad_y, color
        )
    }
}

/// Convert a computed CSS color to `#rrggbb`.
///
/// `rgb(...)`/`rgba(...)` strings are converted (alpha is dropped), other
/// non-empty values such as hex or named colors pass through unchanged, and
/// anything unparsable becomes black.
pub fn css_color_to_hex(color: &str) -> String {
    static RGB: OnceLock<Regex> = OnceLock::new();
    let re = RGB.get_or_init(|| Regex::new(r"(\d+),\s*(\d+),\s*(\d+)").expect("static pattern"));

    let color = color.trim();
    if color.is_empty() {
        return "#000000".to_string();
    }
    if !color.starts_with("rgb") {
        return color.to_string();
    }

    let channels = re.captures(color).and_then(|caps| {
        let r = caps.get(1)?.as_str().parse::<u8>().ok()?;
        let g = caps.get(2)?.as_str().parse::<u8>().ok()?;
        let b = caps.get(3)?.as_str().parse::<u8>().ok()?;
        Some((r, g, b))
    });
    match channels {
        Some((r, g, b)) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        None => "#000000".to_string(),
    }
}

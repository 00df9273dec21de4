//! Frame capture: drive an `Engine` through page setup, animation control
//! and the per-frame seek/screenshot loop.

use crate::geometry::{css_color_to_hex, PaddingInfo, RenderPlan};
use crate::session::Session;
use crate::{scripts, Engine, Error, FitStrategy, Result, ScriptResult, VideoConfig, Viewport};
use image::imageops::FilterType;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Screenshots within this many pixels of the expected size are kept as-is.
const SIZE_TOLERANCE: u32 = 10;

/// Pauses between setup steps, giving the page time to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTiming {
    /// After load and layout changes, before measuring
    pub settle: Duration,
    /// After a corrective window resize
    pub resize: Duration,
    /// After the animation triggers run
    pub trigger: Duration,
    /// Free-running time before animations are paused
    pub warmup: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1500),
            resize: Duration::from_millis(500),
            trigger: Duration::from_millis(500),
            warmup: Duration::from_millis(100),
        }
    }
}

impl CaptureTiming {
    /// No pauses at all; for engines that render synchronously.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            resize: Duration::ZERO,
            trigger: Duration::ZERO,
            warmup: Duration::ZERO,
        }
    }
}

/// Result of a completed capture
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub frames_dir: PathBuf,
    pub frame_count: u32,
    /// Size of every written frame
    pub frame_size: Viewport,
    /// Encoder-side fit, present when frames still need scaling and padding
    pub padding: Option<PaddingInfo>,
    /// Detected page background (`#rrggbb`)
    pub bg_color: String,
    /// Copy of the first frame for inspection
    pub debug_frame: PathBuf,
}

/// What the page reports about its CSS animations
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimationInfo {
    #[serde(default)]
    pub stylesheets: u32,
    #[serde(default)]
    pub animations: Vec<String>,
    #[serde(default)]
    pub animated_elements: u32,
}

#[derive(Deserialize)]
struct Size {
    w: u32,
    h: u32,
}

/// File name of frame `n` (matches `encode::FRAME_PATTERN`).
pub fn frame_file_name(n: u32) -> String {
    format!("frame_{:06}.png", n)
}

/// Evaluate `script`, failing if the page threw.
fn run_script<E: Engine>(engine: &mut E, script: &str) -> Result<ScriptResult> {
    engine.evaluate_script_in_page(script)?.into_result()
}

fn read_size<E: Engine>(engine: &mut E, script: &str) -> Result<Viewport> {
    let res = run_script(engine, script)?;
    let size: Size = serde_json::from_value(res.value)
        .map_err(|e| Error::ScriptError(format!("unexpected size payload: {}", e)))?;
    Ok(Viewport::new(size.w, size.h))
}

fn probe_background<E: Engine>(engine: &mut E, session: &mut Session) -> String {
    match run_script(engine, scripts::BACKGROUND_PROBE) {
        Ok(res) => {
            let raw = res.as_str().unwrap_or_default().to_string();
            let hex = css_color_to_hex(&raw);
            session.log(format!("Detected background color: {} -> {}", raw, hex));
            hex
        }
        Err(e) => {
            session.log(format!("Could not detect background color, using black: {}", e));
            "#000000".to_string()
        }
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

fn is_interesting_console(text: &str) -> bool {
    text.contains("CreateJS") || text.contains("GSAP") || text.to_lowercase().contains("canvas")
}

/// Render `html_path` into numbered PNG frames under `work_dir/frames`.
///
/// The engine must already be sized to `plan.browser_viewport()`; it is left
/// open so the caller decides when to close it.
pub fn capture_frames<E: Engine>(
    engine: &mut E,
    html_path: &Path,
    work_dir: &Path,
    config: &VideoConfig,
    plan: &RenderPlan,
    timing: &CaptureTiming,
    session: &mut Session,
) -> Result<CaptureOutput> {
    if plan.total_frames == 0 {
        return Err(Error::ConfigError("nothing to capture: zero frames requested".into()));
    }

    let frames_dir = work_dir.join("frames");
    std::fs::create_dir_all(&frames_dir)?;

    let target = plan.target();
    let viewport = plan.browser_viewport();
    session.log(format!(
        "Source {} -> target {} [{}], scale {:.3}, scaled {}, padding {}px H / {}px V",
        plan.source, target, plan.format.name, plan.scale, plan.scaled, plan.pad_x, plan.pad_y
    ));
    session.log(format!(
        "{} frames ({} fps x {}s), {:.4}s per frame, animation speed {}x",
        plan.total_frames, config.fps, config.duration, plan.frame_time, config.animation_speed
    ));

    engine.set_window_size(viewport.width, viewport.height)?;
    let url = url::Url::from_file_path(html_path)
        .map_err(|_| Error::LoadError(format!("{} is not an absolute file path", html_path.display())))?;
    session.log(format!("Loading URL: {}", url));
    engine.load_url(url.as_str())?;

    let bg_color = if plan.needs_format_change {
        probe_background(engine, session)
    } else {
        "#000000".to_string()
    };

    if plan.scales_in_browser() {
        let canvases = run_script(engine, &scripts::proportional_scaling(plan, &bg_color))?;
        session.log(format!(
            "Applied proportional scaling ({} canvas buffers rescaled)",
            canvases.as_u64().unwrap_or(0)
        ));
    } else {
        run_script(engine, scripts::STANDARD_RESET)?;
        session.log(format!("Using standard rendering at {}", viewport));
    }

    pause(timing.settle);

    let actual = read_size(engine, scripts::VIEWPORT_SIZE)?;
    let body = read_size(engine, scripts::BODY_SIZE)?;
    session.log(format!("Actual viewport {}, body {}", actual, body));

    if plan.scales_in_browser() {
        if actual != target {
            correct_viewport(engine, target, actual, timing, session)?;
        } else {
            session.log("High-res viewport matches target");
        }
    } else if actual != viewport {
        session.log(format!("WARNING: viewport mismatch, expected {}, got {}", viewport, actual));
    }

    run_script(engine, scripts::ANIMATION_TRIGGER)?;
    pause(timing.trigger);
    for msg in engine.drain_console() {
        if is_interesting_console(&msg.text) {
            session.log(format!("Browser console [{}]: {}", msg.level, msg.text));
        }
    }

    let info: AnimationInfo = run_script(engine, scripts::ANIMATION_INFO)
        .ok()
        .and_then(|r| serde_json::from_value(r.value).ok())
        .unwrap_or_default();
    session.log(format!(
        "CSS info: {} stylesheets, {} keyframe animations, {} animated elements",
        info.stylesheets,
        info.animations.len(),
        info.animated_elements
    ));
    if !info.animations.is_empty() {
        session.log(format!("Keyframes found: {}", info.animations.join(", ")));
    }

    pause(timing.warmup);
    let paused = run_script(engine, scripts::PAUSE_ANIMATIONS)?.as_u64().unwrap_or(0);
    session.log(format!("Paused {} animations for frame-by-frame control", paused));

    session.progress(0.3, Some("Capturing frames..."));
    let debug_frame = work_dir.join("frame_fixed.png");
    let mut frame_size = viewport;
    let mut resize_to: Option<Viewport> = None;

    for n in 0..plan.total_frames {
        let status = format!("Frame {}/{}", n + 1, plan.total_frames);
        session.progress(0.3 + 0.4 * (n + 1) as f32 / plan.total_frames as f32, Some(&status));

        if session.is_cancelled() {
            session.log("Capture cancelled");
            return Err(Error::Cancelled);
        }

        let elapsed_ms = plan.elapsed_ms(n, config.animation_speed);
        if n % 30 == 0 {
            session.log(format!("Animation at {:.2}s (frame {})", elapsed_ms / 1000.0, n));
        }
        run_script(engine, &scripts::seek(elapsed_ms))?;

        let png = engine.render_png()?;
        let frame_path = frames_dir.join(frame_file_name(n));

        if n == 0 {
            let img = image::load_from_memory(&png)?;
            let shot = Viewport::new(img.width(), img.height());
            session.log(format!("Screenshot size {}, expected {}", shot, viewport));

            if shot.width.abs_diff(viewport.width) < SIZE_TOLERANCE
                && shot.height.abs_diff(viewport.height) < SIZE_TOLERANCE
            {
                std::fs::write(&frame_path, &png)?;
                frame_size = shot;
            } else {
                session.log(format!("WARNING: screenshot size mismatch, resizing frames to {}", viewport));
                img.resize_exact(viewport.width, viewport.height, FilterType::Lanczos3)
                    .save(&frame_path)?;
                resize_to = Some(viewport);
                frame_size = viewport;
            }

            std::fs::copy(&frame_path, &debug_frame)?;
            session.log(format!(
                "Saved debug frame {} ({}), background {}",
                debug_frame.display(),
                frame_size,
                bg_color
            ));
        } else if let Some(size) = resize_to {
            image::load_from_memory(&png)?
                .resize_exact(size.width, size.height, FilterType::Lanczos3)
                .save(&frame_path)?;
        } else {
            std::fs::write(&frame_path, &png)?;
        }

        if n % 10 == 0 || n + 1 == plan.total_frames {
            session.log(format!("Frame {} saved: {}", n + 1, frame_file_name(n)));
        }
    }

    log::info!("captured {} frames at {}", plan.total_frames, frame_size);

    let padding = (plan.fit == FitStrategy::Encoder && plan.needs_format_change).then(|| PaddingInfo {
        bg_color: bg_color.clone(),
        source: frame_size,
        target,
    });

    Ok(CaptureOutput {
        frames_dir,
        frame_count: plan.total_frames,
        frame_size,
        padding,
        bg_color,
        debug_frame,
    })
}

/// Grow the window by the shortfall so the inner viewport hits `target`.
fn correct_viewport<E: Engine>(
    engine: &mut E,
    target: Viewport,
    actual: Viewport,
    timing: &CaptureTiming,
    session: &mut Session,
) -> Result<()> {
    let width = (2 * target.width as i64 - actual.width as i64).max(1) as u32;
    let height = (2 * target.height as i64 - actual.height as i64).max(1) as u32;
    session.log(format!(
        "WARNING: viewport mismatch, expected {}, got {}; resizing window to {}x{}",
        target, actual, width, height
    ));

    engine.set_window_size(width, height)?;
    pause(timing.resize);

    let corrected = read_size(engine, scripts::VIEWPORT_SIZE)?;
    if corrected == target {
        session.log(format!("Viewport corrected to {}", corrected));
    } else {
        session.log(format!("WARNING: viewport still {}, continuing anyway", corrected));
    }
    Ok(())
}

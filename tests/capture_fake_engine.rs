use html5video::capture::{capture_frames, frame_file_name, CaptureTiming};
use html5video::geometry::RenderPlan;
use html5video::{
    scripts, ConsoleMessage, Engine, EngineConfig, Error, FitStrategy, Result, ScriptResult, Session, TargetFormat,
    VideoConfig, Viewport,
};
use serde_json::json;
use std::io::Cursor;

/// Renders solid frames at the inner viewport size (minus `shrink`) and
/// answers the capture scripts with canned values.
///
/// The inner viewport is the window less `chrome`, like a browser toolbar.
/// A script containing `throws` is reported as having thrown.
struct FakeEngine {
    window: Viewport,
    chrome: Viewport,
    shrink: u32,
    throws: Option<&'static str>,
    resizes: Vec<Viewport>,
    loaded: Option<String>,
    scripts: Vec<String>,
    console: Vec<ConsoleMessage>,
}

impl FakeEngine {
    fn with_shrink(shrink: u32) -> Self {
        Self {
            window: Viewport::new(0, 0),
            chrome: Viewport::new(0, 0),
            shrink,
            throws: None,
            resizes: Vec::new(),
            loaded: None,
            scripts: Vec::new(),
            console: vec![
                ConsoleMessage { level: "log".into(), text: "GSAP detected".into() },
                ConsoleMessage { level: "log".into(), text: "unrelated".into() },
            ],
        }
    }

    fn inner(&self) -> Viewport {
        Viewport::new(
            self.window.width.saturating_sub(self.chrome.width),
            self.window.height.saturating_sub(self.chrome.height),
        )
    }

    fn seeks(&self) -> Vec<&String> {
        self.scripts.iter().filter(|s| s.contains("var elapsedMs")).collect()
    }
}

impl Engine for FakeEngine {
    fn new(_config: EngineConfig) -> Result<Self> {
        Ok(Self::with_shrink(0))
    }

    fn set_window_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.window = Viewport::new(width, height);
        self.resizes.push(self.window);
        Ok(())
    }

    fn load_url(&mut self, url: &str) -> Result<()> {
        self.loaded = Some(url.to_string());
        Ok(())
    }

    fn evaluate_script_in_page(&mut self, script: &str) -> Result<ScriptResult> {
        self.scripts.push(script.to_string());
        if self.throws.is_some_and(|needle| script.contains(needle)) {
            return Ok(ScriptResult {
                value: json!("TypeError: ctx is null"),
                is_error: true,
            });
        }
        let inner = self.inner();
        let value = if script == scripts::VIEWPORT_SIZE || script == scripts::BODY_SIZE {
            json!({ "w": inner.width, "h": inner.height })
        } else if script == scripts::BACKGROUND_PROBE {
            json!("rgb(255, 0, 0)")
        } else if script == scripts::PAUSE_ANIMATIONS {
            json!(3)
        } else if script == scripts::ANIMATION_INFO {
            json!({ "stylesheets": 1, "animations": ["slide"], "animated_elements": 2 })
        } else if script.contains("__content_wrapper__") {
            json!(1)
        } else {
            serde_json::Value::Null
        };
        Ok(ScriptResult { value, is_error: false })
    }

    fn render_png(&self) -> Result<Vec<u8>> {
        let inner = self.inner();
        let w = inner.width.saturating_sub(self.shrink).max(1);
        let h = inner.height.saturating_sub(self.shrink).max(1);
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(buf)
    }

    fn drain_console(&mut self) -> Vec<ConsoleMessage> {
        std::mem::take(&mut self.console)
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

fn page() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html><body></body></html>").unwrap();
    dir
}

fn run(engine: &mut FakeEngine, config: &VideoConfig, session: &mut Session) -> Result<html5video::capture::CaptureOutput> {
    let site = page();
    let work = tempfile::tempdir().unwrap();
    let plan = RenderPlan::new(config);
    let html = std::path::absolute(site.path().join("index.html")).unwrap();
    let out = capture_frames(engine, &html, work.path(), config, &plan, &CaptureTiming::immediate(), session)?;

    // Inspect the frames before the temp dirs go away.
    let names: Vec<_> = std::fs::read_dir(&out.frames_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names.len() as u32, out.frame_count);
    for n in 0..out.frame_count {
        let dims = image::image_dimensions(out.frames_dir.join(frame_file_name(n))).unwrap();
        assert_eq!(Viewport::new(dims.0, dims.1), out.frame_size);
    }
    assert!(out.debug_frame.is_file());
    Ok(out)
}

#[test]
fn native_capture_writes_one_frame_per_tick() {
    let config = VideoConfig {
        width: 320,
        height: 240,
        fps: 4,
        duration: 2,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    let mut session = Session::new();

    let out = run(&mut engine, &config, &mut session).unwrap();

    assert_eq!(out.frame_count, 8);
    assert_eq!(out.frame_size, Viewport::new(320, 240));
    assert!(out.padding.is_none());
    assert!(engine.loaded.as_deref().unwrap().starts_with("file://"));
    assert!(engine.scripts.iter().any(|s| s == scripts::STANDARD_RESET));
    assert_eq!(engine.seeks().len(), 8);
    // No format change, so the background is never probed.
    assert!(!engine.scripts.iter().any(|s| s == scripts::BACKGROUND_PROBE));
}

#[test]
fn seeks_follow_animation_speed() {
    let config = VideoConfig {
        width: 200,
        height: 200,
        fps: 2,
        duration: 1,
        animation_speed: 0.5,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    run(&mut engine, &config, &mut Session::new()).unwrap();

    let seeks = engine.seeks();
    assert!(seeks[0].contains("var elapsedMs = 0.000;"));
    assert!(seeks[1].contains("var elapsedMs = 250.000;"));
}

#[test]
fn css_fit_renders_at_target_and_probes_background() {
    let config = VideoConfig {
        width: 300,
        height: 250,
        fps: 1,
        duration: 1,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    let mut session = Session::new();

    let out = run(&mut engine, &config, &mut session).unwrap();

    assert_eq!(out.frame_size, Viewport::new(1080, 1080));
    assert_eq!(out.bg_color, "#ff0000");
    assert!(out.padding.is_none());
    let scaling = engine.scripts.iter().find(|s| s.contains("__content_wrapper__")).unwrap();
    assert!(scaling.contains("var bg = '#ff0000';"));
    assert!(session.lines().iter().any(|l| l.contains("GSAP detected")));
    assert!(!session.lines().iter().any(|l| l.contains("unrelated")));
    assert!(session.lines().iter().any(|l| l.contains("Keyframes found: slide")));
}

#[test]
fn encoder_fit_captures_source_and_requests_padding() {
    let config = VideoConfig {
        width: 300,
        height: 250,
        fps: 1,
        duration: 1,
        fit: FitStrategy::Encoder,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);

    let out = run(&mut engine, &config, &mut Session::new()).unwrap();

    assert_eq!(out.frame_size, Viewport::new(300, 250));
    let padding = out.padding.unwrap();
    assert_eq!(padding.source, Viewport::new(300, 250));
    assert_eq!(padding.target, Viewport::new(1080, 1080));
    assert_eq!(padding.bg_color, "#ff0000");
}

#[test]
fn undersized_screenshots_are_resized() {
    let config = VideoConfig {
        width: 400,
        height: 300,
        fps: 3,
        duration: 1,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(40);
    let mut session = Session::new();

    let out = run(&mut engine, &config, &mut session).unwrap();

    assert_eq!(out.frame_size, Viewport::new(400, 300));
    assert!(session.lines().iter().any(|l| l.contains("screenshot size mismatch")));
}

#[test]
fn small_size_drift_is_tolerated() {
    let config = VideoConfig {
        width: 400,
        height: 300,
        fps: 1,
        duration: 1,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(5);

    let out = run(&mut engine, &config, &mut Session::new()).unwrap();

    assert_eq!(out.frame_size, Viewport::new(395, 295));
}

#[test]
fn cancelled_session_stops_capture() {
    let config = VideoConfig {
        width: 200,
        height: 200,
        fps: 10,
        duration: 1,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    let mut session = Session::new();
    session.cancel_token().cancel();

    let site = page();
    let work = tempfile::tempdir().unwrap();
    let plan = RenderPlan::new(&config);
    let html = std::path::absolute(site.path().join("index.html")).unwrap();
    let res = capture_frames(&mut engine, &html, work.path(), &config, &plan, &CaptureTiming::immediate(), &mut session);

    assert!(matches!(res, Err(Error::Cancelled)));
    assert!(engine.seeks().is_empty());
}

#[test]
fn progress_advances_through_capture() {
    use std::sync::{Arc, Mutex};

    let config = VideoConfig {
        width: 200,
        height: 200,
        fps: 2,
        duration: 1,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut session = Session::new().with_progress(move |v, _| sink.lock().unwrap().push(v));
    let mut engine = FakeEngine::with_shrink(0);

    run(&mut engine, &config, &mut session).unwrap();

    let values = seen.lock().unwrap().clone();
    assert_eq!(values.first().copied(), Some(0.3));
    assert!((values.last().copied().unwrap() - 0.7).abs() < 1e-6);
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn window_grows_by_viewport_shortfall() {
    let config = VideoConfig {
        width: 300,
        height: 250,
        fps: 1,
        duration: 1,
        target_format: TargetFormat::Square,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    engine.chrome = Viewport::new(0, 87);
    let mut session = Session::new();

    let out = run(&mut engine, &config, &mut session).unwrap();

    // Inner viewport came back 1080x993; the window is resized to 2*target - actual.
    assert_eq!(engine.resizes, vec![Viewport::new(1080, 1080), Viewport::new(1080, 1167)]);
    assert_eq!(engine.inner(), Viewport::new(1080, 1080));
    assert_eq!(out.frame_size, Viewport::new(1080, 1080));
    assert!(session.lines().iter().any(|l| l.contains("Viewport corrected to 1080x1080")));
}

#[test]
fn throwing_scaling_script_aborts_capture() {
    let config = VideoConfig {
        width: 300,
        height: 250,
        fps: 2,
        duration: 1,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    engine.throws = Some("__content_wrapper__");
    let mut session = Session::new();

    let site = page();
    let work = tempfile::tempdir().unwrap();
    let plan = RenderPlan::new(&config);
    let html = std::path::absolute(site.path().join("index.html")).unwrap();
    let res = capture_frames(&mut engine, &html, work.path(), &config, &plan, &CaptureTiming::immediate(), &mut session);

    assert!(matches!(res, Err(Error::ScriptError(ref m)) if m.contains("ctx is null")));
    assert!(engine.seeks().is_empty());
    assert!(!session.lines().iter().any(|l| l.contains("Applied proportional scaling")));
}

#[test]
fn throwing_seek_aborts_capture() {
    let config = VideoConfig {
        width: 200,
        height: 200,
        fps: 2,
        duration: 1,
        target_format: TargetFormat::Native,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    engine.throws = Some("var elapsedMs");

    let site = page();
    let work = tempfile::tempdir().unwrap();
    let plan = RenderPlan::new(&config);
    let html = std::path::absolute(site.path().join("index.html")).unwrap();
    let res = capture_frames(
        &mut engine,
        &html,
        work.path(),
        &config,
        &plan,
        &CaptureTiming::immediate(),
        &mut Session::new(),
    );

    assert!(matches!(res, Err(Error::ScriptError(_))));
    assert_eq!(engine.seeks().len(), 1);
}

#[test]
fn background_probe_failure_falls_back_to_black() {
    let config = VideoConfig {
        width: 300,
        height: 250,
        fps: 1,
        duration: 1,
        fit: FitStrategy::Encoder,
        ..Default::default()
    };
    let mut engine = FakeEngine::with_shrink(0);
    engine.throws = Some("getComputedStyle(document.body)");
    let mut session = Session::new();

    let out = run(&mut engine, &config, &mut session).unwrap();

    assert_eq!(out.bg_color, "#000000");
    assert!(session.lines().iter().any(|l| l.contains("using black")));
}

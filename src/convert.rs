//! The conversion pipeline: prepare input, capture frames, encode.

use crate::archive::{find_main_html, prepare_input};
use crate::capture::{capture_frames, CaptureTiming};
use crate::encode::{encode_video, EncodeOutcome, EncoderSettings};
use crate::geometry::{OutputFormat, RenderPlan};
use crate::session::Session;
use crate::{Engine, EngineConfig, Result, VideoConfig, Viewport};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a finished conversion produced
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub size_bytes: u64,
    pub frame_count: u32,
    /// Size of the captured frames (before any encoder-side padding)
    pub frame_size: Viewport,
    pub format: OutputFormat,
    pub outcome: EncodeOutcome,
    /// Working directory, when it was kept for inspection
    pub work_dir: Option<PathBuf>,
    pub elapsed: Duration,
}

impl ConversionReport {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Converter settings that are independent of a single video.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    /// Browser settings; the viewport is overridden per conversion
    pub engine: EngineConfig,
    pub encoder: EncoderSettings,
    pub timing: CaptureTiming,
    /// Also copy the first captured frame here
    pub debug_frame: Option<PathBuf>,
    /// Leave the temporary working directory on disk
    pub keep_work_dir: bool,
}

impl Converter {
    /// Convert `input` (zip, HTML file or directory) into `output` using engine `E`.
    pub fn convert<E: Engine>(
        &self,
        input: &Path,
        output: &Path,
        config: &VideoConfig,
        session: &mut Session,
    ) -> Result<ConversionReport> {
        config.validate()?;

        let work = tempfile::Builder::new().prefix("html5_to_video_").tempdir()?;
        session.log(format!("Working directory: {}", work.path().display()));

        let result = self.run::<E>(input, output, config, work.path(), session);

        let work_dir = if self.keep_work_dir {
            let kept = work.keep();
            session.log(format!("Keeping working directory {}", kept.display()));
            Some(kept)
        } else {
            let path = work.path().to_path_buf();
            match work.close() {
                Ok(()) => session.log(format!("Cleaned up working directory {}", path.display())),
                Err(e) => session.log(format!("WARNING: could not remove working directory {}: {}", path.display(), e)),
            }
            None
        };
        match &result {
            Ok(report) => log::info!("conversion finished in {:.1}s", report.elapsed.as_secs_f64()),
            Err(e) => log::warn!("conversion failed after {}: {}", session.elapsed_display(), e),
        }

        let mut report = result?;
        report.work_dir = work_dir;
        Ok(report)
    }

    /// Convert with the headless Chrome backend.
    #[cfg(feature = "cdp")]
    pub fn convert_cdp(
        &self,
        input: &Path,
        output: &Path,
        config: &VideoConfig,
        session: &mut Session,
    ) -> Result<ConversionReport> {
        self.convert::<crate::cdp::CdpEngine>(input, output, config, session)
    }

    fn run<E: Engine>(
        &self,
        input: &Path,
        output: &Path,
        config: &VideoConfig,
        work_dir: &Path,
        session: &mut Session,
    ) -> Result<ConversionReport> {
        session.progress(0.1, Some("Extracting files..."));
        let root = prepare_input(input, work_dir)?;
        let html = find_main_html(&root)?;
        session.log(format!("Main HTML: {}", html.display()));

        let plan = RenderPlan::new(config);
        session.log(format!(
            "Source {}, output {} ({}), {} fit",
            plan.source,
            plan.target(),
            plan.format.name,
            match plan.fit {
                crate::FitStrategy::Css => "browser",
                crate::FitStrategy::Encoder => "encoder",
            }
        ));

        session.progress(0.2, Some("Loading browser..."));
        let engine_config = EngineConfig {
            viewport: plan.browser_viewport(),
            ..self.engine.clone()
        };
        let mut engine = E::new(engine_config)?;
        session.log("Browser started");

        let captured = capture_frames(&mut engine, &html, work_dir, config, &plan, &self.timing, session);
        if let Err(e) = engine.close() {
            log::warn!("failed to close browser: {}", e);
        }
        let captured = captured?;

        if let Some(dest) = &self.debug_frame {
            std::fs::copy(&captured.debug_frame, dest)?;
            session.log(format!("Debug frame copied to {}", dest.display()));
        }

        let outcome = encode_video(
            &captured.frames_dir,
            output,
            config,
            captured.padding.as_ref(),
            &self.encoder,
            session,
        )?;

        let size_bytes = std::fs::metadata(output)?.len();
        let report = ConversionReport {
            output: output.to_path_buf(),
            size_bytes,
            frame_count: captured.frame_count,
            frame_size: captured.frame_size,
            format: plan.format,
            outcome,
            work_dir: None,
            elapsed: session.elapsed(),
        };
        session.log(format!(
            "Video created: {} ({:.2} MB) in {}",
            output.display(),
            report.size_mb(),
            session.elapsed_display()
        ));
        log::info!("wrote {} ({} frames, {:.2} MB)", output.display(), report.frame_count, report.size_mb());
        session.progress(1.0, Some("Complete!"));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct NeverEngine;

    impl Engine for NeverEngine {
        fn new(_config: EngineConfig) -> Result<Self> {
            Err(Error::InitializationError("no browser in unit tests".into()))
        }
        fn set_window_size(&mut self, _w: u32, _h: u32) -> Result<()> {
            Ok(())
        }
        fn load_url(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }
        fn evaluate_script_in_page(&mut self, _script: &str) -> Result<crate::ScriptResult> {
            unreachable!()
        }
        fn render_png(&self) -> Result<Vec<u8>> {
            unreachable!()
        }
        fn drain_console(&mut self) -> Vec<crate::ConsoleMessage> {
            Vec::new()
        }
        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn invalid_config_fails_before_any_work() {
        let converter = Converter::default();
        let config = VideoConfig { fps: 0, ..Default::default() };
        let mut session = Session::new();
        let err = converter
            .convert::<NeverEngine>(Path::new("missing.zip"), Path::new("out.mp4"), &config, &mut session)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(session.lines().is_empty());
    }

    #[test]
    fn missing_input_is_reported() {
        let converter = Converter::default();
        let mut session = Session::new();
        let err = converter
            .convert::<NeverEngine>(
                Path::new("/nonexistent/banner.zip"),
                Path::new("out.mp4"),
                &VideoConfig::default(),
                &mut session,
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput(_)));
    }

    #[test]
    fn engine_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("index.html");
        std::fs::write(&page, "<html><body>hi</body></html>").unwrap();

        let converter = Converter::default();
        let mut session = Session::new();
        let err = converter
            .convert::<NeverEngine>(&page, &dir.path().join("out.mp4"), &VideoConfig::default(), &mut session)
            .unwrap_err();
        assert!(matches!(err, Error::InitializationError(_)));
    }

    #[test]
    fn work_dir_is_removed_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("index.html");
        std::fs::write(&page, "<html></html>").unwrap();

        let mut session = Session::new();
        let _ = Converter::default().convert::<NeverEngine>(&page, &dir.path().join("out.mp4"), &VideoConfig::default(), &mut session);

        let line = session
            .lines()
            .iter()
            .find(|l| l.contains("Cleaned up working directory"))
            .unwrap()
            .clone();
        let path = line.rsplit("Cleaned up working directory ").next().unwrap();
        assert!(path.contains("html5_to_video_"));
        assert!(!Path::new(path).exists());
    }

    #[test]
    fn kept_work_dir_survives_failure() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("index.html");
        std::fs::write(&page, "<html></html>").unwrap();

        let converter = Converter { keep_work_dir: true, ..Default::default() };
        let mut session = Session::new();
        let res = converter.convert::<NeverEngine>(&page, &dir.path().join("out.mp4"), &VideoConfig::default(), &mut session);
        assert!(res.is_err());

        let line = session.lines().iter().find(|l| l.contains("Keeping working directory")).unwrap().clone();
        let path = PathBuf::from(line.rsplit("Keeping working directory ").next().unwrap());
        assert!(path.join("extract/index.html").is_file());
        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn report_size_in_megabytes() {
        let report = ConversionReport {
            output: PathBuf::from("out.mp4"),
            size_bytes: 3 * 1024 * 1024,
            frame_count: 1,
            frame_size: Viewport::new(100, 100),
            format: OutputFormat::square(),
            outcome: EncodeOutcome::Primary,
            work_dir: None,
            elapsed: Duration::ZERO,
        };
        assert!((report.size_mb() - 3.0).abs() < 1e-9);
    }
}

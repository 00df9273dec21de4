//! FFmpeg invocation: command building, filter selection and the
//! primary-then-fallback encode.

use crate::geometry::{even, upscale_filter, PaddingInfo, UNSHARP};
use crate::session::Session;
use crate::{Error, Result, VideoConfig, Viewport};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

/// printf-style input pattern matching `capture::frame_file_name`.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// Frame rate ceiling for the fallback encode.
const FALLBACK_MAX_FPS: u32 = 30;
/// Used by the fallback when the first frame cannot be read.
const FALLBACK_SIZE: Viewport = Viewport::new(1280, 720);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where to find the encoder
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Binary name or path, resolved with `which`
    pub binary: PathBuf,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

/// Builder for a single FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    input_args: Vec<String>,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    /// Add an argument before `-i`.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an argument after `-i`.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn framerate(self, fps: u32) -> Self {
        self.input_arg("-framerate").input_arg(fps.to_string())
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn pixel_format(self, fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(fmt)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string()];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Which argument set produced the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Primary,
    /// The primary encode failed; the baseline-profile fallback succeeded
    Fallback,
}

/// Sorted PNG files in `frames_dir`.
pub fn frame_files(frames_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = std::fs::read_dir(frames_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect::<Vec<_>>();
    if frames.is_empty() {
        return Err(Error::NoFrames(frames_dir.to_path_buf()));
    }
    frames.sort();
    Ok(frames)
}

/// Choose the `-vf` chain for the primary encode.
///
/// `first_frame` is `None` when the frame could not be read; the filter then
/// scales to the even configured (or padded) target size.
pub fn select_filter(
    first_frame: Option<Viewport>,
    padding: Option<&PaddingInfo>,
    config: &VideoConfig,
) -> String {
    match (first_frame, padding) {
        (Some(_), Some(pad)) if config.enhanced_upscaling => {
            upscale_filter(pad.source, pad.output_size(), true)
        }
        (Some(_), Some(pad)) => pad.filter(),
        (Some(frame), None) => {
            let (w, h) = (even(frame.width), even(frame.height));
            if (w, h) != (frame.width, frame.height) {
                format!("scale={}:{}:flags=lanczos,{}", w, h, UNSHARP)
            } else {
                UNSHARP.to_string()
            }
        }
        (None, _) => {
            let target = padding.map(|p| p.target).unwrap_or_else(|| config.source());
            format!("scale={}:{}:flags=lanczos,{}", even(target.width), even(target.height), UNSHARP)
        }
    }
}

/// Codec-dependent quality arguments.
fn codec_args(config: &VideoConfig) -> Vec<String> {
    match config.codec.as_str() {
        "libx264" | "libx265" => vec![
            "-crf".into(),
            config.crf.to_string(),
            "-preset".into(),
            config.preset.clone(),
        ],
        "libvpx-vp9" => vec![
            "-b:v".into(),
            config.bitrate.clone(),
            "-crf".into(),
            config.crf.to_string(),
        ],
        _ => vec!["-b:v".into(), config.bitrate.clone()],
    }
}

pub fn primary_command(input_pattern: &Path, output: &Path, filter: &str, config: &VideoConfig) -> FfmpegCommand {
    FfmpegCommand::new(input_pattern, output)
        .framerate(config.fps)
        .video_filter(filter)
        .video_codec(config.codec.clone())
        .pixel_format("yuv420p")
        .output_args(codec_args(config))
        .output_args(["-movflags", "+faststart"])
}

/// Conservative H.264 baseline encode at the even first-frame size.
pub fn fallback_command(input_pattern: &Path, output: &Path, frame: Option<Viewport>, fps: u32) -> FfmpegCommand {
    let size = frame
        .map(|f| Viewport::new(even(f.width), even(f.height)))
        .unwrap_or(FALLBACK_SIZE);
    let fps = fps.min(FALLBACK_MAX_FPS);
    FfmpegCommand::new(input_pattern, output)
        .framerate(fps)
        .video_filter(format!("scale={}:{}:flags=lanczos,{}", size.width, size.height, UNSHARP))
        .video_codec("libx264")
        .pixel_format("yuv420p")
        .output_args(["-profile:v", "baseline", "-level", "3.0", "-r"])
        .output_arg(fps.to_string())
}

/// Finished encoder process
#[derive(Debug)]
pub struct RunOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Resolve the encoder binary on PATH (or as given).
pub fn locate_encoder(settings: &EncoderSettings) -> Result<PathBuf> {
    which::which(&settings.binary).map_err(|e| Error::EncoderNotFound(format!("{}: {}", settings.binary.display(), e)))
}

/// Run a command to completion, killing it if the session is cancelled.
pub fn run(binary: &Path, cmd: &FfmpegCommand, session: &mut Session) -> Result<RunOutput> {
    let args = cmd.build_args();
    session.log(format!("Command: {} {}", binary.display(), args.join(" ")));

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    session.log(format!("FFmpeg process started (PID: {})", child.id()));

    // Drain stderr concurrently so a chatty encoder cannot fill the pipe.
    let stderr_pipe = child.stderr.take();
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr_pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if session.is_cancelled() {
            session.log("Cancellation detected, killing FFmpeg process");
            let _ = child.kill();
            let _ = child.wait();
            let _ = reader.join();
            return Err(Error::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stderr = reader.join().unwrap_or_default();
    session.log(format!("FFmpeg process finished ({})", status));
    Ok(RunOutput { status, stderr })
}

fn log_stderr(session: &mut Session, stderr: &str) {
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        session.log(line);
    }
}

/// Encode the captured frames into `output`, retrying once with the
/// fallback argument set if the primary encode exits non-zero.
pub fn encode_video(
    frames_dir: &Path,
    output: &Path,
    config: &VideoConfig,
    padding: Option<&PaddingInfo>,
    settings: &EncoderSettings,
    session: &mut Session,
) -> Result<EncodeOutcome> {
    let frames = frame_files(frames_dir)?;
    session.log(format!("Found {} PNG frames in {}", frames.len(), frames_dir.display()));
    session.progress(0.75, Some("Encoding video..."));

    let first_frame = match image::image_dimensions(&frames[0]) {
        Ok((w, h)) => Some(Viewport::new(w, h)),
        Err(e) => {
            session.log(format!("ERROR: could not read first frame: {}", e));
            None
        }
    };
    if let Some(pad) = padding {
        session.log(format!(
            "Format conversion {} -> {} on {}",
            pad.source, pad.target, pad.bg_color
        ));
    }

    let binary = locate_encoder(settings)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let pattern = frames_dir.join(FRAME_PATTERN);
    let filter = select_filter(first_frame, padding, config);
    session.log(format!(
        "Codec {}, fps {}, crf {}, preset {}, bitrate {}, filter {}",
        config.codec, config.fps, config.crf, config.preset, config.bitrate, filter
    ));

    let primary = run(&binary, &primary_command(&pattern, output, &filter, config), session)?;
    if primary.status.success() {
        log_stderr(session, &primary.stderr);
        return Ok(EncodeOutcome::Primary);
    }

    session.log(format!("Primary encode failed ({}):", primary.status));
    log_stderr(session, &primary.stderr);
    log::warn!("primary encode failed ({}), retrying with baseline fallback", primary.status);

    let fallback = run(&binary, &fallback_command(&pattern, output, first_frame, config.fps), session)?;
    if fallback.status.success() {
        session.log("Fallback encoding succeeded using baseline profile");
        log_stderr(session, &fallback.stderr);
        return Ok(EncodeOutcome::Fallback);
    }

    session.log(format!("Fallback encode failed ({}):", fallback.status));
    log_stderr(session, &fallback.stderr);
    Err(Error::EncodeFailed {
        exit_code: fallback.status.code(),
        stderr: fallback.stderr.trim().to_string(),
    })
}

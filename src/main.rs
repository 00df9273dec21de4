use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use html5video::archive::{find_main_html, prepare_input};
use html5video::async_api::ConversionWorker;
use html5video::encode::{EncodeOutcome, EncoderSettings};
use html5video::{analyze_html, Analysis, Converter, EngineConfig, FitStrategy, Session, TargetFormat, VideoConfig};

#[derive(Parser, Debug)]
#[command(name = "html5video", version, about = "Render HTML5 banners and animations to video")]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect size, frame rate and duration of a page or archive.
    Analyze(AnalyzeArgs),
    /// Render a page or archive to a video file.
    Convert(ConvertArgs),
    /// Run the upload/convert web server.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// .zip, .html/.htm file or directory
    input: PathBuf,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ToolArgs {
    /// Chrome/Chromium binary.
    #[arg(long, env = "HTML5VIDEO_BROWSER")]
    browser: Option<PathBuf>,

    /// FFmpeg binary.
    #[arg(long, env = "HTML5VIDEO_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// .zip, .html/.htm file or directory
    input: PathBuf,

    /// Output video path.
    #[arg(short, long)]
    out: PathBuf,

    /// Source width (detected when omitted).
    #[arg(long)]
    width: Option<u32>,

    /// Source height (detected when omitted).
    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Seconds of animation to record.
    #[arg(long)]
    duration: Option<u32>,

    /// Animation speed multiplier (0.5 - 1.5).
    #[arg(long, default_value_t = 0.85)]
    speed: f64,

    #[arg(long, default_value = "libx264")]
    codec: String,

    #[arg(long, default_value_t = 18)]
    crf: u8,

    #[arg(long, default_value = "slow")]
    preset: String,

    #[arg(long, default_value = "10M")]
    bitrate: String,

    /// auto, square, vertical or native.
    #[arg(long, default_value = "auto")]
    format: TargetFormat,

    /// css (scale in the page) or encoder (scale and pad in FFmpeg).
    #[arg(long, default_value = "css")]
    fit: FitStrategy,

    /// spline36 and stronger sharpening for large encoder-side upscales.
    #[arg(long)]
    enhanced_upscaling: bool,

    #[command(flatten)]
    tools: ToolArgs,

    /// Write the conversion transcript here (also on failure).
    #[arg(long)]
    debug_log: Option<PathBuf>,

    /// Save the first captured frame here.
    #[arg(long)]
    debug_frame: Option<PathBuf>,

    /// Keep the temporary working directory.
    #[arg(long)]
    keep_work_dir: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    #[command(flatten)]
    tools: ToolArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init()
        .ok();

    match cli.cmd {
        Command::Analyze(args) => cmd_analyze(args),
        Command::Convert(args) => cmd_convert(args),
        Command::Serve(args) => cmd_serve(args),
    }
}

/// Analyze the main document of any supported input.
fn analyze_input(input: &Path) -> anyhow::Result<Analysis> {
    let work = tempfile::tempdir().context("create temp dir")?;
    let root = prepare_input(input, work.path()).with_context(|| format!("read input '{}'", input.display()))?;
    let html = find_main_html(&root)?;
    log::debug!("main document {}", html.display());
    Ok(analyze_html(&html)?)
}

fn cmd_analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    let analysis = analyze_input(&args.input)?;
    let format = html5video::geometry::detect_best_format(html5video::Viewport::new(analysis.width, analysis.height));

    if args.json {
        let out = serde_json::json!({
            "analysis": analysis,
            "recommended_format": format,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Size:      {}x{}", analysis.width, analysis.height);
        println!("FPS:       {}", analysis.fps);
        println!("Duration:  {}s", analysis.duration);
        println!("Detected:  {}", if analysis.detected { "yes" } else { "no (defaults)" });
        println!("Format:    {}", format.name);
    }
    Ok(())
}

fn converter_for(tools: &ToolArgs) -> Converter {
    Converter {
        engine: EngineConfig {
            browser_path: tools.browser.clone(),
            ..Default::default()
        },
        encoder: EncoderSettings {
            binary: tools.ffmpeg.clone(),
        },
        ..Default::default()
    }
}

fn cmd_convert(args: ConvertArgs) -> anyhow::Result<()> {
    let needs_detection = args.width.is_none() || args.height.is_none() || args.fps.is_none() || args.duration.is_none();
    let detected = if needs_detection {
        let analysis = analyze_input(&args.input)?;
        log::info!(
            "detected {}x{} @ {} fps, {}s",
            analysis.width,
            analysis.height,
            analysis.fps,
            analysis.duration
        );
        analysis
    } else {
        Analysis::default()
    };

    let config = VideoConfig {
        width: args.width.unwrap_or(detected.width),
        height: args.height.unwrap_or(detected.height),
        fps: args.fps.unwrap_or(detected.fps),
        duration: args.duration.unwrap_or(detected.duration),
        codec: args.codec,
        bitrate: args.bitrate,
        animation_speed: args.speed,
        preset: args.preset,
        crf: args.crf,
        target_format: args.format,
        fit: args.fit,
        enhanced_upscaling: args.enhanced_upscaling,
    };
    if !needs_detection || args.width.is_some() || args.height.is_some() {
        config.validate_manual().context("invalid manual settings")?;
    }

    let converter = Converter {
        debug_frame: args.debug_frame,
        keep_work_dir: args.keep_work_dir,
        ..converter_for(&args.tools)
    };

    let mut session = Session::new().with_progress(|value, message| {
        if let Some(message) = message {
            log::info!("[{:>3.0}%] {}", value * 100.0, message);
        }
    });
    let result = converter.convert_cdp(&args.input, &args.out, &config, &mut session);

    if let Some(path) = &args.debug_log {
        std::fs::write(path, session.transcript())
            .with_context(|| format!("write debug log '{}'", path.display()))?;
    }

    let report = result.with_context(|| format!("convert '{}'", args.input.display()))?;
    if report.outcome == EncodeOutcome::Fallback {
        log::warn!("primary encode failed; output uses the baseline fallback");
    }
    if let Some(dir) = &report.work_dir {
        eprintln!("work dir kept at {}", dir.display());
    }
    eprintln!(
        "wrote {} ({} frames, {}, {:.2} MB, {:.1}s)",
        report.output.display(),
        report.frame_count,
        report.format.name,
        report.size_mb(),
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let worker = ConversionWorker::spawn(converter_for(&args.tools));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")?;
    runtime
        .block_on(html5video::server::serve(&args.host, args.port, worker))
        .with_context(|| format!("serve on {}:{}", args.host, args.port))?;
    Ok(())
}

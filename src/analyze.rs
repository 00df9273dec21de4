//! Static analysis of HTML5 content to pick capture settings.
//!
//! The analyzer never runs the page. It scans the markup and inline
//! scripts/styles for size, duration and animation-density hints and falls
//! back to 1920x1080, 10s at 60 fps when nothing usable is found.

use crate::Result;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_DURATION: u32 = 10;
const DEFAULT_FPS: u32 = 60;

const WIDTH_RANGE: std::ops::RangeInclusive<u32> = 100..=7680;
const HEIGHT_RANGE: std::ops::RangeInclusive<u32> = 100..=4320;

/// Detected durations are capped; long timeouts are usually not the animation.
const MAX_DETECTED_DURATION: u32 = 20;

const ANIMATION_KEYWORDS: [&str; 4] = ["animation", "transition", "transform", "requestanimationframe"];

/// Settings inferred from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub width: u32,
    pub height: u32,
    /// Seconds
    pub duration: u32,
    pub fps: u32,
    /// Whether any animation keyword was present
    pub detected: bool,
    /// Whether the size came from an `ad.size` meta tag
    pub ad_size: bool,
}

struct Patterns {
    width: Vec<Regex>,
    height: Vec<Regex>,
    duration: Vec<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |list: &[&str]| -> Vec<Regex> {
            list.iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("static pattern"))
                .collect()
        };
        Patterns {
            width: compile(&[
                r#"viewport.*width["\s:=]+(\d+)"#,
                r#"width:\s*(\d+)px"#,
                r#"canvas.*width["\s:=]+(\d+)"#,
                r#"<meta.*content=.*width=(\d+)"#,
            ]),
            height: compile(&[
                r#"viewport.*height["\s:=]+(\d+)"#,
                r#"height:\s*(\d+)px"#,
                r#"canvas.*height["\s:=]+(\d+)"#,
                r#"<meta.*content=.*height=(\d+)"#,
            ]),
            duration: compile(&[
                r#"duration["\s:=]+(\d+)"#,
                r#"animation.*?(\d+)s"#,
                r#"setTimeout.*?(\d+)\s*\*\s*1000"#,
            ]),
        }
    })
}

/// Analyze an HTML file on disk. Invalid UTF-8 is replaced, not rejected.
pub fn analyze_html(path: impl AsRef<Path>) -> Result<Analysis> {
    let bytes = std::fs::read(path.as_ref())?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(analyze_source(&content))
}

/// Analyze HTML source text.
pub fn analyze_source(content: &str) -> Analysis {
    let pats = patterns();

    let (mut width, mut height, mut ad_size) = (DEFAULT_WIDTH, DEFAULT_HEIGHT, false);
    match ad_size_meta(content) {
        Some((w, h)) => {
            width = w;
            height = h;
            ad_size = true;
        }
        None => {
            if let Some(w) = first_in_range(&pats.width, content, &WIDTH_RANGE) {
                width = w;
            }
            if let Some(h) = first_in_range(&pats.height, content, &HEIGHT_RANGE) {
                height = h;
            }
        }
    }

    let duration = detect_duration(&pats.duration, content).unwrap_or(DEFAULT_DURATION);

    let lowered = content.to_lowercase();
    let animation_count: usize = ANIMATION_KEYWORDS
        .iter()
        .map(|kw| lowered.matches(kw).count())
        .sum();

    let fps = if animation_count > 10 {
        60
    } else if animation_count > 3 {
        30
    } else {
        24
    };

    Analysis {
        width,
        height,
        duration,
        fps,
        detected: animation_count > 0,
        ad_size,
    }
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            duration: DEFAULT_DURATION,
            fps: DEFAULT_FPS,
            detected: false,
            ad_size: false,
        }
    }
}

/// The first pattern whose first match is within `range` wins. A match out
/// of range moves on to the next pattern rather than the next match.
fn first_in_range(patterns: &[Regex], content: &str, range: &std::ops::RangeInclusive<u32>) -> Option<u32> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(content)?;
        let value: u32 = caps.get(1)?.as_str().parse().ok()?;
        range.contains(&value).then_some(value)
    })
}

fn detect_duration(patterns: &[Regex], content: &str) -> Option<u32> {
    for re in patterns {
        let candidates: Vec<u32> = re
            .captures_iter(content)
            .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
            .filter(|v| *v < 1000)
            .map(|v| v as u32)
            .collect();
        if let Some(max) = candidates.into_iter().max() {
            return Some(max.min(MAX_DETECTED_DURATION));
        }
    }
    None
}

/// `<meta name="ad.size" content="width=300,height=250">`, the standard size
/// declaration for HTML5 display ads.
fn ad_size_meta(content: &str) -> Option<(u32, u32)> {
    let document = Html::parse_document(content);
    let selector = Selector::parse(r#"meta[name="ad.size"]"#).ok()?;
    let meta = document.select(&selector).next()?;
    let declared = meta.value().attr("content")?;

    let mut width = None;
    let mut height = None;
    for part in declared.split([',', ';']) {
        let mut kv = part.splitn(2, '=');
        let key = kv.next()?.trim().to_ascii_lowercase();
        let value = kv.next().and_then(|v| v.trim().parse::<u32>().ok());
        match key.as_str() {
            "width" => width = value,
            "height" => height = value,
            _ => {}
        }
    }

    let (w, h) = (width?, height?);
    (WIDTH_RANGE.contains(&w) && HEIGHT_RANGE.contains(&h)).then_some((w, h))
}

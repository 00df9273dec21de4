//! Chrome DevTools Protocol adapter implementation

use crate::{ConsoleMessage, Engine, EngineConfig, Error, Result, ScriptResult};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Page, Runtime};
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};
use log::warn;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Browser binaries tried in order when no path is configured.
const KNOWN_BROWSERS: &[&str] = &[
    "/Applications/Comet.app/Contents/MacOS/Comet",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
];

/// Switches for deterministic, chrome-free frames.
const BROWSER_ARGS: &[&str] = &[
    "--hide-scrollbars",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--force-device-scale-factor=1",
];

const CONSOLE_BINDING: &str = "__h5v_console";

/// Forwards console calls to the exposed binding. Installed on every new document.
const CONSOLE_WRAPPER: &str = r#"(function(){
    const bind = window.__h5v_console;
    if (!bind) return;
    ['log','info','warn','error'].forEach(function(k){
        const orig = console[k];
        console[k] = function(...args){
            try{ bind(JSON.stringify({ level:k, args: args.map(a=>String(a)) })); }catch(e){}
            try{ orig.apply(console, args); }catch(e){}
        };
    });
})();"#;

/// First existing browser from the well-known install locations.
pub fn find_browser_binary() -> Option<PathBuf> {
    KNOWN_BROWSERS.iter().map(PathBuf::from).find(|p| p.exists())
}

/// CDP-based headless engine implementation (uses the `headless_chrome` crate)
///
/// Launches a headless Chrome instance, manages a single tab and provides the
/// `Engine` trait over it.
pub struct CdpEngine {
    browser: Browser,
    tab: Arc<Tab>,
    console: Arc<Mutex<Vec<ConsoleMessage>>>,
    script_timeout_ms: u64,
}

impl CdpEngine {
    fn install_console_capture(tab: &Tab, sink: Arc<Mutex<Vec<ConsoleMessage>>>) {
        let _ = tab
            .expose_function(
                CONSOLE_BINDING,
                Arc::new(move |payload: serde_json::Value| {
                    if let Some(msg) = parse_console_payload(payload) {
                        if let Ok(mut buf) = sink.lock() {
                            buf.push(msg);
                        }
                    }
                }),
            )
            .map_err(|e| warn!("Failed to expose console binding: {}", e))
            .ok();

        let _ = tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: CONSOLE_WRAPPER.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| warn!("Failed to inject console wrapper: {}", e))
            .ok();
    }
}

/// Decode `{level, args}` sent by the console wrapper (possibly as a JSON string).
fn parse_console_payload(payload: serde_json::Value) -> Option<ConsoleMessage> {
    let msg = match payload {
        serde_json::Value::String(s) => serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s)),
        other => other,
    };

    let level = msg.get("level")?.as_str().unwrap_or("").to_string();
    let text = match msg.get("args") {
        Some(serde_json::Value::Array(args)) => args
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(ConsoleMessage { level, text })
}

/// Unpack the `{ok}` / `{error}` envelope produced by the evaluation wrapper.
fn decode_evaluation(raw: Option<serde_json::Value>) -> ScriptResult {
    let envelope = match raw {
        Some(serde_json::Value::String(json)) => serde_json::from_str(&json).unwrap_or(serde_json::Value::Null),
        Some(other) => other,
        None => serde_json::Value::Null,
    };

    match envelope {
        serde_json::Value::Object(mut map) => match map.remove("error") {
            Some(err) => ScriptResult {
                value: err,
                is_error: true,
            },
            None => ScriptResult {
                value: map.remove("ok").unwrap_or(serde_json::Value::Null),
                is_error: false,
            },
        },
        _ => ScriptResult {
            value: serde_json::Value::Null,
            is_error: false,
        },
    }
}

impl Engine for CdpEngine {
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized,
    {
        let path = config.browser_path.clone().or_else(find_browser_binary);
        match &path {
            Some(p) => log::info!("using browser {}", p.display()),
            None => warn!("no browser binary found in well-known locations, using system default"),
        }

        let args: Vec<&OsStr> = BROWSER_ARGS
            .iter()
            .map(OsStr::new)
            .chain(config.extra_args.iter().map(OsStr::new))
            .collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .path(path)
            .args(args)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_millis(config.timeout_ms));

        let console = Arc::new(Mutex::new(Vec::new()));
        Self::install_console_capture(&tab, console.clone());

        Ok(Self {
            browser,
            tab,
            console,
            script_timeout_ms: config.script_timeout_ms,
        })
    }

    fn set_window_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.tab
            .set_bounds(Bounds::Normal {
                left: Some(0),
                top: Some(0),
                width: Some(width as f64),
                height: Some(height as f64),
            })
            .map_err(|e| Error::CdpError(format!("Failed to resize window: {}", e)))?;
        Ok(())
    }

    fn load_url(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        Ok(())
    }

    /// The expression result is serialized in the page so objects come back by
    /// value. A throw, a syntax error or running past `script_timeout_ms` is
    /// reported with `is_error` set.
    fn evaluate_script_in_page(&mut self, script: &str) -> Result<ScriptResult> {
        let wrapped = format!(
            "(() => {{ try {{ return JSON.stringify({{ ok: ({}) }}); }} \
             catch (e) {{ return JSON.stringify({{ error: String((e && e.stack) || e) }}); }} }})()",
            script.trim().trim_end_matches(';')
        );
        let response = self
            .tab
            .call_method(Runtime::Evaluate {
                expression: wrapped,
                return_by_value: Some(false),
                generate_preview: Some(false),
                silent: Some(false),
                await_promise: Some(true),
                include_command_line_api: Some(false),
                user_gesture: Some(false),
                object_group: None,
                context_id: None,
                throw_on_side_effect: None,
                timeout: Some(self.script_timeout_ms as f64),
                disable_breaks: None,
                repl_mode: None,
                allow_unsafe_eval_blocked_by_csp: None,
                unique_context_id: None,
                serialization_options: None,
            })
            .map_err(|e| Error::ScriptError(format!("Direct evaluation failed: {}", e)))?;

        if let Some(details) = response.exception_details {
            let message = details
                .exception
                .and_then(|ex| ex.description)
                .unwrap_or(details.text);
            return Ok(ScriptResult {
                value: serde_json::Value::String(message),
                is_error: true,
            });
        }
        if response.result.subtype == Some(Runtime::RemoteObjectSubtype::Error) {
            return Ok(ScriptResult {
                value: serde_json::Value::String(response.result.description.unwrap_or_else(|| "script error".into())),
                is_error: true,
            });
        }
        Ok(decode_evaluation(response.result.value))
    }

    fn render_png(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn drain_console(&mut self) -> Vec<ConsoleMessage> {
        self.console
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the child process.
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_payload_from_json_string() {
        let payload = serde_json::Value::String(r#"{"level":"warn","args":["a",1]}"#.into());
        let msg = parse_console_payload(payload).unwrap();
        assert_eq!(msg.level, "warn");
        assert_eq!(msg.text, "a 1");
    }

    #[test]
    fn console_payload_without_level_is_ignored() {
        assert!(parse_console_payload(serde_json::json!({ "args": [] })).is_none());
    }

    #[test]
    fn evaluation_envelope_carries_value() {
        let res = decode_evaluation(Some(serde_json::Value::String(r#"{"ok":{"w":300,"h":250}}"#.into())));
        assert!(!res.is_error);
        assert_eq!(res.value["w"], 300);

        // `undefined` results are dropped by JSON.stringify.
        let res = decode_evaluation(Some(serde_json::Value::String("{}".into())));
        assert!(!res.is_error);
        assert!(res.value.is_null());
    }

    #[test]
    fn evaluation_envelope_reports_throw() {
        let res = decode_evaluation(Some(serde_json::Value::String(
            r#"{"error":"TypeError: Cannot read properties of null"}"#.into(),
        )));
        assert!(res.is_error);
        assert_eq!(res.as_str(), Some("TypeError: Cannot read properties of null"));
        assert!(res.into_result().is_err());
    }

    #[test]
    fn test_cdp_engine_creation() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let result = CdpEngine::new(EngineConfig::default());
        if let Err(e) = result {
            eprintln!("Skipping CDP engine creation test because Chrome is not available or failed to launch: {}", e);
            return;
        }
        assert!(result.is_ok());
    }
}

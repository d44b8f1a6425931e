//! Chrome, driven over the DevTools protocol.

use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::protocol::cdp::Page::{self, CaptureScreenshotFormatOption};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserOptions;
use crate::engine::{Engine, EngineResult, evaluate_json};
use crate::error::{EngineError, Error, Result};
use crate::session::{OriginStorage, StorageState};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Chrome refuses captures taller than its maximum texture size.
const MAX_CAPTURE_PX: f64 = 16_384.0;

const STORAGE_DUMP_JS: &str = r#"
(() => {
  const entries = {};
  try {
    for (let i = 0; i < localStorage.length; i++) {
      const k = localStorage.key(i);
      entries[k] = localStorage.getItem(k);
    }
  } catch (e) {}
  return JSON.stringify({ origin: location.origin, localStorage: entries });
})()
"#;

/// Persistent browser session. Created once per run.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
    /// localStorage waiting for the first visit to its origin.
    pending: Mutex<Vec<OriginStorage>>,
}

impl BrowserSession {
    /// Attach to a Chrome already listening on the debug port, else launch
    /// one on `profile_dir`.
    pub fn launch(options: &BrowserOptions, profile_dir: &Path) -> Result<Self> {
        if let Some(port) = options.attach_port {
            info!(port, "attempting to attach to existing Chrome");
            match attach(port) {
                Ok(browser) => {
                    let tab = first_tab(&browser)?;
                    info!("attached to existing Chrome");
                    return Ok(Self::with_tab(browser, tab));
                }
                Err(e) => debug!("attach failed: {e:#}"),
            }
        }

        let path = options.chrome_path.clone().or_else(find_chrome);
        info!(
            profile = %profile_dir.display(),
            chrome = ?path,
            headless = options.headless,
            "launching Chrome"
        );
        let launch = LaunchOptions {
            headless: options.headless,
            path,
            user_data_dir: Some(profile_dir.to_path_buf()),
            window_size: Some(options.window_size),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(options.idle_timeout_secs),
            ..Default::default()
        };

        let browser = Browser::new(launch)
            .map_err(|e| Error::FatalLaunchFailure(format!("{e:#}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::FatalLaunchFailure(format!("cannot open tab: {e:#}")))?;
        info!("Chrome ready");
        Ok(Self::with_tab(browser, tab))
    }

    fn with_tab(browser: Browser, tab: Arc<Tab>) -> Self {
        tab.set_default_timeout(DEFAULT_TIMEOUT);
        Self {
            _browser: browser,
            tab,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Apply stashed localStorage if the tab just landed on its origin, then
    /// reload so the page reads it.
    fn apply_pending_storage(&self) -> EngineResult<()> {
        let Ok(mut pending) = self.pending.lock() else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }
        let here: Value = self.evaluate("location.origin")?;
        let Some(origin) = here.as_str() else {
            return Ok(());
        };
        let Some(pos) = pending.iter().position(|o| o.origin == origin) else {
            return Ok(());
        };
        let storage = pending.remove(pos);
        drop(pending);

        let entries = serde_json::to_string(&storage.local_storage)
            .map_err(|e| EngineError::Script(e.to_string()))?;
        let script = format!(
            "(() => {{ const e = {entries}; for (const k in e) localStorage.setItem(k, e[k]); return true; }})()"
        );
        self.evaluate(&script)?;
        info!(origin, keys = storage.local_storage.len(), "restored localStorage");
        self.tab
            .reload(false, None)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| EngineError::from_cdp("reload", e))?;
        Ok(())
    }
}

impl Engine for BrowserSession {
    fn navigate(&self, url: &str) -> EngineResult<()> {
        self.tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| EngineError::from_cdp(&format!("navigate {url}"), e))?;
        if let Err(e) = self.apply_pending_storage() {
            warn!("localStorage restore failed: {e}");
        }
        Ok(())
    }

    fn evaluate(&self, script: &str) -> EngineResult<Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| EngineError::from_cdp("evaluate", e))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn scroll_into_view(&self, selector: &str) -> EngineResult<()> {
        self.tab
            .find_element(selector)
            .and_then(|el| el.scroll_into_view().map(|_| ()))
            .map_err(|e| EngineError::Interaction(format!("scroll {selector}: {e:#}")))
    }

    fn click(&self, selector: &str) -> EngineResult<()> {
        self.tab
            .find_element(selector)
            .and_then(|el| el.click().map(|_| ()))
            .map_err(|e| EngineError::Interaction(format!("click {selector}: {e:#}")))
    }

    fn focus(&self, selector: &str) -> EngineResult<()> {
        self.tab
            .find_element(selector)
            .and_then(|el| el.focus().map(|_| ()))
            .map_err(|e| EngineError::Interaction(format!("focus {selector}: {e:#}")))
    }

    fn type_text(&self, text: &str, delay: &dyn Fn() -> Duration) -> EngineResult<()> {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.tab
                .type_str(ch.encode_utf8(&mut buf))
                .map_err(|e| EngineError::Interaction(format!("type: {e:#}")))?;
            std::thread::sleep(delay());
        }
        Ok(())
    }

    fn screenshot(&self) -> EngineResult<Vec<u8>> {
        let clip = match self.tab.call_method(Page::GetLayoutMetrics(None)) {
            Ok(metrics) => {
                full_page_clip(metrics.css_content_size.width, metrics.css_content_size.height)
            }
            Err(e) => {
                debug!("layout metrics unavailable, capturing viewport: {e:#}");
                None
            }
        };
        match self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip.clone(), true)
        {
            Ok(png) => Ok(png),
            Err(e) if clip.is_some() => {
                debug!("full-page capture failed, capturing viewport: {e:#}");
                self.tab
                    .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| EngineError::from_cdp("screenshot", e))
            }
            Err(e) => Err(EngineError::from_cdp("screenshot", e)),
        }
    }

    fn markup(&self) -> EngineResult<String> {
        self.tab
            .get_content()
            .map_err(|e| EngineError::from_cdp("get content", e))
    }

    fn save_state(&self, path: &Path) -> EngineResult<()> {
        let cookies = self
            .tab
            .get_cookies()
            .map_err(|e| EngineError::from_cdp("get cookies", e))?;

        let mut state = StorageState {
            cookies: cookies
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok())
                .collect(),
            saved_at: Some(chrono::Utc::now()),
            ..Default::default()
        };

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Dump {
            origin: String,
            local_storage: BTreeMap<String, String>,
        }
        match evaluate_json::<_, Dump>(self, STORAGE_DUMP_JS) {
            Ok(dump) if dump.origin.starts_with("http") => state.put_origin(OriginStorage {
                origin: dump.origin,
                local_storage: dump.local_storage,
            }),
            Ok(_) => {}
            Err(e) => debug!("localStorage dump failed: {e}"),
        }

        state.save(path).map_err(|e| match e {
            Error::Io(io) => EngineError::Io(io),
            other => EngineError::Io(std::io::Error::other(other.to_string())),
        })
    }

    fn restore_state(&self, path: &Path) -> EngineResult<()> {
        let state = match StorageState::load(path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %path.display(), "no saved session state");
                return Ok(());
            }
            Err(e) => return Err(EngineError::Io(std::io::Error::other(e.to_string()))),
        };

        let params: Vec<CookieParam> = state
            .cookies
            .iter()
            .filter_map(|c| cookie_param(c.clone()))
            .collect();
        let count = params.len();
        if !params.is_empty() {
            self.tab
                .set_cookies(params)
                .map_err(|e| EngineError::from_cdp("set cookies", e))?;
        }
        if let Ok(mut pending) = self.pending.lock() {
            *pending = state.origins;
        }
        info!(cookies = count, "session state restored");
        Ok(())
    }
}

/// A saved cookie as a settable one. Engine-reported fields with no setter
/// counterpart are dropped; session cookies lose their negative expiry.
fn cookie_param(mut cookie: Value) -> Option<CookieParam> {
    let obj = cookie.as_object_mut()?;
    for key in ["size", "session", "partitionKey", "partitionKeyOpaque"] {
        obj.remove(key);
    }
    if obj.get("expires").and_then(Value::as_f64).is_some_and(|e| e < 0.0) {
        obj.remove("expires");
    }
    serde_json::from_value(cookie).ok()
}

/// Resolve the browser websocket from the debug port and connect to it.
fn attach(port: u16) -> anyhow::Result<Browser> {
    #[derive(Deserialize)]
    struct Version {
        #[serde(rename = "webSocketDebuggerUrl")]
        ws_url: String,
    }
    let version: Version = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?
        .get(format!("http://127.0.0.1:{port}/json/version"))
        .send()?
        .error_for_status()?
        .json()?;
    Browser::connect(version.ws_url)
}

fn first_tab(browser: &Browser) -> Result<Arc<Tab>> {
    let existing = match browser.get_tabs().lock() {
        Ok(tabs) => tabs.first().cloned(),
        Err(_) => None,
    };
    match existing {
        Some(tab) => Ok(tab),
        None => browser
            .new_tab()
            .map_err(|e| Error::FatalLaunchFailure(format!("cannot open tab: {e:#}"))),
    }
}

/// Platform install locations. `None` defers to headless_chrome's own lookup.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    };
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(
            local
                .join("Google")
                .join("Chrome")
                .join("Application")
                .join("chrome.exe"),
        );
    }
    candidates.into_iter().find(|p| p.exists())
}

/// Clip covering the whole document, in CSS pixels.
fn full_page_clip(width: f64, height: f64) -> Option<Page::Viewport> {
    if !(width.is_finite() && height.is_finite()) || width < 1.0 || height < 1.0 {
        return None;
    }
    Some(Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: width.ceil().min(MAX_CAPTURE_PX),
        height: height.ceil().min(MAX_CAPTURE_PX),
        scale: 1.0,
    })
}
